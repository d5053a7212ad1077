use clap::Parser;
use xcode_bsp_server::Cli;

fn main() {
    let cli = Cli::parse();
    if cli.verbose {
        xcode_bsp_server::system::enable_verbose();
    }
    if let Err(e) = cli.run() {
        e.log();
        std::process::exit(1);
    }
}
