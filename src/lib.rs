//! `xcode-bsp-server`: a Build Server Protocol daemon that serves compiler flags and
//! index-store locations to a SourceKit-based language server, backed by Xcode's own
//! `.xcactivitylog` build output.
//!
//! Module layout mirrors the component table in SPEC_FULL.md §2: [`token`] (A), [`log_parser`]
//! (B), [`database`] (C), [`flags`] (D), [`config`] (E), [`watcher`] (F), [`bsp`] (G), plus the
//! shared [`state`], [`paths`] and [`shell`] helpers and the [`system`] ambient stack.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use clap::{Parser, Subcommand};

pub mod bsp;
pub mod config;
pub mod database;
pub mod flags;
pub mod log_parser;
pub mod paths;
pub mod shell;
pub mod state;
pub mod system;
pub mod token;
pub mod watcher;

use crate::config::ServerConfig;
use crate::state::SharedState;
use crate::system::{fs, Error};

/// CLI entry point.
#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// Project root (where `buildServer.json` is)
    ///
    /// Defaults to the current working directory
    #[clap(short('C'), long, default_value = ".")]
    pub dir: String,

    /// Print verbose output
    #[clap(short, long)]
    pub verbose: bool,

    /// Subcommand
    #[clap(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Parse one `.xcactivitylog` and merge the result into the project's compile database,
    /// without starting the BSP server. Useful for offline debugging of a single log.
    ParseLog {
        /// Path to the `.xcactivitylog` file
        path: String,
        /// Skip validating that the compile command names `swiftc`/`clang`
        #[clap(long)]
        skip_validate_bin: bool,
    },
}

impl Cli {
    pub fn run(&self) -> Result<(), Error> {
        match &self.command {
            Some(Command::ParseLog { path, skip_validate_bin }) => parse_log(&self.dir, path, *skip_validate_bin),
            None => serve(&self.dir),
        }
    }
}

/// Run the `parse-log` debug subcommand: parse one log and merge it into `<dir>`'s compile
/// database, printing the merged record count to stderr.
fn parse_log(dir: &str, log_path: &str, skip_validate_bin: bool) -> Result<(), Error> {
    let root = PathBuf::from(dir);
    let config_path = root.join(ServerConfig::DEFAULT_FILE_NAME);
    let config = ServerConfig::from_path(&config_path)?;
    let cache_dir = root.join(".xcode-bsp-cache");
    let database_path = paths::compile_database_path(&config, &cache_dir);

    let mut database = if database_path.exists() {
        database::CompileDatabase::load(&database_path)?
    } else {
        database::CompileDatabase::new()
    };

    let parsed = log_parser::parse_log(Path::new(log_path), skip_validate_bin)?;
    let count = parsed.records.len();
    database.merge(parsed.records)?;
    if let Some(parent) = database_path.parent() {
        fs::ensure_directory(parent)?;
    }
    database.save(&database_path)?;
    system::infoln!("Merged", "{count} record(s) from {log_path} into {}", database_path.display());
    Ok(())
}

/// Run the BSP server loop rooted at `dir` until `build/exit` or stdin EOF.
pub fn serve(dir: &str) -> Result<(), Error> {
    let root = PathBuf::from(dir);
    let config_path = root.join(ServerConfig::DEFAULT_FILE_NAME);
    let config = ServerConfig::from_path(&config_path)?;
    // `cache_dir`/`database_path` are provisional until `build/initialize` supplies the real
    // `rootUri` and replaces them (§4.G `build_initialize`).
    let cache_dir = root.join(".xcode-bsp-cache");
    fs::ensure_directory(&cache_dir)?;
    let database_path = paths::compile_database_path(&config, &cache_dir);

    let state: state::AppState = Arc::new(Mutex::new(SharedState::new(
        String::new(),
        cache_dir,
        config,
        config_path,
        database_path,
    )));

    bsp::serve(state)
}
