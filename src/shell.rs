//! Shell word-splitting, shared by the log parser, flag resolver and compile database.
//!
//! Grounded on `shell_words` (a real POSIX-ish splitter) rather than the hand-rolled regex in
//! `compile_database.py`'s `cmd_split` / `xclog_parser.py`'s `cmd_split_pattern` — the spec
//! explicitly calls for "a real word-splitting crate" here (§1 Out of scope).

use crate::system::Error;

/// Split a shell command line into words. Empty input splits to an empty vec.
pub fn split(command: &str) -> Result<Vec<String>, Error> {
    shell_words::split(command).map_err(|_| Error::InvalidLogFormat(command.to_string()))
}

/// Quote a single argument for safe re-insertion into a shell command line.
pub fn quote(arg: &str) -> String {
    shell_words::quote(arg).into_owned()
}

/// Extract the directory named by a `cd <dir>` line, as emitted inside CompileSwiftSources /
/// CompileC blocks.
pub fn directory_from_cd_line(line: &str) -> Option<&str> {
    line.strip_prefix("cd ").map(|rest| rest.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_quoted_and_escaped_words() {
        let words = split(r#"clang -DFOO="bar baz" /x/y.m"#).unwrap();
        assert_eq!(words, vec!["clang", "-DFOO=bar baz", "/x/y.m"]);
    }

    #[test]
    fn extracts_cd_directory() {
        assert_eq!(directory_from_cd_line("cd /Users/me/project"), Some("/Users/me/project"));
        assert_eq!(directory_from_cd_line("echo hi"), None);
    }

    #[test]
    fn quote_roundtrips_through_split() {
        let quoted = quote("/p/has space.swift");
        let words = split(&format!("swiftc {quoted}")).unwrap();
        assert_eq!(words, vec!["swiftc", "/p/has space.swift"]);
    }
}
