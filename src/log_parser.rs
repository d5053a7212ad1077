//! Component B: the log parser. Consumes the token stream from [`crate::token`] and lifts the
//! recognized compile sections into [`CompileRecord`]s.
//!
//! Grounded on `XcodeLogParser` in `xclog_parser.py` (section recognition, `read_until_empty_line`,
//! `extract_swift_files_from_swiftc`) generalized to the fuller section set named in the spec
//! (`CompileC`/`ProcessPCH` rewriting, which the retained `xclog_parser.py` revision doesn't cover
//! but `compile_database.py`'s single-file records imply).

use std::collections::{HashMap, HashSet};
use std::io::Read;
use std::path::Path;

use crate::database::CompileRecord;
use crate::shell;
use crate::system::{self, Error, PathExt};
use crate::token::{Token, Tokenizer};

pub struct ParseResult {
    pub records: Vec<CompileRecord>,
    pub index_store_paths: HashSet<String>,
}

/// Parse a whole `.xcactivitylog`, producing the compile records it contains.
pub fn parse_log(path: &Path, skip_validate_bin: bool) -> Result<ParseResult, Error> {
    let tokenizer = Tokenizer::open(path)?;
    parse_tokens(tokenizer, skip_validate_bin)
}

pub fn parse_tokens<R: Read>(tokenizer: Tokenizer<R>, skip_validate_bin: bool) -> Result<ParseResult, Error> {
    let mut records = Vec::new();
    let mut index_store_paths = HashSet::new();
    let mut pch_outputs: HashMap<String, String> = HashMap::new();

    for token in tokenizer {
        let token = token?;
        let text = match token {
            Token::String(s) => s,
            _ => continue,
        };
        let Some(first_line) = text.lines().next() else { continue };

        if first_line.starts_with("CompileSwiftSources") {
            match parse_compile_swift_sources(&text, skip_validate_bin) {
                Some((record, index_store_path)) => {
                    if let Some(p) = index_store_path {
                        index_store_paths.insert(p);
                    }
                    records.push(record);
                }
                None => system::errorln!("Warn", "malformed CompileSwiftSources section"),
            }
        } else if first_line.starts_with("SwiftDriver\\ Compilation") {
            match parse_compile_swift_sources(&text, skip_validate_bin) {
                Some((record, index_store_path)) => {
                    if let Some(p) = index_store_path {
                        index_store_paths.insert(p);
                    }
                    records.push(record);
                }
                None => system::verboseln!("Skip", "SwiftDriver Compilation-Requirements or malformed section"),
            }
        } else if first_line.starts_with("CompileC ") {
            match parse_compile_c(&text, skip_validate_bin, &pch_outputs) {
                Some(record) => records.push(record),
                None => system::errorln!("Warn", "malformed CompileC section"),
            }
        } else if first_line.starts_with("ProcessPCH") {
            if let Some((condition, output)) = parse_process_pch(&text) {
                pch_outputs.insert(condition, output);
            }
        }
    }

    Ok(ParseResult {
        records,
        index_store_paths,
    })
}

fn read_until_empty_line<'a, I: Iterator<Item = &'a str>>(lines: &mut I) -> Vec<&'a str> {
    let mut out = Vec::new();
    for line in lines {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            break;
        }
        out.push(trimmed);
    }
    out
}

/// Shared by `CompileSwiftSources` and `SwiftDriver Compilation`/`SwiftDriver` blocks: both are a
/// list of lines up to the first empty line, whose last non-empty line is the compiler command.
fn parse_compile_swift_sources(text: &str, skip_validate_bin: bool) -> Option<(CompileRecord, Option<String>)> {
    let mut lines = text.lines();
    lines.next(); // consume the section header line itself
    let block = read_until_empty_line(&mut lines);
    if block.is_empty() {
        return None;
    }

    let mut command = block.last().copied().unwrap_or_default().to_string();
    for prefix in ["builtin-Swift-Compilation -- ", "builtin-SwiftDriver -- "] {
        if let Some(stripped) = command.strip_prefix(prefix) {
            command = stripped.to_string();
            break;
        }
    }
    if command.starts_with("builtin-Swift-Compilation-Requirements") {
        return None;
    }
    if !skip_validate_bin && !command.contains("bin/swiftc ") {
        return None;
    }

    let directory = block
        .iter()
        .find_map(|l| shell::directory_from_cd_line(l))
        .map(|s| s.to_string());

    let args = shell::split(&command).ok()?;
    let module_name = args
        .iter()
        .position(|a| a == "-module-name")
        .and_then(|i| args.get(i + 1))
        .cloned();
    let index_store_path = args
        .iter()
        .position(|a| a == "-index-store-path")
        .and_then(|i| args.get(i + 1))
        .cloned();
    let files: Vec<String> = args
        .iter()
        .filter(|a| a.ends_with(".swift"))
        .filter_map(|a| Path::new(a).canonicalize2().ok())
        .map(|p| p.display().to_string())
        .collect();
    let file_lists: Vec<String> = args
        .iter()
        .filter(|a| a.ends_with(".SwiftFileList"))
        .map(|a| a.trim_start_matches('@').to_string())
        .collect();

    Some((
        CompileRecord::Module {
            command,
            directory,
            module_name,
            files,
            file_lists,
        },
        index_store_path,
    ))
}

fn parse_compile_c(
    text: &str,
    skip_validate_bin: bool,
    pch_outputs: &HashMap<String, String>,
) -> Option<CompileRecord> {
    let mut lines = text.lines();
    let header = lines.next()?;
    let header_args = shell::split(header).ok()?;
    // CompileC <output> <file> <condition...>
    let output = header_args.get(1)?.clone();
    let file = header_args.get(2)?.clone();
    let condition = header_args.get(3..).map(|c| c.join(" ")).unwrap_or_default();

    let block = read_until_empty_line(&mut lines);
    let mut command = block.last().copied().unwrap_or_default().to_string();
    if command.is_empty() {
        return None;
    }

    let first_word = shell::split(&command).ok()?.into_iter().next().unwrap_or_default();
    let is_clang = Path::new(&first_word)
        .file_name()
        .map(|n| n.to_string_lossy().contains("clang"))
        .unwrap_or(false);
    if !skip_validate_bin && !is_clang {
        return None;
    }

    if let Some(pch_output) = pch_outputs.get(&condition) {
        command = rewrite_include(&command, pch_output);
    }

    let directory = block
        .iter()
        .find_map(|l| shell::directory_from_cd_line(l))
        .map(|s| s.to_string());

    Some(CompileRecord::SingleFile {
        command,
        directory,
        file,
        output,
    })
}

/// Replace the argument following `-include` with `replacement`, shell-quoted.
fn rewrite_include(command: &str, replacement: &str) -> String {
    let Ok(words) = shell::split(command) else {
        return command.to_string();
    };
    let mut out = Vec::with_capacity(words.len());
    let mut i = 0;
    while i < words.len() {
        out.push(shell::quote(&words[i]));
        if words[i] == "-include" && i + 1 < words.len() {
            out.push(shell::quote(replacement));
            i += 2;
            continue;
        }
        i += 1;
    }
    out.join(" ")
}

fn parse_process_pch(text: &str) -> Option<(String, String)> {
    let mut lines = text.lines();
    let header = lines.next()?;
    let header_args = shell::split(header).ok()?;
    let output = header_args.get(1)?.clone();
    let condition = header_args.get(3..).map(|c| c.join(" ")).unwrap_or_default();
    Some((condition, output))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_swift_sources_extracts_module_fields() {
        let text = "CompileSwiftSources normal x86_64 com.apple.compilers.swift\ncd /Users/me/project\n/usr/bin/swiftc -module-name App -index-store-path /idx /p/a.swift /p/b.swift\n\ntrailer";
        let (record, index_store_path) = parse_compile_swift_sources(text, false).unwrap();
        assert_eq!(index_store_path.as_deref(), Some("/idx"));
        match record {
            CompileRecord::Module {
                module_name, directory, ..
            } => {
                assert_eq!(module_name.as_deref(), Some("App"));
                assert_eq!(directory.as_deref(), Some("/Users/me/project"));
            }
            _ => panic!("expected module record"),
        }
    }

    #[test]
    fn rejects_command_missing_swiftc_without_skip_flag() {
        let text = "CompileSwiftSources normal x86_64\nnot-a-compiler-invocation\n\n";
        assert!(parse_compile_swift_sources(text, false).is_none());
    }

    #[test]
    fn rewrite_include_swaps_virtual_pch_path() {
        let rewritten = rewrite_include("clang -include /virtual/Prefix.pch -c a.m", "/real/Prefix.pch");
        assert!(rewritten.contains("/real/Prefix.pch"));
        assert!(!rewritten.contains("/virtual/Prefix.pch"));
    }

    /// Write a minimal `.xcactivitylog` containing one `String` token and return its path.
    fn write_activity_log(section_text: &str) -> std::path::PathBuf {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        use std::io::Write;

        let mut raw = Vec::new();
        raw.extend_from_slice(b"SLF0");
        raw.extend_from_slice(format!("{}\"{}", section_text.len(), section_text).as_bytes());

        let path = std::env::temp_dir().join(format!(
            "xcode-bsp-logparser-test-{}-{}.xcactivitylog",
            std::process::id(),
            section_text.len()
        ));
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&raw).unwrap();
        std::fs::write(&path, encoder.finish().unwrap()).unwrap();
        path
    }

    #[test]
    fn parse_log_recognizes_escaped_swift_driver_compilation_section() {
        // Xcode escapes the space in the section title with a literal backslash.
        let text = "SwiftDriver\\ Compilation normal arm64 com.apple.xcode.tools.swift.compiler\ncd /Users/me/project\n/usr/bin/swiftc -module-name App -index-store-path /idx /p/a.swift\n\ntrailer";
        let path = write_activity_log(text);

        let result = parse_log(&path, false).unwrap();
        assert_eq!(result.records.len(), 1);
        assert!(result.index_store_paths.contains("/idx"));
        match &result.records[0] {
            CompileRecord::Module { module_name, .. } => assert_eq!(module_name.as_deref(), Some("App")),
            _ => panic!("expected module record"),
        }

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn parse_log_recognizes_compile_swift_sources_section() {
        let text = "CompileSwiftSources normal x86_64 com.apple.compilers.swift\ncd /Users/me/project\n/usr/bin/swiftc -module-name App /p/a.swift\n\ntrailer";
        let path = write_activity_log(text);

        let result = parse_log(&path, false).unwrap();
        assert_eq!(result.records.len(), 1);

        let _ = std::fs::remove_file(&path);
    }
}
