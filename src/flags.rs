//! Component D: the flag resolver. Turns a looked-up compiler command into the flag list
//! SourceKit actually wants, and infers flags heuristically for Swift files with no database
//! entry.
//!
//! Grounded on `compile_database.py`'s `filterSwiftArgs`/`FlagsForSwift`/`findSwiftModuleRoot`,
//! with header/source harvesting done via `walkdir` in-process instead of shelling out to `find`
//! (per the Design Notes).

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::database::{is_project_root, load_file_list, CompileDatabase};
use crate::shell;
use crate::system::{self, ChildBuilder, Error, PathExt};

type FileListCache = std::collections::HashMap<String, Vec<String>>;

/// Look up the command for `path` in `db` and filter it into the flags SourceKit wants.
pub fn get_flags(path: &Path, db: &CompileDatabase) -> Result<Option<Vec<String>>, Error> {
    let key = path.canonical_key()?;
    let Some(command) = db.lookup(&key) else {
        return Ok(None);
    };
    let mut words = shell::split(&command)?.into_iter();
    words.next(); // drop the executable
    let mut cache = FileListCache::new();
    let mut out = Vec::new();
    filter_args(words, &mut cache, &mut out)?;
    Ok(Some(out))
}

/// Resolve flags for `path`: database lookup first, then the "hack in a new file" splice (§4.C
/// `new_file`) for a `.swift` file the database doesn't know about yet, then the Swift heuristic
/// fallback. The `new_file` splice mutates `db` in place; it is in-memory only and not persisted
/// to the on-disk compile database — the next real build naturally supersedes it.
pub fn resolve_flags(path: &Path, db: &mut CompileDatabase) -> Result<Option<Vec<String>>, Error> {
    if let Some(flags) = get_flags(path, db)? {
        return Ok(Some(flags));
    }
    if path.extension().map(|e| e == "swift").unwrap_or(false) {
        if let Ok(Some(_affected)) = db.new_file(path) {
            if let Some(flags) = get_flags(path, db)? {
                return Ok(Some(flags));
            }
        }
        return Ok(Some(flags_for_swift_fallback(path)?));
    }
    Ok(None)
}

/// Filter rules (P1/P5): `-filelist`/response-file expansion, denylisting, pass-through.
fn filter_args<I: Iterator<Item = String>>(
    mut it: I,
    cache: &mut FileListCache,
    out: &mut Vec<String>,
) -> Result<(), Error> {
    while let Some(arg) = it.next() {
        if arg == "-emit-localized-strings-path" {
            it.next();
            continue;
        }
        if arg == "-use-frontend-parseable-output" || arg == "-emit-localized-strings" {
            continue;
        }
        if arg == "-filelist" {
            if let Some(list_path) = it.next() {
                out.extend(load_file_list(&list_path, cache)?);
            }
            continue;
        }
        if let Some(rest) = arg.strip_prefix('@') {
            out.extend(load_file_list(rest, cache)?);
            continue;
        }
        out.push(arg);
    }
    Ok(())
}

enum ModuleRoot {
    FlagsFile { root: PathBuf, flags_file: PathBuf },
    CompileFile { root: PathBuf },
    None,
}

/// Walk upward from `filename`'s directory looking for `.swiftflags` (preferred) or `.compile`,
/// stopping at the first project root (a directory containing `.git`).
fn find_swift_module_root(filename: &Path) -> ModuleRoot {
    let mut dir = filename.parent().map(|p| p.to_path_buf());
    let mut compile_root: Option<PathBuf> = None;

    while let Some(d) = dir {
        let flags_path = d.join(".swiftflags");
        if flags_path.is_file() {
            return ModuleRoot::FlagsFile { root: d, flags_file: flags_path };
        }
        if compile_root.is_none() && d.join(".compile").is_file() {
            compile_root = Some(d.clone());
        }
        if is_project_root(&d) {
            break;
        }
        dir = d.parent().map(|p| p.to_path_buf());
    }

    match compile_root {
        Some(root) => ModuleRoot::CompileFile { root },
        None => ModuleRoot::None,
    }
}

fn harvest_headers(root: &Path) -> (HashSet<String>, HashSet<String>) {
    let mut header_dirs = HashSet::new();
    let mut frameworks = HashSet::new();
    for entry in WalkDir::new(root).follow_links(true).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        if entry.path().extension().map(|e| e == "h").unwrap_or(false) {
            let path_str = entry.path().display().to_string();
            if let Some(idx) = path_str.rfind(".framework") {
                if let Some(parent) = Path::new(&path_str[..idx]).parent() {
                    frameworks.insert(parent.display().to_string());
                }
            } else if let Some(parent) = entry.path().parent() {
                header_dirs.insert(parent.display().to_string());
            }
        }
    }
    (header_dirs, frameworks)
}

fn harvest_swift_files(root: &Path) -> Vec<String> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(true).into_iter().filter_map(|e| e.ok()) {
        if entry.file_type().is_file() && entry.path().extension().map(|e| e == "swift").unwrap_or(false) {
            if let Ok(p) = entry.path().canonicalize2() {
                files.push(p.display().to_string());
            }
        }
    }
    files
}

fn additional_flags(path: &Path) -> Result<Vec<String>, Error> {
    let content = system::read_file(path)?;
    Ok(content
        .lines()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .collect())
}

fn xcode_select_path() -> Option<String> {
    let output = ChildBuilder::new("xcode-select").args(["-p"]).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if path.is_empty() {
        None
    } else {
        Some(path)
    }
}

fn default_sdk_path() -> String {
    let developer_dir =
        xcode_select_path().unwrap_or_else(|| "/Applications/Xcode.app/Contents/Developer".to_string());
    format!("{developer_dir}/Platforms/MacOSX.platform/Developer/SDKs/MacOSX.sdk/")
}

/// Heuristic Swift flag inference for a file with no compile-database command.
pub fn flags_for_swift_fallback(path: &Path) -> Result<Vec<String>, Error> {
    let canonical = path.canonicalize2()?;

    let (root, flags_file) = match find_swift_module_root(&canonical) {
        ModuleRoot::FlagsFile { root, flags_file } => (root, Some(flags_file)),
        ModuleRoot::CompileFile { root } => (root, None),
        ModuleRoot::None => {
            return Ok(vec![canonical.display().to_string(), "-sdk".to_string(), default_sdk_path()]);
        }
    };

    let (header_dirs, frameworks) = harvest_headers(&root);
    let swift_files = harvest_swift_files(&root);

    let mut flags = Vec::new();
    for h in &header_dirs {
        flags.push("-Xcc".to_string());
        flags.push(format!("-I{h}"));
    }
    for f in &frameworks {
        flags.push(format!("-F{f}"));
    }
    flags.extend(swift_files.iter().cloned());

    match flags_file {
        Some(ff) => {
            let additional = additional_flags(&ff)?;
            if additional.is_empty() {
                flags.push("-sdk".to_string());
                flags.push(default_sdk_path());
            } else {
                let swift_names: HashSet<String> = swift_files
                    .iter()
                    .filter_map(|p| Path::new(p).file_name().map(|n| n.to_string_lossy().into_owned()))
                    .collect();
                let mut cache = FileListCache::new();
                let mut filtered = Vec::new();
                filter_args(additional.into_iter(), &mut cache, &mut filtered)?;
                flags.extend(filtered.into_iter().filter(|a| {
                    Path::new(a)
                        .file_name()
                        .map(|n| !swift_names.contains(&n.to_string_lossy().into_owned()))
                        .unwrap_or(true)
                }));
            }
        }
        None => {
            flags.push("-sdk".to_string());
            flags.push(default_sdk_path());
        }
    }

    Ok(flags)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_drops_denylisted_and_expands_filelist() {
        let dir = std::env::temp_dir().join(format!("xcode-bsp-filter-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let list_path = dir.join("list.txt");
        std::fs::write(&list_path, "a.swift b.swift").unwrap();

        let args = vec![
            "-filelist".to_string(),
            list_path.display().to_string(),
            "-use-frontend-parseable-output".to_string(),
            "-sdk".to_string(),
            "/SDK".to_string(),
            "main.swift".to_string(),
        ];
        let mut cache = FileListCache::new();
        let mut out = Vec::new();
        filter_args(args.into_iter(), &mut cache, &mut out).unwrap();
        assert_eq!(out, vec!["a.swift", "b.swift", "-sdk", "/SDK", "main.swift"]);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn filter_drops_emit_localized_strings_path_and_its_argument() {
        let args = vec![
            "-emit-localized-strings-path".to_string(),
            "/tmp/strings".to_string(),
            "-c".to_string(),
        ];
        let mut cache = FileListCache::new();
        let mut out = Vec::new();
        filter_args(args.into_iter(), &mut cache, &mut out).unwrap();
        assert_eq!(out, vec!["-c"]);
    }

    #[test]
    fn resolve_flags_hacks_in_a_sibling_new_file() {
        let dir = std::env::temp_dir().join(format!("xcode-bsp-resolve-newfile-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let a_path = dir.join("a.swift");
        let b_path = dir.join("b.swift");
        std::fs::write(&a_path, "").unwrap();
        std::fs::write(&b_path, "").unwrap();

        let mut db = CompileDatabase::new();
        db.merge(vec![crate::database::CompileRecord::Module {
            command: format!("swiftc -module-name M {}", a_path.display()),
            directory: None,
            module_name: Some("M".to_string()),
            files: vec![a_path.display().to_string()],
            file_lists: Vec::new(),
        }])
        .unwrap();

        let flags = resolve_flags(&b_path, &mut db).unwrap().expect("flags resolved via new_file hack");
        assert!(flags.contains(&"-module-name".to_string()));
        assert!(get_flags(&a_path, &db).unwrap().is_some());

        let _ = std::fs::remove_dir_all(&dir);
    }
}
