//! Component C: the compile database — an indexed, incrementally mergeable mapping from source
//! file to compiler command.
//!
//! Grounded on `compile_database.py` (`merge_database`, `CommandForSwiftInCompile`, the "hack in a
//! new file" splice) and the `\=` lookup fixup, reshaped from a loose `dict`-of-dicts into a typed
//! `CompileRecord` per the Design Notes ("do not rely on structural typing").

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::shell;
use crate::system::{self, Error, PathExt};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CompileRecord {
    /// `CompileC` output: one translation unit, one command.
    SingleFile {
        command: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        directory: Option<String>,
        file: String,
        output: String,
    },
    /// `CompileSwiftSources` / `SwiftDriver Compilation` output: one command for a whole module.
    Module {
        command: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        directory: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        module_name: Option<String>,
        #[serde(default)]
        files: Vec<String>,
        #[serde(default, rename = "fileLists")]
        file_lists: Vec<String>,
    },
}

impl CompileRecord {
    /// Identity key used by merge: `file` if present, else `module_name`.
    pub fn identity(&self) -> Option<&str> {
        match self {
            CompileRecord::SingleFile { file, .. } => Some(file.as_str()),
            CompileRecord::Module { module_name, .. } => module_name.as_deref(),
        }
    }

    pub fn command(&self) -> &str {
        match self {
            CompileRecord::SingleFile { command, .. } => command,
            CompileRecord::Module { command, .. } => command,
        }
    }

    pub fn directory(&self) -> Option<&str> {
        match self {
            CompileRecord::SingleFile { directory, .. } => directory.as_deref(),
            CompileRecord::Module { directory, .. } => directory.as_deref(),
        }
    }
}

/// Is `dir` a project root, i.e. does it contain a `.git` entry.
pub fn is_project_root(dir: &Path) -> bool {
    dir.join(".git").exists()
}

type FileListCache = HashMap<String, Vec<String>>;

/// Expand a `.SwiftFileList`/response-file path into its listed (canonicalized) files, caching
/// by path so repeated lookups in one session don't re-read disk.
pub fn load_file_list(path: &str, cache: &mut FileListCache) -> Result<Vec<String>, Error> {
    if let Some(cached) = cache.get(path) {
        return Ok(cached.clone());
    }
    let content = system::read_file(path)?;
    let words = shell::split(&content)?;
    let mut resolved = Vec::with_capacity(words.len());
    for w in words {
        let canonical = PathBuf::from(&w).canonicalize2().map(|p| p.display().to_string()).unwrap_or(w);
        resolved.push(canonical);
    }
    cache.insert(path.to_string(), resolved.clone());
    Ok(resolved)
}

#[derive(Default)]
pub struct CompileDatabase {
    records: Vec<CompileRecord>,
    file_info: HashMap<String, String>,
    working_directory: HashMap<String, String>,
    directory_index: Option<HashMap<String, HashSet<String>>>,
    command_index: Option<HashMap<String, HashSet<String>>>,
}

impl CompileDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[CompileRecord] {
        &self.records
    }

    /// Load a compile database JSON file, building the in-memory indices.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let content = system::read_file(path)?;
        let records: Vec<CompileRecord> =
            serde_json::from_str(&content).map_err(|e| Error::ParseDatabase(path.display().to_string(), e))?;
        let mut db = Self::default();
        let mut file_list_cache = FileListCache::new();
        for record in records {
            db.index_record(&record, &mut file_list_cache)?;
            db.records.push(record);
        }
        Ok(db)
    }

    fn index_record(&mut self, record: &CompileRecord, file_list_cache: &mut FileListCache) -> Result<(), Error> {
        match record {
            CompileRecord::Module {
                command,
                directory,
                files,
                file_lists,
                ..
            } => {
                for f in files {
                    if let Ok(key) = f.canonical_key() {
                        self.file_info.insert(key.clone(), command.clone());
                        if let Some(dir) = directory {
                            self.working_directory.insert(key, dir.clone());
                        }
                    }
                }
                for list_path in file_lists {
                    let expanded = load_file_list(list_path, file_list_cache)?;
                    for f in expanded {
                        if let Ok(key) = f.canonical_key() {
                            self.file_info.insert(key.clone(), command.clone());
                            if let Some(dir) = directory {
                                self.working_directory.insert(key, dir.clone());
                            }
                        }
                    }
                }
            }
            CompileRecord::SingleFile {
                command, directory, file, ..
            } => {
                if let Ok(key) = file.canonical_key() {
                    self.file_info.insert(key.clone(), command.clone());
                    if let Some(dir) = directory {
                        self.working_directory.insert(key, dir.clone());
                    }
                }
            }
        }
        self.invalidate_indices();
        Ok(())
    }

    fn invalidate_indices(&mut self) {
        self.directory_index = None;
        self.command_index = None;
    }

    fn ensure_indices(&mut self) {
        if self.directory_index.is_some() {
            return;
        }
        let mut directory_index: HashMap<String, HashSet<String>> = HashMap::new();
        let mut command_index: HashMap<String, HashSet<String>> = HashMap::new();
        for (path, command) in &self.file_info {
            if let Some(parent) = Path::new(path).parent() {
                directory_index
                    .entry(parent.display().to_string())
                    .or_default()
                    .insert(path.clone());
            }
            command_index.entry(command.clone()).or_default().insert(path.clone());
        }
        self.directory_index = Some(directory_index);
        self.command_index = Some(command_index);
    }

    /// Look up the command for a canonical path, fixing up the Xcode 12 `\=` quoting artifact.
    pub fn lookup(&self, canonical_path: &str) -> Option<String> {
        self.file_info.get(canonical_path).map(|c| c.replace("\\=", "="))
    }

    pub fn lookup_working_directory(&self, canonical_path: &str) -> Option<&str> {
        self.working_directory.get(canonical_path).map(|s| s.as_str())
    }

    /// Merge `new_records` into `self`: identity-keyed replacement, append of new identities.
    pub fn merge(&mut self, new_records: Vec<CompileRecord>) -> Result<(), Error> {
        let mut new_by_identity: HashMap<String, CompileRecord> = HashMap::new();
        for r in &new_records {
            if let Some(id) = r.identity() {
                new_by_identity.insert(id.to_string(), r.clone());
            }
        }

        let mut dealt: HashSet<String> = HashSet::new();
        let mut merged: Vec<CompileRecord> = Vec::with_capacity(self.records.len() + new_records.len());
        for old in self.records.drain(..) {
            match old.identity() {
                Some(id) => {
                    dealt.insert(id.to_string());
                    match new_by_identity.get(id) {
                        Some(replacement) => merged.push(replacement.clone()),
                        None => merged.push(old),
                    }
                }
                None => merged.push(old),
            }
        }
        for r in new_records {
            let keep = match r.identity() {
                Some(id) => !dealt.contains(id),
                None => true,
            };
            if keep {
                merged.push(r);
            }
        }

        let mut file_list_cache = FileListCache::new();
        self.file_info.clear();
        self.working_directory.clear();
        self.records = Vec::with_capacity(merged.len());
        for record in merged {
            self.index_record(&record, &mut file_list_cache)?;
            self.records.push(record);
        }
        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<(), Error> {
        let body = serde_json::to_string_pretty(&self.records)
            .map_err(|e| Error::ParseDatabase(path.display().to_string(), e))?;
        system::write_file(path, body)
    }

    /// Handle an editor opening a `.swift` file with no compile-database entry: find a sibling
    /// file's command and splice the new path into it. Returns the set of affected canonical
    /// paths (including the new one) if a sibling command was found.
    pub fn new_file(&mut self, path: &Path) -> Result<Option<HashSet<String>>, Error> {
        let canonical = path.canonicalize2()?;
        let key = canonical.display().to_string().to_lowercase();
        if self.file_info.contains_key(&key) {
            let mut set = HashSet::new();
            set.insert(key);
            return Ok(Some(set));
        }

        self.ensure_indices();
        let directory_index = self.directory_index.as_ref().unwrap();

        let mut dir = canonical.parent().map(|p| p.to_path_buf());
        let mut similar: Option<String> = None;
        while let Some(d) = dir {
            let dir_key = d.display().to_string().to_lowercase();
            if let Some(siblings) = directory_index.get(&dir_key) {
                if let Some(found) = siblings.iter().find(|p| p.ends_with(".swift")) {
                    similar = Some(found.clone());
                    break;
                }
            }
            if is_project_root(&d) {
                break;
            }
            dir = d.parent().map(|p| p.to_path_buf());
        }

        let Some(similar) = similar else {
            return Ok(None);
        };

        let old_command = self.file_info.get(&similar).cloned().unwrap_or_default();
        let words = shell::split(&old_command)?;
        let Some(first_word) = words.first() else {
            return Ok(None);
        };
        let splice_at = old_command.find(first_word.as_str()).map(|i| i + first_word.len()).unwrap_or(0);
        let quoted = shell::quote(&canonical.display().to_string());
        let new_command = format!("{} {}{}", &old_command[..splice_at], quoted, &old_command[splice_at..]);

        self.ensure_indices();
        let affected: HashSet<String> = self
            .command_index
            .as_ref()
            .and_then(|idx| idx.get(&old_command))
            .cloned()
            .unwrap_or_else(|| {
                let mut s = HashSet::new();
                s.insert(similar.clone());
                s
            });

        let mut affected = affected;
        affected.insert(key.clone());

        for p in &affected {
            self.file_info.insert(p.clone(), new_command.clone());
        }
        self.invalidate_indices();

        Ok(Some(affected))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single(file: &str, command: &str) -> CompileRecord {
        CompileRecord::SingleFile {
            command: command.to_string(),
            directory: None,
            file: file.to_string(),
            output: format!("{file}.o"),
        }
    }

    #[test]
    fn merge_is_identity_keyed() {
        let mut db = CompileDatabase::new();
        db.records = vec![single("/a.m", "X")];
        db.merge(vec![single("/a.m", "Y"), single("/b.m", "Z")]).unwrap();
        let commands: Vec<&str> = db.records.iter().map(|r| r.command()).collect();
        assert_eq!(commands, vec!["Y", "Z"]);
    }

    #[test]
    fn lookup_fixes_up_escaped_equals() {
        let mut db = CompileDatabase::new();
        db.file_info.insert("/x/y.m".to_string(), r"clang -DFOO\=bar -c /x/y.m".to_string());
        let command = db.lookup("/x/y.m").unwrap();
        assert!(command.contains("-DFOO=bar"));
        assert!(!command.contains(r"\="));
    }

    #[test]
    fn record_identity_prefers_file_over_module_name() {
        let r = single("/a.swift", "swiftc /a.swift");
        assert_eq!(r.identity(), Some("/a.swift"));
    }

    #[test]
    fn new_file_splices_sibling_command() {
        let dir = std::env::temp_dir().join(format!("xcode-bsp-newfile-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let a_path = dir.join("a.swift");
        let b_path = dir.join("b.swift");
        std::fs::write(&a_path, "").unwrap();
        std::fs::write(&b_path, "").unwrap();

        let a_key = a_path.canonical_key().unwrap();
        let mut db = CompileDatabase::new();
        db.file_info.insert(a_key.clone(), format!("swiftc -module-name M {}", a_path.display()));

        let affected = db.new_file(&b_path).unwrap().expect("sibling command found");
        let b_key = b_path.canonical_key().unwrap();
        assert!(affected.contains(&a_key));
        assert!(affected.contains(&b_key));

        let command_for_a = db.lookup(&a_key).unwrap();
        let command_for_b = db.lookup(&b_key).unwrap();
        assert_eq!(command_for_a, command_for_b);
        assert!(command_for_a.contains(&shell::quote(&b_path.display().to_string())));
        assert!(command_for_a.starts_with("swiftc "));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
