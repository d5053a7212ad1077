//! Cache directory and compile-database filename derivation (§6), plus the MD5 helper used to
//! fingerprint `indexStorePath`/`build_root` into stable cache-local file names.
//!
//! Grounded on `server.py`'s `build_initialize` (`~/Library/Caches/xcode-build-server/<root>`)
//! and `config/cmd.py`'s scheme-scoped database naming; the MD5 suffixing on `indexDatabasePath`
//! is the "most capable" schema variant the Design Notes direct us to adopt.

use std::path::{Path, PathBuf};

use md5::{Digest, Md5};

use crate::config::{Kind, ServerConfig};

pub fn md5_hex(bytes: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(bytes);
    hasher.finalize().iter().map(|b| format!("{b:02x}")).collect()
}

/// `~/Library/Caches/xcode-build-server/<rootUri with '/' replaced by '-'>/`
pub fn cache_dir_for_root(root_uri: &str) -> PathBuf {
    let base = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    let slug = root_uri.replace('/', "-");
    base.join("Library/Caches/xcode-build-server").join(slug)
}

/// `indexDatabasePath`, suffixed with the MD5 of `indexStorePath` so swapping stores invalidates
/// the index cache.
pub fn index_database_path(cache_dir: &Path, index_store_path: &str) -> PathBuf {
    cache_dir.join(format!("indexDatabasePath-{}", md5_hex(index_store_path.as_bytes())))
}

pub fn default_index_store_path(cache_dir: &Path) -> PathBuf {
    cache_dir.join("indexStorePath")
}

/// The path of the compile database bound to `config`.
pub fn compile_database_path(config: &ServerConfig, cache_dir: &Path) -> PathBuf {
    match config.kind() {
        Kind::Manual => PathBuf::from(".compile_file"),
        Kind::Xcode => {
            let scheme = config.scheme().unwrap_or_default();
            let build_root = config.build_root().unwrap_or_default();
            let digest = md5_hex(build_root.as_bytes());
            let prefix = if config.skip_validate_bin() { "compile_file1" } else { "compile_file" };
            cache_dir.join(format!("{prefix}-{scheme}-{digest}"))
        }
    }
}

/// `indexStorePath` resolution per `build/initialize`: xcode mode derives it from `build_root`,
/// manual mode reads it directly, otherwise a cache-local default.
pub fn resolve_index_store_path(config: &ServerConfig, cache_dir: &Path) -> String {
    match config.kind() {
        Kind::Xcode => config
            .build_root()
            .map(|root| format!("{root}/Index.noindex/DataStore"))
            .unwrap_or_else(|| default_index_store_path(cache_dir).display().to_string()),
        Kind::Manual => config
            .index_store_path()
            .unwrap_or_else(|| default_index_store_path(cache_dir).display().to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugifies_root_uri() {
        let dir = cache_dir_for_root("file:///Users/me/project");
        assert!(dir.display().to_string().contains("file:--Users-me-project"));
    }

    #[test]
    fn md5_is_stable() {
        assert_eq!(md5_hex(b"hello"), "5d41402abc4b2a76b9719d911017c592");
    }

    #[test]
    fn xcode_mode_names_include_scheme_and_build_root_digest() {
        let mut config = ServerConfig::from_path(std::env::temp_dir().join("does-not-exist.json")).unwrap();
        config.set_kind(Kind::Xcode);
        config.set_scheme(Some("App".to_string()));
        config.set_build_root(Some("/Build/Root".to_string()));
        let cache_dir = PathBuf::from("/cache");
        let path = compile_database_path(&config, &cache_dir);
        assert_eq!(path.parent(), Some(cache_dir.as_path()));
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("compile_file-App-"));
    }
}
