//! Component E: the config store. A typed accessor over `buildServer.json`, generalizing the
//! teacher's `Config`/`ProfileContainer` wrapping of `Megaton.toml` to a dynamic JSON object —
//! this project's config file is JSON, not TOML, so the backing store is `serde_json::Value`
//! instead of a fixed `toml`-derived struct (see DESIGN.md for the dependency swap).
//!
//! Grounded on `config/config.py`'s `_config_property`/`ServerConfig`: each field is a getter
//! that returns a default when absent and a setter that deletes the key on `None`.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use serde_json::{Map, Value};

use crate::system::{self, Error};

pub const DEFAULT_NAME: &str = "xcode build server";
pub const DEFAULT_VERSION: &str = "0.1";
pub const BSP_VERSION: &str = "2.0";

pub fn default_languages() -> Vec<String> {
    ["c", "cpp", "objective-c", "objective-cpp", "swift"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Xcode,
    Manual,
}

impl Kind {
    fn as_str(self) -> &'static str {
        match self {
            Kind::Xcode => "xcode",
            Kind::Manual => "manual",
        }
    }

    fn parse(s: &str) -> Kind {
        match s {
            "xcode" => Kind::Xcode,
            _ => Kind::Manual,
        }
    }
}

/// Typed view over the `buildServer.json` JSON object.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    path: PathBuf,
    data: Map<String, Value>,
}

fn string_field(data: &Map<String, Value>, key: &str) -> Option<String> {
    data.get(key).and_then(|v| v.as_str()).map(|s| s.to_string())
}

fn set_string_field(data: &mut Map<String, Value>, key: &str, value: Option<String>) {
    match value {
        Some(v) => {
            data.insert(key.to_string(), Value::String(v));
        }
        None => {
            data.remove(key);
        }
    }
}

impl ServerConfig {
    pub const DEFAULT_FILE_NAME: &'static str = "buildServer.json";

    /// Load from `path`, or start empty if the file doesn't exist yet.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        let data = if path.exists() {
            let content = system::read_file(&path)?;
            serde_json::from_str(&content).map_err(|e| Error::ParseConfig(path.display().to_string(), e))?
        } else {
            Map::new()
        };
        let mut config = Self { path, data };
        config.ensure_fixed_fields();
        Ok(config)
    }

    fn ensure_fixed_fields(&mut self) {
        self.data
            .entry("name".to_string())
            .or_insert_with(|| Value::String(DEFAULT_NAME.to_string()));
        self.data
            .entry("version".to_string())
            .or_insert_with(|| Value::String(DEFAULT_VERSION.to_string()));
        self.data
            .entry("bspVersion".to_string())
            .or_insert_with(|| Value::String(BSP_VERSION.to_string()));
        self.data.entry("languages".to_string()).or_insert_with(|| {
            Value::Array(default_languages().into_iter().map(Value::String).collect())
        });
        self.data.entry("argv".to_string()).or_insert_with(|| {
            let argv: Vec<Value> = std::env::args().take(1).map(Value::String).collect();
            Value::Array(argv)
        });
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> Kind {
        string_field(&self.data, "kind").map(|s| Kind::parse(&s)).unwrap_or(Kind::Manual)
    }

    pub fn set_kind(&mut self, kind: Kind) {
        self.data.insert("kind".to_string(), Value::String(kind.as_str().to_string()));
    }

    pub fn workspace(&self) -> Option<String> {
        string_field(&self.data, "workspace")
    }

    pub fn set_workspace(&mut self, value: Option<String>) {
        set_string_field(&mut self.data, "workspace", value);
    }

    pub fn scheme(&self) -> Option<String> {
        string_field(&self.data, "scheme")
    }

    pub fn set_scheme(&mut self, value: Option<String>) {
        set_string_field(&mut self.data, "scheme", value);
    }

    pub fn build_root(&self) -> Option<String> {
        string_field(&self.data, "build_root")
    }

    pub fn set_build_root(&mut self, value: Option<String>) {
        set_string_field(&mut self.data, "build_root", value);
    }

    pub fn index_store_path(&self) -> Option<String> {
        string_field(&self.data, "indexStorePath")
    }

    pub fn set_index_store_path(&mut self, value: Option<String>) {
        set_string_field(&mut self.data, "indexStorePath", value);
    }

    pub fn skip_validate_bin(&self) -> bool {
        self.data.get("skip_validate_bin").and_then(|v| v.as_bool()).unwrap_or(false)
    }

    pub fn set_skip_validate_bin(&mut self, value: bool) {
        self.data.insert("skip_validate_bin".to_string(), Value::Bool(value));
    }

    /// Serialize to `self.path` with tab indentation, matching the teacher's human-readable save.
    pub fn save(&mut self) -> Result<(), Error> {
        self.ensure_fixed_fields();
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"\t");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        serde::Serialize::serialize(&self.data, &mut ser)
            .map_err(|e| Error::ParseConfig(self.path.display().to_string(), e))?;
        system::write_file(&self.path, buf)
    }
}

static SHARED: OnceLock<Mutex<ServerConfig>> = OnceLock::new();

/// Process-wide singleton, lazily initialized from `buildServer.json` in the current directory.
pub fn shared() -> Result<&'static Mutex<ServerConfig>, Error> {
    if let Some(lock) = SHARED.get() {
        return Ok(lock);
    }
    let config = ServerConfig::from_path(ServerConfig::DEFAULT_FILE_NAME)?;
    Ok(SHARED.get_or_init(|| Mutex::new(config)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_manual_kind() {
        let config = ServerConfig { path: PathBuf::new(), data: Map::new() };
        assert_eq!(config.kind(), Kind::Manual);
    }

    #[test]
    fn setter_deletes_key_on_none() {
        let mut config = ServerConfig { path: PathBuf::new(), data: Map::new() };
        config.set_workspace(Some("/a.xcworkspace".to_string()));
        assert_eq!(config.workspace().as_deref(), Some("/a.xcworkspace"));
        config.set_workspace(None);
        assert_eq!(config.workspace(), None);
    }

    #[test]
    fn ensure_fixed_fields_always_present() {
        let mut config = ServerConfig { path: PathBuf::new(), data: Map::new() };
        config.ensure_fixed_fields();
        assert_eq!(config.data.get("bspVersion").and_then(|v| v.as_str()), Some(BSP_VERSION));
    }
}
