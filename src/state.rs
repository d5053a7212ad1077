//! The shared process state guarded by the single mutex described in the concurrency model
//! (§5): the main thread and the watcher thread both lock this before touching the config, the
//! database, the subscription set, or standard output.

use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use filetime::FileTime;

use crate::config::ServerConfig;
use crate::database::CompileDatabase;
use crate::system::Error;

pub struct SharedState {
    pub root_uri: String,
    pub cache_dir: PathBuf,
    pub config: ServerConfig,
    pub config_path: PathBuf,
    pub database_path: PathBuf,
    pub database: CompileDatabase,
    pub observed_mtimes: HashMap<PathBuf, FileTime>,
    pub locking_output: bool,
    pub observed_uris: HashSet<String>,
    pub alive: bool,
}

pub type AppState = Arc<Mutex<SharedState>>;

impl SharedState {
    pub fn new(
        root_uri: String,
        cache_dir: PathBuf,
        config: ServerConfig,
        config_path: PathBuf,
        database_path: PathBuf,
    ) -> Self {
        let database = if database_path.exists() {
            CompileDatabase::load(&database_path).unwrap_or_default()
        } else {
            CompileDatabase::new()
        };
        Self {
            root_uri,
            cache_dir,
            config,
            config_path,
            database_path,
            database,
            observed_mtimes: HashMap::new(),
            locking_output: false,
            observed_uris: HashSet::new(),
            alive: true,
        }
    }
}

/// Write one `Content-Length`-framed JSON-RPC message to stdout. Callers must hold the shared
/// state lock — the single process-wide mutex also serializes stdout writes (§5).
pub fn write_frame(_state: &mut SharedState, body: &serde_json::Value) -> Result<(), Error> {
    let text = serde_json::to_string(body).map_err(|e| Error::ParseConfig("<frame>".to_string(), e))?;
    let mut stdout = std::io::stdout();
    write!(stdout, "Content-Length: {}\r\n\r\n{}", text.len(), text)
        .map_err(|e| Error::WriteFile("<stdout>".to_string(), e))?;
    stdout.flush().map_err(|e| Error::WriteFile("<stdout>".to_string(), e))
}
