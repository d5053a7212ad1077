//! Component F: the background watcher. Polls once a second for configuration, database and log
//! changes, reparses, and pushes `build/sourceKitOptionsChanged` notifications to subscribed
//! editors. Runs on its own thread — the only other thread besides `main` (§5).

use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use std::time::Duration;

use filetime::FileTime;
use serde_json::json;

use crate::config::{Kind, ServerConfig};
use crate::flags;
use crate::log_parser;
use crate::paths;
use crate::state::{write_frame, AppState};
use crate::system::{self, fs, Error};

const POLL_INTERVAL: Duration = Duration::from_secs(1);
const STALE_LOCK_AGE: Duration = Duration::from_secs(180);

pub fn spawn(state: AppState) -> JoinHandle<()> {
    std::thread::spawn(move || {
        loop {
            {
                let alive = state.lock().map(|s| s.alive).unwrap_or(false);
                if !alive {
                    break;
                }
            }
            if let Err(e) = tick(&state) {
                e.log();
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    })
}

fn mtime_advanced(observed: &mut std::collections::HashMap<PathBuf, FileTime>, path: &Path) -> bool {
    let Some(current) = fs::modified_time(path) else {
        return false;
    };
    match observed.get(path) {
        Some(previous) if *previous >= current => false,
        _ => {
            observed.insert(path.to_path_buf(), current);
            true
        }
    }
}

fn tick(state: &AppState) -> Result<(), Error> {
    let mut guard = state.lock().map_err(|_| Error::OutputLocked("state poisoned".to_string()))?;
    if !guard.alive {
        return Ok(());
    }

    let config_path = guard.config_path.clone();
    if mtime_advanced(&mut guard.observed_mtimes, &config_path) {
        system::verboseln!("Reload", "{}", config_path.display());
        let reloaded = ServerConfig::from_path(&config_path)?;
        let new_database_path = paths::compile_database_path(&reloaded, &guard.cache_dir);
        guard.config = reloaded;
        if new_database_path != guard.database_path {
            guard.database_path = new_database_path;
            guard.database = crate::database::CompileDatabase::new();
            guard.observed_mtimes.remove(&guard.database_path.clone());
        }
    }

    let database_path = guard.database_path.clone();
    if mtime_advanced(&mut guard.observed_mtimes, &database_path) {
        if let Ok(reloaded) = crate::database::CompileDatabase::load(&database_path) {
            guard.database = reloaded;
            notify_subscribers(&mut guard)?;
        }
    }

    if guard.config.kind() == Kind::Xcode {
        reparse_if_needed(&mut guard)?;
    }

    Ok(())
}

fn reparse_if_needed(state: &mut crate::state::SharedState) -> Result<(), Error> {
    let lock_path = lock_path_for(&state.database_path);
    if lock_path.exists() {
        let age = fs::modified_time(&lock_path).map(|t| {
            let now = FileTime::now();
            Duration::from_secs((now.unix_seconds() - t.unix_seconds()).max(0) as u64)
        });
        if age.map(|a| a < STALE_LOCK_AGE).unwrap_or(true) {
            state.locking_output = true;
            return Ok(());
        }
        fs::remove_file(&lock_path)?;
        state.locking_output = false;
    }

    let Some(build_root) = state.config.build_root() else {
        return Ok(());
    };
    let scheme = state.config.scheme();
    let Some(newest_log) = find_newest_log(Path::new(&build_root), scheme.as_deref())? else {
        return Ok(());
    };

    let manifest_path = Path::new(&build_root).join("Logs/Build/LogStoreManifest.plist");
    let log_advanced = mtime_advanced(&mut state.observed_mtimes, &newest_log);
    let manifest_advanced = mtime_advanced(&mut state.observed_mtimes, &manifest_path);
    if !log_advanced && !manifest_advanced {
        return Ok(());
    }

    match fs::create_new(&lock_path) {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            state.locking_output = true;
            return Ok(());
        }
        Err(e) => return Err(Error::WriteFile(lock_path.display().to_string(), e)),
    }

    let result = log_parser::parse_log(&newest_log, state.config.skip_validate_bin());
    let outcome = match result {
        Ok(parsed) => {
            if !parsed.index_store_paths.is_empty() {
                system::verboseln!(
                    "IndexStore",
                    "log declares {} store path(s): {}",
                    parsed.index_store_paths.len(),
                    parsed.index_store_paths.iter().cloned().collect::<Vec<_>>().join(", ")
                );
            }
            state.database.merge(parsed.records).and_then(|_| state.database.save(&state.database_path))
        }
        Err(e) => Err(e),
    };
    fs::remove_file(&lock_path)?;
    outcome?;
    state.locking_output = false;

    notify_subscribers(state)?;
    Ok(())
}

fn lock_path_for(database_path: &Path) -> PathBuf {
    let mut name = database_path.as_os_str().to_os_string();
    name.push(".lock");
    PathBuf::from(name)
}

/// Notify every subscribed URI with freshly resolved flags (§4.F).
fn notify_subscribers(state: &mut crate::state::SharedState) -> Result<(), Error> {
    let uris: Vec<String> = state.observed_uris.iter().cloned().collect();
    for uri in uris {
        let Ok(path) = crate::bsp::uri_to_path(&uri) else {
            continue;
        };
        match flags::resolve_flags(&path, &mut state.database) {
            Ok(Some(options)) => {
                let working_directory = working_directory_from_options(&options);
                let notification = json!({
                    "jsonrpc": "2.0",
                    "method": "build/sourceKitOptionsChanged",
                    "params": {
                        "uri": uri,
                        "updatedOptions": {
                            "options": options,
                            "workingDirectory": working_directory,
                        }
                    }
                });
                write_frame(state, &notification)?;
            }
            Ok(None) => {}
            Err(e) => e.log(),
        }
    }
    Ok(())
}

fn working_directory_from_options(options: &[String]) -> String {
    options
        .iter()
        .position(|a| a == "-working-directory")
        .and_then(|i| options.get(i + 1))
        .cloned()
        .unwrap_or_else(|| std::env::current_dir().map(|p| p.display().to_string()).unwrap_or_default())
}

/// Locate the newest `.xcactivitylog` for `scheme` (or the newest overall if `scheme` is `None`)
/// via `LogStoreManifest.plist`.
pub fn find_newest_log(build_root: &Path, scheme: Option<&str>) -> Result<Option<PathBuf>, Error> {
    let manifest_path = build_root.join("Logs/Build/LogStoreManifest.plist");
    if !manifest_path.exists() {
        return Ok(None);
    }
    let value =
        plist::Value::from_file(&manifest_path).map_err(|e| Error::ParsePlist(manifest_path.display().to_string(), e))?;
    let Some(logs) = value.as_dictionary().and_then(|d| d.get("logs")).and_then(|v| v.as_dictionary()) else {
        return Ok(None);
    };

    let mut best: Option<(f64, String)> = None;
    for entry in logs.values() {
        let Some(dict) = entry.as_dictionary() else { continue };
        let Some(file_name) = dict.get("fileName").and_then(|v| v.as_string()) else {
            continue;
        };
        if let Some(wanted) = scheme {
            let scheme_name = dict.get("schemeIdentifier-schemeName").and_then(|v| v.as_string());
            if scheme_name != Some(wanted) {
                continue;
            }
        }
        let time = dict.get("timeStoppedRecording").and_then(|v| v.as_real()).unwrap_or(0.0);
        if best.as_ref().map(|(t, _)| time > *t).unwrap_or(true) {
            best = Some((time, file_name.to_string()));
        }
    }

    Ok(best.map(|(_, name)| build_root.join("Logs/Build").join(name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_manifest(build_root: &Path) {
        let logs_dir = build_root.join("Logs/Build");
        std::fs::create_dir_all(&logs_dir).unwrap();
        let manifest = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>logs</key>
    <dict>
        <key>11111111-1111-1111-1111-111111111111</key>
        <dict>
            <key>fileName</key>
            <string>old.xcactivitylog</string>
            <key>timeStoppedRecording</key>
            <real>100.0</real>
            <key>schemeIdentifier-schemeName</key>
            <string>App</string>
        </dict>
        <key>22222222-2222-2222-2222-222222222222</key>
        <dict>
            <key>fileName</key>
            <string>new.xcactivitylog</string>
            <key>timeStoppedRecording</key>
            <real>200.0</real>
            <key>schemeIdentifier-schemeName</key>
            <string>App</string>
        </dict>
        <key>33333333-3333-3333-3333-333333333333</key>
        <dict>
            <key>fileName</key>
            <string>other-scheme.xcactivitylog</string>
            <key>timeStoppedRecording</key>
            <real>300.0</real>
            <key>schemeIdentifier-schemeName</key>
            <string>OtherScheme</string>
        </dict>
    </dict>
</dict>
</plist>
"#;
        std::fs::write(logs_dir.join("LogStoreManifest.plist"), manifest).unwrap();
    }

    #[test]
    fn picks_newest_log_for_scheme_by_timestamp() {
        let build_root = std::env::temp_dir().join(format!("xcode-bsp-manifest-test-{}", std::process::id()));
        write_manifest(&build_root);

        let found = find_newest_log(&build_root, Some("App")).unwrap().unwrap();
        assert_eq!(found.file_name().unwrap().to_str().unwrap(), "new.xcactivitylog");

        let _ = std::fs::remove_dir_all(&build_root);
    }

    #[test]
    fn no_manifest_returns_none() {
        let build_root = std::env::temp_dir().join(format!("xcode-bsp-nomanifest-test-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&build_root);
        assert!(find_newest_log(&build_root, None).unwrap().is_none());
    }

    #[test]
    fn mtime_advanced_tracks_first_observation_and_changes() {
        let path = std::env::temp_dir().join(format!("xcode-bsp-mtime-test-{}", std::process::id()));
        std::fs::write(&path, "a").unwrap();
        let mut observed = std::collections::HashMap::new();

        assert!(mtime_advanced(&mut observed, &path));
        assert!(!mtime_advanced(&mut observed, &path));

        let _ = std::fs::remove_file(&path);
    }
}
