//! Component G: the BSP dispatcher. A framed JSON-RPC request/response loop over stdio, with
//! method routing matching `server_api()`/`serve()` in `server.py`, generalized with a frame-size
//! cap and the watcher-driven `sourceKitOptionsChanged` notification path.

use std::io::{BufRead, Read};
use std::path::PathBuf;

use serde_json::{json, Value};

use crate::flags;
use crate::paths;
use crate::state::{write_frame, AppState, SharedState};
use crate::system::{self, Error};
use crate::watcher;

const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;
const UNHANDLED_METHOD_CODE: i64 = 123;

/// Convert a `file://` URI into a filesystem path, as `uri2filepath` does.
pub fn uri_to_path(uri: &str) -> Result<PathBuf, Error> {
    let rest = uri.strip_prefix("file://").ok_or_else(|| Error::BadUri(uri.to_string()))?;
    let decoded = percent_decode(rest);
    Ok(PathBuf::from(decoded))
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(byte) = u8::from_str_radix(&s[i + 1..i + 3], 16) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Read one `Content-Length: N\r\n\r\n<body>` frame from `reader`. Returns `Ok(None)` at a clean
/// EOF (the client closed its side).
pub fn read_frame<R: BufRead>(reader: &mut R) -> Result<Option<Value>, Error> {
    let mut header = String::new();
    let n = reader
        .read_line(&mut header)
        .map_err(|e| Error::ReadFile("<stdin>".to_string(), e))?;
    if n == 0 {
        return Ok(None);
    }
    let header = header.trim_end();
    let Some(len_str) = header.strip_prefix("Content-Length:") else {
        return Err(Error::MalformedFrame(header.to_string()));
    };
    let length: usize = len_str.trim().parse().map_err(|_| Error::MalformedFrame(header.to_string()))?;
    if length > MAX_FRAME_BYTES {
        return Err(Error::FrameTooLarge(length, MAX_FRAME_BYTES));
    }

    // blank line separating headers from the body
    let mut blank = String::new();
    reader
        .read_line(&mut blank)
        .map_err(|e| Error::ReadFile("<stdin>".to_string(), e))?;

    let mut body = vec![0u8; length];
    reader
        .read_exact(&mut body)
        .map_err(|e| Error::ReadFile("<stdin>".to_string(), e))?;
    let value: Value = serde_json::from_slice(&body).map_err(|e| Error::ParseConfig("<request>".to_string(), e))?;
    Ok(Some(value))
}

/// Run the BSP server loop over standard input/output until `build/exit` or EOF.
pub fn serve(state: AppState) -> Result<(), Error> {
    system::infoln!("Listening", "waiting for BSP requests on stdin");
    let stdin = std::io::stdin();
    let mut reader = stdin.lock();
    let mut watcher_handle = None;

    loop {
        let frame = match read_frame(&mut reader) {
            Ok(Some(v)) => v,
            Ok(None) => break,
            Err(Error::FrameTooLarge(got, max)) => {
                system::errorln!("Error", "frame of {got} bytes exceeds {max} byte cap, rejecting");
                continue;
            }
            Err(e) => {
                e.log();
                continue;
            }
        };

        let method = frame.get("method").and_then(|m| m.as_str()).unwrap_or("").to_string();
        let id = frame.get("id").cloned();

        let outcome = {
            let mut guard = state.lock().map_err(|_| Error::OutputLocked("state poisoned".to_string()))?;
            dispatch(&mut guard, &method, &frame)
        };

        match outcome.response {
            Some(body) => {
                let mut guard = state.lock().map_err(|_| Error::OutputLocked("state poisoned".to_string()))?;
                write_frame(&mut guard, &body)?;
            }
            None if id.is_some() => {
                let error_body = json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": { "code": UNHANDLED_METHOD_CODE, "message": format!("unhandled method {method}") }
                });
                let mut guard = state.lock().map_err(|_| Error::OutputLocked("state poisoned".to_string()))?;
                write_frame(&mut guard, &error_body)?;
            }
            None => {}
        }

        // The initial `sourceKitOptionsChanged` from `registerForChanges` is always emitted
        // strictly after the response to the same request (§5 ordering guarantee).
        if let Some(notification) = outcome.followup {
            let mut guard = state.lock().map_err(|_| Error::OutputLocked("state poisoned".to_string()))?;
            write_frame(&mut guard, &notification)?;
        }

        if method == "build/initialized" && watcher_handle.is_none() {
            watcher_handle = Some(start_watcher(state.clone()));
        }

        if method == "build/exit" {
            break;
        }
    }
    if let Some(handle) = watcher_handle {
        if let Ok(mut guard) = state.lock() {
            guard.alive = false;
        }
        let _ = handle.join();
    }
    Ok(())
}

struct DispatchOutcome {
    response: Option<Value>,
    followup: Option<Value>,
}

fn dispatch(state: &mut SharedState, method: &str, message: &Value) -> DispatchOutcome {
    let id = message.get("id").cloned();
    match method {
        "build/initialize" => DispatchOutcome { response: Some(build_initialize(state, message)), followup: None },
        "build/initialized" => DispatchOutcome { response: None, followup: None },
        "workspace/buildTargets" => DispatchOutcome {
            response: Some(json!({ "jsonrpc": "2.0", "id": id, "result": { "targets": [] } })),
            followup: None,
        },
        "buildTarget/sources" => DispatchOutcome {
            response: Some(json!({ "jsonrpc": "2.0", "id": id, "result": { "items": [] } })),
            followup: None,
        },
        "textDocument/registerForChanges" => {
            let (response, followup) = register_for_changes(state, message);
            DispatchOutcome { response: Some(response), followup }
        }
        "textDocument/sourceKitOptions" => {
            DispatchOutcome { response: Some(source_kit_options(state, message)), followup: None }
        }
        "build/shutdown" => {
            state.alive = false;
            DispatchOutcome {
                response: Some(json!({ "jsonrpc": "2.0", "id": id, "result": Value::Null })),
                followup: None,
            }
        }
        "build/exit" => DispatchOutcome { response: None, followup: None },
        _ => DispatchOutcome { response: None, followup: None },
    }
}

fn build_initialize(state: &mut SharedState, message: &Value) -> Value {
    let id = message.get("id").cloned();
    let root_uri = message
        .get("params")
        .and_then(|p| p.get("rootUri"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    state.root_uri = root_uri.clone();
    state.cache_dir = paths::cache_dir_for_root(&root_uri);
    if let Err(e) = system::fs::ensure_directory(&state.cache_dir) {
        e.log();
    }

    let new_database_path = paths::compile_database_path(&state.config, &state.cache_dir);
    if new_database_path != state.database_path {
        state.database_path = new_database_path;
        state.database = if state.database_path.exists() {
            crate::database::CompileDatabase::load(&state.database_path).unwrap_or_default()
        } else {
            crate::database::CompileDatabase::new()
        };
        state.observed_mtimes.remove(&state.database_path.clone());
    }

    let index_store_path = paths::resolve_index_store_path(&state.config, &state.cache_dir);
    let index_database_path = paths::index_database_path(&state.cache_dir, &index_store_path);

    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": {
            "displayName": "xcode build server",
            "version": crate::config::DEFAULT_VERSION,
            "bspVersion": crate::config::BSP_VERSION,
            "rootUri": root_uri,
            "capabilities": {
                "languageIds": ["c", "cpp", "objective-c", "objective-cpp", "swift"]
            },
            "data": {
                "indexDatabasePath": index_database_path.display().to_string(),
                "indexStorePath": index_store_path,
            }
        }
    })
}

fn register_for_changes(state: &mut SharedState, message: &Value) -> (Value, Option<Value>) {
    let id = message.get("id").cloned();
    let params = message.get("params");
    let uri = params.and_then(|p| p.get("uri")).and_then(|v| v.as_str()).unwrap_or("").to_string();
    let action = params.and_then(|p| p.get("action")).and_then(|v| v.as_str()).unwrap_or("");

    let response = json!({ "jsonrpc": "2.0", "id": id, "result": Value::Null });
    let mut followup = None;

    match action {
        "register" => {
            if let Ok(path) = uri_to_path(&uri) {
                if let Ok(Some(options)) = flags::resolve_flags(&path, &mut state.database) {
                    let working_directory = options
                        .iter()
                        .position(|a| a == "-working-directory")
                        .and_then(|i| options.get(i + 1))
                        .cloned()
                        .unwrap_or_else(|| std::env::current_dir().map(|p| p.display().to_string()).unwrap_or_default());
                    followup = Some(json!({
                        "jsonrpc": "2.0",
                        "method": "build/sourceKitOptionsChanged",
                        "params": {
                            "uri": uri,
                            "updatedOptions": {
                                "options": options,
                                "workingDirectory": working_directory,
                            }
                        }
                    }));
                    state.observed_uris.insert(uri);
                }
            }
        }
        "unregister" => {
            state.observed_uris.remove(&uri);
        }
        _ => {}
    }

    (response, followup)
}

fn source_kit_options(state: &mut SharedState, message: &Value) -> Value {
    let id = message.get("id").cloned();
    let uri = message
        .get("params")
        .and_then(|p| p.get("uri"))
        .and_then(|v| v.as_str())
        .unwrap_or("");

    let (options, working_directory) = match uri_to_path(uri).and_then(|path| flags::resolve_flags(&path, &mut state.database)) {
        Ok(Some(options)) => {
            let wd = options
                .iter()
                .position(|a| a == "-working-directory")
                .and_then(|i| options.get(i + 1))
                .cloned()
                .unwrap_or_else(|| std::env::current_dir().map(|p| p.display().to_string()).unwrap_or_default());
            (options, wd)
        }
        _ => (Vec::new(), std::env::current_dir().map(|p| p.display().to_string()).unwrap_or_default()),
    };

    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": {
            "options": options,
            "workingDirectory": working_directory,
        }
    })
}

/// Start the watcher thread after `build/initialized`.
pub fn start_watcher(state: AppState) -> std::thread::JoinHandle<()> {
    watcher::spawn(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn unknown_method_produces_jsonrpc_error() {
        let body = json!({"jsonrpc":"2.0","id":7,"method":"foo/bar"});
        assert!(dispatch_for_test(&body).is_none());
    }

    fn dispatch_for_test(message: &Value) -> Option<Value> {
        let mut state = SharedState::new(
            String::new(),
            std::env::temp_dir(),
            crate::config::ServerConfig::from_path(std::env::temp_dir().join("nope.json")).unwrap(),
            PathBuf::from("buildServer.json"),
            PathBuf::from(".compile_file"),
        );
        let method = message.get("method").and_then(|m| m.as_str()).unwrap_or("");
        dispatch(&mut state, method, message).response
    }

    #[test]
    fn reads_single_frame() {
        let body = r#"{"jsonrpc":"2.0","id":1,"method":"build/shutdown"}"#;
        let msg = format!("Content-Length: {}\r\n\r\n{}", body.len(), body);
        let mut cursor = Cursor::new(msg.into_bytes());
        let parsed = read_frame(&mut cursor).unwrap().unwrap();
        assert_eq!(parsed["method"], "build/shutdown");
    }

    #[test]
    fn rejects_oversized_frame() {
        let msg = format!("Content-Length: {}\r\n\r\n", MAX_FRAME_BYTES + 1);
        let mut cursor = Cursor::new(msg.into_bytes());
        let result = read_frame(&mut cursor);
        assert!(matches!(result, Err(Error::FrameTooLarge(_, _))));
    }

    #[test]
    fn uri_to_path_decodes_percent_escapes() {
        let path = uri_to_path("file:///Users/me/a%20b.swift").unwrap();
        assert_eq!(path, PathBuf::from("/Users/me/a b.swift"));
    }

    #[test]
    fn build_initialize_rebinds_database_path_to_real_cache_dir() {
        let mut state = SharedState::new(
            String::new(),
            std::env::temp_dir(),
            crate::config::ServerConfig::from_path(std::env::temp_dir().join("nope.json")).unwrap(),
            PathBuf::from("buildServer.json"),
            PathBuf::from(".xcode-bsp-cache/.compile_file"),
        );
        let provisional = state.database_path.clone();

        let message = json!({"jsonrpc":"2.0","id":1,"method":"build/initialize","params":{"rootUri":"file:///Users/me/project"}});
        let _ = build_initialize(&mut state, &message);

        assert_ne!(state.database_path, provisional);
        assert!(state.cache_dir.display().to_string().contains("xcode-build-server"));
    }
}
