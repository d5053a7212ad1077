//! Error types

use crate::system;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // activity log decoding
    #[error("`{0}` is not a valid xcactivitylog (missing SLF0 header)")]
    InvalidLogFormat(String),
    #[error("`{0}` ended mid-token while decoding the activity log")]
    TruncatedStream(String),

    // fs
    #[error("Cannot find `{0}`")]
    NotFound(String),
    #[error("`{0}` already exists")]
    AlreadyExists(String),
    #[error("Invalid path `{0}`: {1}")]
    InvalidPath(String, std::io::Error),
    #[error("Cannot read file `{0}`: {1}")]
    ReadFile(String, std::io::Error),
    #[error("Cannot write file `{0}`: {1}")]
    WriteFile(String, std::io::Error),
    #[error("Cannot create directory `{0}`: {1}")]
    CreateDirectory(String, std::io::Error),
    #[error("Cannot remove file `{0}`: {1}")]
    RemoveFile(String, std::io::Error),

    // config / database (de)serialization
    #[error("Cannot parse config file `{0}`: {1}")]
    ParseConfig(String, serde_json::Error),
    #[error("Cannot parse compile database `{0}`: {1}")]
    ParseDatabase(String, serde_json::Error),
    #[error("Cannot parse plist `{0}`: {1}")]
    ParsePlist(String, plist::Error),

    // process
    #[error("Cannot find required tool `{0}`. {1}")]
    MissingTool(String, String),
    #[error("error spawning `{0}`: {1}")]
    SpawnChild(String, std::io::Error),
    #[error("error executing `{0}`: {1}")]
    WaitForChild(String, std::io::Error),

    // bsp / wire protocol
    #[error("malformed BSP frame: {0}")]
    MalformedFrame(String),
    #[error("BSP frame of {0} bytes exceeds the {1} byte limit")]
    FrameTooLarge(usize, usize),
    #[error("unsupported uri scheme in `{0}`, expected file:")]
    BadUri(String),

    // watcher
    #[error("compile database output `{0}` is locked by another process")]
    OutputLocked(String),
}

impl Error {
    pub fn log(&self) {
        system::errorln!("Error", "{}", self);
    }
}
