//! Subprocess utilities
//!
//! The core never shells out for gzip or header discovery (those moved in-process, see
//! [`crate::token`] and [`crate::flags`]); what remains are the optional collaborators named in
//! the external-interfaces: `xcode-select` and, from the `config` CLI's side, `xcodebuild`.

use std::ffi::OsStr;
use std::process::{Command, Output, Stdio};

use crate::system::Error;

pub struct ChildBuilder {
    arg0: String,
    command: Command,
}

impl ChildBuilder {
    pub fn new<S>(arg0: S) -> Self
    where
        S: AsRef<OsStr>,
    {
        Self {
            arg0: arg0.as_ref().to_string_lossy().to_string(),
            command: Command::new(arg0),
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.command.args(args);
        self
    }

    /// Run the command to completion, capturing stdout/stderr, discarding stdin.
    pub fn output(mut self) -> Result<Output, Error> {
        self.command.stdin(Stdio::null());
        self.command
            .output()
            .map_err(|e| Error::SpawnChild(self.arg0.clone(), e))
    }
}

/// Locate a tool on PATH, mapping a miss to a descriptive error.
pub fn check_tool(tool: &str, package: &str) -> Result<std::path::PathBuf, Error> {
    which::which(tool).map_err(|_| {
        Error::MissingTool(tool.to_string(), format!("Please ensure `{package}` is installed."))
    })
}
