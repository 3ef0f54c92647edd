//! Startup preflight (`SPEC_FULL.md` B.5 item 2): before wiring any
//! component, confirm the native terminal transport the bridge will
//! eventually connect through is actually present, so a missing artifact
//! fails in the first second of startup with a remediation hint instead of
//! surfacing three layers deep as an opaque `BridgeError::Unavailable` the
//! first time a command is dispatched.

use std::path::{Path, PathBuf};

use crate::error::AgentError;

/// Default filename of the native terminal artifact the real
/// `TerminalConnector` loads at connect time (`.dll`: the vendor terminal
/// this bridges to, like the teacher's `profitdll` crate's `ProfitDLL.dll`,
/// is Windows-only). Overridable via `AGENT_TERMINAL_LIB_NAME` so a
/// differently-named vendor artifact doesn't need a code change.
const DEFAULT_TERMINAL_LIBRARY_FILENAME: &str = "TerminalBridge.dll";

pub fn check_terminal_library(search_dirs: &[PathBuf]) -> Result<PathBuf, AgentError> {
    let filename = std::env::var("AGENT_TERMINAL_LIB_NAME")
        .unwrap_or_else(|_| DEFAULT_TERMINAL_LIBRARY_FILENAME.to_string());

    for dir in search_dirs {
        let candidate = dir.join(&filename);
        if candidate.is_file() {
            return Ok(candidate);
        }
    }

    Err(AgentError::Preflight(format!(
        "{filename} not found in {}; install the terminal artifact \
         (see the bridge vendor's install instructions) or set AGENT_TERMINAL_LIB_DIR \
         to its containing directory",
        search_dirs
            .iter()
            .map(|d| d.display().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    )))
}

/// Default search path: `AGENT_TERMINAL_LIB_DIR` if set, then the data
/// directory, then the current working directory.
pub fn default_search_dirs(data_dir: &Path) -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Ok(override_dir) = std::env::var("AGENT_TERMINAL_LIB_DIR") {
        dirs.push(PathBuf::from(override_dir));
    }
    dirs.push(data_dir.to_path_buf());
    if let Ok(cwd) = std::env::current_dir() {
        dirs.push(cwd);
    }
    dirs
}
