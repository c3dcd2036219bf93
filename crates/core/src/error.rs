//! Error types for the launcher core
//!
//! Only conditions that end a run are modelled here. Transient OS failures in
//! the handle introspector and window locator degrade to "nothing found" and
//! never surface as errors.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LauncherError {
    /// Game executable could not be found directly or in any install location
    #[error("game executable not found: {0}")]
    ExecutableNotFound(String),

    /// Spawning a client process failed
    #[error("failed to spawn {exe:?}: {source}")]
    Spawn {
        exe: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Reading or writing a launcher file failed
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config serialization failed
    #[error("config serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    /// No user data directory could be determined for this platform
    #[error("failed to determine user data directory")]
    NoDataDirectory,
}

pub type Result<T> = std::result::Result<T, LauncherError>;
