use std::path::PathBuf;

use thiserror::Error;

/// Fatal error categories surfaced to the operator.
///
/// Per-probe failures are deliberately not here: a single failed probe is
/// logged and the scan continues (see [`crate::plugins::ProbeError`]).
#[derive(Debug, Error)]
pub enum ScanError {
    /// Malformed flags, unreadable list files, bad templates.
    #[error("invalid input: {0}")]
    Input(String),

    /// Another process owns the named scan. The lock is advisory: it does
    /// not detect a crashed holder, so the operator must remove a stale
    /// lock file by hand.
    #[error(
        "scan is locked by pid {pid} ({path:?}); if that process is no longer \
         running, remove the lock file manually"
    )]
    LockHeld { pid: String, path: PathBuf },

    /// The persisted cache document does not parse.
    #[error("cache file {path:?} is corrupt: {source}")]
    CacheCorruption {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A plugin could not provision its probe resource. Fatal for the run.
    #[error("plugin {plugin}: setup failed: {source}")]
    PluginSetup {
        plugin: String,
        #[source]
        source: anyhow::Error,
    },

    /// Context cancellation from a signal or a consumer that stopped
    /// iterating. Treated as successful early exit by the run loop.
    #[error("cancelled")]
    Cancelled,
}

impl ScanError {
    pub fn input(msg: impl Into<String>) -> Self {
        ScanError::Input(msg.into())
    }
}
