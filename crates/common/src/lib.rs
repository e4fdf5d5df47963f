#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use std::{io, path::PathBuf, time::Duration};
use thiserror::Error;

/// Canonical error type shared across the apply subsystems.
#[derive(Error, Debug)]
pub enum DbError {
    /// A replicated record failed to decode. Every replica sees identical
    /// bytes, so a decode failure implies a code-version mismatch rather than
    /// corruption; the replica must stop before it diverges from its peers.
    #[error("decode: {0}")]
    Decode(String),
    /// Forwarded from the embedded SQL engine.
    #[error("engine: {0}")]
    Engine(String),
    /// A step of the database hot-swap failed. The handle is left in an
    /// indeterminate closed state and the caller must shut the replica down.
    #[error("swap: {0}")]
    Swap(String),
    /// Chunk reassembly failure: bad sequence number, missing session, or a
    /// temp-file write error.
    #[error("chunk: {0}")]
    Chunk(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl DbError {
    /// True when the caller cannot continue applying log entries.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DbError::Decode(_))
    }
}

/// Result alias that carries a `DbError`.
pub type DbResult<T> = Result<T, DbError>;

/// Runtime configuration for the command processor.
///
/// # Example
/// ```
/// use common::Config;
/// use std::time::Duration;
///
/// let config = Config::builder()
///     .fk_enabled(true)
///     .reassembly_ttl(Duration::from_secs(60))
///     .build();
/// ```
#[derive(Clone, Debug, Serialize, Deserialize, bon::Builder)]
pub struct Config {
    /// Enforce foreign-key constraints on every database the processor opens.
    #[builder(default = false)]
    pub fk_enabled: bool,
    /// Open databases in write-ahead-log journal mode.
    #[builder(default = true)]
    pub wal_enabled: bool,
    /// Directory for chunk-reassembly temp files. `None` uses the host's
    /// temp directory.
    pub reassembly_dir: Option<PathBuf>,
    /// Reassembly sessions idle longer than this are reaped.
    #[builder(default = Duration::from_secs(300))]
    pub reassembly_ttl: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fk_enabled: false,
            wal_enabled: true,
            reassembly_dir: None,
            reassembly_ttl: Duration::from_secs(300),
        }
    }
}
