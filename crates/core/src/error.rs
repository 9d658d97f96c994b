use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no registered device contains {}", path.display())]
    NoDeviceFound { path: PathBuf },

    #[error("a scan is already running")]
    ScanAlreadyRunning,

    #[error("scan target {} is unreadable: {source}", path.display())]
    TargetUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("unknown device: {0}")]
    UnknownDevice(String),

    #[error("catalog error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("{0} lock poisoned")]
    LockPoisoned(&'static str),

    #[error("scan worker panicked")]
    WorkerPanicked,
}

pub type Result<T> = std::result::Result<T, EngineError>;
