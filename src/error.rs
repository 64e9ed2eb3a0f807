use std::path::PathBuf;

use thiserror::Error;

use crate::types::{Id, Version};

pub type StoreResult<T> = Result<T, PatchLogError>;

/// Errors raised by the patch log store and the local server.
#[derive(Debug, Error)]
pub enum PatchLogError {
    #[error("Patch log already exists: {0}")]
    AlreadyExists(String),

    #[error("Patch log not found: {0}")]
    NotFound(String),

    #[error("Version {version} not found in {log}")]
    VersionNotFound { log: String, version: Version },

    #[error("Corrupted patch log at {path:?}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Invalid log name {0:?}")]
    InvalidName(String),

    #[error("Payload of {size} bytes exceeds the {max} byte segment limit")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Patch log {0} is busy")]
    Busy(Id),

    #[error("{0} has been released")]
    Released(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Metadata codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl PatchLogError {
    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        PatchLogError::Corrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            PatchLogError::NotFound(_) | PatchLogError::VersionNotFound { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// The affected log is unusable until repaired. Other logs are unaffected.
    Fatal,
    /// The caller may retry or correct the request.
    Recoverable,
    /// Only worth logging.
    Ignorable,
}

pub trait ErrorHandler {
    fn severity(&self) -> ErrorSeverity;
    fn context(&self) -> String;
}

impl ErrorHandler for PatchLogError {
    fn severity(&self) -> ErrorSeverity {
        match self {
            PatchLogError::AlreadyExists(_) => ErrorSeverity::Recoverable,
            PatchLogError::NotFound(_) => ErrorSeverity::Recoverable,
            PatchLogError::VersionNotFound { .. } => ErrorSeverity::Recoverable,
            PatchLogError::Corrupt { .. } => ErrorSeverity::Fatal,
            PatchLogError::InvalidConfiguration(_) => ErrorSeverity::Fatal,
            PatchLogError::InvalidName(_) => ErrorSeverity::Recoverable,
            PatchLogError::PayloadTooLarge { .. } => ErrorSeverity::Recoverable,
            PatchLogError::Busy(_) => ErrorSeverity::Recoverable,
            PatchLogError::Released(_) => ErrorSeverity::Ignorable,
            PatchLogError::Io(_) => ErrorSeverity::Fatal,
            PatchLogError::Codec(_) => ErrorSeverity::Fatal,
        }
    }

    fn context(&self) -> String {
        match self {
            PatchLogError::AlreadyExists(name) => format!("create of existing log {}", name),
            PatchLogError::NotFound(what) => format!("lookup of missing log {}", what),
            PatchLogError::VersionNotFound { log, version } => {
                format!("read of missing version {} in {}", version, log)
            }
            PatchLogError::Corrupt { path, .. } => format!("corruption under {:?}", path),
            PatchLogError::InvalidConfiguration(msg) => format!("configuration: {}", msg),
            PatchLogError::InvalidName(name) => format!("bad log name {:?}", name),
            PatchLogError::PayloadTooLarge { size, .. } => {
                format!("append of {} byte payload", size)
            }
            PatchLogError::Busy(id) => format!("log {} busy", id),
            PatchLogError::Released(what) => format!("{} released", what),
            PatchLogError::Io(e) => format!("IO: {}", e),
            PatchLogError::Codec(e) => format!("codec: {}", e),
        }
    }
}
