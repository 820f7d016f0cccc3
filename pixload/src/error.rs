//! Failure classification for loads

use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// What a cache is told about a load that did not produce a bitmap.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    FileNotFound,
    Unknown,
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// The request was cancelled while it was executing. Never reported.
    #[error("load cancelled")]
    Cancelled,

    #[error("cannot open {}: {source}", path.display())]
    FileNotFound {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("no decoder accepts this image")]
    UnsupportedFormat,

    #[error("{format} decode failed: {reason:#}")]
    Decode {
        format: &'static str,
        reason: anyhow::Error,
    },

    #[error("download failed: {0:#}")]
    Download(anyhow::Error),

    #[error("empty image buffer")]
    EmptyBuffer,

    #[error("loader panicked: {0}")]
    Panicked(String),
}

impl LoadError {
    /// `None` for cancellation, which is not a failure.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            LoadError::Cancelled => None,
            LoadError::FileNotFound { .. } => Some(FailureKind::FileNotFound),
            _ => Some(FailureKind::Unknown),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, LoadError::Cancelled)
    }
}

#[test]
fn cancellation_is_not_a_failure() {
    assert_eq!(LoadError::Cancelled.failure_kind(), None);
    assert!(LoadError::Cancelled.is_cancelled());

    let missing = LoadError::FileNotFound {
        path: PathBuf::from("/nope.png"),
        source: io::Error::from(io::ErrorKind::NotFound),
    };
    assert_eq!(missing.failure_kind(), Some(FailureKind::FileNotFound));
    assert_eq!(LoadError::EmptyBuffer.failure_kind(), Some(FailureKind::Unknown));
    assert_eq!(
        LoadError::Panicked("boom".into()).failure_kind(),
        Some(FailureKind::Unknown)
    );
}
