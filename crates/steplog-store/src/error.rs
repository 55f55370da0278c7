// ABOUTME: Error type shared by the steplog storage layer.
// ABOUTME: Write paths propagate these; read paths turn them into degraded results.

use std::io;
use std::path::PathBuf;

use steplog_core::StepIdError;
use thiserror::Error;

use crate::append_log::MAX_RANGE;

/// Errors that can occur in log storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("writer session for {} is closed", .path.display())]
    SessionClosed { path: PathBuf },

    #[error("cannot read {len} bytes at offset {start} in one call (limit {})", MAX_RANGE)]
    RangeTooLarge { start: u64, len: u64 },

    #[error("invalid byte range {start}..{end}")]
    InvalidRange { start: u64, end: u64 },

    #[error("index offset {offset} is past the end of the log ({len} bytes)")]
    OffsetPastEnd { offset: u64, len: u64 },

    #[error("invalid step id: {0}")]
    InvalidStepId(#[from] StepIdError),

    #[error("lock for {} poisoned by a panicked writer", .path.display())]
    Poisoned { path: PathBuf },
}

impl From<StoreError> for io::Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Io(e) => e,
            StoreError::SessionClosed { .. } => io::Error::new(io::ErrorKind::BrokenPipe, err),
            StoreError::RangeTooLarge { .. }
            | StoreError::InvalidRange { .. }
            | StoreError::InvalidStepId(_) => io::Error::new(io::ErrorKind::InvalidInput, err),
            StoreError::OffsetPastEnd { .. } => io::Error::new(io::ErrorKind::InvalidData, err),
            StoreError::Poisoned { .. } => io::Error::other(err),
        }
    }
}
