// ABOUTME: Identifiers and file layout for a build's step-attributed console log.
// ABOUTME: Defines StepId validation and the LogPaths pair (log file plus its -index side file).

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised when constructing a StepId.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StepIdError {
    #[error("step id must not be empty")]
    Empty,

    #[error("step id must not contain line breaks: {0:?}")]
    LineBreak(String),
}

/// Identifier of one logical step within a build.
///
/// Step ids are persisted after the first space of an index line, so they may
/// contain spaces but never line breaks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StepId(String);

impl StepId {
    /// Validate and wrap a step id.
    pub fn new(id: impl Into<String>) -> Result<Self, StepIdError> {
        let id = id.into();
        if id.is_empty() {
            return Err(StepIdError::Empty);
        }
        if id.contains(['\n', '\r']) {
            return Err(StepIdError::LineBreak(id));
        }
        Ok(Self(id))
    }

    /// Wrap an id read back from an index line, which is already free of line breaks.
    pub(crate) fn from_index(id: &str) -> Self {
        Self(id.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for StepId {
    type Error = StepIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<StepId> for String {
    fn from(id: StepId) -> Self {
        id.0
    }
}

/// The two files backing one build's output: the raw log and its transition index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogPaths {
    pub log: PathBuf,
    pub index: PathBuf,
}

impl LogPaths {
    /// Derive the index path by appending `-index` to the log file name.
    pub fn for_log(log: &Path) -> Self {
        let mut index = OsString::from(log.as_os_str());
        index.push("-index");
        Self {
            log: log.to_path_buf(),
            index: PathBuf::from(index),
        }
    }
}
