// ABOUTME: IndexEntry type and its one-line text codec for the log-index side file.
// ABOUTME: Lines are "<offset>\n" for overall output or "<offset> <step id>\n" for a step.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::StepId;

/// Errors raised when an index line cannot be decoded.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EntryParseError {
    #[error("invalid offset {0:?}")]
    InvalidOffset(String),
}

/// A recorded attribution change: bytes from `offset` onward belong to `step_id`
/// (or to the overall build output when `step_id` is None) until the next entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub offset: u64,
    pub step_id: Option<StepId>,
}

impl IndexEntry {
    pub fn new(offset: u64, step_id: Option<StepId>) -> Self {
        Self { offset, step_id }
    }

    /// Encode as a full index line including the trailing newline.
    pub fn to_line(&self) -> String {
        match &self.step_id {
            Some(id) => format!("{} {}\n", self.offset, id),
            None => format!("{}\n", self.offset),
        }
    }

    /// Decode one index line with its line terminator already removed.
    /// Everything after the first space is the step id; an empty id means overall.
    pub fn parse_line(line: &str) -> Result<Self, EntryParseError> {
        let (offset, id) = match line.split_once(' ') {
            Some((offset, id)) => (offset, Some(id)),
            None => (line, None),
        };
        let offset = offset
            .parse::<u64>()
            .map_err(|_| EntryParseError::InvalidOffset(offset.to_string()))?;
        let step_id = id.filter(|id| !id.is_empty()).map(StepId::from_index);
        Ok(Self { offset, step_id })
    }
}
