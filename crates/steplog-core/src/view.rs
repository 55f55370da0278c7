// ABOUTME: Result objects handed to rendering layers by the two log readers.
// ABOUTME: Both carry an inline error instead of failing, so one bad log never blocks a page.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::model::StepId;
use crate::token::{Token, render_all};

/// The reconstructed output of a single step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepLog {
    pub step_id: StepId,
    pub content: Vec<u8>,
    /// Set when the log could not be read; `content` is then empty.
    pub error: Option<String>,
}

impl StepLog {
    pub fn new(step_id: StepId, content: Vec<u8>) -> Self {
        Self {
            step_id,
            content,
            error: None,
        }
    }

    /// A placeholder result that reports a read failure inline.
    pub fn degraded(step_id: StepId, error: impl Into<String>) -> Self {
        Self {
            step_id,
            content: Vec::new(),
            error: Some(error.into()),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.error.is_some()
    }

    /// Content decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.content)
    }
}

/// One poll of the annotated whole log: tokens for `[start, next_offset)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotatedChunk {
    pub start: u64,
    pub next_offset: u64,
    pub tokens: Vec<Token>,
    /// True once the log has stopped growing and everything up to `next_offset` was delivered.
    pub complete: bool,
    pub error: Option<String>,
}

impl AnnotatedChunk {
    /// A chunk that delivered nothing because the log could not be read.
    pub fn failed(start: u64, error: impl Into<String>) -> Self {
        Self {
            start,
            next_offset: start,
            tokens: Vec::new(),
            complete: false,
            error: Some(error.into()),
        }
    }

    /// Whether this chunk carries no log bytes.
    pub fn is_empty(&self) -> bool {
        self.next_offset == self.start
    }

    /// Render tokens to HTML-annotated bytes, with any error appended inline.
    pub fn render(&self) -> Vec<u8> {
        let mut out = render_all(&self.tokens);
        if let Some(error) = &self.error {
            out.extend_from_slice(format!("[log unavailable: {}]\n", error).as_bytes());
        }
        out
    }
}
