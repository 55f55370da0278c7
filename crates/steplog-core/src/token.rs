// ABOUTME: Annotation tokens produced by the whole-log reader and their HTML rendering.
// ABOUTME: Step segments render wrapped in <span class="step-node-ID"> ... </span>.

use std::io::{self, Write};

use serde::{Deserialize, Serialize};

use crate::model::StepId;

/// One element of an annotated whole-log read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Token {
    /// Raw log bytes, copied unchanged.
    Bytes(Vec<u8>),
    /// Inserted immediately before the first byte of a step segment.
    StartStep(StepId),
    /// Inserted immediately after the last byte of a step segment.
    EndStep,
}

impl Token {
    /// Write this token to a sink, expanding markers into their HTML form.
    pub fn render<W: Write + ?Sized>(&self, sink: &mut W) -> io::Result<()> {
        match self {
            Token::Bytes(bytes) => sink.write_all(bytes),
            Token::StartStep(id) => {
                write!(sink, "<span class=\"step-node-{}\">", escape_attr(id.as_str()))
            }
            Token::EndStep => sink.write_all(b"</span>"),
        }
    }

    /// Number of raw log bytes this token carries; markers carry none.
    pub fn byte_len(&self) -> u64 {
        match self {
            Token::Bytes(bytes) => bytes.len() as u64,
            _ => 0,
        }
    }
}

fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

/// Render a token sequence into a fresh buffer.
pub fn render_all(tokens: &[Token]) -> Vec<u8> {
    let mut out = Vec::new();
    for token in tokens {
        // Writing into a Vec cannot fail.
        let _ = token.render(&mut out);
    }
    out
}
