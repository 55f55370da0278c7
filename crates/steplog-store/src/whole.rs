// ABOUTME: Streams the whole log merged with index transitions as annotation tokens.
// ABOUTME: Reads in chunks split at transition offsets and wraps every step segment in markers.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::iter::Peekable;

use steplog_core::{AnnotatedChunk, LogPaths, StepId, Token};

use crate::append_log::AppendLog;
use crate::error::StoreError;
use crate::index::{IndexEntries, StepIndex};

/// Annotated reader over one build's entire log.
#[derive(Debug, Clone)]
pub struct WholeLogReader {
    paths: LogPaths,
    chunk_size: usize,
}

impl WholeLogReader {
    pub fn new(paths: LogPaths, chunk_size: usize) -> Self {
        Self {
            paths,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn paths(&self) -> &LogPaths {
        &self.paths
    }

    /// Current length of the log, for pagination and live-tail polling.
    pub fn length(&self) -> Result<u64, StoreError> {
        AppendLog::len_of(&self.paths.log)
    }

    /// Lazily annotate the log from byte `start` to its current end.
    /// Each call opens fresh handles, which are released when the iterator is dropped.
    ///
    /// Index entries at or before `start` are not replayed as markers, with one
    /// exception: if `start` falls inside a step, the first bytes are preceded
    /// by a `StartStep` for that step so every window is balanced on its own.
    /// Renderers stitching pages with `start > 0` get one extra opening marker
    /// per page that begins mid-step, closed like any other segment.
    pub fn tokens(&self, start: u64) -> Result<AnnotatedTokens, StoreError> {
        let log = match File::open(&self.paths.log) {
            Ok(mut file) => {
                file.seek(SeekFrom::Start(start))?;
                Some(file)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };
        let entries = StepIndex::entries(&self.paths.index)?.peekable();

        Ok(AnnotatedTokens {
            log,
            entries,
            pos: start,
            open: None,
            pending: VecDeque::new(),
            buf: vec![0u8; self.chunk_size],
            finished: false,
        })
    }

    /// Render the annotated log from `start` into `sink` and return the offset
    /// the next poll should start from. Storage failures are written inline;
    /// only errors from `sink` itself are returned.
    pub fn render_to<W: Write + ?Sized>(&self, start: u64, sink: &mut W) -> io::Result<u64> {
        let tokens = match self.tokens(start) {
            Ok(tokens) => tokens,
            Err(e) => {
                self.report(&e);
                write_unavailable(sink, &e)?;
                return Ok(start);
            }
        };

        let mut next = start;
        for token in tokens {
            match token {
                Ok(token) => {
                    next += token.byte_len();
                    token.render(sink)?;
                }
                Err(e) => {
                    self.report(&e);
                    write_unavailable(sink, &e)?;
                }
            }
        }
        Ok(next)
    }

    /// Collect one poll from `start` into an AnnotatedChunk. `complete` marks
    /// whether the caller knows the log has stopped growing.
    pub fn chunk(&self, start: u64, complete: bool) -> AnnotatedChunk {
        let tokens = match self.tokens(start) {
            Ok(tokens) => tokens,
            Err(e) => {
                self.report(&e);
                return AnnotatedChunk::failed(start, e.to_string());
            }
        };

        let mut chunk = AnnotatedChunk {
            start,
            next_offset: start,
            tokens: Vec::new(),
            complete,
            error: None,
        };
        for token in tokens {
            match token {
                Ok(token) => {
                    chunk.next_offset += token.byte_len();
                    chunk.tokens.push(token);
                }
                Err(e) => {
                    self.report(&e);
                    chunk.complete = false;
                    chunk.error = Some(e.to_string());
                }
            }
        }
        chunk
    }

    fn report(&self, err: &StoreError) {
        tracing::warn!("failed to read log {}: {}", self.paths.log.display(), err);
    }
}

fn write_unavailable<W: Write + ?Sized>(sink: &mut W, err: &StoreError) -> io::Result<()> {
    writeln!(sink, "[log unavailable: {}]", err)
}

/// Index state at the read cursor.
struct Lookahead {
    /// Attribution set by the entries just consumed, if any were.
    attribution: Option<Option<StepId>>,
    /// Offset of the next transition still ahead.
    next_transition: Option<u64>,
}

/// Token iterator produced by [`WholeLogReader::tokens`].
pub struct AnnotatedTokens {
    /// None when the log file does not exist yet.
    log: Option<File>,
    entries: Peekable<IndexEntries>,
    pos: u64,
    /// Step whose segment is currently open in the output.
    open: Option<StepId>,
    pending: VecDeque<Token>,
    buf: Vec<u8>,
    finished: bool,
}

impl AnnotatedTokens {
    /// Byte offset of the next raw byte to be emitted.
    pub fn position(&self) -> u64 {
        self.pos
    }

    fn advance(&mut self) -> Result<(), StoreError> {
        let Lookahead {
            attribution,
            next_transition,
        } = self.lookahead()?;

        let mut want = self.buf.len() as u64;
        if let Some(next) = next_transition {
            want = want.min(next - self.pos);
        }
        let read = self.read_chunk(want as usize)?;

        if read == 0 {
            self.finish();
            return Ok(());
        }

        if let Some(step) = attribution
            && step != self.open
        {
            if self.open.take().is_some() {
                self.pending.push_back(Token::EndStep);
            }
            if let Some(id) = &step {
                self.pending.push_back(Token::StartStep(id.clone()));
            }
            self.open = step;
        }

        self.pending.push_back(Token::Bytes(self.buf[..read].to_vec()));
        self.pos += read as u64;
        Ok(())
    }

    /// Consume every entry at or before the cursor.
    fn lookahead(&mut self) -> Result<Lookahead, StoreError> {
        let mut attribution = None;
        loop {
            let next_transition = match self.entries.peek() {
                Some(Ok(entry)) if entry.offset <= self.pos => {
                    attribution = Some(entry.step_id.clone());
                    self.entries.next();
                    continue;
                }
                Some(Ok(entry)) => Some(entry.offset),
                Some(Err(_)) => match self.entries.next() {
                    Some(Err(e)) => return Err(e),
                    _ => continue,
                },
                None => None,
            };
            return Ok(Lookahead {
                attribution,
                next_transition,
            });
        }
    }

    fn read_chunk(&mut self, want: usize) -> Result<usize, StoreError> {
        let Some(log) = self.log.as_mut() else {
            return Ok(0);
        };
        loop {
            match log.read(&mut self.buf[..want]) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Close a still-open step segment; a live log may not have its closing transition yet.
    fn finish(&mut self) {
        if self.open.take().is_some() {
            self.pending.push_back(Token::EndStep);
        }
        self.finished = true;
        self.log = None;
    }
}

impl Iterator for AnnotatedTokens {
    type Item = Result<Token, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(token) = self.pending.pop_front() {
                return Some(Ok(token));
            }
            if self.finished {
                return None;
            }
            if let Err(e) = self.advance() {
                self.finish();
                return Some(Err(e));
            }
        }
    }
}
