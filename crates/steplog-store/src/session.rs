// ABOUTME: Per-log-file writer coordination shared by the overall and step writer handles.
// ABOUTME: Serializes writes under one mutex and records a transition whenever attribution changes.

use std::io;
use std::mem;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};

use steplog_core::{LogPaths, StepId};

use crate::append_log::AppendLog;
use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::index::StepIndex;
use crate::manager::{SessionTable, unregister};

enum SessionState {
    /// No write has happened yet; files are not open.
    Idle,
    Open(OpenFiles),
    /// The overall handle was closed. Terminal.
    Closed,
}

struct OpenFiles {
    log: AppendLog,
    index: StepIndex,
    last_step: Option<StepId>,
}

impl OpenFiles {
    fn open(paths: &LogPaths, config: &StoreConfig) -> Result<Self, StoreError> {
        let log = AppendLog::open(&paths.log, config.write_buffer)?;
        StepIndex::repair(&paths.index)?;
        let last_step = StepIndex::recover_last_step_id(&paths.index)?;
        let index = StepIndex::open(&paths.index, config.index_durability)?;

        tracing::debug!(
            "opened log {} (last step {:?})",
            paths.log.display(),
            last_step.as_ref().map(StepId::as_str)
        );

        Ok(Self {
            log,
            index,
            last_step,
        })
    }

    /// Record a transition if `step` differs from the last attributed step.
    /// Buffered bytes are flushed first so the offset is a real boundary in the file.
    fn attribute(&mut self, step: Option<&StepId>) -> Result<(), StoreError> {
        if self.last_step.as_ref() == step {
            return Ok(());
        }

        self.log.flush()?;
        let offset = self.log.length()?;
        self.index.append_transition(offset, step)?;

        tracing::debug!(
            "log {} switched to step {:?} at offset {}",
            self.log.path().display(),
            step.map(StepId::as_str),
            offset
        );

        self.last_step = step.cloned();
        Ok(())
    }

    fn close(self) -> Result<(), StoreError> {
        // The index writes unbuffered, so dropping it after the log is enough.
        let OpenFiles { log, index, .. } = self;
        let result = log.close();
        drop(index);
        result
    }
}

/// Coordinates every writer of one log file.
pub struct WriterSession {
    paths: LogPaths,
    config: StoreConfig,
    state: Mutex<SessionState>,
}

impl WriterSession {
    pub(crate) fn new(paths: LogPaths, config: StoreConfig) -> Self {
        Self {
            paths,
            config,
            state: Mutex::new(SessionState::Idle),
        }
    }

    pub fn paths(&self) -> &LogPaths {
        &self.paths
    }

    /// Append `bytes` attributed to `step` (None for overall output).
    /// Opens the files on the first non-empty write.
    pub fn write(&self, step: Option<&StepId>, bytes: &[u8]) -> Result<(), StoreError> {
        if bytes.is_empty() {
            return Ok(());
        }

        let mut state = self.lock()?;
        let files = self.open_files(&mut *state)?;
        files.attribute(step)?;
        files.log.append(bytes)
    }

    /// Push buffered log bytes to the file. A session that is idle or closed has nothing to flush.
    pub fn flush(&self) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        match &mut *state {
            SessionState::Open(files) => files.log.flush(),
            SessionState::Idle | SessionState::Closed => Ok(()),
        }
    }

    /// Flush buffered log bytes unless a writer currently holds the session.
    /// Never waits on the lock; returns whether a flush happened.
    pub fn try_flush(&self) -> bool {
        let mut state = match self.state.try_lock() {
            Ok(state) => state,
            Err(TryLockError::WouldBlock) | Err(TryLockError::Poisoned(_)) => return false,
        };
        let SessionState::Open(files) = &mut *state else {
            return false;
        };
        match files.log.flush() {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("failed to flush log {}: {}", self.paths.log.display(), e);
                false
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        match self.state.lock() {
            Ok(state) => matches!(*state, SessionState::Closed),
            Err(_) => true,
        }
    }

    /// Flush and release both files. Later writes fail with SessionClosed.
    pub(crate) fn close(&self) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        match mem::replace(&mut *state, SessionState::Closed) {
            SessionState::Open(files) => {
                tracing::debug!("closing log {}", self.paths.log.display());
                files.close()
            }
            SessionState::Idle | SessionState::Closed => Ok(()),
        }
    }

    fn open_files<'a>(
        &self,
        state: &'a mut SessionState,
    ) -> Result<&'a mut OpenFiles, StoreError> {
        if let SessionState::Idle = state {
            *state = SessionState::Open(OpenFiles::open(&self.paths, &self.config)?);
        }
        match state {
            SessionState::Open(files) => Ok(files),
            _ => Err(self.closed()),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, SessionState>, StoreError> {
        self.state.lock().map_err(|_| StoreError::Poisoned {
            path: self.paths.log.clone(),
        })
    }

    fn closed(&self) -> StoreError {
        StoreError::SessionClosed {
            path: self.paths.log.clone(),
        }
    }
}

/// Writer for the build's overall output. Closing it finalizes the log.
pub struct OverallWriter {
    session: Arc<WriterSession>,
    registry: SessionTable,
    closed: bool,
}

impl OverallWriter {
    pub(crate) fn new(session: Arc<WriterSession>, registry: SessionTable) -> Self {
        Self {
            session,
            registry,
            closed: false,
        }
    }

    pub fn log_path(&self) -> &Path {
        &self.session.paths().log
    }

    pub fn write_bytes(&self, bytes: &[u8]) -> Result<(), StoreError> {
        self.session.write(None, bytes)
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.session.flush()
    }

    /// Flush and close the log and index, and drop the session from the registry.
    pub fn close(mut self) -> Result<(), StoreError> {
        self.finish()
    }

    fn finish(&mut self) -> Result<(), StoreError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let result = self.session.close();
        unregister(&self.registry, &self.session);
        result
    }
}

impl io::Write for OverallWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_bytes(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        OverallWriter::flush(self)?;
        Ok(())
    }
}

impl Drop for OverallWriter {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            tracing::warn!(
                "failed to close log {}: {}",
                self.session.paths().log.display(),
                e
            );
        }
    }
}

/// Writer for output produced on behalf of one step. Closing it only flushes.
pub struct StepWriter {
    session: Arc<WriterSession>,
    step_id: StepId,
}

impl StepWriter {
    pub(crate) fn new(session: Arc<WriterSession>, step_id: StepId) -> Self {
        Self { session, step_id }
    }

    pub fn step_id(&self) -> &StepId {
        &self.step_id
    }

    pub fn write_bytes(&self, bytes: &[u8]) -> Result<(), StoreError> {
        self.session.write(Some(&self.step_id), bytes)
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.session.flush()
    }

    /// Advisory close: the shared files stay open until the overall writer closes.
    pub fn close(self) -> Result<(), StoreError> {
        self.session.flush()
    }
}

impl io::Write for StepWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_bytes(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        StepWriter::flush(self)?;
        Ok(())
    }
}
