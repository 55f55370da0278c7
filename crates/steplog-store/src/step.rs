// ABOUTME: Extracts the bytes attributed to a single step by walking the transition index.
// ABOUTME: Concatenates every range the step owned, including an open-ended live tail.

use std::fs::File;
use std::io;

use steplog_core::{LogPaths, StepId, StepLog};

use crate::append_log::read_range_from;
use crate::error::StoreError;
use crate::index::StepIndex;

/// Reader reconstructing one step's output from the shared log.
#[derive(Debug, Clone)]
pub struct StepLogReader {
    paths: LogPaths,
}

impl StepLogReader {
    pub fn new(paths: LogPaths) -> Self {
        Self { paths }
    }

    /// Read everything attributed to `step_id`. Failures never propagate:
    /// they produce a degraded StepLog that carries the error.
    pub fn read(&self, step_id: &StepId) -> StepLog {
        match self.collect(step_id) {
            Ok(content) => StepLog::new(step_id.clone(), content),
            Err(e) => {
                tracing::warn!(
                    "failed to read step {} from log {}: {}",
                    step_id,
                    self.paths.log.display(),
                    e
                );
                StepLog::degraded(step_id.clone(), e.to_string())
            }
        }
    }

    fn collect(&self, step_id: &StepId) -> Result<Vec<u8>, StoreError> {
        let mut log = match File::open(&self.paths.log) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut out = Vec::new();
        // Start of the range being collected; Some while inside the step.
        let mut inside: Option<u64> = None;
        let mut log_len = log.metadata()?.len();

        for entry in StepIndex::entries(&self.paths.index)? {
            let entry = entry?;
            if entry.offset > log_len {
                // The log may have grown since it was measured.
                log_len = log.metadata()?.len();
                if entry.offset > log_len {
                    return Err(StoreError::OffsetPastEnd {
                        offset: entry.offset,
                        len: log_len,
                    });
                }
            }
            if let Some(range_start) = inside.take()
                && entry.offset > range_start
            {
                out.extend(read_range_from(&mut log, range_start, entry.offset)?);
            }
            if entry.step_id.as_ref() == Some(step_id) {
                inside = Some(entry.offset);
            }
        }

        // Live tail: the step is still the latest attribution.
        if let Some(range_start) = inside {
            let end = log.metadata()?.len();
            if end > range_start {
                out.extend(read_range_from(&mut log, range_start, end)?);
            }
        }

        Ok(out)
    }
}
