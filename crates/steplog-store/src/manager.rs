// ABOUTME: Storage manager mapping log-file paths to their single writer session.
// ABOUTME: Hands out writer handles and readers; sessions leave the table when the overall writer closes.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use steplog_core::{LogPaths, StepId, StepLog};

use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::session::{OverallWriter, StepWriter, WriterSession};
use crate::step::StepLogReader;
use crate::whole::WholeLogReader;

/// Open sessions keyed by canonical log path.
pub(crate) type SessionTable = Arc<Mutex<HashMap<PathBuf, Arc<WriterSession>>>>;

/// Remove `session` from the table, unless a newer session has taken its key.
pub(crate) fn unregister(table: &SessionTable, session: &Arc<WriterSession>) {
    let key = &session.paths().log;
    match table.lock() {
        Ok(mut sessions) => {
            if sessions
                .get(key)
                .is_some_and(|current| Arc::ptr_eq(current, session))
            {
                sessions.remove(key);
                tracing::debug!("released session for {}", key.display());
            }
        }
        Err(_) => tracing::warn!("session table poisoned; {} left registered", key.display()),
    }
}

/// Owns the mapping from log file to writer session and builds readers.
/// Cheap to clone; clones share the same table.
#[derive(Clone)]
pub struct StorageManager {
    config: StoreConfig,
    sessions: SessionTable,
}

impl StorageManager {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Handle for the build's overall output. Closing it finalizes the log.
    pub fn overall_writer(&self, log: &Path) -> Result<OverallWriter, StoreError> {
        let session = self.session(log)?;
        Ok(OverallWriter::new(session, Arc::clone(&self.sessions)))
    }

    /// Handle for output attributed to `step_id`.
    pub fn step_writer(&self, log: &Path, step_id: StepId) -> Result<StepWriter, StoreError> {
        let session = self.session(log)?;
        Ok(StepWriter::new(session, step_id))
    }

    /// Annotated reader over the whole log. Output a live session has buffered
    /// so far is flushed first, so the reader sees it.
    pub fn whole_log(&self, log: &Path) -> WholeLogReader {
        self.publish(log);
        WholeLogReader::new(LogPaths::for_log(log), self.config.read_chunk)
    }

    /// Everything `step_id` wrote to the log, including output a live session
    /// still buffers. Never fails; errors are reported inline.
    pub fn step_log(&self, log: &Path, step_id: &StepId) -> StepLog {
        self.publish(log);
        StepLogReader::new(LogPaths::for_log(log)).read(step_id)
    }

    /// Whether a writer session is still registered for `log`.
    pub fn is_live(&self, log: &Path) -> bool {
        self.registered(log).is_some()
    }

    /// Push a live session's buffered bytes to disk without waiting on its writers.
    fn publish(&self, log: &Path) {
        if let Some(session) = self.registered(log) {
            session.try_flush();
        }
    }

    fn registered(&self, log: &Path) -> Option<Arc<WriterSession>> {
        let key = existing_key(log)?;
        let sessions = self.sessions.lock().ok()?;
        sessions.get(&key).cloned()
    }

    /// Number of sessions currently registered.
    pub fn open_sessions(&self) -> usize {
        self.sessions.lock().map(|s| s.len()).unwrap_or(0)
    }

    fn session(&self, log: &Path) -> Result<Arc<WriterSession>, StoreError> {
        let key = canonical_key(log)?;
        let mut sessions = self.sessions.lock().map_err(|_| StoreError::Poisoned {
            path: key.clone(),
        })?;

        let session = sessions.entry(key.clone()).or_insert_with(|| {
            tracing::debug!("registering session for {}", key.display());
            Arc::new(WriterSession::new(
                LogPaths::for_log(&key),
                self.config.clone(),
            ))
        });
        Ok(Arc::clone(session))
    }
}

/// Canonical key for a log that may not exist yet: the parent directory is
/// created and canonicalized, then the file name is re-attached.
fn canonical_key(log: &Path) -> Result<PathBuf, StoreError> {
    let (parent, name) = split_log_path(log)?;
    fs::create_dir_all(parent)?;
    Ok(fs::canonicalize(parent)?.join(name))
}

/// Like canonical_key, but without creating anything.
fn existing_key(log: &Path) -> Option<PathBuf> {
    let (parent, name) = split_log_path(log).ok()?;
    Some(fs::canonicalize(parent).ok()?.join(name))
}

fn split_log_path(log: &Path) -> Result<(&Path, &std::ffi::OsStr), StoreError> {
    let name = log.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("log path {} has no file name", log.display()),
        )
    })?;
    let parent = log
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    Ok((parent, name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn step(id: &str) -> StepId {
        StepId::new(id).unwrap()
    }

    #[test]
    fn one_session_per_file() {
        let dir = TempDir::new().unwrap();
        let mgr = StorageManager::new(StoreConfig::default());
        let log = dir.path().join("build-1").join("log");

        let overall = mgr.overall_writer(&log).unwrap();
        let step_writer = mgr.step_writer(&log, step("s1")).unwrap();
        // A differently spelled path to the same file shares the session.
        let dotted = dir.path().join("build-1").join(".").join("log");
        let _again = mgr.step_writer(&dotted, step("s2")).unwrap();

        assert_eq!(mgr.open_sessions(), 1);
        assert!(mgr.is_live(&log));

        step_writer.write_bytes(b"hi\n").unwrap();
        overall.close().unwrap();

        assert_eq!(mgr.open_sessions(), 0);
        assert!(!mgr.is_live(&log));
    }

    #[test]
    fn separate_builds_get_separate_sessions() {
        let dir = TempDir::new().unwrap();
        let mgr = StorageManager::new(StoreConfig::default());

        let _a = mgr.overall_writer(&dir.path().join("a").join("log")).unwrap();
        let _b = mgr.overall_writer(&dir.path().join("b").join("log")).unwrap();

        assert_eq!(mgr.open_sessions(), 2);
    }

    #[test]
    fn write_through_step_handle_after_close_fails() {
        let dir = TempDir::new().unwrap();
        let mgr = StorageManager::new(StoreConfig::default());
        let log = dir.path().join("log");

        let overall = mgr.overall_writer(&log).unwrap();
        let step_writer = mgr.step_writer(&log, step("s1")).unwrap();
        step_writer.write_bytes(b"early\n").unwrap();
        overall.close().unwrap();

        let err = step_writer.write_bytes(b"late\n").unwrap_err();
        assert!(matches!(err, StoreError::SessionClosed { .. }));
        assert_eq!(fs::read(&log).unwrap(), b"early\n");
    }

    #[test]
    fn new_session_after_close_resumes_the_same_files() {
        let dir = TempDir::new().unwrap();
        let mgr = StorageManager::new(StoreConfig::default());
        let log = dir.path().join("log");

        let overall = mgr.overall_writer(&log).unwrap();
        overall.write_bytes(b"one\n").unwrap();
        overall.close().unwrap();

        let overall = mgr.overall_writer(&log).unwrap();
        overall.write_bytes(b"two\n").unwrap();
        overall.close().unwrap();

        assert_eq!(fs::read(&log).unwrap(), b"one\ntwo\n");
        // Overall output from the start of a log needs no transition at all.
        assert_eq!(fs::read_to_string(dir.path().join("log-index")).unwrap(), "");
    }

    #[test]
    fn dropping_overall_writer_closes_session() {
        let dir = TempDir::new().unwrap();
        let mgr = StorageManager::new(StoreConfig::default());
        let log = dir.path().join("log");

        {
            let overall = mgr.overall_writer(&log).unwrap();
            overall.write_bytes(b"buffered").unwrap();
        }

        assert_eq!(mgr.open_sessions(), 0);
        assert_eq!(fs::read(&log).unwrap(), b"buffered");
    }

    #[test]
    fn stale_close_does_not_evict_newer_session() {
        let dir = TempDir::new().unwrap();
        let mgr = StorageManager::new(StoreConfig::default());
        let log = dir.path().join("log");

        let first = mgr.overall_writer(&log).unwrap();
        let session = mgr.session(&log).unwrap();
        first.close().unwrap();

        let _second = mgr.overall_writer(&log).unwrap();
        unregister(&mgr.sessions, &session);

        assert_eq!(mgr.open_sessions(), 1);
    }

    #[test]
    fn readers_see_unflushed_output_of_a_live_build() {
        let dir = TempDir::new().unwrap();
        let mgr = StorageManager::new(StoreConfig::default());
        let log = dir.path().join("log");

        let _overall = mgr.overall_writer(&log).unwrap();
        let s1 = mgr.step_writer(&log, step("s1")).unwrap();
        s1.write_bytes(b"compiling\n").unwrap();

        assert_eq!(mgr.step_log(&log, &step("s1")).text(), "compiling\n");
        let chunk = mgr.whole_log(&log).chunk(0, false);
        assert_eq!(chunk.next_offset, 10);
        assert_eq!(
            String::from_utf8(chunk.render()).unwrap(),
            "<span class=\"step-node-s1\">compiling\n</span>"
        );

        s1.write_bytes(b"linking\n").unwrap();
        assert_eq!(
            mgr.step_log(&log, &step("s1")).text(),
            "compiling\nlinking\n"
        );
    }

    #[test]
    fn rejects_path_without_file_name() {
        let mgr = StorageManager::new(StoreConfig::default());
        assert!(matches!(
            mgr.overall_writer(Path::new("/")),
            Err(StoreError::Io(_))
        ));
    }

    #[test]
    fn readers_use_configured_paths() {
        let dir = TempDir::new().unwrap();
        let mgr = StorageManager::new(StoreConfig::default());
        let log = dir.path().join("log");

        let overall = mgr.overall_writer(&log).unwrap();
        let s1 = mgr.step_writer(&log, step("s1")).unwrap();
        s1.write_bytes(b"inside\n").unwrap();
        overall.write_bytes(b"outside\n").unwrap();
        overall.flush().unwrap();

        assert_eq!(mgr.step_log(&log, &step("s1")).content, b"inside\n");
        assert_eq!(mgr.whole_log(&log).length().unwrap(), 15);
        assert_eq!(mgr.config(), &StoreConfig::default());
    }
}
