// ABOUTME: Append-only side file recording (offset, step id) attribution transitions.
// ABOUTME: Provides line-at-a-time append, lazy tolerant iteration, repair, and last-step recovery.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use steplog_core::{IndexEntry, StepId};

use crate::config::IndexDurability;
use crate::error::StoreError;

/// Write side of a log-index file. Owned by exactly one WriterSession.
pub struct StepIndex {
    path: PathBuf,
    file: File,
    durability: IndexDurability,
}

impl StepIndex {
    /// Open (or create) the index file in append mode.
    pub fn open(path: &Path, durability: IndexDurability) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
            durability,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record that bytes from `offset` onward belong to `step_id`.
    /// The line goes out in a single write so readers never see it split.
    pub fn append_transition(
        &mut self,
        offset: u64,
        step_id: Option<&StepId>,
    ) -> Result<(), StoreError> {
        let line = IndexEntry::new(offset, step_id.cloned()).to_line();
        self.file.write_all(line.as_bytes())?;
        self.file.flush()?;
        if self.durability == IndexDurability::Sync {
            self.file.sync_data()?;
        }
        Ok(())
    }

    /// Iterate the entries of the index at `path` from the beginning.
    /// A missing index yields no entries.
    pub fn entries(path: &Path) -> Result<IndexEntries, StoreError> {
        let reader = match File::open(path) {
            Ok(file) => Some(BufReader::new(file)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        Ok(IndexEntries {
            path: path.to_path_buf(),
            reader,
            line: Vec::new(),
        })
    }

    /// Read every entry once and return the step id of the last one.
    pub fn recover_last_step_id(path: &Path) -> Result<Option<StepId>, StoreError> {
        let mut last = None;
        for entry in Self::entries(path)? {
            last = Some(entry?.step_id);
        }
        Ok(last.flatten())
    }

    /// Drop a trailing line that was cut off mid-write so new transitions start
    /// on a fresh line. Returns the number of bytes removed.
    pub fn repair(path: &Path) -> Result<u64, StoreError> {
        let data = match fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let keep = match data.iter().rposition(|&b| b == b'\n') {
            Some(last_newline) => last_newline + 1,
            None => 0,
        };
        if keep == data.len() {
            return Ok(0);
        }

        let file = OpenOptions::new().write(true).open(path)?;
        file.set_len(keep as u64)?;
        let removed = (data.len() - keep) as u64;
        tracing::warn!(
            "truncated {} bytes of unterminated data from index {}",
            removed,
            path.display()
        );
        Ok(removed)
    }
}

/// Lazy forward-only iterator over an index file.
///
/// Lines whose offset does not parse are skipped with a warning. A final line
/// without a terminating newline is treated as not yet written.
pub struct IndexEntries {
    path: PathBuf,
    reader: Option<BufReader<File>>,
    line: Vec<u8>,
}

impl Iterator for IndexEntries {
    type Item = Result<IndexEntry, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let reader = self.reader.as_mut()?;
            self.line.clear();

            match reader.read_until(b'\n', &mut self.line) {
                Ok(0) => {
                    self.reader = None;
                    return None;
                }
                Ok(_) => {}
                Err(e) => {
                    self.reader = None;
                    return Some(Err(e.into()));
                }
            }

            if self.line.pop() != Some(b'\n') {
                tracing::debug!("index {} ends mid-line, stopping", self.path.display());
                self.reader = None;
                return None;
            }

            let parsed = std::str::from_utf8(&self.line)
                .map_err(|e| e.to_string())
                .and_then(|line| IndexEntry::parse_line(line).map_err(|e| e.to_string()));

            match parsed {
                Ok(entry) => return Some(Ok(entry)),
                Err(reason) => {
                    tracing::warn!(
                        "ignoring corrupt line in index file {}: {}",
                        self.path.display(),
                        reason
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn step(id: &str) -> StepId {
        StepId::new(id).unwrap()
    }

    fn collect(path: &Path) -> Vec<IndexEntry> {
        StepIndex::entries(path)
            .unwrap()
            .map(|entry| entry.unwrap())
            .collect()
    }

    #[test]
    fn append_writes_one_line_per_transition() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log-index");

        let mut index = StepIndex::open(&path, IndexDurability::Flush).unwrap();
        index.append_transition(0, Some(&step("s1"))).unwrap();
        index.append_transition(6, None).unwrap();
        index.append_transition(12, Some(&step("s 2"))).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "0 s1\n6\n12 s 2\n");
        assert_eq!(
            collect(&path),
            vec![
                IndexEntry::new(0, Some(step("s1"))),
                IndexEntry::new(6, None),
                IndexEntry::new(12, Some(step("s 2"))),
            ]
        );
    }

    #[test]
    fn sync_durability_still_appends() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log-index");

        let mut index = StepIndex::open(&path, IndexDurability::Sync).unwrap();
        index.append_transition(3, Some(&step("a"))).unwrap();

        assert_eq!(index.path(), path.as_path());
        assert_eq!(collect(&path), vec![IndexEntry::new(3, Some(step("a")))]);
    }

    #[test]
    fn missing_index_has_no_entries() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent-index");

        assert!(collect(&path).is_empty());
        assert_eq!(StepIndex::recover_last_step_id(&path).unwrap(), None);
    }

    #[test]
    fn corrupt_lines_are_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log-index");
        let mut bytes = b"0 s1\ngarbage here\n10\n".to_vec();
        bytes.extend_from_slice(&[0xff, 0xfe, b' ', b'x', b'\n']);
        bytes.extend_from_slice(b"\n20 s2\n");
        fs::write(&path, bytes).unwrap();

        assert_eq!(
            collect(&path),
            vec![
                IndexEntry::new(0, Some(step("s1"))),
                IndexEntry::new(10, None),
                IndexEntry::new(20, Some(step("s2"))),
            ]
        );
    }

    #[test]
    fn unterminated_trailing_line_is_not_yielded() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log-index");
        fs::write(&path, "0 s1\n8 s").unwrap();

        assert_eq!(collect(&path), vec![IndexEntry::new(0, Some(step("s1")))]);
    }

    #[test]
    fn iteration_restarts_per_call() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log-index");
        fs::write(&path, "0 s1\n4\n").unwrap();

        assert_eq!(collect(&path).len(), 2);
        assert_eq!(collect(&path).len(), 2);
    }

    #[test]
    fn recover_returns_last_step_id() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log-index");

        fs::write(&path, "0 s1\n5\n9 s2\n").unwrap();
        assert_eq!(StepIndex::recover_last_step_id(&path).unwrap(), Some(step("s2")));

        fs::write(&path, "0 s1\n5\n").unwrap();
        assert_eq!(StepIndex::recover_last_step_id(&path).unwrap(), None);
    }

    #[test]
    fn repair_truncates_partial_last_line() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log-index");
        fs::write(&path, "0 s1\n7 s").unwrap();

        assert_eq!(StepIndex::repair(&path).unwrap(), 3);
        assert_eq!(fs::read_to_string(&path).unwrap(), "0 s1\n");

        // A clean file is left alone.
        assert_eq!(StepIndex::repair(&path).unwrap(), 0);
        assert_eq!(fs::read_to_string(&path).unwrap(), "0 s1\n");
    }

    #[test]
    fn repair_of_missing_index_is_noop() {
        let dir = TempDir::new().unwrap();
        assert_eq!(StepIndex::repair(&dir.path().join("none")).unwrap(), 0);
    }
}
