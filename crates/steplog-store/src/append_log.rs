// ABOUTME: Append-only raw byte store backing one build's combined console output.
// ABOUTME: Buffers short writes for the owning session and serves bounded range reads to readers.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::StoreError;

/// Largest contiguous range a single read may request.
pub const MAX_RANGE: u64 = i32::MAX as u64;

/// Write side of a log file. Owned by exactly one WriterSession.
pub struct AppendLog {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl AppendLog {
    /// Open (or create) the log file in append mode.
    /// Creates parent directories if they do not exist.
    pub fn open(path: &Path, buffer: usize) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::with_capacity(buffer, file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append bytes through the write buffer.
    pub fn append(&mut self, bytes: &[u8]) -> Result<(), StoreError> {
        self.writer.write_all(bytes)?;
        Ok(())
    }

    /// Push buffered bytes to the file.
    pub fn flush(&mut self) -> Result<(), StoreError> {
        self.writer.flush()?;
        Ok(())
    }

    /// Size of the file on disk. Buffered bytes are not counted, so callers
    /// that need a true append cursor flush first.
    pub fn length(&self) -> Result<u64, StoreError> {
        Ok(self.writer.get_ref().metadata()?.len())
    }

    /// Flush and release the file handle.
    pub fn close(mut self) -> Result<(), StoreError> {
        self.writer.flush()?;
        Ok(())
    }

    /// Current size of the log at `path`; a log that does not exist yet is empty.
    pub fn len_of(path: &Path) -> Result<u64, StoreError> {
        match fs::metadata(path) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    /// Read exactly `end - start` bytes starting at `start`, using a handle
    /// opened for this call only.
    pub fn read_range(path: &Path, start: u64, end: u64) -> Result<Vec<u8>, StoreError> {
        let len = check_range(start, end)?;
        let mut file = File::open(path)?;
        read_exact_at(&mut file, start, len)
    }
}

/// Read `[start, end)` from an already open source.
pub(crate) fn read_range_from<R: Read + Seek>(
    source: &mut R,
    start: u64,
    end: u64,
) -> Result<Vec<u8>, StoreError> {
    let len = check_range(start, end)?;
    read_exact_at(source, start, len)
}

fn check_range(start: u64, end: u64) -> Result<usize, StoreError> {
    if end < start {
        return Err(StoreError::InvalidRange { start, end });
    }
    let len = end - start;
    if len > MAX_RANGE {
        return Err(StoreError::RangeTooLarge { start, len });
    }
    Ok(len as usize)
}

fn read_exact_at<R: Read + Seek>(
    source: &mut R,
    start: u64,
    len: usize,
) -> Result<Vec<u8>, StoreError> {
    source.seek(SeekFrom::Start(start))?;
    // Grow with the bytes actually present rather than trusting `len` up front.
    let mut data = Vec::new();
    source.take(len as u64).read_to_end(&mut data)?;
    if data.len() < len {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("wanted {} bytes at offset {}, found {}", len, start, data.len()),
        )
        .into());
    }
    Ok(data)
}
