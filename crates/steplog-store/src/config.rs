// ABOUTME: Configuration for the steplog storage layer, loaded from environment variables.
// ABOUTME: Controls write buffering, read chunk size, and index durability.

use thiserror::Error;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var} must be a positive byte count, got {value:?}")]
    InvalidSize { var: &'static str, value: String },
}

/// How hard the index writer pushes each transition toward the disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexDurability {
    /// Flush to the OS after every transition. The index is reconstructible, so this is the default.
    #[default]
    Flush,
    /// Additionally fsync the index data after every transition.
    Sync,
}

/// Storage configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Capacity of the buffer batching short writes to the log file.
    pub write_buffer: usize,
    /// Largest chunk the whole-log reader pulls from disk at once.
    pub read_chunk: usize,
    pub index_durability: IndexDurability,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            write_buffer: 8 * 1024,
            read_chunk: 8 * 1024,
            index_durability: IndexDurability::Flush,
        }
    }
}

impl StoreConfig {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// Environment variables:
    /// - STEPLOG_WRITE_BUFFER: log write buffer in bytes (default: 8192)
    /// - STEPLOG_READ_CHUNK: whole-log read chunk in bytes (default: 8192)
    /// - STEPLOG_INDEX_SYNC: fsync every index transition (default: false)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build a configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let write_buffer = parse_size(&lookup, "STEPLOG_WRITE_BUFFER", defaults.write_buffer)?;
        let read_chunk = parse_size(&lookup, "STEPLOG_READ_CHUNK", defaults.read_chunk)?;

        let index_durability = match lookup("STEPLOG_INDEX_SYNC") {
            Some(v) if v == "true" || v == "1" || v == "yes" => IndexDurability::Sync,
            _ => IndexDurability::Flush,
        };

        Ok(Self {
            write_buffer,
            read_chunk,
            index_durability,
        })
    }
}

fn parse_size<F>(lookup: &F, var: &'static str, default: usize) -> Result<usize, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(var).filter(|v| !v.is_empty()) {
        None => Ok(default),
        Some(value) => match value.parse::<usize>() {
            Ok(size) if size > 0 => Ok(size),
            _ => Err(ConfigError::InvalidSize { var, value }),
        },
    }
}
