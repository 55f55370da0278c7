// ABOUTME: Persistence layer for steplog, storing a build's console log and its step index.
// ABOUTME: Provides the writer session and handles, both readers, the storage manager, and live tail.

pub mod append_log;
pub mod config;
pub mod error;
pub mod index;
pub mod manager;
pub mod session;
pub mod step;
pub mod tail;
pub mod whole;

pub use append_log::{AppendLog, MAX_RANGE};
pub use config::{ConfigError, IndexDurability, StoreConfig};
pub use error::StoreError;
pub use index::{IndexEntries, StepIndex};
pub use manager::StorageManager;
pub use session::{OverallWriter, StepWriter, WriterSession};
pub use step::StepLogReader;
pub use tail::follow;
pub use whole::{AnnotatedTokens, WholeLogReader};
