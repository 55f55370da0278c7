// ABOUTME: Core library for steplog, containing the domain types shared by storage and readers.
// ABOUTME: Defines step ids, index entries, annotation tokens, and reader result objects.

pub mod entry;
pub mod model;
pub mod token;
pub mod view;

pub use entry::{EntryParseError, IndexEntry};
pub use model::{LogPaths, StepId, StepIdError};
pub use token::{Token, render_all};
pub use view::{AnnotatedChunk, StepLog};
