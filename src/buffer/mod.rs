//! Time-ordered measurement buffer with state checkpoints.

pub mod buffer;
pub mod entry;

pub use buffer::{Buffer, DEFAULT_MAX_LEN};
pub use entry::{BufferEntry, EntryKind, EntryMetadata, EntryPayload};
