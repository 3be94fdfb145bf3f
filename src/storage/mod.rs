//! Attribute index storage.
//!
//! Committed indices live in an [`IndexSpace`]; resolver passes read and
//! write through a [`PassView`] overlay. Durability is pluggable through
//! [`PassJournal`]; the `persistent` feature provides a WAL-backed journal.

mod index;
mod overlay;
mod space;
mod traits;

#[cfg(feature = "persistent")]
pub mod persistent;

pub use index::{AttributeIndex, BucketIter, IndexEntry, IndexSet};
pub use overlay::{OverlayIter, PassView};
pub use space::IndexSpace;
pub use traits::{IndexRead, JournalRecord, PassCommit, PassJournal, StorageError};

#[cfg(feature = "persistent")]
pub use persistent::{open_index_space, PersistentConfig, PersistentIndexSpace};
