pub mod entry;
pub mod identifier;
pub mod index_sync;
pub mod knowledge_base;
pub mod metadata;
pub mod provider;
pub mod record_store;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use entry::{Entry, Page, RecognizedFields, StoredEntry};
pub use index_sync::{IndexSynchronizer, SyncMode};
pub use provider::{QnaProvider, WriteOptions};
pub use record_store::RecordStore;
