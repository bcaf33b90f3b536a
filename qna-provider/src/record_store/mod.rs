use async_trait::async_trait;
use common::error::QnaError;

use crate::entry::{Entry, Page, StoredEntry};

pub mod local;
pub mod remote;

pub use local::LocalRecordStore;
pub use remote::RemoteRecordStore;

/// Durable storage of the canonical Q&A records.
///
/// Every operation other than `initialize` fails with
/// [`QnaError::NotInitialized`] until `initialize` has succeeded once.
#[async_trait]
pub trait RecordStore: Send + Sync {
    fn backend_name(&self) -> &'static str;

    /// Idempotent; fails with [`QnaError::ProviderUnavailable`] when the
    /// backing service or filesystem cannot be reached.
    async fn initialize(&self) -> Result<(), QnaError>;

    /// Insert or replace the record stored under `id`.
    async fn put(&self, id: &str, entry: &Entry) -> Result<(), QnaError>;

    async fn get(&self, id: &str) -> Result<StoredEntry, QnaError>;

    /// Records in store order, windowed by `page`. An offset past the end
    /// yields an empty list.
    async fn list(&self, page: Page) -> Result<Vec<StoredEntry>, QnaError>;

    async fn count(&self) -> Result<usize, QnaError>;

    /// Removing an id that is not stored succeeds.
    async fn remove(&self, id: &str) -> Result<(), QnaError>;
}
