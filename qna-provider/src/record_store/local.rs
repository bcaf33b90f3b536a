use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use async_trait::async_trait;
use common::{error::QnaError, storage::store::FileStorage};
use futures::future::try_join_all;
use tracing::{debug, info};

use super::RecordStore;
use crate::entry::{Entry, Page, StoredEntry};

const FILES_GLOB: &str = "**/*.json";
const RECORD_SUFFIX: &str = ".json";

/// One pretty-printed `{id, data}` JSON file per entry, named `<id>.json`.
pub struct LocalRecordStore {
    files: Arc<dyn FileStorage>,
    qna_dir: String,
    initialized: AtomicBool,
}

impl LocalRecordStore {
    pub fn new(files: Arc<dyn FileStorage>, qna_dir: impl Into<String>) -> Self {
        Self {
            files,
            qna_dir: qna_dir.into(),
            initialized: AtomicBool::new(false),
        }
    }

    fn ensure_initialized(&self) -> Result<(), QnaError> {
        if self.initialized.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(QnaError::NotInitialized(format!(
                "local record store at '{}'",
                self.qna_dir
            )))
        }
    }

    async fn read_record(&self, file_name: &str) -> Result<StoredEntry, QnaError> {
        let content = self.files.read_file(&self.qna_dir, file_name).await?;
        Ok(serde_json::from_str(&content)?)
    }
}

fn file_name(id: &str) -> Result<String, QnaError> {
    if id.is_empty() || id.contains(['/', '\\']) || id.contains("..") {
        return Err(QnaError::InvalidEntry(format!(
            "id '{id}' cannot be used as a file name"
        )));
    }
    Ok(format!("{id}{RECORD_SUFFIX}"))
}

#[async_trait]
impl RecordStore for LocalRecordStore {
    fn backend_name(&self) -> &'static str {
        "local"
    }

    async fn initialize(&self) -> Result<(), QnaError> {
        self.files
            .add_root_folder(&self.qna_dir, FILES_GLOB)
            .await
            .map_err(|e| {
                QnaError::ProviderUnavailable(format!(
                    "could not prepare folder '{}': {e}",
                    self.qna_dir
                ))
            })?;
        self.initialized.store(true, Ordering::Release);
        info!(folder = %self.qna_dir, "Local record store initialized");
        Ok(())
    }

    async fn put(&self, id: &str, entry: &Entry) -> Result<(), QnaError> {
        self.ensure_initialized()?;
        let name = file_name(id)?;
        let record = StoredEntry {
            id: id.to_string(),
            data: entry.clone(),
        };
        let content = serde_json::to_string_pretty(&record)?;
        self.files.upsert_file(&self.qna_dir, &name, &content).await?;
        debug!(entry_id = %id, "Wrote record file");
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<StoredEntry, QnaError> {
        self.ensure_initialized()?;
        self.read_record(&file_name(id)?).await
    }

    async fn list(&self, page: Page) -> Result<Vec<StoredEntry>, QnaError> {
        self.ensure_initialized()?;
        let names = self
            .files
            .directory_listing(&self.qna_dir, RECORD_SUFFIX)
            .await?;

        let names = page.apply(names);
        try_join_all(names.iter().map(|name| self.read_record(name))).await
    }

    async fn count(&self) -> Result<usize, QnaError> {
        self.ensure_initialized()?;
        Ok(self
            .files
            .directory_listing(&self.qna_dir, RECORD_SUFFIX)
            .await?
            .len())
    }

    async fn remove(&self, id: &str) -> Result<(), QnaError> {
        self.ensure_initialized()?;
        match self.files.delete_file(&self.qna_dir, &file_name(id)?).await {
            Err(e) if e.is_not_found() => {
                debug!(entry_id = %id, "Record already absent");
                Ok(())
            }
            other => other,
        }
    }
}
