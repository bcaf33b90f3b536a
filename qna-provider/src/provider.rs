use std::sync::Arc;

use common::{
    error::QnaError,
    storage::{
        intents::{IntentStorage, StoredIntentStorage},
        store::StorageManager,
    },
    utils::config::{AppConfig, QnaBackend},
};
use tracing::{debug, info};

use crate::{
    entry::{Entry, Page, StoredEntry},
    identifier::IdGenerator,
    index_sync::{normalize_questions, IndexSynchronizer, SyncMode},
    knowledge_base::QnaMakerClient,
    record_store::{LocalRecordStore, RecordStore, RemoteRecordStore},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOptions {
    pub sync: SyncMode,
}

impl WriteOptions {
    pub fn with_sync(sync: SyncMode) -> Self {
        Self { sync }
    }
}

/// Saves, reads, lists and deletes Q&A entries, keeping each record and its
/// derived intent in step.
///
/// Writes touch the intent index before the record store. A failure in
/// either step is returned to the caller; there is no rollback of the step
/// that already succeeded.
pub struct QnaProvider {
    store: Arc<dyn RecordStore>,
    index: IndexSynchronizer,
    ids: IdGenerator,
    default_source: String,
}

impl QnaProvider {
    pub fn new(
        store: Arc<dyn RecordStore>,
        intents: Arc<dyn IntentStorage>,
        intent_prefix: impl Into<String>,
        default_source: impl Into<String>,
    ) -> Self {
        Self {
            store,
            index: IndexSynchronizer::new(intents, intent_prefix),
            ids: IdGenerator::new(),
            default_source: default_source.into(),
        }
    }

    pub fn with_id_generator(mut self, ids: IdGenerator) -> Self {
        self.ids = ids;
        self
    }

    /// Wire the configured record store with intents persisted next to it.
    ///
    /// The provider still has to be initialized before use.
    pub async fn from_config(config: &AppConfig) -> Result<Self, QnaError> {
        let storage = StorageManager::new(config).await?;
        let intents = Arc::new(StoredIntentStorage::new(
            storage.clone(),
            config.intents_dir.clone(),
        ));

        let store: Arc<dyn RecordStore> = match config.qna_backend {
            QnaBackend::Local => Arc::new(LocalRecordStore::new(
                Arc::new(storage),
                config.qna_dir.clone(),
            )),
            QnaBackend::Remote => {
                let api_key = config.qna_maker_api_key.as_deref().ok_or_else(|| {
                    QnaError::ProviderUnavailable(
                        "qna_maker_api_key is required for the remote backend".into(),
                    )
                })?;
                let client = QnaMakerClient::new(&config.qna_maker_base_url, api_key)?;
                Arc::new(RemoteRecordStore::new(
                    Arc::new(client),
                    config.knowledgebase_name.clone(),
                    config.entry_source.clone(),
                ))
            }
        };

        Ok(Self::new(
            store,
            intents,
            config.intent_prefix.clone(),
            config.entry_source.clone(),
        ))
    }

    pub fn backend_name(&self) -> &'static str {
        self.store.backend_name()
    }

    pub fn index(&self) -> &IndexSynchronizer {
        &self.index
    }

    pub async fn initialize(&self) -> Result<(), QnaError> {
        self.store.initialize().await?;
        info!(backend = self.backend_name(), "Q&A provider ready");
        Ok(())
    }

    pub async fn save(&self, entry: Entry, id: Option<&str>) -> Result<String, QnaError> {
        self.save_with(entry, id, WriteOptions::default()).await
    }

    /// Create the entry when `id` is `None`, replace it otherwise. Returns the id.
    pub async fn save_with(
        &self,
        mut entry: Entry,
        id: Option<&str>,
        options: WriteOptions,
    ) -> Result<String, QnaError> {
        if normalize_questions(&entry.questions).is_empty() {
            return Err(QnaError::InvalidEntry(
                "an entry needs at least one non-empty question".into(),
            ));
        }

        let id = match id {
            Some("") => return Err(QnaError::InvalidEntry("entry id is empty".into())),
            Some(id) => {
                entry.source = Some(self.existing_source(id, entry.source.take()).await?);
                id.to_string()
            }
            None => {
                if entry.source.is_none() {
                    entry.source = Some(self.default_source.clone());
                }
                self.ids.generate(&entry)
            }
        };

        self.index.reflect(&id, &entry).await?;
        self.store.put(&id, &entry).await?;
        self.index.request_sync(options.sync).await?;

        info!(entry_id = %id, enabled = entry.is_enabled(), "Saved entry");
        Ok(id)
    }

    /// The stored source wins over the caller's so provenance never changes.
    async fn existing_source(
        &self,
        id: &str,
        requested: Option<String>,
    ) -> Result<String, QnaError> {
        match self.store.get(id).await {
            Ok(existing) => Ok(existing
                .data
                .source
                .or(requested)
                .unwrap_or_else(|| self.default_source.clone())),
            Err(e) if e.is_not_found() => {
                Ok(requested.unwrap_or_else(|| self.default_source.clone()))
            }
            Err(e) => Err(e),
        }
    }

    pub async fn get(&self, id: &str) -> Result<StoredEntry, QnaError> {
        self.store.get(id).await
    }

    pub async fn list(&self, page: Page) -> Result<Vec<StoredEntry>, QnaError> {
        self.store.list(page).await
    }

    pub async fn count(&self) -> Result<usize, QnaError> {
        self.store.count().await
    }

    pub async fn delete(&self, id: &str) -> Result<(), QnaError> {
        self.delete_with(id, WriteOptions::default()).await
    }

    /// Fails with [`QnaError::NotFound`] for an unknown id. The intent goes
    /// first so an interrupted delete never leaves a routable intent behind.
    pub async fn delete_with(&self, id: &str, options: WriteOptions) -> Result<(), QnaError> {
        let existing = self.store.get(id).await?;

        let enabled = existing.data.is_enabled();
        if enabled {
            self.index.remove(id).await?;
        }
        self.store.remove(id).await?;
        info!(entry_id = %id, "Deleted entry");

        if enabled {
            self.index.request_sync(options.sync).await?;
        }
        Ok(())
    }

    /// Save every entry as new, then sync the model once.
    pub async fn import(&self, entries: Vec<Entry>) -> Result<Vec<String>, QnaError> {
        let mut ids = Vec::with_capacity(entries.len());
        for entry in entries {
            let id = self
                .save_with(entry, None, WriteOptions::with_sync(SyncMode::Skip))
                .await?;
            ids.push(id);
        }

        self.index.request_sync(SyncMode::Immediate).await?;
        debug!(imported = ids.len(), "Import finished");
        Ok(ids)
    }

    /// Wait for the background sync dispatched by an earlier write.
    pub async fn flush_sync(&self) -> Result<(), QnaError> {
        self.index.flush().await
    }
}
