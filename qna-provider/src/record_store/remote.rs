use std::sync::Arc;

use async_trait::async_trait;
use common::error::QnaError;
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::RecordStore;
use crate::{
    entry::{Entry, Page, StoredEntry},
    knowledge_base::{CreateKnowledgeBase, KnowledgeBaseClient, KnowledgeBasePatch, QnaDocument},
    metadata::{decode, encode_fields, fields_from_metadata, MetadataPair},
};

/// Metadata name carrying the entry id, since the service assigns its own
/// numeric document ids.
pub const ENTRY_ID_METADATA: &str = "entryId";

/// Mirrors entries into a named knowledge base of the hosted service.
pub struct RemoteRecordStore {
    client: Arc<dyn KnowledgeBaseClient>,
    knowledgebase_name: String,
    default_source: String,
    knowledgebase_id: OnceCell<String>,
}

impl RemoteRecordStore {
    pub fn new(
        client: Arc<dyn KnowledgeBaseClient>,
        knowledgebase_name: impl Into<String>,
        default_source: impl Into<String>,
    ) -> Self {
        Self {
            client,
            knowledgebase_name: knowledgebase_name.into(),
            default_source: default_source.into(),
            knowledgebase_id: OnceCell::new(),
        }
    }

    /// Id of the knowledge base once `initialize` has located it.
    pub fn knowledgebase_id(&self) -> Option<&str> {
        self.knowledgebase_id.get().map(String::as_str)
    }

    fn require_knowledgebase(&self) -> Result<&str, QnaError> {
        self.knowledgebase_id().ok_or_else(|| {
            QnaError::NotInitialized(format!(
                "knowledge base '{}' has not been located",
                self.knowledgebase_name
            ))
        })
    }

    async fn find_knowledgebase(&self) -> Result<Option<String>, QnaError> {
        Ok(self
            .client
            .list_knowledgebases()
            .await?
            .into_iter()
            .find(|kb| kb.name == self.knowledgebase_name)
            .map(|kb| kb.id))
    }

    async fn locate_or_create(&self) -> Result<String, QnaError> {
        if let Some(id) = self.find_knowledgebase().await? {
            return Ok(id);
        }

        info!(knowledgebase = %self.knowledgebase_name, "Creating knowledge base");
        self.client
            .create_knowledgebase(&CreateKnowledgeBase::empty(&self.knowledgebase_name))
            .await?;

        self.find_knowledgebase().await?.ok_or_else(|| {
            QnaError::ProviderUnavailable(format!(
                "knowledge base '{}' missing after creation",
                self.knowledgebase_name
            ))
        })
    }

    async fn documents(&self) -> Result<Vec<QnaDocument>, QnaError> {
        let knowledgebase_id = self.require_knowledgebase()?;
        self.client.list_documents(knowledgebase_id).await
    }

    async fn server_ids(&self, id: &str) -> Result<Vec<u64>, QnaError> {
        Ok(matching_documents(self.documents().await?, id)
            .iter()
            .map(|doc| doc.id)
            .collect())
    }

    fn to_document(&self, id: &str, entry: &Entry) -> QnaDocument {
        let mut metadata = encode_fields(&entry.fields);
        metadata.push(MetadataPair::new(ENTRY_ID_METADATA, id));

        QnaDocument {
            id: 0,
            answer: entry.answer.clone(),
            questions: entry.questions.clone(),
            source: Some(
                entry
                    .source
                    .clone()
                    .unwrap_or_else(|| self.default_source.clone()),
            ),
            metadata,
        }
    }
}

fn tagged_entry_id(doc: &QnaDocument) -> Option<&str> {
    doc.metadata
        .iter()
        .find(|pair| pair.name == ENTRY_ID_METADATA)
        .and_then(|pair| match &pair.value {
            Value::String(s) if !s.is_empty() => Some(s.as_str()),
            _ => None,
        })
}

/// Documents created outside this store have no entry id and are addressed
/// by their server id.
fn document_entry_id(doc: &QnaDocument) -> String {
    tagged_entry_id(doc)
        .map(str::to_owned)
        .unwrap_or_else(|| doc.id.to_string())
}

/// Documents stored under `id`. A tagged entry id wins over an untagged
/// document whose server id happens to read the same.
fn matching_documents(documents: Vec<QnaDocument>, id: &str) -> Vec<QnaDocument> {
    let (tagged, untagged): (Vec<_>, Vec<_>) = documents
        .into_iter()
        .partition(|doc| tagged_entry_id(doc).is_some());

    let tagged: Vec<_> = tagged
        .into_iter()
        .filter(|doc| tagged_entry_id(doc) == Some(id))
        .collect();
    if !tagged.is_empty() {
        return tagged;
    }
    untagged
        .into_iter()
        .filter(|doc| doc.id.to_string() == id)
        .collect()
}

fn to_stored(doc: QnaDocument) -> StoredEntry {
    let id = document_entry_id(&doc);
    let mut decoded = decode(&doc.metadata);
    decoded.remove(ENTRY_ID_METADATA);

    StoredEntry {
        id,
        data: Entry {
            questions: doc.questions,
            answer: doc.answer,
            fields: fields_from_metadata(&decoded),
            source: doc.source,
        },
    }
}

#[async_trait]
impl RecordStore for RemoteRecordStore {
    fn backend_name(&self) -> &'static str {
        "remote"
    }

    async fn initialize(&self) -> Result<(), QnaError> {
        let id = self
            .knowledgebase_id
            .get_or_try_init(|| async {
                self.locate_or_create().await.map_err(|e| match e {
                    QnaError::ProviderUnavailable(_) => e,
                    other => QnaError::ProviderUnavailable(format!(
                        "could not locate knowledge base '{}': {other}",
                        self.knowledgebase_name
                    )),
                })
            })
            .await?;
        info!(knowledgebase = %self.knowledgebase_name, knowledgebase_id = %id, "Remote record store initialized");
        Ok(())
    }

    async fn put(&self, id: &str, entry: &Entry) -> Result<(), QnaError> {
        let knowledgebase_id = self.require_knowledgebase()?;
        let old_ids = self.server_ids(id).await?;
        let patch = KnowledgeBasePatch::replace(self.to_document(id, entry), old_ids);

        self.client
            .update_knowledgebase(knowledgebase_id, &patch)
            .await?;
        debug!(entry_id = %id, knowledgebase_id = %knowledgebase_id, "Replaced knowledge-base document");
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<StoredEntry, QnaError> {
        matching_documents(self.documents().await?, id)
            .into_iter()
            .next()
            .map(to_stored)
            .ok_or_else(|| QnaError::NotFound(format!("entry '{id}'")))
    }

    async fn list(&self, page: Page) -> Result<Vec<StoredEntry>, QnaError> {
        let documents = self.documents().await?;
        Ok(page.apply(documents).into_iter().map(to_stored).collect())
    }

    async fn count(&self) -> Result<usize, QnaError> {
        Ok(self.documents().await?.len())
    }

    async fn remove(&self, id: &str) -> Result<(), QnaError> {
        let knowledgebase_id = self.require_knowledgebase()?;
        let old_ids = self.server_ids(id).await?;
        if old_ids.is_empty() {
            debug!(entry_id = %id, "Document already absent");
            return Ok(());
        }

        self.client
            .update_knowledgebase(knowledgebase_id, &KnowledgeBasePatch::delete(old_ids))
            .await
    }
}
