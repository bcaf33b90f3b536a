//! In-memory stand-ins for the host capabilities.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use common::{
    error::QnaError,
    storage::intents::{InMemoryIntentStorage, IntentDefinition, IntentStorage},
};
use tokio::sync::Mutex;

use crate::{
    knowledge_base::{
        CreateKnowledgeBase, KnowledgeBaseClient, KnowledgeBasePatch, KnowledgeBaseSummary,
        QnaDocument,
    },
    metadata::MetadataPair,
};

#[derive(Default)]
struct FakeState {
    knowledgebases: Vec<KnowledgeBaseSummary>,
    documents: HashMap<String, Vec<QnaDocument>>,
    next_document_id: u64,
    create_calls: usize,
    patches: Vec<KnowledgeBasePatch>,
    unavailable: bool,
}

impl FakeState {
    fn check_available(&self) -> Result<(), QnaError> {
        if self.unavailable {
            Err(QnaError::ProviderUnavailable(
                "fake knowledge base offline".into(),
            ))
        } else {
            Ok(())
        }
    }

    fn assign_id(&mut self) -> u64 {
        self.next_document_id = self.next_document_id.saturating_add(1);
        self.next_document_id
    }
}

/// Knowledge-base service kept in memory, applying patches the way the
/// hosted service does: deletions and additions in one step.
#[derive(Default)]
pub struct FakeKnowledgeBase {
    state: Mutex<FakeState>,
}

impl FakeKnowledgeBase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_knowledgebase(id: &str, name: &str) -> Self {
        let mut fake = Self::default();
        let state = fake.state.get_mut();
        state.knowledgebases.push(KnowledgeBaseSummary {
            id: id.into(),
            name: name.into(),
        });
        state.documents.insert(id.into(), Vec::new());
        fake
    }

    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().await.unavailable = unavailable;
    }

    pub async fn create_calls(&self) -> usize {
        self.state.lock().await.create_calls
    }

    pub async fn patches(&self) -> Vec<KnowledgeBasePatch> {
        self.state.lock().await.patches.clone()
    }

    pub async fn documents(&self, knowledgebase_id: &str) -> Vec<QnaDocument> {
        self.state
            .lock()
            .await
            .documents
            .get(knowledgebase_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Add a document the way another editor of the knowledge base would,
    /// returning its server id.
    pub async fn seed_document(
        &self,
        knowledgebase_id: &str,
        questions: Vec<String>,
        answer: &str,
        metadata: Vec<MetadataPair>,
    ) -> u64 {
        let mut state = self.state.lock().await;
        let id = state.assign_id();
        state
            .documents
            .entry(knowledgebase_id.to_string())
            .or_default()
            .push(QnaDocument {
                id,
                answer: answer.into(),
                questions,
                source: Some("Editorial".into()),
                metadata,
            });
        id
    }
}

#[async_trait]
impl KnowledgeBaseClient for FakeKnowledgeBase {
    async fn list_knowledgebases(&self) -> Result<Vec<KnowledgeBaseSummary>, QnaError> {
        let state = self.state.lock().await;
        state.check_available()?;
        Ok(state.knowledgebases.clone())
    }

    async fn create_knowledgebase(&self, request: &CreateKnowledgeBase) -> Result<(), QnaError> {
        let mut state = self.state.lock().await;
        state.check_available()?;
        state.create_calls = state.create_calls.saturating_add(1);
        let id = format!("kb-created-{}", state.create_calls);
        state.knowledgebases.push(KnowledgeBaseSummary {
            id: id.clone(),
            name: request.name.clone(),
        });
        state.documents.insert(id, request.qna_list.clone());
        Ok(())
    }

    async fn update_knowledgebase(
        &self,
        knowledgebase_id: &str,
        patch: &KnowledgeBasePatch,
    ) -> Result<(), QnaError> {
        let mut state = self.state.lock().await;
        state.check_available()?;

        let mut documents = state
            .documents
            .get(knowledgebase_id)
            .cloned()
            .ok_or_else(|| QnaError::NotFound(format!("knowledge base '{knowledgebase_id}'")))?;

        if let Some(deletion) = &patch.delete {
            documents.retain(|doc| !deletion.ids.contains(&doc.id));
        }
        if let Some(addition) = &patch.add {
            for doc in &addition.qna_list {
                let mut doc = doc.clone();
                doc.id = state.assign_id();
                documents.push(doc);
            }
        }

        state.documents.insert(knowledgebase_id.to_string(), documents);
        state.patches.push(patch.clone());
        Ok(())
    }

    async fn list_documents(&self, knowledgebase_id: &str) -> Result<Vec<QnaDocument>, QnaError> {
        let state = self.state.lock().await;
        state.check_available()?;
        state
            .documents
            .get(knowledgebase_id)
            .cloned()
            .ok_or_else(|| QnaError::NotFound(format!("knowledge base '{knowledgebase_id}'")))
    }
}

/// In-memory intent storage whose calls can be switched to fail.
#[derive(Default)]
pub struct FlakyIntentStorage {
    pub inner: InMemoryIntentStorage,
    failing: AtomicBool,
    failing_sync: AtomicBool,
}

impl FlakyIntentStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Fail only `sync`, leaving intent writes working.
    pub fn set_failing_sync(&self, failing: bool) {
        self.failing_sync.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), QnaError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(QnaError::ProviderUnavailable("intent storage offline".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl IntentStorage for FlakyIntentStorage {
    async fn save_intent(&self, key: &str, intent: &IntentDefinition) -> Result<(), QnaError> {
        self.check()?;
        self.inner.save_intent(key, intent).await
    }

    async fn delete_intent(&self, key: &str) -> Result<(), QnaError> {
        self.check()?;
        self.inner.delete_intent(key).await
    }

    async fn check_sync_needed(&self) -> Result<bool, QnaError> {
        self.check()?;
        self.inner.check_sync_needed().await
    }

    async fn sync(&self) -> Result<(), QnaError> {
        self.check()?;
        if self.failing_sync.load(Ordering::SeqCst) {
            return Err(QnaError::ProviderUnavailable("NLU sync failed".into()));
        }
        self.inner.sync().await
    }
}
