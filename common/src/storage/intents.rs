use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::store::StorageManager;
use crate::error::QnaError;

/// File holding the snapshot written by [`StoredIntentStorage::sync`].
pub const MODEL_FILE: &str = "_model.json";

/// Training data for one intent of the NLU engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentDefinition {
    pub entities: Vec<String>,
    pub utterances: Vec<String>,
}

impl IntentDefinition {
    pub fn from_utterances(utterances: Vec<String>) -> Self {
        Self {
            entities: Vec::new(),
            utterances,
        }
    }
}

/// Intent capability of the NLU engine.
#[async_trait]
pub trait IntentStorage: Send + Sync {
    async fn save_intent(&self, key: &str, intent: &IntentDefinition) -> Result<(), QnaError>;

    /// Removing an intent that does not exist succeeds.
    async fn delete_intent(&self, key: &str) -> Result<(), QnaError>;

    async fn check_sync_needed(&self) -> Result<bool, QnaError>;

    /// Recompute the matching model from the stored intents.
    async fn sync(&self) -> Result<(), QnaError>;
}

#[derive(Default)]
struct MemoryState {
    intents: BTreeMap<String, IntentDefinition>,
    dirty: bool,
    syncs: usize,
}

/// Map-backed intent storage for embedding hosts and tests.
#[derive(Default)]
pub struct InMemoryIntentStorage {
    state: Mutex<MemoryState>,
}

impl InMemoryIntentStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_intent(&self, key: &str) -> Option<IntentDefinition> {
        self.state.lock().await.intents.get(key).cloned()
    }

    pub async fn intent_keys(&self) -> Vec<String> {
        self.state.lock().await.intents.keys().cloned().collect()
    }

    /// Number of completed [`IntentStorage::sync`] calls.
    pub async fn sync_count(&self) -> usize {
        self.state.lock().await.syncs
    }
}

#[async_trait]
impl IntentStorage for InMemoryIntentStorage {
    async fn save_intent(&self, key: &str, intent: &IntentDefinition) -> Result<(), QnaError> {
        let mut state = self.state.lock().await;
        state.intents.insert(key.to_string(), intent.clone());
        state.dirty = true;
        Ok(())
    }

    async fn delete_intent(&self, key: &str) -> Result<(), QnaError> {
        let mut state = self.state.lock().await;
        if state.intents.remove(key).is_some() {
            state.dirty = true;
        }
        Ok(())
    }

    async fn check_sync_needed(&self) -> Result<bool, QnaError> {
        Ok(self.state.lock().await.dirty)
    }

    async fn sync(&self) -> Result<(), QnaError> {
        let mut state = self.state.lock().await;
        state.dirty = false;
        state.syncs = state.syncs.saturating_add(1);
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelSnapshot {
    pub intents: Vec<ModelIntent>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelIntent {
    pub name: String,
    pub utterances: usize,
}

/// Intent storage persisting one JSON file per intent through a [`StorageManager`].
pub struct StoredIntentStorage {
    storage: StorageManager,
    dir: String,
    dirty: AtomicBool,
}

impl StoredIntentStorage {
    /// Starts dirty so the first sync after a restart rebuilds the model.
    pub fn new(storage: StorageManager, dir: impl Into<String>) -> Self {
        Self {
            storage,
            dir: dir.into(),
            dirty: AtomicBool::new(true),
        }
    }

    fn location(&self, name: &str) -> String {
        format!("{}/{}", self.dir.trim_end_matches('/'), name)
    }

    fn intent_location(&self, key: &str) -> Result<String, QnaError> {
        if key.is_empty() || key.contains('/') || key.contains("..") {
            return Err(QnaError::InvalidEntry(format!("invalid intent key '{key}'")));
        }
        Ok(self.location(&format!("{key}.json")))
    }

    pub async fn get_intent(&self, key: &str) -> Result<IntentDefinition, QnaError> {
        let bytes = self.storage.get(&self.intent_location(key)?).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Keys of every stored intent, sorted.
    pub async fn intent_keys(&self) -> Result<Vec<String>, QnaError> {
        let names = match self.storage.relative_names(&self.dir).await {
            Ok(names) => names,
            Err(object_store::Error::NotFound { .. }) => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(names
            .into_iter()
            .filter(|name| name != MODEL_FILE)
            .filter_map(|name| name.strip_suffix(".json").map(str::to_string))
            .collect())
    }

    pub async fn model_snapshot(&self) -> Result<ModelSnapshot, QnaError> {
        let bytes = self.storage.get(&self.location(MODEL_FILE)).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn rebuild_model(&self) -> Result<usize, QnaError> {
        let mut intents = Vec::new();
        for key in self.intent_keys().await? {
            let definition = self.get_intent(&key).await?;
            intents.push(ModelIntent {
                name: key,
                utterances: definition.utterances.len(),
            });
        }

        let count = intents.len();
        let snapshot = serde_json::to_vec_pretty(&ModelSnapshot { intents })?;
        self.storage
            .put(&self.location(MODEL_FILE), Bytes::from(snapshot))
            .await?;
        Ok(count)
    }
}

#[async_trait]
impl IntentStorage for StoredIntentStorage {
    async fn save_intent(&self, key: &str, intent: &IntentDefinition) -> Result<(), QnaError> {
        let location = self.intent_location(key)?;
        let payload = serde_json::to_vec_pretty(intent)?;
        self.storage.put(&location, Bytes::from(payload)).await?;
        self.dirty.store(true, Ordering::SeqCst);
        debug!(intent = %key, utterances = intent.utterances.len(), "Saved intent");
        Ok(())
    }

    async fn delete_intent(&self, key: &str) -> Result<(), QnaError> {
        let location = self.intent_location(key)?;
        if !self.storage.exists(&location).await? {
            return Ok(());
        }
        self.storage.delete(&location).await?;
        self.dirty.store(true, Ordering::SeqCst);
        debug!(intent = %key, "Deleted intent");
        Ok(())
    }

    async fn check_sync_needed(&self) -> Result<bool, QnaError> {
        Ok(self.dirty.load(Ordering::SeqCst))
    }

    async fn sync(&self) -> Result<(), QnaError> {
        // Cleared up front so writes landing mid-rebuild mark the model dirty again.
        self.dirty.store(false, Ordering::SeqCst);
        match self.rebuild_model().await {
            Ok(count) => {
                info!(intents = count, "Rebuilt intent model");
                Ok(())
            }
            Err(e) => {
                self.dirty.store(true, Ordering::SeqCst);
                Err(e)
            }
        }
    }
}
