use std::sync::Arc;

use common::{
    error::QnaError,
    storage::intents::{IntentDefinition, IntentStorage},
};
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::entry::Entry;

/// How a write asks the NLU engine to recompute its matching model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SyncMode {
    /// Leave the model stale; the caller syncs later, e.g. after a bulk import.
    Skip,
    /// Dispatch the sync as a task and return without waiting for it.
    #[default]
    Background,
    /// Run the sync before returning.
    Immediate,
}

/// Collapse line breaks and whitespace runs, trim, drop what is left empty.
pub fn normalize_questions(questions: &[String]) -> Vec<String> {
    questions
        .iter()
        .map(|q| q.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|q| !q.is_empty())
        .collect()
}

/// Keeps one intent per enabled entry in the NLU index.
pub struct IndexSynchronizer {
    intents: Arc<dyn IntentStorage>,
    prefix: String,
    background: Arc<Mutex<BackgroundSync>>,
}

/// Bookkeeping for the background sync task.
#[derive(Default)]
struct BackgroundSync {
    task: Option<JoinHandle<Result<(), QnaError>>>,
    running: bool,
    rerun: bool,
    /// Failure of a finished task that no `flush` has returned yet.
    unreported: Option<QnaError>,
}

impl IndexSynchronizer {
    pub fn new(intents: Arc<dyn IntentStorage>, prefix: impl Into<String>) -> Self {
        Self {
            intents,
            prefix: prefix.into(),
            background: Arc::new(Mutex::new(BackgroundSync::default())),
        }
    }

    pub fn intent_key(&self, entry_id: &str) -> String {
        format!("{}{}", self.prefix, entry_id)
    }

    /// Upsert the entry's intent when it is enabled, remove it otherwise.
    ///
    /// An enabled entry whose questions normalize to nothing still gets an
    /// intent, with no utterances.
    pub async fn reflect(&self, entry_id: &str, entry: &Entry) -> Result<(), QnaError> {
        let key = self.intent_key(entry_id);
        if !entry.is_enabled() {
            return self.intents.delete_intent(&key).await;
        }

        let utterances = normalize_questions(&entry.questions);
        if utterances.is_empty() {
            warn!(intent = %key, "Writing intent without utterances");
        }
        self.intents
            .save_intent(&key, &IntentDefinition::from_utterances(utterances))
            .await?;
        debug!(intent = %key, "Intent reflects entry");
        Ok(())
    }

    pub async fn remove(&self, entry_id: &str) -> Result<(), QnaError> {
        let key = self.intent_key(entry_id);
        self.intents.delete_intent(&key).await?;
        debug!(intent = %key, "Intent removed");
        Ok(())
    }

    /// Ask the engine to resync if it reports stale state.
    ///
    /// A background request made while a background sync is running marks
    /// that task for another pass, so every request is followed by a check.
    pub async fn request_sync(&self, mode: SyncMode) -> Result<(), QnaError> {
        match mode {
            SyncMode::Skip => Ok(()),
            SyncMode::Immediate => run_sync(self.intents.as_ref()).await,
            SyncMode::Background => {
                let mut state = self.background.lock().await;
                if state.running {
                    debug!("Sync already in flight, queueing another pass");
                    state.rerun = true;
                    return Ok(());
                }

                if let Some(finished) = state.task.take() {
                    if let Err(e) = finished.await? {
                        state.unreported.get_or_insert(e);
                    }
                }

                state.running = true;
                state.task = Some(tokio::spawn(run_background(
                    Arc::clone(&self.intents),
                    Arc::clone(&self.background),
                )));
                Ok(())
            }
        }
    }

    /// Wait for the outstanding background sync.
    ///
    /// Returns the first background failure not yet reported by a flush.
    pub async fn flush(&self) -> Result<(), QnaError> {
        let (task, unreported) = {
            let mut state = self.background.lock().await;
            (state.task.take(), state.unreported.take())
        };
        let outcome = match task {
            Some(task) => task.await?,
            None => Ok(()),
        };
        match unreported {
            Some(e) => Err(e),
            None => outcome,
        }
    }
}

/// Sync until no further pass was requested while the previous one ran.
async fn run_background(
    intents: Arc<dyn IntentStorage>,
    background: Arc<Mutex<BackgroundSync>>,
) -> Result<(), QnaError> {
    loop {
        let outcome = run_sync(intents.as_ref()).await;
        let mut state = background.lock().await;
        if let Err(e) = outcome {
            state.running = false;
            state.rerun = false;
            warn!(error = %e, "Background NLU sync failed");
            return Err(e);
        }
        if !state.rerun {
            state.running = false;
            return Ok(());
        }
        state.rerun = false;
    }
}

async fn run_sync(intents: &dyn IntentStorage) -> Result<(), QnaError> {
    if intents.check_sync_needed().await? {
        intents.sync().await?;
        info!("NLU model synced");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FlakyIntentStorage;
    use async_trait::async_trait;
    use common::storage::intents::InMemoryIntentStorage;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::Notify;

    /// Holds its first sync open, after the model was rebuilt, until released.
    struct GatedIntentStorage {
        inner: InMemoryIntentStorage,
        gated: AtomicBool,
        entered: Notify,
        release: Notify,
    }

    impl GatedIntentStorage {
        fn new() -> Self {
            Self {
                inner: InMemoryIntentStorage::new(),
                gated: AtomicBool::new(true),
                entered: Notify::new(),
                release: Notify::new(),
            }
        }
    }

    #[async_trait]
    impl IntentStorage for GatedIntentStorage {
        async fn save_intent(
            &self,
            name: &str,
            definition: &IntentDefinition,
        ) -> Result<(), QnaError> {
            self.inner.save_intent(name, definition).await
        }

        async fn delete_intent(&self, name: &str) -> Result<(), QnaError> {
            self.inner.delete_intent(name).await
        }

        async fn check_sync_needed(&self) -> Result<bool, QnaError> {
            self.inner.check_sync_needed().await
        }

        async fn sync(&self) -> Result<(), QnaError> {
            self.inner.sync().await?;
            if self.gated.swap(false, Ordering::SeqCst) {
                self.entered.notify_one();
                self.release.notified().await;
            }
            Ok(())
        }
    }

    fn questions(items: &[&str]) -> Vec<String> {
        items.iter().map(|q| q.to_string()).collect()
    }

    fn synchronizer() -> (Arc<InMemoryIntentStorage>, IndexSynchronizer) {
        let intents = Arc::new(InMemoryIntentStorage::new());
        let sync = IndexSynchronizer::new(intents.clone(), "__qna__");
        (intents, sync)
    }

    #[test]
    fn normalization_collapses_whitespace() {
        let normalized = normalize_questions(&questions(&[
            "  How\r\n are   you? ",
            "\n\n",
            "",
            "fine\tthanks",
        ]));
        assert_eq!(normalized, questions(&["How are you?", "fine thanks"]));
    }

    #[tokio::test]
    async fn enabled_entry_gets_intent() {
        let (intents, sync) = synchronizer();
        let entry = Entry::new(questions(&["Hi  there", " "]), "Hello").enabled(true);

        sync.reflect("abc_hi", &entry).await.unwrap();

        let intent = intents.get_intent("__qna__abc_hi").await.unwrap();
        assert_eq!(intent.utterances, questions(&["Hi there"]));
        assert!(intent.entities.is_empty());
    }

    #[tokio::test]
    async fn disabling_removes_intent() {
        let (intents, sync) = synchronizer();
        let entry = Entry::new(questions(&["Hi"]), "Hello").enabled(true);
        sync.reflect("abc_hi", &entry).await.unwrap();

        sync.reflect("abc_hi", &entry.clone().enabled(false))
            .await
            .unwrap();
        assert!(intents.get_intent("__qna__abc_hi").await.is_none());

        // Disabled entries without an intent are fine too
        sync.reflect("never_enabled", &entry.enabled(false))
            .await
            .unwrap();
        sync.remove("never_enabled").await.unwrap();
    }

    #[tokio::test]
    async fn empty_questions_still_write_intent() {
        let (intents, sync) = synchronizer();
        let entry = Entry::new(questions(&["   ", "\n"]), "Hello").enabled(true);

        sync.reflect("abc", &entry).await.unwrap();
        let intent = intents.get_intent("__qna__abc").await.unwrap();
        assert!(intent.utterances.is_empty());
    }

    #[tokio::test]
    async fn immediate_sync_runs_only_when_needed() {
        let (intents, sync) = synchronizer();
        sync.request_sync(SyncMode::Immediate).await.unwrap();
        assert_eq!(intents.sync_count().await, 0);

        let entry = Entry::new(questions(&["Hi"]), "Hello").enabled(true);
        sync.reflect("a", &entry).await.unwrap();
        sync.request_sync(SyncMode::Skip).await.unwrap();
        assert_eq!(intents.sync_count().await, 0);

        sync.request_sync(SyncMode::Immediate).await.unwrap();
        assert_eq!(intents.sync_count().await, 1);
    }

    #[tokio::test]
    async fn background_sync_completes_on_flush() {
        let (intents, sync) = synchronizer();
        let entry = Entry::new(questions(&["Hi"]), "Hello").enabled(true);
        sync.reflect("a", &entry).await.unwrap();

        sync.request_sync(SyncMode::Background).await.unwrap();
        sync.request_sync(SyncMode::Background).await.unwrap();
        sync.flush().await.unwrap();

        assert_eq!(intents.sync_count().await, 1);
        assert!(!intents.check_sync_needed().await.unwrap());
    }

    #[tokio::test]
    async fn write_during_running_sync_gets_its_own_pass() {
        let intents = Arc::new(GatedIntentStorage::new());
        let sync = IndexSynchronizer::new(intents.clone(), "__qna__");
        let entry = Entry::new(questions(&["Hi"]), "Hello").enabled(true);

        sync.reflect("a", &entry).await.unwrap();
        sync.request_sync(SyncMode::Background).await.unwrap();
        intents.entered.notified().await;

        // The running pass has already rebuilt the model without "b"
        sync.reflect("b", &entry).await.unwrap();
        sync.request_sync(SyncMode::Background).await.unwrap();
        intents.release.notify_one();
        sync.flush().await.unwrap();

        assert!(!intents.check_sync_needed().await.unwrap());
        assert_eq!(intents.inner.sync_count().await, 2);
    }

    #[tokio::test]
    async fn unflushed_failure_is_kept_for_next_flush() {
        let intents = Arc::new(FlakyIntentStorage::new());
        let sync = IndexSynchronizer::new(intents.clone(), "__qna__");
        let entry = Entry::new(questions(&["Hi"]), "Hello").enabled(true);

        intents.set_failing(true);
        sync.request_sync(SyncMode::Background).await.unwrap();
        // Let the failing task finish before the next request replaces it
        while sync.background.lock().await.running {
            tokio::task::yield_now().await;
        }

        intents.set_failing(false);
        sync.reflect("a", &entry).await.unwrap();
        sync.request_sync(SyncMode::Background).await.unwrap();

        let err = sync.flush().await.unwrap_err();
        assert!(matches!(err, QnaError::ProviderUnavailable(_)));
        // The second task still ran to completion
        assert!(!intents.check_sync_needed().await.unwrap());
        sync.flush().await.unwrap();
    }

    #[tokio::test]
    async fn background_failure_is_reported_by_flush() {
        let intents = Arc::new(FlakyIntentStorage::new());
        let sync = IndexSynchronizer::new(intents.clone(), "__qna__");
        intents.set_failing(true);

        sync.request_sync(SyncMode::Background).await.unwrap();
        assert!(sync.flush().await.is_err());

        // Nothing pending any more
        sync.flush().await.unwrap();
    }
}
