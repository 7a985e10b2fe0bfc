use crate::api::{ChatProvider, OpenAICompatibleProvider};
use crate::config::AppSettings;
use crate::conversation::ConversationStore;
use crate::dispatch::{self, CancelRegistry, DispatchOutcome};
use crate::media::MediaClient;
use crate::models::ModelSelection;
use crate::storage::{StorageError, StorageManager};
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;

// Core application state: storage, the conversation store, settings, the
// provider and the cancellation registry. No ambient globals; everything a
// caller needs hangs off this struct.
pub struct AppState {
    pub storage: Arc<StorageManager>,
    pub store: ConversationStore,
    pub settings: AppSettings,
    pub provider: Arc<dyn ChatProvider>,
    pub media: MediaClient,
    pub cancellations: Arc<CancelRegistry>,
}

impl AppState {
    /// Opens storage under `data_dir`, loads settings and history, and
    /// wires up the default OpenAI-compatible provider.
    pub async fn init(data_dir: &Path) -> Result<Self> {
        let storage = Arc::new(
            StorageManager::open(data_dir)
                .await
                .context("Failed to open storage")?,
        );
        let settings = AppSettings::load(&storage)
            .await
            .context("Failed to load settings")?;
        let store = ConversationStore::new(storage.clone())
            .await
            .context("Failed to load chat history")?;
        let provider: Arc<dyn ChatProvider> = Arc::new(OpenAICompatibleProvider::new());

        Ok(Self {
            storage,
            store,
            settings,
            provider,
            media: MediaClient::new(),
            cancellations: Arc::new(CancelRegistry::new()),
        })
    }

    /// State over an in-memory database with a caller-supplied provider.
    /// Used by tests and embedders that bring their own transport.
    pub async fn with_provider(provider: Arc<dyn ChatProvider>) -> Result<Self> {
        let storage = Arc::new(
            StorageManager::open_in_memory()
                .await
                .context("Failed to open in-memory storage")?,
        );
        let settings = AppSettings::load(&storage)
            .await
            .context("Failed to load settings")?;
        let store = ConversationStore::new(storage.clone())
            .await
            .context("Failed to load chat history")?;

        Ok(Self {
            storage,
            store,
            settings,
            provider,
            media: MediaClient::new(),
            cancellations: Arc::new(CancelRegistry::new()),
        })
    }

    /// Submits a user message to the currently selected model(s).
    pub async fn submit(&mut self, user_text: &str) -> Result<DispatchOutcome, StorageError> {
        let selection = self.settings.selection.clone();
        self.submit_to(user_text, &selection).await
    }

    /// Submits a user message to an explicit selection, registering a
    /// cancel token for the lifetime of the dispatch.
    pub async fn submit_to(
        &mut self,
        user_text: &str,
        selection: &ModelSelection,
    ) -> Result<DispatchOutcome, StorageError> {
        let (submission_id, token) = self.cancellations.register();
        let provider = self.provider.clone();
        let result = dispatch::submit(
            &mut self.store,
            provider.as_ref(),
            &self.settings,
            user_text,
            selection,
            &token,
        )
        .await;
        self.cancellations.remove(submission_id);
        result
    }

    /// Requests a stop of every in-flight submission.
    pub fn stop_generation(&self) {
        self.cancellations.cancel_all();
    }

    pub async fn save_settings(&self) -> Result<(), StorageError> {
        self.settings.save(&self.storage).await
    }
}
