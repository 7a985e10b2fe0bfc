use crate::api::ChatProvider;
use crate::config::{self, AppSettings};
use crate::conversation::ConversationStore;
use crate::models::{Message, ModelSelection};
use crate::storage::StorageError;
use dashmap::DashMap;
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Shown when a response parses but carries no reply text.
pub const EMPTY_REPLY_PLACEHOLDER: &str = "(no response)";

/// Cooperative cancellation flag, passed explicitly into [`submit`] and
/// observed between streamed fragments and between models. Once a request
/// is in flight it runs to its next suspension point; there is no timeout
/// and no retry.
#[derive(Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// Maps in-flight submission ids to their cancel tokens so another task
/// can request a stop.
#[derive(Default)]
pub struct CancelRegistry {
    inner: DashMap<Uuid, CancelToken>,
}

impl CancelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates and registers a token under a fresh submission id.
    pub fn register(&self) -> (Uuid, CancelToken) {
        let id = Uuid::new_v4();
        let token = CancelToken::new();
        self.inner.insert(id, token.clone());
        (id, token)
    }

    /// Requests cancellation of an in-flight submission. Returns false if
    /// the id is unknown (already finished or never started).
    pub fn cancel(&self, id: Uuid) -> bool {
        match self.inner.get(&id) {
            Some(token) => {
                log::info!("Cancellation signal set for submission {}", id);
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Requests cancellation of every registered submission.
    pub fn cancel_all(&self) {
        for entry in self.inner.iter() {
            entry.value().cancel();
        }
    }

    pub fn remove(&self, id: Uuid) {
        self.inner.remove(&id);
    }
}

/// Outcome of one model's turn within a submission.
#[derive(Debug)]
pub struct ModelReply {
    pub message_id: Uuid,
    pub model_id: String,
    /// Visible error text when the turn failed; also written into the
    /// assistant message content.
    pub error: Option<String>,
}

#[derive(Debug)]
pub struct DispatchOutcome {
    pub user_message_id: Uuid,
    pub replies: Vec<ModelReply>,
    pub cancelled: bool,
}

/// Submits a user message to every model in the selection, sequentially and
/// in caller order. Each model gets an assistant message that is filled in
/// from its reply (whole or streamed); a provider failure is written into
/// that one message and the loop continues with the next model. When the
/// whole selection has completed the active conversation is persisted;
/// persistence failures are returned rather than swallowed.
pub async fn submit(
    store: &mut ConversationStore,
    provider: &dyn ChatProvider,
    settings: &AppSettings,
    user_text: &str,
    selection: &ModelSelection,
    cancel: &CancelToken,
) -> Result<DispatchOutcome, StorageError> {
    let user_message_id = store.append(Message::user(user_text));
    // Context snapshot: every model sees the history up to and including
    // the new user message, never sibling replies from the same fan-out.
    let context: Vec<Message> = store.messages().to_vec();

    let mut replies = Vec::new();
    for model_id in selection.model_ids() {
        if cancel.is_cancelled() {
            log::warn!("Submission cancelled before dispatching to {}", model_id);
            break;
        }

        let message_id = store.append(Message::assistant(model_id.as_str()));
        log::info!("Dispatching to model {} (message {})", model_id, message_id);
        let error = run_model(store, provider, settings, &context, model_id, message_id, cancel).await;
        if let Some(ref error) = error {
            log::error!("Model {} turn failed: {}", model_id, error);
        }
        replies.push(ModelReply {
            message_id,
            model_id: model_id.clone(),
            error,
        });
    }

    store.archive_current().await?;
    Ok(DispatchOutcome {
        user_message_id,
        replies,
        cancelled: cancel.is_cancelled(),
    })
}

/// One model's request/response turn. Returns the visible error text when
/// the turn failed.
async fn run_model(
    store: &mut ConversationStore,
    provider: &dyn ChatProvider,
    settings: &AppSettings,
    context: &[Message],
    model_id: &str,
    message_id: Uuid,
    cancel: &CancelToken,
) -> Option<String> {
    let Some(model_config) = settings.model_config(model_id) else {
        let error = format!("Error: no configuration for model '{}'", model_id);
        store.update(message_id, error.clone());
        return Some(error);
    };

    let api_key = match config::get_api_key(model_config) {
        Ok(key) => key,
        Err(e) => {
            let error = format!("Error: {:#}", e);
            store.update(message_id, error.clone());
            return Some(error);
        }
    };

    let system_prompt = settings.system_prompt.as_deref();

    if settings.streaming {
        let mut stream = match provider
            .send_chat_stream_request(model_config, &api_key, system_prompt, context)
            .await
        {
            Ok(stream) => stream,
            Err(e) => {
                let error = format!("Error: {}", e);
                store.update(message_id, error.clone());
                return Some(error);
            }
        };

        let mut accumulated = String::new();
        while let Some(delta) = stream.next().await {
            if cancel.is_cancelled() {
                log::warn!(
                    "Cancellation requested for message {}. Stopping stream.",
                    message_id
                );
                break;
            }
            match delta {
                Ok(piece) => {
                    accumulated.push_str(&piece);
                    // Each fragment overwrites the message content with the
                    // accumulated text, in strict arrival order
                    store.update(message_id, accumulated.clone());
                }
                Err(e) => {
                    let error = format!("Error: {}", e);
                    if accumulated.is_empty() {
                        store.update(message_id, error.clone());
                    } else {
                        // Keep the partial output visible above the error
                        store.update(message_id, format!("{}\n{}", accumulated, error));
                    }
                    return Some(error);
                }
            }
        }
        None
    } else {
        match provider
            .send_chat_request(model_config, &api_key, system_prompt, context)
            .await
        {
            Ok(Some(text)) => {
                store.update(message_id, text);
                None
            }
            Ok(None) => {
                store.update(message_id, EMPTY_REPLY_PLACEHOLDER);
                None
            }
            Err(e) => {
                let error = format!("Error: {}", e);
                store.update(message_id, error.clone());
                Some(error)
            }
        }
    }
}
