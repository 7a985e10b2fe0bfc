use async_trait::async_trait;
use futures::stream;
use polychat::api::{ChatProvider, DeltaStream, ProviderError};
use polychat::config::AppSettings;
use polychat::conversation::ConversationStore;
use polychat::dispatch::{submit, CancelToken, EMPTY_REPLY_PLACEHOLDER};
use polychat::models::{Message, ModelConfig, ModelSelection, Role};
use polychat::storage::StorageManager;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

const MOCK_KEY_VAR: &str = "POLYCHAT_MOCK_KEY";

/// What the mock provider does for one model id.
enum Script {
    Reply(String),
    Fragments(Vec<String>),
    FragmentsThenFail(Vec<String>, String),
    Fail(String),
    EmptyShape,
}

/// Scripted provider: replies are looked up by model id, and every call is
/// recorded so tests can assert dispatch order.
struct MockProvider {
    scripts: HashMap<String, Script>,
    calls: Mutex<Vec<String>>,
}

impl MockProvider {
    fn new(scripts: Vec<(&str, Script)>) -> Self {
        Self {
            scripts: scripts
                .into_iter()
                .map(|(model, script)| (model.to_string(), script))
                .collect(),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatProvider for MockProvider {
    async fn send_chat_request(
        &self,
        config: &ModelConfig,
        _api_key: &str,
        _system_prompt: Option<&str>,
        _messages: &[Message],
    ) -> Result<Option<String>, ProviderError> {
        self.calls.lock().unwrap().push(config.model.clone());
        match self.scripts.get(&config.model) {
            Some(Script::Reply(text)) => Ok(Some(text.clone())),
            Some(Script::Fragments(parts)) | Some(Script::FragmentsThenFail(parts, _)) => {
                Ok(Some(parts.concat()))
            }
            Some(Script::Fail(message)) => Err(ProviderError::RequestFailed(message.clone())),
            Some(Script::EmptyShape) => Ok(None),
            None => Err(ProviderError::RequestFailed("unscripted model".to_string())),
        }
    }

    async fn send_chat_stream_request(
        &self,
        config: &ModelConfig,
        _api_key: &str,
        _system_prompt: Option<&str>,
        _messages: &[Message],
    ) -> Result<DeltaStream, ProviderError> {
        self.calls.lock().unwrap().push(config.model.clone());
        let items: Vec<Result<String, ProviderError>> = match self.scripts.get(&config.model) {
            Some(Script::Reply(text)) => vec![Ok(text.clone())],
            Some(Script::Fragments(parts)) => parts.iter().cloned().map(Ok).collect(),
            Some(Script::FragmentsThenFail(parts, message)) => {
                let mut items: Vec<Result<String, ProviderError>> =
                    parts.iter().cloned().map(Ok).collect();
                items.push(Err(ProviderError::RequestFailed(message.clone())));
                items
            }
            Some(Script::Fail(message)) => {
                return Err(ProviderError::RequestFailed(message.clone()))
            }
            Some(Script::EmptyShape) => Vec::new(),
            None => return Err(ProviderError::RequestFailed("unscripted model".to_string())),
        };
        Ok(Box::pin(stream::iter(items)))
    }
}

async fn new_store() -> (Arc<StorageManager>, ConversationStore) {
    let storage = Arc::new(StorageManager::open_in_memory().await.unwrap());
    let store = ConversationStore::new(storage.clone()).await.unwrap();
    (storage, store)
}

fn settings_for(models: &[&str], streaming: bool) -> AppSettings {
    std::env::set_var(MOCK_KEY_VAR, "sk-mock");
    let mut settings = AppSettings::default();
    settings.streaming = streaming;
    settings.models = models
        .iter()
        .map(|model| ModelConfig {
            model: model.to_string(),
            api_url: "http://localhost:0/v1".to_string(),
            api_key_ref: Some(format!("env:{}", MOCK_KEY_VAR)),
        })
        .collect();
    settings.selection = match models {
        [single] => ModelSelection::single(*single),
        many => ModelSelection::multi(many.iter().copied()),
    };
    settings
}

#[tokio::test]
async fn single_model_non_streaming_exchange() {
    let (_storage, mut store) = new_store().await;
    let settings = settings_for(&["gpt-4o-mini"], false);
    let provider = MockProvider::new(vec![("gpt-4o-mini", Script::Reply("Hi there".to_string()))]);

    let outcome = submit(
        &mut store,
        &provider,
        &settings,
        "Hello",
        &settings.selection,
        &CancelToken::new(),
    )
    .await
    .unwrap();

    let messages = store.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[0].content, "Hello");
    assert_eq!(messages[1].role, Role::Assistant);
    assert_eq!(messages[1].content, "Hi there");
    assert_eq!(messages[1].model_id.as_deref(), Some("gpt-4o-mini"));
    assert!(outcome.replies[0].error.is_none());
}

#[tokio::test]
async fn failing_model_does_not_abort_the_rest() {
    let (_storage, mut store) = new_store().await;
    let settings = settings_for(&["m1", "m2"], false);
    let provider = MockProvider::new(vec![
        ("m1", Script::Reply("A".to_string())),
        ("m2", Script::Fail("connection refused".to_string())),
    ]);

    let outcome = submit(
        &mut store,
        &provider,
        &settings,
        "fan out",
        &settings.selection,
        &CancelToken::new(),
    )
    .await
    .unwrap();

    let messages = store.messages();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[1].content, "A");
    assert_eq!(messages[1].model_id.as_deref(), Some("m1"));
    assert!(messages[2].content.contains("Error"));
    assert!(messages[2].content.contains("connection refused"));
    assert_eq!(messages[2].model_id.as_deref(), Some("m2"));

    // m2 was attempted even though it failed, after m1 completed
    assert_eq!(provider.calls(), ["m1", "m2"]);
    assert!(outcome.replies[0].error.is_none());
    assert!(outcome.replies[1].error.is_some());
}

#[tokio::test]
async fn failure_order_does_not_matter() {
    let (_storage, mut store) = new_store().await;
    let settings = settings_for(&["m1", "m2"], false);
    let provider = MockProvider::new(vec![
        ("m1", Script::Fail("boom".to_string())),
        ("m2", Script::Reply("B".to_string())),
    ]);

    submit(
        &mut store,
        &provider,
        &settings,
        "fan out",
        &settings.selection,
        &CancelToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(provider.calls(), ["m1", "m2"]);
    assert_eq!(store.messages()[2].content, "B");
}

#[tokio::test]
async fn streaming_accumulates_fragments_in_order() {
    let (_storage, mut store) = new_store().await;
    let settings = settings_for(&["m1"], true);
    let provider = MockProvider::new(vec![(
        "m1",
        Script::Fragments(vec!["Hel".to_string(), "lo ".to_string(), "world".to_string()]),
    )]);

    submit(
        &mut store,
        &provider,
        &settings,
        "stream it",
        &settings.selection,
        &CancelToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(store.messages()[1].content, "Hello world");
}

#[tokio::test]
async fn stream_error_keeps_partial_output_visible() {
    let (_storage, mut store) = new_store().await;
    let settings = settings_for(&["m1"], true);
    let provider = MockProvider::new(vec![(
        "m1",
        Script::FragmentsThenFail(vec!["partial".to_string()], "reset by peer".to_string()),
    )]);

    let outcome = submit(
        &mut store,
        &provider,
        &settings,
        "stream it",
        &settings.selection,
        &CancelToken::new(),
    )
    .await
    .unwrap();

    let content = &store.messages()[1].content;
    assert!(content.starts_with("partial"));
    assert!(content.contains("reset by peer"));
    assert!(outcome.replies[0].error.is_some());
}

#[tokio::test]
async fn empty_response_shape_renders_placeholder() {
    let (_storage, mut store) = new_store().await;
    let settings = settings_for(&["m1"], false);
    let provider = MockProvider::new(vec![("m1", Script::EmptyShape)]);

    submit(
        &mut store,
        &provider,
        &settings,
        "anyone there?",
        &settings.selection,
        &CancelToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(store.messages()[1].content, EMPTY_REPLY_PLACEHOLDER);
}

#[tokio::test]
async fn unconfigured_model_gets_visible_error() {
    let (_storage, mut store) = new_store().await;
    let mut settings = settings_for(&["m1"], false);
    settings.selection = ModelSelection::multi(["m1", "ghost"]);
    let provider = MockProvider::new(vec![("m1", Script::Reply("A".to_string()))]);

    submit(
        &mut store,
        &provider,
        &settings,
        "hello",
        &settings.selection,
        &CancelToken::new(),
    )
    .await
    .unwrap();

    let messages = store.messages();
    assert_eq!(messages.len(), 3);
    assert!(messages[2].content.contains("no configuration for model 'ghost'"));
    // The provider was never asked about the unconfigured model
    assert_eq!(provider.calls(), ["m1"]);
}

#[tokio::test]
async fn cancelled_token_skips_dispatch() {
    let (_storage, mut store) = new_store().await;
    let settings = settings_for(&["m1"], true);
    let provider = MockProvider::new(vec![(
        "m1",
        Script::Fragments(vec!["never seen".to_string()]),
    )]);

    let token = CancelToken::new();
    token.cancel();
    let outcome = submit(
        &mut store,
        &provider,
        &settings,
        "stop me",
        &settings.selection,
        &token,
    )
    .await
    .unwrap();

    assert!(outcome.cancelled);
    assert!(outcome.replies.is_empty());
    // Only the user message made it in
    assert_eq!(store.messages().len(), 1);
    assert!(provider.calls().is_empty());
}

#[tokio::test]
async fn completed_submission_is_persisted() {
    let (storage, mut store) = new_store().await;
    let settings = settings_for(&["m1"], false);
    let provider = MockProvider::new(vec![("m1", Script::Reply("Hi there".to_string()))]);

    submit(
        &mut store,
        &provider,
        &settings,
        "Hello",
        &settings.selection,
        &CancelToken::new(),
    )
    .await
    .unwrap();

    // A store reopened over the same storage sees the conversation
    let reopened = ConversationStore::new(storage).await.unwrap();
    assert_eq!(reopened.history().conversations.len(), 1);
    let archived = reopened.history().conversations.values().next().unwrap();
    assert_eq!(archived.title, "Hello");
    assert_eq!(archived.messages.len(), 2);
    assert_eq!(archived.messages[1].content, "Hi there");
}
