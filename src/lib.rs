//! Multi-model chat client core: conversation store with wholesale JSON
//! persistence, sequential multi-model dispatch with streaming, settings,
//! auxiliary media operations and a small markdown formatter.

// Declare the modules
pub mod api;
pub mod config;
pub mod conversation;
pub mod dispatch;
pub mod markdown;
pub mod media;
pub mod models;
pub mod state;
pub mod storage;

pub use api::{ChatProvider, DeltaStream, OpenAICompatibleProvider, ProviderError};
pub use config::{AppSettings, Theme};
pub use conversation::ConversationStore;
pub use dispatch::{submit, CancelRegistry, CancelToken, DispatchOutcome, ModelReply};
pub use markdown::render_markdown;
pub use media::{GeneratedImage, MediaClient};
pub use models::{ChatHistory, Conversation, Message, ModelConfig, ModelSelection, Role};
pub use state::AppState;
pub use storage::{StorageError, StorageManager};
