use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Schema version written into the persisted history blob.
pub const HISTORY_SCHEMA_VERSION: u32 = 1;

// Who authored a message.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

// Represents a single message in a conversation
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Message {
    #[serde(default = "Uuid::new_v4")] // Generate a new UUID if missing during deserialization
    pub id: Uuid,
    pub role: Role,
    pub content: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    // Which model produced an assistant reply; absent on user messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: Role::User,
            content: content.into(),
            timestamp: Utc::now(),
            model_id: None,
        }
    }

    /// An assistant message starts empty; its content is overwritten as the
    /// reply (or each streamed fragment) arrives.
    pub fn assistant(model_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: Role::Assistant,
            content: String::new(),
            timestamp: Utc::now(),
            model_id: Some(model_id.into()),
        }
    }
}

// Represents an archived conversation thread
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Conversation {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub title: String, // Fixed at archive time, never recomputed
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    pub messages: Vec<Message>,
}

/// The archive of past conversations, persisted wholesale as one JSON blob.
/// Unknown fields are ignored on load; a missing `version` reads as 1.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ChatHistory {
    #[serde(default = "default_history_version")]
    pub version: u32,
    #[serde(default)]
    pub conversations: HashMap<Uuid, Conversation>,
}

fn default_history_version() -> u32 {
    HISTORY_SCHEMA_VERSION
}

impl Default for ChatHistory {
    fn default() -> Self {
        Self {
            version: HISTORY_SCHEMA_VERSION,
            conversations: HashMap::new(),
        }
    }
}

// Which models a submission fans out to. Single and multi mode are
// mutually exclusive by construction.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ModelSelection {
    Single { model: String },
    Multi { models: Vec<String> },
}

impl ModelSelection {
    pub fn single(model: impl Into<String>) -> Self {
        Self::Single { model: model.into() }
    }

    pub fn multi<I, S>(models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Multi {
            models: models.into_iter().map(Into::into).collect(),
        }
    }

    /// Model identifiers in dispatch order.
    pub fn model_ids(&self) -> &[String] {
        match self {
            Self::Single { model } => std::slice::from_ref(model),
            Self::Multi { models } => models,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.model_ids().is_empty()
    }
}

// Endpoint configuration for one model identifier
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ModelConfig {
    pub model: String, // Identifier sent to the provider, e.g. "gpt-4o-mini"
    pub api_url: String, // Base URL
    // Reference to the key, not the key itself - e.g. 'keyring' or 'env:MY_API_KEY' or null
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_ref: Option<String>,
}
