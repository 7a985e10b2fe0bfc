use crate::models::{ChatHistory, Conversation, Message, Role};
use crate::storage::{StorageError, StorageManager};
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

const TITLE_MAX_CHARS: usize = 40;
const FALLBACK_TITLE: &str = "New Chat";

/// Holds the active conversation (the in-memory working set) and the
/// mapping of archived conversations. Every mutation of the mapping
/// re-serializes it wholesale through the [`StorageManager`]; the active
/// message sequence itself is mutated without touching durable state until
/// it is archived.
pub struct ConversationStore {
    storage: Arc<StorageManager>,
    history: ChatHistory,
    active: Vec<Message>,
    // Identity the active conversation was first archived under. Fresh on
    // first archive, stable across re-archives, reset by start_new/load.
    active_id: Option<Uuid>,
    active_title: Option<String>,
}

impl ConversationStore {
    /// Creates a store over the given storage, loading any archived
    /// conversations it holds.
    pub async fn new(storage: Arc<StorageManager>) -> Result<Self, StorageError> {
        let history = storage.load_history().await?;
        Ok(Self {
            storage,
            history,
            active: Vec::new(),
            active_id: None,
            active_title: None,
        })
    }

    /// Appends a message to the active conversation and returns its id.
    pub fn append(&mut self, message: Message) -> Uuid {
        let id = message.id;
        self.active.push(message);
        id
    }

    /// Replaces the content of an active message by id. Unknown ids are a
    /// silent no-op (returns false); this is the mechanism streaming output
    /// uses to fill a reply in incrementally.
    pub fn update(&mut self, id: Uuid, new_content: impl Into<String>) -> bool {
        match self.active.iter_mut().find(|m| m.id == id) {
            Some(message) => {
                message.content = new_content.into();
                true
            }
            None => {
                log::debug!("update for unknown message id {}, ignoring", id);
                false
            }
        }
    }

    /// Removes a message from the active conversation; no error if absent.
    pub fn remove(&mut self, id: Uuid) {
        self.active.retain(|m| m.id != id);
    }

    /// Archives the active conversation into the history mapping and
    /// persists the entire mapping. An empty active conversation is a no-op
    /// with no persistence write. Returns the archived conversation id.
    pub async fn archive_current(&mut self) -> Result<Option<Uuid>, StorageError> {
        if self.active.is_empty() {
            return Ok(None);
        }

        let id = *self.active_id.get_or_insert_with(Uuid::new_v4);
        let title = self
            .active_title
            .get_or_insert_with(|| derive_title(&self.active))
            .clone();
        // Keep the original creation time when re-archiving the same thread
        let created_at = self
            .history
            .conversations
            .get(&id)
            .map(|c| c.created_at)
            .unwrap_or_else(Utc::now);

        self.history.conversations.insert(
            id,
            Conversation {
                id,
                title,
                created_at,
                messages: self.active.clone(),
            },
        );
        self.storage.save_history(&self.history).await?;
        log::info!("Archived conversation {} ({} messages)", id, self.active.len());
        Ok(Some(id))
    }

    /// Archives the current conversation (if non-empty), then resets the
    /// active conversation to empty.
    pub async fn start_new(&mut self) -> Result<(), StorageError> {
        self.archive_current().await?;
        self.active.clear();
        self.active_id = None;
        self.active_title = None;
        Ok(())
    }

    /// Replaces the active conversation with a copy of the named archive
    /// entry, archiving the current one first. Unknown ids are a silent
    /// no-op that leaves both the active conversation and the mapping
    /// untouched; returns whether the load happened.
    pub async fn load(&mut self, id: Uuid) -> Result<bool, StorageError> {
        let Some(conversation) = self.history.conversations.get(&id).cloned() else {
            log::warn!("load requested for unknown conversation {}", id);
            return Ok(false);
        };
        self.archive_current().await?;
        self.active = conversation.messages;
        self.active_id = Some(id);
        self.active_title = Some(conversation.title);
        Ok(true)
    }

    /// Removes an entry from the history mapping and re-persists.
    /// Idempotent: deleting an unknown id changes nothing.
    pub async fn delete(&mut self, id: Uuid) -> Result<(), StorageError> {
        if self.history.conversations.remove(&id).is_some() {
            self.storage.save_history(&self.history).await?;
            log::info!("Deleted conversation {}", id);
        } else {
            log::debug!("delete for unknown conversation {}, ignoring", id);
        }
        if self.active_id == Some(id) {
            // The active thread lost its archived identity; the next
            // archive mints a fresh one.
            self.active_id = None;
            self.active_title = None;
        }
        Ok(())
    }

    /// Messages of the active conversation, in submission order.
    pub fn messages(&self) -> &[Message] {
        &self.active
    }

    pub fn history(&self) -> &ChatHistory {
        &self.history
    }
}

/// Title for an archived conversation: the first user message, truncated,
/// or a fixed fallback when no user message exists.
fn derive_title(messages: &[Message]) -> String {
    let Some(first_user) = messages.iter().find(|m| m.role == Role::User) else {
        return FALLBACK_TITLE.to_string();
    };
    let text = first_user.content.trim();
    if text.is_empty() {
        return FALLBACK_TITLE.to_string();
    }
    // Char-boundary-safe truncation; content may hold multibyte characters
    if text.chars().count() > TITLE_MAX_CHARS {
        let truncated: String = text.chars().take(TITLE_MAX_CHARS).collect();
        format!("{}...", truncated)
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::HISTORY_KEY;

    async fn new_store() -> ConversationStore {
        let storage = Arc::new(StorageManager::open_in_memory().await.unwrap());
        ConversationStore::new(storage).await.unwrap()
    }

    #[tokio::test]
    async fn append_preserves_call_order() {
        let mut store = new_store().await;
        for text in ["one", "two", "three"] {
            store.append(Message::user(text));
        }
        let contents: Vec<_> = store.messages().iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["one", "two", "three"]);
    }

    #[tokio::test]
    async fn archive_of_empty_conversation_writes_nothing() {
        let storage = Arc::new(StorageManager::open_in_memory().await.unwrap());
        let mut store = ConversationStore::new(storage.clone()).await.unwrap();

        assert_eq!(store.archive_current().await.unwrap(), None);
        assert!(storage.get(HISTORY_KEY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_unknown_id_changes_nothing() {
        let mut store = new_store().await;
        store.append(Message::user("hello"));
        let before = store.messages().to_vec();
        let history_before = store.history().clone();

        assert!(!store.update(Uuid::new_v4(), "replaced"));
        assert_eq!(store.messages(), &before[..]);
        assert_eq!(store.history(), &history_before);
    }

    #[tokio::test]
    async fn remove_deletes_by_id_and_ignores_unknown() {
        let mut store = new_store().await;
        let id = store.append(Message::user("one"));
        store.append(Message::user("two"));

        store.remove(id);
        store.remove(Uuid::new_v4());

        assert_eq!(store.messages().len(), 1);
        assert_eq!(store.messages()[0].content, "two");
    }

    #[tokio::test]
    async fn update_overwrites_content_in_place() {
        let mut store = new_store().await;
        let id = store.append(Message::assistant("m1"));
        assert!(store.update(id, "partial"));
        assert!(store.update(id, "partial, then complete"));
        assert_eq!(store.messages()[0].content, "partial, then complete");
    }

    #[tokio::test]
    async fn start_new_archives_exactly_one_entry() {
        let mut store = new_store().await;
        store.append(Message::user("Hello"));
        let mut reply = Message::assistant("m1");
        reply.content = "Hi there".to_string();
        store.append(reply);
        let prior = store.messages().to_vec();

        store.start_new().await.unwrap();

        assert_eq!(store.history().conversations.len(), 1);
        let archived = store.history().conversations.values().next().unwrap();
        assert_eq!(archived.messages, prior);
        assert!(store.messages().is_empty());
    }

    #[tokio::test]
    async fn rearchive_updates_in_place() {
        let mut store = new_store().await;
        store.append(Message::user("first"));
        let id = store.archive_current().await.unwrap().unwrap();

        store.append(Message::user("second"));
        let id_again = store.archive_current().await.unwrap().unwrap();

        assert_eq!(id, id_again);
        assert_eq!(store.history().conversations.len(), 1);
        assert_eq!(store.history().conversations[&id].messages.len(), 2);
    }

    #[tokio::test]
    async fn load_swaps_active_conversation() {
        let mut store = new_store().await;
        store.append(Message::user("old thread"));
        store.start_new().await.unwrap();
        let old_id = *store.history().conversations.keys().next().unwrap();

        store.append(Message::user("new thread"));
        assert!(store.load(old_id).await.unwrap());

        assert_eq!(store.messages().len(), 1);
        assert_eq!(store.messages()[0].content, "old thread");
        // The interrupted thread was archived on the way out
        assert_eq!(store.history().conversations.len(), 2);
    }

    #[tokio::test]
    async fn load_unknown_id_is_silent() {
        let mut store = new_store().await;
        store.append(Message::user("keep me"));
        assert!(!store.load(Uuid::new_v4()).await.unwrap());
        assert_eq!(store.messages().len(), 1);
        assert!(store.history().conversations.is_empty());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let mut store = new_store().await;
        store.append(Message::user("bye"));
        store.start_new().await.unwrap();
        let id = *store.history().conversations.keys().next().unwrap();

        store.delete(id).await.unwrap();
        store.delete(id).await.unwrap();
        assert!(store.history().conversations.is_empty());
    }

    #[tokio::test]
    async fn history_survives_reload() {
        let storage = Arc::new(StorageManager::open_in_memory().await.unwrap());
        {
            let mut store = ConversationStore::new(storage.clone()).await.unwrap();
            store.append(Message::user("persist me"));
            store.archive_current().await.unwrap();
        }
        let reopened = ConversationStore::new(storage).await.unwrap();
        assert_eq!(reopened.history().conversations.len(), 1);
    }

    #[tokio::test]
    async fn title_comes_from_first_user_message() {
        let mut store = new_store().await;
        store.append(Message::user("What is the capital of France, and why is it Paris?"));
        store.archive_current().await.unwrap();

        let archived = store.history().conversations.values().next().unwrap();
        assert!(archived.title.starts_with("What is the capital of France"));
        assert!(archived.title.ends_with("..."));
        assert!(archived.title.chars().count() <= TITLE_MAX_CHARS + 3);
    }

    #[tokio::test]
    async fn title_falls_back_without_user_message() {
        let mut store = new_store().await;
        let mut reply = Message::assistant("m1");
        reply.content = "unprompted".to_string();
        store.append(reply);
        store.archive_current().await.unwrap();

        let archived = store.history().conversations.values().next().unwrap();
        assert_eq!(archived.title, FALLBACK_TITLE);
    }
}
