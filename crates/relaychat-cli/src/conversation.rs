//! Per-identity conversation history
//!
//! The whole history of one identity is a single JSON list stored under
//! `chat_history_<identity>`, most recently modified first and capped in
//! length. A second key, `active_chat_<identity>`, remembers which
//! conversation new turns go to.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CliResult;
use crate::persistence::SharedStore;

pub const HISTORY_KEY_PREFIX: &str = "chat_history_";
pub const ACTIVE_KEY_PREFIX: &str = "active_chat_";

pub const DEFAULT_MAX_CONVERSATIONS: usize = 50;
pub const DEFAULT_TITLE_LENGTH: usize = 30;

/// Shown for conversations that have no user turn yet
pub const UNTITLED: &str = "New Chat";

const TITLE_MARKER: &str = "...";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Assistant,
}

/// One message in a conversation; never edited after it is appended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub sender: Sender,
    pub text: String,
}

impl ConversationTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            sender: Sender::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            sender: Sender::Assistant,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    /// Set from the first user turn, then left alone
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub turns: Vec<ConversationTurn>,
    pub last_modified: DateTime<Utc>,
}

impl Conversation {
    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or(UNTITLED)
    }
}

/// Most recently modified first
pub type ConversationList = Vec<Conversation>;

/// First `max_chars` characters of `text`, with `...` appended when cut
pub fn derive_title(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let mut title: String = text.chars().take(max_chars).collect();
    title.push_str(TITLE_MARKER);
    title
}

/// Conversation history of one identity
pub struct ConversationStore {
    store: SharedStore,
    identity: String,
    max_conversations: usize,
    title_length: usize,
}

impl ConversationStore {
    pub fn new(store: SharedStore, identity: impl Into<String>) -> Self {
        Self {
            store,
            identity: identity.into(),
            max_conversations: DEFAULT_MAX_CONVERSATIONS,
            title_length: DEFAULT_TITLE_LENGTH,
        }
    }

    pub fn with_limits(mut self, max_conversations: usize, title_length: usize) -> Self {
        self.max_conversations = max_conversations.max(1);
        self.title_length = title_length;
        self
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    fn history_key(&self) -> String {
        format!("{HISTORY_KEY_PREFIX}{}", self.identity)
    }

    fn active_key(&self) -> String {
        format!("{ACTIVE_KEY_PREFIX}{}", self.identity)
    }

    /// All conversations, most recently modified first
    ///
    /// A history that fails to parse is treated as empty; it is replaced on
    /// the next append.
    pub async fn list(&self) -> CliResult<ConversationList> {
        let key = self.history_key();
        let Some(raw) = self.store.get(&key).await? else {
            return Ok(Vec::new());
        };

        match serde_json::from_str(&raw) {
            Ok(list) => Ok(list),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Ignoring unreadable conversation history");
                Ok(Vec::new())
            }
        }
    }

    async fn save(&self, list: &[Conversation]) -> CliResult<()> {
        let raw = serde_json::to_string(list)?;
        self.store.set(&self.history_key(), &raw).await?;
        Ok(())
    }

    pub async fn load(&self, id: &str) -> CliResult<Option<Conversation>> {
        Ok(self.list().await?.into_iter().find(|c| c.id == id))
    }

    /// Append a turn, returning the conversation id
    ///
    /// With no id a new conversation is started.
    pub async fn append_turn(
        &self,
        conversation_id: Option<&str>,
        turn: ConversationTurn,
    ) -> CliResult<String> {
        self.append_turn_at(conversation_id, turn, Utc::now()).await
    }

    pub async fn append_turn_at(
        &self,
        conversation_id: Option<&str>,
        turn: ConversationTurn,
        now: DateTime<Utc>,
    ) -> CliResult<String> {
        let mut list = self.list().await?;

        let existing = conversation_id.and_then(|id| list.iter().position(|c| c.id == id));
        let mut conversation = match (existing, conversation_id) {
            (Some(index), _) => list.remove(index),
            (None, Some(id)) => Conversation {
                id: id.to_string(),
                title: None,
                turns: Vec::new(),
                last_modified: now,
            },
            (None, None) => Conversation {
                id: fresh_id(&list, now),
                title: None,
                turns: Vec::new(),
                last_modified: now,
            },
        };

        if conversation.title.is_none() && turn.sender == Sender::User {
            conversation.title = Some(derive_title(&turn.text, self.title_length));
        }
        conversation.turns.push(turn);
        conversation.last_modified = now;

        let id = conversation.id.clone();
        list.insert(0, conversation);

        if list.len() > self.max_conversations {
            let dropped = list.len() - self.max_conversations;
            list.truncate(self.max_conversations);
            tracing::debug!(dropped, "Dropped oldest conversations over the cap");
        }

        self.save(&list).await?;
        Ok(id)
    }

    /// Delete a conversation; returns false if it did not exist
    ///
    /// Deleting the active conversation clears the active pointer.
    pub async fn remove(&self, id: &str) -> CliResult<bool> {
        let mut list = self.list().await?;
        let before = list.len();
        list.retain(|c| c.id != id);

        if list.len() == before {
            return Ok(false);
        }

        self.save(&list).await?;

        if self.active().await?.as_deref() == Some(id) {
            self.clear_active().await?;
        }

        Ok(true)
    }

    /// Id of the conversation new turns go to, if any
    pub async fn active(&self) -> CliResult<Option<String>> {
        Ok(self
            .store
            .get(&self.active_key())
            .await?
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty()))
    }

    pub async fn set_active(&self, id: &str) -> CliResult<()> {
        self.store.set(&self.active_key(), id).await?;
        Ok(())
    }

    pub async fn clear_active(&self) -> CliResult<()> {
        self.store.remove(&self.active_key()).await?;
        Ok(())
    }
}

/// Millisecond timestamp id, bumped until unused in `list`
fn fresh_id(list: &[Conversation], now: DateTime<Utc>) -> String {
    let mut millis = now.timestamp_millis();
    loop {
        let id = millis.to_string();
        if !list.iter().any(|c| c.id == id) {
            return id;
        }
        millis += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{KeyValueStore, MemoryStore};
    use chrono::TimeDelta;
    use std::sync::Arc;

    fn store() -> (Arc<MemoryStore>, ConversationStore) {
        let backend = Arc::new(MemoryStore::new());
        let conversations = ConversationStore::new(backend.clone(), "alice");
        (backend, conversations)
    }

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_derive_title_truncates_long_text() {
        let text = "Explain the difference between TCP and UDP please";
        assert_eq!(text.chars().count(), 49);

        let title = derive_title(&text[..45], 30);
        assert_eq!(title, "Explain the difference between...");
        assert_eq!(title.chars().count(), 33);
    }

    #[test]
    fn test_derive_title_keeps_short_text() {
        assert_eq!(derive_title("Hello ther", 30), "Hello ther");
        assert_eq!(derive_title(&"x".repeat(30), 30), "x".repeat(30));
    }

    #[test]
    fn test_derive_title_counts_characters() {
        let text = "é".repeat(31);
        let title = derive_title(&text, 30);
        assert_eq!(title, format!("{}...", "é".repeat(30)));
    }

    #[tokio::test]
    async fn test_first_append_creates_conversation() {
        let (_, conversations) = store();

        let id = conversations
            .append_turn_at(None, ConversationTurn::user("Hi"), t0())
            .await
            .unwrap();

        assert_eq!(id, t0().timestamp_millis().to_string());
        let conversation = conversations.load(&id).await.unwrap().unwrap();
        assert_eq!(conversation.display_title(), "Hi");
        assert_eq!(conversation.turns, vec![ConversationTurn::user("Hi")]);
        assert_eq!(conversation.last_modified, t0());
    }

    #[tokio::test]
    async fn test_title_is_set_once() {
        let (_, conversations) = store();

        let id = conversations
            .append_turn_at(None, ConversationTurn::user("First question"), t0())
            .await
            .unwrap();
        conversations
            .append_turn_at(Some(&id), ConversationTurn::assistant("Answer"), t0())
            .await
            .unwrap();
        conversations
            .append_turn_at(Some(&id), ConversationTurn::user("Second question"), t0())
            .await
            .unwrap();

        let conversation = conversations.load(&id).await.unwrap().unwrap();
        assert_eq!(conversation.title.as_deref(), Some("First question"));
        assert_eq!(conversation.turns.len(), 3);
    }

    #[tokio::test]
    async fn test_assistant_first_turn_leaves_title_unset() {
        let (_, conversations) = store();

        let id = conversations
            .append_turn_at(None, ConversationTurn::assistant("Welcome"), t0())
            .await
            .unwrap();

        let conversation = conversations.load(&id).await.unwrap().unwrap();
        assert_eq!(conversation.title, None);
        assert_eq!(conversation.display_title(), UNTITLED);
    }

    #[tokio::test]
    async fn test_append_moves_conversation_to_front() {
        let (_, conversations) = store();

        let older = conversations
            .append_turn_at(None, ConversationTurn::user("older"), t0())
            .await
            .unwrap();
        let newer = conversations
            .append_turn_at(None, ConversationTurn::user("newer"), t0() + TimeDelta::seconds(1))
            .await
            .unwrap();

        let ids: Vec<_> = conversations.list().await.unwrap().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![newer.clone(), older.clone()]);

        conversations
            .append_turn_at(Some(&older), ConversationTurn::assistant("reply"), t0() + TimeDelta::seconds(2))
            .await
            .unwrap();

        let list = conversations.list().await.unwrap();
        assert_eq!(list[0].id, older);
        assert_eq!(list[0].last_modified, t0() + TimeDelta::seconds(2));
        assert_eq!(list.len(), 2);
    }

    #[tokio::test]
    async fn test_cap_drops_least_recent() {
        let (_, conversations) = store();

        let mut ids = Vec::new();
        for i in 0..51 {
            let now = t0() + TimeDelta::seconds(i);
            ids.push(
                conversations
                    .append_turn_at(None, ConversationTurn::user(format!("chat {i}")), now)
                    .await
                    .unwrap(),
            );
        }

        let list = conversations.list().await.unwrap();
        assert_eq!(list.len(), 50);
        assert_eq!(list[0].id, ids[50]);
        assert!(list.iter().all(|c| c.id != ids[0]));
    }

    #[tokio::test]
    async fn test_ids_are_unique_within_same_millisecond() {
        let (_, conversations) = store();

        let a = conversations
            .append_turn_at(None, ConversationTurn::user("a"), t0())
            .await
            .unwrap();
        let b = conversations
            .append_turn_at(None, ConversationTurn::user("b"), t0())
            .await
            .unwrap();

        assert_ne!(a, b);
        assert_eq!(b, (t0().timestamp_millis() + 1).to_string());
    }

    #[tokio::test]
    async fn test_remove_clears_active_pointer() {
        let (_, conversations) = store();

        let id = conversations
            .append_turn_at(None, ConversationTurn::user("hi"), t0())
            .await
            .unwrap();
        conversations.set_active(&id).await.unwrap();

        assert!(conversations.remove(&id).await.unwrap());
        assert!(conversations.load(&id).await.unwrap().is_none());
        assert_eq!(conversations.active().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_remove_other_keeps_active_pointer() {
        let (_, conversations) = store();

        let keep = conversations
            .append_turn_at(None, ConversationTurn::user("keep"), t0())
            .await
            .unwrap();
        let discard = conversations
            .append_turn_at(None, ConversationTurn::user("drop"), t0())
            .await
            .unwrap();
        conversations.set_active(&keep).await.unwrap();

        assert!(conversations.remove(&discard).await.unwrap());
        assert_eq!(conversations.active().await.unwrap().as_deref(), Some(keep.as_str()));
    }

    #[tokio::test]
    async fn test_remove_missing_returns_false() {
        let (_, conversations) = store();
        assert!(!conversations.remove("404").await.unwrap());
    }

    #[tokio::test]
    async fn test_histories_are_scoped_by_identity() {
        let backend = Arc::new(MemoryStore::new());
        let alice = ConversationStore::new(backend.clone(), "alice");
        let bob = ConversationStore::new(backend.clone(), "bob");

        alice
            .append_turn_at(None, ConversationTurn::user("alice's chat"), t0())
            .await
            .unwrap();

        assert_eq!(alice.list().await.unwrap().len(), 1);
        assert!(bob.list().await.unwrap().is_empty());
        assert!(backend.get("chat_history_alice").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_unreadable_history_is_treated_as_empty() {
        let (backend, conversations) = store();
        backend.set("chat_history_alice", "{not json").await.unwrap();

        assert!(conversations.list().await.unwrap().is_empty());

        conversations
            .append_turn_at(None, ConversationTurn::user("fresh"), t0())
            .await
            .unwrap();
        assert_eq!(conversations.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_persisted_wire_shape() {
        let (backend, conversations) = store();
        conversations
            .append_turn_at(None, ConversationTurn::user("Hi"), t0())
            .await
            .unwrap();

        let raw = backend.get("chat_history_alice").await.unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value[0]["title"], "Hi");
        assert_eq!(value[0]["turns"][0]["sender"], "user");
        assert_eq!(value[0]["turns"][0]["text"], "Hi");
    }
}
