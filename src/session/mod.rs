//! Conversation sessions: data model, persistence, and reconciliation
//!
//! A session pairs a backend conversation id with the page context it was
//! started from and its ordered message history. Message ids are assigned
//! by the backend, never locally, which is what makes deduplication in the
//! reconciliation engine possible.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod controller;
pub mod engine;
pub mod repository;

pub use controller::{SessionController, StateSnapshot, UiError};
pub use engine::{ListenState, MergeOutcome, ReconciliationEngine};
pub use repository::SessionRepository;

/// Placeholder content for backend payloads that are not text
pub const NON_TEXT_PLACEHOLDER: &str = "[Non-text message]";

/// Role of a chat message sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// Sent by the local user
    User,
    /// Sent by the remote bot
    Bot,
    /// Synthesized locally or by the backend
    System,
}

/// The page a message or session refers to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageContext {
    /// URL of the page
    pub url: String,
    /// Title of the page
    pub title: String,
}

/// A single chat message within a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Backend-assigned id, unique within the session
    pub id: String,

    /// Sender role
    pub role: MessageRole,

    /// Text payload; non-text payloads degrade to [`NON_TEXT_PLACEHOLDER`]
    pub content: String,

    /// Creation time, from the backend when parseable, local otherwise
    pub timestamp: DateTime<Utc>,

    /// Page the message was sent in reference to, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_context: Option<PageContext>,
}

/// A client-side conversation session
///
/// At most one session exists per conversation id. Sessions about the same
/// page may coexist; `source_url` is an index, not a unique key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSession {
    /// Opaque backend-assigned conversation id
    pub id: String,

    /// URL of the page the conversation is about
    pub source_url: String,

    /// Title of that page
    pub title: String,

    /// Messages in conversation order (insertion order, never re-sorted)
    pub messages: Vec<ChatMessage>,

    /// Creation time
    pub created_at: DateTime<Utc>,

    /// Updated on every message merge; drives the retention policy
    pub last_activity_at: DateTime<Utc>,
}

impl ChatSession {
    /// Create a fresh session for a conversation about the given page
    ///
    /// # Examples
    ///
    /// ```
    /// use tabmate::session::{ChatSession, PageContext};
    ///
    /// let page = PageContext {
    ///     url: "https://example.test/article".to_string(),
    ///     title: "An Article".to_string(),
    /// };
    /// let session = ChatSession::new("conv-1", &page);
    /// assert_eq!(session.id, "conv-1");
    /// assert!(session.messages.is_empty());
    /// ```
    pub fn new(id: impl Into<String>, page: &PageContext) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            source_url: page.url.clone(),
            title: page.title.clone(),
            messages: Vec::new(),
            created_at: now,
            last_activity_at: now,
        }
    }

    /// Whether a message with the given backend id is already present
    pub fn contains_message(&self, message_id: &str) -> bool {
        self.messages.iter().any(|m| m.id == message_id)
    }

    /// Bump `last_activity_at` to now
    pub fn touch(&mut self) {
        self.last_activity_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page() -> PageContext {
        PageContext {
            url: "https://example.test".to_string(),
            title: "Example".to_string(),
        }
    }

    #[test]
    fn test_new_session_carries_page_context() {
        let session = ChatSession::new("c1", &page());
        assert_eq!(session.source_url, "https://example.test");
        assert_eq!(session.title, "Example");
        assert_eq!(session.created_at, session.last_activity_at);
    }

    #[test]
    fn test_contains_message() {
        let mut session = ChatSession::new("c1", &page());
        assert!(!session.contains_message("m1"));
        session.messages.push(ChatMessage {
            id: "m1".to_string(),
            role: MessageRole::User,
            content: "hi".to_string(),
            timestamp: Utc::now(),
            page_context: None,
        });
        assert!(session.contains_message("m1"));
        assert!(!session.contains_message("m2"));
    }

    #[test]
    fn test_touch_advances_last_activity() {
        let mut session = ChatSession::new("c1", &page());
        let before = session.last_activity_at;
        std::thread::sleep(std::time::Duration::from_millis(5));
        session.touch();
        assert!(session.last_activity_at > before);
    }

    #[test]
    fn test_message_role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&MessageRole::Bot).unwrap(), "\"bot\"");
        assert_eq!(
            serde_json::to_string(&MessageRole::User).unwrap(),
            "\"user\""
        );
    }

    #[test]
    fn test_session_serde_roundtrip() {
        let mut session = ChatSession::new("c1", &page());
        session.messages.push(ChatMessage {
            id: "m1".to_string(),
            role: MessageRole::Bot,
            content: NON_TEXT_PLACEHOLDER.to_string(),
            timestamp: Utc::now(),
            page_context: Some(page()),
        });
        let json = serde_json::to_string(&session).expect("serialize");
        let parsed: ChatSession = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed.id, "c1");
        assert_eq!(parsed.messages.len(), 1);
        assert_eq!(parsed.messages[0].role, MessageRole::Bot);
    }
}
