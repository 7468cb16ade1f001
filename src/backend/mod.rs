//! Backend contract for the remote conversation vendor
//!
//! The rest of the library consumes conversations through the [`Backend`]
//! trait and never sees the vendor wire format: payloads cross this
//! boundary as a closed tagged union and are converted to `ChatMessage`
//! immediately by the gateway.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

pub mod http;
pub use http::HttpBackend;

/// Identity returned by a successful connect
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectedUser {
    /// Backend-assigned user id; used to attribute inbound messages
    pub user_id: String,
    /// Long-lived credential for subsequent connects
    pub credential: String,
}

/// Conversation summary as listed by the backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConversation {
    /// Opaque conversation id
    pub id: String,
    /// Creation time as reported by the backend, unparsed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    /// Last-update time as reported by the backend, unparsed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

/// Message payload at the vendor boundary
///
/// Anything the backend may send is one of these two shapes; unknown
/// payload kinds arrive as `NonText` and degrade to a placeholder during
/// mapping, never as an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendPayload {
    /// Plain text
    Text {
        /// Message body
        text: String,
    },
    /// Any other payload kind (image, file, card, ...)
    NonText {
        /// Vendor payload kind, kept for logging only
        kind: String,
    },
}

/// A message as delivered by the backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendMessage {
    /// Backend-assigned message id, unique within its conversation
    pub id: String,
    /// User id of the sender
    pub sender_id: String,
    /// Payload
    pub payload: BackendPayload,
    /// Creation time as an unparsed vendor string, when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

/// Opaque handle identifying one open subscription
pub type SubscriptionHandle = u64;

/// An open event subscription
///
/// Dropping the receiver does not close the subscription; callers must
/// pass the handle to [`Backend::unsubscribe`].
pub struct BackendSubscription {
    /// Handle to close the subscription with
    pub handle: SubscriptionHandle,
    /// Inbound message events, in arrival order
    pub receiver: mpsc::Receiver<BackendMessage>,
}

/// Contract consumed from the remote conversation backend
///
/// Every operation is fallible except `unsubscribe`, which always
/// succeeds from the caller's point of view.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Backend: Send + Sync {
    /// Authenticate, or provision a brand-new identity when `credential`
    /// is `None`
    ///
    /// # Errors
    ///
    /// An invalid or expired credential fails with an
    /// authentication-classified error.
    async fn connect<'a>(&self, credential: Option<&'a str>) -> Result<ConnectedUser>;

    /// Create an empty conversation and return its id
    async fn create_conversation(&self) -> Result<String>;

    /// Append a text message to a conversation
    async fn create_message(&self, conversation_id: &str, text: &str) -> Result<()>;

    /// List all messages of a conversation, oldest first
    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<BackendMessage>>;

    /// List the identity's conversations
    async fn list_conversations(&self) -> Result<Vec<BackendConversation>>;

    /// Delete a conversation; deleting an unknown id is not an error
    async fn delete_conversation(&self, conversation_id: &str) -> Result<()>;

    /// Open an event subscription for a conversation
    async fn subscribe(&self, conversation_id: &str) -> Result<BackendSubscription>;

    /// Close a subscription; unknown handles are ignored
    async fn unsubscribe(&self, handle: SubscriptionHandle);
}
