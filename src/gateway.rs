//! Remote conversation gateway
//!
//! Owns the connect/credential lifecycle and translates vendor payloads
//! into the session data model. The stored credential lives encrypted in
//! the sync tier; a rejected credential is silently discarded and replaced
//! by a freshly provisioned identity, so the only externally visible
//! outcome of credential expiry is a normal configured transition.

use crate::backend::{Backend, BackendConversation, BackendMessage, BackendPayload};
use crate::backend::{BackendSubscription, SubscriptionHandle};
use crate::config::Config;
use crate::error::{ErrorKind, Result, TabmateError};
use crate::session::{ChatMessage, MessageRole, NON_TEXT_PLACEHOLDER};
use crate::storage::SecretStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Storage key for the encrypted backend credential
const CREDENTIAL_KEY: &str = "bot_credential";

/// Translate one vendor message into the session data model
///
/// Messages sent by `own_user_id` map to the user role, everything else
/// to the bot role. Non-text payloads degrade to the placeholder string.
/// A missing or unparseable timestamp falls back to local now; mapping
/// never fails.
pub fn map_backend_message(own_user_id: &str, message: BackendMessage) -> ChatMessage {
    let role = if message.sender_id == own_user_id {
        MessageRole::User
    } else {
        MessageRole::Bot
    };
    let content = match message.payload {
        BackendPayload::Text { text } => text,
        BackendPayload::NonText { kind } => {
            tracing::debug!(kind = %kind, message_id = %message.id, "non-text payload");
            NON_TEXT_PLACEHOLDER.to_string()
        }
    };
    let timestamp = message
        .created_at
        .as_deref()
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|parsed| parsed.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    ChatMessage {
        id: message.id,
        role,
        content,
        timestamp,
        page_context: None,
    }
}

/// Gateway over the backend contract
///
/// All conversation traffic from the controller goes through here, so the
/// vendor payload union never leaks past this module.
pub struct ConversationGateway {
    backend: Arc<dyn Backend>,
    secrets: SecretStore,
    user_id: RwLock<Option<String>>,
}

impl ConversationGateway {
    /// Create an unconfigured gateway
    pub fn new(backend: Arc<dyn Backend>, secrets: SecretStore) -> Self {
        Self {
            backend,
            secrets,
            user_id: RwLock::new(None),
        }
    }

    /// Connect to the backend using the stored credential when present
    ///
    /// A disabled bot configuration refuses without any network call. An
    /// authentication-classified connect failure discards the stored
    /// credential and provisions a fresh identity instead; any other
    /// failure propagates. On success the (possibly new) credential is
    /// persisted encrypted.
    ///
    /// # Errors
    ///
    /// Returns `TabmateError::Config` when the bot connection is disabled
    /// or the configuration is invalid.
    pub async fn configure(&self, config: &Config) -> Result<()> {
        if !config.bot.enabled {
            return Err(TabmateError::Config("bot connection is disabled".to_string()).into());
        }
        config.validate()?;

        let stored = self.secrets.get(CREDENTIAL_KEY).await?;
        let connected = match stored {
            Some(credential) => match self.backend.connect(Some(&credential)).await {
                Ok(connected) => connected,
                Err(e) if ErrorKind::of(&e) == ErrorKind::Authentication => {
                    tracing::info!("stored credential rejected, provisioning fresh identity");
                    self.secrets.remove(CREDENTIAL_KEY).await?;
                    self.backend.connect(None).await?
                }
                Err(e) => return Err(e),
            },
            None => self.backend.connect(None).await?,
        };

        self.secrets.put(CREDENTIAL_KEY, &connected.credential).await?;
        *self.user_id.write().await = Some(connected.user_id);
        Ok(())
    }

    /// Whether a connect has succeeded since construction
    pub async fn is_configured(&self) -> bool {
        self.user_id.read().await.is_some()
    }

    /// The identity secret backing session namespacing
    ///
    /// Available once configured; `None` before the first connect.
    pub async fn credential(&self) -> Result<Option<String>> {
        self.secrets.get(CREDENTIAL_KEY).await
    }

    /// Cheapest harmless read that proves the connection works
    pub async fn test_connection(&self) -> Result<()> {
        self.backend.list_conversations().await.map(|_| ())
    }

    /// Create an empty conversation, returning its backend id
    pub async fn create_conversation(&self) -> Result<String> {
        self.backend.create_conversation().await
    }

    /// Send a text message into a conversation
    ///
    /// No optimistic local echo happens here or anywhere: the sent message
    /// reaches the session only via the inbound echo event.
    pub async fn send_message(&self, conversation_id: &str, text: &str) -> Result<()> {
        self.backend.create_message(conversation_id, text).await
    }

    /// List a conversation's messages, mapped into the session model
    pub async fn list_messages(&self, conversation_id: &str) -> Result<Vec<ChatMessage>> {
        let own_user_id = self.user_id.read().await.clone().unwrap_or_default();
        let messages = self.backend.list_messages(conversation_id).await?;
        Ok(messages
            .into_iter()
            .map(|m| map_backend_message(&own_user_id, m))
            .collect())
    }

    /// List the identity's conversations
    pub async fn list_conversations(&self) -> Result<Vec<BackendConversation>> {
        self.backend.list_conversations().await
    }

    /// Delete a conversation by id
    pub async fn delete_conversation(&self, conversation_id: &str) -> Result<()> {
        self.backend.delete_conversation(conversation_id).await
    }

    /// Open an event subscription for a conversation
    pub async fn subscribe(&self, conversation_id: &str) -> Result<BackendSubscription> {
        self.backend.subscribe(conversation_id).await
    }

    /// Close an event subscription
    pub async fn unsubscribe(&self, handle: SubscriptionHandle) {
        self.backend.unsubscribe(handle).await;
    }

    /// Map a raw inbound event using the configured identity
    pub async fn map_inbound(&self, message: BackendMessage) -> ChatMessage {
        let own_user_id = self.user_id.read().await.clone().unwrap_or_default();
        map_backend_message(&own_user_id, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ConnectedUser, MockBackend};
    use crate::storage::{MemoryTier, SecretBox};
    use mockall::predicate;

    fn secrets() -> SecretStore {
        SecretStore::new(Arc::new(MemoryTier::new()), SecretBox::new())
    }

    fn enabled_config() -> Config {
        Config {
            bot: crate::config::BotConfig {
                enabled: true,
                connection_id: "conn-1".to_string(),
                api_base: "https://api.example.test".to_string(),
            },
            ..Default::default()
        }
    }

    fn connected(user_id: &str, credential: &str) -> ConnectedUser {
        ConnectedUser {
            user_id: user_id.to_string(),
            credential: credential.to_string(),
        }
    }

    fn text_message(id: &str, sender: &str, text: &str) -> BackendMessage {
        BackendMessage {
            id: id.to_string(),
            sender_id: sender.to_string(),
            payload: BackendPayload::Text {
                text: text.to_string(),
            },
            created_at: Some("2026-08-30T12:00:00Z".to_string()),
        }
    }

    #[tokio::test]
    async fn test_disabled_config_makes_no_network_call() {
        // A mock with no expectations panics on any call.
        let backend = MockBackend::new();
        let gateway = ConversationGateway::new(Arc::new(backend), secrets());

        let config = Config::default();
        let err = gateway.configure(&config).await.unwrap_err();
        assert_eq!(ErrorKind::of(&err), ErrorKind::Configuration);
        assert!(!gateway.is_configured().await);
    }

    #[tokio::test]
    async fn test_configure_without_stored_credential_provisions_identity() {
        let mut backend = MockBackend::new();
        backend
            .expect_connect()
            .withf(|credential| credential.is_none())
            .times(1)
            .returning(|_| Ok(connected("u1", "fresh-cred")));

        let secrets = secrets();
        let gateway = ConversationGateway::new(Arc::new(backend), secrets);

        gateway.configure(&enabled_config()).await.expect("configure");
        assert!(gateway.is_configured().await);
        assert_eq!(
            gateway.credential().await.expect("credential").as_deref(),
            Some("fresh-cred")
        );
    }

    #[tokio::test]
    async fn test_configure_reuses_stored_credential() {
        let secrets = secrets();
        secrets.put(CREDENTIAL_KEY, "stored-cred").await.expect("seed");

        let mut backend = MockBackend::new();
        backend
            .expect_connect()
            .withf(|credential| *credential == Some("stored-cred"))
            .times(1)
            .returning(|_| Ok(connected("u1", "stored-cred")));

        let gateway = ConversationGateway::new(Arc::new(backend), secrets);
        gateway.configure(&enabled_config()).await.expect("configure");
        assert!(gateway.is_configured().await);
    }

    #[tokio::test]
    async fn test_rejected_credential_is_discarded_and_replaced() {
        let secrets = secrets();
        secrets.put(CREDENTIAL_KEY, "expired-cred").await.expect("seed");

        let mut backend = MockBackend::new();
        backend
            .expect_connect()
            .withf(|credential| credential.is_some())
            .times(1)
            .returning(|_| {
                Err(TabmateError::Backend {
                    status: 401,
                    message: "credential expired".to_string(),
                }
                .into())
            });
        backend
            .expect_connect()
            .withf(|credential| credential.is_none())
            .times(1)
            .returning(|_| Ok(connected("u2", "new-cred")));

        let gateway = ConversationGateway::new(Arc::new(backend), secrets);
        // The only visible effect is a normal configured transition.
        gateway.configure(&enabled_config()).await.expect("configure");
        assert!(gateway.is_configured().await);
        assert_eq!(
            gateway.credential().await.expect("credential").as_deref(),
            Some("new-cred")
        );
    }

    #[tokio::test]
    async fn test_non_auth_connect_failure_propagates() {
        let secrets = secrets();
        secrets.put(CREDENTIAL_KEY, "cred").await.expect("seed");

        let mut backend = MockBackend::new();
        backend
            .expect_connect()
            .times(1)
            .returning(|_| Err(TabmateError::Network("connection refused".to_string()).into()));

        let gateway = ConversationGateway::new(Arc::new(backend), secrets);
        let err = gateway.configure(&enabled_config()).await.unwrap_err();
        assert_eq!(ErrorKind::of(&err), ErrorKind::Network);
        assert!(!gateway.is_configured().await);
    }

    #[tokio::test]
    async fn test_test_connection_is_a_list_read() {
        let mut backend = MockBackend::new();
        backend
            .expect_list_conversations()
            .times(1)
            .returning(|| Ok(Vec::new()));

        let gateway = ConversationGateway::new(Arc::new(backend), secrets());
        gateway.test_connection().await.expect("test connection");
    }

    #[tokio::test]
    async fn test_list_messages_maps_roles_by_sender() {
        let mut backend = MockBackend::new();
        backend
            .expect_connect()
            .returning(|_| Ok(connected("me", "cred")));
        backend
            .expect_list_messages()
            .with(predicate::eq("c1"))
            .returning(|_| {
                Ok(vec![
                    text_message("m1", "me", "hi"),
                    text_message("m2", "bot-7", "hello back"),
                ])
            });

        let gateway = ConversationGateway::new(Arc::new(backend), secrets());
        gateway.configure(&enabled_config()).await.expect("configure");

        let messages = gateway.list_messages("c1").await.expect("list");
        assert_eq!(messages[0].role, MessageRole::User);
        assert_eq!(messages[1].role, MessageRole::Bot);
    }

    #[test]
    fn test_map_non_text_payload_degrades_to_placeholder() {
        let message = BackendMessage {
            id: "m1".to_string(),
            sender_id: "bot-7".to_string(),
            payload: BackendPayload::NonText {
                kind: "image".to_string(),
            },
            created_at: None,
        };
        let mapped = map_backend_message("me", message);
        assert_eq!(mapped.content, NON_TEXT_PLACEHOLDER);
        assert_eq!(mapped.role, MessageRole::Bot);
    }

    #[test]
    fn test_map_parses_rfc3339_timestamp() {
        let mapped = map_backend_message("me", text_message("m1", "me", "hi"));
        assert_eq!(mapped.timestamp.to_rfc3339(), "2026-08-30T12:00:00+00:00");
    }

    #[test]
    fn test_map_unparseable_timestamp_falls_back_to_now() {
        let mut message = text_message("m1", "me", "hi");
        message.created_at = Some("not-a-timestamp".to_string());

        let before = Utc::now();
        let mapped = map_backend_message("me", message);
        let after = Utc::now();
        assert!(mapped.timestamp >= before && mapped.timestamp <= after);
    }

    #[test]
    fn test_map_missing_timestamp_falls_back_to_now() {
        let mut message = text_message("m1", "me", "hi");
        message.created_at = None;

        let before = Utc::now();
        let mapped = map_backend_message("me", message);
        assert!(mapped.timestamp >= before);
    }
}
