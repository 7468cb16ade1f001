//! HTTP/JSON implementation of the backend contract
//!
//! Talks to the conversation vendor over a small REST surface. Transport
//! failures map to `TabmateError::Network`; non-success statuses map to
//! `TabmateError::Backend` carrying the status code, which is what the
//! error classifier keys on. Subscriptions are poll-based: a spawned task
//! polls the message list and forwards unseen messages over a channel.

use crate::backend::{
    Backend, BackendConversation, BackendMessage, BackendSubscription, ConnectedUser,
    SubscriptionHandle,
};
use crate::config::BotConfig;
use crate::error::{Result, TabmateError};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;
use tokio::sync::mpsc;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const POLL_INTERVAL: Duration = Duration::from_secs(2);
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Request body for the connect endpoint
#[derive(Debug, Serialize)]
struct ConnectRequest<'a> {
    connection_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    credential: Option<&'a str>,
}

/// Response body from the connect endpoint
#[derive(Debug, Deserialize)]
struct ConnectResponse {
    user_id: String,
    credential: String,
}

/// Response body from conversation creation
#[derive(Debug, Deserialize)]
struct CreateConversationResponse {
    id: String,
}

/// Request body for message creation
#[derive(Debug, Serialize)]
struct CreateMessageRequest<'a> {
    text: &'a str,
}

/// Response body from the message list endpoint
#[derive(Debug, Deserialize)]
struct ListMessagesResponse {
    messages: Vec<BackendMessage>,
}

/// Response body from the conversation list endpoint
#[derive(Debug, Deserialize)]
struct ListConversationsResponse {
    conversations: Vec<BackendConversation>,
}

/// HTTP backend client
///
/// # Examples
///
/// ```
/// use tabmate::backend::HttpBackend;
/// use tabmate::config::BotConfig;
///
/// let config = BotConfig {
///     enabled: true,
///     connection_id: "conn-1".to_string(),
///     api_base: "https://api.tabmate.dev".to_string(),
/// };
/// let backend = HttpBackend::new(&config);
/// assert!(backend.is_ok());
/// ```
pub struct HttpBackend {
    client: Client,
    api_base: String,
    connection_id: String,
    credential: RwLock<Option<String>>,
    next_handle: AtomicU64,
    pollers: std::sync::Mutex<HashMap<SubscriptionHandle, tokio::task::JoinHandle<()>>>,
}

impl HttpBackend {
    /// Create a new HTTP backend client
    ///
    /// # Errors
    ///
    /// Returns an error if HTTP client initialization fails.
    pub fn new(config: &BotConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent("tabmate/0.2.0")
            .build()
            .map_err(|e| TabmateError::Network(format!("Failed to create HTTP client: {}", e)))?;

        tracing::info!(api_base = %config.api_base, "initialized HTTP backend");

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            connection_id: config.connection_id.clone(),
            credential: RwLock::new(None),
            next_handle: AtomicU64::new(1),
            pollers: std::sync::Mutex::new(HashMap::new()),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    fn bearer(&self) -> Option<String> {
        self.credential
            .read()
            .ok()
            .and_then(|guard| guard.clone())
    }

    /// Attach the stored credential and send, mapping transport failures
    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let request = match self.bearer() {
            Some(credential) => request.bearer_auth(credential),
            None => request,
        };
        let response = request
            .send()
            .await
            .map_err(|e| TabmateError::Network(format!("Request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            tracing::error!("backend returned error {}: {}", status, error_text);
            return Err(TabmateError::Backend {
                status: status.as_u16(),
                message: error_text,
            }
            .into());
        }
        Ok(response)
    }

    async fn parse<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let body = response
            .text()
            .await
            .map_err(|e| TabmateError::Network(format!("Failed to read response: {}", e)))?;
        serde_json::from_str(&body)
            .map_err(|e| TabmateError::Network(format!("Invalid response body: {}", e)).into())
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn connect<'a>(&self, credential: Option<&'a str>) -> Result<ConnectedUser> {
        let response = self
            .send(self.client.post(self.endpoint("/v1/users/connect")).json(
                &ConnectRequest {
                    connection_id: &self.connection_id,
                    credential,
                },
            ))
            .await?;
        let connected: ConnectResponse = Self::parse(response).await?;

        if let Ok(mut guard) = self.credential.write() {
            *guard = Some(connected.credential.clone());
        }
        tracing::info!(user_id = %connected.user_id, "connected to backend");
        Ok(ConnectedUser {
            user_id: connected.user_id,
            credential: connected.credential,
        })
    }

    async fn create_conversation(&self) -> Result<String> {
        let response = self
            .send(self.client.post(self.endpoint("/v1/conversations")))
            .await?;
        let created: CreateConversationResponse = Self::parse(response).await?;
        tracing::debug!(conversation_id = %created.id, "created conversation");
        Ok(created.id)
    }

    async fn create_message(&self, conversation_id: &str, text: &str) -> Result<()> {
        self.send(
            self.client
                .post(self.endpoint(&format!("/v1/conversations/{}/messages", conversation_id)))
                .json(&CreateMessageRequest { text }),
        )
        .await?;
        Ok(())
    }

    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<BackendMessage>> {
        let response = self
            .send(
                self.client
                    .get(self.endpoint(&format!("/v1/conversations/{}/messages", conversation_id))),
            )
            .await?;
        let listed: ListMessagesResponse = Self::parse(response).await?;
        Ok(listed.messages)
    }

    async fn list_conversations(&self) -> Result<Vec<BackendConversation>> {
        let response = self
            .send(self.client.get(self.endpoint("/v1/conversations")))
            .await?;
        let listed: ListConversationsResponse = Self::parse(response).await?;
        Ok(listed.conversations)
    }

    async fn delete_conversation(&self, conversation_id: &str) -> Result<()> {
        self.send(
            self.client
                .delete(self.endpoint(&format!("/v1/conversations/{}", conversation_id))),
        )
        .await?;
        Ok(())
    }

    async fn subscribe(&self, conversation_id: &str) -> Result<BackendSubscription> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);

        // Seed with ids already on the backend so history is not replayed
        // through the event channel; loading history is a separate call.
        let mut seen: HashSet<String> = self
            .list_messages(conversation_id)
            .await?
            .into_iter()
            .map(|m| m.id)
            .collect();

        let client = self.client.clone();
        let url = self.endpoint(&format!("/v1/conversations/{}/messages", conversation_id));
        let credential = self.bearer();
        let conversation = conversation_id.to_string();

        let poller = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(POLL_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;

                let request = match &credential {
                    Some(credential) => client.get(&url).bearer_auth(credential),
                    None => client.get(&url),
                };
                let listed = match request.send().await {
                    Ok(response) if response.status().is_success() => {
                        match response.json::<ListMessagesResponse>().await {
                            Ok(listed) => listed,
                            Err(e) => {
                                tracing::warn!(error = %e, "subscription poll returned bad body");
                                continue;
                            }
                        }
                    }
                    Ok(response) => {
                        tracing::warn!(
                            status = %response.status(),
                            conversation_id = %conversation,
                            "subscription poll rejected"
                        );
                        continue;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "subscription poll failed");
                        continue;
                    }
                };

                for message in listed.messages {
                    if seen.insert(message.id.clone()) {
                        if tx.send(message).await.is_err() {
                            // Receiver dropped; nothing left to deliver to.
                            return;
                        }
                    }
                }
            }
        });

        if let Ok(mut pollers) = self.pollers.lock() {
            pollers.insert(handle, poller);
        }
        tracing::debug!(conversation_id = %conversation_id, handle = handle, "subscribed");
        Ok(BackendSubscription {
            handle,
            receiver: rx,
        })
    }

    async fn unsubscribe(&self, handle: SubscriptionHandle) {
        let poller = self
            .pollers
            .lock()
            .ok()
            .and_then(|mut pollers| pollers.remove(&handle));
        if let Some(poller) = poller {
            poller.abort();
            tracing::debug!(handle = handle, "unsubscribed");
        }
    }
}
