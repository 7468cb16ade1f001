//! Imperative session API and observable state
//!
//! `SessionController` is what a UI drives: it owns the active session,
//! the subscription pump, and a snapshot of everything observable
//! (messages, loading/typing flags, at most one active error). All
//! mutation happens under one lock, so merges run to completion one at a
//! time and a snapshot is always internally consistent.

use crate::backend::Backend;
use crate::backend::SubscriptionHandle;
use crate::config::Config;
use crate::error::{ErrorKind, Result, TabmateError};
use crate::gateway::ConversationGateway;
use crate::session::engine::{MergeOutcome, ReconciliationEngine};
use crate::session::repository::SessionRepository;
use crate::session::{ChatMessage, ChatSession, PageContext};
use crate::storage::{SecretBox, SecretStore, StorageAreas};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Error as shown to the UI: a closed kind plus a human-readable message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UiError {
    /// Classified kind, stable across message wording changes
    pub kind: ErrorKind,
    /// Human-readable description
    pub message: String,
}

impl UiError {
    fn from_error(error: &anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::of(error),
            message: error.to_string(),
        }
    }
}

/// Everything a UI can observe, captured at one instant
#[derive(Debug, Clone)]
pub struct StateSnapshot {
    /// Messages of the active session, in conversation order
    pub messages: Vec<ChatMessage>,
    /// A conversation is being created or history is being fetched
    pub is_loading: bool,
    /// A sent message is awaiting its reply
    pub is_typing: bool,
    /// At most one active error
    pub error: Option<UiError>,
    /// Non-fatal condition worth surfacing (for example a failed persist)
    pub warning: Option<String>,
    /// Id of the active conversation, when one exists
    pub conversation_id: Option<String>,
    /// Whether configuration has succeeded
    pub is_configured: bool,
}

struct ControllerInner {
    repository: Option<Arc<SessionRepository>>,
    engine: Option<ReconciliationEngine>,
    session: Option<ChatSession>,
    subscription: Option<SubscriptionHandle>,
    pump: Option<tokio::task::JoinHandle<()>>,
    is_loading: bool,
    is_typing: bool,
    error: Option<UiError>,
    warning: Option<String>,
}

impl ControllerInner {
    fn record_failure(&mut self, error: &anyhow::Error) {
        self.error = Some(UiError::from_error(error));
        self.is_loading = false;
        self.is_typing = false;
    }
}

/// UI-facing session controller
///
/// Collaborators are injected: the backend is whatever implements the
/// contract, storage is whichever tiers the host provides. Nothing here
/// is a global.
pub struct SessionController {
    gateway: Arc<ConversationGateway>,
    storage: StorageAreas,
    inner: Arc<Mutex<ControllerInner>>,
}

impl SessionController {
    /// Create an unconfigured controller over a backend and storage tiers
    pub fn new(backend: Arc<dyn Backend>, storage: StorageAreas) -> Self {
        let secrets = SecretStore::new(storage.sync.clone(), SecretBox::new());
        let gateway = Arc::new(ConversationGateway::new(backend, secrets));
        Self {
            gateway,
            storage,
            inner: Arc::new(Mutex::new(ControllerInner {
                repository: None,
                engine: None,
                session: None,
                subscription: None,
                pump: None,
                is_loading: false,
                is_typing: false,
                error: None,
                warning: None,
            })),
        }
    }

    /// Apply a configuration, connecting to the backend
    ///
    /// On success the per-identity repository is (re)built, the retention
    /// policy is applied, and `true` is returned. On failure the
    /// classified error lands in the snapshot and `false` is returned; any
    /// active subscription is closed either way, since a configuration
    /// change invalidates the current conversation binding.
    pub async fn configure(&self, config: &Config) -> bool {
        let mut inner = self.inner.lock().await;
        inner.error = None;
        self.close_subscription(&mut inner).await;
        inner.session = None;

        if let Err(e) = self.gateway.configure(config).await {
            tracing::warn!(error = %e, "configuration failed");
            inner.record_failure(&e);
            inner.repository = None;
            inner.engine = None;
            return false;
        }

        let identity = match self.gateway.credential().await {
            Ok(Some(credential)) => credential,
            Ok(None) => {
                let e: anyhow::Error =
                    TabmateError::Config("connect succeeded without a credential".to_string())
                        .into();
                inner.record_failure(&e);
                return false;
            }
            Err(e) => {
                inner.record_failure(&e);
                return false;
            }
        };

        let repository = Arc::new(SessionRepository::new(self.storage.local.clone(), &identity));
        if let Err(e) = repository.cleanup(&config.retention).await {
            // Retention is housekeeping; a failure must not block configuration.
            tracing::warn!(error = %e, "retention cleanup failed");
            inner.warning = Some(format!("Retention cleanup failed: {}", e));
        }
        inner.engine = Some(ReconciliationEngine::new(repository.clone()));
        inner.repository = Some(repository);
        true
    }

    /// Send a message, bootstrapping a conversation if none is active
    ///
    /// The previous error is cleared first. With no active conversation,
    /// exactly one conversation is created and a session record is
    /// persisted with the page context and an empty message list before
    /// the message is sent. The sent message appears in the snapshot only
    /// once its echo event arrives; there is no optimistic local insert.
    pub async fn send_message(&self, text: &str, page: &PageContext) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.error = None;

        if inner.repository.is_none() {
            let e: anyhow::Error =
                TabmateError::Config("bot connection is not configured".to_string()).into();
            inner.record_failure(&e);
            return Err(e);
        }

        let active = inner.session.as_ref().map(|session| session.id.clone());
        let conversation_id = match active {
            Some(conversation_id) => conversation_id,
            None => match self.open_conversation(&mut inner, page).await {
                Ok(conversation_id) => conversation_id,
                Err(e) => {
                    inner.record_failure(&e);
                    return Err(e);
                }
            },
        };

        inner.is_typing = true;
        if let Err(e) = self.gateway.send_message(&conversation_id, text).await {
            inner.record_failure(&e);
            return Err(e);
        }
        Ok(())
    }

    /// Drop the active conversation and open a fresh one for `page`
    ///
    /// The old subscription is closed before the new conversation is
    /// created; events from it can no longer reach the new session.
    pub async fn start_new_conversation(&self, page: &PageContext) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.error = None;

        if inner.repository.is_none() {
            let e: anyhow::Error =
                TabmateError::Config("bot connection is not configured".to_string()).into();
            inner.record_failure(&e);
            return Err(e);
        }

        self.close_subscription(&mut inner).await;
        inner.session = None;
        if let Err(e) = self.open_conversation(&mut inner, page).await {
            inner.record_failure(&e);
            return Err(e);
        }
        Ok(())
    }

    /// Make an existing conversation the active one and load its history
    pub async fn load_history(&self, conversation_id: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.error = None;

        let Some(repository) = inner.repository.clone() else {
            let e: anyhow::Error =
                TabmateError::Config("bot connection is not configured".to_string()).into();
            inner.record_failure(&e);
            return Err(e);
        };

        inner.is_loading = true;
        let result = async {
            let messages = self.gateway.list_messages(conversation_id).await?;

            let stored = repository.load_all().await?;
            let mut session = stored.get(conversation_id).cloned().unwrap_or_else(|| {
                // History for a conversation this install never persisted.
                ChatSession::new(
                    conversation_id,
                    &PageContext {
                        url: String::new(),
                        title: String::new(),
                    },
                )
            });
            session.messages = messages;
            session.touch();
            repository.save(&session).await?;
            Ok::<ChatSession, anyhow::Error>(session)
        }
        .await;

        let session = match result {
            Ok(session) => session,
            Err(e) => {
                inner.record_failure(&e);
                return Err(e);
            }
        };

        self.close_subscription(&mut inner).await;
        inner.session = Some(session);
        if let Err(e) = self.open_subscription(&mut inner, conversation_id).await {
            inner.record_failure(&e);
            return Err(e);
        }
        inner.is_loading = false;
        Ok(())
    }

    /// Clear the active error
    pub async fn clear_error(&self) {
        self.inner.lock().await.error = None;
    }

    /// Capture the observable state at this instant
    pub async fn snapshot(&self) -> StateSnapshot {
        let inner = self.inner.lock().await;
        StateSnapshot {
            messages: inner
                .session
                .as_ref()
                .map(|s| s.messages.clone())
                .unwrap_or_default(),
            is_loading: inner.is_loading,
            is_typing: inner.is_typing,
            error: inner.error.clone(),
            warning: inner.warning.clone(),
            conversation_id: inner.session.as_ref().map(|s| s.id.clone()),
            is_configured: inner.repository.is_some(),
        }
    }

    /// Create a conversation, persist its session record, and subscribe
    async fn open_conversation(
        &self,
        inner: &mut ControllerInner,
        page: &PageContext,
    ) -> Result<String> {
        inner.is_loading = true;
        let conversation_id = self.gateway.create_conversation().await?;

        let session = ChatSession::new(&conversation_id, page);
        if let Some(repository) = &inner.repository {
            repository.save(&session).await?;
        }
        inner.session = Some(session);

        self.open_subscription(inner, &conversation_id).await?;
        inner.is_loading = false;
        tracing::info!(conversation_id = %conversation_id, "opened conversation");
        Ok(conversation_id)
    }

    /// Subscribe to a conversation and spawn its event pump
    async fn open_subscription(
        &self,
        inner: &mut ControllerInner,
        conversation_id: &str,
    ) -> Result<()> {
        let subscription = self.gateway.subscribe(conversation_id).await?;
        let generation = match inner.engine.as_mut() {
            Some(engine) => engine.begin_listening(conversation_id),
            None => {
                return Err(
                    TabmateError::Config("bot connection is not configured".to_string()).into(),
                )
            }
        };

        inner.subscription = Some(subscription.handle);
        inner.pump = Some(self.spawn_pump(subscription.receiver, generation));
        Ok(())
    }

    /// Close the active subscription and retire its generation
    ///
    /// The generation is retired before the close is requested, so an
    /// event racing the close is discarded rather than merged.
    async fn close_subscription(&self, inner: &mut ControllerInner) {
        if let Some(engine) = inner.engine.as_mut() {
            engine.retire();
        }
        if let Some(pump) = inner.pump.take() {
            pump.abort();
        }
        if let Some(handle) = inner.subscription.take() {
            self.gateway.unsubscribe(handle).await;
        }
        if let Some(engine) = inner.engine.as_mut() {
            engine.stop_listening();
        }
    }

    fn spawn_pump(
        &self,
        mut receiver: tokio::sync::mpsc::Receiver<crate::backend::BackendMessage>,
        generation: u64,
    ) -> tokio::task::JoinHandle<()> {
        let inner = self.inner.clone();
        let gateway = self.gateway.clone();
        tokio::spawn(async move {
            while let Some(raw) = receiver.recv().await {
                let message = gateway.map_inbound(raw).await;
                let mut guard = inner.lock().await;
                let state = &mut *guard;

                let outcome = {
                    let (engine, session) = match (state.engine.as_mut(), state.session.as_mut()) {
                        (Some(engine), Some(session)) => (engine, session),
                        _ => continue,
                    };
                    engine.merge(generation, session, message).await
                };

                match outcome {
                    Ok(MergeOutcome::Merged { persisted }) => {
                        state.is_typing = false;
                        if !persisted {
                            state.warning =
                                Some("A message could not be saved to history".to_string());
                        }
                    }
                    Ok(MergeOutcome::Duplicate) | Ok(MergeOutcome::Stale) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "event merge failed");
                    }
                }
            }
        })
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        // The pump holds Arc clones; abort it so it does not outlive us.
        if let Ok(inner) = self.inner.try_lock() {
            if let Some(pump) = &inner.pump {
                pump.abort();
            }
        }
    }
}
