//! Tabmate - conversation session reconciliation and persistence core
//!
//! This library provides the client-side core of a page-aware chat
//! assistant: durable conversation sessions, encrypted secret storage,
//! a remote conversation gateway, and the event reconciliation engine
//! that keeps local state consistent with the backend.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `session`: Session data model, repository, reconciliation engine,
//!   and the UI-facing controller
//! - `backend`: Backend contract trait and its HTTP implementation
//! - `gateway`: Credential lifecycle and vendor payload translation
//! - `storage`: Key-value tiers and at-rest secret encryption
//! - `host`: Page-extraction collaborator interface and debouncer
//! - `relay`: Content-relay webhook delivery
//! - `config`: Configuration management and validation
//! - `error`: Error types, the closed error taxonomy, and the classifier
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tabmate::backend::HttpBackend;
//! use tabmate::session::{PageContext, SessionController};
//! use tabmate::storage::StorageAreas;
//! use tabmate::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     config.validate()?;
//!
//!     let backend = Arc::new(HttpBackend::new(&config.bot)?);
//!     let controller = SessionController::new(backend, StorageAreas::open()?);
//!     if controller.configure(&config).await {
//!         let page = PageContext {
//!             url: "https://example.test/article".to_string(),
//!             title: "An Article".to_string(),
//!         };
//!         controller.send_message("What is this page about?", &page).await?;
//!     }
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod gateway;
pub mod host;
pub mod relay;
pub mod session;
pub mod storage;

// Re-export commonly used types
pub use config::{Config, RetentionPolicy};
pub use error::{classify, ErrorKind, Result, TabmateError};
pub use gateway::ConversationGateway;
pub use session::{ChatMessage, ChatSession, SessionController, StateSnapshot};
pub use storage::StorageAreas;

#[cfg(test)]
pub mod test_utils;
