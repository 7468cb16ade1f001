//! Page-host collaborator interface
//!
//! The reconciliation core never talks to a browser directly; whatever
//! embeds the library implements [`PageHost`] to expose the active page.
//! Extraction failures are typed so callers can distinguish "nothing to
//! extract" from an actual fault. A [`Debouncer`] coalesces rapid
//! tab-change triggers into one extraction.

use crate::session::PageContext;
use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

/// Why the active page could not be extracted
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractError {
    /// No active page exists (no window, no focused tab)
    #[error("no active page is available")]
    NotAvailable,
    /// The active page is an internal one extraction must not touch
    #[error("the active page is an internal page")]
    InternalPage,
    /// The extraction script ran and failed
    #[error("extraction script failed: {0}")]
    ScriptFailed(String),
}

/// Content extracted from the active page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedPage {
    /// URL and title of the page
    pub page: PageContext,
    /// Readable text content
    pub content: String,
}

/// Host capability: read the page the user is currently on
#[async_trait]
pub trait PageHost: Send + Sync {
    /// Extract the active page's context and readable content
    async fn extract_active_page(&self) -> std::result::Result<ExtractedPage, ExtractError>;
}

/// Trailing-edge debouncer for extraction triggers
///
/// Each trigger cancels the previous pending action; the action runs only
/// after the delay passes without another trigger.
pub struct Debouncer {
    delay: Duration,
    pending: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Debouncer {
    /// Create a debouncer with the given trailing delay
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: Mutex::new(None),
        }
    }

    /// Schedule `action`, cancelling any action still waiting
    pub fn trigger<F, Fut>(&self, action: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let delay = self.delay;
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            action().await;
        });

        let mut pending = self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(previous) = pending.replace(task) {
            previous.abort();
        }
    }

    /// Cancel the pending action, if any
    pub fn cancel(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(task) = pending.take() {
            task.abort();
        }
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_rapid_triggers_coalesce_to_one_run() {
        let debouncer = Debouncer::new(Duration::from_millis(30));
        let runs = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            let runs = runs.clone();
            debouncer.trigger(move || async move {
                runs.fetch_add(1, Ordering::SeqCst);
            });
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_spaced_triggers_each_run() {
        let debouncer = Debouncer::new(Duration::from_millis(10));
        let runs = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let runs = runs.clone();
            debouncer.trigger(move || async move {
                runs.fetch_add(1, Ordering::SeqCst);
            });
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancel_drops_pending_action() {
        let debouncer = Debouncer::new(Duration::from_millis(20));
        let runs = Arc::new(AtomicUsize::new(0));

        {
            let runs = runs.clone();
            debouncer.trigger(move || async move {
                runs.fetch_add(1, Ordering::SeqCst);
            });
        }
        debouncer.cancel();

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_extract_error_display() {
        assert_eq!(
            ExtractError::InternalPage.to_string(),
            "the active page is an internal page"
        );
        assert!(ExtractError::ScriptFailed("timeout".to_string())
            .to_string()
            .contains("timeout"));
    }
}
