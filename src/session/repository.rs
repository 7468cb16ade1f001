//! Durable CRUD for conversation sessions
//!
//! Sessions are stored as one JSON map per local identity in the
//! larger-quota local tier. The map key is derived by one-way hashing the
//! identity secret, so the substrate never holds the secret in a lookup
//! key. Same-id `save`/`delete` calls are serialized through a per-id
//! lock; the whole-map read-modify-write is serialized by a map lock so
//! that calls for different ids can interleave without losing entries.

use crate::config::RetentionPolicy;
use crate::error::Result;
use crate::session::ChatSession;
use crate::storage::KeyValueTier;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Repository of conversation sessions scoped to one local identity
pub struct SessionRepository {
    tier: Arc<dyn KeyValueTier>,
    namespace: String,
    map_lock: Mutex<()>,
    id_locks: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SessionRepository {
    /// Create a repository over the local tier for the given identity
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::Arc;
    /// use tabmate::session::SessionRepository;
    /// use tabmate::storage::MemoryTier;
    ///
    /// let repo = SessionRepository::new(Arc::new(MemoryTier::new()), "identity-secret");
    /// ```
    pub fn new(tier: Arc<dyn KeyValueTier>, identity_secret: &str) -> Self {
        Self {
            tier,
            namespace: Self::namespace_for(identity_secret),
            map_lock: Mutex::new(()),
            id_locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Derives the storage key for an identity secret by one-way hashing
    fn namespace_for(identity_secret: &str) -> String {
        let digest = Sha256::digest(identity_secret.as_bytes());
        let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
        format!("sessions:{}", hex)
    }

    fn id_lock(&self, id: &str) -> Arc<Mutex<()>> {
        let mut locks = self
            .id_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn read_map(&self) -> Result<HashMap<String, ChatSession>> {
        match self.tier.get(&self.namespace).await? {
            Some(value) => Ok(serde_json::from_value(value)?),
            // First run: no identity key in storage yet.
            None => Ok(HashMap::new()),
        }
    }

    async fn write_map(&self, map: &HashMap<String, ChatSession>) -> Result<()> {
        self.tier
            .set(&self.namespace, serde_json::to_value(map)?)
            .await
    }

    /// Upsert a session by id, overwriting any previous record fully
    ///
    /// No partial merge happens at this layer; merging belongs to the
    /// reconciliation engine.
    pub async fn save(&self, session: &ChatSession) -> Result<()> {
        let lock = self.id_lock(&session.id);
        let _id_guard = lock.lock().await;
        let _map_guard = self.map_lock.lock().await;

        let mut map = self.read_map().await?;
        map.insert(session.id.clone(), session.clone());
        self.write_map(&map).await
    }

    /// Load the full per-identity session set
    ///
    /// Returns an empty map (not an error) when no sessions have been
    /// stored yet.
    pub async fn load_all(&self) -> Result<HashMap<String, ChatSession>> {
        let _map_guard = self.map_lock.lock().await;
        self.read_map().await
    }

    /// Find sessions about the given URL
    ///
    /// Linear scan; session counts are bounded by the retention policy.
    pub async fn find_by_url(&self, url: &str) -> Result<Vec<ChatSession>> {
        let map = self.load_all().await?;
        let mut sessions: Vec<ChatSession> =
            map.into_values().filter(|s| s.source_url == url).collect();
        sessions.sort_by(|a, b| b.last_activity_at.cmp(&a.last_activity_at));
        Ok(sessions)
    }

    /// Delete a session by id; deleting a non-existent id is not an error
    pub async fn delete(&self, id: &str) -> Result<()> {
        let lock = self.id_lock(id);
        let _id_guard = lock.lock().await;
        let _map_guard = self.map_lock.lock().await;

        let mut map = self.read_map().await?;
        map.remove(id);
        self.write_map(&map).await
    }

    /// Apply the retention policy, returning how many sessions were deleted
    ///
    /// Sessions whose `last_activity_at` is older than the age threshold,
    /// or whose rank (sorted oldest-activity-first) falls below
    /// `count - max_sessions`, are deleted. Surviving sessions have their
    /// message lists truncated to the newest `max_messages_per_session`
    /// entries.
    pub async fn cleanup(&self, policy: &RetentionPolicy) -> Result<usize> {
        let _map_guard = self.map_lock.lock().await;

        let mut map = self.read_map().await?;
        let cutoff = Utc::now() - chrono::Duration::days(policy.max_age_days);

        let mut ranked: Vec<(String, chrono::DateTime<Utc>)> = map
            .values()
            .map(|s| (s.id.clone(), s.last_activity_at))
            .collect();
        ranked.sort_by_key(|(_, at)| *at);

        let overflow = ranked.len().saturating_sub(policy.max_sessions);
        let mut deleted = 0;
        for (rank, (id, last_activity)) in ranked.iter().enumerate() {
            if rank < overflow || *last_activity < cutoff {
                map.remove(id);
                deleted += 1;
            }
        }

        for session in map.values_mut() {
            let excess = session
                .messages
                .len()
                .saturating_sub(policy.max_messages_per_session);
            if excess > 0 {
                session.messages.drain(..excess);
            }
        }

        self.write_map(&map).await?;
        if deleted > 0 {
            tracing::info!(deleted = deleted, "retention cleanup removed sessions");
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::PageContext;
    use crate::storage::MemoryTier;
    use chrono::Duration;

    fn repo() -> SessionRepository {
        SessionRepository::new(Arc::new(MemoryTier::new()), "test-identity")
    }

    fn page(url: &str) -> PageContext {
        PageContext {
            url: url.to_string(),
            title: "Page".to_string(),
        }
    }

    fn session_with_activity(id: &str, age: Duration) -> ChatSession {
        let mut session = ChatSession::new(id, &page("https://a.test"));
        session.last_activity_at = Utc::now() - age;
        session
    }

    #[tokio::test]
    async fn test_save_and_load_all() {
        let repo = repo();
        let session = ChatSession::new("c1", &page("https://a.test"));
        repo.save(&session).await.expect("save");

        let all = repo.load_all().await.expect("load");
        assert_eq!(all.len(), 1);
        assert_eq!(all["c1"].source_url, "https://a.test");
    }

    #[tokio::test]
    async fn test_load_all_empty_on_first_run() {
        let repo = repo();
        let all = repo.load_all().await.expect("load");
        assert!(all.is_empty());
    }

    #[tokio::test]
    async fn test_save_overwrites_fully() {
        let repo = repo();
        let mut session = ChatSession::new("c1", &page("https://a.test"));
        repo.save(&session).await.expect("first save");

        session.title = "Renamed".to_string();
        repo.save(&session).await.expect("second save");

        let all = repo.load_all().await.expect("load");
        assert_eq!(all.len(), 1);
        assert_eq!(all["c1"].title, "Renamed");
    }

    #[tokio::test]
    async fn test_find_by_url_filters_and_orders() {
        let repo = repo();
        let mut older = ChatSession::new("c1", &page("https://a.test"));
        older.last_activity_at = Utc::now() - Duration::hours(2);
        let newer = ChatSession::new("c2", &page("https://a.test"));
        let other = ChatSession::new("c3", &page("https://b.test"));
        repo.save(&older).await.expect("save");
        repo.save(&newer).await.expect("save");
        repo.save(&other).await.expect("save");

        let found = repo.find_by_url("https://a.test").await.expect("find");
        assert_eq!(found.len(), 2);
        // Most recently active first.
        assert_eq!(found[0].id, "c2");
        assert_eq!(found[1].id, "c1");
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let repo = repo();
        let session = ChatSession::new("c1", &page("https://a.test"));
        repo.save(&session).await.expect("save");

        repo.delete("c1").await.expect("first delete");
        repo.delete("c1").await.expect("second delete");
        repo.delete("never-existed").await.expect("absent delete");
        assert!(repo.load_all().await.expect("load").is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_removes_oldest_beyond_max_sessions() {
        let repo = repo();
        // Five sessions with distinct activity times, none past the age cutoff.
        for i in 0..5 {
            let session = session_with_activity(&format!("c{}", i), Duration::minutes(i));
            repo.save(&session).await.expect("save");
        }

        let policy = RetentionPolicy {
            max_sessions: 3,
            max_messages_per_session: 100,
            max_age_days: 30,
        };
        let deleted = repo.cleanup(&policy).await.expect("cleanup");
        assert_eq!(deleted, 2);

        let all = repo.load_all().await.expect("load");
        assert_eq!(all.len(), 3);
        // The three most recently active remain (smallest age offsets).
        assert!(all.contains_key("c0"));
        assert!(all.contains_key("c1"));
        assert!(all.contains_key("c2"));
    }

    #[tokio::test]
    async fn test_cleanup_removes_sessions_past_age_threshold() {
        let repo = repo();
        repo.save(&session_with_activity("fresh", Duration::hours(1)))
            .await
            .expect("save");
        repo.save(&session_with_activity("stale", Duration::days(40)))
            .await
            .expect("save");

        let deleted = repo
            .cleanup(&RetentionPolicy::default())
            .await
            .expect("cleanup");
        assert_eq!(deleted, 1);

        let all = repo.load_all().await.expect("load");
        assert!(all.contains_key("fresh"));
        assert!(!all.contains_key("stale"));
    }

    #[tokio::test]
    async fn test_cleanup_noop_under_limits() {
        let repo = repo();
        repo.save(&session_with_activity("c1", Duration::minutes(1)))
            .await
            .expect("save");
        let deleted = repo
            .cleanup(&RetentionPolicy::default())
            .await
            .expect("cleanup");
        assert_eq!(deleted, 0);
    }

    #[tokio::test]
    async fn test_cleanup_truncates_long_message_lists() {
        use crate::session::{ChatMessage, MessageRole};

        let repo = repo();
        let mut session = ChatSession::new("c1", &page("https://a.test"));
        for i in 0..10 {
            session.messages.push(ChatMessage {
                id: format!("m{}", i),
                role: MessageRole::User,
                content: format!("message {}", i),
                timestamp: Utc::now(),
                page_context: None,
            });
        }
        repo.save(&session).await.expect("save");

        let policy = RetentionPolicy {
            max_sessions: 100,
            max_messages_per_session: 4,
            max_age_days: 30,
        };
        repo.cleanup(&policy).await.expect("cleanup");

        let all = repo.load_all().await.expect("load");
        let messages = &all["c1"].messages;
        assert_eq!(messages.len(), 4);
        // Newest messages survive.
        assert_eq!(messages[0].id, "m6");
        assert_eq!(messages[3].id, "m9");
    }

    #[tokio::test]
    async fn test_different_identities_are_namespaced_apart() {
        let tier: Arc<dyn KeyValueTier> = Arc::new(MemoryTier::new());
        let repo_a = SessionRepository::new(tier.clone(), "identity-a");
        let repo_b = SessionRepository::new(tier, "identity-b");

        repo_a
            .save(&ChatSession::new("c1", &page("https://a.test")))
            .await
            .expect("save");
        assert!(repo_b.load_all().await.expect("load").is_empty());
    }

    #[tokio::test]
    async fn test_namespace_never_contains_identity_secret() {
        let namespace = SessionRepository::namespace_for("identity-secret");
        assert!(!namespace.contains("identity-secret"));
        assert!(namespace.starts_with("sessions:"));
        // SHA-256 hex digest length.
        assert_eq!(namespace.len(), "sessions:".len() + 64);
    }

    #[tokio::test]
    async fn test_concurrent_saves_for_different_ids_all_land() {
        let repo = Arc::new(repo());
        let saves = (0..8).map(|i| {
            let repo = repo.clone();
            async move {
                let session = ChatSession::new(format!("c{}", i), &page("https://a.test"));
                repo.save(&session).await.expect("save");
            }
        });
        futures::future::join_all(saves).await;
        assert_eq!(repo.load_all().await.expect("load").len(), 8);
    }
}
