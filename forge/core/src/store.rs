//! Conversation Store
//!
//! Process-owned map from conversation id to conversation, injected into
//! whatever handles requests - there is no module-level singleton. Each
//! conversation sits behind its own `RwLock`, so mutations for one id
//! serialize (single writer per id) while snapshots and unrelated
//! conversations proceed in parallel.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::RwLock;

use crate::error::LedgerError;
use crate::session::{Conversation, ConversationId};

/// Shared handle to one conversation.
pub type SharedConversation = Arc<RwLock<Conversation>>;

/// Owner of all live conversations.
pub struct ConversationStore {
    conversations: DashMap<ConversationId, SharedConversation>,
    max_exchanges: usize,
    max_age: Duration,
}

impl ConversationStore {
    /// Create a store with the given history bound and idle expiry age.
    pub fn new(max_exchanges: usize, max_age: Duration) -> Self {
        Self {
            conversations: DashMap::new(),
            max_exchanges,
            max_age,
        }
    }

    /// The configured exchange-pair bound, for callers driving `trim`.
    pub fn max_exchanges(&self) -> usize {
        self.max_exchanges
    }

    /// Number of live conversations.
    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    /// Whether the store holds no conversations.
    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    /// Create a fresh conversation and return its id and handle.
    pub fn create(
        &self,
        model: impl Into<String>,
        preamble: impl Into<String>,
    ) -> (ConversationId, SharedConversation) {
        let conversation = Conversation::new(model, preamble);
        let id = conversation.id().clone();
        let handle = Arc::new(RwLock::new(conversation));
        self.conversations.insert(id.clone(), handle.clone());
        tracing::debug!(conversation = %id, total = self.conversations.len(), "Created conversation");
        (id, handle)
    }

    /// Look up an existing conversation.
    pub fn get(&self, id: &ConversationId) -> Result<SharedConversation, LedgerError> {
        self.conversations
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| LedgerError::UnknownConversation(id.to_string()))
    }

    /// Resolve the conversation for a turn, honoring model binding.
    ///
    /// A missing or unknown id starts a fresh conversation. An existing
    /// conversation bound to a different model is discarded and replaced
    /// with a fresh one - switching models resets history, it never
    /// edits it.
    pub async fn open(
        &self,
        id: Option<&ConversationId>,
        model: &str,
        preamble: &str,
    ) -> (ConversationId, SharedConversation) {
        if let Some(id) = id {
            if let Ok(handle) = self.get(id) {
                let stored_model = handle.read().await.model().to_string();
                if stored_model == model {
                    return (id.clone(), handle);
                }
                tracing::info!(
                    conversation = %id,
                    from = %stored_model,
                    to = %model,
                    "Model changed, starting a fresh conversation"
                );
                self.remove(id);
            }
        }
        self.create(model, preamble)
    }

    /// Drop one conversation.
    pub fn remove(&self, id: &ConversationId) -> bool {
        self.conversations.remove(id).is_some()
    }

    /// Drop every conversation.
    pub fn clear(&self) {
        self.conversations.clear();
    }

    /// Remove conversations idle past the configured age.
    ///
    /// Driven by the session collaborator on its own schedule. Returns
    /// how many conversations were dropped.
    pub async fn purge_idle(&self) -> usize {
        // Snapshot the handles first; holding a map shard while
        // awaiting a conversation lock could deadlock against writers.
        let handles: Vec<(ConversationId, SharedConversation)> = self
            .conversations
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let mut expired = Vec::new();
        for (id, handle) in handles {
            if handle.read().await.idle_for() > self.max_age {
                expired.push(id);
            }
        }

        let mut purged = 0;
        for id in expired {
            if self.remove(&id) {
                purged += 1;
            }
        }
        if purged > 0 {
            tracing::info!(purged, remaining = self.conversations.len(), "Purged idle conversations");
        }
        purged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Role;

    fn store() -> ConversationStore {
        ConversationStore::new(20, Duration::from_secs(24 * 60 * 60))
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = store();
        let (id, _) = store.create("flux", "preamble");
        assert_eq!(store.len(), 1);

        let handle = store.get(&id).unwrap();
        assert_eq!(handle.read().await.model(), "flux");
    }

    #[tokio::test]
    async fn test_get_unknown_id() {
        let store = store();
        let missing = ConversationId::new();
        assert_eq!(
            store.get(&missing),
            Err(LedgerError::UnknownConversation(missing.to_string()))
        );
    }

    #[tokio::test]
    async fn test_open_reuses_matching_model() {
        let store = store();
        let (id, handle) = store.create("flux", "preamble");
        handle.write().await.append(Role::User, "hello").unwrap();

        let (reopened, handle) = store.open(Some(&id), "flux", "preamble").await;
        assert_eq!(reopened, id);
        assert_eq!(handle.read().await.len(), 2);
    }

    #[tokio::test]
    async fn test_open_resets_on_model_switch() {
        let store = store();
        let (id, handle) = store.create("flux", "flux preamble");
        handle.write().await.append(Role::User, "hello").unwrap();

        let (fresh_id, fresh) = store.open(Some(&id), "sdxl", "sdxl preamble").await;
        assert_ne!(fresh_id, id);
        assert_eq!(store.len(), 1);

        let conv = fresh.read().await;
        assert_eq!(conv.model(), "sdxl");
        assert_eq!(conv.len(), 1);
        assert_eq!(conv.preamble().content, "sdxl preamble");
    }

    #[tokio::test]
    async fn test_open_without_id_creates() {
        let store = store();
        let (_, handle) = store.open(None, "flux", "preamble").await;
        assert_eq!(store.len(), 1);
        assert_eq!(handle.read().await.len(), 1);
    }

    #[tokio::test]
    async fn test_mutations_on_one_id_serialize() {
        let store = ConversationStore::new(1000, Duration::from_secs(60));
        let (_, handle) = store.create("flux", "preamble");

        let mut tasks = Vec::new();
        for i in 0..16 {
            let handle = handle.clone();
            tasks.push(tokio::spawn(async move {
                for j in 0..25 {
                    let mut conv = handle.write().await;
                    // Holding the write lock across both appends makes
                    // the pair atomic; interleaving would split pairs.
                    conv.append(Role::User, format!("q {i}/{j}")).unwrap();
                    conv.append(Role::Assistant, format!("a {i}/{j}")).unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let conv = handle.read().await;
        assert_eq!(conv.len(), 1 + 2 * 16 * 25);
        let snapshot = conv.snapshot();
        for pair in snapshot[1..].chunks(2) {
            assert_eq!(pair[0].role, Role::User);
            assert_eq!(pair[1].role, Role::Assistant);
        }
    }

    #[tokio::test]
    async fn test_purge_idle_keeps_fresh_conversations() {
        let store = ConversationStore::new(20, Duration::from_secs(3600));
        store.create("flux", "preamble");
        store.create("flux", "preamble");

        // Nothing is an hour old yet
        assert_eq!(store.purge_idle().await, 0);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_purge_idle_drops_stale_conversations() {
        let store = ConversationStore::new(20, Duration::from_millis(0));
        store.create("flux", "preamble");

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(store.purge_idle().await, 1);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_remove_and_clear() {
        let store = store();
        let (id, _) = store.create("flux", "preamble");
        store.create("flux", "preamble");

        assert!(store.remove(&id));
        assert!(!store.remove(&id));
        assert_eq!(store.len(), 1);

        store.clear();
        assert!(store.is_empty());
    }
}
