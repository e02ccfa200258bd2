//! Conversation management for chatsql-rest
//!
//! Each conversation:
//! - Has a short unique id derived from a UUID
//! - Is guarded by its own async mutex, so turns on one conversation run one
//!   at a time while different conversations proceed in parallel
//! - Has a last-activity timestamp for timeout cleanup

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::chat::Conversation;

/// Shared handle to one conversation
pub type ConversationHandle = Arc<Mutex<Conversation>>;

#[derive(Debug)]
struct Entry {
    conversation: ConversationHandle,
    last_activity: Instant,
}

impl Entry {
    fn new() -> Self {
        Self {
            conversation: Arc::new(Mutex::new(Conversation::new())),
            last_activity: Instant::now(),
        }
    }

    fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    fn is_expired(&self, timeout: Duration) -> bool {
        self.last_activity.elapsed() > timeout
    }
}

/// Generate a 12-character conversation id
pub fn new_id() -> String {
    Uuid::new_v4().simple().to_string()[..12].to_string()
}

/// Manages all active conversations
pub struct ConversationManager {
    conversations: RwLock<HashMap<String, Entry>>,
    /// Conversation inactivity timeout
    timeout: Duration,
}

impl ConversationManager {
    /// Create a new manager with the specified timeout
    pub fn new(timeout_minutes: u64) -> Self {
        Self::with_timeout(Duration::from_secs(timeout_minutes.saturating_mul(60)))
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            conversations: RwLock::new(HashMap::new()),
            timeout,
        }
    }

    // A panicked holder cannot leave the map half-updated
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Entry>> {
        self.conversations
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Entry>> {
        self.conversations
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start a new conversation and return its id and handle
    pub fn create(&self) -> (String, ConversationHandle) {
        let id = new_id();
        let entry = Entry::new();
        let handle = entry.conversation.clone();
        self.write().insert(id.clone(), entry);
        (id, handle)
    }

    /// Look up a conversation, updating its last activity
    pub fn get(&self, id: &str) -> Option<ConversationHandle> {
        let mut conversations = self.write();
        conversations.get_mut(id).map(|entry| {
            entry.touch();
            entry.conversation.clone()
        })
    }

    /// Continue `id` if given, otherwise start a new conversation.
    ///
    /// `None` when an id is given but unknown (or expired).
    pub fn resolve(&self, id: Option<&str>) -> Option<(String, ConversationHandle)> {
        match id {
            Some(id) => self.get(id).map(|handle| (id.to_string(), handle)),
            None => Some(self.create()),
        }
    }

    /// Drop a conversation
    pub fn remove(&self, id: &str) -> bool {
        self.write().remove(id).is_some()
    }

    /// Ids of conversations past the inactivity timeout
    pub fn expired_ids(&self) -> Vec<String> {
        self.read()
            .iter()
            .filter(|(_, entry)| entry.is_expired(self.timeout))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Remove expired conversations, returning how many were dropped
    pub fn remove_expired(&self) -> usize {
        let mut conversations = self.write();
        let before = conversations.len();
        conversations.retain(|_, entry| !entry.is_expired(self.timeout));
        before - conversations.len()
    }

    pub fn exists(&self, id: &str) -> bool {
        self.read().contains_key(id)
    }

    /// Active conversation count (for health check)
    pub fn count(&self) -> usize {
        self.read().len()
    }

    /// Get the timeout duration
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::ChatMessage;
    use std::thread::sleep;

    #[test]
    fn test_id_format() {
        let id = new_id();
        assert_eq!(id.len(), 12);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, new_id());
    }

    #[test]
    fn test_create_and_remove() {
        let manager = ConversationManager::new(30);
        let (id, _) = manager.create();
        assert!(manager.exists(&id));
        assert_eq!(manager.count(), 1);

        assert!(manager.remove(&id));
        assert!(!manager.exists(&id));
        assert!(!manager.remove(&id));
    }

    #[test]
    fn test_resolve() {
        let manager = ConversationManager::new(30);
        let (id, _) = manager.resolve(None).unwrap();
        assert!(manager.resolve(Some(&id)).is_some());
        assert!(manager.resolve(Some("missing")).is_none());
    }

    #[tokio::test]
    async fn test_handles_share_state() {
        let manager = ConversationManager::new(30);
        let (id, handle) = manager.create();
        handle.lock().await.history.push(ChatMessage::user("hello"));

        let again = manager.get(&id).unwrap();
        assert_eq!(again.lock().await.history.len(), 1);
    }

    #[test]
    fn test_huge_timeout_saturates() {
        let manager = ConversationManager::new(u64::MAX);
        assert_eq!(manager.timeout(), Duration::from_secs(u64::MAX));
        let (id, _) = manager.create();
        assert!(manager.expired_ids().is_empty());
        assert!(manager.exists(&id));
    }

    #[test]
    fn test_expiry() {
        let manager = ConversationManager::new(0); // 0 minute timeout = immediate expiry
        let (id, _) = manager.create();

        sleep(Duration::from_millis(10));

        assert_eq!(manager.expired_ids(), vec![id]);
        assert_eq!(manager.remove_expired(), 1);
        assert_eq!(manager.count(), 0);
    }
}
