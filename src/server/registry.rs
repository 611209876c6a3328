//! Registry of live conversations and the recently-finished set

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::trace;

use crate::server::messenger::ServiceMessenger;

/// Whole-set eviction of the recently-seen set kicks in once it holds more
/// entries than this.
const RECENTLY_SEEN_SHRINK_THRESHOLD: usize = 100;

/// How long a finished conversation id stays recognizable.
const RECENTLY_SEEN_MAX_AGE: Duration = Duration::from_millis(60_000);

/// Everything the server keeps per live conversation: the messenger and
/// the policy fixed at creation time by the service factory.
#[derive(Clone)]
pub struct ConversationRecord {
    messenger: ServiceMessenger,
    interrupt_on_client_exception: bool,
}

impl ConversationRecord {
    pub fn new(messenger: ServiceMessenger, interrupt_on_client_exception: bool) -> Self {
        Self {
            messenger,
            interrupt_on_client_exception,
        }
    }

    pub fn messenger(&self) -> &ServiceMessenger {
        &self.messenger
    }

    /// Whether a client-side exception should interrupt the service body.
    pub fn interrupt_on_client_exception(&self) -> bool {
        self.interrupt_on_client_exception
    }

    /// Cancel the worker running this conversation. This is what wakes a
    /// service body parked in a blocking receive.
    pub fn cancel_worker(&self) {
        self.messenger.cancellation_token().cancel();
    }
}

/// Thread-safe map of live conversations, with a bounded, time-limited
/// memory of recently finished ones.
///
/// The recently-seen set exists to classify late messages: a message for an
/// id in it is a harmless straggler from a conversation that already ended,
/// while a message for an id that was never seen indicates a protocol
/// error. Eviction is opportunistic: whenever an insertion pushes the set
/// past a size threshold, every entry older than the maximum age is swept
/// out. An id is therefore recognizable for roughly the maximum age, not
/// exactly.
pub struct ConversationRegistry {
    live: Mutex<HashMap<String, ConversationRecord>>,
    recently_seen: Mutex<HashMap<String, Instant>>,
}

impl ConversationRegistry {
    pub fn new() -> Self {
        Self {
            live: Mutex::new(HashMap::new()),
            recently_seen: Mutex::new(HashMap::new()),
        }
    }

    /// Register a conversation. At most one live entry per id.
    pub fn insert(&self, conversation_id: String, record: ConversationRecord) {
        self.live.lock().unwrap().insert(conversation_id, record);
    }

    /// Look up a live conversation.
    pub fn get(&self, conversation_id: &str) -> Option<ConversationRecord> {
        self.live.lock().unwrap().get(conversation_id).cloned()
    }

    /// Whether a conversation is currently live.
    pub fn contains(&self, conversation_id: &str) -> bool {
        self.live.lock().unwrap().contains_key(conversation_id)
    }

    /// Snapshot of all live conversations, for shutdown.
    pub fn records(&self) -> Vec<ConversationRecord> {
        self.live.lock().unwrap().values().cloned().collect()
    }

    /// Remove a conversation from the live set, remembering its id in the
    /// recently-seen set.
    ///
    /// The id is recorded *before* the live entry goes away, so a message
    /// racing the removal is classified as recently seen rather than
    /// unknown.
    pub fn remove(&self, conversation_id: &str) -> Option<ConversationRecord> {
        self.record_recently_seen(conversation_id.to_string());
        let removed = self.live.lock().unwrap().remove(conversation_id);
        if removed.is_some() {
            trace!("conversation {} removed from live registry", conversation_id);
        }
        removed
    }

    /// Whether a conversation id belonged to a recently finished
    /// conversation.
    pub fn was_recently_seen(&self, conversation_id: &str) -> bool {
        self.recently_seen
            .lock()
            .unwrap()
            .contains_key(conversation_id)
    }

    fn record_recently_seen(&self, conversation_id: String) {
        let mut recently_seen = self.recently_seen.lock().unwrap();
        recently_seen.insert(conversation_id, Instant::now());
        if recently_seen.len() > RECENTLY_SEEN_SHRINK_THRESHOLD {
            let now = Instant::now();
            recently_seen.retain(|_, seen_at| now.duration_since(*seen_at) <= RECENTLY_SEEN_MAX_AGE);
        }
    }
}

impl Default for ConversationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::domain::{ConversationError, ServiceMessage};
    use crate::port::MessageTransport;

    struct NullTransport;

    #[async_trait]
    impl MessageTransport for NullTransport {
        async fn send(&self, _message: ServiceMessage) -> Result<(), ConversationError> {
            Ok(())
        }
    }

    fn record(id: &str) -> ConversationRecord {
        let messenger = ServiceMessenger::new(
            id.to_string(),
            Duration::from_millis(100),
            Arc::new(NullTransport),
        );
        ConversationRecord::new(messenger, true)
    }

    #[test]
    fn test_removed_conversation_becomes_recently_seen() {
        let registry = ConversationRegistry::new();
        registry.insert("conv-a".to_string(), record("conv-a"));
        assert!(registry.contains("conv-a"));
        assert!(!registry.was_recently_seen("conv-a"));

        assert!(registry.remove("conv-a").is_some());
        assert!(!registry.contains("conv-a"));
        assert!(registry.was_recently_seen("conv-a"));
        assert!(!registry.was_recently_seen("conv-b"));
    }

    #[test]
    fn test_removing_unknown_id_still_records_it() {
        // A second removal racing the first must classify the id as
        // recently seen, not unknown.
        let registry = ConversationRegistry::new();
        assert!(registry.remove("conv-gone").is_none());
        assert!(registry.was_recently_seen("conv-gone"));
    }

    #[test]
    fn test_recently_seen_survives_eviction_while_fresh() {
        let registry = ConversationRegistry::new();
        for i in 0..(RECENTLY_SEEN_SHRINK_THRESHOLD + 10) {
            registry.remove(&format!("conv-{}", i));
        }
        // Fresh entries are kept even once the threshold is crossed; the
        // sweep only drops aged-out ids.
        assert!(registry.was_recently_seen("conv-0"));
        assert!(registry.was_recently_seen(&format!(
            "conv-{}",
            RECENTLY_SEEN_SHRINK_THRESHOLD + 9
        )));
    }
}
