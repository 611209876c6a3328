//! Conversation server configuration

use std::time::Duration;

/// Tuning knobs for a [`ConversationServer`](crate::server::ConversationServer).
///
/// The defaults run every conversation immediately on its own worker task
/// with no queueing, and give the pool 60 seconds to drain on shutdown.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    max_concurrent_conversations: Option<usize>,
    work_queue_size: usize,
    shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_conversations: None,
            work_queue_size: 0,
            shutdown_timeout: Duration::from_millis(60_000),
        }
    }
}

impl ServerConfig {
    /// Create a configuration with the documented defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap the number of conversations running at the same time.
    /// Unbounded by default.
    pub fn with_max_concurrent_conversations(mut self, max: usize) -> Self {
        self.max_concurrent_conversations = Some(max);
        self
    }

    /// How many conversations may wait for a free worker before new ones
    /// are rejected. Only meaningful together with a concurrency cap.
    /// Zero by default: when all workers are busy, starting a conversation
    /// fails instead of queueing.
    pub fn with_work_queue_size(mut self, size: usize) -> Self {
        self.work_queue_size = size;
        self
    }

    /// How long [`shutdown`](crate::server::ConversationServer::shutdown)
    /// waits for running conversations to finish. 60 seconds by default.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn max_concurrent_conversations(&self) -> Option<usize> {
        self.max_concurrent_conversations
    }

    pub fn work_queue_size(&self) -> usize {
        self.work_queue_size
    }

    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }
}
