use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// What the server hands back when a conversation has been started.
///
/// Besides the conversation id itself this carries the timeout the client
/// side should apply to its own receives, and the depth of the server's
/// work queue at submission time. A non-zero queue depth tells the client
/// that the service body has not started running yet and responses will be
/// delayed; callers can use it as a load-shedding signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationStart {
    #[serde(rename = "conversationId")]
    pub conversation_id: String,
    #[serde(rename = "clientTimeout")]
    pub client_timeout: Duration,
    #[serde(rename = "workQueueSize")]
    pub work_queue_size: usize,
}

/// Generate a fresh conversation id.
///
/// The id combines the current wall-clock time in milliseconds with a
/// random nonce, which makes collisions among concurrently live
/// conversations overwhelmingly unlikely without any coordination.
pub fn new_conversation_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    format!("{}-{}", millis, rand::random::<u32>())
}
