use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Progress of a long-running service operation.
///
/// Purely informational: the server side reports how far a piece of work
/// has come, and the client side may display it. Progress never influences
/// the conversation protocol itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressInfo {
    label: String,
    #[serde(rename = "totalItemsToProcess")]
    total_items_to_process: u64,
    #[serde(rename = "numItemsProcessed")]
    num_items_processed: u64,
}

impl ProgressInfo {
    /// Create a new progress report.
    pub fn new(label: impl Into<String>, total_items_to_process: u64, num_items_processed: u64) -> Self {
        Self {
            label: label.into(),
            total_items_to_process,
            num_items_processed,
        }
    }

    /// A short description of the work being done.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// How many items there are to process in total.
    pub fn total_items_to_process(&self) -> u64 {
        self.total_items_to_process
    }

    /// How many items have been processed so far.
    pub fn num_items_processed(&self) -> u64 {
        self.num_items_processed
    }
}

/// The four kinds of content a [`ServiceMessage`] can carry.
///
/// Exactly one variant applies to any message, so a message cannot be both
/// an exception and a progress report, or carry a payload alongside a
/// terminate marker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum MessageBody {
    /// A regular application payload.
    #[serde(rename = "payload")]
    Payload { value: Value },
    /// An error description from the other side of the conversation.
    #[serde(rename = "exception")]
    Exception { description: String },
    /// A progress report (server to client only).
    #[serde(rename = "progress")]
    Progress { progress: ProgressInfo },
    /// A request to end the conversation (client to server only).
    #[serde(rename = "terminate")]
    Terminate,
}

impl MessageBody {
    /// The kind of this body, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            MessageBody::Payload { .. } => "payload",
            MessageBody::Exception { .. } => "exception",
            MessageBody::Progress { .. } => "progress",
            MessageBody::Terminate => "terminate",
        }
    }
}

/// The unit of transport of the conversation protocol.
///
/// A message belongs to exactly one conversation and carries a sequence
/// number assigned by its sender. Client-to-server and server-to-client
/// sequences are independent; within one direction the numbers increase
/// monotonically, which receivers use to drop transport-level
/// retransmissions.
///
/// Messages are immutable once constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceMessage {
    #[serde(rename = "conversationId")]
    conversation_id: String,
    #[serde(rename = "messageIdx")]
    message_idx: u64,
    body: MessageBody,
}

impl ServiceMessage {
    /// Create a payload message.
    pub fn payload(conversation_id: impl Into<String>, message_idx: u64, value: Value) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            message_idx,
            body: MessageBody::Payload { value },
        }
    }

    /// Create an exception message carrying an error description.
    pub fn exception(
        conversation_id: impl Into<String>,
        message_idx: u64,
        description: impl Into<String>,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            message_idx,
            body: MessageBody::Exception {
                description: description.into(),
            },
        }
    }

    /// Create a progress message.
    pub fn progress(
        conversation_id: impl Into<String>,
        message_idx: u64,
        progress: ProgressInfo,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            message_idx,
            body: MessageBody::Progress { progress },
        }
    }

    /// Create a terminate message for the given conversation.
    pub fn terminate(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            message_idx: 0,
            body: MessageBody::Terminate,
        }
    }

    /// The conversation this message belongs to.
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// The per-direction sequence number assigned by the sender.
    pub fn message_idx(&self) -> u64 {
        self.message_idx
    }

    /// The content of this message.
    pub fn body(&self) -> &MessageBody {
        &self.body
    }

    /// Consume the message and return its content.
    pub fn into_body(self) -> MessageBody {
        self.body
    }

    /// Whether this message carries a regular application payload, as
    /// opposed to one of the control variants.
    pub fn has_payload(&self) -> bool {
        matches!(self.body, MessageBody::Payload { .. })
    }

    /// Whether this message asks for the conversation to end.
    pub fn is_terminate(&self) -> bool {
        matches!(self.body, MessageBody::Terminate)
    }
}
