use std::time::Duration;

use thiserror::Error;

/// Error type for conversation protocol operations.
#[derive(Error, Debug)]
pub enum ConversationError {
    /// A service factory was registered twice for the same type id. This is
    /// a startup configuration error and not recoverable.
    #[error("service type '{0}' is already registered")]
    DuplicateServiceType(String),

    /// A conversation was requested for a service type nobody registered.
    #[error("unknown service type '{0}'")]
    UnknownServiceType(String),

    /// A conversation was requested for a client that has no response
    /// transport registered. Clients must connect before starting
    /// conversations, so this indicates a protocol ordering bug in the
    /// caller.
    #[error("unknown client '{0}'")]
    UnknownClient(String),

    /// A receive found no message within the allotted time. This ends the
    /// conversation but is an expected termination path, not an anomaly.
    #[error("no message received within {timeout:?}")]
    Timeout { timeout: Duration },

    /// The conversation was marked interrupted and refuses further
    /// messenger operations. Expected during cooperative shutdown; service
    /// bodies should let it propagate and unwind.
    #[error("conversation '{0}' has been interrupted")]
    Interrupted(String),

    /// A received message did not decode into the type the caller asked
    /// for. A protocol-contract violation between client and service.
    #[error("expected a payload of type {expected}: {detail}")]
    UnexpectedPayload { expected: String, detail: String },

    /// A message arrived for a conversation id that is neither live nor
    /// recently finished.
    #[error("message for unknown conversation '{0}'")]
    UnknownConversation(String),

    /// The worker pool refused to take on another conversation.
    #[error("conversation rejected: {0}")]
    Rejected(String),

    /// The underlying message transport failed to deliver.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The service body on the other side of the conversation failed; the
    /// description is whatever the server reported in its exception
    /// message.
    #[error("service execution failed in conversation '{conversation_id}': {description}")]
    ServiceExecution {
        conversation_id: String,
        description: String,
    },

    /// Payload (de)serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Anything else.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ConversationError {
    /// Whether this error is the cooperative-interruption signal. The
    /// server treats an interrupted service body as a normal termination
    /// and does not report it back to the client as a failure.
    pub fn is_interruption(&self) -> bool {
        matches!(self, ConversationError::Interrupted(_))
    }
}
