//! The contract between the conversation server and service implementations

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::ConversationError;
use crate::server::messenger::ServiceMessenger;

/// One service body, executed once per conversation on a worker task.
///
/// The body talks to its client exclusively through the messenger it is
/// given. Returning `Ok` completes the conversation; returning an error
/// (other than the interruption signal) reports the failure to the client
/// before the conversation is torn down.
#[async_trait]
pub trait Service: Send + Sync {
    /// Run the conversation.
    async fn run(&self, messenger: &ServiceMessenger) -> Result<(), ConversationError>;
}

/// Creates service bodies for one service type.
///
/// A factory is registered once with the server under its type id and is
/// consulted every time a client starts a conversation of that type.
pub trait ServiceFactory: Send + Sync {
    /// The type id clients use to address this service.
    fn service_type_id(&self) -> &str;

    /// Create a fresh service body for one conversation.
    fn create(&self) -> Box<dyn Service>;

    /// Whether an exception on the client side should interrupt the
    /// running service body, or leave it to finish on its own.
    fn interrupt_on_client_exception(&self) -> bool {
        true
    }

    /// The receive timeout the client side of a conversation should use.
    fn client_timeout(&self) -> Duration;
}
