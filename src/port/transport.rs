//! Message transport port definition

use async_trait::async_trait;

use crate::domain::{ConversationError, ServiceMessage};

/// A one-way sink for conversation messages.
///
/// This is the only operation the protocol core requires of the network
/// layer, in both directions:
///
/// - the caller supplies one implementation per connected client, through
///   which the server pushes responses, exceptions and progress reports;
/// - the server exposes one implementation as its inbound entry point, to
///   which the caller funnels every client message (see
///   [`ConversationServer::incoming_message_transport`](crate::server::ConversationServer::incoming_message_transport));
/// - the client exposes one implementation for the response direction (see
///   [`ConversationClient::incoming_response_transport`](crate::client::ConversationClient::incoming_response_transport)).
///
/// Implementations must tolerate being called concurrently from multiple
/// tasks.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    /// Deliver one message.
    async fn send(&self, message: ServiceMessage) -> Result<(), ConversationError>;
}
