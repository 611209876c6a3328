//! The conversation client façade and its response router

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::debug;

use crate::client::conversation::{ClientConversation, ConversationState};
use crate::domain::{ConversationError, ConversationStart, ServiceMessage};
use crate::port::MessageTransport;

/// The client's view of a conversation server: the one call that cannot be
/// expressed as a plain message send. How the call crosses the network is
/// up to the implementation; in-process wiring can simply delegate to
/// [`ConversationServer::start_conversation`](crate::server::ConversationServer::start_conversation).
#[async_trait]
pub trait RemoteConversationServer: Send + Sync {
    /// Start a conversation of the given service type on behalf of this
    /// client.
    async fn start_conversation(
        &self,
        service_type_id: &str,
    ) -> Result<ConversationStart, ConversationError>;
}

/// The client side of the conversation protocol.
///
/// Holds the transport through which client messages reach the server and
/// a routing table of open conversations. The network layer must deliver
/// every server response to the sink returned by
/// [`incoming_response_transport`](Self::incoming_response_transport).
pub struct ConversationClient {
    remote: Arc<dyn RemoteConversationServer>,
    outbound: Arc<dyn MessageTransport>,
    routes: Arc<Mutex<HashMap<String, Arc<ConversationState>>>>,
}

impl ConversationClient {
    pub fn new(
        remote: Arc<dyn RemoteConversationServer>,
        outbound: Arc<dyn MessageTransport>,
    ) -> Self {
        Self {
            remote,
            outbound,
            routes: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// The single entry point for server responses. Every server-to-client
    /// message, for every conversation, must be funneled through the sink
    /// returned here.
    pub fn incoming_response_transport(&self) -> IncomingResponseTransport {
        IncomingResponseTransport {
            routes: self.routes.clone(),
        }
    }

    /// Start a conversation of the given service type and return the
    /// handle for talking to it.
    pub async fn start_conversation(
        &self,
        service_type_id: &str,
    ) -> Result<ClientConversation, ConversationError> {
        let start = self.remote.start_conversation(service_type_id).await?;
        debug!(
            "started conversation {} (service type '{}', queued behind {})",
            start.conversation_id, service_type_id, start.work_queue_size
        );
        let state = Arc::new(ConversationState::new(start, self.outbound.clone()));
        self.routes
            .lock()
            .unwrap()
            .insert(state.conversation_id.clone(), state.clone());
        Ok(ClientConversation::new(state, self.routes.clone()))
    }
}

/// Routes server responses to their conversation by id. Messages for
/// conversations this client no longer knows are dropped.
pub struct IncomingResponseTransport {
    routes: Arc<Mutex<HashMap<String, Arc<ConversationState>>>>,
}

#[async_trait]
impl MessageTransport for IncomingResponseTransport {
    async fn send(&self, message: ServiceMessage) -> Result<(), ConversationError> {
        let state = self
            .routes
            .lock()
            .unwrap()
            .get(message.conversation_id())
            .cloned();
        match state {
            Some(state) => state.handle_inbound(message),
            None => debug!(
                "dropping response for unknown conversation {}",
                message.conversation_id()
            ),
        }
        Ok(())
    }
}
