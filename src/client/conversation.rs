//! The client-side handle of one conversation

use std::any::type_name;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use crate::domain::{
    ConversationError, ConversationStart, MessageBody, ProgressInfo, ServiceMessage,
};
use crate::port::MessageTransport;

type ProgressListener = Box<dyn Fn(&ProgressInfo) + Send + Sync>;

/// Shared state of one client-side conversation. The client's routing
/// table and the [`ClientConversation`] handle both point at this.
pub(crate) struct ConversationState {
    pub(crate) conversation_id: String,
    client_timeout: Duration,
    work_queue_size: usize,
    outbound: Arc<dyn MessageTransport>,
    next_outgoing_idx: Mutex<u64>,
    inbound_tx: mpsc::UnboundedSender<ServiceMessage>,
    inbound_rx: Mutex<mpsc::UnboundedReceiver<ServiceMessage>>,
    last_seen_inbound_idx: AtomicI64,
    /// Set once an exception message arrives; sticky for the rest of the
    /// conversation.
    service_error: StdMutex<Option<String>>,
    progress_listener: StdMutex<Option<ProgressListener>>,
}

impl ConversationState {
    pub(crate) fn new(start: ConversationStart, outbound: Arc<dyn MessageTransport>) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            conversation_id: start.conversation_id,
            client_timeout: start.client_timeout,
            work_queue_size: start.work_queue_size,
            outbound,
            next_outgoing_idx: Mutex::new(0),
            inbound_tx,
            inbound_rx: Mutex::new(inbound_rx),
            last_seen_inbound_idx: AtomicI64::new(-1),
            service_error: StdMutex::new(None),
            progress_listener: StdMutex::new(None),
        }
    }

    /// Route one server message into this conversation. Applies the same
    /// index-based duplicate suppression as the server's inbound side;
    /// since the server assigns one sequence across payload, exception and
    /// progress messages, the check covers all of them.
    pub(crate) fn handle_inbound(&self, message: ServiceMessage) {
        let idx = message.message_idx() as i64;
        let previous = self.last_seen_inbound_idx.fetch_max(idx, Ordering::SeqCst);
        if previous >= idx {
            debug!(
                "conversation {}: dropping duplicate response with index {} (highest seen: {})",
                self.conversation_id, idx, previous
            );
            return;
        }
        match message.body() {
            MessageBody::Progress { progress } => {
                match self.progress_listener.lock().unwrap().as_ref() {
                    Some(listener) => listener(progress),
                    None => debug!(
                        "conversation {}: progress '{}' ({}/{})",
                        self.conversation_id,
                        progress.label(),
                        progress.num_items_processed(),
                        progress.total_items_to_process()
                    ),
                }
                return;
            }
            MessageBody::Exception { description } => {
                let mut service_error = self.service_error.lock().unwrap();
                if service_error.is_none() {
                    *service_error = Some(description.clone());
                }
                // Fall through to the queue so a parked receive wakes up.
            }
            MessageBody::Payload { .. } => {}
            MessageBody::Terminate => {
                debug!(
                    "conversation {}: ignoring terminate message from server",
                    self.conversation_id
                );
                return;
            }
        }
        let _ = self.inbound_tx.send(message);
    }

    fn check_service_error(&self) -> Result<(), ConversationError> {
        if let Some(description) = self.service_error.lock().unwrap().as_ref() {
            return Err(ConversationError::ServiceExecution {
                conversation_id: self.conversation_id.clone(),
                description: description.clone(),
            });
        }
        Ok(())
    }
}

/// One conversation, as seen from the client.
///
/// Obtained from
/// [`ConversationClient::start_conversation`](crate::client::ConversationClient::start_conversation).
/// Dropping the handle (or calling [`close`](Self::close)) detaches the
/// conversation locally without telling the server anything;
/// [`terminate`](Self::terminate) asks the server to stop the service body
/// as well.
pub struct ClientConversation {
    state: Arc<ConversationState>,
    routes: Arc<StdMutex<HashMap<String, Arc<ConversationState>>>>,
}

impl ClientConversation {
    pub(crate) fn new(
        state: Arc<ConversationState>,
        routes: Arc<StdMutex<HashMap<String, Arc<ConversationState>>>>,
    ) -> Self {
        Self { state, routes }
    }

    /// The id of this conversation.
    pub fn id(&self) -> &str {
        &self.state.conversation_id
    }

    /// The receive timeout declared by the service factory.
    pub fn client_timeout(&self) -> Duration {
        self.state.client_timeout
    }

    /// The depth of the server's work queue when this conversation was
    /// submitted. Non-zero means the service body had to wait for a free
    /// worker.
    pub fn work_queue_size_at_startup(&self) -> usize {
        self.state.work_queue_size
    }

    /// Install a callback invoked for every progress message the server
    /// sends. Without a listener, progress is logged and dropped.
    pub fn set_progress_listener<F>(&self, listener: F)
    where
        F: Fn(&ProgressInfo) + Send + Sync + 'static,
    {
        *self.state.progress_listener.lock().unwrap() = Some(Box::new(listener));
    }

    /// Send a payload message to the service body.
    ///
    /// Fails with [`ConversationError::ServiceExecution`] once the server
    /// has reported a failure for this conversation.
    pub async fn send<T: Serialize + ?Sized>(&self, payload: &T) -> Result<(), ConversationError> {
        self.state.check_service_error()?;
        let value = serde_json::to_value(payload)?;
        let mut next_idx = self.state.next_outgoing_idx.lock().await;
        let idx = *next_idx;
        *next_idx += 1;
        let message = ServiceMessage::payload(self.state.conversation_id.clone(), idx, value);
        // Keep the counter locked across the send so the server observes
        // client messages in sequence order.
        self.state.outbound.send(message).await
    }

    /// Wait for the next payload from the service body and decode it as
    /// `T`, using the factory-declared client timeout.
    pub async fn receive<T: DeserializeOwned>(&self) -> Result<T, ConversationError> {
        match self.next_payload(self.state.client_timeout).await? {
            Some(value) => decode_value(value),
            None => Err(ConversationError::Timeout {
                timeout: self.state.client_timeout,
            }),
        }
    }

    /// Like [`receive`](Self::receive), but with an explicit timeout and
    /// an `Ok(None)` result when nothing arrived in time.
    pub async fn try_receive<T: DeserializeOwned>(
        &self,
        timeout: Duration,
    ) -> Result<Option<T>, ConversationError> {
        match self.next_payload(timeout).await? {
            Some(value) => decode_value(value).map(Some),
            None => Ok(None),
        }
    }

    /// Ask the server to stop the service body, then detach locally.
    pub async fn terminate(self) -> Result<(), ConversationError> {
        let message = ServiceMessage::terminate(self.state.conversation_id.clone());
        self.state.outbound.send(message).await
    }

    /// Detach from the conversation without telling the server anything.
    /// Late messages for it are dropped by the client's router afterwards.
    pub fn close(self) {}

    async fn next_payload(
        &self,
        timeout: Duration,
    ) -> Result<Option<Value>, ConversationError> {
        let deadline = tokio::time::Instant::now() + timeout;
        // An already-reported failure takes precedence over anything still
        // queued.
        self.state.check_service_error()?;
        let mut inbound = self.state.inbound_rx.lock().await;
        loop {
            match tokio::time::timeout_at(deadline, inbound.recv()).await {
                Ok(Some(message)) => match message.into_body() {
                    MessageBody::Payload { value } => return Ok(Some(value)),
                    MessageBody::Exception { description } => {
                        return Err(ConversationError::ServiceExecution {
                            conversation_id: self.state.conversation_id.clone(),
                            description,
                        })
                    }
                    // The router never queues progress or terminate
                    // messages.
                    _ => continue,
                },
                Ok(None) => {
                    return Err(ConversationError::Internal(
                        "conversation message queue closed".to_string(),
                    ))
                }
                Err(_) => return Ok(None),
            }
        }
    }
}

impl Drop for ClientConversation {
    fn drop(&mut self) {
        self.routes
            .lock()
            .unwrap()
            .remove(&self.state.conversation_id);
    }
}

fn decode_value<T: DeserializeOwned>(value: Value) -> Result<T, ConversationError> {
    serde_json::from_value(value).map_err(|err| ConversationError::UnexpectedPayload {
        expected: type_name::<T>().to_string(),
        detail: err.to_string(),
    })
}
