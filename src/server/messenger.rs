//! The per-conversation messenger handed to running service bodies

use std::any::type_name;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::domain::{ConversationError, MessageBody, ProgressInfo, ServiceMessage};
use crate::port::MessageTransport;

/// Outbound state: the sequence counter and the client's sink, guarded by
/// one lock so that assigning a number and handing the message to the
/// transport is a single step. Payload, exception and progress messages all
/// draw from this counter, so the client observes one total order per
/// conversation no matter which task sent what.
struct Outbound {
    next_idx: u64,
    transport: Arc<dyn MessageTransport>,
}

struct MessengerInner {
    conversation_id: String,
    receive_timeout: Duration,
    interrupted: AtomicBool,
    cancellation: CancellationToken,
    inbound_tx: mpsc::UnboundedSender<ServiceMessage>,
    inbound_rx: Mutex<mpsc::UnboundedReceiver<ServiceMessage>>,
    /// Highest inbound message index accepted so far; -1 before the first.
    last_seen_inbound_idx: AtomicI64,
    outbound: Mutex<Outbound>,
}

/// Both ends of one conversation, as seen from the server.
///
/// The running service body uses the typed [`receive`](Self::receive) /
/// [`try_receive`](Self::try_receive) calls to wait for client messages and
/// [`send`](Self::send) / [`send_progress`](Self::send_progress) /
/// [`send_exception`](Self::send_exception) to push messages back. The
/// inbound router feeds client messages in through
/// [`deliver`](Self::deliver).
///
/// Cloning is cheap and produces a handle to the same conversation.
#[derive(Clone)]
pub struct ServiceMessenger {
    inner: Arc<MessengerInner>,
}

impl ServiceMessenger {
    /// Create the messenger for a new conversation, bound to the response
    /// transport of the client that started it. The transport reference is
    /// captured here and used for the whole lifetime of the conversation,
    /// even if the client later reconnects under the same id.
    pub fn new(
        conversation_id: String,
        receive_timeout: Duration,
        transport: Arc<dyn MessageTransport>,
    ) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(MessengerInner {
                conversation_id,
                receive_timeout,
                interrupted: AtomicBool::new(false),
                cancellation: CancellationToken::new(),
                inbound_tx,
                inbound_rx: Mutex::new(inbound_rx),
                last_seen_inbound_idx: AtomicI64::new(-1),
                outbound: Mutex::new(Outbound {
                    next_idx: 0,
                    transport,
                }),
            }),
        }
    }

    /// The id of the conversation this messenger belongs to.
    pub fn conversation_id(&self) -> &str {
        &self.inner.conversation_id
    }

    /// Wait for the next client message and decode its payload as `T`.
    ///
    /// Fails with [`ConversationError::Timeout`] if no message arrives
    /// within the conversation's receive timeout, with
    /// [`ConversationError::Interrupted`] if the conversation has been
    /// interrupted, and with [`ConversationError::UnexpectedPayload`] if
    /// the payload does not decode into `T`.
    pub async fn receive<T: DeserializeOwned>(&self) -> Result<T, ConversationError> {
        match self.next_message(self.inner.receive_timeout).await? {
            Some(message) => self.decode(message),
            None => {
                debug!(
                    "conversation {}: no message received within {:?}",
                    self.inner.conversation_id, self.inner.receive_timeout
                );
                Err(ConversationError::Timeout {
                    timeout: self.inner.receive_timeout,
                })
            }
        }
    }

    /// Like [`receive`](Self::receive), but with an explicit timeout and an
    /// `Ok(None)` result when nothing arrived in time. Still fails on
    /// interruption and on payload type mismatch.
    pub async fn try_receive<T: DeserializeOwned>(
        &self,
        timeout: Duration,
    ) -> Result<Option<T>, ConversationError> {
        match self.next_message(timeout).await? {
            Some(message) => self.decode(message).map(Some),
            None => Ok(None),
        }
    }

    /// Send a payload message to the client.
    ///
    /// Fails fast with [`ConversationError::Interrupted`] once the
    /// conversation has been marked interrupted.
    pub async fn send<T: Serialize + ?Sized>(&self, payload: &T) -> Result<(), ConversationError> {
        if self.is_interrupted() {
            return Err(ConversationError::Interrupted(
                self.inner.conversation_id.clone(),
            ));
        }
        let value = serde_json::to_value(payload)?;
        self.send_raw(|id, idx| ServiceMessage::payload(id, idx, value))
            .await
    }

    /// Send an exception message to the client.
    ///
    /// Deliberately does not check the interrupted flag: exception
    /// notifications are best-effort and may be sent during teardown.
    pub async fn send_exception(&self, description: &str) -> Result<(), ConversationError> {
        let description = description.to_string();
        self.send_raw(|id, idx| ServiceMessage::exception(id, idx, description))
            .await
    }

    /// Send a progress message to the client. Safe to call from a different
    /// task than the service body; the outbound sequence stays gapless.
    pub async fn send_progress(&self, progress: ProgressInfo) -> Result<(), ConversationError> {
        if self.is_interrupted() {
            return Err(ConversationError::Interrupted(
                self.inner.conversation_id.clone(),
            ));
        }
        self.send_raw(|id, idx| ServiceMessage::progress(id, idx, progress))
            .await
    }

    /// Feed one inbound client message into the conversation.
    ///
    /// Messages are delivered at most once: a message whose index is not
    /// greater than the highest index accepted so far is a transport-level
    /// retransmission (or a stale out-of-order delivery, which is dropped
    /// rather than reordered) and is silently discarded.
    pub fn deliver(&self, message: ServiceMessage) {
        let idx = message.message_idx() as i64;
        let previous = self
            .inner
            .last_seen_inbound_idx
            .fetch_max(idx, Ordering::SeqCst);
        if previous >= idx {
            debug!(
                "conversation {}: dropping duplicate or stale message with index {} (highest seen: {})",
                self.inner.conversation_id, idx, previous
            );
            return;
        }
        trace!(
            "conversation {}: queueing inbound message with index {}",
            self.inner.conversation_id,
            idx
        );
        // The receiver lives as long as this messenger, so this cannot fail
        // while the conversation is live.
        let _ = self.inner.inbound_tx.send(message);
    }

    /// Mark the conversation interrupted. Idempotent and sticky: all
    /// subsequent sends and receives fail fast. A receive that is already
    /// parked is not woken by the flag alone; cancelling the worker (see
    /// [`cancellation_token`](Self::cancellation_token)) is what unblocks
    /// it.
    pub fn mark_interrupted(&self) {
        self.inner.interrupted.store(true, Ordering::SeqCst);
    }

    /// Whether the conversation has been marked interrupted.
    pub fn is_interrupted(&self) -> bool {
        self.inner.interrupted.load(Ordering::SeqCst)
    }

    /// The cancellation token of the worker running this conversation.
    /// Cancelling it wakes a parked receive and makes it fail with
    /// [`ConversationError::Interrupted`].
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.inner.cancellation
    }

    async fn send_raw<F>(&self, make: F) -> Result<(), ConversationError>
    where
        F: FnOnce(String, u64) -> ServiceMessage,
    {
        let mut outbound = self.inner.outbound.lock().await;
        let idx = outbound.next_idx;
        outbound.next_idx += 1;
        let transport = outbound.transport.clone();
        let message = make(self.inner.conversation_id.clone(), idx);
        // The lock is held across the transport call so that the client
        // observes messages in sequence order.
        transport.send(message).await
    }

    async fn next_message(
        &self,
        timeout: Duration,
    ) -> Result<Option<ServiceMessage>, ConversationError> {
        if self.is_interrupted() || self.inner.cancellation.is_cancelled() {
            return Err(ConversationError::Interrupted(
                self.inner.conversation_id.clone(),
            ));
        }
        let mut inbound = self.inner.inbound_rx.lock().await;
        tokio::select! {
            _ = self.inner.cancellation.cancelled() => Err(ConversationError::Interrupted(
                self.inner.conversation_id.clone(),
            )),
            received = tokio::time::timeout(timeout, inbound.recv()) => match received {
                Ok(Some(message)) => Ok(Some(message)),
                // The sender half lives in this messenger, so a closed
                // channel means the conversation is gone.
                Ok(None) => Err(ConversationError::Interrupted(
                    self.inner.conversation_id.clone(),
                )),
                Err(_) => Ok(None),
            },
        }
    }

    fn decode<T: DeserializeOwned>(&self, message: ServiceMessage) -> Result<T, ConversationError> {
        match message.into_body() {
            MessageBody::Payload { value } => {
                serde_json::from_value(value).map_err(|err| ConversationError::UnexpectedPayload {
                    expected: type_name::<T>().to_string(),
                    detail: err.to_string(),
                })
            }
            other => Err(ConversationError::UnexpectedPayload {
                expected: type_name::<T>().to_string(),
                detail: format!("got a {} control message", other.kind()),
            }),
        }
    }
}
