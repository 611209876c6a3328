//! The conversation server façade and its inbound message router

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::{debug, error, info, info_span, instrument, warn};

use crate::domain::{
    new_conversation_id, ConversationError, ConversationStart, ProgressInfo, ServiceMessage,
};
use crate::port::MessageTransport;
use crate::server::config::ServerConfig;
use crate::server::messenger::ServiceMessenger;
use crate::server::pool::WorkerPool;
use crate::server::registry::{ConversationRecord, ConversationRegistry};
use crate::server::service::{Service, ServiceFactory};

struct ServerInner {
    factories: Mutex<HashMap<String, Arc<dyn ServiceFactory>>>,
    response_transports: Mutex<HashMap<String, Arc<dyn MessageTransport>>>,
    registry: ConversationRegistry,
    pool: WorkerPool,
    shutdown_timeout: Duration,
}

/// The server side of the conversation protocol.
///
/// Service factories are registered once at startup; clients register a
/// response transport when they connect and deregister it when they leave.
/// Between those two, any number of conversations can be started, each
/// running its service body on a pooled worker task. All inbound client
/// messages must be funneled through the single sink returned by
/// [`incoming_message_transport`](Self::incoming_message_transport).
///
/// Cloning is cheap and produces a handle to the same server.
#[derive(Clone)]
pub struct ConversationServer {
    inner: Arc<ServerInner>,
}

impl ConversationServer {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            inner: Arc::new(ServerInner {
                factories: Mutex::new(HashMap::new()),
                response_transports: Mutex::new(HashMap::new()),
                registry: ConversationRegistry::new(),
                pool: WorkerPool::new(
                    config.max_concurrent_conversations(),
                    config.work_queue_size(),
                ),
                shutdown_timeout: config.shutdown_timeout(),
            }),
        }
    }

    /// Register a service factory under its type id.
    ///
    /// Registering the same type id twice is a configuration error; the
    /// first registration stays in effect.
    pub fn add_service_type(
        &self,
        factory: Arc<dyn ServiceFactory>,
    ) -> Result<(), ConversationError> {
        let type_id = factory.service_type_id().to_string();
        let mut factories = self.inner.factories.lock().unwrap();
        if factories.contains_key(&type_id) {
            error!("service type '{}' is already registered", type_id);
            return Err(ConversationError::DuplicateServiceType(type_id));
        }
        debug!("registered service type '{}'", type_id);
        factories.insert(type_id, factory);
        Ok(())
    }

    /// Register the transport through which responses reach the given
    /// client. Re-registering under the same id replaces the transport for
    /// *future* conversations; running ones keep the transport they
    /// captured at start time.
    pub fn add_client_response_transport(
        &self,
        client_id: &str,
        transport: Arc<dyn MessageTransport>,
    ) {
        self.inner
            .response_transports
            .lock()
            .unwrap()
            .insert(client_id.to_string(), transport);
    }

    /// Deregister a client's response transport. Returns whether an entry
    /// actually existed.
    pub fn remove_client_response_transport(&self, client_id: &str) -> bool {
        self.inner
            .response_transports
            .lock()
            .unwrap()
            .remove(client_id)
            .is_some()
    }

    /// The single entry point for inbound client messages. The external
    /// transport layer must deliver every client message, for every
    /// conversation, to the sink returned here.
    pub fn incoming_message_transport(&self) -> IncomingMessageTransport {
        IncomingMessageTransport {
            inner: self.inner.clone(),
        }
    }

    /// Start a conversation of the given service type on behalf of the
    /// given client.
    ///
    /// `message_receiving_timeout` bounds how long the service body may
    /// wait for each client message before the conversation times out.
    ///
    /// The conversation is registered before its worker is submitted, so
    /// messages arriving right after the caller learns the id are already
    /// routable. If the worker pool refuses the submission, the
    /// registration is rolled back and the rejection is returned.
    #[instrument(skip(self), fields(service_type = %service_type_id, client = %client_id))]
    pub async fn start_conversation(
        &self,
        service_type_id: &str,
        client_id: &str,
        message_receiving_timeout: Duration,
    ) -> Result<ConversationStart, ConversationError> {
        let factory = self
            .inner
            .factories
            .lock()
            .unwrap()
            .get(service_type_id)
            .cloned()
            .ok_or_else(|| ConversationError::UnknownServiceType(service_type_id.to_string()))?;
        let transport = self
            .inner
            .response_transports
            .lock()
            .unwrap()
            .get(client_id)
            .cloned()
            .ok_or_else(|| {
                error!(
                    "client '{}' has no response transport registered",
                    client_id
                );
                ConversationError::UnknownClient(client_id.to_string())
            })?;

        let service = factory.create();
        let conversation_id = new_conversation_id();
        let messenger = ServiceMessenger::new(
            conversation_id.clone(),
            message_receiving_timeout,
            transport,
        );
        let record =
            ConversationRecord::new(messenger.clone(), factory.interrupt_on_client_exception());
        self.inner.registry.insert(conversation_id.clone(), record);

        let span = info_span!(
            "conversation",
            service_type = %service_type_id,
            conversation = %conversation_id
        );
        let worker = run_conversation(self.inner.clone(), service, messenger);
        match self.inner.pool.submit(span, worker) {
            Ok(work_queue_size) => {
                debug!("started conversation {}", conversation_id);
                Ok(ConversationStart {
                    conversation_id,
                    client_timeout: factory.client_timeout(),
                    work_queue_size,
                })
            }
            Err(err) => {
                self.inner.registry.remove(&conversation_id);
                Err(err)
            }
        }
    }

    /// Whether a conversation is currently live.
    pub fn has_conversation(&self, conversation_id: &str) -> bool {
        self.inner.registry.contains(conversation_id)
    }

    /// Report progress to the client of a conversation.
    ///
    /// May be called from any task, concurrently with the service body's
    /// own sends. Reporting progress for a conversation that no longer
    /// exists is a no-op.
    pub async fn report_progress(&self, conversation_id: &str, progress: ProgressInfo) {
        match self.inner.registry.get(conversation_id) {
            Some(record) => {
                if let Err(err) = record.messenger().send_progress(progress).await {
                    warn!(
                        "could not report progress for conversation {}: {}",
                        conversation_id, err
                    );
                }
            }
            None => {
                warn!(
                    "progress reported for unknown conversation {}",
                    conversation_id
                );
            }
        }
    }

    /// Cancel every live conversation and wait up to the configured
    /// shutdown timeout for the worker pool to drain. Returns whether it
    /// drained in time.
    pub async fn shutdown(&self) -> bool {
        self.shutdown_with_timeout(self.inner.shutdown_timeout).await
    }

    /// Like [`shutdown`](Self::shutdown), but without waiting.
    pub async fn shutdown_now(&self) -> bool {
        self.shutdown_with_timeout(Duration::ZERO).await
    }

    async fn shutdown_with_timeout(&self, timeout: Duration) -> bool {
        let records = self.inner.registry.records();
        info!("shutting down, cancelling {} conversation(s)", records.len());
        for record in records {
            record.cancel_worker();
        }
        let drained = self.inner.pool.drain(timeout).await;
        if !drained {
            warn!("worker pool did not drain within {:?}", timeout);
        }
        drained
    }
}

/// The inbound router: classifies every client message by conversation id
/// and either queues it for the service body or interprets it as a control
/// message.
pub struct IncomingMessageTransport {
    inner: Arc<ServerInner>,
}

#[async_trait]
impl MessageTransport for IncomingMessageTransport {
    async fn send(&self, message: ServiceMessage) -> Result<(), ConversationError> {
        self.inner.route(message);
        Ok(())
    }
}

impl ServerInner {
    fn route(&self, message: ServiceMessage) {
        let Some(record) = self.registry.get(message.conversation_id()) else {
            if self.registry.was_recently_seen(message.conversation_id()) {
                debug!(
                    "dropping late message for finished conversation {}",
                    message.conversation_id()
                );
            } else {
                error!(
                    "dropping a {} message: {}",
                    message.body().kind(),
                    ConversationError::UnknownConversation(message.conversation_id().to_string())
                );
            }
            return;
        };
        if message.has_payload() {
            record.messenger().deliver(message);
            return;
        }
        // No payload means a control message: an explicit terminate, or an
        // exception on the client side. Either may interrupt the service
        // body, depending on the conversation's policy.
        let messenger = record.messenger();
        let interrupt = !messenger.is_interrupted()
            && (message.is_terminate() || record.interrupt_on_client_exception());
        if interrupt {
            info!(
                "interrupting conversation {} on client {} message",
                message.conversation_id(),
                message.body().kind()
            );
            messenger.mark_interrupted();
            record.cancel_worker();
        } else {
            debug!(
                "ignoring client {} message for conversation {}",
                message.body().kind(),
                message.conversation_id()
            );
        }
    }
}

/// The worker wrapper around one service body: runs it, reports any
/// failure other than the interruption signal to the client (best-effort),
/// and in all cases retires the conversation from the live registry.
async fn run_conversation(
    inner: Arc<ServerInner>,
    service: Box<dyn Service>,
    messenger: ServiceMessenger,
) {
    if !messenger.cancellation_token().is_cancelled() {
        match AssertUnwindSafe(service.run(&messenger)).catch_unwind().await {
            Ok(Ok(())) => {
                debug!("service body completed");
            }
            Ok(Err(err)) if err.is_interruption() => {
                debug!("service body interrupted");
            }
            Ok(Err(err)) => {
                warn!("service body failed: {}", err);
                if let Err(send_err) = messenger.send_exception(&err.to_string()).await {
                    warn!("could not report the failure to the client: {}", send_err);
                }
            }
            Err(panic) => {
                let description = panic_description(panic);
                error!("service body panicked: {}", description);
                if let Err(send_err) = messenger.send_exception(&description).await {
                    warn!("could not report the panic to the client: {}", send_err);
                }
            }
        }
    }
    inner.registry.remove(messenger.conversation_id());
}

fn panic_description(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text.clone()
    } else {
        "service body panicked".to_string()
    }
}
