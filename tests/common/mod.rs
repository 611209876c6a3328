//! Shared fixtures for the conversation protocol integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use service_conversation::{
    ConversationClient, ConversationError, ConversationServer, ConversationStart,
    MessageTransport, ProgressInfo, RemoteConversationServer, ServerConfig, Service,
    ServiceFactory, ServiceMessage, ServiceMessenger,
};

/// How long service bodies wait for each client message in tests.
pub const MESSAGE_RECEIVING_TIMEOUT: Duration = Duration::from_millis(500);

/// How long clients wait for each response in tests.
pub const CLIENT_TIMEOUT: Duration = Duration::from_millis(500);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .with_test_writer()
        .try_init();
}

/// A factory built from a closure, so tests do not need one factory struct
/// per service.
pub struct FnFactory {
    type_id: &'static str,
    client_timeout: Duration,
    interrupt_on_client_exception: bool,
    make: Box<dyn Fn() -> Box<dyn Service> + Send + Sync>,
}

impl FnFactory {
    pub fn new(
        type_id: &'static str,
        client_timeout: Duration,
        make: impl Fn() -> Box<dyn Service> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            type_id,
            client_timeout,
            interrupt_on_client_exception: true,
            make: Box::new(make),
        })
    }
}

impl ServiceFactory for FnFactory {
    fn service_type_id(&self) -> &str {
        self.type_id
    }

    fn create(&self) -> Box<dyn Service> {
        (self.make)()
    }

    fn interrupt_on_client_exception(&self) -> bool {
        self.interrupt_on_client_exception
    }

    fn client_timeout(&self) -> Duration {
        self.client_timeout
    }
}

/// Echoes every string it receives, until terminated or timed out.
pub struct EchoService;

#[async_trait]
impl Service for EchoService {
    async fn run(&self, messenger: &ServiceMessenger) -> Result<(), ConversationError> {
        loop {
            let text: String = messenger.receive().await?;
            messenger.send(&text).await?;
        }
    }
}

pub fn echo_factory() -> Arc<FnFactory> {
    FnFactory::new("echo", CLIENT_TIMEOUT, || Box::new(EchoService))
}

/// Echoes exactly one string and completes.
pub struct SingleEchoService;

#[async_trait]
impl Service for SingleEchoService {
    async fn run(&self, messenger: &ServiceMessenger) -> Result<(), ConversationError> {
        let text: String = messenger.receive().await?;
        messenger.send(&text).await
    }
}

pub fn single_echo_factory() -> Arc<FnFactory> {
    FnFactory::new("singleEcho", CLIENT_TIMEOUT, || Box::new(SingleEchoService))
}

/// An unbounded channel posing as a client response transport, so tests
/// can observe exactly what the server sends.
pub struct ChannelTransport(pub mpsc::UnboundedSender<ServiceMessage>);

#[async_trait]
impl MessageTransport for ChannelTransport {
    async fn send(&self, message: ServiceMessage) -> Result<(), ConversationError> {
        self.0
            .send(message)
            .map_err(|err| ConversationError::Transport(err.to_string()))
    }
}

pub fn channel_transport() -> (Arc<ChannelTransport>, mpsc::UnboundedReceiver<ServiceMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(ChannelTransport(tx)), rx)
}

/// Delivers every message twice, simulating transport-level
/// retransmission, so the tests exercise duplicate suppression on every
/// exchange.
pub struct DuplicatingTransport(pub Arc<dyn MessageTransport>);

#[async_trait]
impl MessageTransport for DuplicatingTransport {
    async fn send(&self, message: ServiceMessage) -> Result<(), ConversationError> {
        self.0.send(message.clone()).await?;
        self.0.send(message).await
    }
}

/// In-process client-server wiring: start-conversation calls go straight
/// to the server, and client messages are delivered twice to the server's
/// inbound transport to exercise duplicate suppression.
pub struct TestConnection {
    pub server: ConversationServer,
    pub client_id: &'static str,
}

#[async_trait]
impl RemoteConversationServer for TestConnection {
    async fn start_conversation(
        &self,
        service_type_id: &str,
    ) -> Result<ConversationStart, ConversationError> {
        self.server
            .start_conversation(service_type_id, self.client_id, MESSAGE_RECEIVING_TIMEOUT)
            .await
    }
}

#[async_trait]
impl MessageTransport for TestConnection {
    async fn send(&self, message: ServiceMessage) -> Result<(), ConversationError> {
        let incoming = self.server.incoming_message_transport();
        incoming.send(message.clone()).await?;
        incoming.send(message).await
    }
}

/// Build a wired-up server and client with the given factories. Both
/// directions of the connection deliver every message twice.
pub fn server_and_client(
    factories: Vec<Arc<FnFactory>>,
    config: ServerConfig,
) -> (ConversationServer, ConversationClient) {
    let server = ConversationServer::new(config);
    for factory in factories {
        server
            .add_service_type(factory)
            .expect("factory registration failed");
    }
    let connection = Arc::new(TestConnection {
        server: server.clone(),
        client_id: "dummy-client",
    });
    let client = ConversationClient::new(connection.clone(), connection);
    server.add_client_response_transport(
        "dummy-client",
        Arc::new(DuplicatingTransport(Arc::new(
            client.incoming_response_transport(),
        ))),
    );
    (server, client)
}

/// Wait until the server no longer has the conversation, with a bounded
/// number of attempts.
pub async fn wait_until_gone(server: &ConversationServer, conversation_id: &str) -> bool {
    for _ in 0..100 {
        if !server.has_conversation(conversation_id) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    !server.has_conversation(conversation_id)
}

/// Reports progress ten times and completes without ever receiving.
pub struct ProgressOnlyService;

#[async_trait]
impl Service for ProgressOnlyService {
    async fn run(&self, messenger: &ServiceMessenger) -> Result<(), ConversationError> {
        for step in 0..10 {
            messenger
                .send_progress(ProgressInfo::new(format!("step-{}", step), 10, step))
                .await?;
        }
        Ok(())
    }
}
