//! Bidirectional service-conversation protocol layer.
//!
//! A *conversation* is one long-running, stateful exchange between a client
//! and a named service implementation running on a server. Both sides send
//! an ordered sequence of typed messages; the server side can additionally
//! push progress updates, and either side can end the conversation (the
//! client by terminating it, the server by returning, failing, or timing
//! out while waiting for the next client message).
//!
//! The crate is organized hexagonally:
//!
//! - [`domain`]: the message envelope, progress payload, conversation start
//!   ticket and the error taxonomy
//! - [`port`]: the transport seam — everything the core needs from the
//!   network layer is a single `send(message)` sink
//! - [`server`]: the conversation server (service registry, per-conversation
//!   messenger, worker pool, inbound router)
//! - [`client`]: the client-side counterpart used to talk to a conversation
//!   server through a pair of transports
//!
//! The concrete transport between client and server is out of scope: the
//! server hands out one inbound sink and accepts one outbound sink per
//! client, and how messages physically travel between them is up to the
//! caller.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use async_trait::async_trait;
//! use service_conversation::{
//!     ConversationError, ConversationServer, ServerConfig, Service, ServiceFactory,
//!     ServiceMessenger,
//! };
//!
//! struct EchoService;
//!
//! #[async_trait]
//! impl Service for EchoService {
//!     async fn run(&self, messenger: &ServiceMessenger) -> Result<(), ConversationError> {
//!         let request: String = messenger.receive().await?;
//!         messenger.send(&request).await
//!     }
//! }
//!
//! struct EchoFactory;
//!
//! impl ServiceFactory for EchoFactory {
//!     fn service_type_id(&self) -> &str {
//!         "echo"
//!     }
//!
//!     fn create(&self) -> Box<dyn Service> {
//!         Box::new(EchoService)
//!     }
//!
//!     fn client_timeout(&self) -> Duration {
//!         Duration::from_millis(100)
//!     }
//! }
//!
//! # async fn example() -> Result<(), ConversationError> {
//! let server = ConversationServer::new(ServerConfig::default());
//! server.add_service_type(Arc::new(EchoFactory))?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod domain;
pub mod port;
pub mod server;

pub use client::{ClientConversation, ConversationClient, RemoteConversationServer};
pub use domain::{
    ConversationError, ConversationStart, MessageBody, ProgressInfo, ServiceMessage,
};
pub use port::MessageTransport;
pub use server::{
    ConversationServer, ServerConfig, Service, ServiceFactory, ServiceMessenger,
};
