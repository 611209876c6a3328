//! Server side of the conversation protocol
//!
//! The [`ConversationServer`] is the façade: it knows which service types
//! exist, which clients are connected, and which conversations are live. A
//! conversation binds a [`ServiceMessenger`] (the object the running
//! service body sends and receives through) to a worker task on a bounded
//! pool. All inbound client messages enter through the server's single
//! incoming transport and are routed to their conversation by id.

pub mod config;
pub mod messenger;
pub mod pool;
pub mod registry;
#[allow(clippy::module_inception)]
pub mod server;
pub mod service;

pub use config::ServerConfig;
pub use messenger::ServiceMessenger;
pub use registry::{ConversationRecord, ConversationRegistry};
pub use server::{ConversationServer, IncomingMessageTransport};
pub use service::{Service, ServiceFactory};
