//! Client side of the conversation protocol
//!
//! The [`ConversationClient`] mirrors the server façade: it starts
//! conversations through a [`RemoteConversationServer`] and routes inbound
//! response messages to the right [`ClientConversation`] by conversation
//! id, with the same index-based duplicate suppression the server applies
//! to its inbound direction.

#[allow(clippy::module_inception)]
pub mod client;
pub mod conversation;

pub use client::{ConversationClient, IncomingResponseTransport, RemoteConversationServer};
pub use conversation::ClientConversation;
