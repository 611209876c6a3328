//! Core domain types for the service-conversation protocol

pub mod core;
pub mod error;


pub use self::core::{
    new_conversation_id, ConversationStart, MessageBody, ProgressInfo, ServiceMessage,
};
pub use error::ConversationError;
