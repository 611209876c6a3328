//! Ports (interfaces) for the conversation protocol
//!
//! Ports define what the core needs from the outside world, independent of
//! implementation details. The only outward-facing seam of the protocol
//! layer is the message transport: a one-way sink through which
//! [`ServiceMessage`](crate::domain::ServiceMessage)s are delivered.

pub mod transport;

pub use transport::MessageTransport;
