//! Transport module - address parsing and socket handling.
//!
//! Provides abstraction over:
//! - TCP sockets (`tcp://host:port`)
//! - Unix Domain Sockets (`unix:///path` or a bare path)

mod address;
mod connection;

pub use address::Address;
pub use connection::{connect, Connection};
