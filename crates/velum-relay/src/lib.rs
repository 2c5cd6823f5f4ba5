//! # velum-relay
//!
//! Relay connectivity for the Velum overlay: the subscribe and publish
//! primitives both daemons build on.
//!
//! - [`message`] - the JSON array messages exchanged with relays, and the
//!   subscription [`Filter`](message::Filter)
//! - [`pool`] - [`RelayPool`](pool::RelayPool): one long-lived connection
//!   task per configured relay, publish fan-out with per-relay
//!   acknowledgement counting, shared subscriptions
//! - [`testing`] - an in-process relay for exercising the pipeline in tests
//!
//! The pool deliberately does not collapse duplicate events arriving from
//! several relays; the mix node's replay cache owns that decision.

pub mod message;
pub mod pool;
pub mod testing;

pub use message::{ClientMessage, Filter, RelayMessage};
pub use pool::{PublishSummary, RelayPool, Subscription};

/// Error types for relay operations.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Connection establishment or I/O failure.
    #[error("connection error: {0}")]
    Connection(String),

    /// A message did not parse as any known relay message.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// JSON serialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The connection task is gone.
    #[error("relay task stopped")]
    TaskStopped,
}

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;
