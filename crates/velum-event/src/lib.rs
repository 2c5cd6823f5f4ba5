//! # velum-event
//!
//! The signed event record shared by every Velum participant: end-user
//! clients, the ingress wrapper and the mix nodes all exchange the same
//! JSON event structure over relays.
//!
//! - [`event`] - the [`Event`] record, canonical id computation, tag helpers
//! - [`keys`] - secp256k1 key material and bech32 `npub` addresses
//!
//! The canonical serialization in [`event::canonical_id`] is load-bearing:
//! every participant must produce byte-identical output for the same fields,
//! or id recomputation after un-padding diverges and envelopes are dropped.

pub mod event;
pub mod keys;

pub use event::{canonical_id, now_timestamp, Event, EventDraft, EventId, Signature, Tag};
pub use keys::{Keys, PublicKey, SecretKey};

/// Event kind of the inner routing envelope. Ephemeral range: relays do not
/// persist it.
pub const KIND_ROUTING: u16 = 29000;

/// Event kind of the outer standardized carrier envelope, the only kind
/// published between hops.
pub const KIND_CARRIER: u16 = 29001;

/// Tag name carrying the recipient public key of an envelope.
pub const TAG_ROUTE: &str = "p";

/// Tag name carrying the proof-of-work nonce and committed difficulty.
pub const TAG_NONCE: &str = "nonce";

/// Tag name of the synthetic size-padding tag.
pub const TAG_PADDING: &str = "padding";

/// Error types for event operations.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    /// A hex-encoded field failed to decode or had the wrong length.
    #[error("invalid hex encoding: {0}")]
    InvalidHex(String),

    /// Key bytes did not describe a valid secp256k1 key.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// A bech32 address failed to decode or had an unexpected prefix.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// The stated event id does not match the canonical recomputation.
    #[error("event id mismatch")]
    IdMismatch,

    /// Schnorr signature verification failed.
    #[error("signature verification failed")]
    SignatureVerification,

    /// The event carries no signature where one is required.
    #[error("event is not signed")]
    MissingSignature,

    /// JSON serialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for event operations.
pub type Result<T> = std::result::Result<T, EventError>;
