//! # velum-onion
//!
//! The envelope transformation layer of the Velum overlay.
//!
//! - [`padding`] - drive a serialized envelope to an exact byte length
//! - [`pow`] - proof-of-work stamping and validation over event ids
//! - [`wrap`] - nested encryption of a plaintext event along a hop path
//! - [`peel`] - one-layer decryption and validation at a mix node
//!
//! ## Envelope layers
//!
//! ```text
//! carrier (29001)  -- published between hops, content encrypted to one hop
//!   routing (29000) -- padded to exactly 32768 bytes, PoW-stamped
//!     routing (29000) -- one per remaining hop
//!       ...
//!         plaintext event -- the original, signed by its author
//! ```
//!
//! Every routing envelope is authored by a one-shot key, carries a `p` tag
//! naming its recipient hop and a `nonce` tag committing to its proof-of-work
//! difficulty. Size, padding and replay handling here are load-bearing for
//! the anonymity guarantee; changes must keep the serialized forms
//! byte-stable.

pub mod padding;
pub mod peel;
pub mod pow;
pub mod wrap;

pub use peel::{peel_envelope, rewrap, Peeled};
pub use wrap::wrap_event;

/// Exact serialized byte length of the padded routing envelope carried by
/// every carrier.
pub const STANDARD_SIZE: usize = 32768;

/// Minimum committed leading-zero bits of a routing envelope id.
pub const POW_DIFFICULTY: u32 = 16;

/// Error types for envelope transformation.
#[derive(Debug, thiserror::Error)]
pub enum OnionError {
    /// The hop path was empty.
    #[error("hop path cannot be empty")]
    EmptyPath,

    /// The hop path named the same hop twice.
    #[error("hop path contains duplicate entries")]
    DuplicateHop,

    /// The event cannot fit the target size after layering.
    #[error("event too large: {size} bytes exceeds {limit}")]
    TooLarge { size: usize, limit: usize },

    /// Padding arithmetic failed to hit the target exactly.
    #[error("padding error: {0}")]
    Padding(String),

    /// An envelope was structurally invalid (wrong kind, missing tag,
    /// unparseable payload).
    #[error("malformed envelope: {0}")]
    Malformed(String),

    /// The decrypted routing envelope names a different recipient.
    #[error("routing mismatch")]
    RouteMismatch,

    /// Committed difficulty below the floor, or the id does not meet the
    /// committed value.
    #[error("insufficient proof of work")]
    InsufficientPow,

    /// Conversation-key derivation or payload decryption failed.
    #[error(transparent)]
    Crypto(#[from] velum_crypto::CryptoError),

    /// Signature, id or serialization failure from the event layer.
    #[error(transparent)]
    Event(#[from] velum_event::EventError),
}

/// Result type alias for envelope transformation.
pub type Result<T> = std::result::Result<T, OnionError>;
