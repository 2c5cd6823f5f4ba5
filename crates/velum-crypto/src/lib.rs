//! # velum-crypto
//!
//! The symmetric envelope-content scheme used between every sender/recipient
//! pair in the overlay ("v2"): secp256k1 ECDH into an HKDF-SHA256
//! conversation key, then per-message ChaCha20 + HMAC-SHA256 with a padded
//! plaintext and a base64 wire form.
//!
//! - [`conversation`] - long-lived conversation key from (secret, public)
//! - [`payload`] - per-message encrypt/decrypt
//!
//! Decryption failures are deliberately collapsed into a single opaque error:
//! a mix node must not act as a padding or MAC oracle towards the network.

pub mod conversation;
pub mod payload;

pub use conversation::{conversation_key, ConversationKey};
pub use payload::{decrypt, encrypt};

/// Error types for cryptographic operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// A key was structurally invalid (off-curve point, zero scalar).
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Plaintext outside the 1..=65535 byte range the scheme supports.
    #[error("plaintext length {0} out of range")]
    MessageSize(usize),

    /// Authenticated decryption failed. No further detail on purpose.
    #[error("payload decryption failed")]
    Decrypt,
}

/// Result type alias for cryptographic operations.
pub type Result<T> = std::result::Result<T, CryptoError>;
