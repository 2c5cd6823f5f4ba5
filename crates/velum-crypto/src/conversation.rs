//! Conversation-key derivation.
//!
//! ```text
//! shared_x = X coordinate of ECDH(secret, lift_x(public))
//! conv_key = HKDF-SHA256-Extract(salt = "nip44-v2", ikm = shared_x)
//! ```
//!
//! Only the X coordinate of the shared point enters the KDF, so the key is
//! symmetric in its two inputs: `conversation_key(a_sk, b_pk)` equals
//! `conversation_key(b_sk, a_pk)` regardless of point parity.

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use velum_event::{PublicKey, SecretKey};

use crate::{CryptoError, Result};

/// HKDF extract salt binding keys to this scheme version.
const CONVERSATION_SALT: &[u8] = b"nip44-v2";

/// A 32-byte symmetric conversation key.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ConversationKey([u8; 32]);

impl ConversationKey {
    /// Raw key bytes; used only by [`crate::payload`].
    pub(crate) fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Construct from raw bytes. Test-vector support.
    #[cfg(test)]
    pub(crate) fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl std::fmt::Debug for ConversationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ConversationKey(..)")
    }
}

/// Derive the conversation key shared between `secret` and `public`.
///
/// # Errors
///
/// Returns [`CryptoError::InvalidKey`] if `secret` is not a valid scalar or
/// `public` does not name a point on the curve.
pub fn conversation_key(secret: &SecretKey, public: &PublicKey) -> Result<ConversationKey> {
    let secret = k256::SecretKey::from_slice(secret.as_bytes())
        .map_err(|_| CryptoError::InvalidKey("not a valid scalar".into()))?;

    // Lift the x-only key to the even-Y point; the X coordinate of the
    // shared secret is parity-independent.
    let mut sec1 = [0u8; 33];
    sec1[0] = 0x02;
    sec1[1..].copy_from_slice(public.as_bytes());
    let public = k256::PublicKey::from_sec1_bytes(&sec1)
        .map_err(|_| CryptoError::InvalidKey("point is not on the curve".into()))?;

    let shared = k256::ecdh::diffie_hellman(secret.to_nonzero_scalar(), public.as_affine());
    let (prk, _) = Hkdf::<Sha256>::extract(Some(CONVERSATION_SALT), shared.raw_secret_bytes());

    let mut key = [0u8; 32];
    key.copy_from_slice(&prk);
    Ok(ConversationKey(key))
}
