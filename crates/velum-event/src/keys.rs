//! secp256k1 key material and bech32 addresses.
//!
//! Public keys are the 32-byte x-only form used on the wire (hex in event
//! JSON, bech32 `npub` in configuration). Secret keys are zeroized on drop:
//! the wrap pipeline creates one ephemeral key per envelope layer and the
//! key must not outlive the envelope it signs.

use bech32::{Bech32, Hrp};
use k256::schnorr::SigningKey;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{EventError, Result};

/// Bech32 human-readable prefix for public keys.
const PUBKEY_HRP: &str = "npub";

/// A 32-byte secp256k1 secret key.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey([u8; 32]);

impl SecretKey {
    /// Create from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::InvalidKey`] if the bytes are not a valid
    /// secp256k1 scalar.
    pub fn from_bytes(bytes: [u8; 32]) -> Result<Self> {
        SigningKey::from_bytes(&bytes).map_err(|_| EventError::InvalidKey("not a valid scalar".into()))?;
        Ok(Self(bytes))
    }

    /// Parse from a 64-character hex string.
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|e| EventError::InvalidHex(e.to_string()))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| EventError::InvalidKey("secret key must be 32 bytes".into()))?;
        Self::from_bytes(bytes)
    }

    /// Raw key bytes. Handle with care; never logged.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretKey(..)")
    }
}

/// A 32-byte x-only secp256k1 public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; 32]);

impl PublicKey {
    /// Create from raw x-only bytes. Curve membership is checked at
    /// signature-verification time, not here; wire parsing stays lenient.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Parse from a 64-character hex string.
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|e| EventError::InvalidHex(e.to_string()))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| EventError::InvalidKey("public key must be 32 bytes".into()))?;
        Ok(Self(bytes))
    }

    /// Lowercase hex form used in event JSON and routing tags.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Raw x-only bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Encode as a bech32 `npub` address.
    pub fn to_npub(&self) -> Result<String> {
        let hrp = Hrp::parse(PUBKEY_HRP).map_err(|e| EventError::InvalidAddress(e.to_string()))?;
        bech32::encode::<Bech32>(hrp, &self.0).map_err(|e| EventError::InvalidAddress(e.to_string()))
    }

    /// Decode from a bech32 `npub` address.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::InvalidAddress`] on checksum failure, a prefix
    /// other than `npub`, or a payload that is not 32 bytes.
    pub fn from_npub(s: &str) -> Result<Self> {
        let (hrp, data) = bech32::decode(s).map_err(|e| EventError::InvalidAddress(e.to_string()))?;
        let expected = Hrp::parse(PUBKEY_HRP).map_err(|e| EventError::InvalidAddress(e.to_string()))?;
        if hrp != expected {
            return Err(EventError::InvalidAddress(format!(
                "expected prefix {PUBKEY_HRP}, got {hrp}"
            )));
        }
        let bytes: [u8; 32] = data
            .try_into()
            .map_err(|_| EventError::InvalidAddress("payload must be 32 bytes".into()))?;
        Ok(Self(bytes))
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey({})", self.to_hex())
    }
}

impl std::fmt::Display for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for PublicKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// A secret/public key pair.
#[derive(Clone)]
pub struct Keys {
    secret: SecretKey,
    public: PublicKey,
}

impl Keys {
    /// Generate a fresh key pair from the OS RNG.
    pub fn generate() -> Self {
        let signing = SigningKey::random(&mut OsRng);
        let public = PublicKey(signing.verifying_key().to_bytes().into());
        Self {
            secret: SecretKey(signing.to_bytes().into()),
            public,
        }
    }

    /// Build a key pair from an existing secret key.
    pub fn from_secret(secret: SecretKey) -> Result<Self> {
        let signing = SigningKey::from_bytes(secret.as_bytes())
            .map_err(|_| EventError::InvalidKey("not a valid scalar".into()))?;
        let public = PublicKey(signing.verifying_key().to_bytes().into());
        Ok(Self { secret, public })
    }

    /// The secret half.
    pub fn secret_key(&self) -> &SecretKey {
        &self.secret
    }

    /// The public half.
    pub fn public_key(&self) -> PublicKey {
        self.public
    }
}

impl std::fmt::Debug for Keys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Keys({})", self.public.to_hex())
    }
}
