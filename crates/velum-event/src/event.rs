//! The event record and its canonical serialization.
//!
//! An event id is the SHA-256 digest of the compact JSON array
//! `[0, pubkey, created_at, kind, tags, content]` with no whitespace. The
//! signature is BIP-340 Schnorr over the id. `serde_json` compact output is
//! the single serializer used for both the id preimage and the wire form, so
//! the two can never drift apart.

use k256::schnorr::signature::{Signer, Verifier};
use k256::schnorr::{SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::keys::{Keys, PublicKey};
use crate::{EventError, Result};

/// An ordered list of strings; the first element names the tag.
pub type Tag = Vec<String>;

/// 32-byte canonical event identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventId([u8; 32]);

impl EventId {
    /// Create from raw digest bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Parse from a 64-character hex string.
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|e| EventError::InvalidHex(e.to_string()))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| EventError::InvalidHex("event id must be 32 bytes".into()))?;
        Ok(Self(bytes))
    }

    /// Lowercase hex form.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EventId({})", self.to_hex())
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for EventId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for EventId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// 64-byte BIP-340 Schnorr signature.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature([u8; 64]);

impl Signature {
    /// Create from raw signature bytes.
    pub fn from_bytes(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    /// Lowercase hex form.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Raw signature bytes.
    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }
}

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Signature({})", self.to_hex())
    }
}

impl Serialize for Signature {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        let bytes: [u8; 64] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("signature must be 64 bytes"))?;
        Ok(Self(bytes))
    }
}

/// A signed event as exchanged with relays.
///
/// Field order matters: the padder measures the serialized form, so every
/// participant must emit the fields in this order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub pubkey: PublicKey,
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Tag>,
    pub content: String,
    /// Absent only on hand-built payloads; everything this crate signs
    /// carries one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sig: Option<Signature>,
}

impl Event {
    /// Recompute the canonical id from the current fields.
    pub fn compute_id(&self) -> EventId {
        canonical_id(&self.pubkey, self.created_at, self.kind, &self.tags, &self.content)
    }

    /// Check that the stated id matches the canonical recomputation.
    pub fn verify_id(&self) -> Result<()> {
        if self.id != self.compute_id() {
            return Err(EventError::IdMismatch);
        }
        Ok(())
    }

    /// Full validation: id recomputation plus Schnorr verification under the
    /// stated author key.
    pub fn verify(&self) -> Result<()> {
        self.verify_id()?;
        let sig = self.sig.as_ref().ok_or(EventError::MissingSignature)?;
        let key = VerifyingKey::from_bytes(self.pubkey.as_bytes())
            .map_err(|_| EventError::InvalidKey("author key is not on the curve".into()))?;
        let sig = k256::schnorr::Signature::try_from(&sig.0[..])
            .map_err(|_| EventError::SignatureVerification)?;
        key.verify(self.id.as_bytes(), &sig)
            .map_err(|_| EventError::SignatureVerification)
    }

    /// Serialize to the compact JSON wire form.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| EventError::Serialization(e.to_string()))
    }

    /// Parse from JSON.
    pub fn from_json(s: &str) -> Result<Self> {
        serde_json::from_str(s).map_err(|e| EventError::Serialization(e.to_string()))
    }

    /// Value of the first tag named `name`, if present.
    pub fn first_tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.len() >= 2 && t[0] == name)
            .map(|t| t[1].as_str())
    }
}

/// An unsigned event under construction.
#[derive(Clone, Debug)]
pub struct EventDraft {
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Tag>,
    pub content: String,
}

impl EventDraft {
    /// Start a draft of the given kind, stamped with the current time.
    pub fn new(kind: u16, content: impl Into<String>) -> Self {
        Self {
            created_at: now_timestamp(),
            kind,
            tags: Vec::new(),
            content: content.into(),
        }
    }

    /// Append a tag (builder style).
    pub fn tag(mut self, tag: Tag) -> Self {
        self.tags.push(tag);
        self
    }

    /// Canonical id this draft would have under the given author key.
    pub fn id_for(&self, author: &PublicKey) -> EventId {
        canonical_id(author, self.created_at, self.kind, &self.tags, &self.content)
    }

    /// Compute the id and sign, consuming the draft.
    pub fn sign(self, keys: &Keys) -> Result<Event> {
        let pubkey = keys.public_key();
        let id = self.id_for(&pubkey);
        let signing = SigningKey::from_bytes(keys.secret_key().as_bytes())
            .map_err(|_| EventError::InvalidKey("not a valid scalar".into()))?;
        let sig: k256::schnorr::Signature = signing.sign(id.as_bytes());
        let mut sig_bytes = [0u8; 64];
        sig_bytes.copy_from_slice(&sig.to_bytes());
        Ok(Event {
            id,
            pubkey,
            created_at: self.created_at,
            kind: self.kind,
            tags: self.tags,
            content: self.content,
            sig: Some(Signature(sig_bytes)),
        })
    }
}

/// Canonical event id: SHA-256 over the compact JSON array
/// `[0, pubkey, created_at, kind, tags, content]`.
pub fn canonical_id(
    pubkey: &PublicKey,
    created_at: u64,
    kind: u16,
    tags: &[Tag],
    content: &str,
) -> EventId {
    let preimage = serde_json::json!([0, pubkey.to_hex(), created_at, kind, tags, content]);
    let digest = Sha256::digest(preimage.to_string().as_bytes());
    EventId(digest.into())
}

/// Current Unix timestamp in seconds.
pub fn now_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signed_event(content: &str) -> Event {
        let keys = Keys::generate();
        EventDraft::new(1, content)
            .tag(vec!["t".into(), "velum".into()])
            .sign(&keys)
            .expect("sign")
    }

    #[test]
    fn test_sign_and_verify() {
        let event = signed_event("hello");
        event.verify().expect("verify");
    }

    #[test]
    fn test_id_matches_recomputation() {
        let event = signed_event("hello");
        assert_eq!(event.id, event.compute_id());
    }

    #[test]
    fn test_tampered_content_fails_id_check() {
        let mut event = signed_event("hello");
        event.content.push('!');
        assert!(matches!(event.verify_id(), Err(EventError::IdMismatch)));
    }

    #[test]
    fn test_tampered_tag_fails_id_check() {
        let mut event = signed_event("hello");
        event.tags.push(vec!["p".into(), "00".repeat(32)]);
        assert!(event.verify_id().is_err());
    }

    #[test]
    fn test_foreign_signature_fails() {
        let event = signed_event("hello");
        let other = signed_event("hello");
        let mut forged = event.clone();
        forged.sig = other.sig;
        assert!(matches!(
            forged.verify(),
            Err(EventError::SignatureVerification)
        ));
    }

    #[test]
    fn test_unsigned_event_fails_verify() {
        let mut event = signed_event("hello");
        event.sig = None;
        assert!(matches!(event.verify(), Err(EventError::MissingSignature)));
    }

    #[test]
    fn test_json_roundtrip_preserves_everything() {
        let event = signed_event("multi\nline \"quoted\" content");
        let json = event.to_json().expect("serialize");
        let restored = Event::from_json(&json).expect("parse");
        assert_eq!(restored, event);
        restored.verify().expect("verify after roundtrip");
    }

    #[test]
    fn test_json_field_order_is_stable() {
        let event = signed_event("x");
        let json = event.to_json().expect("serialize");
        let id_pos = json.find("\"id\"").expect("id");
        let pubkey_pos = json.find("\"pubkey\"").expect("pubkey");
        let sig_pos = json.find("\"sig\"").expect("sig");
        assert!(id_pos < pubkey_pos && pubkey_pos < sig_pos);
    }

    #[test]
    fn test_canonical_id_depends_on_every_field() {
        let keys = Keys::generate();
        let pk = keys.public_key();
        let base = canonical_id(&pk, 1000, 1, &[], "c");
        assert_ne!(base, canonical_id(&pk, 1001, 1, &[], "c"));
        assert_ne!(base, canonical_id(&pk, 1000, 2, &[], "c"));
        assert_ne!(base, canonical_id(&pk, 1000, 1, &[vec!["t".into()]], "c"));
        assert_ne!(base, canonical_id(&pk, 1000, 1, &[], "d"));
    }

    #[test]
    fn test_first_tag_value() {
        let event = signed_event("x");
        assert_eq!(event.first_tag_value("t"), Some("velum"));
        assert_eq!(event.first_tag_value("p"), None);
    }

    #[test]
    fn test_sig_omitted_when_absent() {
        let mut event = signed_event("x");
        event.sig = None;
        let json = event.to_json().expect("serialize");
        assert!(!json.contains("\"sig\""));
        let restored = Event::from_json(&json).expect("parse");
        assert!(restored.sig.is_none());
    }

    #[test]
    fn test_event_id_hex_roundtrip() {
        let event = signed_event("x");
        let hx = event.id.to_hex();
        assert_eq!(EventId::from_hex(&hx).expect("parse"), event.id);
        assert!(EventId::from_hex("abc").is_err());
    }
}
