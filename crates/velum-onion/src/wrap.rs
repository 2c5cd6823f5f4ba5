//! Nested wrapping of a plaintext event along a hop path.
//!
//! Layers are built innermost-first: the last hop's routing envelope holds
//! the plaintext event, each earlier hop's envelope holds the next one, the
//! outermost routing envelope is padded to the standard size and sealed
//! inside a carrier addressed to the first hop. Every layer is authored and
//! signed by a key generated for that single envelope.

use std::collections::HashSet;

use velum_crypto::{conversation_key, CryptoError};
use velum_event::{Event, EventDraft, Keys, PublicKey, KIND_CARRIER, KIND_ROUTING, TAG_ROUTE};

use crate::padding::pad_to_exact;
use crate::{pow, OnionError, Result, POW_DIFFICULTY, STANDARD_SIZE};

/// Encrypt `plaintext` to `hop` under a fresh one-shot key, returning the
/// ciphertext and the ephemeral key pair that authored it.
fn seal_to(plaintext: &str, hop: &PublicKey) -> Result<(Keys, String)> {
    let ephemeral = Keys::generate();
    let key = conversation_key(ephemeral.secret_key(), hop)?;
    let ciphertext = match velum_crypto::encrypt(plaintext, &key) {
        Ok(c) => c,
        // An oversized plaintext at any layer means the original event
        // cannot fit the standard size; report it as such.
        Err(CryptoError::MessageSize(size)) => {
            return Err(OnionError::TooLarge {
                size,
                limit: STANDARD_SIZE,
            })
        }
        Err(e) => return Err(e.into()),
    };
    Ok((ephemeral, ciphertext))
}

/// Build one routing layer around `inner` for `hop`: encrypt, stamp proof of
/// work, sign with the one-shot key.
fn wrap_layer(inner: &Event, hop: &PublicKey) -> Result<Event> {
    let serialized = inner.to_json()?;
    let (ephemeral, ciphertext) = seal_to(&serialized, hop)?;

    let mut draft = EventDraft::new(KIND_ROUTING, ciphertext)
        .tag(vec![TAG_ROUTE.to_string(), hop.to_hex()]);
    pow::mine(&mut draft, &ephemeral.public_key(), POW_DIFFICULTY);
    Ok(draft.sign(&ephemeral)?)
}

/// Seal a serialized routing envelope inside a carrier addressed to `hop`.
pub(crate) fn seal_carrier(plaintext: &str, hop: &PublicKey) -> Result<Event> {
    let (ephemeral, ciphertext) = seal_to(plaintext, hop)?;
    let draft = EventDraft::new(KIND_CARRIER, ciphertext)
        .tag(vec![TAG_ROUTE.to_string(), hop.to_hex()]);
    Ok(draft.sign(&ephemeral)?)
}

/// Wrap a signed plaintext event for delivery along `path`, producing the
/// carrier envelope to publish towards the first hop.
///
/// # Errors
///
/// - [`OnionError::EmptyPath`] / [`OnionError::DuplicateHop`] on invalid paths.
/// - [`OnionError::TooLarge`] when the event plus layer overhead cannot fit
///   the standard size; no partial envelope escapes.
pub fn wrap_event(event: &Event, path: &[PublicKey]) -> Result<Event> {
    if path.is_empty() {
        return Err(OnionError::EmptyPath);
    }
    let mut seen = HashSet::new();
    for hop in path {
        if !seen.insert(*hop) {
            return Err(OnionError::DuplicateHop);
        }
    }

    let mut current = event.clone();
    for hop in path.iter().rev() {
        current = wrap_layer(&current, hop)?;
    }

    let padded = pad_to_exact(&current, STANDARD_SIZE)?;
    let serialized = padded.to_json()?;
    debug_assert_eq!(serialized.len(), STANDARD_SIZE);

    seal_carrier(&serialized, &path[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use velum_event::{EventDraft, TAG_NONCE};

    fn plaintext_event() -> Event {
        EventDraft::new(1, "hello").sign(&Keys::generate()).expect("sign")
    }

    fn hops(n: usize) -> Vec<Keys> {
        (0..n).map(|_| Keys::generate()).collect()
    }

    #[test]
    fn test_wrap_produces_carrier_for_first_hop() {
        let event = plaintext_event();
        let path = hops(2);
        let keys: Vec<PublicKey> = path.iter().map(|k| k.public_key()).collect();

        let carrier = wrap_event(&event, &keys).expect("wrap");
        assert_eq!(carrier.kind, KIND_CARRIER);
        assert_eq!(carrier.first_tag_value(TAG_ROUTE), Some(keys[0].to_hex().as_str()));
        carrier.verify().expect("carrier signature");
    }

    #[test]
    fn test_carrier_has_no_nonce_tag_and_one_route_tag() {
        let event = plaintext_event();
        let path = hops(1);
        let keys: Vec<PublicKey> = path.iter().map(|k| k.public_key()).collect();

        let carrier = wrap_event(&event, &keys).expect("wrap");
        let route_tags = carrier.tags.iter().filter(|t| t[0] == TAG_ROUTE).count();
        let nonce_tags = carrier.tags.iter().filter(|t| t[0] == TAG_NONCE).count();
        assert_eq!(route_tags, 1);
        assert_eq!(nonce_tags, 0);
    }

    #[test]
    fn test_carrier_author_is_one_shot() {
        // The wire envelope must not be linkable to the event author or to
        // a previous wrap of the same event.
        let event = plaintext_event();
        let path = hops(1);
        let keys: Vec<PublicKey> = path.iter().map(|k| k.public_key()).collect();

        let a = wrap_event(&event, &keys).expect("wrap");
        let b = wrap_event(&event, &keys).expect("wrap");
        assert_ne!(a.pubkey, event.pubkey);
        assert_ne!(a.pubkey, b.pubkey);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_empty_path_rejected() {
        let event = plaintext_event();
        assert!(matches!(wrap_event(&event, &[]), Err(OnionError::EmptyPath)));
    }

    #[test]
    fn test_duplicate_path_rejected() {
        let event = plaintext_event();
        let hop = Keys::generate().public_key();
        let other = Keys::generate().public_key();
        assert!(matches!(
            wrap_event(&event, &[hop, other, hop]),
            Err(OnionError::DuplicateHop)
        ));
    }

    #[test]
    fn test_oversized_event_rejected() {
        let event = EventDraft::new(1, "x".repeat(40 * 1024))
            .sign(&Keys::generate())
            .expect("sign");
        let keys: Vec<PublicKey> = hops(3).iter().map(|k| k.public_key()).collect();
        assert!(matches!(
            wrap_event(&event, &keys),
            Err(OnionError::TooLarge { .. })
        ));
    }

    #[test]
    fn test_single_hop_still_gets_routing_layer() {
        // Even N = 1 produces routing-inside-carrier; the carrier content is
        // ciphertext, never the plaintext event.
        let event = plaintext_event();
        let path = hops(1);
        let keys: Vec<PublicKey> = path.iter().map(|k| k.public_key()).collect();

        let carrier = wrap_event(&event, &keys).expect("wrap");
        assert!(!carrier.content.contains("hello"));
        assert_ne!(carrier.kind, KIND_ROUTING);
    }
}
