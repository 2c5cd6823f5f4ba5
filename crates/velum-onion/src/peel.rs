//! One-layer peel at a mix node.
//!
//! [`peel_envelope`] runs the cryptographic segment of the per-envelope
//! pipeline: carrier signature, carrier decryption, routing-envelope
//! validation (recipient tag, proof of work), routing-content decryption,
//! padding strip and id recomputation of the inner payload. Age and replay
//! policy live with the node, which owns the clock and the cache.
//!
//! The routing envelope's proof of work is recomputed over its
//! padding-stripped form; its payload was id- and signature-verified by
//! whoever unwrapped the layer around it, and the payload decrypted here is
//! verified now, before it is forwarded or emitted.

use tracing::warn;

use velum_crypto::conversation_key;
use velum_event::{Event, Keys, PublicKey, KIND_CARRIER, KIND_ROUTING, TAG_ROUTE};

use crate::padding::{pad_to_exact, strip_padding};
use crate::wrap::seal_carrier;
use crate::{pow, OnionError, Result, POW_DIFFICULTY, STANDARD_SIZE};

/// Outcome of peeling one layer.
#[derive(Debug)]
pub enum Peeled {
    /// The payload is another routing envelope; re-wrap it for `next_hop`.
    Forward {
        next_hop: PublicKey,
        routing: Event,
    },
    /// The payload is the final plaintext event; publish it as-is.
    Final { event: Event },
}

/// Peel one layer off a carrier envelope addressed to `node`.
///
/// Every failure is a drop from the caller's point of view; the error
/// variant selects the log level (crypto failures at debug, protocol
/// failures at warn) and nothing is ever surfaced off-node.
pub fn peel_envelope(carrier: &Event, node: &Keys) -> Result<Peeled> {
    if carrier.kind != KIND_CARRIER {
        return Err(OnionError::Malformed(format!(
            "expected carrier kind {KIND_CARRIER}, got {}",
            carrier.kind
        )));
    }

    // Stated id must be canonical and the one-shot author signature valid.
    carrier.verify()?;

    // Decrypt the carrier under (carrier author, node secret).
    let key = conversation_key(node.secret_key(), &carrier.pubkey)?;
    let payload = velum_crypto::decrypt(&carrier.content, &key)?;
    if payload.len() != STANDARD_SIZE {
        // A conforming sender always pads to the standard size. Observed
        // divergence is worth flagging even though parsing may still work.
        warn!(
            observed = payload.len(),
            expected = STANDARD_SIZE,
            "carrier payload size diverges from standard"
        );
    }

    // The payload must be a routing envelope naming this node.
    let routing = Event::from_json(&payload)
        .map_err(|_| OnionError::Malformed("carrier payload is not an event".into()))?;
    if routing.kind != KIND_ROUTING {
        return Err(OnionError::Malformed(format!(
            "expected routing kind {KIND_ROUTING}, got {}",
            routing.kind
        )));
    }
    let own_hex = node.public_key().to_hex();
    match routing.first_tag_value(TAG_ROUTE) {
        Some(route) if route == own_hex => {}
        Some(_) => return Err(OnionError::RouteMismatch),
        None => return Err(OnionError::Malformed("routing envelope has no recipient tag".into())),
    }
    pow::check(&routing, POW_DIFFICULTY)?;

    // Decrypt the routing content under (routing author, node secret).
    let inner_key = conversation_key(node.secret_key(), &routing.pubkey)?;
    let inner_payload = velum_crypto::decrypt(&routing.content, &inner_key)?;

    // Strip padding, then the stated id must recompute over what remains.
    let inner = Event::from_json(&inner_payload)
        .map_err(|_| OnionError::Malformed("routing payload is not an event".into()))?;
    let inner = strip_padding(&inner);
    inner.verify_id()?;
    if inner.sig.is_some() {
        inner.verify()?;
    }

    if inner.kind == KIND_ROUTING {
        // The next layer must carry its own valid proof of work and name
        // the hop to forward to.
        pow::check(&inner, POW_DIFFICULTY)?;
        let next_hop = inner
            .first_tag_value(TAG_ROUTE)
            .ok_or_else(|| OnionError::Malformed("next routing envelope has no recipient tag".into()))?;
        let next_hop = PublicKey::from_hex(next_hop)?;
        Ok(Peeled::Forward {
            next_hop,
            routing: inner,
        })
    } else {
        Ok(Peeled::Final { event: inner })
    }
}

/// Re-package a peeled routing envelope for its next hop: pad to the
/// standard size, seal inside a fresh carrier addressed to `next_hop`.
pub fn rewrap(routing: &Event, next_hop: &PublicKey) -> Result<Event> {
    let padded = pad_to_exact(routing, STANDARD_SIZE)?;
    let serialized = padded.to_json()?;
    seal_carrier(&serialized, next_hop)
}
