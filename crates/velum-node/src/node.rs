//! The mix node: subscription loop and per-envelope pipeline.
//!
//! Each received carrier runs a single linear pass: age check, atomic
//! replay check, peel, then either re-wrap-and-publish or emit the final
//! plaintext event. Envelopes are independent; there is no ordering between
//! them and a failure anywhere drops the envelope without any signal
//! observable off-node.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use velum_event::{now_timestamp, Event, Keys, PublicKey, KIND_CARRIER};
use velum_onion::{peel_envelope, rewrap, OnionError, Peeled};
use velum_relay::{Filter, RelayPool};

use crate::cache::ReplayCache;

/// Acceptance window for carrier envelopes, in seconds.
pub const MAX_ENVELOPE_AGE_SECS: u64 = 3600;

/// A running mix node.
pub struct MixNode {
    keys: Keys,
    pool: RelayPool,
    cache: ReplayCache,
}

impl MixNode {
    /// Create a node from its long-lived keys and relay pool.
    pub fn new(keys: Keys, pool: RelayPool) -> Self {
        Self {
            keys,
            pool,
            cache: ReplayCache::with_defaults(),
        }
    }

    /// This node's hop address.
    pub fn public_key(&self) -> PublicKey {
        self.keys.public_key()
    }

    /// Subscribe to carriers addressed to this node and process them until
    /// shutdown. In-flight envelopes finish their current step.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let filter = Filter::new()
            .kinds(vec![KIND_CARRIER])
            .p_tag(self.public_key().to_hex());
        let mut sub = self.pool.subscribe(filter).await;
        info!(
            relays = self.pool.urls().len(),
            "subscribed to carrier envelopes"
        );

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("mix node stopping");
                    return;
                }
                envelope = sub.recv() => match envelope {
                    Some(envelope) => {
                        let node = self.clone();
                        tokio::spawn(async move {
                            node.handle_envelope(envelope).await;
                        });
                    }
                    None => {
                        warn!("subscription stream ended");
                        return;
                    }
                },
            }
        }
    }

    /// Run one envelope through the pipeline.
    pub async fn handle_envelope(&self, envelope: Event) {
        // Age gate: reject anything older than the acceptance window.
        let now = now_timestamp();
        if envelope.created_at.saturating_add(MAX_ENVELOPE_AGE_SECS) < now {
            warn!(id = %envelope.id, age = now - envelope.created_at, "stale envelope dropped");
            return;
        }

        // Atomic replay gate. Concurrent receipts of the same id from
        // several relays collapse here; the id stays consumed even if a
        // later step fails (at-most-once).
        if self.cache.check_and_mark(envelope.id, Instant::now()) {
            warn!(id = %envelope.id, "replayed envelope dropped");
            return;
        }

        // The cryptographic pipeline is CPU-bound; keep it off the I/O
        // workers.
        let keys = self.keys.clone();
        let carrier = envelope.clone();
        let peeled = match tokio::task::spawn_blocking(move || peel_envelope(&carrier, &keys)).await
        {
            Ok(peeled) => peeled,
            Err(e) => {
                error!(id = %envelope.id, error = %e, "peel task failed");
                return;
            }
        };

        match peeled {
            Ok(Peeled::Forward { next_hop, routing }) => {
                let sealed =
                    match tokio::task::spawn_blocking(move || rewrap(&routing, &next_hop)).await {
                        Ok(Ok(carrier)) => carrier,
                        Ok(Err(e)) => {
                            error!(id = %envelope.id, error = %e, "re-wrap failed");
                            return;
                        }
                        Err(e) => {
                            error!(id = %envelope.id, error = %e, "re-wrap task failed");
                            return;
                        }
                    };
                self.publish(sealed, "re-wrapped carrier").await;
            }
            Ok(Peeled::Final { event }) => {
                self.publish(event, "final event").await;
            }
            Err(e) => drop_envelope(&envelope, &e),
        }
    }

    /// Fan the event out to every relay; one acceptance counts as forwarded.
    async fn publish(&self, event: Event, what: &str) {
        let summary = self.pool.publish(&event).await;
        if summary.any_succeeded() {
            info!(
                id = %event.id,
                succeeded = summary.succeeded.len(),
                total = summary.total(),
                "published {what}"
            );
            if !summary.failed.is_empty() {
                warn!(id = %event.id, failed = ?summary.failed, "some relays did not accept {what}");
            }
        } else {
            // The envelope stays consumed; there is no retry queue.
            error!(id = %event.id, "failed to publish {what} to any relay");
        }
    }
}

/// Log a dropped envelope at the level its failure class calls for. Crypto
/// failures stay at debug so the node never hints at an oracle; protocol
/// failures are warn; anything else is an internal defect.
fn drop_envelope(envelope: &Event, err: &OnionError) {
    match err {
        OnionError::Crypto(_) | OnionError::Event(_) => {
            debug!(id = %envelope.id, error = %err, "envelope dropped");
        }
        OnionError::Malformed(_) | OnionError::RouteMismatch | OnionError::InsufficientPow => {
            warn!(id = %envelope.id, error = %err, "envelope dropped");
        }
        _ => {
            error!(id = %envelope.id, error = %err, "envelope dropped by internal error");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use velum_event::EventDraft;
    use velum_onion::wrap_event;
    use velum_relay::testing::LocalRelay;

    fn plaintext_event(content: &str) -> Event {
        EventDraft::new(1, content).sign(&Keys::generate()).expect("sign")
    }

    async fn wait_for<F: Fn() -> bool>(what: &str, check: F) {
        for _ in 0..100 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("timed out waiting for {what}");
    }

    #[tokio::test]
    async fn test_final_event_is_emitted() {
        let relay = LocalRelay::start().await.expect("relay");
        let node = MixNode::new(Keys::generate(), RelayPool::new(vec![relay.url()]));

        let event = plaintext_event("hello");
        let carrier = wrap_event(&event, &[node.public_key()]).expect("wrap");

        node.handle_envelope(carrier).await;
        wait_for("final event", || !relay.stored_of_kind(1).is_empty()).await;
        assert_eq!(relay.stored_of_kind(1), vec![event]);
    }

    #[tokio::test]
    async fn test_middle_hop_emits_new_carrier() {
        let relay = LocalRelay::start().await.expect("relay");
        let node = MixNode::new(Keys::generate(), RelayPool::new(vec![relay.url()]));
        let next = Keys::generate();

        let event = plaintext_event("onward");
        let carrier =
            wrap_event(&event, &[node.public_key(), next.public_key()]).expect("wrap");
        let original_carrier_id = carrier.id;

        node.handle_envelope(carrier).await;
        wait_for("forwarded carrier", || {
            !relay.stored_of_kind(KIND_CARRIER).is_empty()
        })
        .await;

        let forwarded = relay.stored_of_kind(KIND_CARRIER);
        assert_eq!(forwarded.len(), 1);
        assert_ne!(forwarded[0].id, original_carrier_id);
        assert_eq!(
            forwarded[0].first_tag_value("p"),
            Some(next.public_key().to_hex().as_str())
        );
        // Nothing plaintext escaped at the middle hop.
        assert!(relay.stored_of_kind(1).is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_envelope_forwarded_once() {
        let relay = LocalRelay::start().await.expect("relay");
        let node = MixNode::new(Keys::generate(), RelayPool::new(vec![relay.url()]));

        let event = plaintext_event("once");
        let carrier = wrap_event(&event, &[node.public_key()]).expect("wrap");

        node.handle_envelope(carrier.clone()).await;
        node.handle_envelope(carrier).await;
        wait_for("final event", || !relay.stored_of_kind(1).is_empty()).await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(relay.stored_of_kind(1).len(), 1);
    }

    #[tokio::test]
    async fn test_stale_envelope_dropped() {
        let relay = LocalRelay::start().await.expect("relay");
        let node = MixNode::new(Keys::generate(), RelayPool::new(vec![relay.url()]));

        let event = plaintext_event("stale");
        let mut carrier = wrap_event(&event, &[node.public_key()]).expect("wrap");
        carrier.created_at = now_timestamp() - 2 * MAX_ENVELOPE_AGE_SECS;

        node.handle_envelope(carrier).await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(relay.stored().is_empty());
    }

    #[tokio::test]
    async fn test_envelope_for_other_node_dropped() {
        let relay = LocalRelay::start().await.expect("relay");
        let node = MixNode::new(Keys::generate(), RelayPool::new(vec![relay.url()]));

        let event = plaintext_event("not mine");
        let carrier = wrap_event(&event, &[Keys::generate().public_key()]).expect("wrap");

        node.handle_envelope(carrier).await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(relay.stored().is_empty());
    }

    #[tokio::test]
    async fn test_tampered_pow_dropped() {
        let relay = LocalRelay::start().await.expect("relay");
        let node = MixNode::new(Keys::generate(), RelayPool::new(vec![relay.url()]));
        let next = Keys::generate();

        // Peel the first layer by hand, corrupt the nonce tag of the next
        // routing envelope, re-seal it, and feed it to the node: the peel
        // rejects the envelope before any publish.
        let event = plaintext_event("tamper");
        let carrier =
            wrap_event(&event, &[next.public_key(), node.public_key()]).expect("wrap");
        let Ok(Peeled::Forward { next_hop: _, mut routing }) = peel_envelope(&carrier, &next)
        else {
            panic!("expected forward at first hop");
        };
        for tag in &mut routing.tags {
            if tag[0] == "nonce" {
                tag[1] = format!("{}9", tag[1]);
            }
        }
        let resealed = rewrap(&routing, &node.public_key()).expect("rewrap");

        node.handle_envelope(resealed).await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(relay.stored().is_empty());
    }

    #[tokio::test]
    async fn test_run_loop_processes_subscribed_envelope() {
        let relay = LocalRelay::start().await.expect("relay");
        let node = Arc::new(MixNode::new(
            Keys::generate(),
            RelayPool::new(vec![relay.url()]),
        ));
        let (shutdown_tx, _) = broadcast::channel(1);
        tokio::spawn(node.clone().run(shutdown_tx.subscribe()));
        // Let the subscription reach the relay before publishing.
        tokio::time::sleep(Duration::from_millis(200)).await;

        let event = plaintext_event("via subscription");
        let carrier = wrap_event(&event, &[node.public_key()]).expect("wrap");
        let publisher = RelayPool::new(vec![relay.url()]);
        assert!(publisher.publish(&carrier).await.any_succeeded());

        wait_for("final event", || !relay.stored_of_kind(1).is_empty()).await;
        assert_eq!(relay.stored_of_kind(1), vec![event]);
        let _ = shutdown_tx.send(());
    }
}
