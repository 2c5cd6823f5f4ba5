//! Inbound WebSocket endpoint for end-user clients.
//!
//! Speaks the subset of the relay protocol a publishing client needs:
//! `EVENT` submissions are verified, wrapped for a freshly shuffled hop
//! path and fanned out to the server relays, then answered with `OK`.
//! Nothing is stored, so `REQ` is answered with an immediate `EOSE`.
//!
//! Only the oversize case is surfaced to the client, and it is detected
//! during wrapping, before any network I/O. A downstream publish failure is
//! logged and otherwise invisible: the submission was accepted.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use velum_event::{Event, PublicKey};
use velum_onion::{wrap_event, OnionError, STANDARD_SIZE};
use velum_relay::{ClientMessage, RelayMessage, RelayPool};

use crate::path::shuffle_path;

/// The ingress wrapper service.
pub struct Ingress {
    hops: Vec<PublicKey>,
    pool: RelayPool,
}

impl Ingress {
    /// Create an ingress for a validated hop path and server relay pool.
    pub fn new(hops: Vec<PublicKey>, pool: RelayPool) -> Self {
        Self { hops, pool }
    }

    /// Accept client connections until shutdown.
    pub async fn run(
        self: Arc<Self>,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("ingress stopping");
                    return;
                }
                conn = listener.accept() => match conn {
                    Ok((stream, peer)) => {
                        debug!(%peer, "client connected");
                        let ingress = self.clone();
                        tokio::spawn(async move {
                            ingress.serve_client(stream).await;
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                    }
                },
            }
        }
    }

    async fn serve_client(&self, stream: TcpStream) {
        let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
            return;
        };
        let (mut sink, mut source) = ws.split();

        while let Some(msg) = source.next().await {
            match msg {
                Ok(Message::Text(text)) => match ClientMessage::from_json(&text) {
                    Ok(ClientMessage::Event(event)) => {
                        let reply = self.submit(event).await;
                        if send(&mut sink, &reply).await.is_err() {
                            return;
                        }
                    }
                    Ok(ClientMessage::Req { subscription_id, .. }) => {
                        // Nothing is stored here; answer end-of-stored-events
                        // right away so clients do not wait.
                        let eose = RelayMessage::Eose { subscription_id };
                        if send(&mut sink, &eose).await.is_err() {
                            return;
                        }
                    }
                    Ok(ClientMessage::Close { .. }) => {}
                    Err(e) => {
                        debug!(error = %e, "ignoring unparseable client message");
                        let notice = RelayMessage::Notice {
                            message: "could not parse message".to_string(),
                        };
                        if send(&mut sink, &notice).await.is_err() {
                            return;
                        }
                    }
                },
                Ok(Message::Ping(data)) => {
                    if sink.send(Message::Pong(data)).await.is_err() {
                        return;
                    }
                }
                Ok(Message::Close(_)) => return,
                Ok(_) => {}
                Err(e) => {
                    debug!(error = %e, "client connection error");
                    return;
                }
            }
        }
    }

    /// Verify, wrap and fan out one submitted event; build the `OK` reply.
    async fn submit(&self, event: Event) -> RelayMessage {
        let id = event.id;

        if let Err(e) = event.verify() {
            debug!(%id, error = %e, "rejected invalid submission");
            return RelayMessage::Ok {
                id,
                accepted: false,
                message: "invalid: bad id or signature".to_string(),
            };
        }

        // A fresh routing order per event.
        let path = shuffle_path(&self.hops);

        // Wrapping mines proof of work per layer; keep it off the I/O
        // workers.
        let wrapped =
            tokio::task::spawn_blocking(move || wrap_event(&event, &path)).await;
        let carrier = match wrapped {
            Ok(Ok(carrier)) => carrier,
            Ok(Err(OnionError::TooLarge { size, limit })) => {
                warn!(%id, size, limit, "submission too large to wrap");
                return RelayMessage::Ok {
                    id,
                    accepted: false,
                    message: format!(
                        "invalid: event too large, wrapped envelope would exceed {STANDARD_SIZE} bytes"
                    ),
                };
            }
            Ok(Err(e)) => {
                // Accepted from the client's point of view; the failure is
                // ours and is only logged.
                error!(%id, error = %e, "wrap failed");
                return RelayMessage::Ok {
                    id,
                    accepted: true,
                    message: String::new(),
                };
            }
            Err(e) => {
                error!(%id, error = %e, "wrap task failed");
                return RelayMessage::Ok {
                    id,
                    accepted: true,
                    message: String::new(),
                };
            }
        };

        let summary = self.pool.publish(&carrier).await;
        if summary.any_succeeded() {
            info!(
                %id,
                carrier = %carrier.id,
                succeeded = summary.succeeded.len(),
                total = summary.total(),
                "wrapped submission forwarded"
            );
        } else {
            error!(%id, carrier = %carrier.id, "failed to publish carrier to any relay");
        }

        RelayMessage::Ok {
            id,
            accepted: true,
            message: String::new(),
        }
    }
}

async fn send<S>(sink: &mut S, msg: &RelayMessage) -> Result<(), ()>
where
    S: SinkExt<Message> + Unpin,
{
    let json = msg.to_json().map_err(|_| ())?;
    sink.send(Message::Text(json)).await.map_err(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use velum_event::{EventDraft, Keys, KIND_CARRIER};
    use velum_relay::testing::LocalRelay;
    use velum_relay::Filter;

    fn signed(content: &str) -> Event {
        EventDraft::new(1, content).sign(&Keys::generate()).expect("sign")
    }

    fn ingress_for(hop: &Keys, relay: &LocalRelay) -> Arc<Ingress> {
        Arc::new(Ingress::new(
            vec![hop.public_key()],
            RelayPool::new(vec![relay.url()]),
        ))
    }

    #[tokio::test]
    async fn test_submit_wraps_and_forwards() {
        let relay = LocalRelay::start().await.expect("relay");
        let hop = Keys::generate();
        let ingress = ingress_for(&hop, &relay);

        let event = signed("hello");
        let reply = ingress.submit(event.clone()).await;
        let RelayMessage::Ok { id, accepted, .. } = reply else {
            panic!("expected OK reply");
        };
        assert_eq!(id, event.id);
        assert!(accepted);

        let carriers = relay.stored_of_kind(KIND_CARRIER);
        assert_eq!(carriers.len(), 1);
        assert_eq!(
            carriers[0].first_tag_value("p"),
            Some(hop.public_key().to_hex().as_str())
        );
        // The plaintext never reaches the wire.
        assert!(relay.stored_of_kind(1).is_empty());
    }

    #[tokio::test]
    async fn test_submit_rejects_bad_signature() {
        let relay = LocalRelay::start().await.expect("relay");
        let ingress = ingress_for(&Keys::generate(), &relay);

        let mut event = signed("forged");
        event.content.push('!');
        let RelayMessage::Ok { accepted, message, .. } = ingress.submit(event).await else {
            panic!("expected OK reply");
        };
        assert!(!accepted);
        assert!(message.starts_with("invalid:"));
        assert!(relay.stored().is_empty());
    }

    #[tokio::test]
    async fn test_submit_rejects_oversized_before_io() {
        let relay = LocalRelay::start().await.expect("relay");
        let ingress = ingress_for(&Keys::generate(), &relay);

        let event = signed(&"x".repeat(40 * 1024));
        let RelayMessage::Ok { accepted, message, .. } = ingress.submit(event).await else {
            panic!("expected OK reply");
        };
        assert!(!accepted);
        assert!(message.contains("too large"));
        assert!(relay.stored().is_empty());
    }

    #[tokio::test]
    async fn test_websocket_roundtrip_through_server() {
        let relay = LocalRelay::start().await.expect("relay");
        let hop = Keys::generate();
        let ingress = ingress_for(&hop, &relay);

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (shutdown_tx, _) = broadcast::channel(1);
        tokio::spawn(ingress.run(listener, shutdown_tx.subscribe()));

        // A plain relay-protocol client: the ingress looks like a relay.
        let client = RelayPool::new(vec![format!("ws://{addr}")]);
        let event = signed("through the socket");
        let summary = client.publish(&event).await;
        assert!(summary.any_succeeded());

        for _ in 0..100 {
            if !relay.stored_of_kind(KIND_CARRIER).is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(relay.stored_of_kind(KIND_CARRIER).len(), 1);
        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_req_gets_immediate_eose() {
        let relay = LocalRelay::start().await.expect("relay");
        let ingress = ingress_for(&Keys::generate(), &relay);

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (shutdown_tx, _) = broadcast::channel(1);
        tokio::spawn(ingress.run(listener, shutdown_tx.subscribe()));

        // Subscribing to the ingress yields nothing but also does not hang.
        let client = RelayPool::new(vec![format!("ws://{addr}")]);
        let mut sub = client.subscribe(Filter::new().kinds(vec![1])).await;
        let outcome = tokio::time::timeout(Duration::from_millis(500), sub.recv()).await;
        assert!(outcome.is_err(), "no events should arrive");
        let _ = shutdown_tx.send(());
    }
}
