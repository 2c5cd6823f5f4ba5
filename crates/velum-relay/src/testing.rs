//! In-process relay for tests.
//!
//! [`LocalRelay`] binds an ephemeral local port, stores every published
//! event, answers `REQ` with matching stored events followed by `EOSE`, and
//! streams later arrivals to matching subscriptions. It implements just
//! enough of the relay protocol to exercise both daemons end to end without
//! a network.

use std::sync::{Arc, Mutex};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

use velum_event::Event;

use crate::message::{ClientMessage, Filter, RelayMessage};

/// A miniature relay listening on localhost.
pub struct LocalRelay {
    url: String,
    events: Arc<Mutex<Vec<Event>>>,
    broadcast: broadcast::Sender<Event>,
}

impl LocalRelay {
    /// Bind an ephemeral port and start accepting connections.
    pub async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let events = Arc::new(Mutex::new(Vec::new()));
        let (tx, _) = broadcast::channel(256);

        let accept_events = events.clone();
        let accept_tx = tx.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(serve_client(
                    stream,
                    accept_events.clone(),
                    accept_tx.clone(),
                ));
            }
        });

        Ok(Self {
            url: format!("ws://{addr}"),
            events,
            broadcast: tx,
        })
    }

    /// The `ws://` URL clients connect to.
    pub fn url(&self) -> String {
        self.url.clone()
    }

    /// Every event published so far, in arrival order.
    pub fn stored(&self) -> Vec<Event> {
        self.events.lock().expect("relay store lock").clone()
    }

    /// Stored events of a single kind.
    pub fn stored_of_kind(&self, kind: u16) -> Vec<Event> {
        self.stored().into_iter().filter(|e| e.kind == kind).collect()
    }
}

async fn serve_client(
    stream: TcpStream,
    events: Arc<Mutex<Vec<Event>>>,
    broadcast_tx: broadcast::Sender<Event>,
) {
    let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };
    let (mut sink, mut source) = ws.split();
    let mut live = broadcast_tx.subscribe();
    let mut subs: Vec<(String, Filter)> = Vec::new();

    loop {
        tokio::select! {
            msg = source.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    match ClientMessage::from_json(&text) {
                        Ok(ClientMessage::Event(event)) => {
                            events.lock().expect("relay store lock").push(event.clone());
                            let ok = RelayMessage::Ok {
                                id: event.id,
                                accepted: true,
                                message: String::new(),
                            };
                            if send(&mut sink, &ok).await.is_err() {
                                return;
                            }
                            let _ = broadcast_tx.send(event);
                        }
                        Ok(ClientMessage::Req { subscription_id, filter }) => {
                            let matching: Vec<Event> = events
                                .lock()
                                .expect("relay store lock")
                                .iter()
                                .filter(|e| filter.matches(e))
                                .cloned()
                                .collect();
                            for event in matching {
                                let msg = RelayMessage::Event {
                                    subscription_id: subscription_id.clone(),
                                    event,
                                };
                                if send(&mut sink, &msg).await.is_err() {
                                    return;
                                }
                            }
                            let eose = RelayMessage::Eose {
                                subscription_id: subscription_id.clone(),
                            };
                            if send(&mut sink, &eose).await.is_err() {
                                return;
                            }
                            subs.push((subscription_id, filter));
                        }
                        Ok(ClientMessage::Close { subscription_id }) => {
                            subs.retain(|(id, _)| *id != subscription_id);
                        }
                        Err(e) => {
                            debug!(error = %e, "test relay ignoring message");
                        }
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    if sink.send(Message::Pong(data)).await.is_err() {
                        return;
                    }
                }
                Some(Ok(Message::Close(_))) | None => return,
                Some(Ok(_)) => {}
                Some(Err(_)) => return,
            },
            event = live.recv() => match event {
                Ok(event) => {
                    for (subscription_id, filter) in &subs {
                        if filter.matches(&event) {
                            let msg = RelayMessage::Event {
                                subscription_id: subscription_id.clone(),
                                event: event.clone(),
                            };
                            if send(&mut sink, &msg).await.is_err() {
                                return;
                            }
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return,
            },
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
    use crate::pool::RelayPool;
    use velum_event::{EventDraft, Keys};

    fn sample_event(content: &str) -> Event {
        EventDraft::new(29001, content)
            .tag(vec!["p".to_string(), "aa".repeat(32)])
            .sign(&Keys::generate())
            .expect("sign")
    }

    #[tokio::test]
    async fn test_publish_is_acknowledged_and_stored() {
        let relay = LocalRelay::start().await.expect("start");
        let pool = RelayPool::new(vec![relay.url()]);

        let event = sample_event("stored");
        let summary = pool.publish(&event).await;
        assert!(summary.any_succeeded());
        assert_eq!(summary.total(), 1);
        assert_eq!(relay.stored(), vec![event]);
    }

    #[tokio::test]
    async fn test_subscription_receives_matching_event() {
        let relay = LocalRelay::start().await.expect("start");
        let pool = RelayPool::new(vec![relay.url()]);

        let filter = Filter::new().kinds(vec![29001]).p_tag("aa".repeat(32));
        let mut sub = pool.subscribe(filter).await;

        let event = sample_event("delivered");
        assert!(pool.publish(&event).await.any_succeeded());

        let received = tokio::time::timeout(std::time::Duration::from_secs(5), sub.recv())
            .await
            .expect("timeout")
            .expect("event");
        assert_eq!(received, event);
    }

    #[tokio::test]
    async fn test_subscription_filters_out_other_kinds() {
        let relay = LocalRelay::start().await.expect("start");
        let pool = RelayPool::new(vec![relay.url()]);

        let filter = Filter::new().kinds(vec![29001]);
        let mut sub = pool.subscribe(filter).await;

        let noise = EventDraft::new(1, "noise").sign(&Keys::generate()).expect("sign");
        let wanted = sample_event("wanted");
        assert!(pool.publish(&noise).await.any_succeeded());
        assert!(pool.publish(&wanted).await.any_succeeded());

        let received = tokio::time::timeout(std::time::Duration::from_secs(5), sub.recv())
            .await
            .expect("timeout")
            .expect("event");
        assert_eq!(received, wanted);
    }

    #[tokio::test]
    async fn test_req_replays_stored_events() {
        let relay = LocalRelay::start().await.expect("start");
        let pool = RelayPool::new(vec![relay.url()]);

        let event = sample_event("early");
        assert!(pool.publish(&event).await.any_succeeded());

        // Subscribe after the fact; the stored event is replayed.
        let mut sub = pool.subscribe(Filter::new().kinds(vec![29001])).await;
        let received = tokio::time::timeout(std::time::Duration::from_secs(5), sub.recv())
            .await
            .expect("timeout")
            .expect("event");
        assert_eq!(received, event);
    }

    #[tokio::test]
    async fn test_publish_to_unreachable_relay_fails() {
        // Nothing listens on this port; the publish must fail fast rather
        // than hang.
        let pool = RelayPool::new(vec!["ws://127.0.0.1:1".to_string()]);
        let event = sample_event("lost");
        let summary = pool.publish(&event).await;
        assert!(!summary.any_succeeded());
        assert_eq!(summary.failed.len(), 1);
    }

    #[tokio::test]
    async fn test_fan_out_counts_partial_success() {
        let up = LocalRelay::start().await.expect("start");
        let pool = RelayPool::new(vec![up.url(), "ws://127.0.0.1:1".to_string()]);

        let event = sample_event("partial");
        let summary = pool.publish(&event).await;
        assert_eq!(summary.succeeded.len(), 1);
        assert_eq!(summary.failed.len(), 1);
        assert!(summary.any_succeeded());
    }
}
