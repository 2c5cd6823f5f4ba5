//! Multi-relay connection pool.
//!
//! One long-lived task per configured relay holds the WebSocket, reconnects
//! with capped exponential backoff, re-issues subscriptions after a
//! reconnect, and resolves publish acknowledgements. The pool front-end
//! fans publishes out to every relay and counts per-relay successes; a
//! single success is enough to consider an event forwarded.

use std::collections::HashMap;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use velum_event::{Event, EventId};

use crate::message::{ClientMessage, Filter, RelayMessage};

/// How long a publish waits for a relay's `OK` before counting a failure.
const ACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Base delay between reconnection attempts (exponential backoff).
const RECONNECT_BASE_DELAY_SECS: u64 = 2;

/// Maximum delay between reconnection attempts.
const MAX_RECONNECT_DELAY_SECS: u64 = 60;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Outcome of a fan-out publish.
#[derive(Debug, Default)]
pub struct PublishSummary {
    /// Relays that acknowledged the event.
    pub succeeded: Vec<String>,
    /// Relays that rejected it, timed out or were unreachable.
    pub failed: Vec<String>,
}

impl PublishSummary {
    /// At least one relay accepted the event.
    pub fn any_succeeded(&self) -> bool {
        !self.succeeded.is_empty()
    }

    /// Number of relays attempted.
    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }
}

/// A live subscription spanning every relay in the pool.
pub struct Subscription {
    events: mpsc::Receiver<Event>,
}

impl Subscription {
    /// Next event from any relay. Duplicates across relays are delivered
    /// as-is; deduplication is the consumer's policy.
    pub async fn recv(&mut self) -> Option<Event> {
        self.events.recv().await
    }
}

enum Command {
    Publish {
        event: Box<Event>,
        ack: oneshot::Sender<bool>,
    },
    Subscribe {
        filter: Filter,
        out: mpsc::Sender<Event>,
    },
}

struct RelayHandle {
    url: String,
    tx: mpsc::Sender<Command>,
}

/// Connection pool over a fixed set of relay URLs.
pub struct RelayPool {
    relays: Vec<RelayHandle>,
}

impl RelayPool {
    /// Create a pool; connections are established lazily by the per-relay
    /// tasks and retried forever with capped backoff.
    pub fn new(urls: Vec<String>) -> Self {
        let relays = urls
            .into_iter()
            .map(|url| {
                let (tx, rx) = mpsc::channel(64);
                tokio::spawn(relay_task(url.clone(), rx));
                RelayHandle { url, tx }
            })
            .collect();
        Self { relays }
    }

    /// The configured relay URLs.
    pub fn urls(&self) -> Vec<String> {
        self.relays.iter().map(|r| r.url.clone()).collect()
    }

    /// Publish `event` to every relay and count acknowledgements.
    pub async fn publish(&self, event: &Event) -> PublishSummary {
        let attempts = self.relays.iter().map(|relay| {
            let (ack_tx, ack_rx) = oneshot::channel();
            let cmd = Command::Publish {
                event: Box::new(event.clone()),
                ack: ack_tx,
            };
            let url = relay.url.clone();
            let tx = relay.tx.clone();
            async move {
                if tx.send(cmd).await.is_err() {
                    return (url, false);
                }
                let accepted = matches!(
                    tokio::time::timeout(ACK_TIMEOUT, ack_rx).await,
                    Ok(Ok(true))
                );
                (url, accepted)
            }
        });

        let mut summary = PublishSummary::default();
        for (url, accepted) in futures_util::future::join_all(attempts).await {
            if accepted {
                summary.succeeded.push(url);
            } else {
                summary.failed.push(url);
            }
        }
        summary
    }

    /// Open `filter` as a subscription on every relay.
    pub async fn subscribe(&self, filter: Filter) -> Subscription {
        let (tx, rx) = mpsc::channel(256);
        for relay in &self.relays {
            let cmd = Command::Subscribe {
                filter: filter.clone(),
                out: tx.clone(),
            };
            if relay.tx.send(cmd).await.is_err() {
                warn!(url = %relay.url, "relay task unavailable for subscription");
            }
        }
        Subscription { events: rx }
    }
}

struct SubscriptionState {
    id: String,
    filter: Filter,
    out: mpsc::Sender<Event>,
}

/// Lifecycle of a single relay connection: connect, serve, back off, retry.
async fn relay_task(url: String, mut rx: mpsc::Receiver<Command>) {
    let mut subs: Vec<SubscriptionState> = Vec::new();
    let mut next_sub = 0usize;
    let mut attempt = 0u32;

    loop {
        match connect_async(url.as_str()).await {
            Ok((ws, _)) => {
                attempt = 0;
                info!(%url, "relay connected");
                if !serve_connection(&url, ws, &mut rx, &mut subs, &mut next_sub).await {
                    return;
                }
                warn!(%url, "relay connection lost");
            }
            Err(e) => {
                debug!(%url, error = %e, "relay connect failed");
            }
        }

        attempt = attempt.saturating_add(1);
        let delay = backoff_delay(attempt);
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        // Commands arriving while disconnected must not stall the caller:
        // publishes fail fast, subscriptions are queued for the reconnect.
        loop {
            tokio::select! {
                _ = &mut sleep => break,
                cmd = rx.recv() => match cmd {
                    Some(Command::Publish { ack, .. }) => {
                        let _ = ack.send(false);
                    }
                    Some(Command::Subscribe { filter, out }) => {
                        next_sub += 1;
                        subs.push(SubscriptionState {
                            id: format!("velum-{next_sub}"),
                            filter,
                            out,
                        });
                    }
                    None => return,
                },
            }
        }
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let delay = RECONNECT_BASE_DELAY_SECS
        .saturating_mul(1 << attempt.min(5))
        .min(MAX_RECONNECT_DELAY_SECS);
    Duration::from_secs(delay)
}

/// Serve one established connection. Returns `false` when the command
/// channel is closed (pool dropped) and the task should exit for good.
async fn serve_connection(
    url: &str,
    mut ws: WsStream,
    rx: &mut mpsc::Receiver<Command>,
    subs: &mut Vec<SubscriptionState>,
    next_sub: &mut usize,
) -> bool {
    let mut pending_acks: HashMap<EventId, oneshot::Sender<bool>> = HashMap::new();

    // Re-issue subscriptions carried over from before the reconnect.
    for sub in subs.iter() {
        let req = ClientMessage::Req {
            subscription_id: sub.id.clone(),
            filter: sub.filter.clone(),
        };
        if let Ok(json) = req.to_json() {
            if ws.send(Message::Text(json)).await.is_err() {
                return true;
            }
        }
    }

    loop {
        tokio::select! {
            cmd = rx.recv() => match cmd {
                Some(Command::Publish { event, ack }) => {
                    let msg = ClientMessage::Event(*event.clone());
                    match msg.to_json() {
                        Ok(json) => {
                            if ws.send(Message::Text(json)).await.is_err() {
                                let _ = ack.send(false);
                                return true;
                            }
                            pending_acks.insert(event.id, ack);
                        }
                        Err(e) => {
                            warn!(%url, error = %e, "failed to encode event");
                            let _ = ack.send(false);
                        }
                    }
                }
                Some(Command::Subscribe { filter, out }) => {
                    *next_sub += 1;
                    let sub = SubscriptionState {
                        id: format!("velum-{next_sub}"),
                        filter,
                        out,
                    };
                    let req = ClientMessage::Req {
                        subscription_id: sub.id.clone(),
                        filter: sub.filter.clone(),
                    };
                    match req.to_json() {
                        Ok(json) => {
                            if ws.send(Message::Text(json)).await.is_err() {
                                subs.push(sub);
                                return true;
                            }
                            subs.push(sub);
                        }
                        Err(e) => warn!(%url, error = %e, "failed to encode subscription"),
                    }
                }
                None => return false,
            },
            msg = ws.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    handle_relay_message(url, &text, subs, &mut pending_acks).await;
                }
                Some(Ok(Message::Ping(data))) => {
                    if ws.send(Message::Pong(data)).await.is_err() {
                        return true;
                    }
                }
                Some(Ok(Message::Close(_))) | None => return true,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(%url, error = %e, "websocket error");
                    return true;
                }
            },
        }
    }
}

async fn handle_relay_message(
    url: &str,
    text: &str,
    subs: &[SubscriptionState],
    pending_acks: &mut HashMap<EventId, oneshot::Sender<bool>>,
) {
    let msg = match RelayMessage::from_json(text) {
        Ok(msg) => msg,
        Err(e) => {
            debug!(%url, error = %e, "unparseable relay message");
            return;
        }
    };
    match msg {
        RelayMessage::Event {
            subscription_id,
            event,
        } => {
            if let Some(sub) = subs.iter().find(|s| s.id == subscription_id) {
                let _ = sub.out.send(event).await;
            }
        }
        RelayMessage::Ok { id, accepted, message } => {
            if !accepted {
                debug!(%url, %id, %message, "relay rejected event");
            }
            if let Some(ack) = pending_acks.remove(&id) {
                let _ = ack.send(accepted);
            }
        }
        RelayMessage::Eose { .. } => {}
        RelayMessage::Notice { message } => {
            debug!(%url, %message, "relay notice");
        }
        RelayMessage::Closed {
            subscription_id,
            message,
        } => {
            debug!(%url, %subscription_id, %message, "relay closed subscription");
        }
    }
}
