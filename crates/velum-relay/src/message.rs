//! Wire messages exchanged with relays.
//!
//! The relay protocol frames everything as a JSON array whose first element
//! is a label: `["EVENT", ...]`, `["REQ", <sub>, <filter>]`, `["OK", <id>,
//! <accepted>, <message>]` and so on. The arrays mix types, so encoding and
//! decoding go through `serde_json::Value` rather than derive.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use velum_event::{Event, EventId};

use crate::{RelayError, Result};

/// Subscription filter sent with `REQ`.
///
/// Only the fields this overlay uses are modeled; unknown fields arriving
/// from peers are ignored.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    /// Match events of any of these kinds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<u16>>,
    /// Match events carrying a `p` tag with any of these values.
    #[serde(rename = "#p", skip_serializing_if = "Option::is_none")]
    pub p_tags: Option<Vec<String>>,
    /// Match events created at or after this timestamp.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<u64>,
}

impl Filter {
    /// An empty filter matching everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to the given kinds.
    pub fn kinds(mut self, kinds: Vec<u16>) -> Self {
        self.kinds = Some(kinds);
        self
    }

    /// Restrict to events with a `p` tag equal to `value`.
    pub fn p_tag(mut self, value: String) -> Self {
        self.p_tags.get_or_insert_with(Vec::new).push(value);
        self
    }

    /// Whether `event` satisfies every restriction in this filter.
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(kinds) = &self.kinds {
            if !kinds.contains(&event.kind) {
                return false;
            }
        }
        if let Some(p_tags) = &self.p_tags {
            let hit = event
                .tags
                .iter()
                .any(|t| t.len() >= 2 && t[0] == "p" && p_tags.contains(&t[1]));
            if !hit {
                return false;
            }
        }
        if let Some(since) = self.since {
            if event.created_at < since {
                return false;
            }
        }
        true
    }
}

/// Messages a client sends to a relay.
#[derive(Clone, Debug)]
pub enum ClientMessage {
    /// Publish an event.
    Event(Event),
    /// Open a subscription.
    Req {
        subscription_id: String,
        filter: Filter,
    },
    /// Close a subscription.
    Close { subscription_id: String },
}

impl ClientMessage {
    /// Encode to the JSON array wire form.
    pub fn to_json(&self) -> Result<String> {
        let value = match self {
            ClientMessage::Event(event) => serde_json::json!(["EVENT", event]),
            ClientMessage::Req {
                subscription_id,
                filter,
            } => serde_json::json!(["REQ", subscription_id, filter]),
            ClientMessage::Close { subscription_id } => {
                serde_json::json!(["CLOSE", subscription_id])
            }
        };
        serde_json::to_string(&value).map_err(|e| RelayError::Serialization(e.to_string()))
    }

    /// Decode from the JSON array wire form.
    pub fn from_json(raw: &str) -> Result<Self> {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| RelayError::Protocol(e.to_string()))?;
        let items = value
            .as_array()
            .ok_or_else(|| RelayError::Protocol("message is not an array".into()))?;
        let label = items
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| RelayError::Protocol("message has no label".into()))?;

        match (label, items.len()) {
            ("EVENT", 2..) => {
                let event: Event = serde_json::from_value(items[1].clone())
                    .map_err(|e| RelayError::Protocol(e.to_string()))?;
                Ok(ClientMessage::Event(event))
            }
            ("REQ", 2..) => {
                let subscription_id = string_at(items, 1)?;
                let filter = match items.get(2) {
                    Some(v) => serde_json::from_value(v.clone())
                        .map_err(|e| RelayError::Protocol(e.to_string()))?,
                    None => Filter::default(),
                };
                Ok(ClientMessage::Req {
                    subscription_id,
                    filter,
                })
            }
            ("CLOSE", 2..) => Ok(ClientMessage::Close {
                subscription_id: string_at(items, 1)?,
            }),
            _ => Err(RelayError::Protocol(format!("unknown client message {label}"))),
        }
    }
}

/// Messages a relay sends to a client.
#[derive(Clone, Debug)]
pub enum RelayMessage {
    /// An event matching one of the client's subscriptions.
    Event {
        subscription_id: String,
        event: Event,
    },
    /// Publish acknowledgement.
    Ok {
        id: EventId,
        accepted: bool,
        message: String,
    },
    /// End of stored events for a subscription.
    Eose { subscription_id: String },
    /// Human-readable notice.
    Notice { message: String },
    /// The relay closed a subscription.
    Closed {
        subscription_id: String,
        message: String,
    },
}

impl RelayMessage {
    /// Encode to the JSON array wire form.
    pub fn to_json(&self) -> Result<String> {
        let value = match self {
            RelayMessage::Event {
                subscription_id,
                event,
            } => serde_json::json!(["EVENT", subscription_id, event]),
            RelayMessage::Ok {
                id,
                accepted,
                message,
            } => serde_json::json!(["OK", id.to_hex(), accepted, message]),
            RelayMessage::Eose { subscription_id } => serde_json::json!(["EOSE", subscription_id]),
            RelayMessage::Notice { message } => serde_json::json!(["NOTICE", message]),
            RelayMessage::Closed {
                subscription_id,
                message,
            } => serde_json::json!(["CLOSED", subscription_id, message]),
        };
        serde_json::to_string(&value).map_err(|e| RelayError::Serialization(e.to_string()))
    }

    /// Decode from the JSON array wire form.
    pub fn from_json(raw: &str) -> Result<Self> {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| RelayError::Protocol(e.to_string()))?;
        let items = value
            .as_array()
            .ok_or_else(|| RelayError::Protocol("message is not an array".into()))?;
        let label = items
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| RelayError::Protocol("message has no label".into()))?;

        match (label, items.len()) {
            ("EVENT", 3..) => {
                let event: Event = serde_json::from_value(items[2].clone())
                    .map_err(|e| RelayError::Protocol(e.to_string()))?;
                Ok(RelayMessage::Event {
                    subscription_id: string_at(items, 1)?,
                    event,
                })
            }
            ("OK", 3..) => {
                let id = EventId::from_hex(&string_at(items, 1)?)
                    .map_err(|e| RelayError::Protocol(e.to_string()))?;
                let accepted = items[2]
                    .as_bool()
                    .ok_or_else(|| RelayError::Protocol("OK flag is not a bool".into()))?;
                let message = items.get(3).and_then(Value::as_str).unwrap_or_default();
                Ok(RelayMessage::Ok {
                    id,
                    accepted,
                    message: message.to_string(),
                })
            }
            ("EOSE", 2..) => Ok(RelayMessage::Eose {
                subscription_id: string_at(items, 1)?,
            }),
            ("NOTICE", 2..) => Ok(RelayMessage::Notice {
                message: string_at(items, 1)?,
            }),
            ("CLOSED", 2..) => Ok(RelayMessage::Closed {
                subscription_id: string_at(items, 1)?,
                message: items
                    .get(2)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            }),
            _ => Err(RelayError::Protocol(format!("unknown relay message {label}"))),
        }
    }
}

fn string_at(items: &[Value], index: usize) -> Result<String> {
    items
        .get(index)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| RelayError::Protocol(format!("element {index} is not a string")))
}
