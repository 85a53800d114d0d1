//! Inbound control messages from observers.
//!
//! Observers speak a small JSON protocol over the gateway: heartbeats and
//! interest-set changes. Malformed JSON earns the sender an error
//! notification on its own connection; unknown message types are logged
//! and ignored so old clients keep working against newer servers.

use serde::Deserialize;

use crate::event::EventKind;

/// A control message sent by an observer.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Keep the connection alive; answered with a heartbeat ack.
    Heartbeat,
    /// Legacy alias for heartbeat.
    Ping,
    /// Add kinds to the interest set. Unknown kind names are ignored.
    Subscribe {
        #[serde(default)]
        kinds: Vec<String>,
    },
    /// Remove kinds from the interest set.
    Unsubscribe {
        #[serde(default)]
        kinds: Vec<String>,
    },
}

/// Outcome of parsing one inbound text frame.
#[derive(Debug)]
pub enum Inbound {
    Message(ClientMessage),
    /// Valid JSON but not a message we recognize.
    Unknown,
    /// Not valid JSON at all.
    Malformed,
}

/// Parse one inbound frame. Distinguishes malformed JSON (the sender gets
/// an error notification) from a well-formed message of an unknown type
/// (silently ignored).
pub fn parse_inbound(text: &str) -> Inbound {
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(_) => return Inbound::Malformed,
    };
    match serde_json::from_value::<ClientMessage>(value) {
        Ok(msg) => Inbound::Message(msg),
        Err(_) => Inbound::Unknown,
    }
}

/// Resolve wire kind names, dropping unknown ones.
pub fn parse_kinds(raw: &[String]) -> Vec<EventKind> {
    raw.iter().filter_map(|s| EventKind::parse(s)).collect()
}
