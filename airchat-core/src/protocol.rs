//! AirChat envelope: message id, sender nickname, event kind and payload.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Marker every AirChat datagram starts with. Anything else on the port is foreign traffic.
pub const DEFAULT_PREAMBLE: &str = "__AIRCHAT:";

/// Longest nickname accepted locally and shown for peers.
pub const MAX_NICK_LENGTH: usize = 20;

/// Event kind carried in the envelope. Unknown tags from newer peers are kept, not rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Event {
    Join,
    Leave,
    Msg,
    Me,
    Nick,
    Ping,
    Ack,
    Unrecognized(String),
}

impl Event {
    pub fn as_str(&self) -> &str {
        match self {
            Event::Join => "join",
            Event::Leave => "leave",
            Event::Msg => "msg",
            Event::Me => "me",
            Event::Nick => "nick",
            Event::Ping => "ping",
            Event::Ack => "ack",
            Event::Unrecognized(tag) => tag.as_str(),
        }
    }

    /// Chat-type events are the ones whose delivery is counted.
    pub fn is_chat(&self) -> bool {
        matches!(self, Event::Msg | Event::Me)
    }
}

impl From<String> for Event {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "join" => Event::Join,
            "leave" => Event::Leave,
            "msg" => Event::Msg,
            "me" => Event::Me,
            "nick" => Event::Nick,
            "ping" => Event::Ping,
            "ack" => Event::Ack,
            _ => Event::Unrecognized(tag),
        }
    }
}

impl From<Event> for String {
    fn from(event: Event) -> Self {
        match event {
            Event::Unrecognized(tag) => tag,
            other => other.as_str().to_owned(),
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One envelope on the wire. Field order here is the JSON key order on the wire.
///
/// Retransmissions of the same logical message carry the same `id`; every freshly
/// created message gets a new one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub from: String,
    pub event: Event,
    /// Free text for `msg`/`me`, new nickname for `nick`, referenced id for `ack`, null otherwise.
    /// The key itself is mandatory on the wire.
    #[serde(deserialize_with = "required_nullable")]
    pub data: Option<String>,
}

fn required_nullable<'de, D>(d: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<String>::deserialize(d)
}

impl Message {
    /// Build a message with a fresh random id.
    pub fn create(from: &str, event: Event, data: Option<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            from: from.to_owned(),
            event,
            data,
        }
    }

    pub fn join(from: &str) -> Self {
        Self::create(from, Event::Join, None)
    }

    pub fn leave(from: &str) -> Self {
        Self::create(from, Event::Leave, None)
    }

    pub fn ping(from: &str) -> Self {
        Self::create(from, Event::Ping, None)
    }

    pub fn msg(from: &str, text: &str) -> Self {
        Self::create(from, Event::Msg, Some(text.to_owned()))
    }

    pub fn me(from: &str, action: &str) -> Self {
        Self::create(from, Event::Me, Some(action.to_owned()))
    }

    pub fn nick(from: &str, new_nick: &str) -> Self {
        Self::create(from, Event::Nick, Some(new_nick.to_owned()))
    }

    /// Acknowledge `id`.
    pub fn ack(from: &str, id: &str) -> Self {
        Self::create(from, Event::Ack, Some(id.to_owned()))
    }

    /// Payload text, empty when null.
    pub fn text(&self) -> &str {
        self.data.as_deref().unwrap_or("")
    }
}

/// Clip a peer-supplied nickname to display length.
pub fn display_nick(nick: &str) -> String {
    nick.chars().take(MAX_NICK_LENGTH).collect()
}
