//! Wire protocol shared by the relay server and its clients.
//!
//! This crate has no dependencies on other internal crates so that both the
//! server side (`relay`, `web`) and the consuming side (`client`) can speak the
//! same JSON frames without pulling in each other's stacks.
//!
//! # Frames
//!
//! - **Control frames** (client → relay): [`ControlMessage`]. The typed form
//!   (`{"type": "subscribe" | "unsubscribe" | "replace", "channels": [...]}`)
//!   is canonical. The legacy bulk form `{"subscriptions": [...]}` carries no
//!   `type` field and is still accepted as a deprecated alias for `replace`.
//! - **Delivery frames** (relay → client): `{"channel": ..., ...payload}`,
//!   produced by [`encode_delivery`].

use log::*;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::error::Error as StdError;
use std::fmt;

/// Opaque channel identifier. No structure is required beyond uniqueness.
pub type ChannelId = String;

/// Close code sent by a peer that is shutting down on purpose.
pub const NORMAL_CLOSURE: u16 = 1000;

/// A control frame sent by a client to change its interest set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Add the channels to the connection's interest set.
    Subscribe { channels: Vec<ChannelId> },
    /// Remove the channels from the connection's interest set.
    Unsubscribe { channels: Vec<ChannelId> },
    /// Replace the connection's interest set with exactly these channels.
    Replace { channels: Vec<ChannelId> },
}

/// The deprecated handshake shape: a bulk declaration with no `type` field.
#[derive(Debug, Deserialize)]
struct LegacyDeclaration {
    subscriptions: Vec<ChannelId>,
}

impl ControlMessage {
    /// Parses a control frame, disambiguating the typed and legacy forms by
    /// the presence of a `type` field.
    pub fn parse(text: &str) -> Result<Self, Error> {
        let value: Value = serde_json::from_str(text)?;

        if value.get("type").is_some() {
            return serde_json::from_value(value).map_err(|e| Error {
                source: Some(Box::new(e)),
                error_kind: ErrorKind::UnknownShape,
            });
        }

        match serde_json::from_value::<LegacyDeclaration>(value) {
            Ok(legacy) => {
                debug!("Accepted deprecated bulk subscription declaration");
                Ok(ControlMessage::Replace {
                    channels: legacy.subscriptions,
                })
            }
            Err(e) => Err(Error {
                source: Some(Box::new(e)),
                error_kind: ErrorKind::UnknownShape,
            }),
        }
    }

    pub fn to_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Encodes the delivery frame for one broker message.
///
/// Object payloads are flattened next to the `channel` field; any other
/// payload is carried under `message`. The relay's `channel` always wins over
/// a `channel` field inside the payload.
pub fn encode_delivery(channel: &str, payload: &Value) -> Result<String, Error> {
    let mut frame = match payload {
        Value::Object(fields) => fields.clone(),
        other => {
            let mut fields = Map::new();
            fields.insert("message".to_string(), other.clone());
            fields
        }
    };
    frame.insert("channel".to_string(), Value::String(channel.to_string()));

    Ok(serde_json::to_string(&Value::Object(frame))?)
}

/// Error type for frame encoding and decoding.
#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: ErrorKind,
}

#[derive(Debug, PartialEq)]
pub enum ErrorKind {
    /// The frame is not valid JSON.
    InvalidJson,
    /// The frame is JSON but matches neither control form.
    UnknownShape,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.source {
            Some(source) => write!(f, "Protocol error ({:?}): {}", self.error_kind, source),
            None => write!(f, "Protocol error ({:?})", self.error_kind),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error {
            source: Some(Box::new(err)),
            error_kind: ErrorKind::InvalidJson,
        }
    }
}
