use chrono::{DateTime, Utc};
use log::*;
use protocol::ChannelId;
use serde_json::Value;

/// A message exactly as the broker handed it over.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub channel: ChannelId,
    pub payload: Vec<u8>,
}

/// A broker message after payload decoding. Lives for one dispatch pass.
#[derive(Debug, Clone)]
pub struct BrokerMessage {
    pub channel: ChannelId,
    pub payload: Value,
    pub received_at: DateTime<Utc>,
}

impl BrokerMessage {
    /// Decodes the payload as JSON, falling back to the raw payload as a JSON
    /// string. Decoding never fails.
    pub fn decode(raw: RawMessage) -> Self {
        let payload = match serde_json::from_slice::<Value>(&raw.payload) {
            Ok(value) => value,
            Err(e) => {
                debug!(
                    "Payload on channel {} is not JSON ({e}), forwarding it raw",
                    raw.channel
                );
                Value::String(String::from_utf8_lossy(&raw.payload).into_owned())
            }
        };

        Self {
            channel: raw.channel,
            payload,
            received_at: Utc::now(),
        }
    }
}
