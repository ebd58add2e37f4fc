use crate::error::{Error, ErrorKind};
use crate::{Broker, BrokerStream, RawMessage};
use async_trait::async_trait;
use futures_util::StreamExt;
use log::*;
use redis::AsyncCommands;

/// Redis pub/sub broker.
///
/// Each pattern subscription gets its own dedicated pub/sub connection; the
/// returned stream ends when that connection drops.
pub struct RedisBroker {
    client: redis::Client,
}

impl RedisBroker {
    /// Validates the URL. No connection is made until the first subscribe or publish.
    pub fn open(url: &str) -> Result<Self, Error> {
        let client = redis::Client::open(url).map_err(|e| Error::new(ErrorKind::Connection, e))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn psubscribe(&self, pattern: &str) -> Result<BrokerStream, Error> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| Error::new(ErrorKind::Connection, e))?;

        pubsub
            .psubscribe(pattern)
            .await
            .map_err(|e| Error::new(ErrorKind::Subscribe, e))?;
        debug!("Redis PSUBSCRIBE {pattern} established");

        let messages = pubsub.into_on_message().map(|msg| RawMessage {
            channel: msg.get_channel_name().to_string(),
            payload: msg.get_payload_bytes().to_vec(),
        });

        Ok(Box::pin(messages))
    }

    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<(), Error> {
        let mut connection = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| Error::new(ErrorKind::Connection, e))?;

        let receivers: i64 = connection
            .publish(channel, payload)
            .await
            .map_err(|e| Error::new(ErrorKind::Publish, e))?;
        trace!("Published to {channel}, {receivers} broker subscriber(s)");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_rejects_malformed_url() {
        let err = RedisBroker::open("not a url").err().expect("url must be rejected");
        assert_eq!(err.error_kind, ErrorKind::Connection);
    }

    #[test]
    fn test_open_accepts_redis_url_without_connecting() {
        assert!(RedisBroker::open("redis://127.0.0.1:1/").is_ok());
    }
}
