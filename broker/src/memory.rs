use crate::error::{Error, ErrorKind};
use crate::{Broker, BrokerStream, RawMessage};
use async_stream::stream;
use async_trait::async_trait;
use globset::Glob;
use log::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::broadcast::{self, error::RecvError};

const DEFAULT_CAPACITY: usize = 1024;

/// In-process broker backed by a Tokio broadcast channel.
///
/// Besides carrying messages it can simulate the two broker failures the
/// relay must survive: an outage that ends every open subscription
/// ([`MemoryBroker::drop_subscribers`]) and an unreachable broker
/// ([`MemoryBroker::set_available`]).
pub struct MemoryBroker {
    sender: Mutex<broadcast::Sender<RawMessage>>,
    available: AtomicBool,
    capacity: usize,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Mutex::new(sender),
            available: AtomicBool::new(true),
            capacity,
        }
    }

    /// While unavailable, subscribe and publish calls fail with a connection error.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Ends every open subscription stream, as a broker disconnect would.
    pub fn drop_subscribers(&self) {
        let (sender, _) = broadcast::channel(self.capacity);
        *self.lock_sender() = sender;
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock_sender().receiver_count()
    }

    fn lock_sender(&self) -> MutexGuard<'_, broadcast::Sender<RawMessage>> {
        self.sender.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn ensure_available(&self) -> Result<(), Error> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::new(
                ErrorKind::Connection,
                "memory broker is unavailable",
            ))
        }
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn psubscribe(&self, pattern: &str) -> Result<BrokerStream, Error> {
        self.ensure_available()?;

        // Same wildcard syntax as PSUBSCRIBE: `*`, `?` and `[...]`
        let matcher = Glob::new(pattern)
            .map_err(|e| Error::new(ErrorKind::Subscribe, e))?
            .compile_matcher();
        let mut receiver = self.lock_sender().subscribe();

        let messages = stream! {
            loop {
                match receiver.recv().await {
                    Ok(message) => {
                        if matcher.is_match(&message.channel) {
                            yield message;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Memory broker subscriber lagged, {skipped} messages lost");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        };

        Ok(Box::pin(messages))
    }

    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<(), Error> {
        self.ensure_available()?;

        // No subscribers is not an error: the message is simply lost
        let _ = self.lock_sender().send(RawMessage {
            channel: channel.to_string(),
            payload: payload.to_vec(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use std::time::Duration;
    use tokio::time::timeout;

    async fn channels_seen(pattern: &str, published: &[&str]) -> Vec<String> {
        let broker = MemoryBroker::new();
        let mut stream = broker.psubscribe(pattern).await.unwrap();
        for channel in published {
            broker.publish(channel, b"{}").await.unwrap();
        }
        broker.drop_subscribers();

        let mut seen = Vec::new();
        while let Some(message) = stream.next().await {
            seen.push(message.channel);
        }
        seen
    }

    #[tokio::test]
    async fn test_wildcards_follow_psubscribe_syntax() {
        assert_eq!(
            channels_seen("*", &["anything", "a/b"]).await,
            vec!["anything", "a/b"]
        );
        assert_eq!(channels_seen("ch?", &["ch1", "ch10"]).await, vec!["ch1"]);
        assert_eq!(
            channels_seen("ch[12]", &["ch1", "ch2", "ch3"]).await,
            vec!["ch1", "ch2"]
        );
        assert_eq!(
            channels_seen("a*b*c", &["a-x-b-y-c", "a-x-c"]).await,
            vec!["a-x-b-y-c"]
        );
    }

    #[tokio::test]
    async fn test_invalid_pattern_is_a_subscribe_error() {
        let broker = MemoryBroker::new();

        let err = broker.psubscribe("ch[1").await.err().expect("subscribe must fail");
        assert_eq!(err.error_kind, ErrorKind::Subscribe);
        assert_eq!(broker.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_pattern_subscription_filters_channels() {
        let broker = MemoryBroker::new();
        let mut stream = broker.psubscribe("room:*").await.unwrap();

        broker.publish("lobby", b"skip").await.unwrap();
        broker.publish("room:1", b"keep").await.unwrap();

        let message = timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("message expected")
            .expect("stream open");
        assert_eq!(message.channel, "room:1");
        assert_eq!(message.payload, b"keep");
    }

    #[tokio::test]
    async fn test_drop_subscribers_ends_streams() {
        let broker = MemoryBroker::new();
        let mut stream = broker.psubscribe("*").await.unwrap();
        assert_eq!(broker.subscriber_count(), 1);

        broker.drop_subscribers();

        let next = timeout(Duration::from_secs(1), stream.next()).await.unwrap();
        assert!(next.is_none());
        assert_eq!(broker.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_unavailable_broker_rejects_subscribe() {
        let broker = MemoryBroker::new();
        broker.set_available(false);

        let err = broker.psubscribe("*").await.err().expect("subscribe must fail");
        assert_eq!(err.error_kind, ErrorKind::Connection);
    }
}
