use crate::error::Error;
use crate::{Broker, BrokerMessage, BrokerStream, MATCH_ALL};
use async_trait::async_trait;
use futures_util::StreamExt;
use log::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

const DEFAULT_RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);

/// Receives every decoded broker message, one at a time, in broker order.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &BrokerMessage);
}

/// Owns the relay's single pattern subscription.
///
/// Messages are handed to the handler sequentially; the next message is not
/// read until the handler returns. When the subscription stream ends the
/// listener resubscribes, and anything published in between is lost.
pub struct Listener {
    broker: Arc<dyn Broker>,
    handler: Arc<dyn MessageHandler>,
    pattern: String,
    resubscribe_delay: Duration,
}

impl Listener {
    pub fn new(broker: Arc<dyn Broker>, handler: Arc<dyn MessageHandler>) -> Self {
        Self {
            broker,
            handler,
            pattern: MATCH_ALL.to_string(),
            resubscribe_delay: DEFAULT_RESUBSCRIBE_DELAY,
        }
    }

    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = pattern.into();
        self
    }

    pub fn resubscribe_delay(mut self, delay: Duration) -> Self {
        self.resubscribe_delay = delay;
        self
    }

    /// Establishes the subscription and spawns the receive loop.
    ///
    /// A failure here is returned to the caller rather than retried, so the
    /// relay never starts accepting connections without a broker feed.
    pub async fn start(self) -> Result<JoinHandle<()>, Error> {
        let stream = self.broker.psubscribe(&self.pattern).await?;
        info!("Subscribed to broker pattern \"{}\"", self.pattern);

        Ok(tokio::spawn(self.run(stream)))
    }

    async fn run(self, mut stream: BrokerStream) {
        loop {
            while let Some(raw) = stream.next().await {
                let message = BrokerMessage::decode(raw);
                self.handler.handle(&message).await;
            }

            warn!(
                "Broker subscription \"{}\" ended, resubscribing",
                self.pattern
            );
            stream = self.resubscribe().await;
        }
    }

    async fn resubscribe(&self) -> BrokerStream {
        let mut attempt: u32 = 0;
        loop {
            tokio::time::sleep(self.resubscribe_delay).await;
            attempt += 1;

            match self.broker.psubscribe(&self.pattern).await {
                Ok(stream) => {
                    info!(
                        "Resubscribed to broker pattern \"{}\" after {attempt} attempt(s)",
                        self.pattern
                    );
                    return stream;
                }
                Err(e) => warn!("Resubscribe attempt {attempt} failed: {e}"),
            }
        }
    }
}
