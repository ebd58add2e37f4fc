use anyhow::{anyhow, Result};
use client::{Session, SessionConfig, SessionEvent, Subscription};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::time::timeout;

/// One WebSocket client of the relay, with its own session.
pub struct Observer {
    pub label: String,
    session: Session,
    _subscription: Subscription,
    events: UnboundedReceiver<SessionEvent>,
}

impl Observer {
    /// Opens a session declaring `channels` and waits until it is connected.
    pub async fn connect(relay_url: &str, label: &str, channels: &[String]) -> Result<Self> {
        let session = Session::websocket(SessionConfig::new(relay_url));
        session.update_desired_channels(channels.iter().cloned());

        let (sender, events) = mpsc::unbounded_channel();
        let subscription = session.subscribe(move |event| {
            let _ = sender.send(event.clone());
        });

        let mut observer = Self {
            label: label.to_string(),
            session,
            _subscription: subscription,
            events,
        };

        match observer.next_event(Duration::from_secs(5)).await? {
            SessionEvent::Connected => Ok(observer),
            other => Err(anyhow!("{label}: expected to connect first, got {other:?}")),
        }
    }

    pub fn declare(&self, channels: &[String]) {
        self.session.update_desired_channels(channels.iter().cloned());
    }

    /// Next delivery frame, whatever its channel.
    pub async fn next_message(&mut self, wait: Duration) -> Result<Value> {
        loop {
            if let SessionEvent::Message(value) = self.next_event(wait).await? {
                return Ok(value);
            }
        }
    }

    /// Fails if any delivery frame arrives within `wait`.
    pub async fn expect_silence(&mut self, wait: Duration) -> Result<()> {
        match self.next_message(wait).await {
            Ok(value) => Err(anyhow!("{}: unexpected message {value}", self.label)),
            Err(_) => Ok(()),
        }
    }

    async fn next_event(&mut self, wait: Duration) -> Result<SessionEvent> {
        timeout(wait, self.events.recv())
            .await
            .map_err(|_| anyhow!("{}: nothing received within {wait:?}", self.label))?
            .ok_or_else(|| anyhow!("{}: session dropped", self.label))
    }

    pub fn close(&self) {
        self.session.shutdown();
    }
}
