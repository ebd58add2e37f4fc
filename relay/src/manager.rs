use crate::connection::{ConnectionId, ConnectionRegistry};
use broker::BrokerMessage;
use log::*;
use protocol::{encode_delivery, ControlMessage};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError, Receiver};

/// Default capacity of each connection's outbound queue.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 64;

/// Outcome of one fan-out pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    /// Connections the frame was queued for.
    pub delivered: usize,
    /// Connections removed because their queue was full or closed.
    pub dropped: usize,
}

/// Routes control frames into the registry and fans broker messages out to
/// interested connections.
pub struct Manager {
    registry: Arc<ConnectionRegistry>,
    outbound_capacity: usize,
}

impl Manager {
    pub fn new() -> Self {
        Self::with_outbound_capacity(DEFAULT_OUTBOUND_CAPACITY)
    }

    pub fn with_outbound_capacity(outbound_capacity: usize) -> Self {
        Self {
            registry: Arc::new(ConnectionRegistry::new()),
            outbound_capacity: outbound_capacity.max(1),
        }
    }

    /// Register a new connection. The returned receiver is the connection's
    /// outbound queue; dropping the registry entry closes it.
    pub fn register_connection(&self) -> (ConnectionId, Receiver<String>) {
        let (sender, receiver) = mpsc::channel(self.outbound_capacity);
        let connection_id = ConnectionId::new();
        self.registry.register(connection_id.clone(), sender);
        info!("Registered connection {}", connection_id.as_str());
        (connection_id, receiver)
    }

    /// Unregister a connection by ID. Returns `true` if this call removed it.
    pub fn unregister_connection(&self, connection_id: &ConnectionId) -> bool {
        let removed = self.registry.unregister(connection_id);
        if removed {
            info!("Unregistered connection {}", connection_id.as_str());
        } else {
            debug!(
                "Connection {} was already removed from the registry",
                connection_id.as_str()
            );
        }
        removed
    }

    /// Parse and apply one inbound control frame. Malformed frames are logged
    /// and ignored.
    pub fn handle_control_frame(&self, connection_id: &ConnectionId, text: &str) {
        match ControlMessage::parse(text) {
            Ok(message) => self.apply_control(connection_id, &message),
            Err(e) => warn!(
                "Ignoring malformed control frame on connection {}: {e}",
                connection_id.as_str()
            ),
        }
    }

    pub fn apply_control(&self, connection_id: &ConnectionId, message: &ControlMessage) {
        let applied = match message {
            ControlMessage::Subscribe { channels } => self
                .registry
                .add_subscriptions(connection_id, channels.iter().cloned()),
            ControlMessage::Unsubscribe { channels } => {
                self.registry.remove_subscriptions(connection_id, channels)
            }
            ControlMessage::Replace { channels } => self
                .registry
                .set_subscriptions(connection_id, channels.iter().cloned()),
        };

        if !applied {
            debug!(
                "Control frame for unknown connection {} ignored",
                connection_id.as_str()
            );
            return;
        }

        match self.registry.subscriptions(connection_id) {
            Some(current) if current.is_empty() => debug!(
                "Connection {} has no subscriptions and is unreachable until it subscribes",
                connection_id.as_str()
            ),
            Some(current) => debug!(
                "Connection {} now subscribed to {} channel(s)",
                connection_id.as_str(),
                current.len()
            ),
            None => {}
        }
    }

    /// Deliver one broker message to every connection currently subscribed
    /// to its channel.
    ///
    /// Queue sends never block. A connection whose queue is full or closed is
    /// removed from the registry once the traversal is over, which closes its
    /// queue and ends its lifecycle task.
    pub fn dispatch(&self, message: &BrokerMessage) -> DispatchReport {
        let frame = match encode_delivery(&message.channel, &message.payload) {
            Ok(frame) => frame,
            Err(e) => {
                error!(
                    "Failed to encode delivery for channel {}: {e}",
                    message.channel
                );
                return DispatchReport::default();
            }
        };

        let mut report = DispatchReport::default();
        let mut failed = Vec::new();

        self.registry.for_each(|connection_id, info| {
            if !info.subscriptions.contains(&message.channel) {
                return;
            }

            match info.sender.try_send(frame.clone()) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(
                        "Connection {} is not keeping up with channel {}. Connection will be cleaned up.",
                        connection_id.as_str(),
                        message.channel
                    );
                    failed.push(connection_id.clone());
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(
                        "Connection {} is gone. Connection will be cleaned up.",
                        connection_id.as_str()
                    );
                    failed.push(connection_id.clone());
                }
            }
        });

        for connection_id in failed {
            if self.unregister_connection(&connection_id) {
                report.dropped += 1;
            }
        }

        report
    }

    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }
}

impl Default for Manager {
    fn default() -> Self {
        Self::new()
    }
}
