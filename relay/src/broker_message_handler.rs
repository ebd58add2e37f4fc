use crate::Manager;
use async_trait::async_trait;
use broker::{BrokerMessage, MessageHandler};
use log::*;
use std::sync::Arc;

/// Bridges the broker listener to the fan-out dispatcher.
///
/// The listener awaits each call before reading the next broker message, so
/// dispatch passes happen strictly in broker order.
pub struct RelayMessageHandler {
    manager: Arc<Manager>,
}

impl RelayMessageHandler {
    pub fn new(manager: Arc<Manager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl MessageHandler for RelayMessageHandler {
    async fn handle(&self, message: &BrokerMessage) {
        let report = self.manager.dispatch(message);

        debug!(
            "Dispatched message on channel {} to {} connection(s), dropped {}",
            message.channel, report.delivered, report.dropped
        );
    }
}
