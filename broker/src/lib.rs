//! Broker-facing side of the relay.
//!
//! The relay holds exactly one pattern subscription against the broker and
//! multiplexes it locally, so the broker never learns about individual client
//! interests.
//!
//! # Modules
//!
//! - `message`: raw and decoded broker messages
//! - `listener`: the long-lived pattern subscription that feeds a [`MessageHandler`]
//! - `memory`: in-process broker used by tests and local runs
//! - `redis_broker`: Redis pub/sub broker used in production
//! - `error`: error types for broker operations

use async_trait::async_trait;
use futures_util::stream::BoxStream;

pub mod error;
pub mod listener;
pub mod memory;
pub mod message;
pub mod redis_broker;

pub use listener::{Listener, MessageHandler};
pub use memory::MemoryBroker;
pub use message::{BrokerMessage, RawMessage};
pub use redis_broker::RedisBroker;

/// Pattern matching every channel identifier.
pub const MATCH_ALL: &str = "*";

/// Stream of messages produced by one pattern subscription. The stream ends
/// when the broker connection is lost.
pub type BrokerStream = BoxStream<'static, RawMessage>;

/// A channel-addressed publish/subscribe bus.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Opens a new pattern subscription.
    async fn psubscribe(&self, pattern: &str) -> Result<BrokerStream, error::Error>;

    /// Fire-and-forget publish of a payload to a channel.
    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<(), error::Error>;
}
