//! Fan-out relay between one broker subscription and many client connections.
//!
//! # Architecture
//!
//! - **One broker subscription**: the `broker` crate's listener holds a single
//!   pattern subscription and hands every message to [`RelayMessageHandler`].
//! - **Connection registry**: a `DashMap` keyed by [`connection::ConnectionId`]
//!   holding each connection's outbound queue and current interest set.
//! - **Dispatch against current interest**: a message is queued for a
//!   connection iff its channel is in that connection's set when the
//!   dispatcher visits it.
//! - **Ephemeral messages**: nothing is buffered for absent or unsubscribed
//!   connections.
//! - **Non-blocking fan-out**: queue sends use `try_send`; a full or closed
//!   queue removes the connection instead of stalling the pass.
//!
//! # Message Flow
//!
//! 1. Client opens a WebSocket; the lifecycle handler calls
//!    `Manager::register_connection` and gets the outbound queue
//! 2. Control frames go through `Manager::handle_control_frame`
//! 3. Broker message arrives, `Manager::dispatch` encodes it once and queues
//!    it for every interested connection
//! 4. The connection's writer task drains the queue onto the socket
//! 5. On close, the lifecycle handler calls `Manager::unregister_connection`
//!
//! # Modules
//!
//! - `connection`: ConnectionRegistry and type-safe ConnectionId
//! - `manager`: control-frame handling and fan-out dispatch
//! - `broker_message_handler`: adapter from broker messages to dispatch

pub mod broker_message_handler;
pub mod connection;
pub mod manager;

pub use broker_message_handler::RelayMessageHandler;
pub use manager::{DispatchReport, Manager};
