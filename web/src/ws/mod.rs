//! WebSocket endpoint for relay clients.
//!
//! Only the connection lifecycle lives here. Registry and dispatch are in the
//! `relay` crate so they can be exercised without a socket.

pub mod handler;
