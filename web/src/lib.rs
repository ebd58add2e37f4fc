//! HTTP and WebSocket surface of the relay.
//!
//! This crate contains the axum router and the per-connection lifecycle
//! handler. The registry and fan-out logic live in the `relay` crate.

use log::*;
use service::AppState;
use tokio::net::TcpListener;

pub mod controller;
pub mod router;
pub mod ws;

/// Binds the configured interface and serves until the process exits.
///
/// Errors accepting individual connections are handled inside the server
/// loop and never end it; only a failure to bind is returned.
pub async fn init_server(app_state: AppState) -> std::io::Result<()> {
    let address = format!(
        "{}:{}",
        app_state.config.interface(),
        app_state.config.port
    );

    let listener = TcpListener::bind(&address).await?;
    info!("Relay listening on {}", listener.local_addr()?);

    axum::serve(listener, router::define_routes(app_state)).await
}
