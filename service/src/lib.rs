use config::Config;
use log::info;
use relay::Manager;
use std::sync::Arc;

pub mod config;
pub mod logging;

/// Builds the relay manager sized from the configuration.
pub fn init_manager(config: &Config) -> Arc<Manager> {
    info!(
        "Relay config: outbound_buffer={}, send_timeout={}s, broker_pattern=\"{}\", resubscribe_delay={}ms",
        config.outbound_buffer,
        config.send_timeout_secs,
        config.broker_pattern,
        config.resubscribe_delay_ms,
    );

    Arc::new(Manager::with_outbound_capacity(config.outbound_buffer))
}

// Service-level state containing only infrastructure concerns
// Needs to implement Clone to be able to be passed into Router as State
#[derive(Clone)]
pub struct AppState {
    pub relay_manager: Arc<Manager>,
    pub config: Config,
}

impl AppState {
    pub fn new(app_config: Config, manager: &Arc<Manager>) -> Self {
        Self {
            relay_manager: Arc::clone(manager),
            config: app_config,
        }
    }

    pub fn manager_ref(&self) -> &Manager {
        self.relay_manager.as_ref()
    }
}
