use broker::{Listener, RedisBroker};
use log::{error, info};
use relay::RelayMessageHandler;
use service::{config::Config, logging::Logger, AppState};
use std::sync::Arc;

#[tokio::main]
async fn main() {
    let config = Config::new();
    if let Err(e) = Logger::init_logger(&config) {
        eprintln!("Failed to initialize logger: {e}");
    }

    info!(
        "Starting up channel relay [{}] on {}:{}",
        config.runtime_env(),
        config.interface(),
        config.port
    );

    let manager = service::init_manager(&config);

    let broker = match RedisBroker::open(config.redis_url()) {
        Ok(broker) => Arc::new(broker),
        Err(e) => {
            error!("Invalid broker URL: {e}");
            std::process::exit(1);
        }
    };

    // The relay only accepts connections once the broker feed is live
    let listener = Listener::new(broker, Arc::new(RelayMessageHandler::new(manager.clone())))
        .pattern(config.broker_pattern.clone())
        .resubscribe_delay(config.resubscribe_delay());
    if let Err(e) = listener.start().await {
        error!("Failed to subscribe to broker at {}: {e}", config.redis_url());
        std::process::exit(1);
    }

    let app_state = AppState::new(config, &manager);

    if let Err(e) = web::init_server(app_state).await {
        error!("Server exited with error: {e}");
        std::process::exit(1);
    }
}
