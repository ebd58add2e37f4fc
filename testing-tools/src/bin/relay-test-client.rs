use anyhow::{Context, Result};
use broker::RedisBroker;
use clap::Parser;
use colored::*;
use testing_tools::output::print_test_summary;
use testing_tools::scenarios;

#[derive(Parser)]
#[command(name = "relay-test-client")]
#[command(about = "Relay Integration Testing Tool")]
struct Cli {
    /// WebSocket endpoint of the relay (e.g., ws://localhost:3001/ws)
    #[arg(long)]
    relay_url: String,

    /// Redis instance the relay listens to
    #[arg(long, default_value = "redis://127.0.0.1:6379")]
    redis_url: String,

    /// Test scenario to run
    #[arg(long, value_enum)]
    scenario: ScenarioChoice,

    /// Enable verbose output
    #[arg(long, short)]
    verbose: bool,
}

#[derive(clap::ValueEnum, Clone)]
enum ScenarioChoice {
    /// Open a session and wait for it to connect
    ConnectionTest,
    /// Publish to two channels and check each client only gets its own
    FanOut,
    /// Drop a channel from the declaration and check delivery stops
    Unsubscribe,
    /// Run every scenario
    All,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Debug)
            .init();
    }

    println!("{}", "=== SETUP PHASE ===".bright_white().bold());
    println!("{} Connecting to broker at {}...", "→".blue(), cli.redis_url);
    let broker = RedisBroker::open(&cli.redis_url).context("invalid Redis URL")?;

    println!("\n{}", "=== TEST PHASE ===".bright_white().bold());

    let mut results = Vec::new();
    match cli.scenario {
        ScenarioChoice::ConnectionTest => {
            results.push(scenarios::test_connection(&cli.relay_url).await);
        }
        ScenarioChoice::FanOut => {
            results.push(scenarios::test_fan_out(&cli.relay_url, &broker).await);
        }
        ScenarioChoice::Unsubscribe => {
            results.push(scenarios::test_unsubscribe(&cli.relay_url, &broker).await);
        }
        ScenarioChoice::All => {
            results.push(scenarios::test_connection(&cli.relay_url).await);
            results.push(scenarios::test_fan_out(&cli.relay_url, &broker).await);
            results.push(scenarios::test_unsubscribe(&cli.relay_url, &broker).await);
        }
    }

    print_test_summary(&results);

    if results.iter().any(|r| !r.passed) {
        std::process::exit(1);
    }
    Ok(())
}
