use anyhow::{anyhow, Result};
use broker::Broker;
use colored::*;
use serde_json::json;
use std::time::{Duration, Instant};

use crate::observer::Observer;
use crate::output::{print_message, TestResult};

const RECEIVE_TIMEOUT: Duration = Duration::from_secs(5);
const SILENCE_WINDOW: Duration = Duration::from_secs(1);
/// Time allowed for the relay to apply a declaration before publishing.
const SETTLE: Duration = Duration::from_millis(250);

/// Channel names unique to this run, so concurrent runs do not interfere.
fn channel(name: &str) -> String {
    format!("relay-test:{name}:{}", uuid::Uuid::new_v4())
}

fn finish(scenario: &str, start: Instant, outcome: Result<()>) -> TestResult {
    match outcome {
        Ok(()) => {
            println!("{} {scenario} passed", "✓".green());
            TestResult::pass(scenario, start.elapsed())
        }
        Err(e) => {
            println!("{} {scenario} failed: {e}", "✗".red());
            TestResult::fail(scenario, e.to_string(), start.elapsed())
        }
    }
}

pub async fn test_connection(relay_url: &str) -> TestResult {
    let start = Instant::now();
    println!("\n{}", "=== TEST: Connection ===".bright_cyan().bold());

    let outcome = async {
        println!("{} Opening a session...", "→".blue());
        let observer = Observer::connect(relay_url, "Client", &[]).await?;
        println!("{} Session connected", "✓".green());
        observer.close();
        Ok::<_, anyhow::Error>(())
    }
    .await;

    finish("connection_test", start, outcome)
}

pub async fn test_fan_out(relay_url: &str, broker: &dyn Broker) -> TestResult {
    let start = Instant::now();
    println!("\n{}", "=== TEST: Fan-out ===".bright_cyan().bold());

    let outcome = async {
        let first_channel = channel("a");
        let second_channel = channel("b");
        let mut first = Observer::connect(relay_url, "Client A", &[first_channel.clone()]).await?;
        let mut second =
            Observer::connect(relay_url, "Client B", &[second_channel.clone()]).await?;
        tokio::time::sleep(SETTLE).await;

        println!("{} Publishing to {first_channel}...", "→".blue());
        let payload = json!({"title": "fan-out"});
        broker
            .publish(&first_channel, payload.to_string().as_bytes())
            .await?;

        let message = first.next_message(RECEIVE_TIMEOUT).await?;
        print_message(&first.label, &message);
        if message != json!({"channel": first_channel, "title": "fan-out"}) {
            return Err(anyhow!("Client A received {message}"));
        }

        println!("{} Checking Client B stayed quiet...", "→".blue());
        second.expect_silence(SILENCE_WINDOW).await?;

        broker.publish(&second_channel, b"plain text").await?;
        let message = second.next_message(RECEIVE_TIMEOUT).await?;
        print_message(&second.label, &message);
        if message != json!({"channel": second_channel, "message": "plain text"}) {
            return Err(anyhow!("Client B received {message}"));
        }

        first.close();
        second.close();
        Ok::<_, anyhow::Error>(())
    }
    .await;

    finish("fan_out", start, outcome)
}

pub async fn test_unsubscribe(relay_url: &str, broker: &dyn Broker) -> TestResult {
    let start = Instant::now();
    println!("\n{}", "=== TEST: Unsubscribe ===".bright_cyan().bold());

    let outcome = async {
        let watched = channel("watched");
        let sentinel = channel("sentinel");
        let mut observer =
            Observer::connect(relay_url, "Client", &[watched.clone(), sentinel.clone()]).await?;
        tokio::time::sleep(SETTLE).await;

        broker.publish(&watched, br#"{"n":1}"#).await?;
        let message = observer.next_message(RECEIVE_TIMEOUT).await?;
        print_message(&observer.label, &message);

        println!("{} Dropping {watched} from the declaration...", "→".blue());
        observer.declare(&[sentinel.clone()]);
        tokio::time::sleep(SETTLE).await;

        broker.publish(&watched, br#"{"n":2}"#).await?;
        broker.publish(&sentinel, br#"{"n":3}"#).await?;

        // Ordering per connection means the sentinel arrives after anything
        // still routed to the dropped channel
        let message = observer.next_message(RECEIVE_TIMEOUT).await?;
        print_message(&observer.label, &message);
        if message["channel"] != json!(sentinel) {
            return Err(anyhow!("still received {message} after unsubscribing"));
        }

        observer.close();
        Ok::<_, anyhow::Error>(())
    }
    .await;

    finish("unsubscribe", start, outcome)
}
