//! Stream listener example
//!
//! Run with: cargo run --example listen [URL]
//!
//! Connects to an event stream, prints every event and every state change,
//! and keeps reconnecting until Ctrl+C. Pair it with the broadcast_server
//! example and restart the server to watch the backoff at work.

use sse_rs::client::{ClientConfig, SseClient, StateChange};

const DEFAULT_URL: &str = "http://127.0.0.1:8080/events";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_URL.to_string());

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("sse_rs=info".parse()?)
                .add_directive("listen=debug".parse()?),
        )
        .init();

    let config = ClientConfig::new(&url)?.query("client", "listen-demo");
    let client = SseClient::new(config)?;

    client.subscribe_all(|event| {
        println!(
            "[{}] {} {}",
            event.event_type,
            event.id.as_deref().unwrap_or("-"),
            event.data
        );
    });

    client.subscribe_state(|change| match change {
        StateChange::ReconnectScheduled { attempt, delay } => {
            println!("reconnect #{} in {:?}", attempt, delay);
        }
        StateChange::Reconnected { attempts } => {
            println!("reconnected after {} attempt(s)", attempts);
        }
        other => println!("state: {:?}", other),
    });

    client.start(None, false).await?;

    tokio::signal::ctrl_c().await?;
    println!("\nStopping...");

    client.stop().await?;
    println!("{:?}", client.stats());
    Ok(())
}
