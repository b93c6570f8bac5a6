//! Broadcast server example
//!
//! Run with: cargo run --example broadcast_server [BIND_ADDR]
//!
//! Examples:
//!   cargo run --example broadcast_server                  # binds to 0.0.0.0:8080
//!   cargo run --example broadcast_server localhost        # binds to 127.0.0.1:8080
//!   cargo run --example broadcast_server 127.0.0.1:9000   # binds to 127.0.0.1:9000
//!
//! ## Watching the stream
//!
//! With curl:
//!   curl -N http://localhost:8080/events
//!
//! With the listen example:
//!   cargo run --example listen http://localhost:8080/events
//!
//! A score update is published every second. Every connected client gets
//! every update; slow clients skip the oldest ones instead of buffering.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use sse_rs::{BroadcastQueue, ServerConfig, SseServer};

const DEFAULT_PORT: u16 = 8080;

#[derive(Serialize)]
struct Score {
    home: u32,
    away: u32,
    minute: u32,
}

fn parse_bind_addr(arg: &str) -> Result<SocketAddr, String> {
    let normalized = arg.replace("localhost", "127.0.0.1");

    if let Ok(addr) = normalized.parse::<SocketAddr>() {
        return Ok(addr);
    }

    if let Ok(ip) = normalized.parse::<std::net::IpAddr>() {
        return Ok(SocketAddr::new(ip, DEFAULT_PORT));
    }

    Err(format!(
        "Invalid bind address: '{}'. Expected format: IP:PORT or IP or 'localhost'",
        arg
    ))
}

fn print_usage() {
    eprintln!("Usage: broadcast_server [BIND_ADDR]");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  BIND_ADDR    Address to bind to (default: 0.0.0.0:8080)");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }

    let bind_addr = match args.get(1) {
        Some(addr_str) => match parse_bind_addr(addr_str) {
            Ok(addr) => addr,
            Err(e) => {
                eprintln!("Error: {}", e);
                eprintln!();
                print_usage();
                std::process::exit(1);
            }
        },
        None => SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("sse_rs=debug".parse()?)
                .add_directive("broadcast_server=debug".parse()?),
        )
        .init();

    let config = ServerConfig::with_addr(bind_addr).cors_allow_origin("*");
    println!("Streaming on http://{}{}", config.bind_addr, config.path);

    let queue = Arc::new(BroadcastQueue::new());
    let server = SseServer::new(config, Arc::clone(&queue));

    let publisher = Arc::clone(&queue);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        let mut score = Score {
            home: 0,
            away: 0,
            minute: 0,
        };

        loop {
            ticker.tick().await;
            score.minute += 1;
            if score.minute % 7 == 0 {
                score.home += 1;
            }
            if score.minute % 11 == 0 {
                score.away += 1;
            }

            match publisher.publish_typed(&score) {
                Ok(delivered) => tracing::debug!(delivered, minute = score.minute, "Published score"),
                Err(e) => tracing::warn!(error = %e, "Failed to publish score"),
            }
        }
    });

    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
            println!("\nShutting down...");
        })
        .await?;

    queue.close();
    Ok(())
}
