//! Relay server demo
//!
//! Run with: cargo run --example relay_server [BIND_ADDR]
//!
//! Examples:
//!   cargo run --example relay_server                    # binds to 0.0.0.0:1935
//!   cargo run --example relay_server localhost:1936     # binds to 127.0.0.1:1936
//!
//! Publish with ffmpeg:
//!   ffmpeg -re -i input.mp4 -c copy -f flv rtmp://localhost/live/test
//!
//! Play with ffplay:
//!   ffplay rtmp://localhost/live/test
//!
//! Paths under `/private/` are rejected for playback to show the
//! authorizer hook.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rtmp_relay::server::handler::{AuthResult, Authorizer, Event, NotificationSink, TracingSink};
use rtmp_relay::{RtmpServer, ServerConfig};

/// Rejects playback of private paths
struct PathAuthorizer;

#[async_trait::async_trait]
impl Authorizer for PathAuthorizer {
    async fn play(&self, path: &str) -> AuthResult {
        if path.starts_with("/private/") {
            AuthResult::Reject(format!("{} is not public", path))
        } else {
            AuthResult::Accept
        }
    }
}

/// Logs events and counts publishes
struct CountingSink {
    publishes: AtomicU64,
}

impl NotificationSink for CountingSink {
    fn notify(&self, event: Event) {
        if let Event::PublishSuccess { .. } = event {
            let total = self.publishes.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::info!(total = total, "Publish started");
        }
        TracingSink.notify(event);
    }
}

fn parse_bind_addr(arg: &str) -> Result<SocketAddr, String> {
    const DEFAULT_PORT: u16 = 1935;

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

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    let mut config = ServerConfig::default();
    if let Some(addr) = args.get(1) {
        config.bind_addr = parse_bind_addr(addr)?;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("rtmp_relay=debug".parse()?)
                .add_directive("relay_server=debug".parse()?),
        )
        .init();

    println!("Starting RTMP relay on {}", config.bind_addr);

    let sink = Arc::new(CountingSink {
        publishes: AtomicU64::new(0),
    });
    let server = RtmpServer::new(config, Some(Arc::new(PathAuthorizer)), sink);

    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
            println!("\nShutting down...");
        })
        .await?;

    Ok(())
}
