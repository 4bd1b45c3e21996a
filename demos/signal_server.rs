//! Signal server publishing a synthetic counter
//!
//! Run with: cargo run --example signal_server [BIND_ADDR]
//!
//! Examples:
//!   cargo run --example signal_server                    # binds to 0.0.0.0:7420
//!   cargo run --example signal_server localhost          # binds to 127.0.0.1:7420
//!   cargo run --example signal_server 127.0.0.1:7421     # binds to 127.0.0.1:7421
//!
//! Pair it with the `signal_monitor` example to watch the samples arrive.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use sigstream::protocol::constants::DEFAULT_PORT;
use sigstream::{ServerConfig, Signal, StreamingServer};

const SAMPLES_PER_TICK: u32 = 100;

struct Counter;

impl Signal for Counter {
    fn global_id(&self) -> String {
        "demo0/counter".into()
    }

    fn serialize(&self) -> String {
        "{\"name\":\"counter\",\"sampleType\":\"u32\",\"rate\":1000}".into()
    }
}

/// Parse bind address from command line argument.
///
/// Accepts "localhost", a bare IP, or IP:PORT.
fn parse_bind_addr(arg: &str) -> Result<SocketAddr, String> {
    let normalized = arg.replace("localhost", "127.0.0.1");

    if let Ok(addr) = normalized.parse::<SocketAddr>() {
        return Ok(addr);
    }
    if let Ok(ip) = normalized.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, DEFAULT_PORT));
    }

    Err(format!(
        "Invalid bind address: '{}'. Expected format: IP:PORT or IP or 'localhost'",
        arg
    ))
}

fn print_usage() {
    eprintln!("Usage: signal_server [BIND_ADDR]");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  BIND_ADDR    Address to bind to (default: 0.0.0.0:{})", DEFAULT_PORT);
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }

    let mut config = ServerConfig::default().max_send_latency(Duration::from_millis(50));
    if let Some(addr_str) = args.get(1) {
        match parse_bind_addr(addr_str) {
            Ok(addr) => config = config.bind(addr),
            Err(e) => {
                eprintln!("Error: {}", e);
                eprintln!();
                print_usage();
                std::process::exit(1);
            }
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("sigstream=debug".parse()?)
                .add_directive("signal_server=debug".parse()?),
        )
        .init();

    let server = Arc::new(StreamingServer::new(config));
    server.add_signal(Arc::new(Counter))?;
    println!("Starting signal server on {}", server.bind_addr());

    let publisher = Arc::clone(&server);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(100));
        let mut next = 0u32;
        loop {
            ticker.tick().await;
            let samples: Vec<u8> = (next..next + SAMPLES_PER_TICK)
                .flat_map(|n| n.to_le_bytes())
                .collect();
            next += SAMPLES_PER_TICK;

            match publisher.publish("demo0/counter", &samples, 4, Instant::now()) {
                Ok(report) if report.dropped_samples > 0 => {
                    tracing::warn!(dropped = report.dropped_samples, "Samples dropped");
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "Publish failed"),
            }
        }
    });

    let stats_server = Arc::clone(&server);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(10));
        loop {
            ticker.tick().await;
            let stats = stats_server.stats();
            println!(
                "Stats: active={} rejected={} packets={} degraded={}",
                stats.active_connections,
                stats.rejected_connections,
                stats.packets_published,
                stats.degraded_packets,
            );
        }
    });

    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    Ok(())
}
