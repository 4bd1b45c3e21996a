//! Client that mirrors the counter published by `signal_server`
//!
//! Run with: cargo run --example signal_monitor [ADDR]
//!
//! The default address is 127.0.0.1:7420. Stop the server while the monitor
//! runs to watch it reconnect and restore its subscription.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sigstream::mirror::StreamingSource;
use sigstream::{
    ClientConfig, MirroredSignal, MirroredSignalSubscription, PacketBuffer, ReconnectionStatus,
    StreamingClient, StreamingHandler,
};

struct Monitor;

impl StreamingHandler for Monitor {
    fn on_signal_available(&self, signal_id: &str, serialized: &str) {
        println!("Available: {} {}", signal_id, serialized);
    }

    fn on_signal_unavailable(&self, signal_id: &str) {
        println!("Unavailable: {}", signal_id);
    }

    fn on_subscription_ack(&self, signal_id: &str, subscribed: bool) {
        println!("Ack: {} subscribed={}", signal_id, subscribed);
    }

    fn on_reconnection_status_changed(&self, status: ReconnectionStatus) {
        println!("Status: {:?}", status);
    }
}

/// Counts the samples of the mirrored counter
struct CounterMirror {
    samples: AtomicU64,
    last: AtomicU64,
}

impl MirroredSignal for CounterMirror {
    fn remote_id(&self) -> String {
        "demo0/counter".into()
    }

    fn on_packet(&self, packet: PacketBuffer) {
        let payload = packet.payload_bytes();
        self.samples
            .fetch_add((payload.len() / 4) as u64, Ordering::Relaxed);
        if let Some(tail) = payload.chunks_exact(4).last() {
            let value = u32::from_le_bytes([tail[0], tail[1], tail[2], tail[3]]);
            self.last.store(value as u64, Ordering::Relaxed);
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:7420".to_string());

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("sigstream=info".parse()?),
        )
        .init();

    let config = ClientConfig::new(addr).reconnect(Duration::from_secs(2), 30);
    let client = StreamingClient::connect(config, Arc::new(Monitor)).await?;

    let mirror = Arc::new(CounterMirror {
        samples: AtomicU64::new(0),
        last: AtomicU64::new(0),
    });
    let signal: Arc<dyn MirroredSignal> = mirror.clone();
    client.add_signal(&signal)?;

    // Subscribe through the mirror state machine, as a UI would
    let subscription = MirroredSignalSubscription::new("demo0/counter");
    let source: Arc<dyn StreamingSource> = client.clone();
    subscription.add_streaming_source(&source)?;
    subscription.set_active_streaming_source(&source.connection_id())?;
    subscription.set_streamed(true);
    subscription.on_listened_changed(true);

    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                println!(
                    "Received {} samples, last value {}",
                    mirror.samples.load(Ordering::Relaxed),
                    mirror.last.load(Ordering::Relaxed),
                );
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    subscription.deactivate_streaming();
    client.close();
    Ok(())
}
