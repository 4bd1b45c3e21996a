//! Streaming client
//!
//! Connects to a streaming server, mirrors the signals it announces and
//! keeps subscriptions alive across reconnects.
//!
//! ```no_run
//! use std::sync::Arc;
//! use sigstream::client::{ClientConfig, NoopHandler, StreamingClient};
//!
//! # async fn example() -> sigstream::error::Result<()> {
//! let config = ClientConfig::new("127.0.0.1:7420");
//! let client = StreamingClient::connect(config, Arc::new(NoopHandler)).await?;
//! println!("available: {:?}", client.registry().available_signals());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connector;
pub mod streaming;

pub use config::ClientConfig;
pub use streaming::{NoopHandler, ReconnectionStatus, StreamingClient, StreamingHandler};
