//! # sigstream
//!
//! Signal streaming transport: advertises which signals a device publishes,
//! tracks subscriptions across a reconnectable byte-stream connection,
//! frames packets into and out of that stream and manages the memory
//! backing in-flight packets.
//!
//! ## Layers
//!
//! ```text
//!   client::StreamingClient          server::StreamingServer
//!        │  mirror::MirroredSignalSubscription    │  server::ClientAdmission
//!        ▼                                        ▼
//!   registry::StreamingRegistry  (one per connection, both ends)
//!        │
//!        ▼
//!   session::SessionHandler ◄── session::run_session (tokio)
//!        │
//!        ▼
//!   protocol (frames, packets)       pool::PacketMemoryPool
//! ```
//!
//! ## Server
//!
//! ```no_run
//! use std::sync::Arc;
//! use sigstream::{ServerConfig, Signal, StreamingServer};
//!
//! struct Counter;
//!
//! impl Signal for Counter {
//!     fn global_id(&self) -> String {
//!         "dev0/counter".into()
//!     }
//!
//!     fn serialize(&self) -> String {
//!         "{\"name\":\"counter\"}".into()
//!     }
//! }
//!
//! # async fn example() -> sigstream::Result<()> {
//! let server = Arc::new(StreamingServer::new(ServerConfig::default()));
//! server.add_signal(Arc::new(Counter))?;
//! server.run().await
//! # }
//! ```

pub mod client;
pub mod error;
pub mod mirror;
pub mod pool;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod signal;
pub mod stats;

pub use client::{ClientConfig, ReconnectionStatus, StreamingClient, StreamingHandler};
pub use error::{Error, ProtocolError, Result};
pub use mirror::{MirroredSignalSubscription, StreamingSource, TransitionStatus};
pub use pool::PacketMemoryPool;
pub use protocol::{ClientType, Message, PacketBuffer};
pub use registry::StreamingRegistry;
pub use server::{ServerConfig, StreamingServer};
pub use session::{SessionConfig, SessionHandle, SessionHandler};
pub use signal::{MirroredSignal, Signal};
pub use stats::{ServerStats, SessionStats};
