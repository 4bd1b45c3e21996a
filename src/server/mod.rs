//! Streaming server
//!
//! ```text
//!   accept ──► ServerConnection ──► INIT_REQUEST ──► ClientAdmission
//!                                                      │ ok      │ rejected
//!                                                      ▼         ▼
//!                              SIGNAL_AVAILABLE × N, INIT_DONE   CONNECTION_REJECTED, close
//!
//!   publish(signal) ──► for each connection whose peer subscribed:
//!                         pool.allocate() ──► send_packet(deadline)
//! ```

pub mod admission;
pub mod config;
pub mod connection;
pub mod listener;

pub use admission::ClientAdmission;
pub use config::ServerConfig;
pub use connection::{PublishReport, ServerConnection};
pub use listener::StreamingServer;
