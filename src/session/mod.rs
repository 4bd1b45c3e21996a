//! Connection session
//!
//! A session owns the framing state of one connection:
//!
//! - [`SessionHandler`]: sans-IO read state machine and write queue
//! - [`SessionHandle`]: thread-safe wrapper application code sends through
//! - [`run_session`]: tokio driver binding a handle to a socket

pub mod config;
pub mod context;
pub mod driver;
pub mod handler;
pub mod shared;
pub mod state;

pub use config::SessionConfig;
pub use context::SessionContext;
pub use driver::{run_session, SessionDelegate};
pub use handler::{SessionHandler, WriteTask};
pub use shared::SessionHandle;
pub use state::SessionPhase;
