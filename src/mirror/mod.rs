//! Consuming-side signal subscriptions
//!
//! A mirrored signal may be reachable through several streaming sources
//! (one per connection) but streams through at most one of them. Its wire
//! subscription is derived from three inputs:
//!
//! ```text
//!   listened ──┐
//!   streamed ──┼── AND ──► subscribed through active source
//!   active  ───┘
//! ```

pub mod source;
pub mod subscription;

pub use source::StreamingSource;
pub use subscription::{MirroredSignalSubscription, TransitionStatus};
