//! Per-connection streaming registry
//!
//! The registry is the subscription authority of one connection. It keeps
//! two ledgers:
//!
//! ```text
//!                      StreamingRegistry (one per connection)
//!              ┌──────────────────────────────────────────────┐
//!  consuming   │ entries:   remote id ─► SubscriptionEntry    │ subscribe()
//!  side        │            { weak signal, numeric id, refs } │ unsubscribe()
//!              │ available: key ─► numeric id  (live)         │ mark_available()
//!              │ shadow:    key ─► numeric id  (reconnecting) │
//!              ├──────────────────────────────────────────────┤
//!  publishing  │ published: global id ─► { numeric id,        │ register_signal()
//!  side        │                           peer_subscribed }  │ handle_peer_subscribe()
//!              └──────────────────────┬───────────────────────┘
//!                                     │ CommandSink::send_command()
//!                                     ▼
//!                               SessionHandle ──► socket
//! ```
//!
//! Any number of local subscribers collapse into one wire subscription:
//! only the 0→1 and 1→0 transitions of an entry's count reach the peer.
//!
//! # Reconnection
//!
//! After a reconnect the peer announces its signals again.
//! [`StreamingRegistry::start_reconnection`] collects those announcements in
//! a shadow set; [`StreamingRegistry::complete_reconnection`] swaps it in,
//! reports the difference and subscribes every referenced signal on the new
//! connection. A signal that is not announced again simply becomes pending.

pub mod entry;
pub mod store;

pub use entry::{identity_matches, AvailableSignal, PublishedSignal, SignalIdentity, SubscriptionEntry};
pub use store::{CommandSink, ReconnectionDiff, StreamingRegistry};
