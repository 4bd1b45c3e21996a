//! Registry entries
//!
//! Per-signal records kept by a [`StreamingRegistry`](super::StreamingRegistry).

use std::sync::{Arc, Weak};

use crate::signal::MirroredSignal;

/// Identity of a mirrored signal within one connection.
///
/// `remote_id` is stable; `available_key` is the id the peer announced the
/// signal under, known only while the signal is available.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalIdentity {
    pub remote_id: String,
    pub available_key: Option<String>,
}

impl SignalIdentity {
    pub fn new(remote_id: impl Into<String>) -> Self {
        Self {
            remote_id: remote_id.into(),
            available_key: None,
        }
    }

    /// Whether an announced key refers to this signal
    pub fn matches(&self, key: &str) -> bool {
        identity_matches(&self.remote_id, key)
    }
}

/// A remote id matches an announced key when equal, or when the key is its
/// trailing path segment(s).
pub fn identity_matches(remote_id: &str, key: &str) -> bool {
    if remote_id == key {
        return true;
    }
    remote_id
        .strip_suffix(key)
        .map_or(false, |prefix| prefix.ends_with('/'))
}

/// Subscription ledger entry of a mirrored signal
pub struct SubscriptionEntry {
    pub identity: SignalIdentity,

    /// Numeric id assigned by the peer while available
    pub numeric_id: Option<u64>,

    /// Local subscribers collapsed into one wire subscription
    pub ref_count: u32,

    signal: Weak<dyn MirroredSignal>,
}

impl SubscriptionEntry {
    pub(super) fn new(remote_id: String, signal: &Arc<dyn MirroredSignal>) -> Self {
        Self {
            identity: SignalIdentity::new(remote_id),
            numeric_id: None,
            ref_count: 0,
            signal: Arc::downgrade(signal),
        }
    }

    /// The mirrored signal, if it is still alive
    pub fn signal(&self) -> Option<Arc<dyn MirroredSignal>> {
        self.signal.upgrade()
    }

    pub fn is_alive(&self) -> bool {
        self.signal.strong_count() > 0
    }

    pub fn is_available(&self) -> bool {
        self.numeric_id.is_some()
    }

    /// Bind to an announced key
    pub(super) fn bind(&mut self, key: &str, numeric_id: u64) {
        self.identity.available_key = Some(key.to_string());
        self.numeric_id = Some(numeric_id);
    }

    /// Fall back to pending-by-remote-id
    pub(super) fn unbind(&mut self) {
        self.identity.available_key = None;
        self.numeric_id = None;
    }

    /// Key to use in wire commands
    pub(super) fn wire_key(&self) -> &str {
        self.identity
            .available_key
            .as_deref()
            .unwrap_or(&self.identity.remote_id)
    }
}

impl std::fmt::Debug for SubscriptionEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionEntry")
            .field("identity", &self.identity)
            .field("numeric_id", &self.numeric_id)
            .field("ref_count", &self.ref_count)
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// A signal announced by the peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailableSignal {
    pub key: String,
    pub numeric_id: u64,
    pub serialized: String,
}

/// A signal this end publishes over the connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedSignal {
    pub global_id: String,
    pub numeric_id: u64,
    /// Peer has an active subscription
    pub peer_subscribed: bool,
}
