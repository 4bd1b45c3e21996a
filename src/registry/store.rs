//! Streaming registry implementation
//!
//! One registry per connection. All operations take the registry mutex for
//! their whole critical section; wire commands are handed to the
//! connection's [`CommandSink`], which only enqueues.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::entry::{identity_matches, AvailableSignal, PublishedSignal, SubscriptionEntry};
use crate::error::{Error, Result};
use crate::protocol::message::Message;
use crate::protocol::packet::PacketBuffer;
use crate::session::SessionHandle;
use crate::signal::{MirroredSignal, Signal};

/// Outgoing half of a connection as seen by the registry
pub trait CommandSink: Send + Sync {
    /// Queue a command for the peer without blocking on I/O
    fn send_command(&self, message: Message) -> Result<()>;
}

impl CommandSink for SessionHandle {
    fn send_command(&self, message: Message) -> Result<()> {
        self.send(message)
    }
}

/// Availability changes found when a reconnection completes
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconnectionDiff {
    /// Announced after the reconnect but not before
    pub available: Vec<AvailableSignal>,
    /// Announced before the reconnect but not after
    pub unavailable: Vec<String>,
}

impl ReconnectionDiff {
    pub fn is_empty(&self) -> bool {
        self.available.is_empty() && self.unavailable.is_empty()
    }
}

#[derive(Default)]
struct RegistryState {
    sink: Option<Arc<dyn CommandSink>>,

    // Consuming side, keyed by remote id
    entries: HashMap<String, SubscriptionEntry>,
    // Remote id of the entry bound to each numeric id
    entries_by_numeric: HashMap<u64, String>,
    // Live available set, keyed by announced key
    available: HashMap<String, AvailableSignal>,
    // Set being rebuilt while reconnecting
    shadow: Option<HashMap<String, AvailableSignal>>,

    // Publishing side, keyed by global id
    published: HashMap<String, PublishedSignal>,
    published_by_numeric: HashMap<u64, String>,
    next_numeric_id: u64,
}

impl RegistryState {
    fn send(&self, message: Message) -> Result<()> {
        match &self.sink {
            Some(sink) => sink.send_command(message),
            None => Err(Error::InvalidState("registry has no connection".into())),
        }
    }

    /// Send a consuming-side command; a dead connection is recovered by the
    /// next reconnection, so failures are only logged.
    fn send_lossy(&self, message: Message) {
        let name = message.payload_type().name();
        if let Err(e) = self.send(message) {
            tracing::warn!(command = name, error = %e, "Failed to send command");
        }
    }

    fn is_claimed(&self, numeric_id: u64) -> bool {
        self.entries_by_numeric.contains_key(&numeric_id)
    }

    /// Announced signal an unbound entry should take: its exact key, else
    /// the longest matching key no other entry holds.
    fn find_available(&self, remote_id: &str) -> Option<&AvailableSignal> {
        let exact = self
            .available
            .get(remote_id)
            .filter(|a| !self.is_claimed(a.numeric_id));
        exact.or_else(|| {
            self.available
                .values()
                .filter(|a| identity_matches(remote_id, &a.key) && !self.is_claimed(a.numeric_id))
                .max_by(|a, b| a.key.len().cmp(&b.key.len()).then_with(|| b.key.cmp(&a.key)))
        })
    }

    /// Entry a newly announced key goes to: the entry named exactly `key`,
    /// else the first unbound entry it matches by suffix. An entry already
    /// bound is only ever taken over by its exact key.
    fn claimant(&self, key: &str) -> Option<String> {
        if self.entries.contains_key(key) {
            return Some(key.to_string());
        }
        self.entries
            .values()
            .filter(|e| !e.is_available() && e.identity.matches(key))
            .map(|e| &e.identity.remote_id)
            .min()
            .cloned()
    }

    fn entry_for_numeric(&self, numeric_id: u64) -> Option<&SubscriptionEntry> {
        self.entries_by_numeric
            .get(&numeric_id)
            .and_then(|remote_id| self.entries.get(remote_id))
    }

    /// Bind an entry to an announced key. A held wire subscription moves
    /// with it.
    fn bind_entry(&mut self, remote_id: &str, key: &str, numeric_id: u64) {
        let reconnecting = self.is_reconnecting();
        let Some(entry) = self.entries.get_mut(remote_id) else {
            return;
        };
        let previous = entry
            .numeric_id
            .map(|old| (old, entry.wire_key().to_string()));
        let subscribed = entry.ref_count > 0;
        entry.bind(key, numeric_id);

        if let Some((old, _)) = &previous {
            self.entries_by_numeric.remove(old);
        }
        self.entries_by_numeric
            .insert(numeric_id, remote_id.to_string());

        if !subscribed || reconnecting {
            return;
        }
        if let Some((old, old_key)) = previous {
            self.send_lossy(Message::Unsubscribe {
                numeric_id: old,
                signal_id: old_key,
            });
        }
        self.send_lossy(Message::Subscribe {
            numeric_id,
            signal_id: key.to_string(),
        });
    }

    fn unbind_entry(&mut self, remote_id: &str) {
        if let Some(entry) = self.entries.get_mut(remote_id) {
            if let Some(numeric_id) = entry.numeric_id {
                self.entries_by_numeric.remove(&numeric_id);
            }
            entry.unbind();
        }
    }

    fn remove_entry(&mut self, remote_id: &str) -> Option<SubscriptionEntry> {
        let entry = self.entries.remove(remote_id)?;
        if let Some(numeric_id) = entry.numeric_id {
            self.entries_by_numeric.remove(&numeric_id);
        }
        Some(entry)
    }

    fn is_reconnecting(&self) -> bool {
        self.shadow.is_some()
    }

    fn acquire(&mut self, remote_id: &str) {
        let reconnecting = self.is_reconnecting();
        let Some(entry) = self.entries.get_mut(remote_id) else {
            return;
        };
        entry.ref_count += 1;
        tracing::debug!(signal = %remote_id, ref_count = entry.ref_count, "Subscribe");

        if entry.ref_count != 1 || reconnecting {
            return;
        }
        if let Some(numeric_id) = entry.numeric_id {
            let message = Message::Subscribe {
                numeric_id,
                signal_id: entry.wire_key().to_string(),
            };
            self.send_lossy(message);
        }
    }

    fn release(&mut self, remote_id: &str) {
        let reconnecting = self.is_reconnecting();
        let Some(entry) = self.entries.get_mut(remote_id) else {
            return;
        };
        entry.ref_count -= 1;
        tracing::debug!(signal = %remote_id, ref_count = entry.ref_count, "Unsubscribe");

        if entry.ref_count != 0 || reconnecting {
            return;
        }
        if let Some(numeric_id) = entry.numeric_id {
            let message = Message::Unsubscribe {
                numeric_id,
                signal_id: entry.wire_key().to_string(),
            };
            self.send_lossy(message);
        }
    }
}

/// Subscription and availability ledger of one connection
pub struct StreamingRegistry {
    connection_id: u64,
    state: Mutex<RegistryState>,
}

impl StreamingRegistry {
    /// Create a registry that is not yet bound to a connection
    pub fn new(connection_id: u64) -> Self {
        Self {
            connection_id,
            state: Mutex::new(RegistryState {
                next_numeric_id: 1,
                ..Default::default()
            }),
        }
    }

    /// Create a registry sending through `sink`
    pub fn with_sink(connection_id: u64, sink: Arc<dyn CommandSink>) -> Self {
        let registry = Self::new(connection_id);
        registry.attach(sink);
        registry
    }

    /// Send future commands through `sink`
    pub fn attach(&self, sink: Arc<dyn CommandSink>) {
        self.state.lock().sink = Some(sink);
    }

    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    // ------------------------------------------------------------------
    // Consuming side
    // ------------------------------------------------------------------

    /// Track a mirrored signal; its ledger starts unsubscribed.
    pub fn add_signal(&self, signal: &Arc<dyn MirroredSignal>) -> Result<()> {
        let remote_id = signal.remote_id();
        if remote_id.is_empty() {
            return Err(Error::ArgumentNull("remote_id"));
        }

        let mut state = self.state.lock();
        if state.entries.contains_key(&remote_id) {
            return Err(Error::DuplicateItem(remote_id));
        }

        let found = state
            .find_available(&remote_id)
            .map(|a| (a.key.clone(), a.numeric_id));
        state
            .entries
            .insert(remote_id.clone(), SubscriptionEntry::new(remote_id.clone(), signal));
        if let Some((key, numeric_id)) = found {
            state.bind_entry(&remote_id, &key, numeric_id);
        }

        tracing::debug!(
            connection_id = self.connection_id,
            signal = %remote_id,
            "Mirrored signal added"
        );
        Ok(())
    }

    /// Stop tracking a mirrored signal, undoing its wire subscription
    pub fn remove_signal(&self, remote_id: &str) -> Result<()> {
        let mut state = self.state.lock();
        let entry = state
            .remove_entry(remote_id)
            .ok_or_else(|| Error::NotFound(remote_id.to_string()))?;

        if entry.ref_count > 0 && !state.is_reconnecting() {
            if let Some(numeric_id) = entry.numeric_id {
                state.send_lossy(Message::Unsubscribe {
                    numeric_id,
                    signal_id: entry.wire_key().to_string(),
                });
            }
        }

        tracing::debug!(
            connection_id = self.connection_id,
            signal = %remote_id,
            ref_count = entry.ref_count,
            "Mirrored signal removed"
        );
        Ok(())
    }

    /// Take a reference on a signal (and its domain signal first).
    ///
    /// Only the 0→1 transition of an available signal reaches the wire; a
    /// signal that is not yet available is subscribed when it appears.
    pub fn subscribe(&self, remote_id: &str, domain_id: Option<&str>) -> Result<()> {
        let mut state = self.state.lock();
        let domain = Self::check_ids(&state, remote_id, domain_id)?;

        if let Some(domain) = domain {
            state.acquire(domain);
        }
        state.acquire(remote_id);
        Ok(())
    }

    /// Drop a reference on a signal (and its domain signal after it).
    ///
    /// Fails with `InvalidState` if either count is already zero; nothing is
    /// changed in that case.
    pub fn unsubscribe(&self, remote_id: &str, domain_id: Option<&str>) -> Result<()> {
        let mut state = self.state.lock();
        let domain = Self::check_ids(&state, remote_id, domain_id)?;

        for id in std::iter::once(remote_id).chain(domain) {
            if state.entries.get(id).map_or(0, |e| e.ref_count) == 0 {
                return Err(Error::InvalidState(format!("{} is not subscribed", id)));
            }
        }

        state.release(remote_id);
        if let Some(domain) = domain {
            state.release(domain);
        }
        Ok(())
    }

    fn check_ids<'a>(
        state: &RegistryState,
        remote_id: &str,
        domain_id: Option<&'a str>,
    ) -> Result<Option<&'a str>> {
        if remote_id.is_empty() {
            return Err(Error::ArgumentNull("remote_id"));
        }
        let domain = domain_id.filter(|d| !d.is_empty());
        if domain == Some(remote_id) {
            return Err(Error::InvalidParameter(format!(
                "{} cannot be its own domain signal",
                remote_id
            )));
        }
        for id in std::iter::once(remote_id).chain(domain) {
            if !state.entries.contains_key(id) {
                return Err(Error::NotFound(id.to_string()));
            }
        }
        Ok(domain)
    }

    /// The peer announced a signal.
    ///
    /// While reconnecting the announcement only goes to the shadow set.
    pub fn mark_available(&self, key: &str, numeric_id: u64, serialized: impl Into<String>) -> Result<()> {
        let available = AvailableSignal {
            key: key.to_string(),
            numeric_id,
            serialized: serialized.into(),
        };

        let mut state = self.state.lock();
        if let Some(shadow) = state.shadow.as_mut() {
            if shadow.contains_key(key) {
                return Err(Error::DuplicateItem(key.to_string()));
            }
            shadow.insert(key.to_string(), available);
            return Ok(());
        }

        if state.available.contains_key(key) {
            return Err(Error::DuplicateItem(key.to_string()));
        }
        state.available.insert(key.to_string(), available);

        if let Some(remote_id) = state.claimant(key) {
            state.bind_entry(&remote_id, key, numeric_id);
        }

        tracing::debug!(
            connection_id = self.connection_id,
            signal = %key,
            numeric_id = numeric_id,
            "Signal available"
        );
        Ok(())
    }

    /// The peer withdrew a signal; its entry falls back to pending.
    pub fn mark_unavailable(&self, key: &str) -> Result<()> {
        let mut state = self.state.lock();
        if state.is_reconnecting() {
            return Err(Error::InvalidState(format!(
                "cannot remove {} while reconnecting",
                key
            )));
        }
        let available = state
            .available
            .remove(key)
            .ok_or_else(|| Error::NotFound(key.to_string()))?;
        let bound = state.entries_by_numeric.get(&available.numeric_id).cloned();
        if let Some(remote_id) = bound {
            state.unbind_entry(&remote_id);
        }

        tracing::debug!(connection_id = self.connection_id, signal = %key, "Signal unavailable");
        Ok(())
    }

    /// Begin collecting announcements from a fresh connection.
    ///
    /// Calling it again restarts the collection.
    pub fn start_reconnection(&self, sink: Arc<dyn CommandSink>) {
        let mut state = self.state.lock();
        state.sink = Some(sink);
        state.shadow = Some(HashMap::new());
        tracing::debug!(connection_id = self.connection_id, "Reconnection started");
    }

    /// Reconcile the announcements collected since
    /// [`start_reconnection`](Self::start_reconnection) with the live set.
    ///
    /// Every entry still holding references is subscribed again on the new
    /// connection.
    pub fn complete_reconnection(&self) -> Result<ReconnectionDiff> {
        let mut state = self.state.lock();
        let shadow = state
            .shadow
            .take()
            .ok_or_else(|| Error::InvalidState("no reconnection in progress".into()))?;

        let mut diff = ReconnectionDiff::default();
        for key in state.available.keys() {
            if !shadow.contains_key(key) {
                diff.unavailable.push(key.clone());
            }
        }
        for (key, available) in &shadow {
            if !state.available.contains_key(key) {
                diff.available.push(available.clone());
            }
        }
        diff.unavailable.sort();
        diff.available.sort_by(|a, b| a.key.cmp(&b.key));

        // The new connection holds no subscriptions, so every referenced
        // entry that binds again is subscribed again.
        let mut remote_ids: Vec<String> = state.entries.keys().cloned().collect();
        remote_ids.sort();
        for remote_id in &remote_ids {
            state.unbind_entry(remote_id);
        }
        state.available = shadow;

        // Exact keys first, so a suffix match never takes another entry's own key
        for remote_id in &remote_ids {
            let exact = state.available.get(remote_id).map(|a| a.numeric_id);
            if let Some(numeric_id) = exact {
                state.bind_entry(remote_id, remote_id, numeric_id);
            }
        }
        for remote_id in &remote_ids {
            if state.entries.get(remote_id).map_or(true, |e| e.is_available()) {
                continue;
            }
            let found = state
                .find_available(remote_id)
                .map(|a| (a.key.clone(), a.numeric_id));
            if let Some((key, numeric_id)) = found {
                state.bind_entry(remote_id, &key, numeric_id);
            }
        }

        tracing::info!(
            connection_id = self.connection_id,
            available = diff.available.len(),
            unavailable = diff.unavailable.len(),
            "Reconnection completed"
        );
        Ok(diff)
    }

    /// Map a subscription acknowledgement back to the remote id
    pub fn handle_ack(&self, numeric_id: u64, subscribed: bool) -> Result<String> {
        let state = self.state.lock();
        let entry = state
            .entry_for_numeric(numeric_id)
            .ok_or_else(|| Error::NotFound(format!("numeric id {}", numeric_id)))?;

        tracing::debug!(
            connection_id = self.connection_id,
            signal = %entry.identity.remote_id,
            subscribed = subscribed,
            "Subscription acknowledged"
        );
        Ok(entry.identity.remote_id.clone())
    }

    /// Hand a received packet to its mirrored signal.
    ///
    /// The packet is given back if no live signal claims its id; entries
    /// whose signal is gone are dropped.
    pub fn route_packet(&self, packet: PacketBuffer) -> Option<PacketBuffer> {
        let numeric_id = packet.signal_id();
        let target = {
            let mut state = self.state.lock();
            let found = state
                .entry_for_numeric(numeric_id)
                .map(|e| (e.identity.remote_id.clone(), e.signal()));
            match found {
                Some((_, Some(signal))) => Some(signal),
                Some((remote_id, None)) => {
                    tracing::debug!(signal = %remote_id, "Dropping entry of destroyed signal");
                    state.remove_entry(&remote_id);
                    None
                }
                None => None,
            }
        };

        match target {
            Some(signal) => {
                signal.on_packet(packet);
                None
            }
            None => Some(packet),
        }
    }

    /// Announced key of a numeric id
    pub fn available_key(&self, numeric_id: u64) -> Option<String> {
        self.state
            .lock()
            .available
            .values()
            .find(|a| a.numeric_id == numeric_id)
            .map(|a| a.key.clone())
    }

    /// Drop entries whose mirrored signal no longer exists
    pub fn prune(&self) -> usize {
        let mut state = self.state.lock();
        let dead: Vec<String> = state
            .entries
            .values()
            .filter(|e| !e.is_alive())
            .map(|e| e.identity.remote_id.clone())
            .collect();
        for remote_id in &dead {
            state.remove_entry(remote_id);
        }
        dead.len()
    }

    pub fn is_reconnecting(&self) -> bool {
        self.state.lock().is_reconnecting()
    }

    /// Whether the peer currently announces `key`
    pub fn is_available(&self, key: &str) -> bool {
        self.state.lock().available.contains_key(key)
    }

    /// Keys currently announced by the peer, sorted
    pub fn available_signals(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.state.lock().available.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Reference count of a mirrored signal
    pub fn ref_count(&self, remote_id: &str) -> Option<u32> {
        self.state.lock().entries.get(remote_id).map(|e| e.ref_count)
    }

    // ------------------------------------------------------------------
    // Publishing side
    // ------------------------------------------------------------------

    /// Announce a signal to the peer and assign its numeric id
    pub fn register_signal(&self, signal: &dyn Signal) -> Result<u64> {
        let global_id = signal.global_id();
        if global_id.is_empty() {
            return Err(Error::ArgumentNull("global_id"));
        }

        let mut state = self.state.lock();
        if state.published.contains_key(&global_id) {
            return Err(Error::DuplicateItem(global_id));
        }

        let numeric_id = state.next_numeric_id;
        state.send(Message::SignalAvailable {
            numeric_id,
            signal_id: global_id.clone(),
            serialized: signal.serialize(),
        })?;

        state.next_numeric_id += 1;
        state.published_by_numeric.insert(numeric_id, global_id.clone());
        state.published.insert(
            global_id.clone(),
            PublishedSignal {
                global_id: global_id.clone(),
                numeric_id,
                peer_subscribed: false,
            },
        );

        tracing::debug!(
            connection_id = self.connection_id,
            signal = %global_id,
            numeric_id = numeric_id,
            "Signal registered"
        );
        Ok(numeric_id)
    }

    /// Withdraw a published signal
    pub fn unregister_signal(&self, global_id: &str) -> Result<()> {
        let mut state = self.state.lock();
        let published = state
            .published
            .remove(global_id)
            .ok_or_else(|| Error::NotFound(global_id.to_string()))?;
        state.published_by_numeric.remove(&published.numeric_id);

        tracing::debug!(
            connection_id = self.connection_id,
            signal = %global_id,
            "Signal unregistered"
        );
        state.send(Message::SignalUnavailable {
            numeric_id: published.numeric_id,
            signal_id: published.global_id,
        })
    }

    /// The peer subscribed one of our signals; acknowledges it
    pub fn handle_peer_subscribe(&self, numeric_id: u64) -> Result<String> {
        self.set_peer_subscribed(numeric_id, true)
    }

    /// The peer unsubscribed one of our signals; acknowledges it
    pub fn handle_peer_unsubscribe(&self, numeric_id: u64) -> Result<String> {
        self.set_peer_subscribed(numeric_id, false)
    }

    fn set_peer_subscribed(&self, numeric_id: u64, subscribed: bool) -> Result<String> {
        let mut state = self.state.lock();
        let global_id = state
            .published_by_numeric
            .get(&numeric_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("numeric id {}", numeric_id)))?;
        if let Some(published) = state.published.get_mut(&global_id) {
            published.peer_subscribed = subscribed;
        }

        tracing::debug!(
            connection_id = self.connection_id,
            signal = %global_id,
            subscribed = subscribed,
            "Peer subscription changed"
        );
        let ack = if subscribed {
            Message::SubscribeAck { numeric_id }
        } else {
            Message::UnsubscribeAck { numeric_id }
        };
        state.send(ack)?;
        Ok(global_id)
    }

    pub fn is_peer_subscribed(&self, global_id: &str) -> bool {
        self.state
            .lock()
            .published
            .get(global_id)
            .map_or(false, |p| p.peer_subscribed)
    }

    pub fn numeric_id_of(&self, global_id: &str) -> Option<u64> {
        self.state.lock().published.get(global_id).map(|p| p.numeric_id)
    }

    /// Numeric id of a published signal, if the peer subscribed it
    pub fn peer_subscription(&self, global_id: &str) -> Option<u64> {
        self.state
            .lock()
            .published
            .get(global_id)
            .filter(|p| p.peer_subscribed)
            .map(|p| p.numeric_id)
    }
}

impl std::fmt::Debug for StreamingRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("StreamingRegistry")
            .field("connection_id", &self.connection_id)
            .field("entries", &state.entries.len())
            .field("available", &state.available.len())
            .field("published", &state.published.len())
            .field("reconnecting", &state.is_reconnecting())
            .finish()
    }
}
