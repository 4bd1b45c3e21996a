//! Mirrored signal subscription state machine
//!
//! Every transition compares the effective source before and after the
//! change and issues at most one unsubscribe (old source) and one
//! subscribe (new source). Failures are logged and never roll back local
//! state; the registry resubscribes once the signal becomes available.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::source::StreamingSource;
use crate::error::{Error, Result};

/// Outcome of a state transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionStatus {
    /// State changed
    Applied,
    /// Already in the requested state
    Ignored,
}

struct SubscriptionState {
    listened: bool,
    streamed: bool,
    sources: Vec<(String, Weak<dyn StreamingSource>)>,
    active: Option<String>,
}

impl SubscriptionState {
    /// Source the signal should currently be subscribed through
    fn effective_source(&self) -> Option<(String, Arc<dyn StreamingSource>)> {
        if !(self.listened && self.streamed) {
            return None;
        }
        let active = self.active.as_ref()?;
        self.sources
            .iter()
            .find(|(id, _)| id == active)
            .and_then(|(id, weak)| weak.upgrade().map(|source| (id.clone(), source)))
    }

    fn has_source(&self, id: &str) -> bool {
        self.sources.iter().any(|(source_id, _)| source_id == id)
    }
}

/// Subscription state of one mirrored signal
pub struct MirroredSignalSubscription {
    remote_id: String,
    domain_id: Option<String>,
    state: Mutex<SubscriptionState>,
}

impl MirroredSignalSubscription {
    /// New subscription: not listened, streamed, no sources
    pub fn new(remote_id: impl Into<String>) -> Self {
        Self {
            remote_id: remote_id.into(),
            domain_id: None,
            state: Mutex::new(SubscriptionState {
                listened: false,
                streamed: true,
                sources: Vec::new(),
                active: None,
            }),
        }
    }

    /// Subscribe the domain signal along with this one
    pub fn with_domain(mut self, domain_id: impl Into<String>) -> Self {
        self.domain_id = Some(domain_id.into());
        self
    }

    pub fn remote_id(&self) -> &str {
        &self.remote_id
    }

    pub fn domain_id(&self) -> Option<&str> {
        self.domain_id.as_deref()
    }

    pub fn is_listened(&self) -> bool {
        self.state.lock().listened
    }

    pub fn is_streamed(&self) -> bool {
        self.state.lock().streamed
    }

    pub fn active_source(&self) -> Option<String> {
        self.state.lock().active.clone()
    }

    /// Whether the signal should currently be subscribed
    pub fn is_subscribed(&self) -> bool {
        self.state.lock().effective_source().is_some()
    }

    /// Connection ids the signal is reachable through, in insertion order
    pub fn streaming_sources(&self) -> Vec<String> {
        self.state
            .lock()
            .sources
            .iter()
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Register a source the signal is reachable through
    pub fn add_streaming_source(&self, source: &Arc<dyn StreamingSource>) -> Result<()> {
        let id = source.connection_id();
        let mut state = self.state.lock();
        if state.has_source(&id) {
            return Err(Error::DuplicateItem(id));
        }
        tracing::debug!(signal = %self.remote_id, source = %id, "Streaming source added");
        state.sources.push((id, Arc::downgrade(source)));
        Ok(())
    }

    /// Stream through `id` from now on
    pub fn set_active_streaming_source(&self, id: &str) -> Result<TransitionStatus> {
        let mut state = self.state.lock();
        if state.active.as_deref() == Some(id) {
            return Ok(TransitionStatus::Ignored);
        }
        if !state.has_source(id) {
            return Err(Error::NotFound(id.to_string()));
        }

        self.transition(&mut state, |s| s.active = Some(id.to_string()));
        tracing::info!(signal = %self.remote_id, source = %id, "Active streaming source set");
        Ok(TransitionStatus::Applied)
    }

    /// Local consumers appeared (`true`) or all went away (`false`)
    pub fn on_listened_changed(&self, listened: bool) -> TransitionStatus {
        let mut state = self.state.lock();
        if state.listened == listened {
            return TransitionStatus::Ignored;
        }
        self.transition(&mut state, |s| s.listened = listened);
        TransitionStatus::Applied
    }

    /// Enable or disable streaming of the signal
    pub fn set_streamed(&self, streamed: bool) -> TransitionStatus {
        let mut state = self.state.lock();
        if state.streamed == streamed {
            return TransitionStatus::Ignored;
        }
        self.transition(&mut state, |s| s.streamed = streamed);
        TransitionStatus::Applied
    }

    /// Forget a source, unsubscribing first if it was streaming
    pub fn remove_streaming_source(&self, id: &str) -> Result<TransitionStatus> {
        let mut state = self.state.lock();
        if !state.has_source(id) {
            return Err(Error::NotFound(id.to_string()));
        }

        self.transition(&mut state, |s| {
            s.sources.retain(|(source_id, _)| source_id != id);
            if s.active.as_deref() == Some(id) {
                s.active = None;
            }
        });
        tracing::debug!(signal = %self.remote_id, source = %id, "Streaming source removed");
        Ok(TransitionStatus::Applied)
    }

    /// Clear the active source, unsubscribing first if it was streaming
    pub fn deactivate_streaming(&self) -> TransitionStatus {
        let mut state = self.state.lock();
        if state.active.is_none() {
            return TransitionStatus::Ignored;
        }
        self.transition(&mut state, |s| s.active = None);
        TransitionStatus::Applied
    }

    fn transition(&self, state: &mut SubscriptionState, change: impl FnOnce(&mut SubscriptionState)) {
        let before = state.effective_source();
        change(state);
        let after = state.effective_source();

        let same = match (&before, &after) {
            (Some((old, _)), Some((new, _))) => old == new,
            (None, None) => true,
            _ => false,
        };
        if same {
            return;
        }

        if let Some((id, source)) = before {
            self.unsubscribe_through(&id, source.as_ref());
        }
        if let Some((id, source)) = after {
            self.subscribe_through(&id, source.as_ref());
        }
    }

    fn subscribe_through(&self, id: &str, source: &dyn StreamingSource) {
        match source.subscribe(&self.remote_id, self.domain_id.as_deref()) {
            Ok(()) => tracing::debug!(signal = %self.remote_id, source = %id, "Subscribed"),
            Err(e) => tracing::warn!(
                signal = %self.remote_id,
                source = %id,
                error = %e,
                "Failed to subscribe"
            ),
        }
    }

    fn unsubscribe_through(&self, id: &str, source: &dyn StreamingSource) {
        match source.unsubscribe(&self.remote_id, self.domain_id.as_deref()) {
            Ok(()) => tracing::debug!(signal = %self.remote_id, source = %id, "Unsubscribed"),
            Err(e) => tracing::warn!(
                signal = %self.remote_id,
                source = %id,
                error = %e,
                "Failed to unsubscribe"
            ),
        }
    }
}

impl Drop for MirroredSignalSubscription {
    fn drop(&mut self) {
        let effective = self.state.get_mut().effective_source();
        if let Some((id, source)) = effective {
            self.unsubscribe_through(&id, source.as_ref());
        }
    }
}

impl std::fmt::Debug for MirroredSignalSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MirroredSignalSubscription")
            .field("remote_id", &self.remote_id)
            .field("listened", &state.listened)
            .field("streamed", &state.streamed)
            .field("active", &state.active)
            .field("sources", &state.sources.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Subscribe(String),
        Unsubscribe(String),
    }

    struct FakeSource {
        id: String,
        fail: bool,
        calls: Mutex<Vec<Call>>,
    }

    impl FakeSource {
        fn new(id: &str) -> Arc<Self> {
            Arc::new(Self {
                id: id.into(),
                fail: false,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn failing(id: &str) -> Arc<Self> {
            Arc::new(Self {
                id: id.into(),
                fail: true,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().clone()
        }
    }

    impl StreamingSource for FakeSource {
        fn connection_id(&self) -> String {
            self.id.clone()
        }

        fn subscribe(&self, remote_id: &str, _domain_id: Option<&str>) -> Result<()> {
            self.calls.lock().push(Call::Subscribe(remote_id.into()));
            if self.fail {
                return Err(Error::NotFound(remote_id.into()));
            }
            Ok(())
        }

        fn unsubscribe(&self, remote_id: &str, _domain_id: Option<&str>) -> Result<()> {
            self.calls.lock().push(Call::Unsubscribe(remote_id.into()));
            Ok(())
        }
    }

    fn with_source(id: &str) -> (MirroredSignalSubscription, Arc<FakeSource>, Arc<dyn StreamingSource>) {
        let subscription = MirroredSignalSubscription::new("dev/sig");
        let fake = FakeSource::new(id);
        let source: Arc<dyn StreamingSource> = fake.clone();
        subscription.add_streaming_source(&source).unwrap();
        (subscription, fake, source)
    }

    #[test]
    fn test_subscribes_when_listened_and_active() {
        let (subscription, fake, _source) = with_source("conn1");

        subscription.set_active_streaming_source("conn1").unwrap();
        assert!(fake.calls().is_empty());

        assert_eq!(subscription.on_listened_changed(true), TransitionStatus::Applied);
        assert_eq!(fake.calls(), vec![Call::Subscribe("dev/sig".into())]);
        assert!(subscription.is_subscribed());

        assert_eq!(subscription.on_listened_changed(true), TransitionStatus::Ignored);
        assert_eq!(fake.calls().len(), 1);

        subscription.on_listened_changed(false);
        assert_eq!(fake.calls()[1], Call::Unsubscribe("dev/sig".into()));
    }

    #[test]
    fn test_streamed_gates_subscription() {
        let (subscription, fake, _source) = with_source("conn1");
        subscription.set_active_streaming_source("conn1").unwrap();

        assert_eq!(subscription.set_streamed(true), TransitionStatus::Ignored);
        subscription.set_streamed(false);
        subscription.on_listened_changed(true);
        assert!(fake.calls().is_empty());

        subscription.set_streamed(true);
        assert_eq!(fake.calls(), vec![Call::Subscribe("dev/sig".into())]);
    }

    #[test]
    fn test_switching_active_source() {
        let (subscription, first, _first_source) = with_source("conn1");
        let second = FakeSource::new("conn2");
        let second_source: Arc<dyn StreamingSource> = second.clone();
        subscription.add_streaming_source(&second_source).unwrap();

        subscription.on_listened_changed(true);
        subscription.set_active_streaming_source("conn1").unwrap();
        assert_eq!(
            subscription.set_active_streaming_source("conn1").unwrap(),
            TransitionStatus::Ignored
        );

        subscription.set_active_streaming_source("conn2").unwrap();
        assert_eq!(
            first.calls(),
            vec![
                Call::Subscribe("dev/sig".into()),
                Call::Unsubscribe("dev/sig".into())
            ]
        );
        assert_eq!(second.calls(), vec![Call::Subscribe("dev/sig".into())]);
        assert_eq!(subscription.active_source().as_deref(), Some("conn2"));
    }

    #[test]
    fn test_unknown_and_duplicate_sources() {
        let (subscription, _fake, source) = with_source("conn1");
        assert!(matches!(
            subscription.add_streaming_source(&source),
            Err(Error::DuplicateItem(_))
        ));
        assert!(matches!(
            subscription.set_active_streaming_source("nope"),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            subscription.remove_streaming_source("nope"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_remove_active_source_unsubscribes() {
        let (subscription, fake, _source) = with_source("conn1");
        subscription.set_active_streaming_source("conn1").unwrap();
        subscription.on_listened_changed(true);

        subscription.remove_streaming_source("conn1").unwrap();
        assert_eq!(fake.calls()[1], Call::Unsubscribe("dev/sig".into()));
        assert_eq!(subscription.active_source(), None);
        assert!(subscription.streaming_sources().is_empty());
    }

    #[test]
    fn test_deactivate_streaming() {
        let (subscription, fake, _source) = with_source("conn1");
        assert_eq!(subscription.deactivate_streaming(), TransitionStatus::Ignored);

        subscription.set_active_streaming_source("conn1").unwrap();
        subscription.on_listened_changed(true);
        assert_eq!(subscription.deactivate_streaming(), TransitionStatus::Applied);
        assert_eq!(fake.calls().len(), 2);
        assert!(!subscription.is_subscribed());
        assert!(subscription.is_listened());
    }

    #[test]
    fn test_failed_subscribe_keeps_state() {
        let subscription = MirroredSignalSubscription::new("dev/sig");
        let fake = FakeSource::failing("conn1");
        let source: Arc<dyn StreamingSource> = fake.clone();
        subscription.add_streaming_source(&source).unwrap();
        subscription.set_active_streaming_source("conn1").unwrap();

        assert_eq!(subscription.on_listened_changed(true), TransitionStatus::Applied);
        assert!(subscription.is_listened());
        assert!(subscription.is_subscribed());
        assert_eq!(fake.calls().len(), 1);
    }

    #[test]
    fn test_drop_unsubscribes_effective_source() {
        let (subscription, fake, _source) = with_source("conn1");
        subscription.set_active_streaming_source("conn1").unwrap();
        subscription.on_listened_changed(true);

        drop(subscription);
        assert_eq!(fake.calls().last(), Some(&Call::Unsubscribe("dev/sig".into())));
    }

    #[test]
    fn test_dead_source_is_not_called() {
        let (subscription, fake, source) = with_source("conn1");
        subscription.set_active_streaming_source("conn1").unwrap();
        drop(source);
        drop(fake);

        subscription.on_listened_changed(true);
        assert!(!subscription.is_subscribed());
    }

    #[test]
    fn test_domain_is_forwarded() {
        struct DomainRecorder(Mutex<Option<String>>);
        impl StreamingSource for DomainRecorder {
            fn connection_id(&self) -> String {
                "conn".into()
            }
            fn subscribe(&self, _remote_id: &str, domain_id: Option<&str>) -> Result<()> {
                *self.0.lock() = domain_id.map(str::to_string);
                Ok(())
            }
            fn unsubscribe(&self, _remote_id: &str, _domain_id: Option<&str>) -> Result<()> {
                Ok(())
            }
        }

        let recorder = Arc::new(DomainRecorder(Mutex::new(None)));
        let source: Arc<dyn StreamingSource> = recorder.clone();
        let subscription = MirroredSignalSubscription::new("dev/value").with_domain("dev/time");
        subscription.add_streaming_source(&source).unwrap();
        subscription.set_active_streaming_source("conn").unwrap();
        subscription.on_listened_changed(true);

        assert_eq!(recorder.0.lock().as_deref(), Some("dev/time"));
    }
}
