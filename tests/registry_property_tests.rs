//! Property-based tests for subscription reference counting
//!
//! Any interleaving of subscribe/unsubscribe calls must put exactly one SUBSCRIBE on the wire per 0→1 transition and one
//! UNSUBSCRIBE per 1→0 transition.

use std::sync::Arc;

use parking_lot::Mutex;
use proptest::prelude::*;
use sigstream::registry::CommandSink;
use sigstream::{Error, Message, MirroredSignal, PacketBuffer, Result, StreamingRegistry};

#[derive(Default)]
struct CountingSink {
    subscribes: Mutex<usize>,
    unsubscribes: Mutex<usize>,
}

impl CommandSink for CountingSink {
    fn send_command(&self, message: Message) -> Result<()> {
        match message {
            Message::Subscribe { .. } => *self.subscribes.lock() += 1,
            Message::Unsubscribe { .. } => *self.unsubscribes.lock() += 1,
            _ => {}
        }
        Ok(())
    }
}

struct Mirror(String);

impl MirroredSignal for Mirror {
    fn remote_id(&self) -> String {
        self.0.clone()
    }

    fn on_packet(&self, _packet: PacketBuffer) {}
}

#[derive(Debug, Clone)]
enum Op {
    Subscribe { with_domain: bool },
    Unsubscribe { with_domain: bool },
    Available,
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => any::<bool>().prop_map(|with_domain| Op::Subscribe { with_domain }),
        4 => any::<bool>().prop_map(|with_domain| Op::Unsubscribe { with_domain }),
        1 => Just(Op::Available),
    ]
}

/// Reference model: per-signal counts plus expected wire traffic
#[derive(Default)]
struct Model {
    value: u32,
    domain: u32,
    subscribes: usize,
    unsubscribes: usize,
}

proptest! {
    /// Property: wire commands match count transitions for available signals
    #[test]
    fn wire_commands_match_transitions(ops in prop::collection::vec(arb_op(), 1..200)) {
        let sink = Arc::new(CountingSink::default());
        let registry = StreamingRegistry::with_sink(1, sink.clone());

        let value: Arc<dyn MirroredSignal> = Arc::new(Mirror("dev/value".into()));
        let domain: Arc<dyn MirroredSignal> = Arc::new(Mirror("dev/time".into()));
        registry.add_signal(&value).unwrap();
        registry.add_signal(&domain).unwrap();

        let mut model = Model::default();
        let mut available = false;

        for op in ops {
            match op {
                Op::Available => {
                    if !available {
                        registry.mark_available("dev/value", 1, "").unwrap();
                        registry.mark_available("dev/time", 2, "").unwrap();
                        available = true;
                        model.subscribes += (model.value > 0) as usize + (model.domain > 0) as usize;
                    } else {
                        prop_assert!(matches!(
                            registry.mark_available("dev/value", 1, ""),
                            Err(Error::DuplicateItem(_))
                        ));
                    }
                }
                Op::Subscribe { with_domain } => {
                    let domain_id = with_domain.then_some("dev/time");
                    registry.subscribe("dev/value", domain_id).unwrap();
                    if with_domain {
                        model.domain += 1;
                        if model.domain == 1 && available {
                            model.subscribes += 1;
                        }
                    }
                    model.value += 1;
                    if model.value == 1 && available {
                        model.subscribes += 1;
                    }
                }
                Op::Unsubscribe { with_domain } => {
                    let domain_id = with_domain.then_some("dev/time");
                    let result = registry.unsubscribe("dev/value", domain_id);

                    let valid = model.value > 0 && (!with_domain || model.domain > 0);
                    if !valid {
                        prop_assert!(matches!(result, Err(Error::InvalidState(_))));
                        continue;
                    }
                    prop_assert!(result.is_ok());
                    model.value -= 1;
                    if model.value == 0 && available {
                        model.unsubscribes += 1;
                    }
                    if with_domain {
                        model.domain -= 1;
                        if model.domain == 0 && available {
                            model.unsubscribes += 1;
                        }
                    }
                }
            }

            prop_assert_eq!(registry.ref_count("dev/value"), Some(model.value));
            prop_assert_eq!(registry.ref_count("dev/time"), Some(model.domain));
            prop_assert_eq!(*sink.subscribes.lock(), model.subscribes);
            prop_assert_eq!(*sink.unsubscribes.lock(), model.unsubscribes);
        }
    }

    /// Property: repeating the same reconnection announcements changes nothing
    #[test]
    fn reconnection_is_idempotent(keys in prop::collection::hash_set("[a-z]{1,8}", 0..10)) {
        let sink = Arc::new(CountingSink::default());
        let registry = StreamingRegistry::with_sink(1, sink.clone());

        for round in 0..3 {
            registry.start_reconnection(sink.clone());
            for (i, key) in keys.iter().enumerate() {
                registry.mark_available(key, i as u64, "").unwrap();
            }
            let diff = registry.complete_reconnection().unwrap();
            if round == 0 {
                prop_assert_eq!(diff.available.len(), keys.len());
            } else {
                prop_assert!(diff.is_empty());
            }
        }

        let mut expected: Vec<String> = keys.into_iter().collect();
        expected.sort();
        prop_assert_eq!(registry.available_signals(), expected);
    }
}
