//! In-memory event bus.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::bus::{
    EventBus, EventFilter, EventHandler, HandlerError, HandlerFailure, PublishReport,
    SubscriptionHandle, SubscriptionId, Unsubscribe,
};
use crate::envelope::EventEnvelope;
use crate::event::Event;

struct Subscriber<E> {
    id: SubscriptionId,
    filter: EventFilter,
    handler: EventHandler<E>,
}

impl<E> Clone for Subscriber<E> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            filter: self.filter,
            handler: self.handler.clone(),
        }
    }
}

struct Registry<E> {
    subscribers: Mutex<Vec<Subscriber<E>>>,
}

impl<E: Event> Unsubscribe for Registry<E> {
    fn remove(&self, id: SubscriptionId) {
        let mut subs = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subs.retain(|s| s.id != id);
    }
}

/// In-memory pub/sub bus.
///
/// - No IO
/// - Synchronous fan-out in subscription order
/// - The subscriber list is copied before delivery, so handlers may publish,
///   subscribe or unsubscribe without deadlocking the bus
pub struct InMemoryEventBus<E> {
    registry: Arc<Registry<E>>,
    next_subscription: AtomicU64,
    next_sequence: AtomicU64,
}

impl<E: Event> InMemoryEventBus<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl<E: Event> Default for InMemoryEventBus<E> {
    fn default() -> Self {
        Self {
            registry: Arc::new(Registry {
                subscribers: Mutex::new(Vec::new()),
            }),
            next_subscription: AtomicU64::new(1),
            next_sequence: AtomicU64::new(1),
        }
    }
}

impl<E> core::fmt::Debug for InMemoryEventBus<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InMemoryEventBus")
            .field("next_sequence", &self.next_sequence)
            .finish_non_exhaustive()
    }
}

impl<E: Event> EventBus<E> for InMemoryEventBus<E> {
    fn publish(&self, event: E) -> PublishReport {
        let event_type = event.event_type();
        let matching: Vec<Subscriber<E>> = {
            let subs = self
                .registry
                .subscribers
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            subs.iter()
                .filter(|s| s.filter.matches(&event))
                .cloned()
                .collect()
        };

        let sequence_number = self.next_sequence.fetch_add(1, Ordering::SeqCst);
        let envelope = EventEnvelope::new(Uuid::now_v7(), sequence_number, Utc::now(), event);

        let mut delivered = 0;
        let mut failures = Vec::new();
        for sub in matching {
            let outcome = catch_unwind(AssertUnwindSafe(|| (sub.handler)(&envelope)))
                .unwrap_or_else(|panic| Err(HandlerError::new(panic_message(&panic))));

            match outcome {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(
                        event = event_type,
                        subscription = sub.id.0,
                        error = %e,
                        "event handler failed"
                    );
                    failures.push(HandlerFailure {
                        subscription: sub.id,
                        error: e.0,
                    });
                }
            }
        }

        debug!(
            event = event_type,
            sequence = sequence_number,
            delivered,
            failed = failures.len(),
            "event published"
        );

        PublishReport {
            event_id: envelope.event_id(),
            sequence_number,
            delivered,
            failures,
        }
    }

    fn subscribe(&self, filter: EventFilter, handler: EventHandler<E>) -> SubscriptionHandle {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::SeqCst));
        self.registry
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Subscriber {
                id,
                filter,
                handler,
            });

        let registry: Arc<dyn Unsubscribe> = self.registry.clone();
        let weak: Weak<dyn Unsubscribe> = Arc::downgrade(&registry);
        SubscriptionHandle::new(id, weak)
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("handler panicked: {s}")
    } else {
        "handler panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    enum Ping {
        A(u32),
        B,
    }

    impl Event for Ping {
        fn event_type(&self) -> &'static str {
            match self {
                Ping::A(_) => "ping.a",
                Ping::B => "ping.b",
            }
        }

        fn version(&self) -> u32 {
            1
        }

        fn occurred_at(&self) -> DateTime<Utc> {
            DateTime::<Utc>::UNIX_EPOCH
        }
    }

    #[test]
    fn delivers_in_subscription_order() {
        let bus = InMemoryEventBus::<Ping>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let seen = seen.clone();
            bus.subscribe_fn(EventFilter::All, move |_| {
                seen.lock().unwrap().push(tag);
                Ok(())
            });
        }

        let report = bus.publish(Ping::A(1));
        assert_eq!(report.delivered, 3);
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn failing_and_panicking_handlers_do_not_block_later_ones() {
        let bus = InMemoryEventBus::<Ping>::new();
        let reached = Arc::new(Mutex::new(0));

        bus.subscribe_fn(EventFilter::All, |_| Err(HandlerError::new("boom")));
        bus.subscribe_fn(EventFilter::All, |_| panic!("kaboom"));
        {
            let reached = reached.clone();
            bus.subscribe_fn(EventFilter::All, move |_| {
                *reached.lock().unwrap() += 1;
                Ok(())
            });
        }

        let report = bus.publish(Ping::B);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failures.len(), 2);
        assert!(report.failures[1].error.contains("kaboom"));
        assert_eq!(*reached.lock().unwrap(), 1);
    }

    #[test]
    fn filters_by_event_type() {
        let bus = InMemoryEventBus::<Ping>::new();
        let count = Arc::new(Mutex::new(0));
        {
            let count = count.clone();
            bus.subscribe_fn(EventFilter::Only("ping.a"), move |_| {
                *count.lock().unwrap() += 1;
                Ok(())
            });
        }

        bus.publish(Ping::B);
        bus.publish(Ping::A(7));
        assert_eq!(*count.lock().unwrap(), 1);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = InMemoryEventBus::<Ping>::new();
        let handle = bus.subscribe_fn(EventFilter::All, |_| Ok(()));
        assert_eq!(bus.subscriber_count(), 1);

        handle.unsubscribe();
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(bus.publish(Ping::B).delivered, 0);
    }

    #[test]
    fn channel_subscription_receives_envelopes_in_sequence() {
        let bus = InMemoryEventBus::<Ping>::new();
        let sub = bus.subscribe_channel(EventFilter::All);

        bus.publish(Ping::A(1));
        bus.publish(Ping::A(2));

        let first = sub.try_recv().unwrap();
        let second = sub.try_recv().unwrap();
        assert_eq!(first.payload(), &Ping::A(1));
        assert!(second.sequence_number() > first.sequence_number());
    }

    #[test]
    fn handlers_may_publish_reentrantly() {
        let bus = Arc::new(InMemoryEventBus::<Ping>::new());
        let inner = bus.clone();
        bus.subscribe_fn(EventFilter::Only("ping.a"), move |_| {
            inner.publish(Ping::B);
            Ok(())
        });

        let report = bus.publish(Ping::A(1));
        assert!(report.is_clean());
    }
}
