//! Event publishing/subscription abstraction.
//!
//! ## Delivery model
//!
//! - **Synchronous**: `publish()` returns after every matching handler ran.
//! - **Ordered**: handlers for the same event run in subscription order.
//! - **Isolated**: a handler that returns an error (or panics) is logged and
//!   reported in the [`PublishReport`]; the remaining handlers still run.
//!
//! Consumers that want to process events on their own thread use
//! [`EventBus::subscribe_channel`], which forwards into an mpsc channel.

use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Weak};
use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::envelope::EventEnvelope;
use crate::event::Event;

/// Error returned by a subscriber. Only used for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Subscriber callback.
pub type EventHandler<E> =
    Arc<dyn Fn(&EventEnvelope<E>) -> Result<(), HandlerError> + Send + Sync>;

/// Which events a subscriber receives.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EventFilter {
    All,
    /// Only events whose `event_type()` equals this name.
    Only(&'static str),
}

impl EventFilter {
    pub fn matches<E: Event>(&self, event: &E) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::Only(name) => event.event_type() == *name,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

/// One handler failure observed while publishing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerFailure {
    pub subscription: SubscriptionId,
    pub error: String,
}

/// Outcome of a single `publish()` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReport {
    pub event_id: Uuid,
    pub sequence_number: u64,
    /// Handlers that completed successfully.
    pub delivered: usize,
    pub failures: Vec<HandlerFailure>,
}

impl PublishReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Removes a subscription from the bus that created it.
pub(crate) trait Unsubscribe: Send + Sync {
    fn remove(&self, id: SubscriptionId);
}

/// Handle returned by `subscribe`. Dropping it does **not** unsubscribe;
/// call [`SubscriptionHandle::unsubscribe`] explicitly.
pub struct SubscriptionHandle {
    id: SubscriptionId,
    registry: Weak<dyn Unsubscribe>,
}

impl SubscriptionHandle {
    pub(crate) fn new(id: SubscriptionId, registry: Weak<dyn Unsubscribe>) -> Self {
        Self { id, registry }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Stop receiving events. A no-op if the bus is already gone.
    pub fn unsubscribe(self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}

impl core::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SubscriptionHandle").field("id", &self.id).finish()
    }
}

/// A channel-backed subscription for consumers running on their own thread.
///
/// ```ignore
/// let sub = bus.subscribe_channel(EventFilter::Only("metrics_updated"));
/// loop {
///     match sub.recv_timeout(Duration::from_secs(1)) {
///         Ok(envelope) => process(envelope),
///         Err(RecvTimeoutError::Timeout) => continue,  // check for shutdown
///         Err(RecvTimeoutError::Disconnected) => break, // unsubscribed
///     }
/// }
/// ```
#[derive(Debug)]
pub struct ChannelSubscription<E> {
    receiver: Receiver<EventEnvelope<E>>,
    handle: SubscriptionHandle,
}

impl<E> ChannelSubscription<E> {
    pub fn new(receiver: Receiver<EventEnvelope<E>>, handle: SubscriptionHandle) -> Self {
        Self { receiver, handle }
    }

    /// Block until the next event is available.
    pub fn recv(&self) -> Result<EventEnvelope<E>, mpsc::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event without blocking.
    pub fn try_recv(&self) -> Result<EventEnvelope<E>, mpsc::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for an event.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<EventEnvelope<E>, mpsc::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    pub fn unsubscribe(self) {
        self.handle.unsubscribe();
    }
}

/// In-process event bus.
///
/// Implementations must be safe to share across threads: drivers, training
/// jobs and report runs publish concurrently.
pub trait EventBus<E: Event>: Send + Sync {
    fn publish(&self, event: E) -> PublishReport;

    fn subscribe(&self, filter: EventFilter, handler: EventHandler<E>) -> SubscriptionHandle;

    /// Subscribe with a plain closure.
    fn subscribe_fn<F>(&self, filter: EventFilter, handler: F) -> SubscriptionHandle
    where
        F: Fn(&EventEnvelope<E>) -> Result<(), HandlerError> + Send + Sync + 'static,
        Self: Sized,
    {
        self.subscribe(filter, Arc::new(handler))
    }

    /// Forward matching events into an mpsc channel.
    ///
    /// A disconnected receiver turns into a handler failure on the next
    /// publish; call `unsubscribe()` to stop cleanly.
    fn subscribe_channel(&self, filter: EventFilter) -> ChannelSubscription<E> {
        let (tx, rx) = mpsc::channel::<EventEnvelope<E>>();
        let tx = std::sync::Mutex::new(tx);
        let handle = self.subscribe(
            filter,
            Arc::new(move |envelope: &EventEnvelope<E>| {
                let tx = tx
                    .lock()
                    .map_err(|_| HandlerError::new("channel sender poisoned"))?;
                tx.send(envelope.clone())
                    .map_err(|_| HandlerError::new("channel receiver dropped"))
            }),
        );
        ChannelSubscription::new(rx, handle)
    }
}

impl<E, B> EventBus<E> for Arc<B>
where
    E: Event,
    B: EventBus<E> + ?Sized,
{
    fn publish(&self, event: E) -> PublishReport {
        (**self).publish(event)
    }

    fn subscribe(&self, filter: EventFilter, handler: EventHandler<E>) -> SubscriptionHandle {
        (**self).subscribe(filter, handler)
    }

    fn subscribe_channel(&self, filter: EventFilter) -> ChannelSubscription<E> {
        (**self).subscribe_channel(filter)
    }
}
