use std::{
    collections::HashMap,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{Arc, PoisonError, RwLock},
};

use tracing::warn;
use uuid::Uuid;

use feed_core::{DomainEvent, EventKind, FeedError};

/// Registration token returned by [`ConsumerRegistry::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConsumerId(Uuid);

type ConsumerFn = Arc<dyn Fn(&DomainEvent) -> Result<(), FeedError> + Send + Sync>;

struct RegisteredConsumer {
    id: ConsumerId,
    consumer: ConsumerFn,
}

/// Per-event-kind consumer lists with ordered, isolated dispatch.
///
/// Consumers for one kind are invoked synchronously in registration order.
/// A consumer that returns an error or panics is logged and skipped; later
/// consumers still run and the stream that produced the event is unaffected.
#[derive(Default)]
pub struct ConsumerRegistry {
    entries: RwLock<HashMap<EventKind, Vec<RegisteredConsumer>>>,
}

impl ConsumerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a consumer for `kind` and return its registration token.
    pub fn register<F>(&self, kind: EventKind, consumer: F) -> ConsumerId
    where
        F: Fn(&DomainEvent) -> Result<(), FeedError> + Send + Sync + 'static,
    {
        let id = ConsumerId(Uuid::new_v4());
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(kind)
            .or_default()
            .push(RegisteredConsumer {
                id,
                consumer: Arc::new(consumer),
            });
        id
    }

    /// Remove the consumer registered under `id` for `kind`.
    ///
    /// Returns whether a registration was actually removed.
    pub fn unregister(&self, kind: EventKind, id: ConsumerId) -> bool {
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(consumers) = entries.get_mut(&kind) else {
            return false;
        };
        let before = consumers.len();
        consumers.retain(|entry| entry.id != id);
        consumers.len() != before
    }

    /// Deliver `event` to every consumer registered for its kind, in
    /// registration order.
    pub fn dispatch(&self, event: &DomainEvent) {
        // Snapshot outside the lock so a consumer may register/unregister
        // re-entrantly without deadlocking.
        let consumers: Vec<(ConsumerId, ConsumerFn)> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&event.kind())
            .map(|entries| {
                entries
                    .iter()
                    .map(|entry| (entry.id, entry.consumer.clone()))
                    .collect()
            })
            .unwrap_or_default();

        for (id, consumer) in consumers {
            match catch_unwind(AssertUnwindSafe(|| consumer(event))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    warn!(consumer = ?id, kind = ?event.kind(), %err, "consumer failed");
                }
                Err(_) => {
                    warn!(consumer = ?id, kind = ?event.kind(), "consumer panicked");
                }
            }
        }
    }
}
