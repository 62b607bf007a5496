//! Observer registry
//!
//! Key principles:
//! - Registration system (observers are explicit objects, removable by id)
//! - Synchronous delivery, in registration order
//! - Delivery happens after the state change the event describes
//! - No registry lock is held while an observer runs, so observers may
//!   subscribe, unsubscribe, or call back into the subsystem that notified them

use crate::foundation::collections::{HandleMap, SubscriptionId};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

type Observer<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Registry<E> {
    ids: HandleMap<SubscriptionId, ()>,
    ordered: Vec<(SubscriptionId, Observer<E>)>,
}

/// Ordered set of observers for events of type `E`
pub struct Observers<E> {
    registry: Mutex<Registry<E>>,
}

impl<E> Observers<E> {
    /// Create an empty observer set
    pub fn new() -> Self {
        Self {
            registry: Mutex::new(Registry {
                ids: HandleMap::with_key(),
                ordered: Vec::new(),
            }),
        }
    }

    /// Register an observer; it sees every event notified after this call
    pub fn subscribe<F>(&self, observer: F) -> SubscriptionId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let mut registry = self.registry.lock();
        let id = registry.ids.insert(());
        registry.ordered.push((id, Arc::new(observer)));
        id
    }

    /// Remove an observer; returns `false` if it was already gone
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut registry = self.registry.lock();
        if registry.ids.remove(id).is_none() {
            return false;
        }
        registry.ordered.retain(|(existing, _)| *existing != id);
        true
    }

    /// Number of registered observers
    pub fn len(&self) -> usize {
        self.registry.lock().ordered.len()
    }

    /// Whether no observers are registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `event` to every observer, in registration order
    pub fn notify(&self, event: &E) {
        let snapshot: Vec<Observer<E>> = self
            .registry
            .lock()
            .ordered
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();

        for observer in snapshot {
            observer(event);
        }
    }

    /// Deliver a batch of events in order
    pub fn notify_all<'a, I>(&self, events: I)
    where
        I: IntoIterator<Item = &'a E>,
        E: 'a,
    {
        for event in events {
            self.notify(event);
        }
    }
}

impl<E> Default for Observers<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for Observers<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observers").field("count", &self.len()).finish()
    }
}
