//! Cancellation handle for recurrent callbacks

use crate::foundation::collections::{CallId, HandleMap};
use crate::time_wheel::record::Recurrent;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};

pub(crate) type RecurrentList = Mutex<HandleMap<CallId, Recurrent>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum HandleState {
    Live = 0,
    Disposed = 1,
    Leaked = 2,
}

impl HandleState {
    pub(crate) fn load(state: &AtomicU8) -> Self {
        match state.load(Ordering::Acquire) {
            0 => Self::Live,
            1 => Self::Disposed,
            _ => Self::Leaked,
        }
    }
}

/// Owning handle to a `repeat_every` callback
///
/// The callback keeps firing until [`dispose`](Self::dispose) is called. A
/// handle dropped without being disposed is a logic error: the next tick
/// removes the record and reports [`CallbackFault::LeakedHandle`].
///
/// [`CallbackFault::LeakedHandle`]: crate::time_wheel::CallbackFault::LeakedHandle
#[derive(Debug)]
#[must_use = "dropping a recurrent handle without disposing it is reported as a leak"]
pub struct RecurrentHandle {
    id: CallId,
    state: Arc<AtomicU8>,
    list: Weak<RecurrentList>,
}

impl RecurrentHandle {
    pub(crate) fn new(id: CallId, state: Arc<AtomicU8>, list: Weak<RecurrentList>) -> Self {
        Self { id, state, list }
    }

    /// Record key
    pub const fn id(&self) -> CallId {
        self.id
    }

    /// Whether the record is still scheduled
    pub fn is_scheduled(&self) -> bool {
        self.list
            .upgrade()
            .is_some_and(|list| list.lock().contains_key(self.id))
    }

    /// Cancel the callback; returns whether it was still scheduled
    ///
    /// An invocation already running completes; none starts afterwards.
    pub fn dispose(self) -> bool {
        self.state.store(HandleState::Disposed as u8, Ordering::Release);
        self.list
            .upgrade()
            .is_some_and(|list| list.lock().remove(self.id).is_some())
    }
}

impl Drop for RecurrentHandle {
    fn drop(&mut self) {
        let leaked = self
            .state
            .compare_exchange(
                HandleState::Live as u8,
                HandleState::Leaked as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if leaked {
            log::warn!("Recurrent handle {:?} dropped without dispose", self.id);
        }
    }
}
