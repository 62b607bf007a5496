//! Scheduled records

use crate::time_wheel::error::CallbackFault;
use crate::time_wheel::handle::HandleState;
use std::sync::atomic::AtomicU8;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// When a record becomes due: after some time, or after some ticks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    /// Clock time since scheduling (or since the last firing)
    After(Duration),
    /// Ticks since scheduling (or since the last firing)
    Frames(u64),
}

impl Trigger {
    /// Shorthand for `After(Duration::from_millis(ms))`
    pub const fn millis(ms: u64) -> Self {
        Self::After(Duration::from_millis(ms))
    }
}

impl From<Duration> for Trigger {
    fn from(duration: Duration) -> Self {
        Self::After(duration)
    }
}

/// A trigger anchored at the moment it was armed
#[derive(Debug, Clone, Copy)]
pub(crate) struct Due {
    trigger: Trigger,
    armed_at: Instant,
    armed_tick: u64,
}

impl Due {
    pub(crate) const fn new(trigger: Trigger, now: Instant, tick: u64) -> Self {
        Self {
            trigger,
            armed_at: now,
            armed_tick: tick,
        }
    }

    pub(crate) fn is_due(&self, now: Instant, tick: u64) -> bool {
        match self.trigger {
            Trigger::After(duration) => now.saturating_duration_since(self.armed_at) >= duration,
            Trigger::Frames(frames) => tick.saturating_sub(self.armed_tick) >= frames,
        }
    }

    /// Time since the trigger was armed
    pub(crate) fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.armed_at)
    }

    pub(crate) fn rearm(&mut self, now: Instant, tick: u64) {
        self.armed_at = now;
        self.armed_tick = tick;
    }
}

pub(crate) type OnceCallback = Box<dyn FnOnce(Duration) + Send>;
pub(crate) type RepeatCallback = Box<dyn FnMut(Duration) + Send>;

pub(crate) struct OneShot {
    pub(crate) due: Due,
    pub(crate) callback: OnceCallback,
}

pub(crate) struct RepeatFor {
    pub(crate) due: Due,
    /// `None` while the callback is running
    pub(crate) callback: Option<RepeatCallback>,
}

pub(crate) struct Recurrent {
    pub(crate) due: Due,
    pub(crate) callback: Option<RepeatCallback>,
    pub(crate) state: Arc<AtomicU8>,
}

impl Recurrent {
    pub(crate) fn new(due: Due, callback: RepeatCallback) -> Self {
        Self {
            due,
            callback: Some(callback),
            state: Arc::new(AtomicU8::new(HandleState::Live as u8)),
        }
    }
}

/// Result of scanning one list
#[derive(Debug, Default)]
pub(crate) struct ScanOutcome {
    pub(crate) fired: usize,
    pub(crate) removed: usize,
    pub(crate) faults: Vec<CallbackFault>,
}

impl ScanOutcome {
    pub(crate) fn merge(&mut self, other: Self) {
        self.fired += other.fired;
        self.removed += other.removed;
        self.faults.extend(other.faults);
    }
}
