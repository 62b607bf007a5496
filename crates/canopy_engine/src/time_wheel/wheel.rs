//! Deferred and recurrent callback scheduling
//!
//! Three independent lists, each behind its own lock:
//! - one-shot records fire once when due, then are removed
//! - repeat-for records fire on every tick and are removed after the tick on
//!   which their deadline is reached
//! - recurrent records fire whenever their interval has elapsed since the
//!   last firing, until their handle is disposed
//!
//! A scan takes due callbacks out under the list lock and runs them with no
//! lock held, so callbacks (and other threads) may schedule or cancel freely
//! while a tick is running. `tick` itself is not re-entrant.

use crate::core::RuntimeContext;
use crate::foundation::collections::{CallId, HandleMap};
use crate::foundation::pool::{run_guarded, WorkerPool};
use crate::foundation::time::Clock;
use crate::time_wheel::error::{CallbackFault, RecordKind, TimeWheelError};
use crate::time_wheel::handle::{HandleState, RecurrentHandle, RecurrentList};
use crate::time_wheel::record::{Due, OneShot, Recurrent, RepeatCallback, RepeatFor, ScanOutcome, Trigger};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Result of a successful tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickSummary {
    /// Tick index, starting at 1
    pub tick: u64,
    /// Clock time since the previous tick
    pub delta: Duration,
    /// Clock time since the wheel was created
    pub elapsed: Duration,
    /// Callbacks invoked
    pub fired: usize,
    /// Records removed
    pub removed: usize,
}

/// Records waiting in each list
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingCalls {
    /// `defer` records
    pub one_shot: usize,
    /// `repeat_for` records
    pub repeat_for: usize,
    /// `repeat_every` records
    pub recurrent: usize,
}

impl PendingCalls {
    /// Records across all lists
    pub const fn total(&self) -> usize {
        self.one_shot + self.repeat_for + self.recurrent
    }
}

struct TickState {
    last: Instant,
    ticks: u64,
}

struct Lists {
    one_shot: Mutex<HandleMap<CallId, OneShot>>,
    repeat_for: Mutex<HandleMap<CallId, RepeatFor>>,
    recurrent: Arc<RecurrentList>,
}

impl Lists {
    fn scan_one_shot(&self, now: Instant, tick: u64) -> ScanOutcome {
        let due: Vec<(CallId, OneShot)> = {
            let mut list = self.one_shot.lock();
            let ids: Vec<CallId> = list
                .iter()
                .filter(|(_, record)| record.due.is_due(now, tick))
                .map(|(id, _)| id)
                .collect();
            ids.into_iter()
                .filter_map(|id| list.remove(id).map(|record| (id, record)))
                .collect()
        };

        let mut outcome = ScanOutcome::default();
        for (call, record) in due {
            let age = record.due.age(now);
            let callback = record.callback;
            outcome.removed += 1;
            match run_guarded(move || callback(age)) {
                Ok(()) => outcome.fired += 1,
                Err(panic) => outcome.faults.push(CallbackFault::Panicked {
                    call,
                    kind: RecordKind::OneShot,
                    message: panic.message().to_string(),
                }),
            }
        }
        outcome
    }

    fn scan_repeat_for(&self, now: Instant, tick: u64, delta: Duration) -> ScanOutcome {
        let taken: Vec<(CallId, RepeatCallback, bool)> = {
            let mut list = self.repeat_for.lock();
            list.iter_mut()
                .filter_map(|(id, record)| {
                    let finished = record.due.is_due(now, tick);
                    record.callback.take().map(|callback| (id, callback, finished))
                })
                .collect()
        };

        let mut outcome = ScanOutcome::default();
        let mut settled = Vec::with_capacity(taken.len());
        for (call, mut callback, finished) in taken {
            match run_guarded(|| callback(delta)) {
                Ok(()) => {
                    outcome.fired += 1;
                    settled.push((call, Some(callback), finished));
                }
                Err(panic) => {
                    outcome.faults.push(CallbackFault::Panicked {
                        call,
                        kind: RecordKind::RepeatFor,
                        message: panic.message().to_string(),
                    });
                    settled.push((call, None, true));
                }
            }
        }

        let mut list = self.repeat_for.lock();
        for (call, callback, finished) in settled {
            if finished {
                if list.remove(call).is_some() {
                    outcome.removed += 1;
                }
            } else if let Some(record) = list.get_mut(call) {
                record.callback = callback;
            }
        }
        outcome
    }

    fn scan_recurrent(&self, now: Instant, tick: u64) -> ScanOutcome {
        let mut outcome = ScanOutcome::default();
        let taken: Vec<(CallId, RepeatCallback, Duration)> = {
            let mut list = self.recurrent.lock();
            let mut retired = Vec::new();
            let mut taken = Vec::new();
            for (id, record) in list.iter_mut() {
                match HandleState::load(&record.state) {
                    HandleState::Leaked => {
                        log::error!("Recurrent callback {id:?} lost its handle without being disposed");
                        outcome.faults.push(CallbackFault::LeakedHandle { call: id });
                        retired.push(id);
                    }
                    HandleState::Disposed => retired.push(id),
                    HandleState::Live => {
                        if record.due.is_due(now, tick) {
                            if let Some(callback) = record.callback.take() {
                                taken.push((id, callback, record.due.age(now)));
                                record.due.rearm(now, tick);
                            }
                        }
                    }
                }
            }
            for id in retired {
                list.remove(id);
                outcome.removed += 1;
            }
            taken
        };

        let mut settled = Vec::with_capacity(taken.len());
        for (call, mut callback, since_last) in taken {
            match run_guarded(|| callback(since_last)) {
                Ok(()) => {
                    outcome.fired += 1;
                    settled.push((call, Some(callback)));
                }
                Err(panic) => {
                    outcome.faults.push(CallbackFault::Panicked {
                        call,
                        kind: RecordKind::Recurrent,
                        message: panic.message().to_string(),
                    });
                    settled.push((call, None));
                }
            }
        }

        let mut list = self.recurrent.lock();
        for (call, callback) in settled {
            match callback {
                Some(callback) => {
                    if let Some(record) = list.get_mut(call) {
                        record.callback = Some(callback);
                    }
                }
                None => {
                    if list.remove(call).is_some() {
                        outcome.removed += 1;
                    }
                }
            }
        }
        outcome
    }

    fn pending(&self) -> PendingCalls {
        PendingCalls {
            one_shot: self.one_shot.lock().len(),
            repeat_for: self.repeat_for.lock().len(),
            recurrent: self.recurrent.lock().len(),
        }
    }
}

struct Inner {
    lists: Arc<Lists>,
    gate: Mutex<TickState>,
    ticks: AtomicU64,
    started: Instant,
    clock: Arc<dyn Clock>,
    pool: Arc<WorkerPool>,
    parallel_threshold: usize,
}

/// Deferred-call scheduler driven by an external tick
///
/// Cloning yields another handle to the same wheel, so callbacks can capture
/// one and schedule follow-up calls.
#[derive(Clone)]
pub struct TimeWheel {
    inner: Arc<Inner>,
}

impl TimeWheel {
    /// Create a wheel on the context's clock and pool
    pub fn new(ctx: &RuntimeContext) -> Self {
        let now = ctx.now();
        Self {
            inner: Arc::new(Inner {
                lists: Arc::new(Lists {
                    one_shot: Mutex::new(HandleMap::with_key()),
                    repeat_for: Mutex::new(HandleMap::with_key()),
                    recurrent: Arc::new(Mutex::new(HandleMap::with_key())),
                }),
                gate: Mutex::new(TickState { last: now, ticks: 0 }),
                ticks: AtomicU64::new(0),
                started: now,
                clock: Arc::clone(ctx.clock()),
                pool: Arc::clone(ctx.pool()),
                parallel_threshold: ctx.config().time_wheel.parallel_scan_threshold,
            }),
        }
    }

    fn arm(&self, trigger: Trigger) -> Due {
        Due::new(trigger, self.inner.clock.now(), self.inner.ticks.load(Ordering::Acquire))
    }

    /// Call `callback` once, when `trigger` is satisfied
    ///
    /// The callback receives the clock time since it was scheduled.
    pub fn defer<F>(&self, trigger: impl Into<Trigger>, callback: F) -> CallId
    where
        F: FnOnce(Duration) + Send + 'static,
    {
        let due = self.arm(trigger.into());
        self.inner.lists.one_shot.lock().insert(OneShot {
            due,
            callback: Box::new(callback),
        })
    }

    /// Call `callback` on every tick until `trigger` is satisfied, including
    /// the tick on which it is
    ///
    /// The callback receives the time since the previous tick.
    pub fn repeat_for<F>(&self, trigger: impl Into<Trigger>, callback: F) -> CallId
    where
        F: FnMut(Duration) + Send + 'static,
    {
        let due = self.arm(trigger.into());
        self.inner.lists.repeat_for.lock().insert(RepeatFor {
            due,
            callback: Some(Box::new(callback)),
        })
    }

    /// Call `callback` each time `interval` has passed since its last firing
    ///
    /// The callback receives the time since its previous firing (or since
    /// scheduling). It fires until the returned handle is disposed.
    pub fn repeat_every<F>(&self, interval: impl Into<Trigger>, callback: F) -> RecurrentHandle
    where
        F: FnMut(Duration) + Send + 'static,
    {
        let record = Recurrent::new(self.arm(interval.into()), Box::new(callback));
        let state = Arc::clone(&record.state);
        let id = self.inner.lists.recurrent.lock().insert(record);
        RecurrentHandle::new(id, state, Arc::downgrade(&self.inner.lists.recurrent))
    }

    /// Advance the wheel: scan all three lists and run whatever is due
    ///
    /// Every scan completes before this returns. Callback panics and leaked
    /// handles are collected and returned together as
    /// [`TimeWheelError::Faults`]; the tick still counts.
    pub fn tick(&self) -> Result<TickSummary, TimeWheelError> {
        let Some(mut state) = self.inner.gate.try_lock() else {
            return Err(TimeWheelError::TickInProgress);
        };

        let now = self.inner.clock.now();
        let delta = now.saturating_duration_since(state.last);
        state.last = now;
        state.ticks += 1;
        let tick = state.ticks;
        self.inner.ticks.store(tick, Ordering::Release);

        let pending = self.inner.lists.pending();
        let parallel = self.inner.pool.size() > 1
            && [pending.one_shot, pending.repeat_for, pending.recurrent]
                .iter()
                .any(|&len| len > self.inner.parallel_threshold);

        let outcome = if parallel {
            self.scan_parallel(now, tick, delta)
        } else {
            let lists = &self.inner.lists;
            let mut outcome = lists.scan_one_shot(now, tick);
            outcome.merge(lists.scan_repeat_for(now, tick, delta));
            outcome.merge(lists.scan_recurrent(now, tick));
            outcome
        };

        if !outcome.faults.is_empty() {
            return Err(TimeWheelError::Faults {
                tick,
                faults: outcome.faults,
            });
        }

        let summary = TickSummary {
            tick,
            delta,
            elapsed: now.saturating_duration_since(self.inner.started),
            fired: outcome.fired,
            removed: outcome.removed,
        };
        log::trace!("Tick {tick}: {} fired, {} removed", summary.fired, summary.removed);
        Ok(summary)
    }

    fn scan_parallel(&self, now: Instant, tick: u64, delta: Duration) -> ScanOutcome {
        let kinds = [RecordKind::OneShot, RecordKind::RepeatFor, RecordKind::Recurrent];
        let scans: Vec<Box<dyn FnOnce() -> ScanOutcome + Send>> = kinds
            .iter()
            .map(|&kind| {
                let lists = Arc::clone(&self.inner.lists);
                let scan: Box<dyn FnOnce() -> ScanOutcome + Send> = match kind {
                    RecordKind::OneShot => Box::new(move || lists.scan_one_shot(now, tick)),
                    RecordKind::RepeatFor => Box::new(move || lists.scan_repeat_for(now, tick, delta)),
                    RecordKind::Recurrent => Box::new(move || lists.scan_recurrent(now, tick)),
                };
                scan
            })
            .collect();

        let mut outcome = ScanOutcome::default();
        for (kind, result) in kinds.into_iter().zip(self.inner.pool.scatter(scans)) {
            match result {
                Ok(scan) => outcome.merge(scan),
                Err(panic) => outcome.faults.push(CallbackFault::ScanPanicked {
                    kind,
                    message: panic.message().to_string(),
                }),
            }
        }
        outcome
    }

    /// Records waiting in each list
    pub fn pending(&self) -> PendingCalls {
        self.inner.lists.pending()
    }

    /// Ticks completed or in progress
    pub fn tick_count(&self) -> u64 {
        self.inner.ticks.load(Ordering::Acquire)
    }

    /// Clock time since the wheel was created
    pub fn elapsed(&self) -> Duration {
        self.inner.clock.now().saturating_duration_since(self.inner.started)
    }
}

impl fmt::Debug for TimeWheel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeWheel")
            .field("ticks", &self.tick_count())
            .field("pending", &self.pending())
            .finish()
    }
}
