//! Time management utilities

use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Source of the current instant.
///
/// Everything that measures wall-clock time (the time wheel, the render loop's
/// frame timer) reads it through a clock so tests can drive time by hand.
pub trait Clock: Send + Sync {
    /// Current instant
    fn now(&self) -> Instant;
}

/// Clock backed by [`Instant::now`]
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to
///
/// Used by tests and by hosts that run on a fixed simulated timestep.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    /// Create a manual clock frozen at the current instant
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }

    /// Total time advanced since creation
    pub fn elapsed(&self) -> Duration {
        *self.offset.lock()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.offset.lock()
    }
}

/// Exponential moving average tracker.
#[derive(Debug, Clone, Copy)]
pub struct Ema {
    value: f32,
    alpha: f32,
    initialized: bool,
}

impl Ema {
    /// Create a tracker with the given smoothing factor (0.0-1.0)
    pub const fn new(alpha: f32) -> Self {
        Self {
            value: 0.0,
            alpha,
            initialized: false,
        }
    }

    /// Fold a new sample into the average
    pub fn update(&mut self, sample: f32) {
        if self.initialized {
            self.value = self.alpha * sample + (1.0 - self.alpha) * self.value;
        } else {
            self.value = sample;
            self.initialized = true;
        }
    }

    /// Current smoothed value (0.0 before the first sample)
    pub const fn value(&self) -> f32 {
        self.value
    }
}

/// High-precision timer for frame timing
#[derive(Debug)]
pub struct Timer {
    last_frame: Instant,
    delta_time: Duration,
    total_time: Duration,
    frame_count: u64,
    fps: Ema,
}

impl Timer {
    /// Create a new timer starting at `now`
    pub fn new(now: Instant, fps_smoothing: f32) -> Self {
        Self {
            last_frame: now,
            delta_time: Duration::ZERO,
            total_time: Duration::ZERO,
            frame_count: 0,
            fps: Ema::new(fps_smoothing),
        }
    }

    /// Update the timer (should be called once per frame)
    pub fn update(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_frame);
        self.delta_time = elapsed;
        self.total_time += elapsed;
        self.last_frame = now;
        self.frame_count += 1;
        if elapsed > Duration::ZERO {
            self.fps.update(1.0 / elapsed.as_secs_f32());
        }
    }

    /// Get the time since the last frame
    pub const fn delta_time(&self) -> Duration {
        self.delta_time
    }

    /// Get the total elapsed time since timer creation
    pub const fn total_time(&self) -> Duration {
        self.total_time
    }

    /// Get the current frame count
    pub const fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Smoothed frames per second
    pub const fn fps(&self) -> f32 {
        self.fps.value()
    }

    /// Get the average FPS since timer creation
    pub fn average_fps(&self) -> f32 {
        let total = self.total_time.as_secs_f32();
        if total > 0.0 {
            self.frame_count as f32 / total
        } else {
            0.0
        }
    }
}
