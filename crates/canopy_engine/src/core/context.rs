//! Runtime context
//!
//! The one object created at startup and handed to every subsystem
//! constructor: configuration, the shared worker pool, the clock, and the
//! seeded random number generator. Nothing in the crate reaches for
//! process-wide state; if a subsystem needs one of these it is given the
//! context.

use crate::config::ConfigError;
use crate::core::config::RuntimeConfig;
use crate::foundation::pool::WorkerPool;
use crate::foundation::time::{Clock, SystemClock};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Shared services threaded through the runtime
pub struct RuntimeContext {
    config: RuntimeConfig,
    pool: Arc<WorkerPool>,
    clock: Arc<dyn Clock>,
    rng: Mutex<StdRng>,
}

impl RuntimeContext {
    /// Create a context on the system clock
    pub fn new(config: RuntimeConfig) -> Result<Arc<Self>, ConfigError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a context on a caller-provided clock
    pub fn with_clock(config: RuntimeConfig, clock: Arc<dyn Clock>) -> Result<Arc<Self>, ConfigError> {
        config.validate()?;

        let pool = Arc::new(WorkerPool::new(config.scheduler.worker_threads));
        let rng = Mutex::new(StdRng::seed_from_u64(config.seed));

        log::info!(
            "Runtime context ready ({} workers, {} update batches)",
            pool.size(),
            config.scheduler.batch_count
        );

        Ok(Arc::new(Self {
            config,
            pool,
            clock,
            rng,
        }))
    }

    /// Configuration the context was built from
    pub const fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Shared worker pool
    pub const fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    /// Shared clock
    pub const fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Current instant on the context clock
    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    /// Run `f` with exclusive access to the seeded generator
    pub fn with_rng<R>(&self, f: impl FnOnce(&mut StdRng) -> R) -> R {
        f(&mut self.rng.lock())
    }
}

impl fmt::Debug for RuntimeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeContext")
            .field("config", &self.config)
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::time::ManualClock;
    use rand::Rng;
    use std::time::Duration;

    #[test]
    fn test_seeded_rng_is_deterministic() {
        let a = RuntimeContext::new(RuntimeConfig::default().with_worker_threads(1).with_seed(42)).unwrap();
        let b = RuntimeContext::new(RuntimeConfig::default().with_worker_threads(1).with_seed(42)).unwrap();

        let xs: Vec<u32> = a.with_rng(|rng| (0..4).map(|_| rng.gen()).collect());
        let ys: Vec<u32> = b.with_rng(|rng| (0..4).map(|_| rng.gen()).collect());
        assert_eq!(xs, ys);
    }

    #[test]
    fn test_context_uses_provided_clock() {
        let clock = Arc::new(ManualClock::new());
        let ctx = RuntimeContext::with_clock(RuntimeConfig::default().with_worker_threads(1), clock.clone()).unwrap();
        let before = ctx.now();
        clock.advance(Duration::from_millis(5));
        assert_eq!(ctx.now() - before, Duration::from_millis(5));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = RuntimeContext::new(RuntimeConfig::default().with_batch_count(0));
        assert!(result.is_err());
    }
}
