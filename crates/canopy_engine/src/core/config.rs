//! # Unified Configuration System
//!
//! One serializable tree of settings for every subsystem. Hosts usually load
//! it from a TOML or RON file through [`Config`], tweak it with the `with_*`
//! builders, and hand it to [`RuntimeContext`](crate::core::RuntimeContext).
//!
//! ## Configuration Categories
//!
//! - **Logging**: default log level
//! - **Scheduler**: update batch count, worker threads
//! - **Render**: frame lock timeout, FPS smoothing, draw fan-out threshold
//! - **Time Wheel**: list size above which scans run in parallel

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use crate::config::{Config, ConfigError};

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level (`error`, `warn`, `info`, `debug`, `trace`)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Update scheduler configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Number of update batches; batch ordinals run `0..batch_count`
    pub batch_count: u8,
    /// Worker threads in the shared pool (0 = one per core)
    pub worker_threads: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            batch_count: 4,
            worker_threads: 0,
        }
    }
}

/// Render registry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Bounded wait on the frame lock before re-checking the stop flag
    pub frame_lock_timeout_ms: u64,
    /// EMA factor for the FPS estimate (0.0-1.0, smaller = smoother)
    pub fps_smoothing: f32,
    /// Queues at least this long are drawn on the worker pool
    pub parallel_draw_threshold: usize,
    /// Pause between frames when the backend has nothing to present
    pub idle_sleep_ms: u64,
}

impl RenderConfig {
    /// Frame lock timeout as a duration
    pub const fn frame_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_lock_timeout_ms)
    }

    /// Idle pause as a duration
    pub const fn idle_sleep(&self) -> Duration {
        Duration::from_millis(self.idle_sleep_ms)
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            frame_lock_timeout_ms: 500,
            fps_smoothing: 0.1,
            parallel_draw_threshold: 8,
            idle_sleep_ms: 1,
        }
    }
}

/// Time wheel configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeWheelConfig {
    /// Lists longer than this are scanned on the worker pool
    pub parallel_scan_threshold: usize,
}

impl Default for TimeWheelConfig {
    fn default() -> Self {
        Self {
            parallel_scan_threshold: 40,
        }
    }
}

/// # Runtime Configuration
///
/// Root of the configuration tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Logging settings
    pub logging: LoggingConfig,
    /// Update scheduler settings
    pub scheduler: SchedulerConfig,
    /// Render registry settings
    pub render: RenderConfig,
    /// Time wheel settings
    pub time_wheel: TimeWheelConfig,
    /// Seed for the context's random number generator
    pub seed: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            scheduler: SchedulerConfig::default(),
            render: RenderConfig::default(),
            time_wheel: TimeWheelConfig::default(),
            seed: 0x5eed_cafe,
        }
    }
}

impl Config for RuntimeConfig {}

impl RuntimeConfig {
    /// Set the default log level
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.logging.level = level.into();
        self
    }

    /// Set the worker thread count (0 = one per core)
    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.scheduler.worker_threads = threads;
        self
    }

    /// Set the number of update batches
    pub fn with_batch_count(mut self, batches: u8) -> Self {
        self.scheduler.batch_count = batches;
        self
    }

    /// Set the frame lock timeout
    pub fn with_frame_lock_timeout(mut self, timeout: Duration) -> Self {
        self.render.frame_lock_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the time wheel parallel scan threshold
    pub fn with_parallel_scan_threshold(mut self, threshold: usize) -> Self {
        self.time_wheel.parallel_scan_threshold = threshold;
        self
    }

    /// Set the RNG seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scheduler.batch_count == 0 {
            return Err(ConfigError::Invalid {
                field: "scheduler.batch_count",
                reason: "at least one update batch is required".to_string(),
            });
        }

        if self.render.frame_lock_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "render.frame_lock_timeout_ms",
                reason: "a zero timeout would spin the render thread".to_string(),
            });
        }

        if !(0.0..=1.0).contains(&self.render.fps_smoothing) || self.render.fps_smoothing == 0.0 {
            return Err(ConfigError::Invalid {
                field: "render.fps_smoothing",
                reason: format!("{} is outside (0.0, 1.0]", self.render.fps_smoothing),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = RuntimeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.render.frame_lock_timeout(), Duration::from_millis(500));
        assert_eq!(config.time_wheel.parallel_scan_threshold, 40);
    }

    #[test]
    fn test_zero_batches_rejected() {
        let config = RuntimeConfig::default().with_batch_count(0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "scheduler.batch_count", .. })
        ));
    }

    #[test]
    fn test_partial_toml_falls_back_to_defaults() {
        let config: RuntimeConfig = toml::from_str(
            r#"
            seed = 7

            [render]
            frame_lock_timeout_ms = 250
            "#,
        )
        .unwrap();

        assert_eq!(config.seed, 7);
        assert_eq!(config.render.frame_lock_timeout_ms, 250);
        assert_eq!(config.scheduler, SchedulerConfig::default());
    }

    #[test]
    fn test_ron_round_trip_through_file() {
        let path = std::env::temp_dir().join(format!("canopy_config_{}.ron", std::process::id()));
        let path = path.to_string_lossy().to_string();
        let config = RuntimeConfig::default().with_log_level("debug").with_worker_threads(3);

        config.save_to_file(&path).unwrap();
        let loaded = RuntimeConfig::load_from_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(loaded, config);
    }

    #[test]
    fn test_unknown_extension_rejected() {
        assert!(matches!(
            RuntimeConfig::load_from_file("settings.json"),
            Err(ConfigError::Io(_)) | Err(ConfigError::UnsupportedFormat(_))
        ));
    }
}
