//! Core runtime configuration and the shared runtime context

pub mod config;
pub mod context;

pub use config::{LoggingConfig, RenderConfig, RuntimeConfig, SchedulerConfig, TimeWheelConfig};
pub use context::RuntimeContext;
