//! Foundation module - Core utilities and types
//!
//! This module provides fundamental utilities used throughout the engine:
//! - Clocks and frame timing
//! - Worker pool for fan-out/join task dispatch
//! - Generation-checked handle types
//! - Small math types
//! - Logging utilities

pub mod collections;
pub mod logging;
pub mod math;
pub mod pool;
pub mod time;
