//! Logging utilities and structured logging support

pub use log::{debug, error, info, trace, warn};

use log::LevelFilter;

/// Initialize the logging system at the given default level
///
/// `RUST_LOG` still takes precedence when set. Panics if a logger was already
/// installed; use [`try_init`] from tests and embedding hosts.
pub fn init(level: &str) {
    builder(level).init();
}

/// Initialize the logging system, returning `false` if a logger already exists
pub fn try_init(level: &str) -> bool {
    builder(level).try_init().is_ok()
}

/// Parse a level name, falling back to `Info` for unknown names
pub fn parse_level(level: &str) -> LevelFilter {
    level.parse().unwrap_or(LevelFilter::Info)
}

fn builder(level: &str) -> env_logger::Builder {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(parse_level(level));
    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }
    builder
}
