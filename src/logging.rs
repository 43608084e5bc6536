//! Structured logging setup, mirroring the teacher's `slog` drain wiring.

use slog::Drain;

pub use crate::constants::COMPONENT_KEY;

/// Builds the root logger. `json` selects `slog-json` (for log shipping)
/// over human-readable `slog-term` output.
pub fn root_logger(json: bool) -> slog::Logger {
    if json {
        let drain = slog_json::Json::default(std::io::stdout()).fuse();
        let drain = slog_async::Async::new(drain).build().fuse();
        slog::Logger::root(drain, slog::o!("version" => env!("CARGO_PKG_VERSION")))
    } else {
        let decorator = slog_term::TermDecorator::new().build();
        let drain = slog_term::FullFormat::new(decorator).build().fuse();
        let drain = slog_async::Async::new(drain).build().fuse();
        slog::Logger::root(drain, slog::o!("version" => env!("CARGO_PKG_VERSION")))
    }
}

#[cfg(test)]
pub fn test_logger() -> slog::Logger {
    slog::Logger::root(slog::Discard, slog::o!())
}
