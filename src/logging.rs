//! Logging init (SPEC_FULL.md §1.1 "Ambient stack"). Thin wrapper over
//! `fast_log`, wired to the `log` facade every other module logs through.

use fast_log::config::Config as FastLogConfig;

/// Initializes process-wide logging to stdout at `level`. Call once, from
/// the binary's `main` (library consumers that already run a logger of
/// their own can skip this).
pub fn init_stdout(level: log::LevelFilter) -> Result<(), fast_log::error::LogError> {
    fast_log::init(FastLogConfig::new().console().level(level))
}

/// Initializes process-wide logging to a rolling file at `path`, in
/// addition to stdout.
pub fn init_file(path: &str, level: log::LevelFilter) -> Result<(), fast_log::error::LogError> {
    fast_log::init(
        FastLogConfig::new()
            .console()
            .file(path)
            .level(level),
    )
}
