//! Utility modules: descriptor limits and logging

pub mod limits;
pub mod logging;

use std::time::Duration;

pub use limits::{clamp_to_ceiling, DescriptorLimit, FixedLimit, ResourceLimiter, SystemLimit};
pub use logging::{LogFacade, MemoryLog, ScanLog};

/// Logging utilities
pub struct Logger;

impl Logger {
    /// Initialize the `env_logger` backend on stderr.
    ///
    /// `RUST_LOG`, when set, refines `level`. Calling this twice is harmless.
    pub fn init(level: log::LevelFilter) {
        let mut builder = env_logger::Builder::new();
        builder
            .filter_level(level)
            .format_timestamp_secs()
            .target(env_logger::Target::Stderr);
        if let Ok(filters) = std::env::var("RUST_LOG") {
            builder.parse_filters(&filters);
        }
        let _ = builder.try_init();
    }

    /// Map a `-v` count onto a level, starting at warnings
    pub fn level_for_verbosity(verbosity: u8) -> log::LevelFilter {
        match verbosity {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    }

    /// Log scan start
    pub fn log_scan_start(log: &dyn ScanLog, host: &str, ports: u64, concurrency: usize) {
        log.info(format_args!(
            "Starting scan of {} ({} ports) with concurrency {}",
            host, ports, concurrency
        ));
    }

    /// Log scan completion
    pub fn log_scan_complete(log: &dyn ScanLog, duration: Duration, open_ports: usize, total_ports: u64) {
        log.info(format_args!(
            "Scan completed in {:.2}s - {}/{} ports open",
            duration.as_secs_f64(),
            open_ports,
            total_ports
        ));
    }
}
