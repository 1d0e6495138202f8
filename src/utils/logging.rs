//! Injected logging capability
//!
//! The limiter, the probe and the engine each hold an `Arc<dyn ScanLog>`
//! instead of reaching for a process-wide logger. `LogFacade` forwards to the
//! `log` crate, `MemoryLog` keeps records around for assertions.

use log::Level;
use std::fmt;
use std::sync::{Arc, Mutex};

/// Log target used by every record the scanner emits
pub const LOG_TARGET: &str = "tcpscan";

/// Sink for scanner diagnostics
pub trait ScanLog: Send + Sync {
    fn log(&self, level: Level, args: fmt::Arguments<'_>);

    fn debug(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Debug, args);
    }

    fn info(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Info, args);
    }

    fn warn(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Warn, args);
    }

    fn error(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Error, args);
    }
}

/// Forwards to the `log` macros under the `tcpscan` target
#[derive(Debug, Clone, Copy, Default)]
pub struct LogFacade;

impl ScanLog for LogFacade {
    fn log(&self, level: Level, args: fmt::Arguments<'_>) {
        log::log!(target: LOG_TARGET, level, "{}", args);
    }
}

/// Shared handle to the default facade
pub fn facade() -> Arc<dyn ScanLog> {
    Arc::new(LogFacade)
}

/// Keeps every record in memory
#[derive(Debug, Default)]
pub struct MemoryLog {
    records: Mutex<Vec<(Level, String)>>,
}

impl MemoryLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Snapshot of the records logged so far
    pub fn records(&self) -> Vec<(Level, String)> {
        match self.records.lock() {
            Ok(records) => records.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Messages logged at exactly `level`
    pub fn messages_at(&self, level: Level) -> Vec<String> {
        self.records()
            .into_iter()
            .filter(|(lvl, _)| *lvl == level)
            .map(|(_, msg)| msg)
            .collect()
    }
}

impl ScanLog for MemoryLog {
    fn log(&self, level: Level, args: fmt::Arguments<'_>) {
        let mut records = match self.records.lock() {
            Ok(records) => records,
            Err(poisoned) => poisoned.into_inner(),
        };
        records.push((level, args.to_string()));
    }
}
