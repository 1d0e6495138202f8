//! Scanner module containing the scan engine and its result type

pub mod engine;

use crate::network::PortResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

pub use engine::ScanEngine;

/// Aggregated outcome of one scan. Only open ports are kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    host: String,
    results: BTreeMap<u16, PortResult>,
    total_ports: u64,
    completed: u64,
    concurrency: usize,
    cancelled: bool,
    started_at: DateTime<Utc>,
    duration: Duration,
}

impl ScanResult {
    pub(crate) fn new(host: impl Into<String>, total_ports: u64, concurrency: usize) -> Self {
        Self {
            host: host.into(),
            results: BTreeMap::new(),
            total_ports,
            completed: 0,
            concurrency,
            cancelled: false,
            started_at: Utc::now(),
            duration: Duration::ZERO,
        }
    }

    /// Count a finished task and keep its result when the port was open
    pub(crate) fn record(&mut self, result: PortResult) {
        self.completed += 1;
        if result.is_open() {
            self.results.insert(result.port(), result);
        }
    }

    /// Count a task that ended without a result
    pub(crate) fn record_lost(&mut self) {
        self.completed += 1;
    }

    pub(crate) fn mark_cancelled(&mut self) {
        self.cancelled = true;
    }

    pub(crate) fn finish(&mut self, duration: Duration) {
        self.duration = duration;
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Open ports keyed by port number
    pub fn results(&self) -> &BTreeMap<u16, PortResult> {
        &self.results
    }

    /// Open ports in ascending order
    pub fn open_ports(&self) -> Vec<u16> {
        self.results.keys().copied().collect()
    }

    /// Banners captured on `port`, `None` when the port was not found open
    pub fn banners(&self, port: u16) -> Option<&[String]> {
        self.results.get(&port).map(PortResult::banners)
    }

    /// Port to banner list mapping, the shape the JSON report uses
    pub fn headers(&self) -> BTreeMap<u16, Vec<String>> {
        self.results
            .iter()
            .map(|(port, result)| (*port, result.banners().to_vec()))
            .collect()
    }

    /// No open port was found
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Tasks planned for the scan
    pub fn total_ports(&self) -> u64 {
        self.total_ports
    }

    /// Tasks that reached a terminal state
    pub fn completed(&self) -> u64 {
        self.completed
    }

    /// Concurrency actually used, after clamping
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// The scan was cut short and holds partial results
    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Get scan rate in ports per second
    pub fn scan_rate(&self) -> f64 {
        if self.duration.as_secs_f64() > 0.0 {
            self.completed as f64 / self.duration.as_secs_f64()
        } else {
            0.0
        }
    }
}

/// Observer told about every finished probe task
pub trait ProgressObserver: Send + Sync {
    /// Called once before the first task is dispatched
    fn on_start(&self, _total: u64) {}

    /// Called exactly once per finished task, open or closed
    fn on_task_complete(&self, completed: u64, total: u64);

    /// Called once after the last task
    fn on_finish(&self, _completed: u64, _total: u64) {}
}

/// Observer that ignores everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressObserver for NoProgress {
    fn on_task_complete(&self, _completed: u64, _total: u64) {}
}
