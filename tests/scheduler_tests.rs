//! Scheduler tests driven by in-process probers

use async_trait::async_trait;
use log::Level;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tcpscan::{
    config::{PortRange, ScanConfig, ScanTarget},
    scanner::ProgressObserver,
    utils::{FixedLimit, MemoryLog, ResourceLimiter},
    PortProber, PortResult, ScanEngine,
};
use tokio_util::sync::CancellationToken;

/// Sleeps for `delay`, records how many probes overlap, opens `open` ports
struct CountingProber {
    delay: Duration,
    open: BTreeMap<u16, Vec<String>>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl CountingProber {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            open: BTreeMap::new(),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    fn with_open(mut self, port: u16, banners: &[&str]) -> Self {
        self.open
            .insert(port, banners.iter().map(|b| b.to_string()).collect());
        self
    }
}

#[async_trait]
impl PortProber for CountingProber {
    async fn probe(&self, _host: &str, port: u16) -> PortResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(self.delay).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        match self.open.get(&port) {
            Some(banners) => PortResult::open(port, banners.clone()),
            None => PortResult::closed(port),
        }
    }
}

/// Panics on one port, closed everywhere else
struct PanickingProber {
    bad_port: u16,
}

#[async_trait]
impl PortProber for PanickingProber {
    async fn probe(&self, _host: &str, port: u16) -> PortResult {
        if port == self.bad_port {
            panic!("probe blew up on {}", port);
        }
        PortResult::open(port, Vec::new())
    }
}

#[derive(Default)]
struct RecordingProgress {
    started_with: AtomicU64,
    ticks: AtomicU64,
    last_completed: AtomicU64,
    finished: AtomicU64,
}

impl ProgressObserver for RecordingProgress {
    fn on_start(&self, total: u64) {
        self.started_with.store(total, Ordering::SeqCst);
    }

    fn on_task_complete(&self, completed: u64, _total: u64) {
        self.ticks.fetch_add(1, Ordering::SeqCst);
        self.last_completed.store(completed, Ordering::SeqCst);
    }

    fn on_finish(&self, _completed: u64, _total: u64) {
        self.finished.fetch_add(1, Ordering::SeqCst);
    }
}

fn engine(concurrency: usize, ceiling: u64, prober: Arc<dyn PortProber>, log: Arc<MemoryLog>) -> ScanEngine {
    let config = ScanConfig::default()
        .with_concurrency(concurrency)
        .with_capture_banner(false);
    ScanEngine::with_logger(config, log.clone())
        .unwrap()
        .with_prober(prober)
        .with_limiter(ResourceLimiter::with_source(Arc::new(FixedLimit(ceiling)), log))
}

fn target(ranges: &[(u32, u32)]) -> ScanTarget {
    let ranges = ranges
        .iter()
        .map(|&(start, end)| PortRange::new(start, end).unwrap())
        .collect();
    ScanTarget::new("127.0.0.1", ranges).unwrap()
}

#[tokio::test]
async fn in_flight_probes_never_exceed_concurrency() {
    let prober = Arc::new(CountingProber::new(Duration::from_millis(5)));
    let engine = engine(4, 65_536, prober.clone(), MemoryLog::new());

    let result = engine.scan(&target(&[(1000, 1040)])).await;

    assert_eq!(result.completed(), 40);
    assert_eq!(prober.calls.load(Ordering::SeqCst), 40);
    let peak = prober.max_in_flight.load(Ordering::SeqCst);
    assert!(peak <= 4, "peak in-flight was {}", peak);
    assert!(peak >= 1);
}

#[tokio::test]
async fn empty_range_dispatches_nothing() {
    let prober = Arc::new(CountingProber::new(Duration::ZERO));
    let engine = engine(8, 65_536, prober.clone(), MemoryLog::new());

    let result = engine.scan(&target(&[(1, 1)])).await;

    assert!(result.is_empty());
    assert_eq!(result.total_ports(), 0);
    assert_eq!(result.completed(), 0);
    assert_eq!(prober.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn open_port_keeps_its_banner() {
    let prober = Arc::new(CountingProber::new(Duration::ZERO).with_open(8080, &["test-banner"]));
    let engine = engine(8, 65_536, prober, MemoryLog::new());

    let result = engine.scan(&target(&[(8080, 8082)])).await;

    assert_eq!(result.completed(), 2);
    assert_eq!(result.open_ports(), vec![8080]);
    assert_eq!(
        result.headers(),
        BTreeMap::from([(8080, vec!["test-banner".to_string()])])
    );
    assert_eq!(result.banners(8081), None);
}

#[tokio::test]
async fn no_open_ports_gives_an_empty_map() {
    let prober = Arc::new(CountingProber::new(Duration::ZERO));
    let engine = engine(2, 65_536, prober, MemoryLog::new());

    let result = engine.scan(&target(&[(20, 26)])).await;

    assert_eq!(result.completed(), 6);
    assert!(result.headers().is_empty());
    assert!(!result.is_cancelled());
}

#[tokio::test]
async fn overlapping_ranges_are_probed_twice() {
    let prober = Arc::new(CountingProber::new(Duration::ZERO).with_open(3, &[]));
    let engine = engine(2, 65_536, prober.clone(), MemoryLog::new());

    let result = engine.scan(&target(&[(1, 4), (3, 5)])).await;

    assert_eq!(result.total_ports(), 5);
    assert_eq!(result.completed(), 5);
    assert_eq!(prober.calls.load(Ordering::SeqCst), 5);
    assert_eq!(result.open_ports(), vec![3]);
}

#[tokio::test]
async fn progress_sees_every_task_once() {
    let prober = Arc::new(CountingProber::new(Duration::from_millis(1)));
    let progress = Arc::new(RecordingProgress::default());
    let engine = engine(3, 65_536, prober, MemoryLog::new()).with_progress(progress.clone());

    engine.scan(&target(&[(100, 117)])).await;

    assert_eq!(progress.started_with.load(Ordering::SeqCst), 17);
    assert_eq!(progress.ticks.load(Ordering::SeqCst), 17);
    assert_eq!(progress.last_completed.load(Ordering::SeqCst), 17);
    assert_eq!(progress.finished.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn descriptor_ceiling_clamps_concurrency() {
    let log = MemoryLog::new();
    let prober = Arc::new(CountingProber::new(Duration::ZERO));
    let engine = engine(100_000, 1024, prober, log.clone());

    assert_eq!(engine.effective_concurrency(), 716);
    let result = engine.scan(&target(&[(1, 11)])).await;

    assert_eq!(result.concurrency(), 716);
    assert_eq!(result.completed(), 10);
    assert!(!log.messages_at(Level::Warn).is_empty());
}

#[tokio::test]
async fn cancellation_returns_partial_result() {
    let prober = Arc::new(CountingProber::new(Duration::from_secs(30)));
    let engine = engine(2, 65_536, prober, MemoryLog::new());
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        engine.scan_with_cancel(&target(&[(1, 101)]), cancel),
    )
    .await
    .expect("cancelled scan should return promptly");

    assert!(result.is_cancelled());
    assert_eq!(result.total_ports(), 100);
    assert!(result.completed() < 100);
}

#[tokio::test]
async fn already_cancelled_token_dispatches_nothing() {
    let prober = Arc::new(CountingProber::new(Duration::ZERO));
    let engine = engine(4, 65_536, prober.clone(), MemoryLog::new());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = engine.scan_with_cancel(&target(&[(1, 50)]), cancel).await;

    assert!(result.is_cancelled());
    assert_eq!(result.completed(), 0);
    assert_eq!(prober.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn panicking_probe_does_not_stop_the_scan() {
    let log = MemoryLog::new();
    let engine = engine(2, 65_536, Arc::new(PanickingProber { bad_port: 12 }), log.clone());

    let result = engine.scan(&target(&[(10, 15)])).await;

    assert_eq!(result.completed(), 5);
    assert_eq!(result.open_ports(), vec![10, 11, 13, 14]);
    assert!(log
        .messages_at(Level::Error)
        .iter()
        .any(|m| m.contains("Probe task failed")));
}
