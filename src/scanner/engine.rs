//! Main scanning engine implementation
//!
//! One tokio task per port. A semaphore sized to the effective concurrency is
//! acquired before each spawn and the permit travels with the task, so it is
//! returned however the task ends. Finished tasks come back through a
//! `JoinSet` and are merged by the dispatch loop alone.

use crate::config::{ScanConfig, ScanTarget};
use crate::core::{PortProber, ProberFactory};
use crate::network::PortResult;
use crate::output::TerminalProgress;
use crate::scanner::{NoProgress, ProgressObserver, ScanResult};
use crate::utils::logging::{self, ScanLog};
use crate::utils::{Logger, ResourceLimiter};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

/// Outcome of waiting for a free slot
enum Admission {
    Granted(OwnedSemaphorePermit),
    Cancelled,
}

/// Main scanning engine
pub struct ScanEngine {
    config: ScanConfig,
    prober: Arc<dyn PortProber>,
    limiter: ResourceLimiter,
    progress: Arc<dyn ProgressObserver>,
    log: Arc<dyn ScanLog>,
}

impl ScanEngine {
    /// Create a new scan engine with the given configuration
    pub fn new(config: ScanConfig) -> crate::Result<Self> {
        Self::with_logger(config, logging::facade())
    }

    /// Create an engine whose limiter, probe and scheduler report to `log`
    pub fn with_logger(config: ScanConfig, log: Arc<dyn ScanLog>) -> crate::Result<Self> {
        config.validate()?;

        let prober = ProberFactory::from_config(&config, log.clone())?;
        let progress: Arc<dyn ProgressObserver> = if config.show_progress {
            Arc::new(TerminalProgress::new())
        } else {
            Arc::new(NoProgress)
        };

        Ok(Self {
            limiter: ResourceLimiter::new(log.clone()),
            config,
            prober,
            progress,
            log,
        })
    }

    /// Replace the network prober
    pub fn with_prober(mut self, prober: Arc<dyn PortProber>) -> Self {
        self.prober = prober;
        self
    }

    /// Replace the descriptor-limit policy
    pub fn with_limiter(mut self, limiter: ResourceLimiter) -> Self {
        self.limiter = limiter;
        self
    }

    /// Replace the progress observer
    pub fn with_progress(mut self, progress: Arc<dyn ProgressObserver>) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Concurrency the next scan will run with
    pub fn effective_concurrency(&self) -> usize {
        self.limiter
            .effective_concurrency(self.config.concurrency)
            .min(Semaphore::MAX_PERMITS)
    }

    /// Probe every port of `target` and wait for all of them
    pub async fn scan(&self, target: &ScanTarget) -> ScanResult {
        self.scan_with_cancel(target, CancellationToken::new()).await
    }

    /// Like `scan`, but returns early with partial results once `cancel` fires
    pub async fn scan_with_cancel(&self, target: &ScanTarget, cancel: CancellationToken) -> ScanResult {
        let start_time = Instant::now();

        if let Some(ulimit) = self.config.ulimit {
            self.limiter.raise_soft_limit(ulimit);
        }
        let concurrency = self.effective_concurrency();
        let total = target.total_ports();

        let mut result = ScanResult::new(target.host(), total, concurrency);
        Logger::log_scan_start(self.log.as_ref(), target.host(), total, concurrency);
        self.progress.on_start(total);

        let gate = Arc::new(Semaphore::new(concurrency));
        let host: Arc<str> = Arc::from(target.host());
        let mut tasks: JoinSet<PortResult> = JoinSet::new();
        let mut cancelled = false;

        for port in target.ports() {
            let permit = match self.admit(&gate, &mut tasks, &mut result, &cancel).await {
                Admission::Granted(permit) => permit,
                Admission::Cancelled => {
                    cancelled = true;
                    break;
                }
            };

            let prober = self.prober.clone();
            let host = host.clone();
            tasks.spawn(async move {
                let _permit = permit;
                prober.probe(&host, port).await
            });
        }

        if cancelled {
            tasks.abort_all();
        }

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled(), if !cancelled => {
                    cancelled = true;
                    tasks.abort_all();
                }
                joined = tasks.join_next() => match joined {
                    Some(joined) => self.absorb(joined, &mut result),
                    None => break,
                },
            }
        }

        if cancelled {
            self.log.warn(format_args!(
                "Scan of {} cancelled after {}/{} ports",
                target.host(),
                result.completed(),
                total
            ));
            result.mark_cancelled();
        }
        result.finish(start_time.elapsed());
        self.progress.on_finish(result.completed(), total);

        Logger::log_scan_complete(self.log.as_ref(), result.duration(), result.results().len(), total);
        self.log.info(format_args!("Open ports: {:?}", result.headers()));

        result
    }

    /// Wait for a free slot, merging tasks that finish in the meantime
    async fn admit(
        &self,
        gate: &Arc<Semaphore>,
        tasks: &mut JoinSet<PortResult>,
        result: &mut ScanResult,
        cancel: &CancellationToken,
    ) -> Admission {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Admission::Cancelled,
                Some(joined) = tasks.join_next() => self.absorb(joined, result),
                permit = gate.clone().acquire_owned() => {
                    return match permit {
                        Ok(permit) => Admission::Granted(permit),
                        Err(_) => Admission::Cancelled,
                    };
                }
            }
        }
    }

    /// Merge one finished task into the result and advance progress
    fn absorb(&self, joined: Result<PortResult, JoinError>, result: &mut ScanResult) {
        match joined {
            Ok(port_result) => result.record(port_result),
            // Aborted by cancellation, never reached a terminal state
            Err(e) if e.is_cancelled() => return,
            Err(e) => {
                self.log.error(format_args!("Probe task failed: {}", e));
                result.record_lost();
            }
        }
        self.progress.on_task_complete(result.completed(), result.total_ports());
    }
}

impl std::fmt::Debug for ScanEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanEngine")
            .field("config", &self.config)
            .field("limiter", &self.limiter)
            .finish_non_exhaustive()
    }
}
