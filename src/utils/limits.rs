//! Concurrency budget derived from the file descriptor ceiling
//!
//! Every in-flight probe holds one socket, so the soft `RLIMIT_NOFILE` value is
//! the real bound on parallelism. Requests at or above it are cut down to 70%
//! of the ceiling, leaving room for stdio, resolver sockets and the banner
//! client.

use crate::utils::logging::ScanLog;
use std::io;
use std::sync::Arc;

/// Share of the descriptor ceiling handed to the scan, as a ratio
const HEADROOM_NUMERATOR: u64 = 7;
const HEADROOM_DENOMINATOR: u64 = 10;

/// Source of the process descriptor ceiling
pub trait DescriptorLimit: Send + Sync {
    /// Current soft limit
    fn soft_limit(&self) -> io::Result<u64>;

    /// Try to raise the soft limit towards `target`, returning the new soft limit
    fn raise_soft_limit(&self, _target: u64) -> io::Result<u64> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "raising the descriptor limit is not supported here",
        ))
    }
}

/// Reads and adjusts `RLIMIT_NOFILE` of the running process
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemLimit;

#[cfg(unix)]
impl DescriptorLimit for SystemLimit {
    fn soft_limit(&self) -> io::Result<u64> {
        rlimit::Resource::NOFILE.get().map(|(soft, _hard)| soft)
    }

    fn raise_soft_limit(&self, target: u64) -> io::Result<u64> {
        // Capped at the hard limit by rlimit itself
        rlimit::increase_nofile_limit(target)
    }
}

#[cfg(not(unix))]
impl DescriptorLimit for SystemLimit {
    fn soft_limit(&self) -> io::Result<u64> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "descriptor limits are only queried on Unix",
        ))
    }
}

/// A ceiling fixed up front
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedLimit(pub u64);

impl DescriptorLimit for FixedLimit {
    fn soft_limit(&self) -> io::Result<u64> {
        Ok(self.0)
    }
}

/// Clamp `requested` against a known ceiling.
///
/// Below the ceiling the request passes through. At or above it the result is
/// `floor(ceiling * 0.7)`. Never returns 0.
pub fn clamp_to_ceiling(requested: usize, ceiling: u64) -> usize {
    let requested = requested.max(1);
    if (requested as u64) < ceiling {
        return requested;
    }
    let budget = ceiling.saturating_mul(HEADROOM_NUMERATOR) / HEADROOM_DENOMINATOR;
    usize::try_from(budget).unwrap_or(usize::MAX).max(1)
}

/// Turns a requested concurrency into one the process can sustain
#[derive(Clone)]
pub struct ResourceLimiter {
    source: Arc<dyn DescriptorLimit>,
    log: Arc<dyn ScanLog>,
}

impl ResourceLimiter {
    /// Limiter backed by the real process limit
    pub fn new(log: Arc<dyn ScanLog>) -> Self {
        Self::with_source(Arc::new(SystemLimit), log)
    }

    pub fn with_source(source: Arc<dyn DescriptorLimit>, log: Arc<dyn ScanLog>) -> Self {
        Self { source, log }
    }

    /// Effective concurrency for a scan, always at least 1
    pub fn effective_concurrency(&self, requested: usize) -> usize {
        match self.source.soft_limit() {
            Ok(ceiling) => {
                let effective = clamp_to_ceiling(requested, ceiling);
                if effective < requested {
                    self.log.warn(format_args!(
                        "Requested concurrency {} exceeds the descriptor limit {}, using {}",
                        requested, ceiling, effective
                    ));
                } else {
                    self.log.debug(format_args!(
                        "Descriptor limit {} allows concurrency {}",
                        ceiling, effective
                    ));
                }
                effective
            }
            Err(e) => {
                self.log.warn(format_args!(
                    "Could not read the descriptor limit ({}), using requested concurrency {}",
                    e, requested
                ));
                requested.max(1)
            }
        }
    }

    /// Ask for a larger soft limit before scanning.
    ///
    /// Failure is only logged. Returns the soft limit in effect afterwards when
    /// it can be read.
    pub fn raise_soft_limit(&self, target: u64) -> Option<u64> {
        match self.source.raise_soft_limit(target) {
            Ok(limit) => {
                self.log.info(format_args!("Descriptor limit set to {}", limit));
                Some(limit)
            }
            Err(e) => {
                self.log.warn(format_args!(
                    "Failed to raise the descriptor limit to {}: {}",
                    target, e
                ));
                self.source.soft_limit().ok()
            }
        }
    }
}

impl std::fmt::Debug for ResourceLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceLimiter").finish_non_exhaustive()
    }
}
