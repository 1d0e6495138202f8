// Prober seam between the scheduler and the network code

use crate::config::ScanConfig;
use crate::network::{BannerGrabber, PortResult, TcpProbe};
use crate::utils::logging::ScanLog;
use async_trait::async_trait;
use std::sync::Arc;

/// Anything that can classify one port of one host.
///
/// A prober never fails: every outcome, including resolver or socket trouble,
/// is folded into the returned `PortResult`.
#[async_trait]
pub trait PortProber: Send + Sync {
    async fn probe(&self, host: &str, port: u16) -> PortResult;
}

/// Builds the prober a scan configuration asks for
pub struct ProberFactory;

impl ProberFactory {
    /// TCP connect probe, plus the HTTP banner grabber when `capture_banner` is set
    pub fn from_config(config: &ScanConfig, log: Arc<dyn ScanLog>) -> crate::Result<Arc<dyn PortProber>> {
        let probe = TcpProbe::new(config.timeout_duration(), log.clone());
        let probe = if config.capture_banner {
            probe.with_banner(BannerGrabber::new(config.banner_timeout_duration(), log)?)
        } else {
            probe
        };
        Ok(Arc::new(probe))
    }
}
