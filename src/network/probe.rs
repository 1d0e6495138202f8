//! TCP connect probe

use crate::core::PortProber;
use crate::error::ProbeFailure;
use crate::network::{BannerGrabber, PortResult};
use crate::utils::logging::ScanLog;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;

/// Full-handshake liveness check for one port, with optional banner capture
#[derive(Clone)]
pub struct TcpProbe {
    timeout: Duration,
    banner: Option<BannerGrabber>,
    log: Arc<dyn ScanLog>,
}

impl TcpProbe {
    pub fn new(timeout: Duration, log: Arc<dyn ScanLog>) -> Self {
        Self {
            timeout,
            banner: None,
            log,
        }
    }

    /// Capture `Server` headers from ports found open
    pub fn with_banner(mut self, grabber: BannerGrabber) -> Self {
        self.banner = Some(grabber);
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Resolve `host` and connect to `port` within the timeout.
    ///
    /// The stream is dropped as soon as the handshake completes.
    pub async fn connect(&self, host: &str, port: u16) -> Result<SocketAddr, ProbeFailure> {
        let addr = resolve_ipv4(host, port).await?;
        match tokio::time::timeout(self.timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => {
                drop(stream);
                Ok(addr)
            }
            Ok(Err(e)) => Err(ProbeFailure::from(e)),
            Err(_) => Err(ProbeFailure::TimedOut),
        }
    }
}

#[async_trait]
impl PortProber for TcpProbe {
    async fn probe(&self, host: &str, port: u16) -> PortResult {
        match self.connect(host, port).await {
            Ok(addr) => {
                self.log.debug(format_args!("Open {}", addr));
                let banners = match &self.banner {
                    Some(grabber) => grabber.grab(host, port).await,
                    None => Vec::new(),
                };
                PortResult::open(port, banners)
            }
            Err(failure) if failure.is_expected() => {
                self.log.debug(format_args!("{}:{} closed: {}", host, port, failure));
                PortResult::closed(port)
            }
            Err(failure) => {
                self.log.error(format_args!("{}:{} probe failed: {}", host, port, failure));
                PortResult::closed(port)
            }
        }
    }
}

impl std::fmt::Debug for TcpProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpProbe")
            .field("timeout", &self.timeout)
            .field("banner", &self.banner.is_some())
            .finish()
    }
}

/// First IPv4 address of `host:port`. IP literals skip the resolver.
pub async fn resolve_ipv4(host: &str, port: u16) -> Result<SocketAddr, ProbeFailure> {
    let mut addrs = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| ProbeFailure::Resolve {
            host: host.to_string(),
            reason: e.to_string(),
        })?;
    addrs
        .find(SocketAddr::is_ipv4)
        .ok_or_else(|| ProbeFailure::NoIpv4Address {
            host: host.to_string(),
        })
}
