//! Configuration module for the tcpscan scanner

use crate::ScanError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// One past the highest TCP port, so `1-65536` covers the whole port space.
pub const PORT_SPACE_END: u32 = 65_536;

/// Default connect timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 2000;

/// Default number of concurrent connection attempts
pub const DEFAULT_CONCURRENCY: usize = 8;

/// Default target host
pub const DEFAULT_HOST: &str = "localhost";

/// A half-open port interval: `start` is scanned, `end` is not.
///
/// `20-25` covers 20, 21, 22, 23 and 24. `start == end` is a valid empty range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "[u32; 2]", try_from = "[u32; 2]")]
pub struct PortRange {
    start: u32,
    end: u32,
}

impl PortRange {
    /// Create a range, checking `1 <= start <= end <= 65536`
    pub fn new(start: u32, end: u32) -> crate::Result<Self> {
        if start == 0 {
            return Err(ScanError::PortRangeError(format!(
                "port 0 cannot be scanned (range {}-{})",
                start, end
            )));
        }
        if end < start {
            return Err(ScanError::PortRangeError(format!(
                "stop port {} is lower than start port {}",
                end, start
            )));
        }
        if end > PORT_SPACE_END {
            return Err(ScanError::PortRangeError(format!(
                "stop port {} is beyond {}",
                end, PORT_SPACE_END
            )));
        }
        Ok(Self { start, end })
    }

    /// Range holding exactly one port
    pub fn single(port: u16) -> crate::Result<Self> {
        Self::new(u32::from(port), u32::from(port) + 1)
    }

    pub fn start(&self) -> u32 {
        self.start
    }

    pub fn end(&self) -> u32 {
        self.end
    }

    /// Number of ports in the range
    pub fn len(&self) -> u64 {
        u64::from(self.end - self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Iterate over every port in the range
    pub fn ports(&self) -> impl Iterator<Item = u16> {
        // end <= 65536 so every yielded value fits in a u16
        (self.start..self.end).map(|port| port as u16)
    }
}

impl FromStr for PortRange {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (start, stop) = s.trim().split_once('-').ok_or_else(|| {
            ScanError::PortRangeError(format!("expected start-stop, got '{}'", s.trim()))
        })?;
        let start = parse_port_bound(start, s)?;
        let stop = parse_port_bound(stop, s)?;
        Self::new(start, stop)
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

impl From<PortRange> for [u32; 2] {
    fn from(range: PortRange) -> Self {
        [range.start, range.end]
    }
}

impl TryFrom<[u32; 2]> for PortRange {
    type Error = ScanError;

    fn try_from(bounds: [u32; 2]) -> Result<Self, Self::Error> {
        Self::new(bounds[0], bounds[1])
    }
}

fn parse_port_bound(value: &str, whole: &str) -> crate::Result<u32> {
    value.trim().parse::<u32>().map_err(|e| {
        ScanError::PortRangeError(format!("invalid port '{}' in '{}': {}", value.trim(), whole.trim(), e))
    })
}

/// Host plus the port ranges to probe on it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawScanTarget")]
pub struct ScanTarget {
    host: String,
    port_ranges: Vec<PortRange>,
}

/// Unchecked wire form of `ScanTarget`
#[derive(Deserialize)]
struct RawScanTarget {
    host: String,
    #[serde(default)]
    port_ranges: Vec<PortRange>,
}

impl TryFrom<RawScanTarget> for ScanTarget {
    type Error = ScanError;

    fn try_from(raw: RawScanTarget) -> Result<Self, Self::Error> {
        Self::new(raw.host, raw.port_ranges)
    }
}

impl ScanTarget {
    /// Create a target, rejecting a blank host
    pub fn new(host: impl Into<String>, port_ranges: Vec<PortRange>) -> crate::Result<Self> {
        let host = host.into().trim().to_string();
        if host.is_empty() {
            return Err(ScanError::InvalidTarget("Empty hostname string".to_string()));
        }
        Ok(Self { host, port_ranges })
    }

    /// Target covering a single port
    pub fn single_port(host: impl Into<String>, port: u16) -> crate::Result<Self> {
        Self::new(host, vec![PortRange::single(port)?])
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port_ranges(&self) -> &[PortRange] {
        &self.port_ranges
    }

    /// Total number of probe tasks, counting overlapping ranges twice
    pub fn total_ports(&self) -> u64 {
        self.port_ranges.iter().map(PortRange::len).sum()
    }

    /// Every port of every range, in range order
    pub fn ports(&self) -> impl Iterator<Item = u16> + '_ {
        self.port_ranges.iter().flat_map(PortRange::ports)
    }
}

/// Scan tuning knobs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Requested number of concurrent connection attempts, clamped before use
    pub concurrency: usize,

    /// Connect timeout in milliseconds
    pub timeout: u64,

    /// Banner fetch timeout in milliseconds, falls back to `timeout`
    pub banner_timeout: Option<u64>,

    /// Fetch the HTTP `Server` header of open ports
    pub capture_banner: bool,

    /// Draw a progress bar on stderr
    pub show_progress: bool,

    /// Soft descriptor limit to request before scanning
    pub ulimit: Option<u64>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            timeout: DEFAULT_TIMEOUT_MS,
            banner_timeout: None,
            capture_banner: true,
            show_progress: false,
            ulimit: None,
        }
    }
}

impl ScanConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the requested concurrency
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Set the connect timeout in milliseconds
    pub fn with_timeout(mut self, timeout: u64) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the banner fetch timeout in milliseconds
    pub fn with_banner_timeout(mut self, timeout: u64) -> Self {
        self.banner_timeout = Some(timeout);
        self
    }

    pub fn with_capture_banner(mut self, capture: bool) -> Self {
        self.capture_banner = capture;
        self
    }

    pub fn with_show_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn with_ulimit(mut self, ulimit: u64) -> Self {
        self.ulimit = Some(ulimit);
        self
    }

    /// Get timeout as Duration
    pub fn timeout_duration(&self) -> Duration {
        Duration::from_millis(self.timeout)
    }

    /// Get the banner timeout as Duration
    pub fn banner_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.banner_timeout.unwrap_or(self.timeout))
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.concurrency == 0 {
            return Err(ScanError::ConfigError(
                "Concurrency must be greater than 0".to_string(),
            ));
        }
        if self.timeout == 0 {
            return Err(ScanError::ConfigError(
                "Timeout must be greater than 0".to_string(),
            ));
        }
        if self.banner_timeout == Some(0) {
            return Err(ScanError::ConfigError(
                "Banner timeout must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Defaults read from a TOML file. Command line flags take precedence.
///
/// ```toml
/// host = "10.0.0.5"
/// ports = [[20, 26], [8000, 8100]]
/// concurrency = 512
/// timeout = 800
/// capture_banner = false
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub host: Option<String>,
    #[serde(default)]
    pub ports: Vec<PortRange>,
    pub concurrency: Option<usize>,
    pub timeout: Option<u64>,
    pub banner_timeout: Option<u64>,
    pub capture_banner: Option<bool>,
    pub show_progress: Option<bool>,
    pub ulimit: Option<u64>,
}

impl ConfigFile {
    /// Load configuration from TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            ScanError::ConfigError(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> crate::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Location of the per-user defaults file, `~/.tcpscan.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".tcpscan.toml"))
    }

    /// Load `~/.tcpscan.toml` if it exists
    pub fn load_default() -> crate::Result<Option<Self>> {
        match Self::default_path() {
            Some(path) if path.exists() => {
                log::info!("Loading defaults from {}", path.display());
                Self::from_toml_file(&path).map(Some)
            }
            _ => Ok(None),
        }
    }

    /// Overlay the values present in the file onto `config`
    pub fn apply_to(&self, config: &mut ScanConfig) {
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(timeout) = self.timeout {
            config.timeout = timeout;
        }
        if self.banner_timeout.is_some() {
            config.banner_timeout = self.banner_timeout;
        }
        if let Some(capture) = self.capture_banner {
            config.capture_banner = capture;
        }
        if let Some(show) = self.show_progress {
            config.show_progress = show;
        }
        if self.ulimit.is_some() {
            config.ulimit = self.ulimit;
        }
    }
}
