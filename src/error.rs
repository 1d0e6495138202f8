//! Error handling for the tcpscan scanner
//!
//! Only configuration problems surface as `ScanError` from a scan. Everything
//! that goes wrong while probing a single port is classified as a
//! `ProbeFailure` and folded into the result data instead.

use std::io;
use thiserror::Error;

/// Main error type for scanning operations
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Port range error: {0}")]
    PortRangeError(String),

    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Output error: {0}")]
    OutputError(String),
}

impl ScanError {
    /// Whether the error was raised while validating input, before any socket was opened
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ScanError::ConfigError(_)
                | ScanError::PortRangeError(_)
                | ScanError::InvalidTarget(_)
                | ScanError::ParseError(_)
        )
    }
}

impl From<serde_json::Error> for ScanError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_io() {
            ScanError::OutputError(err.to_string())
        } else {
            ScanError::ParseError(err.to_string())
        }
    }
}

impl From<toml::de::Error> for ScanError {
    fn from(err: toml::de::Error) -> Self {
        ScanError::ConfigError(format!("Failed to parse TOML: {}", err))
    }
}

/// Why a single connect attempt did not produce an open port
#[derive(Debug, Error)]
pub enum ProbeFailure {
    #[error("connection refused")]
    Refused,

    #[error("connect timed out")]
    TimedOut,

    #[error("failed to resolve {host}: {reason}")]
    Resolve { host: String, reason: String },

    #[error("{host} has no IPv4 address")]
    NoIpv4Address { host: String },

    #[error("connect failed: {0}")]
    Connect(io::Error),
}

impl ProbeFailure {
    /// Refusals and timeouts are the normal answer of a closed or filtered port.
    /// Everything else points at the network or the resolver.
    pub fn is_expected(&self) -> bool {
        matches!(self, ProbeFailure::Refused | ProbeFailure::TimedOut)
    }
}

impl From<io::Error> for ProbeFailure {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionRefused => ProbeFailure::Refused,
            io::ErrorKind::TimedOut => ProbeFailure::TimedOut,
            _ => ProbeFailure::Connect(err),
        }
    }
}
