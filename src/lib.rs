//! tcpscan - concurrent TCP connect scanner with HTTP banner capture
//!
//! Every port of a target is probed with a full TCP handshake. Ports that
//! accept a connection get a short HTTP request so the `Server` header of
//! web services can be recorded alongside the open port.

pub mod config;
pub mod core;
pub mod error;
pub mod handler;
pub mod network;
pub mod output;
pub mod scanner;
pub mod utils;

// Re-export commonly used types
pub use config::{PortRange, ScanConfig, ScanTarget};
pub use crate::core::PortProber;
pub use error::{ProbeFailure, ScanError};
pub use network::PortResult;
pub use scanner::{ScanEngine, ScanResult};

pub type Result<T> = std::result::Result<T, ScanError>;
