//! Network module: TCP connect probing and HTTP banner capture

pub mod banner;
pub mod probe;

use serde::{Deserialize, Serialize};

pub use banner::BannerGrabber;
pub use probe::TcpProbe;

/// Outcome of probing a single port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortResult {
    port: u16,
    open: bool,
    banners: Vec<String>,
}

impl PortResult {
    /// An open port with the `Server` header values captured on it
    pub fn open(port: u16, banners: Vec<String>) -> Self {
        Self {
            port,
            open: true,
            banners,
        }
    }

    /// A closed or filtered port
    pub fn closed(port: u16) -> Self {
        Self {
            port,
            open: false,
            banners: Vec::new(),
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn banners(&self) -> &[String] {
        &self.banners
    }
}
