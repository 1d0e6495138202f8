//! HTTP `Server` header capture for open ports
//!
//! Best effort only: any failure yields an empty banner list. A port that
//! answers a plaintext request with a TLS record, or drops it without sending
//! a byte, gets one retry over HTTPS.

use crate::utils::logging::ScanLog;
use crate::ScanError;
use reqwest::header::{HeaderMap, SERVER};
use reqwest::redirect::Policy;
use reqwest::Client;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// TLS record content types a server sends in reply to garbage: alert, handshake
const TLS_ALERT: u8 = 0x15;
const TLS_HANDSHAKE: u8 = 0x16;
const TLS_MAJOR_VERSION: u8 = 0x03;

const SNIFF_REQUEST: &[u8] = b"GET / HTTP/1.0\r\n\r\n";

/// How a port answered a bare plaintext request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SniffReply {
    /// A TLS record header came back
    Tls,
    /// Closed or reset before the first byte, as OpenSSL-based servers do
    Silent,
    /// Anything else, most likely a plaintext protocol
    Plain,
}

impl SniffReply {
    /// Classify the first bytes read back
    pub fn from_head(head: &[u8]) -> Self {
        if looks_like_tls(head) {
            SniffReply::Tls
        } else if head.is_empty() {
            SniffReply::Silent
        } else {
            SniffReply::Plain
        }
    }

    /// Classify a socket error hit before any byte arrived
    pub fn from_error(err: &io::Error) -> Option<Self> {
        match err.kind() {
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof => Some(SniffReply::Silent),
            _ => None,
        }
    }

    /// Whether the port is worth one HTTPS attempt
    pub fn suggests_tls(self) -> bool {
        matches!(self, SniffReply::Tls | SniffReply::Silent)
    }
}

/// Fetches `Server` headers over HTTP, falling back to HTTPS for TLS-only ports
#[derive(Clone)]
pub struct BannerGrabber {
    client: Client,
    timeout: Duration,
    log: Arc<dyn ScanLog>,
}

impl BannerGrabber {
    /// Build a grabber whose requests are bounded by `timeout`.
    ///
    /// Redirects are not followed, proxies are ignored and connections are not
    /// kept idle, so every request releases its socket when it finishes.
    pub fn new(timeout: Duration, log: Arc<dyn ScanLog>) -> crate::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .redirect(Policy::none())
            .pool_max_idle_per_host(0)
            .no_proxy()
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| ScanError::NetworkError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            timeout,
            log,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Every `Server` header value served on `host:port`, in received order
    pub async fn grab(&self, host: &str, port: u16) -> Vec<String> {
        let plain_url = format!("http://{}:{}/", host, port);
        let plain_err = match self.fetch(&plain_url).await {
            Ok(banners) => return banners,
            Err(e) => e,
        };

        if plain_err.is_timeout() {
            self.log.debug(format_args!("No banner from {}: {}", plain_url, plain_err));
            return Vec::new();
        }
        let reply = match self.sniff(host, port).await {
            Some(reply) if reply.suggests_tls() => reply,
            reply => {
                self.log.debug(format_args!(
                    "No banner from {}: {} (sniff: {:?})",
                    plain_url, plain_err, reply
                ));
                return Vec::new();
            }
        };

        let tls_url = format!("https://{}:{}/", host, port);
        self.log.debug(format_args!(
            "{} looks like TLS ({:?}), retrying {}",
            plain_url, reply, tls_url
        ));
        match self.fetch(&tls_url).await {
            Ok(banners) => banners,
            Err(e) => {
                self.log.info(format_args!("No banner from {}: {}", tls_url, e));
                Vec::new()
            }
        }
    }

    async fn fetch(&self, url: &str) -> reqwest::Result<Vec<String>> {
        let response = self.client.get(url).send().await?;
        Ok(server_headers(response.headers()))
    }

    /// Send a bare HTTP request on a fresh connection and classify what comes back.
    ///
    /// `None` when the port could not be reached or stayed quiet past the timeout.
    async fn sniff(&self, host: &str, port: u16) -> Option<SniffReply> {
        let sniff = async {
            let mut stream = TcpStream::connect((host, port)).await?;
            if let Err(e) = stream.write_all(SNIFF_REQUEST).await {
                return Ok(SniffReply::from_error(&e));
            }
            let mut head = [0u8; 2];
            let mut read = 0;
            while read < head.len() {
                match stream.read(&mut head[read..]).await {
                    Ok(0) => break,
                    Ok(n) => read += n,
                    Err(e) if read == 0 => return Ok(SniffReply::from_error(&e)),
                    Err(_) => break,
                }
            }
            Ok::<_, io::Error>(Some(SniffReply::from_head(&head[..read])))
        };

        match tokio::time::timeout(self.timeout, sniff).await {
            Ok(Ok(reply)) => reply,
            _ => None,
        }
    }
}

impl std::fmt::Debug for BannerGrabber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BannerGrabber")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Whether `head` starts like a TLS record (alert or handshake, version 3.x)
pub fn looks_like_tls(head: &[u8]) -> bool {
    matches!(head, [TLS_ALERT | TLS_HANDSHAKE, TLS_MAJOR_VERSION, ..])
}

/// All `Server` values of a response, non-UTF-8 bytes replaced
pub fn server_headers(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(SERVER)
        .iter()
        .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
        .collect()
}
