//! Function-invocation front end
//!
//! Each request is one JSON object naming a host and either a single `port`
//! or a list of `ports` ranges. The response is the rendered scan report. The
//! stdio loop takes newline-delimited requests and answers each on one line.

use crate::config::{PortRange, ScanConfig, ScanTarget, DEFAULT_TIMEOUT_MS};
use crate::output::{OutputConfig, OutputManager, ScanReport};
use crate::scanner::ScanEngine;
use crate::utils::logging::{self, ScanLog};
use crate::ScanError;
use serde::Deserialize;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

/// Incoming scan request
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct InvocationRequest {
    pub host: String,
    /// Single port; 0 counts as unset
    pub port: Option<u16>,
    /// `[start, stop)` pairs
    pub ports: Vec<PortRange>,
    /// Values below 1 are raised to 1
    pub concurrency: Option<i64>,
    /// Connect timeout in milliseconds; missing or 0 means the default
    pub timeout: Option<u64>,
}

impl InvocationRequest {
    /// Validate the request and turn it into a target and configuration
    pub fn into_scan(self) -> crate::Result<(ScanTarget, ScanConfig)> {
        let port = self.port.filter(|&port| port != 0);
        let ranges = match (port, self.ports.is_empty()) {
            (None, true) => return Err(ScanError::ConfigError("port(s) not set".to_string())),
            (Some(_), false) => {
                return Err(ScanError::ConfigError("set only port or ports".to_string()))
            }
            (Some(port), true) => vec![PortRange::single(port)?],
            (None, false) => self.ports,
        };
        let target = ScanTarget::new(self.host, ranges)?;

        let concurrency = self.concurrency.unwrap_or(1).max(1);
        let config = ScanConfig::default()
            .with_concurrency(usize::try_from(concurrency).unwrap_or(usize::MAX))
            .with_timeout(self.timeout.filter(|&t| t != 0).unwrap_or(DEFAULT_TIMEOUT_MS))
            .with_show_progress(false);
        config.validate()?;

        Ok((target, config))
    }
}

/// Run one request and render its report as compact JSON
pub async fn handle_request(request: InvocationRequest) -> crate::Result<String> {
    handle_request_with_logger(request, logging::facade()).await
}

pub async fn handle_request_with_logger(
    request: InvocationRequest,
    log: Arc<dyn ScanLog>,
) -> crate::Result<String> {
    let (target, config) = request.into_scan()?;
    let engine = ScanEngine::with_logger(config.clone(), log)?;
    let result = engine.scan(&target).await;
    let report = ScanReport::new(&target, &config, &result);
    OutputManager::new(OutputConfig::default()).render(&report)
}

/// Answer newline-delimited requests from `input` until it is exhausted.
///
/// A bad request produces `{"error": "..."}` on its line; only I/O failures on
/// the streams themselves end the loop with an error.
pub async fn serve<R, W>(input: R, mut output: W) -> crate::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<InvocationRequest>(&line) {
            Ok(request) => match handle_request(request).await {
                Ok(report) => report,
                Err(e) => error_document(&e),
            },
            Err(e) => error_document(&ScanError::ParseError(format!("invalid request: {}", e))),
        };

        output.write_all(response.as_bytes()).await?;
        output.write_all(b"\n").await?;
        output.flush().await?;
    }
    Ok(())
}

/// Serve requests on the process's stdin and stdout
pub async fn serve_stdio() -> crate::Result<()> {
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    serve(stdin, tokio::io::stdout()).await
}

fn error_document(err: &ScanError) -> String {
    log::error!("Request failed: {}", err);
    serde_json::json!({ "error": err.to_string() }).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(json: &str) -> InvocationRequest {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn single_port_becomes_one_port_range() {
        let (target, config) = request(r#"{"host": "127.0.0.1", "port": 443}"#)
            .into_scan()
            .unwrap();
        assert_eq!(target.ports().collect::<Vec<_>>(), vec![443]);
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.timeout, DEFAULT_TIMEOUT_MS);
        assert!(!config.show_progress);
    }

    #[test]
    fn ranges_and_tuning_are_kept() {
        let (target, config) = request(
            r#"{"host": "10.0.0.1", "ports": [[20, 26], [80, 81]], "concurrency": 64, "timeout": 300}"#,
        )
        .into_scan()
        .unwrap();
        assert_eq!(target.total_ports(), 7);
        assert_eq!(config.concurrency, 64);
        assert_eq!(config.timeout, 300);
    }

    #[test]
    fn non_positive_concurrency_raised_to_one() {
        let (_, config) = request(r#"{"host": "h", "port": 1, "concurrency": -5}"#)
            .into_scan()
            .unwrap();
        assert_eq!(config.concurrency, 1);
    }

    #[test]
    fn port_and_ports_are_exclusive() {
        let err = request(r#"{"host": "h", "port": 80, "ports": [[1, 2]]}"#)
            .into_scan()
            .unwrap_err();
        assert!(err.to_string().contains("set only port or ports"));
    }

    #[test]
    fn missing_ports_rejected() {
        let err = request(r#"{"host": "h", "port": 0}"#).into_scan().unwrap_err();
        assert!(err.to_string().contains("port(s) not set"));
    }

    #[test]
    fn blank_host_rejected() {
        let err = request(r#"{"port": 80}"#).into_scan().unwrap_err();
        assert!(matches!(err, ScanError::InvalidTarget(_)));
    }

    #[test]
    fn inverted_range_fails_to_deserialize() {
        assert!(serde_json::from_str::<InvocationRequest>(r#"{"host": "h", "ports": [[30, 20]]}"#).is_err());
    }
}
