//! Output formatting and management

use crate::config::{PortRange, ScanConfig, ScanTarget};
use crate::scanner::{ProgressObserver, ScanResult};
use crate::ScanError;
use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;

/// The JSON document a scan is rendered to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ScanReport {
    pub host: String,
    pub port_range: Vec<PortRange>,
    /// Open port to captured `Server` values
    pub headers: BTreeMap<u16, Vec<String>>,
    /// Effective concurrency, after clamping
    pub concurrency: usize,
    /// Connect timeout in milliseconds
    pub timeout: u64,
    pub show_progress: bool,
    pub total_ports: u64,
    pub completed: u64,
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
}

impl ScanReport {
    pub fn new(target: &ScanTarget, config: &ScanConfig, result: &ScanResult) -> Self {
        Self {
            host: result.host().to_string(),
            port_range: target.port_ranges().to_vec(),
            headers: result.headers(),
            concurrency: result.concurrency(),
            timeout: config.timeout,
            show_progress: config.show_progress,
            total_ports: result.total_ports(),
            completed: result.completed(),
            cancelled: result.is_cancelled(),
            started_at: result.started_at(),
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Default)]
pub struct OutputConfig {
    pub pretty: bool,
    pub file: Option<PathBuf>,
}

/// Main output manager
pub struct OutputManager {
    config: OutputConfig,
}

impl OutputManager {
    pub fn new(config: OutputConfig) -> Self {
        Self { config }
    }

    /// Render a report as a single JSON document
    pub fn render(&self, report: &ScanReport) -> crate::Result<String> {
        let json = if self.config.pretty {
            serde_json::to_string_pretty(report)
        } else {
            serde_json::to_string(report)
        };
        json.map_err(|e| ScanError::OutputError(e.to_string()))
    }

    /// Write the report to the configured file, or stdout
    pub fn write_report(&self, report: &ScanReport) -> crate::Result<()> {
        let output = self.render(report)?;
        match &self.config.file {
            Some(path) => {
                let mut file = File::create(path).map_err(|e| {
                    ScanError::OutputError(format!("Failed to create {}: {}", path.display(), e))
                })?;
                writeln!(file, "{}", output)?;
            }
            None => {
                let stdout = io::stdout();
                let mut handle = stdout.lock();
                writeln!(handle, "{}", output)?;
                handle.flush()?;
            }
        }
        Ok(())
    }
}

/// Progress bar on stderr, one tick per finished port
#[derive(Clone)]
pub struct TerminalProgress {
    bar: ProgressBar,
}

impl TerminalProgress {
    pub fn new() -> Self {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} ports ({per_sec}, ETA {eta})",
        )
        .map(|style| style.progress_chars("=> "))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
        bar.set_style(style);
        Self { bar }
    }

    /// Wrap an existing bar, e.g. a hidden one
    pub fn with_bar(bar: ProgressBar) -> Self {
        Self { bar }
    }

    pub fn position(&self) -> u64 {
        self.bar.position()
    }
}

impl Default for TerminalProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressObserver for TerminalProgress {
    fn on_start(&self, total: u64) {
        self.bar.set_length(total);
        self.bar.set_position(0);
    }

    fn on_task_complete(&self, completed: u64, _total: u64) {
        self.bar.set_position(completed);
    }

    fn on_finish(&self, completed: u64, _total: u64) {
        self.bar.set_position(completed);
        self.bar.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hidden_bar_follows_completions() {
        let progress = TerminalProgress::with_bar(ProgressBar::hidden());
        progress.on_start(10);
        progress.on_task_complete(1, 10);
        progress.on_task_complete(2, 10);
        assert_eq!(progress.position(), 2);

        progress.on_finish(10, 10);
        assert_eq!(progress.position(), 10);
    }

    #[test]
    fn report_uses_pascal_case_keys() {
        let report = ScanReport {
            host: "127.0.0.1".to_string(),
            port_range: vec![PortRange::new(8080, 8082).unwrap()],
            headers: BTreeMap::from([(8080, vec!["test-banner".to_string()])]),
            concurrency: 4,
            timeout: 500,
            show_progress: false,
            total_ports: 2,
            completed: 2,
            cancelled: false,
            started_at: Utc::now(),
        };

        let json = OutputManager::new(OutputConfig::default()).render(&report).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["Host"], "127.0.0.1");
        assert_eq!(value["PortRange"], serde_json::json!([[8080, 8082]]));
        assert_eq!(value["Headers"]["8080"], serde_json::json!(["test-banner"]));
        assert_eq!(value["Concurrency"], 4);
        assert_eq!(value["Timeout"], 500);
        assert!(!json.contains('\n'));
    }

    #[test]
    fn pretty_output_spans_lines() {
        let report = ScanReport {
            host: "h".to_string(),
            port_range: Vec::new(),
            headers: BTreeMap::new(),
            concurrency: 1,
            timeout: 1,
            show_progress: true,
            total_ports: 0,
            completed: 0,
            cancelled: false,
            started_at: Utc::now(),
        };
        let manager = OutputManager::new(OutputConfig {
            pretty: true,
            file: None,
        });
        let json = manager.render(&report).unwrap();
        assert!(json.contains("\n  \"Headers\": {}"));
    }

    #[test]
    fn report_written_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        let report = ScanReport {
            host: "h".to_string(),
            port_range: Vec::new(),
            headers: BTreeMap::from([(22, Vec::new())]),
            concurrency: 1,
            timeout: 1,
            show_progress: false,
            total_ports: 1,
            completed: 1,
            cancelled: false,
            started_at: Utc::now(),
        };

        OutputManager::new(OutputConfig {
            pretty: false,
            file: Some(path.clone()),
        })
        .write_report(&report)
        .unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        let parsed: ScanReport = serde_json::from_str(written.trim()).unwrap();
        assert_eq!(parsed, report);
    }
}
