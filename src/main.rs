use anyhow::Context;
use clap::{Arg, ArgAction, ArgMatches, Command};
use colored::*;
use std::path::PathBuf;
use std::process;

use tcpscan::{
    config::{ConfigFile, PortRange, ScanConfig, ScanTarget, DEFAULT_HOST},
    handler,
    output::{OutputConfig, OutputManager, ScanReport},
    utils::Logger,
    ScanEngine, ScanError,
};
use tokio_util::sync::CancellationToken;

/// Environment variable that switches from the invocation loop to the CLI
const CONSOLE_ENV: &str = "console";

fn build_cli() -> Command {
    Command::new("tcpscan")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Concurrent TCP connect scanner that records HTTP Server banners")
        .arg(
            Arg::new("host")
                .long("host")
                .value_name("HOST")
                .help("Host to scan [default: localhost]"),
        )
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .value_name("PORT")
                .help("Single port to scan")
                .value_parser(clap::value_parser!(u16).range(1..))
                .conflicts_with("ports"),
        )
        .arg(
            Arg::new("ports")
                .long("ports")
                .value_name("START-STOP")
                .help("Port range to scan, stop excluded (20-25 scans 20..24). Repeatable")
                .value_parser(clap::value_parser!(PortRange))
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("thread")
                .short('t')
                .long("thread")
                .value_name("N")
                .help("Concurrent connection attempts [default: 8]")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("timeout")
                .long("timeout")
                .value_name("MS")
                .help("Connect timeout in milliseconds [default: 2000]")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("banner-timeout")
                .long("banner-timeout")
                .value_name("MS")
                .help("HTTP banner timeout in milliseconds [default: --timeout]")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("no-banner")
                .long("no-banner")
                .help("Skip HTTP banner capture on open ports")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("no-progress")
                .long("no-progress")
                .help("Hide the progress bar")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("ulimit")
                .short('u')
                .long("ulimit")
                .value_name("LIMIT")
                .help("Raise the soft file descriptor limit to this value before scanning")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("TOML file with default settings [default: ~/.tcpscan.toml]")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("FILE")
                .help("Write the JSON report to FILE instead of stdout")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("pretty")
                .long("pretty")
                .help("Pretty-print the JSON report")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Increase log verbosity (-v info, -vv debug, -vvv trace)")
                .action(ArgAction::Count),
        )
}

/// Merge built-in defaults, the config file and the command line, in that order
fn resolve_scan(
    matches: &ArgMatches,
    file: Option<&ConfigFile>,
) -> tcpscan::Result<(ScanTarget, ScanConfig)> {
    let mut config = ScanConfig::default().with_show_progress(true);
    if let Some(file) = file {
        file.apply_to(&mut config);
    }

    if let Some(&thread) = matches.get_one::<usize>("thread") {
        config.concurrency = thread;
    }
    if let Some(&timeout) = matches.get_one::<u64>("timeout") {
        config.timeout = timeout;
    }
    if let Some(&timeout) = matches.get_one::<u64>("banner-timeout") {
        config.banner_timeout = Some(timeout);
    }
    if let Some(&ulimit) = matches.get_one::<u64>("ulimit") {
        config.ulimit = Some(ulimit);
    }
    if matches.get_flag("no-banner") {
        config.capture_banner = false;
    }
    if matches.get_flag("no-progress") {
        config.show_progress = false;
    }
    config.validate()?;

    let host = matches
        .get_one::<String>("host")
        .cloned()
        .or_else(|| file.and_then(|f| f.host.clone()))
        .unwrap_or_else(|| DEFAULT_HOST.to_string());

    let flag_ranges: Vec<PortRange> = matches
        .get_many::<PortRange>("ports")
        .map(|ranges| ranges.copied().collect())
        .unwrap_or_default();
    let ranges = match matches.get_one::<u16>("port") {
        Some(&port) => vec![PortRange::single(port)?],
        None if !flag_ranges.is_empty() => flag_ranges,
        None => match file {
            Some(file) if !file.ports.is_empty() => file.ports.clone(),
            _ => {
                return Err(ScanError::ConfigError(
                    "one of --port or --ports is required".to_string(),
                ))
            }
        },
    };

    Ok((ScanTarget::new(host, ranges)?, config))
}

fn load_config_file(matches: &ArgMatches) -> tcpscan::Result<Option<ConfigFile>> {
    match matches.get_one::<PathBuf>("config") {
        Some(path) => ConfigFile::from_toml_file(path).map(Some),
        None => ConfigFile::load_default(),
    }
}

async fn run_cli() -> anyhow::Result<()> {
    let matches = build_cli().get_matches();
    Logger::init(Logger::level_for_verbosity(matches.get_count("verbose")));

    let file = load_config_file(&matches)?;
    let (target, config) = resolve_scan(&matches, file.as_ref())?;
    let engine = ScanEngine::new(config.clone())?;

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let result = engine.scan_with_cancel(&target, cancel).await;
    if result.is_cancelled() {
        eprintln!(
            "{} {}/{} ports probed before interruption",
            "[~]".bright_yellow(),
            result.completed(),
            result.total_ports()
        );
    }

    let report = ScanReport::new(&target, &config, &result);
    let output = OutputManager::new(OutputConfig {
        pretty: matches.get_flag("pretty"),
        file: matches.get_one::<PathBuf>("output").cloned(),
    });
    output.write_report(&report).context("failed to write scan report")?;

    Ok(())
}

async fn run_handler() -> anyhow::Result<()> {
    Logger::init(log::LevelFilter::Warn);
    handler::serve_stdio()
        .await
        .context("invocation loop stopped")?;
    Ok(())
}

fn console_mode() -> bool {
    std::env::var(CONSOLE_ENV)
        .map(|value| !value.trim().is_empty())
        .unwrap_or(false)
}

#[tokio::main]
async fn main() {
    let outcome = if console_mode() {
        run_cli().await
    } else {
        run_handler().await
    };

    if let Err(e) = outcome {
        eprintln!("{} {}", "[!]".bright_red(), format!("{:#}", e).bright_red());
        let configuration = e
            .downcast_ref::<ScanError>()
            .map_or(false, ScanError::is_configuration);
        process::exit(if configuration { 2 } else { 1 });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> ArgMatches {
        build_cli().try_get_matches_from(args).unwrap()
    }

    #[test]
    fn defaults_apply_without_flags_or_file() {
        let matches = parse(&["tcpscan", "--port", "80"]);
        let (target, config) = resolve_scan(&matches, None).unwrap();
        assert_eq!(target.host(), DEFAULT_HOST);
        assert_eq!(target.ports().collect::<Vec<_>>(), vec![80]);
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.timeout, 2000);
        assert!(config.show_progress);
        assert!(config.capture_banner);
    }

    #[test]
    fn repeated_ranges_keep_order() {
        let matches = parse(&["tcpscan", "--ports", "20-25", "--ports", "8080-8082"]);
        let (target, _) = resolve_scan(&matches, None).unwrap();
        assert_eq!(
            target.ports().collect::<Vec<_>>(),
            vec![20, 21, 22, 23, 24, 8080, 8081]
        );
    }

    #[test]
    fn flags_override_file() {
        let file = ConfigFile::from_toml_str(
            "host = \"10.0.0.5\"\nports = [[1, 3]]\nconcurrency = 64\ntimeout = 700\nshow_progress = false\n",
        )
        .unwrap();
        let matches = parse(&["tcpscan", "--thread", "16", "--host", "127.0.0.1"]);
        let (target, config) = resolve_scan(&matches, Some(&file)).unwrap();

        assert_eq!(target.host(), "127.0.0.1");
        assert_eq!(target.total_ports(), 2);
        assert_eq!(config.concurrency, 16);
        assert_eq!(config.timeout, 700);
        assert!(!config.show_progress);
    }

    #[test]
    fn port_and_ports_conflict() {
        assert!(build_cli()
            .try_get_matches_from(["tcpscan", "--port", "80", "--ports", "1-2"])
            .is_err());
    }

    #[test]
    fn inverted_range_rejected_by_parser() {
        assert!(build_cli()
            .try_get_matches_from(["tcpscan", "--ports", "25-20"])
            .is_err());
    }

    #[test]
    fn missing_ports_is_a_configuration_error() {
        let matches = parse(&["tcpscan"]);
        let err = resolve_scan(&matches, None).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn zero_timeout_is_a_configuration_error() {
        let matches = parse(&["tcpscan", "--port", "80", "--timeout", "0"]);
        let err = resolve_scan(&matches, None).unwrap_err();
        assert!(err.is_configuration());
    }
}
