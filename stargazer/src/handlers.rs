use anyhow::Context;
use clap::ArgMatches;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use stargazer_core::{
    FailureReason, Mapper, ReportFormat, RunConfig, RunReport, StaticSource, WordlistSource,
    print_banner, render,
};
use stargazer_scanner::{Classification, ConcurrencyMode, HttpMethod, OutcomeCallback};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{Level, warn};
use url::Url;

pub const EXIT_COMPLETE: i32 = 0;
pub const EXIT_CONFIGURATION: i32 = 2;
pub const EXIT_UNREACHABLE: i32 = 3;
pub const EXIT_FAILED: i32 = 4;

/// Validates hostname syntax, returning it without any trailing dot.
pub fn validate_hostname(hostname: &str) -> Result<String, String> {
    if hostname.is_empty() {
        return Err("Hostname cannot be empty".to_string());
    }
    if hostname.len() > 255 {
        return Err("Hostname cannot be longer than 255 characters".to_string());
    }

    let hostname = hostname.strip_suffix('.').unwrap_or(hostname);

    let valid_label = |label: &str| {
        (1..=63).contains(&label.len())
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    };

    if !hostname.split('.').all(valid_label) {
        return Err(format!("Hostname '{}' is not valid", hostname));
    }

    Ok(hostname.to_string())
}

/// Confirms the hostname corresponds to at least one address.
pub async fn resolve_hostname(hostname: &str, port: u16) -> Result<(), String> {
    let mut addrs = tokio::net::lookup_host((hostname, port))
        .await
        .map_err(|e| {
            format!(
                "Hostname '{}' does not correspond to an existing hostname or IP address: {}",
                hostname, e
            )
        })?;

    if addrs.next().is_none() {
        return Err(format!("Hostname '{}' resolved to no addresses", hostname));
    }
    Ok(())
}

pub fn build_target_url(hostname: &str, scheme: &str, port: Option<u16>) -> Result<Url, String> {
    let authority = match port {
        Some(port) => format!("{}:{}", hostname, port),
        None => hostname.to_string(),
    };

    Url::parse(&format!("{}://{}/", scheme, authority))
        .map_err(|e| format!("Cannot build target URL for '{}': {}", hostname, e))
}

pub fn parse_log_level(level: &str) -> Result<Level, String> {
    match level.to_uppercase().as_str() {
        "DEBUG" => Ok(Level::DEBUG),
        "INFO" => Ok(Level::INFO),
        "WARNING" | "WARN" => Ok(Level::WARN),
        "ERROR" => Ok(Level::ERROR),
        _ => Err(format!(
            "Log level '{}' is not valid. Choose from: DEBUG INFO WARNING ERROR",
            level
        )),
    }
}

/// Chains inline paths and an optional wordlist file into one lazy candidate stream.
pub fn load_candidates(
    wordlist: Option<&PathBuf>,
    inline: &[String],
) -> Result<Box<dyn Iterator<Item = String> + Send>, String> {
    if wordlist.is_none() && inline.is_empty() {
        return Err("Either --wordlist-file or --path must be provided".to_string());
    }

    let inline = StaticSource::new(inline);

    match wordlist {
        Some(path) => {
            let expanded = shellexpand::tilde(&path.to_string_lossy()).into_owned();
            let source = WordlistSource::open(Path::new(&expanded))
                .map_err(|e| format!("Failed to read wordlist {}: {}", expanded, e))?;
            Ok(Box::new(inline.chain(source)))
        }
        None => Ok(Box::new(inline)),
    }
}

pub fn exit_code_for(report: &RunReport) -> i32 {
    match report.failure() {
        None => EXIT_COMPLETE,
        Some(FailureReason::UnreachableHost(_)) => EXIT_UNREACHABLE,
        Some(_) => EXIT_FAILED,
    }
}

pub fn write_report(output: Option<&PathBuf>, contents: &str) -> anyhow::Result<()> {
    match output {
        Some(path) => {
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
            {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            fs::write(path, contents)
                .with_context(|| format!("Failed to write report to {}", path.display()))?;
        }
        None => print!("{}", contents),
    }
    Ok(())
}

fn configuration_error(msg: &str) -> i32 {
    eprintln!("{} {}", "✗".red().bold(), msg);
    EXIT_CONFIGURATION
}

fn run_config_from(args: &ArgMatches) -> Result<RunConfig, String> {
    let mode = args
        .get_one::<String>("mode")
        .map(|m| ConcurrencyMode::from_str(m))
        .transpose()
        .map_err(|e| e.to_string())?
        .unwrap_or_default();
    let workers = *args.get_one::<usize>("procs").unwrap_or(&1);
    let timeout = *args.get_one::<u64>("timeout").unwrap_or(&5);
    let retries = *args.get_one::<usize>("retries").unwrap_or(&0);
    let queue = *args.get_one::<usize>("queue").unwrap_or(&1024);

    let methods = match args.get_one::<String>("methods") {
        Some(list) => HttpMethod::parse_list(list).map_err(|e| e.to_string())?,
        None => HttpMethod::ALL.to_vec(),
    };

    RunConfig::builder()
        .mode(mode)
        .workers(workers)
        .timeout(Duration::from_secs(timeout))
        .methods(&methods)
        .retries(retries)
        .queue_capacity(queue)
        .build()
        .map_err(|e| e.to_string())
}

fn progress_spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.enable_steady_tick(Duration::from_millis(100));
    pb.set_message("Starting probes...");
    pb
}

/// Parses and validates arguments, runs the mapper and emits the report.
///
/// Returns the process exit code.
pub async fn handle_map(args: &ArgMatches) -> i32 {
    let quiet = args.get_flag("quiet");

    let level = match args
        .get_one::<String>("level")
        .map(|l| parse_log_level(l))
        .unwrap_or(Ok(Level::INFO))
    {
        Ok(level) => level,
        Err(e) => return configuration_error(&e),
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    if !quiet {
        print_banner();
    }

    let hostname = match args
        .get_one::<String>("HOSTNAME")
        .ok_or_else(|| "A hostname is required".to_string())
        .and_then(|h| validate_hostname(h))
    {
        Ok(hostname) => hostname,
        Err(e) => return configuration_error(&e),
    };

    let scheme = args
        .get_one::<String>("scheme")
        .map(String::as_str)
        .unwrap_or("https");
    let port = args.get_one::<u16>("port").copied();

    let target = match build_target_url(&hostname, scheme, port) {
        Ok(target) => target,
        Err(e) => return configuration_error(&e),
    };

    let lookup_port = target.port_or_known_default().unwrap_or(443);
    if let Err(e) = resolve_hostname(&hostname, lookup_port).await {
        return configuration_error(&e);
    }

    let config = match run_config_from(args) {
        Ok(config) => config,
        Err(e) => return configuration_error(&e),
    };

    let inline: Vec<String> = args
        .get_many::<String>("path")
        .map(|paths| paths.cloned().collect())
        .unwrap_or_default();
    let candidates = match load_candidates(args.get_one::<PathBuf>("wordlist-file"), &inline) {
        Ok(candidates) => candidates,
        Err(e) => return configuration_error(&e),
    };

    let format = args
        .get_one::<String>("format")
        .and_then(|f| ReportFormat::from_str(f))
        .unwrap_or(ReportFormat::Text);
    let output = args.get_one::<PathBuf>("output");

    let mapper = match Mapper::for_http(target.clone(), config) {
        Ok(mapper) => mapper,
        Err(e) => return configuration_error(&e.to_string()),
    };

    if !quiet {
        eprintln!("Mapping {}", target.as_str().bright_white().bold());
        eprintln!(
            "Mode: {} ({} workers)",
            mapper.config().mode(),
            match mapper.config().mode() {
                ConcurrencyMode::Serial => 1,
                ConcurrencyMode::Parallel => mapper.config().workers(),
            }
        );
        eprintln!(
            "Methods: {}\n",
            mapper
                .config()
                .methods()
                .iter()
                .map(HttpMethod::as_str)
                .collect::<Vec<_>>()
                .join(", ")
        );
    }

    // Progress spinner fed by every finished probe
    let progress_bar = (!quiet).then(|| Arc::new(progress_spinner()));
    let mapper = match &progress_bar {
        Some(pb) => {
            let pb = pb.clone();
            let probes = Arc::new(AtomicUsize::new(0));
            let accepted = Arc::new(AtomicUsize::new(0));
            let callback: OutcomeCallback = Arc::new(move |unit, outcome| {
                let count = probes.fetch_add(1, Ordering::Relaxed) + 1;
                if outcome.classification == Classification::Accepted {
                    accepted.fetch_add(1, Ordering::Relaxed);
                }
                pb.set_message(format!(
                    "Probing... {} probes, {} accepted ({} {})",
                    count,
                    accepted.load(Ordering::Relaxed),
                    unit.method,
                    unit.path
                ));
            });
            mapper.with_outcome_callback(callback)
        }
        None => mapper,
    };

    let token = mapper.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, waiting for in-flight probes to finish");
            token.cancel();
        }
    });

    let report = match mapper.run(candidates).await {
        Ok(report) => report,
        Err(e) => {
            if let Some(pb) = &progress_bar {
                pb.finish_and_clear();
            }
            eprintln!("{} {}", "✗".red().bold(), e);
            return EXIT_FAILED;
        }
    };

    if let Some(pb) = &progress_bar {
        match report.failure() {
            None => pb.finish_with_message(format!(
                "Mapping complete! {} probes sent",
                report.probes_dispatched
            )),
            Some(reason) => pb.finish_with_message(format!("Mapping failed: {}", reason)),
        }
    }

    match render(&report, format) {
        Ok(contents) => {
            if let Err(e) = write_report(output, &contents) {
                eprintln!("{} {:#}", "✗".red().bold(), e);
                return EXIT_FAILED;
            }
            if let Some(path) = output
                && !quiet
            {
                eprintln!(
                    "{} Report saved to {}",
                    "✓".green().bold(),
                    path.display()
                );
            }
        }
        Err(e) => {
            eprintln!("{} {}", "✗".red().bold(), e);
            return EXIT_FAILED;
        }
    }

    exit_code_for(&report)
}
