// Report rendering for finished runs

use crate::error::Result;
use crate::mapper::{RunReport, RunStatus};
use colored::Colorize;
use stargazer_scanner::{Classification, EndpointRecord, HttpMethod};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Text,
    Json,
}

impl ReportFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "text" | "txt" => Some(ReportFormat::Text),
            "json" => Some(ReportFormat::Json),
            _ => None,
        }
    }
}

pub fn render(report: &RunReport, format: ReportFormat) -> Result<String> {
    match format {
        ReportFormat::Text => Ok(generate_text_report(report)),
        ReportFormat::Json => Ok(serde_json::to_string_pretty(report)?),
    }
}

fn join_methods(methods: &BTreeSet<HttpMethod>) -> String {
    methods
        .iter()
        .map(HttpMethod::as_str)
        .collect::<Vec<_>>()
        .join(",")
}

fn endpoint_line(record: &EndpointRecord) -> String {
    let mut line = format!("  {}", record.path.bright_white());

    let accepted = record.accepted();
    if accepted.is_empty() {
        line.push_str(&format!("  {}", "no accepted methods".dimmed()));
    } else {
        line.push_str(&format!("  {}", join_methods(&accepted).green().bold()));
    }

    let rejected = record.rejected();
    if !rejected.is_empty() {
        line.push_str(&format!("  rejected: {}", join_methods(&rejected).yellow()));
    }

    let timed_out = record.methods_with(Classification::TimedOut);
    if !timed_out.is_empty() {
        line.push_str(&format!("  timed out: {}", join_methods(&timed_out).red()));
    }

    let unreachable = record.methods_with(Classification::Unreachable);
    if !unreachable.is_empty() {
        line.push_str(&format!("  unreachable: {}", join_methods(&unreachable).red()));
    }

    line
}

/// Human readable summary followed by one line per probed path, endpoints first.
pub fn generate_text_report(report: &RunReport) -> String {
    let mut out = String::new();

    out.push_str("\n═══════════════════════════════════════════════════════════════════════════════\n");
    out.push_str("                            STARGAZER API MAP\n");
    out.push_str("═══════════════════════════════════════════════════════════════════════════════\n\n");

    out.push_str(&format!("Target:   {}\n", report.target));
    out.push_str(&format!("Run:      {}\n", report.run_id));

    let status = match &report.status {
        RunStatus::Complete => "complete".green().bold().to_string(),
        RunStatus::Failed(reason) => format!("{} ({})", "failed".red().bold(), reason),
    };
    out.push_str(&format!("Status:   {}\n", status));

    let elapsed = report.finished_at - report.started_at;
    out.push_str(&format!(
        "Duration: {}.{:03}s\n",
        elapsed.num_seconds(),
        elapsed.num_milliseconds().rem_euclid(1000)
    ));

    out.push_str(&format!(
        "Mode:     {} ({} workers)\n\n",
        report.config.mode(),
        report.config.workers()
    ));

    let endpoints = report.discovered().count();
    out.push_str(&format!("Paths probed:   {}\n", report.endpoints.len()));
    out.push_str(&format!("Probes sent:    {}\n", report.probes_dispatched));
    out.push_str(&format!("Endpoints:      {}\n", endpoints));
    out.push_str(&format!(
        "Accepted: {}  Rejected: {}  Timed out: {}  Unreachable: {}\n\n",
        report.count(Classification::Accepted),
        report.count(Classification::Rejected),
        report.count(Classification::TimedOut),
        report.count(Classification::Unreachable)
    ));

    if endpoints > 0 {
        out.push_str(&format!("Endpoints ({})\n", endpoints));
        out.push_str("───────────────────────────────────────────────────────────────────────────────\n");
        for record in report.discovered() {
            out.push_str(&endpoint_line(record));
            out.push('\n');
        }
        out.push('\n');
    }

    let others: Vec<&EndpointRecord> = report
        .endpoints
        .values()
        .filter(|r| !r.is_endpoint())
        .collect();
    if !others.is_empty() {
        out.push_str(&format!("No accepted methods ({})\n", others.len()));
        out.push_str("───────────────────────────────────────────────────────────────────────────────\n");
        for record in others {
            out.push_str(&endpoint_line(record));
            out.push('\n');
        }
        out.push('\n');
    }

    out.push_str("═══════════════════════════════════════════════════════════════════════════════\n");
    out.push_str("                            End of Report\n");
    out.push_str("═══════════════════════════════════════════════════════════════════════════════\n");

    out
}
