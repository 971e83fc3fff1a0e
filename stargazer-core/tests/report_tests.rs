// Tests for report rendering

use chrono::Utc;
use stargazer_core::{
    FailureReason, ReportFormat, RunConfig, RunReport, RunStatus, generate_text_report, render,
};
use stargazer_scanner::{EndpointRecord, HttpMethod, ProbeOutcome};
use std::collections::BTreeMap;
use std::time::Duration;
use url::Url;
use uuid::Uuid;

fn sample_report(status: RunStatus) -> RunReport {
    let mut api = EndpointRecord::new("/api".to_string());
    api.record(ProbeOutcome::from_status(HttpMethod::Get, 200, Duration::ZERO));
    api.record(ProbeOutcome::from_status(HttpMethod::Post, 404, Duration::ZERO));

    let mut root = EndpointRecord::new("/".to_string());
    root.record(ProbeOutcome::from_status(HttpMethod::Get, 404, Duration::ZERO));
    root.record(ProbeOutcome::timed_out(HttpMethod::Post, Duration::from_secs(5)));

    let mut endpoints = BTreeMap::new();
    endpoints.insert(api.path.clone(), api);
    endpoints.insert(root.path.clone(), root);

    let now = Utc::now();
    RunReport {
        run_id: Uuid::new_v4(),
        target: Url::parse("https://api.example.com/").unwrap(),
        config: RunConfig::default(),
        status,
        started_at: now,
        finished_at: now,
        probes_dispatched: 4,
        endpoints,
    }
}

#[test]
fn test_report_format_from_str() {
    assert_eq!(ReportFormat::from_str("text"), Some(ReportFormat::Text));
    assert_eq!(ReportFormat::from_str("JSON"), Some(ReportFormat::Json));
    assert_eq!(ReportFormat::from_str("csv"), None);
}

#[test]
fn test_text_report_summary() {
    let report = generate_text_report(&sample_report(RunStatus::Complete));

    assert!(report.contains("STARGAZER API MAP"));
    assert!(report.contains("https://api.example.com/"));
    assert!(report.contains("complete"));
    assert!(report.contains("Paths probed:   2"));
    assert!(report.contains("Probes sent:    4"));
    assert!(report.contains("Endpoints:      1"));
    assert!(report.contains("/api"));
    assert!(report.contains("timed out"));
    assert!(report.contains("No accepted methods (1)"));
}

#[test]
fn test_text_report_failed_reason() {
    let report = generate_text_report(&sample_report(RunStatus::Failed(
        FailureReason::UnreachableHost("connection refused".to_string()),
    )));

    assert!(report.contains("failed"));
    assert!(report.contains("unreachable host"));
}

#[test]
fn test_json_report() {
    let rendered = render(&sample_report(RunStatus::Complete), ReportFormat::Json).unwrap();
    let value: serde_json::Value = serde_json::from_str(&rendered).unwrap();

    assert_eq!(value["status"]["status"], "complete");
    assert_eq!(value["probes_dispatched"], 4);
    assert_eq!(value["config"]["mode"], "serial");
    assert_eq!(
        value["endpoints"]["/api"]["outcomes"]["GET"]["classification"],
        "accepted"
    );
    assert_eq!(
        value["endpoints"]["/"]["outcomes"]["POST"]["classification"],
        "timed_out"
    );
}

#[test]
fn test_json_report_failure_reason() {
    let rendered = render(
        &sample_report(RunStatus::Failed(FailureReason::Cancelled)),
        ReportFormat::Json,
    )
    .unwrap();
    let value: serde_json::Value = serde_json::from_str(&rendered).unwrap();

    assert_eq!(value["status"]["status"], "failed");
    assert_eq!(value["status"]["reason"]["kind"], "cancelled");
}
