// Run orchestration: preflight, scheduling and the run state machine

use crate::config::RunConfig;
use crate::error::{MapError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use stargazer_scanner::{
    Classification, EndpointRecord, HttpProber, OutcomeCallback, Probe, ProbeScheduler,
    ResultAggregator, RetryingProber,
};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use url::Url;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MapperState {
    Idle,
    Running,
    Complete,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    /// The target could not be resolved or connected to before probing started.
    UnreachableHost(String),
    Cancelled,
    Internal(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::UnreachableHost(_) => f.write_str("unreachable host"),
            FailureReason::Cancelled => f.write_str("cancelled"),
            FailureReason::Internal(detail) => write!(f, "internal error: {}", detail),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum RunStatus {
    Complete,
    Failed(FailureReason),
}

/// Everything a finished (or aborted) run produced.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub target: Url,
    pub config: RunConfig,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub probes_dispatched: usize,
    pub endpoints: BTreeMap<String, EndpointRecord>,
}

impl RunReport {
    pub fn is_complete(&self) -> bool {
        self.status == RunStatus::Complete
    }

    pub fn failure(&self) -> Option<&FailureReason> {
        match &self.status {
            RunStatus::Complete => None,
            RunStatus::Failed(reason) => Some(reason),
        }
    }

    /// Paths that accepted at least one method.
    pub fn discovered(&self) -> impl Iterator<Item = &EndpointRecord> {
        self.endpoints.values().filter(|r| r.is_endpoint())
    }

    pub fn count(&self, classification: Classification) -> usize {
        self.endpoints.values().map(|r| r.count(classification)).sum()
    }
}

/// Maps the API surface of one target. Each `Mapper` performs a single run.
pub struct Mapper<P> {
    run_id: Uuid,
    target: Url,
    config: RunConfig,
    prober: Arc<P>,
    aggregator: Arc<ResultAggregator>,
    state: Mutex<MapperState>,
    cancel: CancellationToken,
    outcome_callback: Option<OutcomeCallback>,
}

impl Mapper<RetryingProber<HttpProber>> {
    /// A mapper that probes over HTTP, retrying transport failures as configured.
    pub fn for_http(target: Url, config: RunConfig) -> Result<Self> {
        let prober = RetryingProber::new(HttpProber::new()?, config.retries())
            .with_backoff(config.retry_backoff());
        Self::new(target, config, prober)
    }
}

impl<P: Probe + 'static> Mapper<P> {
    pub fn new(target: Url, config: RunConfig, prober: P) -> Result<Self> {
        if !matches!(target.scheme(), "http" | "https") {
            return Err(MapError::Configuration(format!(
                "Unsupported scheme '{}', expected http or https",
                target.scheme()
            )));
        }
        if target.host().is_none() {
            return Err(MapError::Configuration(format!("No host in {}", target)));
        }

        Ok(Self {
            run_id: Uuid::new_v4(),
            target,
            config,
            prober: Arc::new(prober),
            aggregator: Arc::new(ResultAggregator::new()),
            state: Mutex::new(MapperState::Idle),
            cancel: CancellationToken::new(),
            outcome_callback: None,
        })
    }

    pub fn with_outcome_callback(mut self, callback: OutcomeCallback) -> Self {
        self.outcome_callback = Some(callback);
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn target(&self) -> &Url {
        &self.target
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn state(&self) -> MapperState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cancelling this token stops new probes from being dispatched.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Live view of the map, usable while a run is in progress.
    pub fn snapshot(&self) -> BTreeMap<String, EndpointRecord> {
        self.aggregator.snapshot()
    }

    /// Drains `candidates` through the scheduler and reports the outcome.
    ///
    /// Probe-level failures never surface here; they are part of the map. The only error
    /// is calling `run` on a mapper that already left `Idle`.
    pub async fn run<I>(&self, candidates: I) -> Result<RunReport>
    where
        I: IntoIterator<Item = String>,
    {
        self.transition(MapperState::Idle, MapperState::Running)?;
        let started_at = Utc::now();

        info!(
            "Run {} started against {} ({} mode, {} methods)",
            self.run_id,
            self.target,
            self.config.mode(),
            self.config.methods().len()
        );

        if let Err(e) = self
            .prober
            .check_host(&self.target, self.config.timeout())
            .await
        {
            warn!("Aborting run {}: {}", self.run_id, e);
            let reason = FailureReason::UnreachableHost(e.to_string());
            return Ok(self.finish(started_at, 0, RunStatus::Failed(reason)));
        }

        let (dispatched, status) = match self.schedule(candidates).await {
            Ok(summary) if summary.cancelled => (
                summary.dispatched,
                RunStatus::Failed(FailureReason::Cancelled),
            ),
            Ok(summary) => (summary.dispatched, RunStatus::Complete),
            Err(e) => {
                warn!("Run {} failed: {}", self.run_id, e);
                (
                    self.aggregator.recorded(),
                    RunStatus::Failed(FailureReason::Internal(e.to_string())),
                )
            }
        };

        Ok(self.finish(started_at, dispatched, status))
    }

    async fn schedule<I>(&self, candidates: I) -> Result<stargazer_scanner::ScheduleSummary>
    where
        I: IntoIterator<Item = String>,
    {
        let mut scheduler = ProbeScheduler::new(self.prober.clone(), self.target.clone())?
            .with_methods(self.config.methods())
            .with_mode(self.config.mode())
            .with_workers(self.config.workers())
            .with_timeout(self.config.timeout())
            .with_dispatch_deadline(self.config.dispatch_deadline())
            .with_queue_capacity(self.config.queue_capacity());

        if let Some(callback) = &self.outcome_callback {
            scheduler = scheduler.with_outcome_callback(callback.clone());
        }

        Ok(scheduler
            .run(candidates, self.aggregator.clone(), &self.cancel)
            .await?)
    }

    fn transition(&self, from: MapperState, to: MapperState) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != from {
            return Err(MapError::AlreadyStarted);
        }
        *state = to;
        Ok(())
    }

    fn finish(&self, started_at: DateTime<Utc>, dispatched: usize, status: RunStatus) -> RunReport {
        let final_state = match status {
            RunStatus::Complete => MapperState::Complete,
            RunStatus::Failed(_) => MapperState::Failed,
        };
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = final_state;

        let endpoints = self.aggregator.snapshot();
        info!(
            "Run {} finished: {:?}, {} probes over {} paths, {} endpoints",
            self.run_id,
            final_state,
            dispatched,
            endpoints.len(),
            endpoints.values().filter(|r| r.is_endpoint()).count()
        );

        RunReport {
            run_id: self.run_id,
            target: self.target.clone(),
            config: self.config.clone(),
            status,
            started_at,
            finished_at: Utc::now(),
            probes_dispatched: dispatched,
            endpoints,
        }
    }
}
