use crate::aggregator::ResultAggregator;
use crate::error::{Result, ScanError};
use crate::method::HttpMethod;
use crate::prober::{Probe, build_probe_url};
use crate::result::ProbeOutcome;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

/// Called once per finished probe, before the outcome is recorded.
pub type OutcomeCallback = Arc<dyn Fn(&WorkUnit, &ProbeOutcome) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConcurrencyMode {
    #[default]
    Serial,
    Parallel,
}

impl ConcurrencyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConcurrencyMode::Serial => "serial",
            ConcurrencyMode::Parallel => "parallel",
        }
    }
}

impl fmt::Display for ConcurrencyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConcurrencyMode {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "serial" => Ok(ConcurrencyMode::Serial),
            "parallel" => Ok(ConcurrencyMode::Parallel),
            _ => Err(ScanError::Other(format!(
                "Unknown concurrency mode '{}', expected serial or parallel",
                s
            ))),
        }
    }
}

/// One (candidate path, method) pair, with the URL it resolves to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkUnit {
    pub path: String,
    pub method: HttpMethod,
    pub uri: Url,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScheduleSummary {
    /// Work units handed to the prober.
    pub dispatched: usize,
    /// Cancellation left work undispatched.
    pub cancelled: bool,
}

/// Runs the cross product of candidate paths and methods through a [`Probe`].
pub struct ProbeScheduler<P> {
    prober: Arc<P>,
    target: Url,
    methods: Vec<HttpMethod>,
    mode: ConcurrencyMode,
    workers: usize,
    timeout: Duration,
    deadline: Option<Duration>,
    queue_capacity: usize,
    outcome_callback: Option<OutcomeCallback>,
}

impl<P: Probe + 'static> ProbeScheduler<P> {
    pub fn new(prober: Arc<P>, target: Url) -> Result<Self> {
        if target.cannot_be_a_base() {
            return Err(ScanError::InvalidUrl(format!(
                "{} cannot be used as a probe target",
                target
            )));
        }

        Ok(Self {
            prober,
            target,
            methods: HttpMethod::ALL.to_vec(),
            mode: ConcurrencyMode::Serial,
            workers: 1,
            timeout: Duration::from_secs(5),
            deadline: None,
            queue_capacity: 1024,
            outcome_callback: None,
        })
    }

    pub fn with_methods(mut self, methods: &[HttpMethod]) -> Self {
        self.methods = HttpMethod::canonical_set(methods);
        self
    }

    pub fn with_mode(mut self, mode: ConcurrencyMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Hard bound on one dispatch, for probers that spend longer than `timeout` (retries).
    /// Defaults to the probe timeout.
    pub fn with_dispatch_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    pub fn with_outcome_callback(mut self, callback: OutcomeCallback) -> Self {
        self.outcome_callback = Some(callback);
        self
    }

    pub fn methods(&self) -> &[HttpMethod] {
        &self.methods
    }

    /// Probes every unique candidate with every configured method, recording each outcome.
    ///
    /// Duplicate candidates are dispatched only once. On cancellation no new units are
    /// dispatched, in-flight probes still run to completion or timeout.
    pub async fn run<I>(
        &self,
        candidates: I,
        aggregator: Arc<ResultAggregator>,
        cancel: &CancellationToken,
    ) -> Result<ScheduleSummary>
    where
        I: IntoIterator<Item = String>,
    {
        info!(
            "Probing {} in {} mode ({} methods, {} workers)",
            self.target,
            self.mode,
            self.methods.len(),
            match self.mode {
                ConcurrencyMode::Serial => 1,
                ConcurrencyMode::Parallel => self.workers,
            }
        );

        let summary = match self.mode {
            ConcurrencyMode::Serial => self.run_serial(candidates, &aggregator, cancel).await,
            ConcurrencyMode::Parallel => self.run_parallel(candidates, aggregator, cancel).await?,
        };

        info!(
            "Dispatched {} probes{}",
            summary.dispatched,
            if summary.cancelled { " before cancellation" } else { "" }
        );
        Ok(summary)
    }

    async fn run_serial<I>(
        &self,
        candidates: I,
        aggregator: &ResultAggregator,
        cancel: &CancellationToken,
    ) -> ScheduleSummary
    where
        I: IntoIterator<Item = String>,
    {
        let mut summary = ScheduleSummary::default();
        let deadline = self.deadline.unwrap_or(self.timeout);

        for unit in self.work_units(candidates) {
            if cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }

            let outcome = dispatch(self.prober.as_ref(), &unit, self.timeout, deadline).await;
            summary.dispatched += 1;
            deliver(aggregator, self.outcome_callback.as_ref(), &unit, outcome);
        }

        summary
    }

    async fn run_parallel<I>(
        &self,
        candidates: I,
        aggregator: Arc<ResultAggregator>,
        cancel: &CancellationToken,
    ) -> Result<ScheduleSummary>
    where
        I: IntoIterator<Item = String>,
    {
        let (tx, rx) = mpsc::channel::<WorkUnit>(self.queue_capacity);
        let rx = Arc::new(Mutex::new(rx));
        let dispatched = Arc::new(AtomicUsize::new(0));
        let deadline = self.deadline.unwrap_or(self.timeout);

        let mut worker_handles = Vec::with_capacity(self.workers);
        for worker_id in 0..self.workers {
            let rx = rx.clone();
            let prober = self.prober.clone();
            let aggregator = aggregator.clone();
            let callback = self.outcome_callback.clone();
            let cancel = cancel.clone();
            let dispatched = dispatched.clone();
            let timeout = self.timeout;

            let handle = tokio::spawn(async move {
                debug!("Worker {} started", worker_id);

                loop {
                    let next = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        unit = async { rx.lock().await.recv().await } => unit,
                    };

                    // Queue closed and drained
                    let Some(unit) = next else { break };

                    dispatched.fetch_add(1, Ordering::Relaxed);
                    let outcome = dispatch(prober.as_ref(), &unit, timeout, deadline).await;
                    deliver(&aggregator, callback.as_ref(), &unit, outcome);
                }

                debug!("Worker {} finished", worker_id);
            });

            worker_handles.push(handle);
        }

        // The bounded queue is the backpressure: send waits while every slot is taken.
        let mut enqueued = 0usize;
        let mut stopped_early = false;
        for unit in self.work_units(candidates) {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    stopped_early = true;
                    break;
                }
                sent = tx.send(unit) => {
                    if sent.is_err() {
                        warn!("All workers exited before the queue was drained");
                        stopped_early = true;
                        break;
                    }
                    enqueued += 1;
                }
            }
        }
        drop(tx);

        let mut first_error = None;
        for joined in join_all(worker_handles).await {
            if let Err(e) = joined {
                warn!("Worker task failed: {}", e);
                first_error.get_or_insert(ScanError::Join(e));
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        let dispatched = dispatched.load(Ordering::Relaxed);
        Ok(ScheduleSummary {
            dispatched,
            cancelled: stopped_early || dispatched < enqueued,
        })
    }

    fn work_units<I>(&self, candidates: I) -> impl Iterator<Item = WorkUnit>
    where
        I: IntoIterator<Item = String>,
    {
        let mut seen = HashSet::new();
        let methods = self.methods.clone();
        let target = &self.target;

        candidates
            .into_iter()
            .filter(move |path| {
                let fresh = seen.insert(path.clone());
                if !fresh {
                    debug!("Skipping duplicate candidate {}", path);
                }
                fresh
            })
            .filter_map(move |path| match build_probe_url(target, &path) {
                Ok(uri) => Some((path, uri)),
                Err(e) => {
                    warn!("Skipping candidate {}: {}", path, e);
                    None
                }
            })
            .flat_map(move |(path, uri)| {
                methods.clone().into_iter().map(move |method| WorkUnit {
                    path: path.clone(),
                    method,
                    uri: uri.clone(),
                })
            })
    }
}

async fn dispatch<P: Probe>(
    prober: &P,
    unit: &WorkUnit,
    timeout: Duration,
    deadline: Duration,
) -> ProbeOutcome {
    match tokio::time::timeout(deadline, prober.probe(&unit.uri, unit.method, timeout)).await {
        Ok(outcome) => outcome,
        Err(_) => {
            debug!("{} {} exceeded its deadline", unit.method, unit.uri);
            ProbeOutcome::timed_out(unit.method, deadline)
        }
    }
}

fn deliver(
    aggregator: &ResultAggregator,
    callback: Option<&OutcomeCallback>,
    unit: &WorkUnit,
    outcome: ProbeOutcome,
) {
    if let Some(callback) = callback {
        callback(unit, &outcome);
    }
    aggregator.record(&unit.path, outcome);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::Classification;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    /// Answers 200 for listed (path, method) pairs, 404 otherwise, and counts every call.
    #[derive(Default)]
    struct ScriptedProber {
        accepted: Vec<(&'static str, HttpMethod)>,
        stall: Option<&'static str>,
        delay: Duration,
        calls: StdMutex<HashMap<(String, HttpMethod), usize>>,
    }

    impl Probe for ScriptedProber {
        async fn probe(&self, uri: &Url, method: HttpMethod, _timeout: Duration) -> ProbeOutcome {
            let path = uri.path().to_string();
            *self
                .calls
                .lock()
                .unwrap()
                .entry((path.clone(), method))
                .or_insert(0) += 1;

            if self.stall == Some(path.as_str()) {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            let status = if self
                .accepted
                .iter()
                .any(|(accepted_path, accepted_method)| {
                    *accepted_path == path && *accepted_method == method
                }) {
                200
            } else {
                404
            };
            ProbeOutcome::from_status(method, status, Duration::ZERO)
        }

        async fn check_host(&self, _base: &Url, _timeout: Duration) -> Result<()> {
            Ok(())
        }
    }

    fn target() -> Url {
        Url::parse("http://api.example.com/").unwrap()
    }

    fn paths(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    /// Lazy candidate stream that counts how far it has been consumed.
    fn counted_candidates(total: usize, pulled: Arc<AtomicUsize>) -> impl Iterator<Item = String> {
        (0..total).map(move |i| {
            pulled.fetch_add(1, Ordering::SeqCst);
            format!("/lazy{}", i)
        })
    }

    #[tokio::test]
    async fn test_serial_order_is_path_then_method() {
        let order = Arc::new(StdMutex::new(Vec::new()));
        let order_clone = order.clone();

        let scheduler = ProbeScheduler::new(Arc::new(ScriptedProber::default()), target())
            .unwrap()
            .with_methods(&[HttpMethod::Delete, HttpMethod::Get, HttpMethod::Options])
            .with_outcome_callback(Arc::new(move |unit, _outcome| {
                order_clone
                    .lock()
                    .unwrap()
                    .push(format!("{} {}", unit.method, unit.path));
            }));

        let aggregator = Arc::new(ResultAggregator::new());
        let summary = scheduler
            .run(paths(&["/b", "/a"]), aggregator, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.dispatched, 6);
        assert!(!summary.cancelled);
        assert_eq!(
            *order.lock().unwrap(),
            vec![
                "GET /b", "OPTIONS /b", "DELETE /b", "GET /a", "OPTIONS /a", "DELETE /a",
            ]
        );
    }

    #[tokio::test]
    async fn test_duplicate_candidates_dispatch_once() {
        let prober = Arc::new(ScriptedProber::default());
        let scheduler = ProbeScheduler::new(prober.clone(), target())
            .unwrap()
            .with_methods(&[HttpMethod::Get, HttpMethod::Post]);

        let aggregator = Arc::new(ResultAggregator::new());
        let summary = scheduler
            .run(
                paths(&["/x", "/y", "/x"]),
                aggregator.clone(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(summary.dispatched, 4);
        assert_eq!(aggregator.recorded(), 4);
        assert!(prober.calls.lock().unwrap().values().all(|&n| n == 1));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_parallel_dispatches_every_unit_exactly_once() {
        let prober = Arc::new(ScriptedProber {
            accepted: vec![("/p7", HttpMethod::Put)],
            ..Default::default()
        });
        let candidates: Vec<String> = (0..100).map(|i| format!("/p{}", i)).collect();

        let scheduler = ProbeScheduler::new(prober.clone(), target())
            .unwrap()
            .with_mode(ConcurrencyMode::Parallel)
            .with_workers(4)
            .with_queue_capacity(8);

        let aggregator = Arc::new(ResultAggregator::new());
        let summary = scheduler
            .run(candidates, aggregator.clone(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.dispatched, 600);
        assert!(!summary.cancelled);
        assert_eq!(aggregator.recorded(), 600);

        let calls = prober.calls.lock().unwrap();
        assert_eq!(calls.len(), 600);
        assert!(calls.values().all(|&n| n == 1));

        let snapshot = aggregator.snapshot();
        assert_eq!(snapshot.len(), 100);
        assert!(snapshot.values().all(|r| r.outcomes.len() == 6));
        assert!(snapshot["/p7"].accepted().contains(&HttpMethod::Put));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stalled_probe_times_out_without_blocking_others() {
        let prober = Arc::new(ScriptedProber {
            accepted: vec![("/ok", HttpMethod::Get)],
            stall: Some("/stuck"),
            ..Default::default()
        });

        let scheduler = ProbeScheduler::new(prober, target())
            .unwrap()
            .with_mode(ConcurrencyMode::Parallel)
            .with_workers(2)
            .with_methods(&[HttpMethod::Get])
            .with_timeout(Duration::from_millis(200));

        let aggregator = Arc::new(ResultAggregator::new());
        let summary = scheduler
            .run(
                paths(&["/stuck", "/ok", "/other"]),
                aggregator.clone(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(summary.dispatched, 3);
        let snapshot = aggregator.snapshot();
        assert_eq!(
            snapshot["/stuck"].outcomes[&HttpMethod::Get].classification,
            Classification::TimedOut
        );
        assert!(snapshot["/ok"].is_endpoint());
        assert_eq!(snapshot["/other"].rejected().len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_dispatches_nothing() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        for mode in [ConcurrencyMode::Serial, ConcurrencyMode::Parallel] {
            let scheduler = ProbeScheduler::new(Arc::new(ScriptedProber::default()), target())
                .unwrap()
                .with_mode(mode)
                .with_workers(3);

            let aggregator = Arc::new(ResultAggregator::new());
            let summary = scheduler
                .run(paths(&["/a", "/b"]), aggregator.clone(), &cancel)
                .await
                .unwrap();

            assert_eq!(summary.dispatched, 0, "mode {}", mode);
            assert!(summary.cancelled);
            assert!(aggregator.is_empty());
        }
    }

    #[tokio::test]
    async fn test_cancel_mid_run_keeps_partial_results() {
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();

        // Cancel from inside the callback after the third outcome.
        let seen = Arc::new(AtomicUsize::new(0));
        let scheduler = ProbeScheduler::new(Arc::new(ScriptedProber::default()), target())
            .unwrap()
            .with_methods(&[HttpMethod::Get])
            .with_outcome_callback(Arc::new(move |_unit, _outcome| {
                if seen.fetch_add(1, Ordering::SeqCst) + 1 == 3 {
                    cancel_clone.cancel();
                }
            }));

        let candidates: Vec<String> = (0..10).map(|i| format!("/c{}", i)).collect();
        let aggregator = Arc::new(ResultAggregator::new());
        let summary = scheduler
            .run(candidates, aggregator.clone(), &cancel)
            .await
            .unwrap();

        assert!(summary.cancelled);
        assert_eq!(summary.dispatched, 3);
        assert_eq!(aggregator.len(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_parallel_queue_applies_backpressure() {
        let prober = Arc::new(ScriptedProber {
            delay: Duration::from_millis(50),
            ..Default::default()
        });
        let scheduler = ProbeScheduler::new(prober, target())
            .unwrap()
            .with_mode(ConcurrencyMode::Parallel)
            .with_workers(2)
            .with_queue_capacity(4)
            .with_methods(&[HttpMethod::Get]);

        let pulled = Arc::new(AtomicUsize::new(0));
        let aggregator = Arc::new(ResultAggregator::new());
        let cancel = CancellationToken::new();

        let (summary, (pulled_at_check, recorded_at_check)) = tokio::join!(
            scheduler.run(
                counted_candidates(1000, pulled.clone()),
                aggregator.clone(),
                &cancel
            ),
            async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                let observed = (
                    pulled.load(Ordering::SeqCst),
                    aggregator.recorded(),
                );
                cancel.cancel();
                observed
            }
        );

        // Everything pulled but not yet finished sits in the queue, a worker, or the
        // producer's pending send.
        assert!(
            pulled_at_check <= recorded_at_check + 4 + 2 + 3,
            "pulled {} with only {} recorded",
            pulled_at_check,
            recorded_at_check
        );
        assert!(pulled_at_check < 100);
        assert!(summary.unwrap().cancelled);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_parallel_cancel_lets_in_flight_probes_finish() {
        let prober = Arc::new(ScriptedProber {
            delay: Duration::from_millis(60),
            ..Default::default()
        });
        let scheduler = ProbeScheduler::new(prober.clone(), target())
            .unwrap()
            .with_mode(ConcurrencyMode::Parallel)
            .with_workers(3)
            .with_queue_capacity(16)
            .with_methods(&[HttpMethod::Get, HttpMethod::Post]);

        let aggregator = Arc::new(ResultAggregator::new());
        let cancel = CancellationToken::new();
        let candidates: Vec<String> = (0..200).map(|i| format!("/c{}", i)).collect();

        let (summary, _) = tokio::join!(
            scheduler.run(candidates, aggregator.clone(), &cancel),
            async {
                tokio::time::sleep(Duration::from_millis(150)).await;
                cancel.cancel();
            }
        );
        let summary = summary.unwrap();

        assert!(summary.cancelled);
        assert!(summary.dispatched > 0);
        assert!(summary.dispatched < 400);
        assert_eq!(summary.dispatched, aggregator.recorded());
        let started: usize = prober.calls.lock().unwrap().values().sum();
        assert_eq!(started, summary.dispatched);
    }

    #[test]
    fn test_rejects_non_base_target() {
        let target = Url::parse("data:text/plain,hello").unwrap();
        assert!(ProbeScheduler::new(Arc::new(ScriptedProber::default()), target).is_err());
    }

    #[test]
    fn test_concurrency_mode_parse() {
        assert_eq!("serial".parse::<ConcurrencyMode>().unwrap(), ConcurrencyMode::Serial);
        assert_eq!("PARALLEL".parse::<ConcurrencyMode>().unwrap(), ConcurrencyMode::Parallel);
        assert!("y".parse::<ConcurrencyMode>().is_err());
    }
}
