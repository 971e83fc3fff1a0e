use crate::result::{EndpointRecord, ProbeOutcome};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};
use tracing::debug;

/// Builds the endpoint map from classified probe outcomes.
///
/// Writers hold the outer map lock shared and the per-path lock exclusively, so updates to
/// different paths run side by side while updates to one path are serialized. `snapshot`
/// takes the outer lock exclusively and therefore never observes a half-applied update.
#[derive(Debug, Default)]
pub struct ResultAggregator {
    records: RwLock<HashMap<String, Mutex<EndpointRecord>>>,
    recorded: AtomicUsize,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `outcome` for `(path, outcome.method)`, replacing any earlier outcome.
    pub fn record(&self, path: &str, outcome: ProbeOutcome) {
        {
            let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(entry) = records.get(path) {
                entry
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .record(outcome);
                self.recorded.fetch_add(1, Ordering::Relaxed);
                return;
            }
        }

        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        let entry = records.entry(path.to_string()).or_insert_with(|| {
            debug!("New candidate path in map: {}", path);
            Mutex::new(EndpointRecord::new(path.to_string()))
        });
        entry
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .record(outcome);
        self.recorded.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of every record, ordered by path.
    pub fn snapshot(&self) -> BTreeMap<String, EndpointRecord> {
        let records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        records
            .iter()
            .map(|(path, entry)| {
                let record = entry.lock().unwrap_or_else(PoisonError::into_inner).clone();
                (path.clone(), record)
            })
            .collect()
    }

    pub fn get(&self, path: &str) -> Option<EndpointRecord> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        records
            .get(path)
            .map(|entry| entry.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    /// Number of distinct paths seen so far.
    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total `record` calls, including ones that replaced an earlier outcome.
    pub fn recorded(&self) -> usize {
        self.recorded.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::method::HttpMethod;
    use crate::result::Classification;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_record_creates_and_merges() {
        let aggregator = ResultAggregator::new();
        aggregator.record("/", ProbeOutcome::from_status(HttpMethod::Get, 404, Duration::ZERO));
        aggregator.record("/", ProbeOutcome::from_status(HttpMethod::Post, 404, Duration::ZERO));
        aggregator.record(
            "/api",
            ProbeOutcome::from_status(HttpMethod::Get, 200, Duration::ZERO),
        );

        assert_eq!(aggregator.len(), 2);
        assert_eq!(aggregator.recorded(), 3);

        let root = aggregator.get("/").unwrap();
        assert!(root.accepted().is_empty());
        assert_eq!(root.rejected().len(), 2);
        assert!(aggregator.get("/missing").is_none());
    }

    #[test]
    fn test_rerecording_keeps_latest() {
        let aggregator = ResultAggregator::new();
        aggregator.record(
            "/users",
            ProbeOutcome::timed_out(HttpMethod::Get, Duration::from_secs(1)),
        );
        aggregator.record(
            "/users",
            ProbeOutcome::from_status(HttpMethod::Get, 200, Duration::ZERO),
        );

        let record = aggregator.get("/users").unwrap();
        assert_eq!(record.outcomes.len(), 1);
        assert_eq!(record.count(Classification::TimedOut), 0);
        assert!(record.is_endpoint());
    }

    #[test]
    fn test_snapshot_is_idempotent() {
        let aggregator = ResultAggregator::new();
        aggregator.record("/b", ProbeOutcome::from_status(HttpMethod::Put, 201, Duration::ZERO));
        aggregator.record("/a", ProbeOutcome::from_status(HttpMethod::Get, 500, Duration::ZERO));

        let first = aggregator.snapshot();
        let second = aggregator.snapshot();
        assert_eq!(first, second);
        assert_eq!(first.keys().collect::<Vec<_>>(), vec!["/a", "/b"]);
    }

    #[test]
    fn test_concurrent_records_are_not_lost() {
        let aggregator = Arc::new(ResultAggregator::new());
        let paths: Vec<String> = (0..10).map(|i| format!("/p{}", i)).collect();

        let handles: Vec<_> = HttpMethod::ALL
            .into_iter()
            .map(|method| {
                let aggregator = aggregator.clone();
                let paths = paths.clone();
                thread::spawn(move || {
                    for path in &paths {
                        aggregator
                            .record(path, ProbeOutcome::from_status(method, 200, Duration::ZERO));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = aggregator.snapshot();
        assert_eq!(snapshot.len(), 10);
        assert_eq!(aggregator.recorded(), 60);
        for record in snapshot.values() {
            assert_eq!(record.accepted().len(), 6, "lost update on {}", record.path);
        }
    }
}
