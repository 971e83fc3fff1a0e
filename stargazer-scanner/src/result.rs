use crate::method::HttpMethod;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

/// How a single (path, method) probe turned out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// A 2xx response was received.
    Accepted,
    /// Some other status was received; the method/path is not supported.
    Rejected,
    /// The request failed before a response arrived (refused, DNS, reset).
    Unreachable,
    /// The per-probe timeout elapsed.
    TimedOut,
}

impl Classification {
    pub fn from_status(status_code: u16) -> Self {
        match status_code {
            200..=299 => Classification::Accepted,
            _ => Classification::Rejected,
        }
    }

    /// Transport failures may be worth retrying, responses never are.
    pub fn is_transport_failure(&self) -> bool {
        matches!(self, Classification::Unreachable | Classification::TimedOut)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Accepted => "accepted",
            Classification::Rejected => "rejected",
            Classification::Unreachable => "unreachable",
            Classification::TimedOut => "timed_out",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeOutcome {
    pub method: HttpMethod,
    pub status_code: Option<u16>,
    pub classification: Classification,
    pub response_time: Duration,
    pub error: Option<String>,
}

impl ProbeOutcome {
    pub fn from_status(method: HttpMethod, status_code: u16, response_time: Duration) -> Self {
        Self {
            method,
            status_code: Some(status_code),
            classification: Classification::from_status(status_code),
            response_time,
            error: None,
        }
    }

    pub fn unreachable(method: HttpMethod, response_time: Duration, error: String) -> Self {
        Self {
            method,
            status_code: None,
            classification: Classification::Unreachable,
            response_time,
            error: Some(error),
        }
    }

    pub fn timed_out(method: HttpMethod, timeout: Duration) -> Self {
        Self {
            method,
            status_code: None,
            classification: Classification::TimedOut,
            response_time: timeout,
            error: Some(format!("no response within {:?}", timeout)),
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.classification == Classification::Accepted
    }
}

/// Everything learned about one candidate path, keyed by method.
///
/// Only the latest outcome per method is kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointRecord {
    pub path: String,
    pub outcomes: BTreeMap<HttpMethod, ProbeOutcome>,
}

impl EndpointRecord {
    pub fn new(path: String) -> Self {
        Self {
            path,
            outcomes: BTreeMap::new(),
        }
    }

    pub fn record(&mut self, outcome: ProbeOutcome) {
        self.outcomes.insert(outcome.method, outcome);
    }

    pub fn accepted(&self) -> BTreeSet<HttpMethod> {
        self.methods_with(Classification::Accepted)
    }

    pub fn rejected(&self) -> BTreeSet<HttpMethod> {
        self.methods_with(Classification::Rejected)
    }

    pub fn methods_with(&self, classification: Classification) -> BTreeSet<HttpMethod> {
        self.outcomes
            .values()
            .filter(|o| o.classification == classification)
            .map(|o| o.method)
            .collect()
    }

    pub fn count(&self, classification: Classification) -> usize {
        self.outcomes
            .values()
            .filter(|o| o.classification == classification)
            .count()
    }

    /// A path is an endpoint once any method was accepted.
    pub fn is_endpoint(&self) -> bool {
        self.outcomes.values().any(ProbeOutcome::is_accepted)
    }
}
