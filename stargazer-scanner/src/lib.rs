pub mod aggregator;
pub mod error;
pub mod method;
pub mod prober;
pub mod result;
pub mod scheduler;

pub use aggregator::ResultAggregator;
pub use error::ScanError;
pub use method::HttpMethod;
pub use prober::{HttpProber, Probe, RetryingProber, build_probe_url};
pub use result::{Classification, EndpointRecord, ProbeOutcome};
pub use scheduler::{ConcurrencyMode, OutcomeCallback, ProbeScheduler, ScheduleSummary, WorkUnit};
