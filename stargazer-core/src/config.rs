use crate::error::{MapError, Result};
use serde::Serialize;
use stargazer_scanner::{ConcurrencyMode, HttpMethod};
use std::time::Duration;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(250);
pub const MAX_RETRIES: usize = 10;

/// Immutable settings for one mapping run.
///
/// Only obtainable through [`RunConfigBuilder::build`], which validates every field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunConfig {
    mode: ConcurrencyMode,
    workers: usize,
    timeout: Duration,
    methods: Vec<HttpMethod>,
    queue_capacity: usize,
    retries: usize,
    retry_backoff: Duration,
}

impl RunConfig {
    pub fn builder() -> RunConfigBuilder {
        RunConfigBuilder::default()
    }

    pub fn mode(&self) -> ConcurrencyMode {
        self.mode
    }

    /// Pool size in parallel mode; serial runs always use one.
    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Configured methods in probing order.
    pub fn methods(&self) -> &[HttpMethod] {
        &self.methods
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    pub fn retries(&self) -> usize {
        self.retries
    }

    pub fn retry_backoff(&self) -> Duration {
        self.retry_backoff
    }

    /// Longest one work unit may take, retries included. Saturates at `Duration::MAX`.
    pub fn dispatch_deadline(&self) -> Duration {
        let retries = self.retries as u32;
        self.timeout
            .saturating_mul(retries + 1)
            .saturating_add(self.retry_backoff.saturating_mul(retries))
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            mode: ConcurrencyMode::Serial,
            workers: 1,
            timeout: DEFAULT_TIMEOUT,
            methods: HttpMethod::ALL.to_vec(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            retries: 0,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunConfigBuilder {
    mode: Option<ConcurrencyMode>,
    workers: Option<usize>,
    timeout: Option<Duration>,
    methods: Option<Vec<HttpMethod>>,
    queue_capacity: Option<usize>,
    retries: Option<usize>,
    retry_backoff: Option<Duration>,
}

impl RunConfigBuilder {
    pub fn mode(mut self, mode: ConcurrencyMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn methods(mut self, methods: &[HttpMethod]) -> Self {
        self.methods = Some(methods.to_vec());
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    pub fn retries(mut self, retries: usize) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = Some(backoff);
        self
    }

    pub fn build(self) -> Result<RunConfig> {
        let defaults = RunConfig::default();

        let workers = self.workers.unwrap_or(defaults.workers);
        if workers == 0 {
            return Err(MapError::Configuration(
                "Worker count must be at least 1".to_string(),
            ));
        }

        let timeout = self.timeout.unwrap_or(defaults.timeout);
        if timeout.is_zero() {
            return Err(MapError::Configuration(
                "Probe timeout must be greater than zero".to_string(),
            ));
        }

        let methods = match self.methods {
            Some(methods) => HttpMethod::canonical_set(&methods),
            None => defaults.methods,
        };
        if methods.is_empty() {
            return Err(MapError::Configuration(
                "At least one HTTP method must be probed".to_string(),
            ));
        }

        let queue_capacity = self.queue_capacity.unwrap_or(defaults.queue_capacity);
        if queue_capacity == 0 {
            return Err(MapError::Configuration(
                "Work queue capacity must be at least 1".to_string(),
            ));
        }

        let retries = self.retries.unwrap_or(defaults.retries);
        if retries > MAX_RETRIES {
            return Err(MapError::Configuration(format!(
                "At most {} retries are allowed, got {}",
                MAX_RETRIES, retries
            )));
        }

        Ok(RunConfig {
            mode: self.mode.unwrap_or(defaults.mode),
            workers,
            timeout,
            methods,
            queue_capacity,
            retries,
            retry_backoff: self.retry_backoff.unwrap_or(defaults.retry_backoff),
        })
    }
}
