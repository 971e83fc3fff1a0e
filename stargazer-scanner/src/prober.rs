use crate::error::{Result, ScanError};
use crate::method::HttpMethod;
use crate::result::ProbeOutcome;
use reqwest::Client;
use std::future::Future;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::{TcpStream, lookup_host};
use tracing::{debug, warn};
use url::{Host, Url};

/// Issues a single probe and classifies what came back.
///
/// `probe` never fails: refused connections, DNS errors and timeouts are encoded in the
/// outcome's classification so the scheduler can treat them as data.
pub trait Probe: Send + Sync {
    fn probe(
        &self,
        uri: &Url,
        method: HttpMethod,
        timeout: Duration,
    ) -> impl Future<Output = ProbeOutcome> + Send;

    /// Fails with [`ScanError::UnreachableHost`] when the target cannot be resolved or
    /// connected to at all.
    fn check_host(&self, base: &Url, timeout: Duration) -> impl Future<Output = Result<()>> + Send;
}

pub struct HttpProber {
    client: Client,
}

impl HttpProber {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("Stargazer/", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::none())
            .pool_max_idle_per_host(50) // Connection pooling
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .build()?;

        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl Probe for HttpProber {
    async fn probe(&self, uri: &Url, method: HttpMethod, timeout: Duration) -> ProbeOutcome {
        debug!("Probing {} {}", method, uri);

        let start = Instant::now();
        let response = self
            .client
            .request(method.to_reqwest(), uri.clone())
            .timeout(timeout)
            .send()
            .await;
        let elapsed = start.elapsed();

        // The body is never read, only the status line matters.
        match response {
            Ok(response) => {
                let status = response.status().as_u16();
                debug!("{} {} -> {}", method, uri, status);
                ProbeOutcome::from_status(method, status, elapsed)
            }
            Err(e) if e.is_timeout() => {
                debug!("{} {} timed out after {:?}", method, uri, timeout);
                ProbeOutcome::timed_out(method, timeout)
            }
            Err(e) => {
                debug!("{} {} failed: {}", method, uri, e);
                ProbeOutcome::unreachable(method, elapsed, e.to_string())
            }
        }
    }

    async fn check_host(&self, base: &Url, timeout: Duration) -> Result<()> {
        let host = host_for_lookup(base)?;
        let port = base
            .port_or_known_default()
            .ok_or_else(|| ScanError::InvalidUrl(format!("No port for scheme in {}", base)))?;

        let unreachable = |reason: String| ScanError::UnreachableHost {
            host: host.clone(),
            reason,
        };

        let addrs: Vec<SocketAddr> =
            match tokio::time::timeout(timeout, lookup_host((host.as_str(), port))).await {
                Ok(Ok(addrs)) => addrs.collect(),
                Ok(Err(e)) => return Err(unreachable(format!("DNS resolution failed: {}", e))),
                Err(_) => return Err(unreachable("DNS resolution timed out".to_string())),
            };

        if addrs.is_empty() {
            return Err(unreachable("no addresses resolved".to_string()));
        }

        let mut last_error = String::new();
        for addr in addrs {
            match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
                Ok(Ok(_)) => {
                    debug!("Host {} reachable at {}", host, addr);
                    return Ok(());
                }
                Ok(Err(e)) => {
                    warn!("Connect to {} failed: {}", addr, e);
                    last_error = format!("connect to {} failed: {}", addr, e);
                }
                Err(_) => {
                    warn!("Connect to {} timed out", addr);
                    last_error = format!("connect to {} timed out", addr);
                }
            }
        }

        Err(unreachable(last_error))
    }
}

fn host_for_lookup(base: &Url) -> Result<String> {
    match base.host() {
        Some(Host::Domain(domain)) => Ok(domain.to_string()),
        Some(Host::Ipv4(ip)) => Ok(ip.to_string()),
        Some(Host::Ipv6(ip)) => Ok(ip.to_string()),
        None => Err(ScanError::InvalidUrl(format!("No host in {}", base))),
    }
}

/// Wraps another prober and retries transport failures.
///
/// Accepted and Rejected outcomes are final; Unreachable and TimedOut are retried up to
/// `retries` times with a fixed backoff, and the last outcome wins.
pub struct RetryingProber<P> {
    inner: P,
    retries: usize,
    backoff: Duration,
}

impl<P: Probe> RetryingProber<P> {
    pub fn new(inner: P, retries: usize) -> Self {
        Self {
            inner,
            retries,
            backoff: Duration::from_millis(250),
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn retries(&self) -> usize {
        self.retries
    }
}

impl<P: Probe> Probe for RetryingProber<P> {
    async fn probe(&self, uri: &Url, method: HttpMethod, timeout: Duration) -> ProbeOutcome {
        let mut outcome = self.inner.probe(uri, method, timeout).await;
        let mut attempt = 0;

        while outcome.classification.is_transport_failure() && attempt < self.retries {
            attempt += 1;
            debug!(
                "Retrying {} {} after {} (attempt {}/{})",
                method, uri, outcome.classification, attempt, self.retries
            );
            tokio::time::sleep(self.backoff).await;
            outcome = self.inner.probe(uri, method, timeout).await;
        }

        outcome
    }

    async fn check_host(&self, base: &Url, timeout: Duration) -> Result<()> {
        self.inner.check_host(base, timeout).await
    }
}

/// Joins a candidate path onto the target, keeping any path prefix the target already has.
pub fn build_probe_url(base: &Url, path: &str) -> Result<Url> {
    if base.cannot_be_a_base() {
        return Err(ScanError::InvalidUrl(format!("{} cannot be a base URL", base)));
    }

    let mut url = base.clone();
    url.set_query(None);
    url.set_fragment(None);

    let prefix = url.path().trim_end_matches('/').to_string();
    let new_path = format!("{}/{}", prefix, path.trim_start_matches('/'));
    url.set_path(&new_path);

    Ok(url)
}
