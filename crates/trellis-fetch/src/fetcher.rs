//! Rate-limited HTTP fetcher shared by all registry clients

use std::num::NonZeroU32;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use governor::clock::DefaultClock;
use governor::state::InMemoryState;
use governor::state::direct::NotKeyed;
use governor::{Quota, RateLimiter};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

type HostLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Fetcher configuration. All limits apply per host.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Requests-per-second ceiling for one host.
    pub requests_per_second: u32,
    /// Concurrent in-flight requests allowed against one host.
    pub host_concurrency: usize,
    /// Retries after the first attempt for transient failures.
    pub max_retries: u32,
    /// Per-request timeout.
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
    /// Base backoff delay, doubled on each retry.
    #[serde(with = "duration_millis")]
    pub backoff: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        FetchConfig {
            requests_per_second: 10,
            host_concurrency: 4,
            max_retries: 3,
            timeout: Duration::from_secs(30),
            backoff: Duration::from_millis(500),
        }
    }
}

/// Fetch failure, classified after retries are exhausted.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The host kept answering 429 through every retry.
    #[error("rate limited fetching {url}")]
    RateLimited { url: String },

    /// 404 — never retried.
    #[error("not found: {url}")]
    NotFound { url: String },

    /// Connection-level failure or an unexpected status code.
    #[error("transport failure fetching {url}: {reason}")]
    Transport {
        url: String,
        status: Option<u16>,
        reason: String,
    },

    /// The request exceeded the configured timeout on every attempt.
    #[error("timed out fetching {url}")]
    Timeout { url: String },
}

impl FetchError {
    /// Transient failures worth retrying: timeouts, connection resets,
    /// 5xx, and 429. Client errors other than 429 are final.
    pub fn retryable(&self) -> bool {
        match self {
            FetchError::Timeout { .. } | FetchError::RateLimited { .. } => true,
            FetchError::Transport { status, .. } => match status {
                None => true,
                Some(code) => *code >= 500,
            },
            FetchError::NotFound { .. } => false,
        }
    }
}

/// Per-host request counters, reported at session end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostStats {
    pub host: String,
    pub requests: u64,
    pub retries: u64,
    pub failures: u64,
}

#[derive(Default)]
struct Counters {
    requests: AtomicU64,
    retries: AtomicU64,
    failures: AtomicU64,
}

struct HostState {
    limiter: HostLimiter,
    permits: Semaphore,
    counters: Counters,
}

/// Throttled, retrying HTTP GET. Cheap to clone; clones share throttle
/// state and counters.
#[derive(Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    config: FetchConfig,
    hosts: Arc<DashMap<String, Arc<HostState>>>,
}

impl Fetcher {
    pub fn new(config: FetchConfig) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("trellis/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Fetcher {
            client,
            config,
            hosts: Arc::new(DashMap::new()),
        })
    }

    /// Fetch a URL, returning the response body.
    ///
    /// Waits on the host's token bucket and concurrency permit before
    /// each attempt; the wait plus the configured timeout bound how long
    /// a caller can be blocked.
    pub async fn fetch(&self, url: &str) -> Result<Bytes, FetchError> {
        let parsed = reqwest::Url::parse(url).map_err(|e| FetchError::Transport {
            url: url.to_string(),
            status: None,
            reason: e.to_string(),
        })?;
        let state = self.host_state(&host_key(&parsed));

        let _permit = state
            .permits
            .acquire()
            .await
            .map_err(|_| FetchError::Transport {
                url: url.to_string(),
                status: None,
                reason: "host permit pool closed".to_string(),
            })?;

        let mut attempt: u32 = 0;
        loop {
            state.limiter.until_ready().await;
            state.counters.requests.fetch_add(1, Ordering::Relaxed);

            match self.attempt(&parsed).await {
                Ok(bytes) => return Ok(bytes),
                Err(err) if err.retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    state.counters.retries.fetch_add(1, Ordering::Relaxed);
                    let delay = self.config.backoff * 2u32.saturating_pow(attempt - 1);
                    debug!(url = %parsed, attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying fetch");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    state.counters.failures.fetch_add(1, Ordering::Relaxed);
                    warn!(url = %parsed, attempts = attempt + 1, error = %err, "fetch failed");
                    return Err(err);
                }
            }
        }
    }

    async fn attempt(&self, url: &reqwest::Url) -> Result<Bytes, FetchError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| classify_reqwest(url, e))?;

        let status = response.status();
        if status.is_success() {
            return response.bytes().await.map_err(|e| classify_reqwest(url, e));
        }
        Err(match status.as_u16() {
            404 => FetchError::NotFound {
                url: url.to_string(),
            },
            429 => FetchError::RateLimited {
                url: url.to_string(),
            },
            code => FetchError::Transport {
                url: url.to_string(),
                status: Some(code),
                reason: status
                    .canonical_reason()
                    .unwrap_or("unexpected status")
                    .to_string(),
            },
        })
    }

    /// Per-host counters accumulated since the fetcher was created,
    /// sorted by host.
    pub fn host_stats(&self) -> Vec<HostStats> {
        let mut stats: Vec<HostStats> = self
            .hosts
            .iter()
            .map(|entry| HostStats {
                host: entry.key().clone(),
                requests: entry.counters.requests.load(Ordering::Relaxed),
                retries: entry.counters.retries.load(Ordering::Relaxed),
                failures: entry.counters.failures.load(Ordering::Relaxed),
            })
            .collect();
        stats.sort_by(|a, b| a.host.cmp(&b.host));
        stats
    }

    fn host_state(&self, host: &str) -> Arc<HostState> {
        self.hosts
            .entry(host.to_string())
            .or_insert_with(|| {
                let rps = NonZeroU32::new(self.config.requests_per_second.max(1))
                    .unwrap_or(NonZeroU32::MIN);
                // Burst capacity of one keeps request spacing even, so
                // the per-second ceiling holds over any sliding window.
                let quota = Quota::per_second(rps).allow_burst(NonZeroU32::MIN);
                Arc::new(HostState {
                    limiter: RateLimiter::direct(quota),
                    permits: Semaphore::new(self.config.host_concurrency.max(1)),
                    counters: Counters::default(),
                })
            })
            .clone()
    }
}

/// Throttle key: host plus explicit port, so test servers on the same
/// interface do not share a bucket.
fn host_key(url: &reqwest::Url) -> String {
    match (url.host_str(), url.port()) {
        (Some(host), Some(port)) => format!("{host}:{port}"),
        (Some(host), None) => host.to_string(),
        (None, _) => "unknown".to_string(),
    }
}

fn classify_reqwest(url: &reqwest::Url, error: reqwest::Error) -> FetchError {
    if error.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else {
        FetchError::Transport {
            url: url.to_string(),
            status: error.status().map(|s| s.as_u16()),
            reason: error.to_string(),
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
