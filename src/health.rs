//! Health Checker: maintains the `health` hash as a live projection of
//! upstream reachability.
//!
//! A single owner tracks consecutive failures per endpoint, same as a
//! circuit breaker would, except the failure/eligibility state lives in
//! the shared KV store instead of process memory, so every component
//! sees the same view.

use futures_util::stream::{self, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

use crate::error::RouterResult;
use crate::kv::KvStore;
use crate::types::{HealthRecord, RpcRequest, RpcResponse, now_millis};

const HEALTH_KEY: &str = "health";
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const PROBE_CONCURRENCY: usize = 16;

pub struct HealthChecker {
    kv: Arc<dyn KvStore>,
    client: reqwest::Client,
    max_fail_count: u32,
    health_ttl: Duration,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl HealthChecker {
    pub fn new(kv: Arc<dyn KvStore>, max_fail_count: u32, health_ttl: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(PROBE_TIMEOUT)
            .build()
            .expect("failed to build health check client");
        Self {
            kv,
            client,
            max_fail_count,
            health_ttl,
            ticker: Mutex::new(None),
        }
    }

    /// Starts the periodic probe ticker. No-op if already running.
    pub fn start(self: &Arc<Self>, interval: Duration) {
        let mut ticker = self.ticker.lock();
        if ticker.is_some() {
            return;
        }
        let this = Arc::clone(self);
        *ticker = Some(tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            loop {
                tick.tick().await;
                this.run_probe_round().await;
            }
        }));
        tracing::info!("health checker started, interval={:?}", interval);
    }

    /// Cancels the ticker. In-flight probes may complete or be abandoned.
    pub fn stop(&self) {
        if let Some(handle) = self.ticker.lock().take() {
            handle.abort();
            tracing::info!("health checker stopped");
        }
    }

    async fn run_probe_round(&self) {
        let urls = match self.kv.hgetall(HEALTH_KEY).await {
            Ok(map) => map.into_keys().collect::<Vec<_>>(),
            Err(e) => {
                tracing::warn!("health checker: failed to read known urls: {e}");
                return;
            }
        };

        stream::iter(urls)
            .map(|url| async move {
                if let Err(e) = self.check_health(&url).await {
                    tracing::warn!("health checker: probe of {url} failed to record: {e}");
                }
            })
            .buffer_unordered(PROBE_CONCURRENCY)
            .collect::<()>()
            .await;
    }

    /// Forces an immediate probe of `url`, writes the resulting record, and
    /// returns it. Idempotent, safe to call concurrently.
    pub async fn check_health(&self, url: &str) -> RouterResult<HealthRecord> {
        let probe = RpcRequest::health_probe();
        let started = Instant::now();
        let outcome = self
            .client
            .post(url)
            .json(&probe)
            .send()
            .await
            .map_err(|e| e.to_string())
            .and_then(|resp| {
                if !resp.status().is_success() {
                    return Err(format!("http status {}", resp.status()));
                }
                Ok(resp)
            });

        let elapsed = started.elapsed().as_millis() as i64;

        let record = match outcome {
            Ok(resp) => match resp.json::<RpcResponse>().await {
                Ok(body) if body.result.is_some() => HealthRecord {
                    url: url.to_string(),
                    healthy: true,
                    last_check: now_millis(),
                    response_time: elapsed,
                    fail_count: 0,
                },
                Ok(_) => self.failed_record(url, elapsed, "missing result field").await,
                Err(e) => self.failed_record(url, elapsed, &e.to_string()).await,
            },
            Err(e) => self.failed_record(url, elapsed, &e).await,
        };

        let serialized = serde_json::to_string(&record)?;
        self.kv.hset(HEALTH_KEY, url, &serialized).await?;
        self.kv.expire(HEALTH_KEY, self.health_ttl).await?;
        Ok(record)
    }

    async fn failed_record(&self, url: &str, elapsed: i64, reason: &str) -> HealthRecord {
        let prior_fail_count = self.current_fail_count(url).await;
        let fail_count = prior_fail_count + 1;

        if fail_count == self.max_fail_count {
            tracing::warn!(
                "upstream {url} crossed max_fail_count={} ({reason})",
                self.max_fail_count
            );
        }

        HealthRecord {
            url: url.to_string(),
            healthy: false,
            last_check: now_millis(),
            response_time: elapsed,
            fail_count,
        }
    }

    async fn current_fail_count(&self, url: &str) -> u32 {
        match self.kv.hgetall(HEALTH_KEY).await {
            Ok(map) => map
                .get(url)
                .and_then(|raw| serde_json::from_str::<HealthRecord>(raw).ok())
                .map(|r| r.fail_count)
                .unwrap_or(0),
            Err(_) => 0,
        }
    }
}

#[async_trait::async_trait]
impl crate::traits::CheckHealth for HealthChecker {
    async fn check_health(&self, url: &str) -> RouterResult<HealthRecord> {
        HealthChecker::check_health(self, url).await
    }
}
