//! Selector: picks the fastest healthy upstream for a chain, with a
//! self-healing reload trigger when the eligible pool collapses to empty.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{RouterError, RouterResult};
use crate::kv::KvStore;
use crate::traits::Reload;
use crate::types::{ChainConfig, HealthRecord};

const COLLAPSE_WINDOW: Duration = Duration::from_secs(10);
const COLLAPSE_THRESHOLD: usize = 3;
const HEALTH_KEY: &str = "health";

/// Fixed-capacity ring of recent collapse timestamps. Safe under concurrent
/// increment via a single `parking_lot::Mutex`.
struct CollapseWindow {
    hits: Mutex<Vec<Instant>>,
}

impl CollapseWindow {
    fn new() -> Self {
        Self {
            hits: Mutex::new(Vec::with_capacity(COLLAPSE_THRESHOLD)),
        }
    }

    /// Records a collapse and reports whether the window just tripped.
    /// Tripping clears the window.
    fn record(&self) -> bool {
        let now = Instant::now();
        let mut hits = self.hits.lock();
        hits.retain(|t| now.duration_since(*t) < COLLAPSE_WINDOW);
        hits.push(now);
        if hits.len() >= COLLAPSE_THRESHOLD {
            hits.clear();
            true
        } else {
            false
        }
    }
}

pub struct Selector {
    kv: Arc<dyn KvStore>,
    max_fail_count: u32,
    config_loader: Arc<dyn Reload>,
    collapse_window: CollapseWindow,
}

impl Selector {
    pub fn new(kv: Arc<dyn KvStore>, max_fail_count: u32, config_loader: Arc<dyn Reload>) -> Self {
        Self {
            kv,
            max_fail_count,
            config_loader,
            collapse_window: CollapseWindow::new(),
        }
    }

    pub async fn get_healthy_rpc_url(&self, chain_id: u64) -> RouterResult<String> {
        let chain = self.load_chain(chain_id).await?;
        let health = self.kv.hgetall(HEALTH_KEY).await?;

        let mut candidates: Vec<(&String, HealthRecord)> = chain
            .urls
            .iter()
            .filter_map(|url| {
                let record: HealthRecord = serde_json::from_str(health.get(url)?).ok()?;
                record.eligible(self.max_fail_count).then_some((url, record))
            })
            .collect();

        if candidates.is_empty() {
            if self.collapse_window.record() {
                tracing::error!(
                    "chain {chain_id}: selection pool collapsed, forcing config reload"
                );
                if let Err(e) = self.config_loader.reload().await {
                    tracing::warn!("chain {chain_id}: self-healing reload failed: {e}");
                }
            }
            return Err(RouterError::NoHealthyRpc(chain_id));
        }

        // Stable sort preserves `config.urls` order among equal response
        // times, giving the input-order tie-break the contract requires.
        candidates.sort_by_key(|(_, record)| record.response_time);
        Ok(candidates[0].0.clone())
    }

    async fn load_chain(&self, chain_id: u64) -> RouterResult<ChainConfig> {
        let key = format!("chain:{chain_id}");
        let raw = self
            .kv
            .get(&key)
            .await?
            .ok_or(RouterError::ChainNotFound(chain_id))?;
        serde_json::from_str(&raw).map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::InMemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingReloader(AtomicUsize);

    #[async_trait::async_trait]
    impl Reload for CountingReloader {
        async fn reload(&self) -> RouterResult<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    async fn seed(kv: &InMemoryStore, chain_id: u64, urls: &[&str]) {
        let cfg = ChainConfig {
            chain_id,
            name: "test".to_string(),
            urls: urls.iter().map(|s| s.to_string()).collect(),
        };
        kv.set(
            &format!("chain:{chain_id}"),
            &serde_json::to_string(&cfg).unwrap(),
            None,
        )
        .await
        .unwrap();
    }

    async fn seed_health(kv: &InMemoryStore, url: &str, healthy: bool, fail_count: u32, rt: i64) {
        let record = HealthRecord {
            url: url.to_string(),
            healthy,
            last_check: 0,
            response_time: rt,
            fail_count,
        };
        kv.hset(HEALTH_KEY, url, &serde_json::to_string(&record).unwrap())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn picks_fastest_healthy_url() {
        let kv = Arc::new(InMemoryStore::new());
        seed(&kv, 1, &["http://a", "http://b", "http://c"]).await;
        seed_health(&kv, "http://a", true, 0, 10).await;
        seed_health(&kv, "http://b", true, 0, 50).await;
        seed_health(&kv, "http://c", false, 3, 5).await;

        let reloader = Arc::new(CountingReloader(AtomicUsize::new(0)));
        let selector = Selector::new(kv, 3, reloader);

        let url = selector.get_healthy_rpc_url(1).await.unwrap();
        assert_eq!(url, "http://a");
    }

    #[tokio::test]
    async fn ties_break_by_input_order() {
        let kv = Arc::new(InMemoryStore::new());
        seed(&kv, 1, &["http://a", "http://b"]).await;
        seed_health(&kv, "http://a", true, 0, 10).await;
        seed_health(&kv, "http://b", true, 0, 10).await;

        let reloader = Arc::new(CountingReloader(AtomicUsize::new(0)));
        let selector = Selector::new(kv, 3, reloader);

        let url = selector.get_healthy_rpc_url(1).await.unwrap();
        assert_eq!(url, "http://a");
    }

    #[tokio::test]
    async fn unknown_chain_fails() {
        let kv = Arc::new(InMemoryStore::new());
        let reloader = Arc::new(CountingReloader(AtomicUsize::new(0)));
        let selector = Selector::new(kv, 3, reloader);

        let err = selector.get_healthy_rpc_url(99).await.unwrap_err();
        assert!(matches!(err, RouterError::ChainNotFound(99)));
    }

    #[tokio::test]
    async fn collapse_triggers_reload_after_three_strikes() {
        let kv = Arc::new(InMemoryStore::new());
        seed(&kv, 1, &["http://a"]).await;
        seed_health(&kv, "http://a", false, 3, 5).await;

        let reloader = Arc::new(CountingReloader(AtomicUsize::new(0)));
        let selector = Selector::new(kv, 3, Arc::clone(&reloader) as Arc<dyn Reload>);

        for _ in 0..2 {
            assert!(selector.get_healthy_rpc_url(1).await.is_err());
        }
        assert_eq!(reloader.0.load(Ordering::SeqCst), 0);

        assert!(selector.get_healthy_rpc_url(1).await.is_err());
        assert_eq!(reloader.0.load(Ordering::SeqCst), 1);
    }
}
