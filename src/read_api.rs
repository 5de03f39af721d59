//! Read API: pure-read projections of router state for operators. Never
//! mutates the KV store.

use std::sync::Arc;

use crate::error::{RouterError, RouterResult};
use crate::kv::KvStore;
use crate::types::{ChainConfig, ChainStats, HealthRecord, UrlDetail, now_millis};

const HEALTH_KEY: &str = "health";
const SESSION_PREFIX: &str = "session:";

pub struct ReadApi {
    kv: Arc<dyn KvStore>,
    max_fail_count: u32,
}

impl ReadApi {
    pub fn new(kv: Arc<dyn KvStore>, max_fail_count: u32) -> Self {
        Self { kv, max_fail_count }
    }

    pub async fn chain_config(&self, chain_id: u64) -> RouterResult<ChainConfig> {
        let raw = self
            .kv
            .get(&format!("chain:{chain_id}"))
            .await?
            .ok_or(RouterError::ChainNotFound(chain_id))?;
        serde_json::from_str(&raw).map_err(Into::into)
    }

    pub async fn all_chain_ids(&self) -> RouterResult<Vec<u64>> {
        let keys = self.kv.keys_with_prefix("chain:").await?;
        Ok(keys
            .iter()
            .filter_map(|k| k.strip_prefix("chain:"))
            .filter_map(|id| id.parse().ok())
            .collect())
    }

    pub async fn chain_stats(&self, chain_id: u64) -> RouterResult<ChainStats> {
        let chain = self.chain_config(chain_id).await?;
        let health = self.kv.hgetall(HEALTH_KEY).await?;

        let records: Vec<HealthRecord> = chain
            .urls
            .iter()
            .filter_map(|url| health.get(url))
            .filter_map(|raw| serde_json::from_str(raw).ok())
            .collect();

        let active_urls = records.len() as u64;
        let healthy_urls = records
            .iter()
            .filter(|r| r.eligible(self.max_fail_count))
            .count() as u64;
        let average_response_time = if records.is_empty() {
            0.0
        } else {
            records.iter().map(|r| r.response_time as f64).sum::<f64>() / records.len() as f64
        };

        let session_keys = self.kv.keys_with_prefix(SESSION_PREFIX).await?;
        let mut total_sessions = 0u64;
        for key in session_keys {
            if let Some(raw) = self.kv.get(&key).await? {
                if let Ok(session) = serde_json::from_str::<crate::types::Session>(&raw) {
                    if session.chain_id == chain_id {
                        total_sessions += 1;
                    }
                }
            }
        }

        Ok(ChainStats {
            total_sessions,
            active_urls,
            healthy_urls,
            average_response_time,
        })
    }

    pub async fn url_details(&self, chain_id: u64) -> RouterResult<Vec<UrlDetail>> {
        let chain = self.chain_config(chain_id).await?;
        let health = self.kv.hgetall(HEALTH_KEY).await?;
        let now = now_millis();

        Ok(chain
            .urls
            .iter()
            .map(|url| {
                let record = health
                    .get(url)
                    .and_then(|raw| serde_json::from_str::<HealthRecord>(raw).ok());
                match record {
                    Some(r) => UrlDetail {
                        url: url.clone(),
                        healthy: r.healthy,
                        fail_count: r.fail_count,
                        response_time: r.response_time,
                        last_check: r.last_check,
                    },
                    None => UrlDetail {
                        url: url.clone(),
                        healthy: false,
                        fail_count: 0,
                        response_time: 0,
                        last_check: now,
                    },
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::InMemoryStore;

    async fn seeded(chain_id: u64) -> Arc<InMemoryStore> {
        let kv = Arc::new(InMemoryStore::new());
        let cfg = ChainConfig {
            chain_id,
            name: "eth".to_string(),
            urls: vec!["http://a".to_string(), "http://b".to_string()],
        };
        kv.set(&format!("chain:{chain_id}"), &serde_json::to_string(&cfg).unwrap(), None)
            .await
            .unwrap();
        let healthy = HealthRecord {
            url: "http://a".to_string(),
            healthy: true,
            last_check: 5,
            response_time: 20,
            fail_count: 0,
        };
        kv.hset("health", "http://a", &serde_json::to_string(&healthy).unwrap())
            .await
            .unwrap();
        kv
    }

    #[tokio::test]
    async fn url_details_defaults_missing_records() {
        let kv = seeded(1).await;
        let api = ReadApi::new(kv, 3);
        let details = api.url_details(1).await.unwrap();
        assert_eq!(details.len(), 2);
        assert!(details[0].healthy);
        assert!(!details[1].healthy);
        assert_eq!(details[1].fail_count, 0);
    }

    #[tokio::test]
    async fn chain_stats_counts_only_urls_with_records() {
        let kv = seeded(1).await;
        let api = ReadApi::new(kv, 3);
        let stats = api.chain_stats(1).await.unwrap();
        assert_eq!(stats.active_urls, 1);
        assert_eq!(stats.healthy_urls, 1);
        assert_eq!(stats.average_response_time, 20.0);
    }

    #[tokio::test]
    async fn unknown_chain_fails() {
        let kv = Arc::new(InMemoryStore::new());
        let api = ReadApi::new(kv, 3);
        assert!(matches!(
            api.chain_stats(42).await.unwrap_err(),
            RouterError::ChainNotFound(42)
        ));
    }
}
