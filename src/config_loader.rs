//! Config Loader: keeps the KV-resident `ChainConfig` set consistent with an
//! on-disk JSON file, polling its modification time rather than watching it
//! directly (the minimal viable form of change detection named in the
//! contract).

use parking_lot::Mutex as SyncMutex;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

use crate::error::{RouterError, RouterResult};
use crate::kv::{KvOp, KvStore};
use crate::traits::CheckHealth;
use crate::types::ConfigFile;

const HEALTH_KEY: &str = "health";
const CHAIN_PREFIX: &str = "chain:";

pub struct ConfigLoader {
    path: PathBuf,
    kv: Arc<dyn KvStore>,
    health_checker: Arc<dyn CheckHealth>,
    config_ttl: Duration,
    health_ttl: Duration,
    /// Config Loader's sole in-process mutable state: the on-disk mtime it
    /// last reconciled against, in milliseconds since the epoch.
    last_modified: SyncMutex<Option<i64>>,
    /// Serializes concurrent reloads so two file reads never interleave
    /// their writes.
    reload_lock: AsyncMutex<()>,
    ticker: SyncMutex<Option<JoinHandle<()>>>,
}

impl ConfigLoader {
    pub fn new(
        path: impl Into<PathBuf>,
        kv: Arc<dyn KvStore>,
        health_checker: Arc<dyn CheckHealth>,
        config_ttl: Duration,
        health_ttl: Duration,
    ) -> Self {
        Self {
            path: path.into(),
            kv,
            health_checker,
            config_ttl,
            health_ttl,
            last_modified: SyncMutex::new(None),
            reload_lock: AsyncMutex::new(()),
            ticker: SyncMutex::new(None),
        }
    }

    /// Starts the periodic file-mtime poller. No-op if already running.
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
                this.poll_for_change().await;
            }
        }));
        tracing::info!("config loader started, interval={:?}", interval);
    }

    pub fn stop(&self) {
        if let Some(handle) = self.ticker.lock().take() {
            handle.abort();
            tracing::info!("config loader stopped");
        }
    }

    async fn poll_for_change(&self) {
        let disk_mtime = match self.file_mtime_millis() {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!("config loader: failed to stat {:?}: {e}", self.path);
                return;
            }
        };

        let stored = *self.last_modified.lock();
        let changed = match stored {
            None => true,
            Some(prev) => disk_mtime > prev,
        };

        if changed {
            if let Err(e) = self.reload().await {
                tracing::warn!("config loader: reload failed: {e}");
            }
        }
    }

    fn file_mtime_millis(&self) -> std::io::Result<i64> {
        let meta = std::fs::metadata(&self.path)?;
        let modified = meta.modified()?;
        let millis = modified
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64;
        Ok(millis)
    }

    /// Loads and parses the file, validating the minimal schema. Does not
    /// touch the KV store or in-process state.
    fn load_file(&self) -> RouterResult<ConfigFile> {
        let raw = std::fs::read_to_string(&self.path)
            .map_err(|e| RouterError::InvalidConfig(format!("read {:?}: {e}", self.path)))?;
        let parsed: ConfigFile = serde_json::from_str(&raw)
            .map_err(|e| RouterError::InvalidConfig(format!("parse: {e}")))?;
        Ok(parsed)
    }

    /// Reloads from disk: parses the file, reconciles the KV store in one
    /// transaction, and re-probes every surviving/new URL. Concurrent
    /// callers serialize on `reload_lock`; a malformed file leaves prior
    /// state untouched.
    pub async fn reload(&self) -> RouterResult<()> {
        let _guard = self.reload_lock.lock().await;

        let parsed = self.load_file()?;
        let chains: Vec<_> = parsed
            .chains
            .into_iter()
            .map(|c| c.normalized())
            .collect();

        let old_urls: HashSet<String> = self
            .kv
            .hgetall(HEALTH_KEY)
            .await?
            .into_keys()
            .collect();
        let new_urls: HashSet<String> = chains
            .iter()
            .flat_map(|c| c.urls.iter().cloned())
            .collect();

        let mut ops = Vec::new();

        for key in self.kv.keys_with_prefix(CHAIN_PREFIX).await? {
            ops.push(KvOp::Delete { key });
        }

        for stale in old_urls.difference(&new_urls) {
            ops.push(KvOp::HDel {
                key: HEALTH_KEY.to_string(),
                field: stale.clone(),
            });
        }

        for chain in &chains {
            let key = format!("{CHAIN_PREFIX}{}", chain.chain_id);
            let value = serde_json::to_string(chain)?;
            ops.push(KvOp::Set {
                key,
                value,
                ttl: Some(self.config_ttl),
            });
        }

        ops.push(KvOp::Expire {
            key: HEALTH_KEY.to_string(),
            ttl: self.health_ttl,
        });

        self.kv.exec_transaction(ops).await?;

        if let Ok(mtime) = self.file_mtime_millis() {
            *self.last_modified.lock() = Some(mtime);
        }

        tracing::info!(
            "config loader: reloaded {} chains, {} urls",
            chains.len(),
            new_urls.len()
        );

        for url in new_urls {
            let checker = Arc::clone(&self.health_checker);
            tokio::spawn(async move {
                if let Err(e) = checker.check_health(&url).await {
                    tracing::warn!("config loader: post-reload probe of {url} failed: {e}");
                }
            });
        }

        Ok(())
    }
}

#[async_trait::async_trait]
impl crate::traits::Reload for ConfigLoader {
    async fn reload(&self) -> RouterResult<()> {
        ConfigLoader::reload(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::HealthChecker;
    use crate::kv::InMemoryStore;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_config(dir: &std::path::Path, body: &str) -> PathBuf {
        let path = dir.join("chains.json");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        path
    }

    #[tokio::test]
    async fn reload_populates_chain_and_dedupes_urls() {
        let dir = tempdir().unwrap();
        let path = write_config(
            dir.path(),
            r#"{"chains":[{"chainId":1,"name":"eth","urls":["http://a","http://a","http://b"]}]}"#,
        );
        let kv: Arc<dyn KvStore> = Arc::new(InMemoryStore::new());
        let checker: Arc<dyn CheckHealth> =
            Arc::new(HealthChecker::new(Arc::clone(&kv), 3, Duration::from_secs(3600)));
        let loader = ConfigLoader::new(
            path,
            Arc::clone(&kv),
            checker,
            Duration::from_secs(86_400),
            Duration::from_secs(3_600),
        );

        loader.reload().await.unwrap();

        let raw = kv.get("chain:1").await.unwrap().expect("chain stored");
        let cfg: crate::types::ChainConfig = serde_json::from_str(&raw).unwrap();
        assert_eq!(cfg.urls, vec!["http://a".to_string(), "http://b".to_string()]);
    }

    #[tokio::test]
    async fn malformed_file_is_rejected_without_touching_state() {
        let dir = tempdir().unwrap();
        let path = write_config(dir.path(), r#"{"chains": "not-an-array"}"#);
        let kv: Arc<dyn KvStore> = Arc::new(InMemoryStore::new());
        let checker: Arc<dyn CheckHealth> =
            Arc::new(HealthChecker::new(Arc::clone(&kv), 3, Duration::from_secs(3600)));
        let loader = ConfigLoader::new(
            path,
            kv,
            checker,
            Duration::from_secs(86_400),
            Duration::from_secs(3_600),
        );

        let result = loader.reload().await;
        assert!(matches!(result, Err(RouterError::InvalidConfig(_))));
    }

}
