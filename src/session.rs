//! Session Store: binds a client-facing session id to one upstream and
//! chain for the lifetime of a TTL.

use std::sync::Arc;
use std::time::Duration;

use crate::error::RouterResult;
use crate::kv::KvStore;
use crate::selector::Selector;
use crate::types::{Session, now_millis};

const SESSION_PREFIX: &str = "session:";

pub struct SessionStore {
    kv: Arc<dyn KvStore>,
    selector: Arc<Selector>,
    session_ttl: Duration,
}

impl SessionStore {
    pub fn new(kv: Arc<dyn KvStore>, selector: Arc<Selector>, session_ttl: Duration) -> Self {
        Self {
            kv,
            selector,
            session_ttl,
        }
    }

    /// Picks an upstream via the selector and stores a fresh session bound
    /// to it. The bound `url` is immutable thereafter.
    pub async fn create_session(&self, chain_id: u64) -> RouterResult<Session> {
        let url = self.selector.get_healthy_rpc_url(chain_id).await?;
        let now = now_millis();
        let session = Session {
            id: uuid::Uuid::new_v4().to_string(),
            url,
            chain_id,
            created_at: now,
            last_used: now,
            request_count: 0,
        };
        self.write(&session).await?;
        Ok(session)
    }

    pub async fn get_session(&self, id: &str) -> RouterResult<Option<Session>> {
        let key = format!("{SESSION_PREFIX}{id}");
        match self.kv.get(&key).await? {
            Some(raw) => Ok(serde_json::from_str(&raw).ok()),
            None => Ok(None),
        }
    }

    /// Refreshes `last_used`/`request_count` and resets the TTL.
    pub async fn update_session(&self, mut session: Session) -> RouterResult<Session> {
        session.last_used = now_millis();
        session.request_count += 1;
        self.write(&session).await?;
        Ok(session)
    }

    pub async fn delete_session(&self, id: &str) -> RouterResult<()> {
        self.kv.delete(&format!("{SESSION_PREFIX}{id}")).await
    }

    /// Belt-and-braces sweep: the KV's own TTL is the primary expiry
    /// mechanism, so this is safe to omit entirely.
    pub async fn cleanup_sessions(&self) -> RouterResult<usize> {
        let keys = self.kv.keys_with_prefix(SESSION_PREFIX).await?;
        let ttl_millis = self.session_ttl.as_millis() as i64;
        let now = now_millis();
        let mut removed = 0;

        for key in keys {
            let Some(raw) = self.kv.get(&key).await? else {
                continue;
            };
            let Ok(session) = serde_json::from_str::<Session>(&raw) else {
                continue;
            };
            if now - session.last_used > ttl_millis {
                self.kv.delete(&key).await?;
                removed += 1;
            }
        }

        Ok(removed)
    }

    async fn write(&self, session: &Session) -> RouterResult<()> {
        let key = format!("{SESSION_PREFIX}{}", session.id);
        let value = serde_json::to_string(session)?;
        self.kv.set(&key, &value, Some(self.session_ttl)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::InMemoryStore;
    use crate::traits::Reload;
    use crate::types::{ChainConfig, HealthRecord};

    struct NoopReloader;

    #[async_trait::async_trait]
    impl Reload for NoopReloader {
        async fn reload(&self) -> RouterResult<()> {
            Ok(())
        }
    }

    async fn store_with_chain() -> (Arc<InMemoryStore>, Arc<Selector>) {
        let kv = Arc::new(InMemoryStore::new());
        let cfg = ChainConfig {
            chain_id: 1,
            name: "eth".to_string(),
            urls: vec!["http://a".to_string()],
        };
        kv.set("chain:1", &serde_json::to_string(&cfg).unwrap(), None)
            .await
            .unwrap();
        let record = HealthRecord {
            url: "http://a".to_string(),
            healthy: true,
            last_check: 0,
            response_time: 10,
            fail_count: 0,
        };
        kv.hset("health", "http://a", &serde_json::to_string(&record).unwrap())
            .await
            .unwrap();
        let selector = Arc::new(Selector::new(
            Arc::clone(&kv) as Arc<dyn KvStore>,
            3,
            Arc::new(NoopReloader),
        ));
        (kv, selector)
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let (kv, selector) = store_with_chain().await;
        let store = SessionStore::new(kv as Arc<dyn KvStore>, selector, Duration::from_secs(3600));

        let created = store.create_session(1).await.unwrap();
        let fetched = store.get_session(&created.id).await.unwrap().unwrap();
        assert_eq!(fetched.url, created.url);
        assert_eq!(fetched.chain_id, 1);
    }

    #[tokio::test]
    async fn update_increments_request_count() {
        let (kv, selector) = store_with_chain().await;
        let store = SessionStore::new(kv as Arc<dyn KvStore>, selector, Duration::from_secs(3600));

        let created = store.create_session(1).await.unwrap();
        let updated = store.update_session(created.clone()).await.unwrap();
        assert_eq!(updated.request_count, 1);
        assert!(updated.last_used >= created.last_used);
    }

    #[tokio::test]
    async fn delete_removes_session() {
        let (kv, selector) = store_with_chain().await;
        let store = SessionStore::new(kv as Arc<dyn KvStore>, selector, Duration::from_secs(3600));

        let created = store.create_session(1).await.unwrap();
        store.delete_session(&created.id).await.unwrap();
        assert!(store.get_session(&created.id).await.unwrap().is_none());
    }
}
