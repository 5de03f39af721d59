//! Executor: the end-to-end request path. Resolves or creates a session,
//! forwards the caller's JSON-RPC payload to the bound upstream, reports
//! health on failure, and formats the reply.

use std::sync::Arc;
use std::time::Duration;

use crate::error::{RouterError, RouterResult};
use crate::format::format_reply;
use crate::session::SessionStore;
use crate::traits::CheckHealth;
use crate::types::Session;

const FORWARD_TIMEOUT: Duration = Duration::from_secs(30);

pub struct Executor {
    sessions: Arc<SessionStore>,
    health_checker: Arc<dyn CheckHealth>,
    client: reqwest::Client,
}

impl Executor {
    pub fn new(sessions: Arc<SessionStore>, health_checker: Arc<dyn CheckHealth>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(FORWARD_TIMEOUT)
            .build()
            .expect("failed to build forwarding client");
        Self {
            sessions,
            health_checker,
            client,
        }
    }

    pub async fn execute_request(
        &self,
        chain_id: u64,
        payload: serde_json::Value,
        session_id: Option<&str>,
    ) -> RouterResult<serde_json::Value> {
        let session = self.resolve_session(chain_id, session_id).await?;

        match self.forward(&session.url, &payload).await {
            Ok(body) => {
                let updated = self.sessions.update_session(session).await?;
                Ok(format_reply(&body, &updated.id))
            }
            Err(ForwardFailure::Decodable(body)) => {
                self.health_checker.check_health(&session.url).await.ok();
                Ok(format_reply(&body, &session.id))
            }
            Err(ForwardFailure::Undecodable) => {
                self.health_checker.check_health(&session.url).await.ok();
                Err(RouterError::NoHealthyRpc(chain_id))
            }
        }
    }

    async fn resolve_session(
        &self,
        chain_id: u64,
        session_id: Option<&str>,
    ) -> RouterResult<Session> {
        match session_id {
            None => self.sessions.create_session(chain_id).await,
            Some(id) => match self.sessions.get_session(id).await? {
                Some(existing) if existing.chain_id == chain_id => Ok(existing),
                Some(stale) => {
                    self.sessions.delete_session(&stale.id).await?;
                    self.sessions.create_session(chain_id).await
                }
                None => Err(RouterError::InvalidSession(id.to_string())),
            },
        }
    }

    async fn forward(
        &self,
        url: &str,
        payload: &serde_json::Value,
    ) -> Result<serde_json::Value, ForwardFailure> {
        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!("executor: forward to {url} failed: {e}");
                ForwardFailure::Undecodable
            })?;

        let status_ok = response.status().is_success();
        match response.json::<serde_json::Value>().await {
            Ok(body) if status_ok => Ok(body),
            Ok(body) => Err(ForwardFailure::Decodable(body)),
            Err(_) => Err(ForwardFailure::Undecodable),
        }
    }
}

enum ForwardFailure {
    /// The upstream returned a body we could decode, even though the
    /// status or RPC envelope indicated an error; bubble it to the client.
    Decodable(serde_json::Value),
    /// Transport failure or an undecodable body: no reply to bubble.
    Undecodable,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::{InMemoryStore, KvStore};
    use crate::selector::Selector;
    use crate::traits::Reload;
    use crate::types::{ChainConfig, HealthRecord};
    use std::sync::Arc;

    struct NoopReloader;

    #[async_trait::async_trait]
    impl Reload for NoopReloader {
        async fn reload(&self) -> RouterResult<()> {
            Ok(())
        }
    }

    struct NoopChecker;

    #[async_trait::async_trait]
    impl CheckHealth for NoopChecker {
        async fn check_health(&self, url: &str) -> RouterResult<HealthRecord> {
            Ok(HealthRecord {
                url: url.to_string(),
                healthy: false,
                last_check: 0,
                response_time: 0,
                fail_count: 1,
            })
        }
    }

    async fn executor_with_chain(chain_id: u64, url: &str) -> Executor {
        let kv = Arc::new(InMemoryStore::new());
        let cfg = ChainConfig {
            chain_id,
            name: "test".to_string(),
            urls: vec![url.to_string()],
        };
        kv.set(&format!("chain:{chain_id}"), &serde_json::to_string(&cfg).unwrap(), None)
            .await
            .unwrap();
        let record = HealthRecord {
            url: url.to_string(),
            healthy: true,
            last_check: 0,
            response_time: 10,
            fail_count: 0,
        };
        kv.hset("health", url, &serde_json::to_string(&record).unwrap())
            .await
            .unwrap();

        let selector = Arc::new(Selector::new(
            Arc::clone(&kv) as Arc<dyn KvStore>,
            3,
            Arc::new(NoopReloader),
        ));
        let sessions = Arc::new(SessionStore::new(
            kv as Arc<dyn KvStore>,
            selector,
            Duration::from_secs(3600),
        ));
        Executor::new(sessions, Arc::new(NoopChecker))
    }

    #[tokio::test]
    async fn unknown_session_id_is_invalid() {
        let executor = executor_with_chain(1, "http://127.0.0.1:1").await;
        let err = executor
            .execute_request(1, serde_json::json!({}), Some("missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::InvalidSession(_)));
    }

    #[tokio::test]
    async fn no_session_creates_one_and_fails_closed_on_unreachable_upstream() {
        let executor = executor_with_chain(1, "http://127.0.0.1:1").await;
        let err = executor
            .execute_request(1, serde_json::json!({"jsonrpc":"2.0","method":"x","id":1}), None)
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::NoHealthyRpc(1)));
    }
}
