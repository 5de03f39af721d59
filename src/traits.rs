//! Capability interfaces that break the Health Checker / Config Loader
//! circular dependency: the loader triggers probes after a reload, and the
//! selector triggers a reload on collapse. Each side depends on a narrow
//! trait rather than on the other's concrete type, so either can be stubbed
//! in tests.

use async_trait::async_trait;

use crate::error::RouterResult;
use crate::types::HealthRecord;

#[async_trait]
pub trait CheckHealth: Send + Sync {
    async fn check_health(&self, url: &str) -> RouterResult<HealthRecord>;
}

#[async_trait]
pub trait Reload: Send + Sync {
    async fn reload(&self) -> RouterResult<()>;
}
