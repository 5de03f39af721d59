//! Process-wide settings, read once at startup from the environment.
//!
//! A handful of startup constants, promoted to env-overridable fields
//! since this crate's surface needs to be tunable per deployment.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Settings {
    /// TTL applied to `chain:*` keys.
    pub config_ttl: Duration,
    /// TTL applied to the `health` hash.
    pub health_ttl: Duration,
    /// TTL applied to `session:*` keys.
    pub session_ttl: Duration,
    /// Period between health-check ticks.
    pub health_check_interval: Duration,
    /// Period between config-file polls.
    pub config_refresh_interval: Duration,
    /// Consecutive failures at which a url becomes ineligible.
    pub max_fail_count: u32,
    /// Redis connection string backing the shared KV store.
    pub redis_url: String,
    /// Path to the on-disk chain configuration file.
    pub chain_config_path: String,
    /// Address the HTTP surface binds to.
    pub bind_addr: String,
}

impl Settings {
    pub fn from_env() -> Self {
        Self {
            config_ttl: Duration::from_secs(env_u64("CONFIG_TTL_SECS", 86_400)),
            health_ttl: Duration::from_secs(env_u64("HEALTH_TTL_SECS", 3_600)),
            session_ttl: Duration::from_secs(env_u64("SESSION_TTL_SECS", 3_600)),
            health_check_interval: Duration::from_millis(env_u64(
                "HEALTH_CHECK_INTERVAL_MS",
                60_000,
            )),
            config_refresh_interval: Duration::from_millis(env_u64(
                "CONFIG_REFRESH_INTERVAL_MS",
                300_000,
            )),
            max_fail_count: env_u64("MAX_FAIL_COUNT", 3) as u32,
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            chain_config_path: std::env::var("CHAIN_CONFIG_PATH")
                .unwrap_or_else(|_| "chains.json".to_string()),
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
        }
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
