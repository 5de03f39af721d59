use serde::{Deserialize, Serialize};

/// Eth client rpc request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,

    /// Name of the RPC method to call (e.g., "eth_blockNumber").
    pub method: String,

    #[serde(default)]
    pub params: serde_json::Value,

    pub id: serde_json::Value,
}

impl RpcRequest {
    /// Validates the shape required by the executor: object, `jsonrpc == "2.0"`,
    /// `method` a string, `id` present, `params` absent or an array.
    pub fn validate(value: &serde_json::Value) -> bool {
        let Some(obj) = value.as_object() else {
            return false;
        };
        let jsonrpc_ok = matches!(obj.get("jsonrpc"), Some(serde_json::Value::String(v)) if v == "2.0");
        let method_ok = matches!(obj.get("method"), Some(serde_json::Value::String(_)));
        let id_ok = obj.contains_key("id");
        let params_ok = match obj.get("params") {
            None => true,
            Some(v) => v.is_array(),
        };
        jsonrpc_ok && method_ok && id_ok && params_ok
    }

    /// Builds the canonical health-probe payload, `net_version`.
    pub fn health_probe() -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: "net_version".to_string(),
            params: serde_json::Value::Array(vec![]),
            id: serde_json::Value::Number(1.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,

    pub id: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// A chain's registered set of upstream RPC URLs.
///
/// Stored under `chain:{chain_id}`, replaced wholesale on reload, never
/// mutated in place.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub name: String,
    pub urls: Vec<String>,
}

impl ChainConfig {
    /// Deduplicates `urls` while preserving first-seen order.
    pub fn normalized(mut self) -> Self {
        let mut seen = std::collections::HashSet::with_capacity(self.urls.len());
        self.urls.retain(|url| seen.insert(url.clone()));
        self
    }
}

/// Root shape of the on-disk chain configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub chains: Vec<ChainConfig>,
}

/// Live health projection for a single upstream URL.
///
/// One record per URL globally, not per chain, since the same URL could in
/// principle serve more than one chain's config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthRecord {
    pub url: String,
    pub healthy: bool,
    pub last_check: i64,
    pub response_time: i64,
    pub fail_count: u32,
}

impl HealthRecord {
    /// `true` iff the url may currently receive traffic: healthy per its last
    /// probe and under the consecutive-failure ceiling.
    pub fn eligible(&self, max_fail_count: u32) -> bool {
        self.healthy && self.fail_count < max_fail_count
    }
}

/// A sticky binding from a client-facing session id to one upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub url: String,
    pub chain_id: u64,
    pub created_at: i64,
    pub last_used: i64,
    pub request_count: u64,
}

/// Per-chain operator-facing projection, see `ReadApi::chain_stats`.
#[derive(Debug, Clone, Serialize)]
pub struct ChainStats {
    pub total_sessions: u64,
    pub active_urls: u64,
    pub healthy_urls: u64,
    pub average_response_time: f64,
}

/// Per-URL detail row, see `ReadApi::url_details`.
#[derive(Debug, Clone, Serialize)]
pub struct UrlDetail {
    pub url: String,
    pub healthy: bool,
    pub fail_count: u32,
    pub response_time: i64,
    pub last_check: i64,
}

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
