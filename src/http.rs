//! Thin axum routing layer translating the HTTP surface onto the
//! components above. Transport concerns beyond this translation (TLS,
//! CORS, rate limiting, IP allow-listing) are external collaborators.

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::error::{RouterError, RouterResult};
use crate::executor::Executor;
use crate::read_api::ReadApi;
use crate::selector::Selector;
use crate::types::RpcRequest;

#[derive(Clone)]
pub struct AppState {
    pub selector: Arc<Selector>,
    pub executor: Arc<Executor>,
    pub read_api: Arc<ReadApi>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/rpc/endpoint/{chain_id}", get(get_endpoint))
        .route("/api/rpc/execute/{chain_id}", post(execute))
        .route("/api/rpc/urls", get(list_urls))
        .route("/api/rpc/urls/{chain_id}", get(url_detail))
        .route("/health", get(health))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn get_endpoint(
    State(state): State<AppState>,
    Path(chain_id): Path<u64>,
) -> RouterResult<impl IntoResponse> {
    let url = state.selector.get_healthy_rpc_url(chain_id).await?;
    Ok(Json(json!({ "success": true, "data": { "url": url } })))
}

async fn execute(
    State(state): State<AppState>,
    Path(chain_id): Path<u64>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> RouterResult<impl IntoResponse> {
    if !RpcRequest::validate(&body) {
        return Err(RouterError::InvalidRequest);
    }

    let session_id = headers
        .get("x-session-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    let formatted = state
        .executor
        .execute_request(chain_id, body, session_id.as_deref())
        .await?;

    Ok(Json(formatted))
}

#[derive(Debug, Deserialize)]
struct ListUrlsQuery {
    #[serde(rename = "chainId")]
    chain_id: Option<u64>,
}

async fn list_urls(
    State(state): State<AppState>,
    Query(query): Query<ListUrlsQuery>,
) -> RouterResult<impl IntoResponse> {
    let chain_ids = match query.chain_id {
        Some(id) => vec![id],
        None => state.read_api.all_chain_ids().await?,
    };

    let mut chains = Vec::new();
    for id in chain_ids {
        if let Ok(cfg) = state.read_api.chain_config(id).await {
            chains.push(json!({
                "chainId": cfg.chain_id,
                "name": cfg.name,
                "urls": cfg.urls,
            }));
        }
    }

    Ok(Json(json!({ "success": true, "data": { "chains": chains } })))
}

async fn url_detail(
    State(state): State<AppState>,
    Path(chain_id): Path<u64>,
) -> RouterResult<impl IntoResponse> {
    let cfg = state.read_api.chain_config(chain_id).await?;
    let stats = state.read_api.chain_stats(chain_id).await?;
    let urls = state.read_api.url_details(chain_id).await?;

    Ok(Json(json!({
        "success": true,
        "data": {
            "chainId": cfg.chain_id,
            "name": cfg.name,
            "stats": stats,
            "urls": urls,
        }
    })))
}
