mod config;
mod config_loader;
mod error;
mod executor;
mod format;
mod health;
mod http;
mod kv;
mod read_api;
mod selector;
mod session;
mod traits;
mod types;

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::Settings;
use config_loader::ConfigLoader;
use executor::Executor;
use health::HealthChecker;
use http::AppState;
use kv::{KvStore, RedisStore};
use read_api::ReadApi;
use selector::Selector;
use session::SessionStore;

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rpc_router=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("starting rpc router");

    let settings = Settings::from_env();

    let kv: Arc<dyn KvStore> = Arc::new(
        RedisStore::connect(&settings.redis_url)
            .await
            .expect("failed to connect to redis"),
    );

    let health_checker = Arc::new(HealthChecker::new(
        Arc::clone(&kv),
        settings.max_fail_count,
        settings.health_ttl,
    ));

    let config_loader = Arc::new(ConfigLoader::new(
        settings.chain_config_path.clone(),
        Arc::clone(&kv),
        Arc::clone(&health_checker) as Arc<dyn traits::CheckHealth>,
        settings.config_ttl,
        settings.health_ttl,
    ));

    let selector = Arc::new(Selector::new(
        Arc::clone(&kv),
        settings.max_fail_count,
        Arc::clone(&config_loader) as Arc<dyn traits::Reload>,
    ));

    let sessions = Arc::new(SessionStore::new(
        Arc::clone(&kv),
        Arc::clone(&selector),
        settings.session_ttl,
    ));

    let executor = Arc::new(Executor::new(
        Arc::clone(&sessions),
        Arc::clone(&health_checker) as Arc<dyn traits::CheckHealth>,
    ));

    let read_api = Arc::new(ReadApi::new(Arc::clone(&kv), settings.max_fail_count));

    if let Err(e) = config_loader.reload().await {
        tracing::warn!("initial config load failed: {e}; starting with an empty chain set");
    }

    health_checker.start(settings.health_check_interval);
    config_loader.start(settings.config_refresh_interval);

    let state = AppState {
        selector,
        executor,
        read_api,
    };

    let app = http::router(state);

    let listener = tokio::net::TcpListener::bind(&settings.bind_addr)
        .await
        .unwrap_or_else(|e| panic!("failed to bind {}: {e}", settings.bind_addr));

    tracing::info!("listening on http://{}", settings.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server failed");

    health_checker.stop();
    config_loader.stop();
    tracing::info!("rpc router shut down");
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install ctrl-c handler");
    tracing::info!("shutdown signal received");
}
