//! services/sync_agent/src/bin/agent.rs

use axum::http::{
    header::{ACCEPT, CONTENT_TYPE},
    HeaderValue, Method,
};
use axum::Router;
use lesson_sync_core::ports::{LocalStore, RemoteLessonApi};
use std::sync::Arc;
use sync_agent_lib::{
    adapters::{HttpLessonApi, MemoryStore, NetworkMonitor, SqliteStore},
    config::Config,
    error::AgentError,
    facade::LessonFacade,
    sync::SyncEngine,
    web::{self, ApiDoc, AppState},
};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() -> Result<(), AgentError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting sync agent...");

    // --- 2. Open the Local Store & Run Migrations ---
    info!("Opening local store at {}...", config.local_db_url);
    let store: Arc<dyn LocalStore> = match SqliteStore::connect(&config.local_db_url).await {
        Ok(store) => {
            info!("Local store ready.");
            Arc::new(store)
        }
        Err(e) => {
            // Sign-in will see the failing store and fall back to online-only mode.
            warn!("Local store unavailable: {}", e);
            let store = MemoryStore::new();
            store.fail_writes(true);
            Arc::new(store)
        }
    };

    // --- 3. Initialize the Remote API Client & Network Monitor ---
    let http_api = Arc::new(HttpLessonApi::new(
        &config.api_base_url,
        config.api_token.clone(),
        config.request_timeout,
    )?);
    let network = Arc::new(NetworkMonitor::new(http_api.is_reachable().await));
    info!(
        "Remote API at {} is {}",
        config.api_base_url,
        if network.is_online() { "reachable" } else { "unreachable" }
    );

    let shutdown = CancellationToken::new();
    if let Some(interval) = config.probe_interval {
        network.spawn_probe(http_api.clone(), interval, shutdown.clone());
    }

    // --- 4. Build the Engine, Façade & Shared AppState ---
    let remote: Arc<dyn RemoteLessonApi> = http_api;
    let engine = Arc::new(SyncEngine::new(
        store,
        remote.clone(),
        network.clone(),
        config.sync.clone(),
    ));
    let facade = Arc::new(LessonFacade::new(engine, remote));
    if let Err(e) = facade.sign_in(&config.user_id).await {
        warn!("Initial load for user {} failed: {}", config.user_id, e);
    }

    let app_state = Arc::new(AppState {
        facade: facade.clone(),
        network,
    });

    let cors = CorsLayer::new()
        .allow_origin(HeaderValue::from_static("http://localhost:3000"))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, ACCEPT]);

    // --- 5. Create the Web Router ---
    let app = Router::new()
        .merge(web::router(app_state).layer(cors))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // --- 6. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    // --- 7. Shut Down Background Tasks ---
    shutdown.cancel();
    facade.engine().stop();
    info!("Sync agent stopped.");
    Ok(())
}
