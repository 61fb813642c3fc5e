pub mod protocol;
pub mod rest;
pub mod state;
pub mod ws_handler;

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;

// Re-export the main WebSocket handler to make it easily accessible
// to the binary that will build the web server router.
pub use ws_handler::ws_handler;
pub use rest::ApiDoc;
pub use state::AppState;

/// The REST and WebSocket routes over the façade, without CORS or Swagger.
pub fn router(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/lessons",
            get(rest::list_lessons_handler).post(rest::create_lesson_handler),
        )
        .route(
            "/lessons/{id}",
            get(rest::get_lesson_handler)
                .put(rest::update_lesson_handler)
                .delete(rest::delete_lesson_handler),
        )
        .route("/lessons/{id}/favorite", post(rest::toggle_favorite_handler))
        .route("/sync", post(rest::force_sync_handler))
        .route("/sync/refresh", post(rest::refresh_handler))
        .route("/sync/status", get(rest::sync_status_handler))
        .route("/sync/dropped", get(rest::list_dropped_handler))
        .route("/sync/dropped/{id}", delete(rest::dismiss_dropped_handler))
        .route("/network", put(rest::set_network_handler))
        .route("/stats", get(rest::stats_handler))
        .route(
            "/templates",
            get(rest::list_templates_handler).post(rest::save_template_handler),
        )
        .route("/templates/{id}", delete(rest::delete_template_handler))
        .route("/ws/status", get(ws_handler))
        .with_state(app_state)
}
