//! services/sync_agent/src/web/rest.rs
//!
//! Contains the Axum handlers for the local REST surface over the lesson façade
//! and the master definition for the OpenAPI specification.

use crate::facade::{FacadeSnapshot, ForceSyncOutcome};
use crate::web::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use lesson_sync_core::domain::{
    DroppedChange, LessonDraft, LessonPatch, OfflineLesson, OfflineStats, PendingTemplate,
    PendingTemplateDraft,
};
use lesson_sync_core::ports::PortError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;
use utoipa::{IntoParams, OpenApi, ToSchema};

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        list_lessons_handler,
        create_lesson_handler,
        get_lesson_handler,
        update_lesson_handler,
        delete_lesson_handler,
        toggle_favorite_handler,
        force_sync_handler,
        refresh_handler,
        sync_status_handler,
        list_dropped_handler,
        dismiss_dropped_handler,
        set_network_handler,
        stats_handler,
        list_templates_handler,
        save_template_handler,
        delete_template_handler,
    ),
    components(
        schemas(ForceSyncResponse, NetworkUpdate)
    ),
    tags(
        (name = "Lesson Sync API", description = "Offline-first lesson cache and sync queue of the local agent.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

/// The result of a manual sync request.
#[derive(Serialize, ToSchema)]
pub struct ForceSyncResponse {
    success: bool,
    message: String,
}

impl From<ForceSyncOutcome> for ForceSyncResponse {
    fn from(outcome: ForceSyncOutcome) -> Self {
        Self {
            success: outcome.success,
            message: outcome.message,
        }
    }
}

/// A connectivity signal pushed by the platform shell.
#[derive(Serialize, Deserialize, ToSchema)]
pub struct NetworkUpdate {
    pub online: bool,
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListLessonsQuery {
    /// Only return favorite lessons.
    favorite: Option<bool>,
}

type ApiResult<T> = Result<T, (StatusCode, String)>;

/// Maps a port failure onto an HTTP status for the UI shell.
fn port_failure(context: &str, e: PortError) -> (StatusCode, String) {
    let status = match &e {
        PortError::NotSignedIn => StatusCode::UNAUTHORIZED,
        PortError::NotFound(_) => StatusCode::NOT_FOUND,
        PortError::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        PortError::NetworkUnreachable(_)
        | PortError::RemoteUnavailable { .. }
        | PortError::RemoteRejected { .. } => StatusCode::BAD_GATEWAY,
        PortError::Serialization(_) | PortError::MaxRetriesExceeded { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    error!("{}: {}", context, e);
    (status, format!("{}: {}", context, e))
}

fn lesson_not_found(lesson_id: &str) -> (StatusCode, String) {
    (
        StatusCode::NOT_FOUND,
        format!("Lesson {} not found", lesson_id),
    )
}

//=========================================================================================
// Lesson Handlers
//=========================================================================================

/// List the signed-in user's lessons, most recently updated first.
#[utoipa::path(
    get,
    path = "/lessons",
    params(ListLessonsQuery),
    responses(
        (status = 200, description = "Cached lessons of the signed-in user"),
        (status = 401, description = "No signed-in user")
    )
)]
pub async fn list_lessons_handler(
    State(app_state): State<Arc<AppState>>,
    Query(query): Query<ListLessonsQuery>,
) -> ApiResult<Json<Vec<OfflineLesson>>> {
    let facade = &app_state.facade;
    if query.favorite.unwrap_or(false) {
        let favorites = facade
            .favorites()
            .await
            .map_err(|e| port_failure("Failed to list favorites", e))?;
        return Ok(Json(favorites));
    }
    facade
        .reload()
        .await
        .map_err(|e| port_failure("Failed to load lessons", e))?;
    Ok(Json(facade.snapshot().lessons))
}

/// Create a lesson. It is stored locally at once and synced when possible.
#[utoipa::path(
    post,
    path = "/lessons",
    request_body(content_type = "application/json", description = "The lesson draft."),
    responses(
        (status = 201, description = "Lesson created (provisional while offline)"),
        (status = 401, description = "No signed-in user"),
        (status = 503, description = "Local storage unavailable")
    )
)]
pub async fn create_lesson_handler(
    State(app_state): State<Arc<AppState>>,
    Json(draft): Json<LessonDraft>,
) -> ApiResult<impl IntoResponse> {
    let lesson = app_state
        .facade
        .create(draft)
        .await
        .map_err(|e| port_failure("Failed to create lesson", e))?;
    Ok((StatusCode::CREATED, Json(lesson)))
}

/// Fetch one lesson, from the cache first.
#[utoipa::path(
    get,
    path = "/lessons/{id}",
    params(("id" = String, Path, description = "Server or temporary lesson id")),
    responses(
        (status = 200, description = "The lesson"),
        (status = 404, description = "Not cached and not known to the server")
    )
)]
pub async fn get_lesson_handler(
    State(app_state): State<Arc<AppState>>,
    Path(lesson_id): Path<String>,
) -> ApiResult<Json<OfflineLesson>> {
    app_state
        .facade
        .lesson(&lesson_id)
        .await
        .map_err(|e| port_failure("Failed to load lesson", e))?
        .map(Json)
        .ok_or_else(|| lesson_not_found(&lesson_id))
}

/// Apply a partial update to a lesson.
#[utoipa::path(
    put,
    path = "/lessons/{id}",
    params(("id" = String, Path, description = "Server or temporary lesson id")),
    request_body(content_type = "application/json", description = "Fields to change."),
    responses(
        (status = 200, description = "The updated lesson"),
        (status = 404, description = "Lesson not cached")
    )
)]
pub async fn update_lesson_handler(
    State(app_state): State<Arc<AppState>>,
    Path(lesson_id): Path<String>,
    Json(patch): Json<LessonPatch>,
) -> ApiResult<Json<OfflineLesson>> {
    app_state
        .facade
        .update(&lesson_id, patch)
        .await
        .map_err(|e| port_failure("Failed to update lesson", e))?
        .map(Json)
        .ok_or_else(|| lesson_not_found(&lesson_id))
}

/// Delete a lesson locally and propagate the delete when possible.
#[utoipa::path(
    delete,
    path = "/lessons/{id}",
    params(("id" = String, Path, description = "Server or temporary lesson id")),
    responses(
        (status = 204, description = "Lesson removed"),
        (status = 503, description = "Local storage unavailable")
    )
)]
pub async fn delete_lesson_handler(
    State(app_state): State<Arc<AppState>>,
    Path(lesson_id): Path<String>,
) -> ApiResult<StatusCode> {
    app_state
        .facade
        .remove(&lesson_id)
        .await
        .map_err(|e| port_failure("Failed to delete lesson", e))?;
    Ok(StatusCode::NO_CONTENT)
}

/// Flip the favorite flag of a lesson.
#[utoipa::path(
    post,
    path = "/lessons/{id}/favorite",
    params(("id" = String, Path, description = "Server or temporary lesson id")),
    responses(
        (status = 200, description = "The updated lesson"),
        (status = 404, description = "Lesson not cached")
    )
)]
pub async fn toggle_favorite_handler(
    State(app_state): State<Arc<AppState>>,
    Path(lesson_id): Path<String>,
) -> ApiResult<Json<OfflineLesson>> {
    app_state
        .facade
        .toggle_favorite(&lesson_id)
        .await
        .map_err(|e| port_failure("Failed to toggle favorite", e))?
        .map(Json)
        .ok_or_else(|| lesson_not_found(&lesson_id))
}

//=========================================================================================
// Sync Handlers
//=========================================================================================

/// Drain the sync queue now.
#[utoipa::path(
    post,
    path = "/sync",
    responses(
        (status = 200, description = "Outcome of the sync attempt", body = ForceSyncResponse)
    )
)]
pub async fn force_sync_handler(State(app_state): State<Arc<AppState>>) -> Json<ForceSyncResponse> {
    Json(app_state.facade.force_sync().await.into())
}

/// Re-pull lessons from the server and return the read model.
#[utoipa::path(
    post,
    path = "/sync/refresh",
    responses(
        (status = 200, description = "The refreshed read model"),
        (status = 401, description = "No signed-in user")
    )
)]
pub async fn refresh_handler(
    State(app_state): State<Arc<AppState>>,
) -> ApiResult<Json<FacadeSnapshot>> {
    app_state
        .facade
        .refresh()
        .await
        .map_err(|e| port_failure("Failed to refresh lessons", e))?;
    Ok(Json(app_state.facade.snapshot()))
}

/// The current read model: lessons, sync state and connectivity.
#[utoipa::path(
    get,
    path = "/sync/status",
    responses(
        (status = 200, description = "The read model")
    )
)]
pub async fn sync_status_handler(State(app_state): State<Arc<AppState>>) -> Json<FacadeSnapshot> {
    Json(app_state.facade.snapshot())
}

/// Queue items the engine gave up on.
#[utoipa::path(
    get,
    path = "/sync/dropped",
    responses(
        (status = 200, description = "Dropped changes, oldest first")
    )
)]
pub async fn list_dropped_handler(
    State(app_state): State<Arc<AppState>>,
) -> ApiResult<Json<Vec<DroppedChange>>> {
    let dropped = app_state
        .engine()
        .dropped_changes()
        .await
        .map_err(|e| port_failure("Failed to load dropped changes", e))?;
    Ok(Json(dropped))
}

/// Dismiss one dropped change.
#[utoipa::path(
    delete,
    path = "/sync/dropped/{id}",
    params(("id" = String, Path, description = "Id of the dropped change")),
    responses(
        (status = 204, description = "Dismissed"),
        (status = 404, description = "No dropped change with this id")
    )
)]
pub async fn dismiss_dropped_handler(
    State(app_state): State<Arc<AppState>>,
    Path(change_id): Path<String>,
) -> ApiResult<StatusCode> {
    let removed = app_state
        .engine()
        .dismiss_dropped(&change_id)
        .await
        .map_err(|e| port_failure("Failed to dismiss dropped change", e))?;
    if removed {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err((
            StatusCode::NOT_FOUND,
            format!("Dropped change {} not found", change_id),
        ))
    }
}

/// Report a connectivity transition from the platform.
#[utoipa::path(
    put,
    path = "/network",
    request_body = NetworkUpdate,
    responses(
        (status = 200, description = "The connectivity now in effect", body = NetworkUpdate)
    )
)]
pub async fn set_network_handler(
    State(app_state): State<Arc<AppState>>,
    Json(update): Json<NetworkUpdate>,
) -> Json<NetworkUpdate> {
    app_state.network.set_online(update.online);
    Json(NetworkUpdate {
        online: app_state.network.is_online(),
    })
}

/// Local storage statistics.
#[utoipa::path(
    get,
    path = "/stats",
    responses(
        (status = 200, description = "Record counts and an estimated size")
    )
)]
pub async fn stats_handler(State(app_state): State<Arc<AppState>>) -> ApiResult<Json<OfflineStats>> {
    let stats = app_state
        .engine()
        .stats()
        .await
        .map_err(|e| port_failure("Failed to read offline stats", e))?;
    Ok(Json(stats))
}

//=========================================================================================
// Pending Template Handlers
//=========================================================================================

/// Templates saved for later generation, newest first.
#[utoipa::path(
    get,
    path = "/templates",
    responses(
        (status = 200, description = "Pending templates of the signed-in user")
    )
)]
pub async fn list_templates_handler(
    State(app_state): State<Arc<AppState>>,
) -> ApiResult<Json<Vec<PendingTemplate>>> {
    let templates = app_state
        .engine()
        .pending_templates()
        .await
        .map_err(|e| port_failure("Failed to load pending templates", e))?;
    Ok(Json(templates))
}

/// Save a template to generate a lesson from later.
#[utoipa::path(
    post,
    path = "/templates",
    request_body(content_type = "application/json", description = "The template to keep."),
    responses(
        (status = 201, description = "Template saved"),
        (status = 401, description = "No signed-in user")
    )
)]
pub async fn save_template_handler(
    State(app_state): State<Arc<AppState>>,
    Json(draft): Json<PendingTemplateDraft>,
) -> ApiResult<impl IntoResponse> {
    let template = app_state
        .engine()
        .save_pending_template(draft)
        .await
        .map_err(|e| port_failure("Failed to save template", e))?;
    Ok((StatusCode::CREATED, Json(template)))
}

/// Forget a pending template.
#[utoipa::path(
    delete,
    path = "/templates/{id}",
    params(("id" = String, Path, description = "Pending template id")),
    responses(
        (status = 204, description = "Template removed")
    )
)]
pub async fn delete_template_handler(
    State(app_state): State<Arc<AppState>>,
    Path(template_id): Path<String>,
) -> ApiResult<StatusCode> {
    app_state
        .engine()
        .remove_pending_template(&template_id)
        .await
        .map_err(|e| port_failure("Failed to remove template", e))?;
    Ok(StatusCode::NO_CONTENT)
}
