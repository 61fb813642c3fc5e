mod common;

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use common::Harness;
use serde_json::{json, Value};
use std::sync::Arc;
use sync_agent_lib::{
    facade::LessonFacade,
    web::{self, AppState},
};
use tower::ServiceExt;

struct TestApp {
    router: Router,
    harness: Harness,
}

impl TestApp {
    /// A router over a fresh harness; `user` signs in first, with the background loop off.
    async fn new(online: bool, user: Option<&str>) -> Self {
        let harness = Harness::new(online);
        let facade = Arc::new(LessonFacade::new(
            harness.engine.clone(),
            harness.remote.clone(),
        ));
        if let Some(user) = user {
            facade.sign_in(user).await.unwrap();
            facade.engine().stop();
        }
        let state = Arc::new(AppState {
            facade,
            network: harness.network.clone(),
        });
        Self {
            router: web::router(state),
            harness,
        }
    }

    async fn call(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                request = request.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let response = self
            .router
            .clone()
            .oneshot(request.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }
}

#[tokio::test]
async fn lessons_require_a_signed_in_user() {
    let app = TestApp::new(false, None).await;
    let (status, _) = app.call(Method::GET, "/lessons", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn offline_lesson_lifecycle() {
    let app = TestApp::new(false, Some("alice")).await;

    let (status, created) = app
        .call(Method::POST, "/lessons", Some(json!({ "title": "Ruth", "passage": "Ruth 1" })))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = created["id"].as_str().unwrap().to_string();
    assert!(id.starts_with("offline_"));
    assert_eq!(created["isOfflineCreated"], json!(true));

    let (status, fetched) = app.call(Method::GET, &format!("/lessons/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["title"], json!("Ruth"));

    let (status, updated) = app
        .call(Method::PUT, &format!("/lessons/{}", id), Some(json!({ "title": "Naomi" })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["title"], json!("Naomi"));

    let (status, toggled) = app
        .call(Method::POST, &format!("/lessons/{}/favorite", id), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(toggled["isFavorite"], json!(true));

    let (status, favorites) = app.call(Method::GET, "/lessons?favorite=true", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(favorites.as_array().unwrap().len(), 1);

    let (status, _) = app.call(Method::DELETE, &format!("/lessons/{}", id), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, listed) = app.call(Method::GET, "/lessons", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed, json!([]));
}

#[tokio::test]
async fn unknown_lessons_are_not_found() {
    let app = TestApp::new(false, Some("alice")).await;

    let (status, _) = app.call(Method::GET, "/lessons/missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .call(Method::PUT, "/lessons/missing", Some(json!({ "title": "x" })))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn sync_endpoints_follow_connectivity() {
    let app = TestApp::new(false, Some("alice")).await;
    app.call(Method::POST, "/lessons", Some(json!({ "title": "Queued" })))
        .await;

    let (status, outcome) = app.call(Method::POST, "/sync", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome, json!({ "success": false, "message": "You are offline" }));

    let (status, network) = app
        .call(Method::PUT, "/network", Some(json!({ "online": true })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(network, json!({ "online": true }));
    assert!(app.harness.network.is_online());

    let (_, outcome) = app.call(Method::POST, "/sync", None).await;
    assert_eq!(outcome, json!({ "success": true, "message": "Synced 1 changes" }));

    let (status, snapshot) = app.call(Method::GET, "/sync/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(snapshot["syncState"]["status"], json!("success"));
    assert_eq!(snapshot["syncState"]["pendingChanges"], json!(0));
    assert_eq!(snapshot["isOnline"], json!(true));
    assert_eq!(snapshot["lessons"][0]["id"], json!("srv-1"));
}

#[tokio::test]
async fn dropped_changes_can_be_listed_and_dismissed() {
    let app = TestApp::new(false, Some("alice")).await;
    app.call(Method::POST, "/lessons", Some(json!({ "title": "Rejected" })))
        .await;
    app.harness.remote.fail_next(lesson_sync_core::ports::PortError::RemoteRejected {
        status: 400,
        message: "bad lesson".into(),
    });
    app.call(Method::PUT, "/network", Some(json!({ "online": true })))
        .await;
    app.call(Method::POST, "/sync", None).await;

    let (status, dropped) = app.call(Method::GET, "/sync/dropped", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(dropped[0]["reason"], json!("remote_rejected"));
    let id = dropped[0]["id"].as_str().unwrap().to_string();

    let (status, _) = app
        .call(Method::DELETE, &format!("/sync/dropped/{}", id), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = app
        .call(Method::DELETE, &format!("/sync/dropped/{}", id), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn templates_and_stats() {
    let app = TestApp::new(false, Some("alice")).await;

    let (status, saved) = app
        .call(
            Method::POST,
            "/templates",
            Some(json!({ "templateId": "advent", "templateTitle": "Advent" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = saved["id"].as_str().unwrap().to_string();

    let (_, listed) = app.call(Method::GET, "/templates", None).await;
    assert_eq!(listed.as_array().unwrap().len(), 1);

    let (status, stats) = app.call(Method::GET, "/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        stats,
        json!({
            "lessonCount": 0,
            "syncQueueCount": 0,
            "pendingTemplatesCount": 1,
            "estimatedSize": "3 KB"
        })
    );

    let (status, _) = app.call(Method::DELETE, &format!("/templates/{}", id), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (_, listed) = app.call(Method::GET, "/templates", None).await;
    assert_eq!(listed, json!([]));
}

#[tokio::test]
async fn refresh_route_pulls_from_the_server() {
    let app = TestApp::new(true, Some("alice")).await;
    app.harness.remote.seed("srv-late", "Arrived after sign-in");

    let (_, before) = app.call(Method::GET, "/sync/status", None).await;
    assert_eq!(before["lessons"], json!([]));

    let (status, snapshot) = app.call(Method::POST, "/sync/refresh", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(snapshot["lessons"][0]["id"], json!("srv-late"));
}
