//! services/sync_agent/src/adapters/http_api.rs
//!
//! This module contains the adapter for the remote lesson API.
//! It implements the `RemoteLessonApi` port from the `core` crate over `reqwest`.

use async_trait::async_trait;
use lesson_sync_core::domain::{ApiLesson, LessonPayload};
use lesson_sync_core::ports::{PortError, PortResult, RemoteLessonApi};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements the `RemoteLessonApi` port over HTTP/JSON.
#[derive(Clone)]
pub struct HttpLessonApi {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpLessonApi {
    /// Creates a new `HttpLessonApi`. Every request is bounded by `timeout`.
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    /// Whether the server answers at all. Any HTTP status counts as reachable.
    pub async fn is_reachable(&self) -> bool {
        match self.client.head(&self.base_url).send().await {
            Ok(_) => true,
            Err(e) => {
                debug!("Connectivity probe failed: {}", e);
                false
            }
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> PortResult<Response> {
        let response = builder.send().await.map_err(transport_err)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        warn!("Remote API answered {}: {}", status, message);
        Err(status_err(status, message))
    }

    async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> PortResult<T> {
        let response = self.send(builder).await?;
        let body = response.bytes().await.map_err(transport_err)?;
        serde_json::from_slice(&body).map_err(|e| PortError::Serialization(e.to_string()))
    }
}

/// Failures before any status line arrived: refused connections, DNS, timeouts.
fn transport_err(e: reqwest::Error) -> PortError {
    PortError::NetworkUnreachable(e.to_string())
}

fn status_err(status: StatusCode, message: String) -> PortError {
    let code = status.as_u16();
    if status.is_server_error() {
        PortError::RemoteUnavailable { status: code, message }
    } else if status == StatusCode::NOT_FOUND {
        PortError::NotFound(message)
    } else {
        PortError::RemoteRejected { status: code, message }
    }
}

//=========================================================================================
// `RemoteLessonApi` Trait Implementation
//=========================================================================================

#[async_trait]
impl RemoteLessonApi for HttpLessonApi {
    async fn list_lessons(&self, _user_id: &str) -> PortResult<Vec<ApiLesson>> {
        self.send_json(self.request(Method::GET, "/lessons")).await
    }

    async fn get_lesson(&self, lesson_id: &str) -> PortResult<ApiLesson> {
        self.send_json(self.request(Method::GET, &format!("/lessons/{}", lesson_id)))
            .await
    }

    async fn create_lesson(&self, payload: &LessonPayload) -> PortResult<ApiLesson> {
        self.send_json(self.request(Method::POST, "/lessons").json(payload))
            .await
    }

    async fn update_lesson(&self, lesson_id: &str, payload: &LessonPayload) -> PortResult<ApiLesson> {
        self.send_json(
            self.request(Method::PUT, &format!("/lessons/{}", lesson_id))
                .json(payload),
        )
        .await
    }

    async fn delete_lesson(&self, lesson_id: &str) -> PortResult<()> {
        self.send(self.request(Method::DELETE, &format!("/lessons/{}", lesson_id)))
            .await?;
        Ok(())
    }

    async fn toggle_favorite(&self, lesson_id: &str) -> PortResult<ApiLesson> {
        self.send_json(self.request(Method::POST, &format!("/lessons/{}/favorite", lesson_id)))
            .await
    }
}
