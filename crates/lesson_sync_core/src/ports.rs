//! crates/lesson_sync_core/src/ports.rs
//!
//! Defines the service contracts (traits) the sync engine is written against.
//! The local store and the remote lesson API are both ports, so the engine can
//! run over SQLite and HTTP in production and over in-memory fakes in tests.

use async_trait::async_trait;
use serde_json::Value;
use crate::domain::{
    ApiLesson, LessonPayload, OfflineLesson, PendingTemplate, StoreCounts, SyncQueueItem,
};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// The error taxonomy shared by every port.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PortError {
    /// Local storage cannot be opened or written (including quota exhaustion).
    #[error("Local storage unavailable: {0}")]
    StorageUnavailable(String),
    /// The request never got an answer: connection refused, DNS, timeout.
    #[error("Network unreachable: {0}")]
    NetworkUnreachable(String),
    /// The server answered with a 5xx status.
    #[error("Remote server unavailable (HTTP {status}): {message}")]
    RemoteUnavailable { status: u16, message: String },
    /// The server refused the request with a 4xx status.
    #[error("Remote rejected the request (HTTP {status}): {message}")]
    RemoteRejected { status: u16, message: String },
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Gave up after {attempts} attempts: {message}")]
    MaxRetriesExceeded { attempts: u32, message: String },
    #[error("No signed-in user")]
    NotSignedIn,
}

impl PortError {
    /// Whether a failed queue item should be kept for another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PortError::NetworkUnreachable(_) | PortError::RemoteUnavailable { .. }
        )
    }
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

/// Durable, user-partitioned storage over the four offline collections.
///
/// Reads of a missing key return `Ok(None)`; deletes of a missing key succeed.
#[async_trait]
pub trait LocalStore: Send + Sync {
    // --- Lessons ---
    async fn put_lesson(&self, lesson: &OfflineLesson) -> PortResult<()>;

    async fn get_lesson(&self, lesson_id: &str) -> PortResult<Option<OfflineLesson>>;

    /// All lessons of a user, most recently updated first.
    async fn list_lessons(&self, user_id: &str) -> PortResult<Vec<OfflineLesson>>;

    async fn list_favorite_lessons(&self, user_id: &str) -> PortResult<Vec<OfflineLesson>>;

    async fn delete_lesson(&self, lesson_id: &str) -> PortResult<()>;

    /// Replaces the authoritative lessons of `user_id` with `lessons` in one unit.
    ///
    /// Authoritative records missing from `lessons` are removed. Records whose id is in
    /// `keep` are left exactly as they are, as are provisional records and other users'.
    async fn replace_user_lessons(
        &self,
        user_id: &str,
        lessons: &[OfflineLesson],
        keep: &[String],
    ) -> PortResult<()>;

    /// Deletes `old_id` and writes `lesson` as a single unit.
    async fn replace_lesson(&self, old_id: &str, lesson: &OfflineLesson) -> PortResult<()>;

    // --- Sync Queue ---
    async fn enqueue(&self, item: &SyncQueueItem) -> PortResult<()>;

    /// All queued items in insertion order.
    async fn list_queue(&self) -> PortResult<Vec<SyncQueueItem>>;

    async fn get_queue_item(&self, item_id: &str) -> PortResult<Option<SyncQueueItem>>;

    async fn update_queue_item(&self, item: &SyncQueueItem) -> PortResult<()>;

    async fn remove_queue_item(&self, item_id: &str) -> PortResult<()>;

    /// Points every queued item for `old_id` at `new_id`, including the record it carries.
    async fn remap_queue_lesson_id(&self, old_id: &str, new_id: &str) -> PortResult<()>;

    async fn queued_lesson_ids(&self) -> PortResult<Vec<String>>;

    async fn queue_len(&self) -> PortResult<usize>;

    // --- User Data ---
    async fn put_user_data(&self, key: &str, value: &Value) -> PortResult<()>;

    async fn get_user_data(&self, key: &str) -> PortResult<Option<Value>>;

    // --- Pending Templates ---
    async fn save_pending_template(&self, template: &PendingTemplate) -> PortResult<()>;

    /// Templates of a user, most recently saved first.
    async fn list_pending_templates(&self, user_id: &str) -> PortResult<Vec<PendingTemplate>>;

    async fn remove_pending_template(&self, template_id: &str) -> PortResult<()>;

    // --- Maintenance ---
    async fn counts(&self) -> PortResult<StoreCounts>;

    /// Empties every collection (used on sign-out).
    async fn clear_all(&self) -> PortResult<()>;
}

/// The remote source of truth for lessons. Scoping to the user is implicit in the auth token.
#[async_trait]
pub trait RemoteLessonApi: Send + Sync {
    async fn list_lessons(&self, user_id: &str) -> PortResult<Vec<ApiLesson>>;

    async fn get_lesson(&self, lesson_id: &str) -> PortResult<ApiLesson>;

    /// Not idempotent: every call creates a new record.
    async fn create_lesson(&self, payload: &LessonPayload) -> PortResult<ApiLesson>;

    async fn update_lesson(&self, lesson_id: &str, payload: &LessonPayload) -> PortResult<ApiLesson>;

    async fn delete_lesson(&self, lesson_id: &str) -> PortResult<()>;

    async fn toggle_favorite(&self, lesson_id: &str) -> PortResult<ApiLesson>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transport_and_server_failures_are_retryable() {
        assert!(PortError::NetworkUnreachable("timeout".into()).is_retryable());
        assert!(PortError::RemoteUnavailable { status: 503, message: String::new() }.is_retryable());

        assert!(!PortError::RemoteRejected { status: 409, message: String::new() }.is_retryable());
        assert!(!PortError::StorageUnavailable("quota".into()).is_retryable());
        assert!(!PortError::NotFound("lesson".into()).is_retryable());
        assert!(!PortError::Serialization("bad json".into()).is_retryable());
    }
}
