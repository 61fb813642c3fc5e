//! services/sync_agent/src/facade.rs
//!
//! The boundary a UI shell talks to. It owns the signed-in user, keeps a read model
//! of the user's lessons next to the engine's sync state, and falls back to
//! online-only operation when local storage cannot be opened.

use crate::sync::SyncEngine;
use chrono::Utc;
use lesson_sync_core::domain::{LessonDraft, LessonPatch, LessonPayload, OfflineLesson, SyncState};
use lesson_sync_core::ports::{PortError, PortResult, RemoteLessonApi};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{error, info, warn};

pub const OFFLINE_UNSUPPORTED: &str = "Offline mode not supported";

/// Everything a view needs to render the lesson list and the sync indicator.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FacadeSnapshot {
    pub lessons: Vec<OfflineLesson>,
    pub is_loading: bool,
    pub sync_state: SyncState,
    pub is_online: bool,
    pub error: Option<String>,
    pub offline_supported: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForceSyncOutcome {
    pub success: bool,
    pub message: String,
}

struct View {
    user_id: Option<String>,
    lessons: Vec<OfflineLesson>,
    is_loading: bool,
    error: Option<String>,
    offline_supported: bool,
}

impl Default for View {
    fn default() -> Self {
        Self {
            user_id: None,
            lessons: Vec::new(),
            is_loading: false,
            error: None,
            offline_supported: true,
        }
    }
}

pub struct LessonFacade {
    engine: Arc<SyncEngine>,
    remote: Arc<dyn RemoteLessonApi>,
    view: Mutex<View>,
}

impl LessonFacade {
    pub fn new(engine: Arc<SyncEngine>, remote: Arc<dyn RemoteLessonApi>) -> Self {
        Self {
            engine,
            remote,
            view: Mutex::new(View::default()),
        }
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    fn view(&self) -> MutexGuard<'_, View> {
        self.view.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn user(&self) -> PortResult<(String, bool)> {
        let view = self.view();
        view.user_id
            .clone()
            .map(|u| (u, view.offline_supported))
            .ok_or(PortError::NotSignedIn)
    }

    /// Records a failed operation on the read model and hands the error back.
    fn failed<T>(&self, context: &str, e: PortError) -> PortResult<T> {
        error!("{}: {}", context, e);
        self.view().error = Some(e.to_string());
        Err(e)
    }

    //=====================================================================================
    // Session
    //=====================================================================================

    pub async fn sign_in(&self, user_id: &str) -> PortResult<()> {
        {
            let mut view = self.view();
            *view = View {
                user_id: Some(user_id.to_string()),
                is_loading: true,
                ..View::default()
            };
        }

        match self.engine.start(user_id).await {
            Ok(()) => {}
            Err(PortError::StorageUnavailable(e)) => {
                warn!("Local storage unavailable, continuing online-only: {}", e);
                self.engine.stop();
                let mut view = self.view();
                view.offline_supported = false;
                view.error = Some(OFFLINE_UNSUPPORTED.to_string());
            }
            Err(e) => {
                self.view().is_loading = false;
                return self.failed("Initialization failed", e);
            }
        }

        self.reload().await
    }

    pub async fn sign_out(&self) {
        let offline_supported = self.view().offline_supported;
        if offline_supported {
            if let Err(e) = self.engine.clear_offline_data().await {
                error!("Failed to clear offline data: {}", e);
            }
        }
        *self.view() = View::default();
        info!("Signed out");
    }

    //=====================================================================================
    // Read Model
    //=====================================================================================

    pub fn snapshot(&self) -> FacadeSnapshot {
        let view = self.view();
        FacadeSnapshot {
            lessons: view.lessons.clone(),
            is_loading: view.is_loading,
            sync_state: self.engine.state(),
            is_online: self.engine.is_online(),
            error: view.error.clone(),
            offline_supported: view.offline_supported,
        }
    }

    /// Re-pulls the user's lessons from the server, then reloads the list. A failed
    /// pull keeps the cached list.
    pub async fn refresh(&self) -> PortResult<()> {
        self.load(true).await
    }

    /// Reloads the lesson list from the cache, or from the server when online-only.
    pub async fn reload(&self) -> PortResult<()> {
        self.load(false).await
    }

    async fn load(&self, force_pull: bool) -> PortResult<()> {
        let (user_id, offline_supported) = self.user()?;
        self.view().is_loading = true;

        let loaded = if offline_supported && force_pull {
            self.engine.refresh(&user_id).await
        } else if offline_supported {
            self.engine.list_lessons(&user_id).await
        } else {
            self.remote.list_lessons(&user_id).await.map(|list| {
                let now = Utc::now();
                list.into_iter()
                    .map(|l| l.into_offline(&user_id, now))
                    .collect()
            })
        };

        let mut view = self.view();
        view.is_loading = false;
        match loaded {
            Ok(lessons) => {
                view.lessons = lessons;
                Ok(())
            }
            Err(e) => {
                view.error = Some(e.to_string());
                Err(e)
            }
        }
    }

    pub async fn lesson(&self, lesson_id: &str) -> PortResult<Option<OfflineLesson>> {
        let (user_id, offline_supported) = self.user()?;
        if offline_supported {
            return self.engine.get_lesson(lesson_id).await;
        }
        match self.remote.get_lesson(lesson_id).await {
            Ok(l) => Ok(Some(l.into_offline(&user_id, Utc::now()))),
            Err(PortError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn favorites(&self) -> PortResult<Vec<OfflineLesson>> {
        let (user_id, offline_supported) = self.user()?;
        if offline_supported {
            return self.engine.list_favorites(&user_id).await;
        }
        Ok(self
            .view()
            .lessons
            .iter()
            .filter(|l| l.is_favorite)
            .cloned()
            .collect())
    }

    //=====================================================================================
    // Mutations
    //=====================================================================================

    pub async fn create(&self, draft: LessonDraft) -> PortResult<OfflineLesson> {
        let (user_id, offline_supported) = self.user()?;
        let result = if offline_supported {
            self.engine.create(draft).await
        } else {
            let lesson = draft.into_provisional(&user_id, String::new(), Utc::now());
            self.remote
                .create_lesson(&LessonPayload::from(&lesson))
                .await
                .map(|created| created.into_offline(&user_id, Utc::now()))
        };

        match result {
            Ok(lesson) => {
                self.view().lessons.insert(0, lesson.clone());
                Ok(lesson)
            }
            Err(e) => self.failed("Failed to create lesson", e),
        }
    }

    pub async fn update(&self, lesson_id: &str, patch: LessonPatch) -> PortResult<Option<OfflineLesson>> {
        let (user_id, offline_supported) = self.user()?;
        let result = if offline_supported {
            self.engine.update(lesson_id, patch).await
        } else {
            self.update_online(&user_id, lesson_id, patch).await
        };

        match result {
            Ok(updated) => {
                if let Some(lesson) = &updated {
                    self.replace_in_view(lesson_id, lesson);
                }
                Ok(updated)
            }
            Err(e) => self.failed("Failed to update lesson", e),
        }
    }

    async fn update_online(
        &self,
        user_id: &str,
        lesson_id: &str,
        patch: LessonPatch,
    ) -> PortResult<Option<OfflineLesson>> {
        let mut lesson = match self.remote.get_lesson(lesson_id).await {
            Ok(l) => l.into_offline(user_id, Utc::now()),
            Err(PortError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        patch.apply_to(&mut lesson, Utc::now());
        let updated = self
            .remote
            .update_lesson(lesson_id, &LessonPayload::from(&lesson))
            .await?;
        Ok(Some(updated.into_offline(user_id, Utc::now())))
    }

    /// Returns true once the lesson is gone from the read model.
    pub async fn remove(&self, lesson_id: &str) -> PortResult<bool> {
        let (_, offline_supported) = self.user()?;
        let result = if offline_supported {
            self.engine.delete(lesson_id).await
        } else {
            match self.remote.delete_lesson(lesson_id).await {
                Ok(()) | Err(PortError::NotFound(_)) => Ok(()),
                Err(e) => Err(e),
            }
        };

        match result {
            Ok(()) => {
                self.view().lessons.retain(|l| l.id != lesson_id);
                Ok(true)
            }
            Err(e) => self.failed("Failed to delete lesson", e),
        }
    }

    pub async fn toggle_favorite(&self, lesson_id: &str) -> PortResult<Option<OfflineLesson>> {
        let (user_id, offline_supported) = self.user()?;
        let result = if offline_supported {
            self.engine.toggle_favorite(lesson_id).await
        } else {
            match self.remote.toggle_favorite(lesson_id).await {
                Ok(l) => Ok(Some(l.into_offline(&user_id, Utc::now()))),
                Err(PortError::NotFound(_)) => Ok(None),
                Err(e) => Err(e),
            }
        };

        match result {
            Ok(updated) => {
                if let Some(lesson) = &updated {
                    self.replace_in_view(lesson_id, lesson);
                }
                Ok(updated)
            }
            Err(e) => self.failed("Failed to toggle favorite", e),
        }
    }

    fn replace_in_view(&self, lesson_id: &str, lesson: &OfflineLesson) {
        let mut view = self.view();
        if let Some(slot) = view.lessons.iter_mut().find(|l| l.id == lesson_id) {
            *slot = lesson.clone();
        }
    }

    //=====================================================================================
    // Sync
    //=====================================================================================

    /// Drains the queue now and reloads the list. Never returns an error.
    pub async fn force_sync(&self) -> ForceSyncOutcome {
        if !self.engine.is_online() {
            return ForceSyncOutcome {
                success: false,
                message: "You are offline".to_string(),
            };
        }
        let offline_supported = self.view().offline_supported;

        let report = if offline_supported {
            match self.engine.drain().await {
                Ok(report) if report.skipped => {
                    return ForceSyncOutcome {
                        success: false,
                        message: "Sync already in progress".to_string(),
                    }
                }
                Ok(report) => report,
                Err(e) => {
                    return ForceSyncOutcome {
                        success: false,
                        message: e.to_string(),
                    }
                }
            }
        } else {
            Default::default()
        };

        if let Err(e) = self.reload().await {
            warn!("Reload after sync failed: {}", e);
        }

        let mut message = format!("Synced {} changes", report.succeeded);
        if report.failed > 0 {
            message.push_str(&format!(", {} failed", report.failed));
        }
        ForceSyncOutcome {
            success: true,
            message,
        }
    }
}
