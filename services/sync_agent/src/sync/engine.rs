//! services/sync_agent/src/sync/engine.rs
//!
//! The offline-first sync engine. Every mutation lands in the local store first;
//! whatever cannot be confirmed against the remote API right away is queued and
//! replayed later, strictly in the order it was made.

use crate::adapters::network::NetworkMonitor;
use crate::config::SyncSettings;
use crate::sync::status::{ListenerId, StatusHub};
use chrono::{DateTime, Utc};
use lesson_sync_core::domain::{
    is_temp_id, new_temp_lesson_id, DropReason, DroppedChange, LessonDraft, LessonPatch,
    LessonPayload, OfflineLesson, OfflineStats, PendingTemplate, PendingTemplateDraft, SyncAction,
    SyncQueueItem, SyncState,
};
use lesson_sync_core::ports::{LocalStore, PortError, PortResult, RemoteLessonApi};
use serde::Serialize;
use serde_json::json;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const CURRENT_USER_KEY: &str = "currentUserId";
const LAST_SYNCED_KEY: &str = "lastSyncedAt";
const DROPPED_KEY: &str = "droppedChanges";

/// Outcome of one pass over the sync queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub succeeded: usize,
    /// Items that did not go through this pass, whether kept for retry or dropped.
    pub failed: usize,
    pub dropped: usize,
    /// Another drain was already running; nothing was attempted.
    pub skipped: bool,
}

struct Session {
    user_id: String,
    auto_sync: Option<(CancellationToken, JoinHandle<()>)>,
}

pub struct SyncEngine {
    store: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteLessonApi>,
    network: Arc<NetworkMonitor>,
    status: StatusHub,
    settings: SyncSettings,
    drain_lock: tokio::sync::Mutex<()>,
    session: Mutex<Option<Session>>,
}

impl SyncEngine {
    pub fn new(
        store: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteLessonApi>,
        network: Arc<NetworkMonitor>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            store,
            remote,
            network,
            status: StatusHub::new(),
            settings,
            drain_lock: tokio::sync::Mutex::new(()),
            session: Mutex::new(None),
        }
    }

    fn session(&self) -> MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn user_id(&self) -> Option<String> {
        self.session().as_ref().map(|s| s.user_id.clone())
    }

    fn current_user(&self) -> PortResult<String> {
        self.user_id().ok_or(PortError::NotSignedIn)
    }

    pub fn is_online(&self) -> bool {
        self.network.is_online()
    }

    //=====================================================================================
    // Lifecycle
    //=====================================================================================

    /// Opens a session for `user_id`: caches the user, catches up with the server when
    /// online, and starts the background auto-sync task. A store last used by another
    /// user is wiped first, unsynced changes included.
    pub async fn start(self: &Arc<Self>, user_id: &str) -> PortResult<()> {
        self.stop();
        info!("Initializing offline support for user {}", user_id);

        // The store holds a single user's data; anything left by someone else goes.
        let previous = self
            .store
            .get_user_data(CURRENT_USER_KEY)
            .await?
            .and_then(|v| v.as_str().map(str::to_string));
        if let Some(previous) = previous.filter(|p| p != user_id) {
            let discarded = self.store.queue_len().await?;
            warn!(
                "Store belongs to user {}; discarding its cache and {} unsynced changes",
                previous, discarded
            );
            self.store.clear_all().await?;
            self.status.reset();
        }

        self.store
            .put_user_data(CURRENT_USER_KEY, &json!(user_id))
            .await?;
        let last_synced = self.cached_last_synced().await?;
        self.status.set_last_synced_at(last_synced);
        self.refresh_pending().await?;

        *self.session() = Some(Session {
            user_id: user_id.to_string(),
            auto_sync: None,
        });

        if self.network.is_online() {
            self.catch_up(user_id).await?;
        } else {
            info!("Offline at startup, serving cached lessons");
        }

        let cancel = CancellationToken::new();
        let task = self.spawn_auto_sync(cancel.clone());
        if let Some(session) = self.session().as_mut() {
            session.auto_sync = Some((cancel, task));
        }
        Ok(())
    }

    /// Stops the auto-sync task; the user stays signed in. Idempotent.
    pub fn stop(&self) {
        let auto_sync = self.session().as_mut().and_then(|s| s.auto_sync.take());
        if let Some((cancel, task)) = auto_sync {
            cancel.cancel();
            task.abort();
            info!("Auto-sync stopped");
        }
    }

    /// Drains the queue and then pulls, so queued local edits and deletes are
    /// replayed before the server's view is written over the cache.
    async fn catch_up(&self, user_id: &str) -> PortResult<()> {
        match self.drain().await {
            Err(e @ PortError::StorageUnavailable(_)) => return Err(e),
            Err(e) => warn!("Drain before pull failed: {}", e),
            Ok(_) => {}
        }
        match self.pull(user_id).await {
            Ok(_) => Ok(()),
            Err(e @ PortError::StorageUnavailable(_)) => Err(e),
            Err(e) => {
                warn!("Failed to sync from server, using cached data: {}", e);
                Ok(())
            }
        }
    }

    fn spawn_auto_sync(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        let mut network = self.network.subscribe();
        let mut status = self.status.watch();
        let period = self.settings.auto_sync_interval;
        let cooldown = self.settings.status_cooldown;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!("Auto-sync started ({}s interval)", period.as_secs());

            loop {
                let settle_at = engine.status.settle_deadline(cooldown);
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        engine.status.settle_if_cooled(cooldown);
                        if engine.network.is_online() {
                            if let Err(e) = engine.drain().await {
                                error!("Periodic sync failed: {}", e);
                            }
                        }
                    }
                    changed = network.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let online = *network.borrow_and_update();
                        engine.on_network_change(online).await;
                    }
                    _ = sleep_until_opt(settle_at), if settle_at.is_some() => {
                        engine.status.settle_if_cooled(cooldown);
                    }
                    // Wakes the loop so a sync finished elsewhere gets its cool-down too.
                    changed = status.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
            debug!("Auto-sync loop exited");
        })
    }

    async fn on_network_change(&self, online: bool) {
        if !online {
            self.status.settle();
            return;
        }
        let Some(user_id) = self.user_id() else {
            return;
        };
        info!("Back online, syncing...");
        if let Err(e) = self.catch_up(&user_id).await {
            error!("Sync after reconnect failed: {}", e);
        }
    }

    //=====================================================================================
    // Pull
    //=====================================================================================

    /// Fetches every lesson of `user_id` and replaces the authoritative part of the cache.
    /// Lessons with queued mutations keep their local version.
    pub async fn pull(&self, user_id: &str) -> PortResult<usize> {
        let _guard = self.drain_lock.lock().await;
        self.status.begin_sync();

        match self.pull_locked(user_id).await {
            Ok((count, pending, at)) => {
                self.status.finish_success(pending, Some(at));
                info!("Synced {} lessons from server", count);
                Ok(count)
            }
            Err(e) => {
                self.status.finish_error(e.to_string(), None);
                Err(e)
            }
        }
    }

    async fn pull_locked(&self, user_id: &str) -> PortResult<(usize, usize, DateTime<Utc>)> {
        let remote = self.remote.list_lessons(user_id).await?;
        let now = Utc::now();
        let lessons: Vec<OfflineLesson> = remote
            .into_iter()
            .map(|l| l.into_offline(user_id, now))
            .collect();

        let keep = self.store.queued_lesson_ids().await?;
        self.store
            .replace_user_lessons(user_id, &lessons, &keep)
            .await?;
        self.save_last_synced(now).await?;
        let pending = self.store.queue_len().await?;
        Ok((lessons.len(), pending, now))
    }

    //=====================================================================================
    // Mutations
    //=====================================================================================

    /// Writes a provisional record at once and tries to confirm it with the server.
    pub async fn create(&self, draft: LessonDraft) -> PortResult<OfflineLesson> {
        let user_id = self.current_user()?;
        self.status.settle();

        let provisional = draft.into_provisional(&user_id, new_temp_lesson_id(), Utc::now());
        self.store.put_lesson(&provisional).await?;

        if self.network.is_online() {
            match self
                .remote
                .create_lesson(&LessonPayload::from(&provisional))
                .await
            {
                Ok(created) => {
                    let confirmed = created.into_offline(&user_id, Utc::now());
                    self.store
                        .replace_lesson(&provisional.id, &confirmed)
                        .await?;
                    debug!("Lesson {} created as {}", provisional.id, confirmed.id);
                    return Ok(confirmed);
                }
                Err(e) => warn!("Online create failed, queuing for sync: {}", e),
            }
        }

        self.enqueue(&provisional.id, SyncAction::Create, Some(provisional.clone()))
            .await?;
        Ok(provisional)
    }

    /// Merges `patch` into the cached lesson. Returns `None` if the lesson is not cached.
    pub async fn update(&self, lesson_id: &str, patch: LessonPatch) -> PortResult<Option<OfflineLesson>> {
        let Some(mut lesson) = self.store.get_lesson(lesson_id).await? else {
            return Ok(None);
        };
        self.status.settle();

        patch.apply_to(&mut lesson, Utc::now());
        self.store.put_lesson(&lesson).await?;

        if self.can_call_directly(lesson_id).await? {
            match self
                .remote
                .update_lesson(lesson_id, &LessonPayload::from(&lesson))
                .await
            {
                Ok(_) => {
                    lesson.last_synced_at = Some(Utc::now());
                    self.store.put_lesson(&lesson).await?;
                    return Ok(Some(lesson));
                }
                Err(e) => warn!("Online update failed, queuing for sync: {}", e),
            }
        }

        self.enqueue(lesson_id, SyncAction::Update, Some(lesson.clone()))
            .await?;
        Ok(Some(lesson))
    }

    /// Removes the lesson locally at once and propagates the delete when possible.
    pub async fn delete(&self, lesson_id: &str) -> PortResult<()> {
        self.status.settle();
        self.store.delete_lesson(lesson_id).await?;

        if is_temp_id(lesson_id) {
            // Never reached the server unless its create is still waiting in the queue.
            let create_queued = self
                .store
                .list_queue()
                .await?
                .iter()
                .any(|i| i.lesson_id == lesson_id && i.action == SyncAction::Create);
            if create_queued {
                self.enqueue(lesson_id, SyncAction::Delete, None).await?;
            }
            return Ok(());
        }

        if self.can_call_directly(lesson_id).await? {
            match self.remote.delete_lesson(lesson_id).await {
                Ok(()) | Err(PortError::NotFound(_)) => return Ok(()),
                Err(e) => warn!("Online delete failed, queuing for sync: {}", e),
            }
        }

        self.enqueue(lesson_id, SyncAction::Delete, None).await
    }

    /// Flips the favorite flag through the regular update path.
    pub async fn toggle_favorite(&self, lesson_id: &str) -> PortResult<Option<OfflineLesson>> {
        let Some(lesson) = self.store.get_lesson(lesson_id).await? else {
            return Ok(None);
        };
        self.update(lesson_id, LessonPatch::favorite(!lesson.is_favorite))
            .await
    }

    /// A direct remote call is only made when it cannot overtake queued work on the
    /// same lesson.
    async fn can_call_directly(&self, lesson_id: &str) -> PortResult<bool> {
        if !self.network.is_online() || is_temp_id(lesson_id) {
            return Ok(false);
        }
        let queued = self.store.queued_lesson_ids().await?;
        Ok(!queued.iter().any(|id| id == lesson_id))
    }

    async fn enqueue(&self, lesson_id: &str, action: SyncAction, data: Option<OfflineLesson>) -> PortResult<()> {
        self.store
            .enqueue(&SyncQueueItem::new(lesson_id, action, data))
            .await?;
        self.refresh_pending().await
    }

    //=====================================================================================
    // Reads
    //=====================================================================================

    /// Cache first; falls back to the server for lessons this device has never seen.
    pub async fn get_lesson(&self, lesson_id: &str) -> PortResult<Option<OfflineLesson>> {
        if let Some(lesson) = self.store.get_lesson(lesson_id).await? {
            return Ok(Some(lesson));
        }
        if !self.network.is_online() || is_temp_id(lesson_id) {
            return Ok(None);
        }
        let user_id = self.current_user()?;
        match self.remote.get_lesson(lesson_id).await {
            Ok(remote) => {
                let lesson = remote.into_offline(&user_id, Utc::now());
                self.store.put_lesson(&lesson).await?;
                Ok(Some(lesson))
            }
            Err(e) => {
                debug!("Lesson {} not available remotely: {}", lesson_id, e);
                Ok(None)
            }
        }
    }

    pub async fn list_lessons(&self, user_id: &str) -> PortResult<Vec<OfflineLesson>> {
        let lessons = self.store.list_lessons(user_id).await?;
        if !lessons.is_empty() || !self.network.is_online() {
            return Ok(lessons);
        }
        self.pull_tolerant(user_id).await?;
        self.store.list_lessons(user_id).await
    }

    pub async fn list_favorites(&self, user_id: &str) -> PortResult<Vec<OfflineLesson>> {
        if self.store.list_lessons(user_id).await?.is_empty() && self.network.is_online() {
            self.pull_tolerant(user_id).await?;
        }
        self.store.list_favorite_lessons(user_id).await
    }

    /// Re-pulls from the server when online, then returns the cached list. Only storage
    /// failures are returned; a failed pull leaves the cache as it was.
    pub async fn refresh(&self, user_id: &str) -> PortResult<Vec<OfflineLesson>> {
        if self.network.is_online() {
            self.pull_tolerant(user_id).await?;
        }
        self.store.list_lessons(user_id).await
    }

    async fn pull_tolerant(&self, user_id: &str) -> PortResult<()> {
        match self.pull(user_id).await {
            Err(e @ PortError::StorageUnavailable(_)) => Err(e),
            Err(e) => {
                warn!("Failed to fetch lessons from server: {}", e);
                Ok(())
            }
            Ok(_) => Ok(()),
        }
    }

    //=====================================================================================
    // Queue Drain
    //=====================================================================================

    /// Replays the queue in insertion order. Offline or empty-queue calls change nothing,
    /// and a call overlapping a running drain returns a `skipped` report.
    pub async fn drain(&self) -> PortResult<DrainReport> {
        if !self.network.is_online() {
            debug!("Offline, skipping sync");
            return Ok(DrainReport::default());
        }
        let Ok(_guard) = self.drain_lock.try_lock() else {
            debug!("Sync already in progress");
            return Ok(DrainReport {
                skipped: true,
                ..DrainReport::default()
            });
        };

        let queue = self.store.list_queue().await?;
        if queue.is_empty() {
            return Ok(DrainReport::default());
        }

        info!("Processing {} queued changes", queue.len());
        self.status.begin_sync();

        match self.drain_locked(queue).await {
            Ok(report) => {
                let pending = self.store.queue_len().await;
                let now = Utc::now();
                let saved = self.save_last_synced(now).await;
                match pending.and_then(|p| saved.map(|_| p)) {
                    Ok(pending) if report.failed == 0 => {
                        self.status.finish_success(pending, Some(now));
                    }
                    Ok(pending) => {
                        self.status.finish_error(
                            format!("{} operations failed to sync", report.failed),
                            Some(pending),
                        );
                    }
                    Err(e) => {
                        self.status.finish_error(e.to_string(), None);
                        return Err(e);
                    }
                }
                info!(
                    "Sync complete: {} succeeded, {} failed, {} dropped",
                    report.succeeded, report.failed, report.dropped
                );
                Ok(report)
            }
            Err(e) => {
                error!("Sync aborted: {}", e);
                self.status.finish_error(e.to_string(), None);
                Err(e)
            }
        }
    }

    async fn drain_locked(&self, queue: Vec<SyncQueueItem>) -> PortResult<DrainReport> {
        let mut report = DrainReport::default();

        for listed in queue {
            // Earlier creates in this pass may have remapped the item.
            let Some(item) = self.store.get_queue_item(&listed.id).await? else {
                continue;
            };

            match self.replay(&item).await {
                Ok(()) => {
                    self.store.remove_queue_item(&item.id).await?;
                    report.succeeded += 1;
                }
                Err(e @ PortError::StorageUnavailable(_)) => return Err(e),
                Err(e) if e.is_retryable() => {
                    report.failed += 1;
                    let mut item = item;
                    item.retry_count += 1;
                    if item.retry_count >= self.settings.max_retries {
                        let gave_up = PortError::MaxRetriesExceeded {
                            attempts: item.retry_count,
                            message: e.to_string(),
                        };
                        self.drop_item(&item, DropReason::MaxRetriesExceeded, gave_up.to_string())
                            .await?;
                        report.dropped += 1;
                    } else {
                        warn!(
                            "Sync of {} {} failed (attempt {}): {}",
                            item.action, item.lesson_id, item.retry_count, e
                        );
                        self.store.update_queue_item(&item).await?;
                    }
                }
                Err(e) => {
                    report.failed += 1;
                    self.drop_item(&item, DropReason::RemoteRejected, e.to_string())
                        .await?;
                    report.dropped += 1;
                }
            }
        }
        Ok(report)
    }

    async fn replay(&self, item: &SyncQueueItem) -> PortResult<()> {
        match item.action {
            SyncAction::Create => {
                let data = queued_record(item)?;
                let created = self.remote.create_lesson(&LessonPayload::from(data)).await?;

                // The server owns the identity from now on; the content stays the latest
                // local version, which later queued updates will push.
                if let Some(mut local) = self.store.get_lesson(&item.lesson_id).await? {
                    local.id = created.id.clone();
                    local.is_offline_created = false;
                    local.last_synced_at = Some(Utc::now());
                    if let Some(created_at) = created.created_at {
                        local.created_at = created_at;
                    }
                    self.store.replace_lesson(&item.lesson_id, &local).await?;
                }
                self.store
                    .remap_queue_lesson_id(&item.lesson_id, &created.id)
                    .await?;
                debug!("Synced create: {} -> {}", item.lesson_id, created.id);
            }
            SyncAction::Update => {
                let data = queued_record(item)?;
                self.remote
                    .update_lesson(&item.lesson_id, &LessonPayload::from(data))
                    .await?;

                if let Some(cached) = self.store.get_lesson(&item.lesson_id).await? {
                    if data.updated_at >= cached.updated_at {
                        let mut synced = data.clone();
                        synced.id = item.lesson_id.clone();
                        synced.is_offline_created = false;
                        synced.last_synced_at = Some(Utc::now());
                        self.store.put_lesson(&synced).await?;
                    }
                }
                debug!("Synced update: {}", item.lesson_id);
            }
            SyncAction::Delete => match self.remote.delete_lesson(&item.lesson_id).await {
                Ok(()) | Err(PortError::NotFound(_)) => {
                    debug!("Synced delete: {}", item.lesson_id);
                }
                Err(e) => return Err(e),
            },
        }
        Ok(())
    }

    async fn drop_item(&self, item: &SyncQueueItem, reason: DropReason, message: String) -> PortResult<()> {
        error!(
            "Dropping queued {} of lesson {}: {}",
            item.action, item.lesson_id, message
        );
        let mut dropped = self.dropped_changes().await?;
        dropped.push(DroppedChange::from_item(item, reason, message));
        self.save_dropped(&dropped).await?;
        self.store.remove_queue_item(&item.id).await
    }

    //=====================================================================================
    // Status
    //=====================================================================================

    pub fn state(&self) -> SyncState {
        self.status.state()
    }

    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&SyncState) + Send + Sync + 'static,
    {
        self.status.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.status.unsubscribe(id)
    }

    pub fn watch_state(&self) -> watch::Receiver<SyncState> {
        self.status.watch()
    }

    /// Returns a finished sync's status to idle without waiting for the cool-down.
    pub fn settle(&self) {
        self.status.settle();
    }

    async fn refresh_pending(&self) -> PortResult<()> {
        let pending = self.store.queue_len().await?;
        self.status.set_pending(pending);
        Ok(())
    }

    //=====================================================================================
    // Dropped Changes
    //=====================================================================================

    pub async fn dropped_changes(&self) -> PortResult<Vec<DroppedChange>> {
        let raw = self.store.get_user_data(DROPPED_KEY).await?;
        Ok(raw
            .and_then(|v| match serde_json::from_value(v) {
                Ok(list) => Some(list),
                Err(e) => {
                    warn!("Discarding unreadable dropped changes: {}", e);
                    None
                }
            })
            .unwrap_or_default())
    }

    /// Returns false if no dropped change has this id.
    pub async fn dismiss_dropped(&self, change_id: &str) -> PortResult<bool> {
        let mut dropped = self.dropped_changes().await?;
        let before = dropped.len();
        dropped.retain(|d| d.id != change_id);
        if dropped.len() == before {
            return Ok(false);
        }
        self.save_dropped(&dropped).await?;
        Ok(true)
    }

    async fn save_dropped(&self, dropped: &[DroppedChange]) -> PortResult<()> {
        let value = serde_json::to_value(dropped).map_err(|e| PortError::Serialization(e.to_string()))?;
        self.store.put_user_data(DROPPED_KEY, &value).await
    }

    //=====================================================================================
    // Maintenance
    //=====================================================================================

    pub async fn stats(&self) -> PortResult<OfflineStats> {
        Ok(self.store.counts().await?.into())
    }

    /// Sign-out: stops auto-sync and wipes every local collection.
    pub async fn clear_offline_data(&self) -> PortResult<()> {
        self.stop();
        self.session().take();
        self.store.clear_all().await?;
        self.status.reset();
        info!("Offline data cleared");
        Ok(())
    }

    async fn cached_last_synced(&self) -> PortResult<Option<DateTime<Utc>>> {
        let raw = self.store.get_user_data(LAST_SYNCED_KEY).await?;
        Ok(raw.and_then(|v| serde_json::from_value::<DateTime<Utc>>(v).ok()))
    }

    async fn save_last_synced(&self, at: DateTime<Utc>) -> PortResult<()> {
        self.store
            .put_user_data(LAST_SYNCED_KEY, &json!(at))
            .await
    }

    //=====================================================================================
    // Pending Templates
    //=====================================================================================

    pub async fn save_pending_template(&self, draft: PendingTemplateDraft) -> PortResult<PendingTemplate> {
        let user_id = self.current_user()?;
        let template = draft.into_template(&user_id);
        self.store.save_pending_template(&template).await?;
        info!("Saved pending template: {}", template.template_title);
        Ok(template)
    }

    pub async fn pending_templates(&self) -> PortResult<Vec<PendingTemplate>> {
        let user_id = self.current_user()?;
        self.store.list_pending_templates(&user_id).await
    }

    pub async fn remove_pending_template(&self, template_id: &str) -> PortResult<()> {
        self.store.remove_pending_template(template_id).await
    }

    pub async fn pending_template_count(&self) -> PortResult<usize> {
        Ok(self.pending_templates().await?.len())
    }
}

fn queued_record(item: &SyncQueueItem) -> PortResult<&OfflineLesson> {
    item.data.as_ref().ok_or_else(|| {
        PortError::Serialization(format!("queued {} of {} carries no record", item.action, item.lesson_id))
    })
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
