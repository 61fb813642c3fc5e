//! services/sync_agent/src/adapters/memory_store.rs
//!
//! A volatile `LocalStore` kept entirely in process memory. Used when the agent
//! runs without a durable database and by the test suites, which can switch
//! writes off to simulate a full or broken disk.

use async_trait::async_trait;
use lesson_sync_core::domain::{OfflineLesson, PendingTemplate, StoreCounts, SyncQueueItem};
use lesson_sync_core::ports::{LocalStore, PortError, PortResult};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct Collections {
    lessons: HashMap<String, OfflineLesson>,
    queue: Vec<SyncQueueItem>,
    user_data: HashMap<String, Value>,
    templates: HashMap<String, PendingTemplate>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Collections>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every mutating call fails with `StorageUnavailable`.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn read(&self) -> PortResult<MutexGuard<'_, Collections>> {
        self.inner
            .lock()
            .map_err(|_| PortError::StorageUnavailable("store lock poisoned".to_string()))
    }

    fn write(&self) -> PortResult<MutexGuard<'_, Collections>> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(PortError::StorageUnavailable("quota exceeded".to_string()));
        }
        self.read()
    }
}

fn newest_first(mut lessons: Vec<OfflineLesson>) -> Vec<OfflineLesson> {
    lessons.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    lessons
}

#[async_trait]
impl LocalStore for MemoryStore {
    async fn put_lesson(&self, lesson: &OfflineLesson) -> PortResult<()> {
        self.write()?.lessons.insert(lesson.id.clone(), lesson.clone());
        Ok(())
    }

    async fn get_lesson(&self, lesson_id: &str) -> PortResult<Option<OfflineLesson>> {
        Ok(self.read()?.lessons.get(lesson_id).cloned())
    }

    async fn list_lessons(&self, user_id: &str) -> PortResult<Vec<OfflineLesson>> {
        let lessons = self
            .read()?
            .lessons
            .values()
            .filter(|l| l.user_id == user_id)
            .cloned()
            .collect();
        Ok(newest_first(lessons))
    }

    async fn list_favorite_lessons(&self, user_id: &str) -> PortResult<Vec<OfflineLesson>> {
        let lessons = self
            .read()?
            .lessons
            .values()
            .filter(|l| l.user_id == user_id && l.is_favorite)
            .cloned()
            .collect();
        Ok(newest_first(lessons))
    }

    async fn delete_lesson(&self, lesson_id: &str) -> PortResult<()> {
        self.write()?.lessons.remove(lesson_id);
        Ok(())
    }

    async fn replace_user_lessons(
        &self,
        user_id: &str,
        lessons: &[OfflineLesson],
        keep: &[String],
    ) -> PortResult<()> {
        let keep: HashSet<&str> = keep.iter().map(String::as_str).collect();
        let incoming: HashSet<&str> = lessons.iter().map(|l| l.id.as_str()).collect();

        let mut guard = self.write()?;
        guard.lessons.retain(|id, l| {
            l.user_id != user_id
                || l.is_offline_created
                || keep.contains(id.as_str())
                || incoming.contains(id.as_str())
        });
        for lesson in lessons.iter().filter(|l| !keep.contains(l.id.as_str())) {
            guard.lessons.insert(lesson.id.clone(), lesson.clone());
        }
        Ok(())
    }

    async fn replace_lesson(&self, old_id: &str, lesson: &OfflineLesson) -> PortResult<()> {
        let mut guard = self.write()?;
        guard.lessons.remove(old_id);
        guard.lessons.insert(lesson.id.clone(), lesson.clone());
        Ok(())
    }

    async fn enqueue(&self, item: &SyncQueueItem) -> PortResult<()> {
        self.write()?.queue.push(item.clone());
        Ok(())
    }

    async fn list_queue(&self) -> PortResult<Vec<SyncQueueItem>> {
        Ok(self.read()?.queue.clone())
    }

    async fn get_queue_item(&self, item_id: &str) -> PortResult<Option<SyncQueueItem>> {
        Ok(self.read()?.queue.iter().find(|i| i.id == item_id).cloned())
    }

    async fn update_queue_item(&self, item: &SyncQueueItem) -> PortResult<()> {
        let mut guard = self.write()?;
        if let Some(slot) = guard.queue.iter_mut().find(|i| i.id == item.id) {
            *slot = item.clone();
        }
        Ok(())
    }

    async fn remove_queue_item(&self, item_id: &str) -> PortResult<()> {
        self.write()?.queue.retain(|i| i.id != item_id);
        Ok(())
    }

    async fn remap_queue_lesson_id(&self, old_id: &str, new_id: &str) -> PortResult<()> {
        let mut guard = self.write()?;
        for item in guard.queue.iter_mut().filter(|i| i.lesson_id == old_id) {
            item.lesson_id = new_id.to_string();
            if let Some(data) = item.data.as_mut() {
                data.id = new_id.to_string();
                data.is_offline_created = false;
            }
        }
        Ok(())
    }

    async fn queued_lesson_ids(&self) -> PortResult<Vec<String>> {
        let mut seen = HashSet::new();
        Ok(self
            .read()?
            .queue
            .iter()
            .filter(|i| seen.insert(i.lesson_id.clone()))
            .map(|i| i.lesson_id.clone())
            .collect())
    }

    async fn queue_len(&self) -> PortResult<usize> {
        Ok(self.read()?.queue.len())
    }

    async fn put_user_data(&self, key: &str, value: &Value) -> PortResult<()> {
        self.write()?.user_data.insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn get_user_data(&self, key: &str) -> PortResult<Option<Value>> {
        Ok(self.read()?.user_data.get(key).cloned())
    }

    async fn save_pending_template(&self, template: &PendingTemplate) -> PortResult<()> {
        self.write()?
            .templates
            .insert(template.id.clone(), template.clone());
        Ok(())
    }

    async fn list_pending_templates(&self, user_id: &str) -> PortResult<Vec<PendingTemplate>> {
        let mut templates: Vec<PendingTemplate> = self
            .read()?
            .templates
            .values()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect();
        templates.sort_by(|a, b| b.saved_at.cmp(&a.saved_at));
        Ok(templates)
    }

    async fn remove_pending_template(&self, template_id: &str) -> PortResult<()> {
        self.write()?.templates.remove(template_id);
        Ok(())
    }

    async fn counts(&self) -> PortResult<StoreCounts> {
        let guard = self.read()?;
        Ok(StoreCounts {
            lessons: guard.lessons.len(),
            sync_queue: guard.queue.len(),
            pending_templates: guard.templates.len(),
        })
    }

    async fn clear_all(&self) -> PortResult<()> {
        *self.write()? = Collections::default();
        Ok(())
    }
}
