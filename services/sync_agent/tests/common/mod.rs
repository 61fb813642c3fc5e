//! Shared fixtures for the sync agent integration tests: a scripted remote API
//! and a helper that wires an engine over the in-memory store.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use lesson_sync_core::domain::{ApiLesson, LessonDraft, LessonPayload};
use lesson_sync_core::ports::{PortError, PortResult, RemoteLessonApi};
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use sync_agent_lib::adapters::{MemoryStore, NetworkMonitor};
use sync_agent_lib::config::SyncSettings;
use sync_agent_lib::sync::SyncEngine;

/// One request as the fake server saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    List,
    Get(String),
    Create { title: String },
    Update { id: String, title: String },
    Delete(String),
    Favorite(String),
}

/// An in-process stand-in for the lesson server.
#[derive(Default)]
pub struct FakeRemote {
    lessons: Mutex<BTreeMap<String, ApiLesson>>,
    calls: Mutex<Vec<Call>>,
    next_failures: Mutex<VecDeque<PortError>>,
    always_fail: Mutex<Option<PortError>>,
    create_delay: Mutex<Option<Duration>>,
    next_id: AtomicU64,
}

pub fn api_lesson(id: &str, title: &str) -> ApiLesson {
    ApiLesson {
        id: id.to_string(),
        user_id: None,
        title: title.to_string(),
        passage: String::new(),
        age_group: String::new(),
        duration: String::new(),
        format: String::new(),
        theme: String::new(),
        memory_verse_text: String::new(),
        memory_verse_reference: String::new(),
        objectives: Vec::new(),
        sections_json: Value::String("[]".into()),
        materials_json: Value::String("[]".into()),
        cross_references_json: Value::Null,
        favorite: false,
        created_at: Some(Utc::now()),
    }
}

fn from_payload(id: String, payload: &LessonPayload) -> ApiLesson {
    ApiLesson {
        title: payload.title.clone(),
        passage: payload.passage.clone(),
        favorite: payload.favorite,
        sections_json: Value::String(payload.sections_json.clone()),
        materials_json: Value::String(payload.materials_json.clone()),
        ..api_lesson(&id, &payload.title)
    }
}

impl FakeRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn seed(&self, id: &str, title: &str) {
        self.lessons
            .lock()
            .unwrap()
            .insert(id.to_string(), api_lesson(id, title));
    }

    pub fn lesson(&self, id: &str) -> Option<ApiLesson> {
        self.lessons.lock().unwrap().get(id).cloned()
    }

    pub fn server_ids(&self) -> Vec<String> {
        self.lessons.lock().unwrap().keys().cloned().collect()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls other than listing, in order.
    pub fn writes(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| !matches!(c, Call::List | Call::Get(_)))
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    /// The next call fails with `err`; later calls behave normally.
    pub fn fail_next(&self, err: PortError) {
        self.next_failures.lock().unwrap().push_back(err);
    }

    pub fn fail_always(&self, err: Option<PortError>) {
        *self.always_fail.lock().unwrap() = err;
    }

    pub fn delay_creates(&self, delay: Duration) {
        *self.create_delay.lock().unwrap() = Some(delay);
    }

    fn record(&self, call: Call) -> PortResult<()> {
        self.calls.lock().unwrap().push(call);
        if let Some(err) = self.next_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        match self.always_fail.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RemoteLessonApi for FakeRemote {
    async fn list_lessons(&self, _user_id: &str) -> PortResult<Vec<ApiLesson>> {
        self.record(Call::List)?;
        Ok(self.lessons.lock().unwrap().values().cloned().collect())
    }

    async fn get_lesson(&self, lesson_id: &str) -> PortResult<ApiLesson> {
        self.record(Call::Get(lesson_id.to_string()))?;
        self.lesson(lesson_id)
            .ok_or_else(|| PortError::NotFound(lesson_id.to_string()))
    }

    async fn create_lesson(&self, payload: &LessonPayload) -> PortResult<ApiLesson> {
        let delay = *self.create_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.record(Call::Create {
            title: payload.title.clone(),
        })?;
        let id = format!("srv-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let created = from_payload(id.clone(), payload);
        self.lessons.lock().unwrap().insert(id, created.clone());
        Ok(created)
    }

    async fn update_lesson(&self, lesson_id: &str, payload: &LessonPayload) -> PortResult<ApiLesson> {
        self.record(Call::Update {
            id: lesson_id.to_string(),
            title: payload.title.clone(),
        })?;
        let mut lessons = self.lessons.lock().unwrap();
        if !lessons.contains_key(lesson_id) {
            return Err(PortError::NotFound(lesson_id.to_string()));
        }
        let updated = from_payload(lesson_id.to_string(), payload);
        lessons.insert(lesson_id.to_string(), updated.clone());
        Ok(updated)
    }

    async fn delete_lesson(&self, lesson_id: &str) -> PortResult<()> {
        self.record(Call::Delete(lesson_id.to_string()))?;
        self.lessons
            .lock()
            .unwrap()
            .remove(lesson_id)
            .map(|_| ())
            .ok_or_else(|| PortError::NotFound(lesson_id.to_string()))
    }

    async fn toggle_favorite(&self, lesson_id: &str) -> PortResult<ApiLesson> {
        self.record(Call::Favorite(lesson_id.to_string()))?;
        let mut lessons = self.lessons.lock().unwrap();
        let lesson = lessons
            .get_mut(lesson_id)
            .ok_or_else(|| PortError::NotFound(lesson_id.to_string()))?;
        lesson.favorite = !lesson.favorite;
        Ok(lesson.clone())
    }
}

pub fn draft(title: &str) -> LessonDraft {
    LessonDraft {
        title: title.to_string(),
        passage: "Genesis 1".to_string(),
        ..LessonDraft::default()
    }
}

pub fn network_down() -> PortError {
    PortError::NetworkUnreachable("connection refused".to_string())
}

pub struct Harness {
    pub engine: Arc<SyncEngine>,
    pub store: Arc<MemoryStore>,
    pub remote: Arc<FakeRemote>,
    pub network: Arc<NetworkMonitor>,
}

pub fn quiet_settings() -> SyncSettings {
    SyncSettings {
        auto_sync_interval: Duration::from_secs(3600),
        max_retries: 3,
        status_cooldown: Duration::from_secs(3600),
    }
}

impl Harness {
    pub fn new(online: bool) -> Self {
        Self::with_settings(online, quiet_settings())
    }

    pub fn with_settings(online: bool, settings: SyncSettings) -> Self {
        let store = Arc::new(MemoryStore::new());
        let remote = FakeRemote::new();
        let network = Arc::new(NetworkMonitor::new(online));
        let engine = Arc::new(SyncEngine::new(
            store.clone(),
            remote.clone(),
            network.clone(),
            settings,
        ));
        Self {
            engine,
            store,
            remote,
            network,
        }
    }

    /// Signs `user_id` in and switches the background loop off so tests drive every drain.
    pub async fn signed_in(online: bool, user_id: &str) -> Self {
        let harness = Self::new(online);
        harness.engine.start(user_id).await.unwrap();
        harness.engine.stop();
        harness
    }
}
