//! crates/lesson_sync_core/src/domain.rs
//!
//! Defines the core data structures of the offline lesson cache.
//! Lesson content is carried through opaquely; the sync engine only manages
//! identity, ownership, the favorite flag and the sync timestamps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Prefix of client-generated lesson ids that the server has not confirmed yet.
pub const TEMP_ID_PREFIX: &str = "offline_";
const QUEUE_ID_PREFIX: &str = "sync_";
const TEMPLATE_ID_PREFIX: &str = "pending_";

/// Generates a temporary lesson id for a provisional record.
pub fn new_temp_lesson_id() -> String {
    format!("{}{}", TEMP_ID_PREFIX, Uuid::new_v4().simple())
}

/// Returns true for ids minted by [`new_temp_lesson_id`].
pub fn is_temp_id(id: &str) -> bool {
    id.starts_with(TEMP_ID_PREFIX)
}

//=========================================================================================
// Lessons
//=========================================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryVerse {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub reference: String,
}

/// A lesson as it lives in the local cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineLesson {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub passage: String,
    #[serde(default)]
    pub age_group: String,
    #[serde(default)]
    pub duration: String,
    #[serde(default)]
    pub format: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<String>,
    #[serde(default)]
    pub sections: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_verse: Option<MemoryVerse>,
    #[serde(default)]
    pub materials: Vec<String>,
    #[serde(default)]
    pub objectives: Vec<String>,
    #[serde(default)]
    pub cross_references: Vec<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub is_favorite: bool,
    /// Set while the record only exists locally under a temporary id.
    #[serde(default)]
    pub is_offline_created: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl OfflineLesson {
    /// A provisional record has a temporary id and no server counterpart yet.
    pub fn is_provisional(&self) -> bool {
        self.is_offline_created || is_temp_id(&self.id)
    }
}

/// The content a caller supplies when creating a lesson.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonDraft {
    pub title: String,
    #[serde(default)]
    pub passage: String,
    #[serde(default)]
    pub age_group: String,
    #[serde(default)]
    pub duration: String,
    #[serde(default)]
    pub format: String,
    #[serde(default)]
    pub theme: Option<String>,
    #[serde(default)]
    pub sections: Vec<Value>,
    #[serde(default)]
    pub memory_verse: Option<MemoryVerse>,
    #[serde(default)]
    pub materials: Vec<String>,
    #[serde(default)]
    pub objectives: Vec<String>,
    #[serde(default)]
    pub cross_references: Vec<Value>,
    #[serde(default)]
    pub is_favorite: bool,
}

impl LessonDraft {
    /// Builds the provisional record written to the cache before the server has seen it.
    pub fn into_provisional(self, user_id: &str, id: String, now: DateTime<Utc>) -> OfflineLesson {
        OfflineLesson {
            id,
            user_id: user_id.to_string(),
            title: self.title,
            passage: self.passage,
            age_group: self.age_group,
            duration: self.duration,
            format: self.format,
            theme: self.theme,
            sections: self.sections,
            memory_verse: self.memory_verse,
            materials: self.materials,
            objectives: self.objectives,
            cross_references: self.cross_references,
            created_at: now,
            updated_at: now,
            is_favorite: self.is_favorite,
            is_offline_created: true,
            last_synced_at: None,
        }
    }
}

/// A partial update. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonPatch {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub passage: Option<String>,
    #[serde(default)]
    pub age_group: Option<String>,
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub theme: Option<String>,
    #[serde(default)]
    pub sections: Option<Vec<Value>>,
    #[serde(default)]
    pub memory_verse: Option<MemoryVerse>,
    #[serde(default)]
    pub materials: Option<Vec<String>>,
    #[serde(default)]
    pub objectives: Option<Vec<String>>,
    #[serde(default)]
    pub cross_references: Option<Vec<Value>>,
    #[serde(default)]
    pub is_favorite: Option<bool>,
}

impl LessonPatch {
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    pub fn favorite(is_favorite: bool) -> Self {
        Self {
            is_favorite: Some(is_favorite),
            ..Self::default()
        }
    }

    /// Merges the patch into `lesson` and bumps its `updated_at`.
    pub fn apply_to(self, lesson: &mut OfflineLesson, now: DateTime<Utc>) {
        if let Some(v) = self.title {
            lesson.title = v;
        }
        if let Some(v) = self.passage {
            lesson.passage = v;
        }
        if let Some(v) = self.age_group {
            lesson.age_group = v;
        }
        if let Some(v) = self.duration {
            lesson.duration = v;
        }
        if let Some(v) = self.format {
            lesson.format = v;
        }
        if let Some(v) = self.theme {
            lesson.theme = Some(v);
        }
        if let Some(v) = self.sections {
            lesson.sections = v;
        }
        if let Some(v) = self.memory_verse {
            lesson.memory_verse = Some(v);
        }
        if let Some(v) = self.materials {
            lesson.materials = v;
        }
        if let Some(v) = self.objectives {
            lesson.objectives = v;
        }
        if let Some(v) = self.cross_references {
            lesson.cross_references = v;
        }
        if let Some(v) = self.is_favorite {
            lesson.is_favorite = v;
        }
        lesson.updated_at = now;
    }
}

//=========================================================================================
// Remote Wire Shapes
//=========================================================================================

/// A lesson as the remote API returns it. List-valued content travels as JSON strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiLesson {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub passage: String,
    #[serde(default)]
    pub age_group: String,
    #[serde(default)]
    pub duration: String,
    #[serde(default)]
    pub format: String,
    #[serde(default)]
    pub theme: String,
    #[serde(default)]
    pub memory_verse_text: String,
    #[serde(default)]
    pub memory_verse_reference: String,
    #[serde(default)]
    pub objectives: Vec<String>,
    #[serde(default)]
    pub sections_json: Value,
    #[serde(default)]
    pub materials_json: Value,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub cross_references_json: Value,
    #[serde(default)]
    pub favorite: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl ApiLesson {
    /// Converts a server lesson into an authoritative cache record owned by `user_id`.
    pub fn into_offline(self, user_id: &str, now: DateTime<Utc>) -> OfflineLesson {
        let sections = parse_json_list(&self.sections_json);
        let materials = parse_json_list(&self.materials_json)
            .into_iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect();
        let cross_references = parse_json_list(&self.cross_references_json);
        let created_at = self.created_at.unwrap_or(now);
        let theme = if self.theme.is_empty() {
            None
        } else {
            Some(self.theme)
        };

        OfflineLesson {
            id: self.id,
            user_id: user_id.to_string(),
            title: self.title,
            passage: self.passage,
            age_group: self.age_group,
            duration: self.duration,
            format: self.format,
            theme,
            sections,
            memory_verse: Some(MemoryVerse {
                text: self.memory_verse_text,
                reference: self.memory_verse_reference,
            }),
            materials,
            objectives: self.objectives,
            cross_references,
            created_at,
            updated_at: created_at,
            is_favorite: self.favorite,
            is_offline_created: false,
            last_synced_at: Some(now),
        }
    }
}

/// The body sent on create and update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonPayload {
    pub title: String,
    pub passage: String,
    pub age_group: String,
    pub duration: String,
    pub format: String,
    pub theme: String,
    pub memory_verse_text: String,
    pub memory_verse_reference: String,
    pub objectives: Vec<String>,
    pub sections_json: String,
    pub materials_json: String,
    pub cross_references_json: String,
    pub favorite: bool,
}

impl From<&OfflineLesson> for LessonPayload {
    fn from(lesson: &OfflineLesson) -> Self {
        let verse = lesson.memory_verse.clone().unwrap_or_default();
        Self {
            title: lesson.title.clone(),
            passage: lesson.passage.clone(),
            age_group: lesson.age_group.clone(),
            duration: lesson.duration.clone(),
            format: lesson.format.clone(),
            theme: lesson.theme.clone().unwrap_or_default(),
            memory_verse_text: verse.text,
            memory_verse_reference: verse.reference,
            objectives: lesson.objectives.clone(),
            sections_json: Value::Array(lesson.sections.clone()).to_string(),
            materials_json: Value::from(lesson.materials.clone()).to_string(),
            cross_references_json: Value::Array(lesson.cross_references.clone()).to_string(),
            favorite: lesson.is_favorite,
        }
    }
}

/// Accepts either a JSON-encoded string or an inline array; anything unparsable is empty.
fn parse_json_list(raw: &Value) -> Vec<Value> {
    match raw {
        Value::String(s) => serde_json::from_str::<Vec<Value>>(s).unwrap_or_default(),
        Value::Array(items) => items.clone(),
        _ => Vec::new(),
    }
}

//=========================================================================================
// Sync Queue
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncAction {
    Create,
    Update,
    Delete,
}

impl SyncAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncAction::Create => "create",
            SyncAction::Update => "update",
            SyncAction::Delete => "delete",
        }
    }
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(SyncAction::Create),
            "update" => Ok(SyncAction::Update),
            "delete" => Ok(SyncAction::Delete),
            other => Err(format!("unknown sync action '{}'", other)),
        }
    }
}

/// One pending mutation waiting to be replayed against the remote API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncQueueItem {
    pub id: String,
    pub lesson_id: String,
    pub action: SyncAction,
    /// Full record for create/update, absent for delete.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<OfflineLesson>,
    pub timestamp: DateTime<Utc>,
    pub retry_count: u32,
}

impl SyncQueueItem {
    pub fn new(lesson_id: &str, action: SyncAction, data: Option<OfflineLesson>) -> Self {
        Self {
            id: format!("{}{}", QUEUE_ID_PREFIX, Uuid::new_v4().simple()),
            lesson_id: lesson_id.to_string(),
            action,
            data,
            timestamp: Utc::now(),
            retry_count: 0,
        }
    }
}

//=========================================================================================
// Sync State
//=========================================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    #[default]
    Idle,
    Syncing,
    Error,
    Success,
}

/// Process-wide sync indicator. Only `last_synced_at` outlives a restart (via user data).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    pub status: SyncStatus,
    pub pending_changes: usize,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// Why the engine gave up on a queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    MaxRetriesExceeded,
    RemoteRejected,
}

/// A queue item that was abandoned, kept until the user dismisses it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DroppedChange {
    pub id: String,
    pub lesson_id: String,
    pub action: SyncAction,
    pub reason: DropReason,
    pub message: String,
    pub dropped_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<OfflineLesson>,
}

impl DroppedChange {
    pub fn from_item(item: &SyncQueueItem, reason: DropReason, message: String) -> Self {
        Self {
            id: item.id.clone(),
            lesson_id: item.lesson_id.clone(),
            action: item.action,
            reason,
            message,
            dropped_at: Utc::now(),
            data: item.data.clone(),
        }
    }
}

//=========================================================================================
// Pending Templates
//=========================================================================================

/// A lesson template saved while offline, to be generated later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingTemplate {
    pub id: String,
    pub user_id: String,
    pub template_id: String,
    pub template_title: String,
    pub passage: String,
    pub age_group: String,
    pub duration: String,
    pub theme: String,
    pub description: String,
    pub saved_at: DateTime<Utc>,
    #[serde(default)]
    pub template_data: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingTemplateDraft {
    pub template_id: String,
    pub template_title: String,
    #[serde(default)]
    pub passage: String,
    #[serde(default)]
    pub age_group: String,
    #[serde(default)]
    pub duration: String,
    #[serde(default)]
    pub theme: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub template_data: Value,
}

impl PendingTemplateDraft {
    pub fn into_template(self, user_id: &str) -> PendingTemplate {
        PendingTemplate {
            id: format!("{}{}", TEMPLATE_ID_PREFIX, Uuid::new_v4().simple()),
            user_id: user_id.to_string(),
            template_id: self.template_id,
            template_title: self.template_title,
            passage: self.passage,
            age_group: self.age_group,
            duration: self.duration,
            theme: self.theme,
            description: self.description,
            saved_at: Utc::now(),
            template_data: self.template_data,
        }
    }
}

//=========================================================================================
// Storage Statistics
//=========================================================================================

/// Raw record counts of the local collections.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCounts {
    pub lessons: usize,
    pub sync_queue: usize,
    pub pending_templates: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineStats {
    pub lesson_count: usize,
    pub sync_queue_count: usize,
    pub pending_templates_count: usize,
    pub estimated_size: String,
}

impl From<StoreCounts> for OfflineStats {
    fn from(counts: StoreCounts) -> Self {
        // Rough figures: ~5KB per lesson, ~3KB per template.
        let bytes = counts.lessons * 5000 + counts.pending_templates * 3000;
        let estimated_size = if bytes < 1024 * 1024 {
            format!("{} KB", (bytes as f64 / 1024.0).round() as u64)
        } else {
            format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
        };
        Self {
            lesson_count: counts.lessons,
            sync_queue_count: counts.sync_queue,
            pending_templates_count: counts.pending_templates,
            estimated_size,
        }
    }
}
