pub mod domain;
pub mod ports;

pub use domain::{
    is_temp_id, new_temp_lesson_id, ApiLesson, DropReason, DroppedChange, LessonDraft,
    LessonPatch, LessonPayload, MemoryVerse, OfflineLesson, OfflineStats, PendingTemplate,
    PendingTemplateDraft, StoreCounts, SyncAction, SyncQueueItem, SyncState, SyncStatus,
};
pub use ports::{LocalStore, PortError, PortResult, RemoteLessonApi};
