pub mod engine;
pub mod status;

pub use engine::{DrainReport, SyncEngine};
pub use status::{ListenerId, StatusHub};
