pub mod db;
pub mod http_api;
pub mod memory_store;
pub mod network;

pub use db::SqliteStore;
pub use http_api::HttpLessonApi;
pub use memory_store::MemoryStore;
pub use network::NetworkMonitor;
