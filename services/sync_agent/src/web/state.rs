//! services/sync_agent/src/web/state.rs
//!
//! Defines the state shared by every HTTP and WebSocket handler.

use crate::adapters::network::NetworkMonitor;
use crate::facade::LessonFacade;
use crate::sync::SyncEngine;
use std::sync::Arc;

//=========================================================================================
// AppState (Shared Across All Connections)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub facade: Arc<LessonFacade>,
    pub network: Arc<NetworkMonitor>,
}

impl AppState {
    pub fn engine(&self) -> &Arc<SyncEngine> {
        self.facade.engine()
    }
}
