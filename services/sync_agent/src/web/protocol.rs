//! services/sync_agent/src/web/protocol.rs
//!
//! Defines the WebSocket message protocol between a UI shell and the sync agent's
//! status stream.

use lesson_sync_core::domain::SyncState;
use serde::{Deserialize, Serialize};

//=========================================================================================
// Messages Sent FROM the Client TO the Agent
//=========================================================================================

#[derive(Deserialize, Debug, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Drain the sync queue now, same as `POST /sync`.
    ForceSync,

    /// Return a finished sync's status to idle.
    Dismiss,
}

//=========================================================================================
// Messages Sent FROM the Agent TO the Client
//=========================================================================================

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent once on connect and again on every state change.
    SyncStatus {
        state: SyncState,
        is_online: bool,
    },

    /// The outcome of a `force_sync` request.
    SyncResult { success: bool, message: String },

    /// The client sent something that could not be understood.
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn frames_are_tagged_snake_case() {
        let frame = ServerMessage::SyncStatus {
            state: SyncState::default(),
            is_online: true,
        };
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            json!({
                "type": "sync_status",
                "state": {"status": "idle", "pendingChanges": 0, "lastSyncedAt": null, "error": null},
                "is_online": true
            })
        );

        let msg: ClientMessage = serde_json::from_str(r#"{"type":"force_sync"}"#).unwrap();
        assert_eq!(msg, ClientMessage::ForceSync);
    }
}
