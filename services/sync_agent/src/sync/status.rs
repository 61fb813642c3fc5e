//! services/sync_agent/src/sync/status.rs
//!
//! The sync status state machine: idle -> syncing -> success | error -> idle.
//! Listeners registered with `subscribe` are called synchronously on every change;
//! async consumers (the WebSocket stream) follow the same state through a `watch`.

use chrono::{DateTime, Utc};
use lesson_sync_core::domain::{SyncState, SyncStatus};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

pub type ListenerId = u64;

type Listener = Arc<dyn Fn(&SyncState) + Send + Sync>;

struct Inner {
    state: SyncState,
    /// When the current terminal status (success/error) was entered.
    finished_at: Option<Instant>,
}

pub struct StatusHub {
    inner: Mutex<Inner>,
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
    next_id: AtomicU64,
    tx: watch::Sender<SyncState>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl StatusHub {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(SyncState::default());
        Self {
            inner: Mutex::new(Inner {
                state: SyncState::default(),
                finished_at: None,
            }),
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            tx,
        }
    }

    pub fn state(&self) -> SyncState {
        lock(&self.inner).state.clone()
    }

    /// Registers `listener` and calls it once with the current state before returning.
    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&SyncState) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let listener: Listener = Arc::new(listener);
        lock(&self.listeners).push((id, Arc::clone(&listener)));
        listener(&self.state());
        id
    }

    /// Returns false if `id` was not registered.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = lock(&self.listeners);
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    pub fn watch(&self) -> watch::Receiver<SyncState> {
        self.tx.subscribe()
    }

    /// Applies `change` and notifies everyone if the state actually moved.
    fn update<F>(&self, change: F)
    where
        F: FnOnce(&mut Inner),
    {
        let snapshot = {
            let mut inner = lock(&self.inner);
            let before = inner.state.clone();
            change(&mut inner);
            if inner.state == before {
                return;
            }
            inner.state.clone()
        };

        self.tx.send_replace(snapshot.clone());
        // Listeners run outside both locks so they may call back into the hub.
        let listeners: Vec<Listener> = lock(&self.listeners)
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener(&snapshot);
        }
    }

    pub fn begin_sync(&self) {
        self.update(|inner| {
            inner.state.status = SyncStatus::Syncing;
            inner.state.error = None;
            inner.finished_at = None;
        });
    }

    pub fn finish_success(&self, pending: usize, last_synced_at: Option<DateTime<Utc>>) {
        self.update(|inner| {
            inner.state.status = SyncStatus::Success;
            inner.state.pending_changes = pending;
            inner.state.error = None;
            if last_synced_at.is_some() {
                inner.state.last_synced_at = last_synced_at;
            }
            inner.finished_at = Some(Instant::now());
        });
    }

    pub fn finish_error(&self, message: String, pending: Option<usize>) {
        self.update(|inner| {
            inner.state.status = SyncStatus::Error;
            inner.state.error = Some(message);
            if let Some(pending) = pending {
                inner.state.pending_changes = pending;
            }
            inner.finished_at = Some(Instant::now());
        });
    }

    pub fn set_pending(&self, pending: usize) {
        self.update(|inner| inner.state.pending_changes = pending);
    }

    pub fn set_last_synced_at(&self, at: Option<DateTime<Utc>>) {
        self.update(|inner| inner.state.last_synced_at = at);
    }

    /// Drops a terminal status back to idle. A running sync is left alone.
    pub fn settle(&self) {
        self.update(|inner| {
            if matches!(inner.state.status, SyncStatus::Success | SyncStatus::Error) {
                inner.state.status = SyncStatus::Idle;
                inner.state.error = None;
                inner.finished_at = None;
            }
        });
    }

    /// When a terminal status entered now would be settled, or `None` if nothing is pending.
    pub fn settle_deadline(&self, cooldown: Duration) -> Option<Instant> {
        lock(&self.inner).finished_at.map(|at| at + cooldown)
    }

    pub fn settle_if_cooled(&self, cooldown: Duration) {
        let due = self
            .settle_deadline(cooldown)
            .is_some_and(|deadline| Instant::now() >= deadline);
        if due {
            self.settle();
        }
    }

    /// Back to the initial state (used on sign-out).
    pub fn reset(&self) {
        self.update(|inner| {
            inner.state = SyncState::default();
            inner.finished_at = None;
        });
    }
}

impl Default for StatusHub {
    fn default() -> Self {
        Self::new()
    }
}
