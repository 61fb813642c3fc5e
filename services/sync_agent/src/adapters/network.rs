//! services/sync_agent/src/adapters/network.rs
//!
//! Connectivity signal shared by the engine and the web surface. The current
//! state lives in a `watch` channel so any number of tasks can await transitions.

use crate::adapters::http_api::HttpLessonApi;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct NetworkMonitor {
    tx: watch::Sender<bool>,
}

impl NetworkMonitor {
    pub fn new(initially_online: bool) -> Self {
        let (tx, _rx) = watch::channel(initially_online);
        Self { tx }
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Feeds a platform connectivity signal. Repeating the current value notifies nobody.
    pub fn set_online(&self, online: bool) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            if online {
                info!("Network: online");
            } else {
                warn!("Network: offline");
            }
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Polls the remote API every `interval` and reports reachability until `cancel` fires.
    pub fn spawn_probe(
        self: &Arc<Self>,
        api: Arc<HttpLessonApi>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let reachable = api.is_reachable().await;
                        monitor.set_online(reachable);
                    }
                }
            }
        })
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_see_transitions_but_not_repeats() {
        let monitor = NetworkMonitor::new(true);
        let mut rx = monitor.subscribe();

        monitor.set_online(true);
        assert!(!rx.has_changed().unwrap());

        monitor.set_online(false);
        assert!(rx.has_changed().unwrap());
        assert!(!*rx.borrow_and_update());
        assert!(!monitor.is_online());
    }

    #[tokio::test]
    async fn probe_marks_an_unreachable_api_offline() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let api = Arc::new(
            HttpLessonApi::new(&format!("http://{}", addr), None, Duration::from_secs(1)).unwrap(),
        );
        let monitor = Arc::new(NetworkMonitor::new(true));
        let mut rx = monitor.subscribe();
        let cancel = CancellationToken::new();
        let handle = monitor.spawn_probe(api, Duration::from_millis(20), cancel.clone());

        tokio::time::timeout(Duration::from_secs(5), rx.changed())
            .await
            .unwrap()
            .unwrap();
        assert!(!monitor.is_online());

        cancel.cancel();
        handle.await.unwrap();
    }
}
