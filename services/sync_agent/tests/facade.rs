mod common;

use common::{draft, network_down, Harness};
use lesson_sync_core::domain::{LessonPatch, StoreCounts};
use lesson_sync_core::ports::{LocalStore, PortError};
use sync_agent_lib::facade::{LessonFacade, OFFLINE_UNSUPPORTED};

fn facade(h: &Harness) -> LessonFacade {
    LessonFacade::new(h.engine.clone(), h.remote.clone())
}

/// Signs in and stops the background loop so connectivity flips stay under test control.
async fn signed_in(h: &Harness, user_id: &str) -> LessonFacade {
    let facade = facade(h);
    facade.sign_in(user_id).await.unwrap();
    facade.engine().stop();
    facade
}

#[tokio::test]
async fn sign_in_loads_the_cached_list() {
    let h = Harness::new(true);
    h.remote.seed("L1", "Genesis");
    h.remote.seed("L2", "Exodus");

    let facade = signed_in(&h, "alice").await;
    let snapshot = facade.snapshot();

    assert_eq!(snapshot.lessons.len(), 2);
    assert!(!snapshot.is_loading);
    assert!(snapshot.is_online);
    assert!(snapshot.offline_supported);
    assert!(snapshot.error.is_none());
    assert_eq!(h.store.counts().await.unwrap().lessons, 2);
}

#[tokio::test]
async fn unusable_storage_degrades_to_online_only() {
    let h = Harness::new(true);
    h.remote.seed("L1", "Genesis");
    h.store.fail_writes(true);

    let facade = signed_in(&h, "alice").await;
    let snapshot = facade.snapshot();
    assert!(!snapshot.offline_supported);
    assert_eq!(snapshot.error.as_deref(), Some(OFFLINE_UNSUPPORTED));
    assert_eq!(snapshot.lessons.len(), 1);

    let created = facade.create(draft("Direct")).await.unwrap();
    assert_eq!(created.id, "srv-1");
    assert_eq!(facade.snapshot().lessons.len(), 2);

    let renamed = facade
        .update("L1", LessonPatch::title("Renamed"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(renamed.title, "Renamed");
    assert_eq!(h.remote.lesson("L1").unwrap().title, "Renamed");

    assert!(facade.remove("srv-1").await.unwrap());
    assert_eq!(h.remote.server_ids(), vec!["L1".to_string()]);
    assert_eq!(h.store.counts().await.unwrap(), StoreCounts::default());
}

#[tokio::test]
async fn mutations_update_the_read_model() {
    let h = Harness::new(false);
    let facade = signed_in(&h, "alice").await;

    let lesson = facade.create(draft("Ruth")).await.unwrap();
    assert_eq!(facade.snapshot().lessons, vec![lesson.clone()]);

    let favored = facade.toggle_favorite(&lesson.id).await.unwrap().unwrap();
    assert!(favored.is_favorite);
    assert!(facade.snapshot().lessons[0].is_favorite);
    assert_eq!(facade.favorites().await.unwrap().len(), 1);

    assert!(facade.remove(&lesson.id).await.unwrap());
    assert!(facade.snapshot().lessons.is_empty());
    // create, favorite and delete all wait for the server
    assert_eq!(facade.snapshot().sync_state.pending_changes, 3);
}

#[tokio::test]
async fn failures_are_surfaced_on_the_snapshot() {
    let h = Harness::new(false);
    let facade = signed_in(&h, "alice").await;
    h.store.fail_writes(true);

    let err = facade.create(draft("Lost")).await.unwrap_err();
    assert!(matches!(err, PortError::StorageUnavailable(_)));
    assert!(facade
        .snapshot()
        .error
        .unwrap()
        .starts_with("Local storage unavailable"));
}

#[tokio::test]
async fn force_sync_reports_offline() {
    let h = Harness::new(false);
    let facade = signed_in(&h, "alice").await;
    facade.create(draft("Waiting")).await.unwrap();

    let outcome = facade.force_sync().await;
    assert!(!outcome.success);
    assert_eq!(outcome.message, "You are offline");
    assert_eq!(h.store.queue_len().await.unwrap(), 1);
}

#[tokio::test]
async fn force_sync_drains_and_reloads() {
    let h = Harness::new(false);
    let facade = signed_in(&h, "alice").await;
    facade.create(draft("One")).await.unwrap();
    facade.create(draft("Two")).await.unwrap();

    h.network.set_online(true);
    let outcome = facade.force_sync().await;

    assert!(outcome.success);
    assert_eq!(outcome.message, "Synced 2 changes");
    let mut ids: Vec<String> = facade.snapshot().lessons.into_iter().map(|l| l.id).collect();
    ids.sort();
    assert_eq!(ids, vec!["srv-1".to_string(), "srv-2".to_string()]);
}

#[tokio::test]
async fn force_sync_counts_failures() {
    let h = Harness::new(false);
    let facade = signed_in(&h, "alice").await;
    facade.create(draft("Stuck")).await.unwrap();

    h.network.set_online(true);
    h.remote.fail_always(Some(network_down()));
    let outcome = facade.force_sync().await;

    assert!(outcome.success);
    assert_eq!(outcome.message, "Synced 0 changes, 1 failed");
}

#[tokio::test]
async fn sign_out_wipes_local_data() {
    let h = Harness::new(false);
    let facade = signed_in(&h, "alice").await;
    facade.create(draft("Private")).await.unwrap();

    facade.sign_out().await;

    assert!(facade.snapshot().lessons.is_empty());
    assert_eq!(h.store.counts().await.unwrap(), StoreCounts::default());
    assert!(matches!(facade.refresh().await, Err(PortError::NotSignedIn)));
}

#[tokio::test]
async fn refresh_pulls_lessons_added_on_the_server() {
    let h = Harness::new(true);
    h.remote.seed("srv-a", "First");
    let facade = signed_in(&h, "alice").await;
    assert_eq!(facade.snapshot().lessons.len(), 1);

    h.remote.seed("srv-b", "Second");
    facade.reload().await.unwrap();
    assert_eq!(facade.snapshot().lessons.len(), 1);

    facade.refresh().await.unwrap();
    let mut titles: Vec<String> = facade.snapshot().lessons.into_iter().map(|l| l.title).collect();
    titles.sort();
    assert_eq!(titles, vec!["First".to_string(), "Second".to_string()]);
}

#[tokio::test]
async fn refresh_keeps_the_cache_when_the_server_fails() {
    let h = Harness::new(true);
    h.remote.seed("srv-a", "First");
    let facade = signed_in(&h, "alice").await;

    h.remote.fail_always(Some(network_down()));
    facade.refresh().await.unwrap();

    assert_eq!(facade.snapshot().lessons.len(), 1);
    assert_eq!(h.store.counts().await.unwrap().lessons, 1);
}
