use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use pretty_assertions::assert_eq;

use super::*;
use crate::models::UserRole;
use crate::remote::MemoryRemote;
use crate::store::SqliteStore;
use crate::util::DAY_MS;

const NOW: i64 = 1_716_300_000_000;

struct Fixture {
    clock: Arc<ManualClock>,
    remote: Arc<MemoryRemote>,
}

impl Fixture {
    fn new() -> Self {
        let clock = Arc::new(ManualClock::new(NOW));
        let remote = Arc::new(MemoryRemote::new(clock.clone(), 3));
        Self { clock, remote }
    }

    fn device(&self) -> SyncEngine<MemoryRemote> {
        self.device_with(settings(), FreshnessKey::CreatedAt)
    }

    fn device_with(&self, settings: SyncSettings, freshness_key: FreshnessKey) -> SyncEngine<MemoryRemote> {
        let store: Arc<dyn LocalStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
        self.device_on(store, settings, freshness_key)
    }

    fn device_on(
        &self,
        store: Arc<dyn LocalStore>,
        settings: SyncSettings,
        freshness_key: FreshnessKey,
    ) -> SyncEngine<MemoryRemote> {
        SyncEngine::with_options(
            store,
            Arc::clone(&self.remote),
            settings,
            EngineOptions {
                clock: self.clock.clone(),
                freshness_key,
            },
        )
        .unwrap()
    }
}

fn settings() -> SyncSettings {
    SyncSettings::new("http://localhost:8888/api/db")
}

fn task(id: &str, created_at: i64, title: &str) -> Task {
    let mut task = Task::new(title, "", UserId::from("u4"), UserId::from("u1"), Utc::now());
    task.id = TaskId::from(id);
    task.created_at = created_at;
    task
}

fn ids(tasks: &[Task]) -> Vec<String> {
    let mut ids: Vec<String> = tasks.iter().map(|task| task.id.to_string()).collect();
    ids.sort();
    ids
}

fn title_of(engine: &SyncEngine<MemoryRemote>, id: &str) -> Option<String> {
    engine
        .cached_tasks()
        .into_iter()
        .find(|task| task.id.as_str() == id)
        .map(|task| task.title)
}

#[tokio::test(flavor = "multi_thread")]
async fn saved_task_is_readable_without_remote() {
    let fixture = Fixture::new();
    let engine = fixture.device();
    fixture.remote.set_offline(true);

    engine.save_task(task("t1", 1_000, "Draft dispatch")).unwrap();
    let tasks = engine.tasks().await.unwrap();
    engine.settle().await;

    assert_eq!(ids(&tasks), vec!["t1"]);
    assert_eq!(engine.pending_ops().task_upserts.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn saving_same_task_twice_keeps_one_record() {
    let fixture = Fixture::new();
    let engine = fixture.device();

    let mut draft = task("t1", 1_000, "First");
    engine.save_task(draft.clone()).unwrap();
    draft.title = "Second".to_string();
    engine.save_task(draft).unwrap();
    engine.settle().await;

    assert_eq!(engine.cached_tasks().len(), 1);
    assert_eq!(title_of(&engine, "t1").as_deref(), Some("Second"));
    assert_eq!(fixture.remote.task_count(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn background_write_reaches_remote_and_clears_queue() {
    let fixture = Fixture::new();
    let engine = fixture.device();

    engine.save_task(task("t1", 1_000, "Inspect site")).unwrap();
    engine.settle().await;

    assert!(fixture.remote.stored_task(&TaskId::from("t1")).is_some());
    assert!(engine.pending_ops().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_write_is_delivered_by_next_cycle() {
    let fixture = Fixture::new();
    let engine = fixture.device();
    fixture.remote.set_offline(true);

    engine.save_task(task("t1", 1_000, "Inspect site")).unwrap();
    engine.settle().await;
    assert_eq!(engine.pending_ops().len(), 1);

    fixture.remote.set_offline(false);
    let report = engine.sync_now().await.unwrap().expect("cycle ran");

    assert_eq!(report.pushed, 1);
    assert!(fixture.remote.stored_task(&TaskId::from("t1")).is_some());
    assert!(engine.pending_ops().is_empty());
    assert_eq!(engine.last_sync(), Some(NOW));
}

#[tokio::test(flavor = "multi_thread")]
async fn two_devices_converge_on_union() {
    let fixture = Fixture::new();
    let device_a = fixture.device();
    let device_b = fixture.device();

    fixture.remote.set_offline(true);
    device_a.save_task(task("t1", 1_000, "From A")).unwrap();
    device_a.settle().await;
    fixture.remote.set_offline(false);

    device_b.save_task(task("t1b", 2_000, "From B")).unwrap();
    device_b.settle().await;

    device_a.sync_now().await.unwrap();
    device_b.sync_now().await.unwrap();

    assert_eq!(ids(&device_a.cached_tasks()), vec!["t1", "t1b"]);
    assert_eq!(ids(&device_b.cached_tasks()), vec!["t1", "t1b"]);
    assert_ne!(device_a.device_id(), device_b.device_id());
}

#[tokio::test(flavor = "multi_thread")]
async fn equal_timestamps_keep_local_edit() {
    let fixture = Fixture::new();
    fixture
        .remote
        .insert_task_synced_at(task("t1", 1_000, "Y"), NOW);
    let engine = fixture.device();

    fixture.remote.set_offline(true);
    engine.save_task(task("t1", 1_000, "X")).unwrap();
    engine.settle().await;
    fixture.remote.set_offline(false);

    let report = engine.sync_now().await.unwrap().expect("cycle ran");

    assert_eq!(report.updated, 0);
    assert_eq!(title_of(&engine, "t1").as_deref(), Some("X"));
}

#[tokio::test(flavor = "multi_thread")]
async fn task_evicted_remotely_stays_local_and_is_pushed_again() {
    let fixture = Fixture::new();
    let engine = fixture.device();
    engine.save_task(task("t1", 1_000, "Quarterly audit")).unwrap();
    engine.settle().await;

    fixture.clock.advance_ms(4 * DAY_MS);
    let report = engine.sync_now().await.unwrap().expect("cycle ran");

    assert_eq!(report.pulled, 0);
    assert_eq!(report.pushed, 1);
    assert_eq!(ids(&engine.cached_tasks()), vec!["t1"]);
    assert!(fixture.remote.stored_task(&TaskId::from("t1")).is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn explicit_delete_is_not_undone_by_pull() {
    let fixture = Fixture::new();
    let engine = fixture.device();
    engine.save_task(task("t1", 1_000, "Obsolete")).unwrap();
    engine.settle().await;

    fixture.remote.set_offline(true);
    assert!(engine.delete_task(&TaskId::from("t1")).unwrap());
    engine.settle().await;
    fixture.remote.set_offline(false);

    let report = engine.sync_now().await.unwrap().expect("cycle ran");

    assert_eq!(report.deleted, 1);
    assert!(engine.cached_tasks().is_empty());
    assert!(fixture.remote.stored_task(&TaskId::from("t1")).is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn queued_delete_survives_restart() {
    let fixture = Fixture::new();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("taskdesk.db");
    fixture
        .remote
        .insert_task_synced_at(task("t1", 1_000, "Obsolete"), NOW);

    {
        let engine = fixture.device_on(
            Arc::new(SqliteStore::open(&path).unwrap()),
            settings(),
            FreshnessKey::CreatedAt,
        );
        engine.sync_now().await.unwrap();
        fixture.remote.set_offline(true);
        engine.delete_task(&TaskId::from("t1")).unwrap();
        engine.settle().await;
    }

    fixture.remote.set_offline(false);
    let engine = fixture.device_on(
        Arc::new(SqliteStore::open(&path).unwrap()),
        settings(),
        FreshnessKey::CreatedAt,
    );
    engine.sync_now().await.unwrap();

    assert!(engine.cached_tasks().is_empty());
    assert_eq!(fixture.remote.task_count(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn cold_read_excludes_rows_past_ttl() {
    let fixture = Fixture::new();
    let ttl = 3 * DAY_MS;
    fixture
        .remote
        .insert_task_synced_at(task("expired", 1, "Gone"), NOW - ttl - 1);
    fixture
        .remote
        .insert_task_synced_at(task("kept", 2, "Here"), NOW - ttl + 1);
    let engine = fixture.device();
    assert_eq!(engine.tasks_state(), CacheState::Cold);

    let tasks = engine.tasks().await.unwrap();

    assert_eq!(ids(&tasks), vec!["kept"]);
    assert_eq!(engine.tasks_state(), CacheState::Fresh);
}

#[tokio::test(flavor = "multi_thread")]
async fn cold_tasks_without_remote_are_unavailable() {
    let fixture = Fixture::new();
    let engine = fixture.device();
    fixture.remote.set_offline(true);

    let error = engine.tasks().await.unwrap_err();

    assert!(matches!(error, Error::Unavailable(_)));
}

#[tokio::test(flavor = "multi_thread")]
async fn stale_tasks_are_served_while_refreshing() {
    let fixture = Fixture::new();
    let engine = fixture.device();
    engine.sync_now().await.unwrap();
    fixture
        .remote
        .insert_task_synced_at(task("t2", 2_000, "Arrived later"), NOW);

    fixture.clock.advance(Duration::from_secs(31 * 60));
    assert_eq!(engine.tasks_state(), CacheState::Stale);
    let served = engine.tasks().await.unwrap();
    engine.settle().await;

    assert!(served.is_empty());
    assert_eq!(ids(&engine.cached_tasks()), vec!["t2"]);
    assert_eq!(engine.tasks_state(), CacheState::Fresh);
}

#[tokio::test(flavor = "multi_thread")]
async fn overlapping_cycle_is_coalesced() {
    let fixture = Fixture::new();
    fixture
        .remote
        .insert_task_synced_at(task("remote1", 1_000, "Remote"), NOW);
    let engine = fixture.device();

    let held = FlagGuard::acquire(&engine.inner.syncing).expect("flag free");

    assert_eq!(engine.sync_now().await.unwrap(), None);
    assert_eq!(engine.tasks_state(), CacheState::Cold);
    assert_eq!(fixture.remote.calls("getTasks"), 0);

    // A cold read waits for the running cycle instead of reporting no tasks
    let reader = tokio::spawn({
        let engine = engine.clone();
        async move { engine.tasks().await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!reader.is_finished());

    drop(held);
    let tasks = reader.await.unwrap().unwrap();

    assert_eq!(ids(&tasks), vec!["remote1"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn refused_user_add_does_not_block_task_sync() {
    let fixture = Fixture::new();
    fixture
        .remote
        .insert_user(User::new("dup", "Other Device", UserRole::Officer, "123123"));
    let engine = fixture.device();
    fixture.remote.set_offline(true);
    engine
        .add_user(User::new("dup", "This Device", UserRole::Officer, "123123"))
        .unwrap();
    engine.settle().await;
    fixture.remote.set_offline(false);
    fixture
        .remote
        .insert_task_synced_at(task("from_b", 2_000, "From device B"), NOW);

    let report = engine.sync_now().await.unwrap().expect("cycle ran");

    assert_eq!(report.users_flushed, 0);
    assert_eq!(ids(&engine.cached_tasks()), vec!["from_b"]);
    assert_eq!(engine.pending_ops().user_adds.len(), 1);
    assert_eq!(engine.last_sync(), Some(NOW));
}

#[tokio::test(flavor = "multi_thread")]
async fn unreachable_remote_still_fails_the_cycle() {
    let fixture = Fixture::new();
    let engine = fixture.device();
    fixture.remote.set_offline(true);
    engine
        .add_user(User::new("pvcuong", "Pham Van Cuong", UserRole::Officer, "123123"))
        .unwrap();
    engine.settle().await;

    assert!(engine.sync_now().await.is_err());
    assert_eq!(engine.last_sync(), None);
    assert_eq!(engine.pending_ops().user_adds.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn confirmed_deletes_release_their_tombstones() {
    let fixture = Fixture::new();
    let user = User::new("nvan", "Nguyen Van An", UserRole::Officer, "123123");
    fixture.remote.insert_user(user.clone());
    let engine = fixture.device();
    engine.users().await.unwrap();
    engine.save_task(task("t1", 1_000, "Obsolete")).unwrap();
    engine.settle().await;

    fixture.remote.set_offline(true);
    engine.delete_task(&TaskId::from("t1")).unwrap();
    engine.settle().await;
    assert_eq!(engine.tombstoned_tasks().len(), 1);
    fixture.remote.set_offline(false);
    engine.delete_user(&user.id).unwrap();
    engine.settle().await;

    engine.sync_now().await.unwrap().expect("cycle ran");

    assert!(engine.tombstoned_tasks().is_empty());
    assert!(engine.tombstoned_users().is_empty());
    assert!(engine.cached_tasks().is_empty());
    assert!(engine.cached_users().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn wrong_password_is_negative_result_and_cache_is_untouched() {
    let fixture = Fixture::new();
    fixture
        .remote
        .insert_user(User::new("ldthang", "Le Dinh Thang", UserRole::Manager, "secret"));
    let engine = fixture.device();
    let before = engine.users().await.unwrap();

    let result = engine.login("ldthang", "wrong").await.unwrap();

    assert!(result.is_none());
    assert_eq!(engine.cached_users(), before);
}

#[tokio::test(flavor = "multi_thread")]
async fn login_succeeds_and_returns_sealed_user() {
    let fixture = Fixture::new();
    fixture
        .remote
        .insert_user(User::new("ldthang", "Le Dinh Thang", UserRole::Manager, "secret"));
    let engine = fixture.device();

    let user = engine.login("ldthang", "secret").await.unwrap().expect("user");

    assert!(user.password.is_none());
    assert!(user.verify_password("secret"));
    assert_eq!(engine.cached_users().len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn offline_login_uses_cached_digest() {
    let fixture = Fixture::new();
    fixture
        .remote
        .insert_user(User::new("ldthang", "Le Dinh Thang", UserRole::Manager, "secret"));
    let engine = fixture.device();
    engine.refresh_users().await.unwrap();
    fixture.remote.set_offline(true);

    assert!(engine.login("ldthang", "secret").await.unwrap().is_some());
    assert!(engine.login("ldthang", "nope").await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn offline_login_before_any_cache_is_unavailable() {
    let fixture = Fixture::new();
    let engine = fixture.device();
    fixture.remote.set_offline(true);

    let error = engine.login("ldthang", "secret").await.unwrap_err();

    assert!(matches!(error, Error::Unavailable(_)));
}

#[tokio::test(flavor = "multi_thread")]
async fn cached_users_never_hold_plaintext() {
    let fixture = Fixture::new();
    fixture
        .remote
        .insert_user(User::new("ptadao", "Phan Thi Anh Dao", UserRole::Officer, "hunter2"));
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let engine = fixture.device_on(store.clone(), settings(), FreshnessKey::CreatedAt);

    engine.refresh_users().await.unwrap();

    let raw = store.read(keys::USERS).unwrap().unwrap();
    assert!(!raw.contains("hunter2"));
    assert!(raw.contains("passwordDigest"));
}

#[tokio::test(flavor = "multi_thread")]
async fn offline_user_add_survives_refresh_and_is_flushed() {
    let fixture = Fixture::new();
    let engine = fixture.device();
    let officer = User::new("nvan", "Nguyen Van An", UserRole::Officer, "123123");

    fixture.remote.set_offline(true);
    engine.add_user(officer.clone()).unwrap();
    engine.settle().await;
    fixture.remote.set_offline(false);

    let refreshed = engine.refresh_users().await.unwrap();
    assert!(refreshed.iter().any(|user| user.id == officer.id));

    let report = engine.sync_now().await.unwrap().expect("cycle ran");
    assert_eq!(report.users_flushed, 1);
    let stored = fixture.remote.stored_user(&officer.id).expect("flushed");
    assert_eq!(stored.password.as_deref(), Some("123123"));
    assert!(engine.pending_ops().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn profile_update_keeps_remote_credential() {
    let fixture = Fixture::new();
    let officer = User::new("nvan", "Nguyen Van An", UserRole::Officer, "secret");
    fixture.remote.insert_user(officer.clone());
    let engine = fixture.device();
    engine.refresh_users().await.unwrap();

    let mut renamed = engine
        .cached_users()
        .into_iter()
        .find(|user| user.id == officer.id)
        .unwrap();
    renamed.full_name = "Nguyen Van Binh".to_string();
    renamed.refresh_avatar();
    engine.update_user(renamed).unwrap();
    engine.settle().await;

    let stored = fixture.remote.stored_user(&officer.id).unwrap();
    assert_eq!(stored.full_name, "Nguyen Van Binh");
    assert_eq!(stored.password.as_deref(), Some("secret"));
    assert!(engine
        .cached_users()
        .iter()
        .any(|user| user.id == officer.id && user.verify_password("secret")));
}

#[tokio::test(flavor = "multi_thread")]
async fn deleting_user_removes_their_tasks() {
    let fixture = Fixture::new();
    let engine = fixture.device();
    let officer = User::new("nvan", "Nguyen Van An", UserRole::Officer, "123123");
    engine.add_user(officer.clone()).unwrap();
    let mut assigned = task("t1", 1_000, "Assigned");
    assigned.assignee_id = officer.id.clone();
    engine.save_task(assigned).unwrap();
    engine.save_task(task("t2", 2_000, "Unrelated")).unwrap();
    engine.settle().await;

    assert!(engine.delete_user(&officer.id).unwrap());
    engine.settle().await;

    assert_eq!(ids(&engine.cached_tasks()), vec!["t2"]);
    assert!(fixture.remote.stored_user(&officer.id).is_none());
    assert!(fixture.remote.stored_task(&TaskId::from("t1")).is_none());
    assert!(engine.pending_ops().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn stale_users_refresh_in_background() {
    let fixture = Fixture::new();
    let engine = fixture.device();
    engine.refresh_users().await.unwrap();
    fixture
        .remote
        .insert_user(User::new("nvan", "Nguyen Van An", UserRole::Officer, "123123"));

    fixture.clock.advance(Duration::from_secs(5 * 60));
    assert_eq!(engine.users_state(), CacheState::Stale);
    let served = engine.users().await.unwrap();
    engine.settle().await;

    assert!(served.is_empty());
    assert_eq!(engine.cached_users().len(), 1);
    assert_eq!(engine.users_state(), CacheState::Fresh);
}

#[tokio::test(flavor = "multi_thread")]
async fn updated_at_key_propagates_edits_between_devices() {
    let fixture = Fixture::new();
    let device_a = fixture.device();
    let device_b = fixture.device_with(settings(), FreshnessKey::UpdatedAt);
    let device_c = fixture.device();

    device_a.save_task(task("t1", 1_000, "Original")).unwrap();
    device_a.settle().await;
    device_b.sync_now().await.unwrap();
    device_c.sync_now().await.unwrap();

    let mut edited = task("t1", 1_000, "Edited");
    edited.touch(9_000);
    device_a.save_task(edited).unwrap();
    device_a.settle().await;
    device_b.sync_now().await.unwrap();
    device_c.sync_now().await.unwrap();

    assert_eq!(title_of(&device_b, "t1").as_deref(), Some("Edited"));
    assert_eq!(title_of(&device_c, "t1").as_deref(), Some("Original"));
}

#[tokio::test(flavor = "multi_thread")]
async fn full_store_evicts_tasks_past_retention() {
    let fixture = Fixture::new();
    let store = SqliteStore::open_in_memory().unwrap();
    let old: Vec<Task> = (0..5)
        .map(|index| {
            let mut old = task(&format!("old{index}"), NOW - 100 * DAY_MS, "Archived");
            old.description = "x".repeat(200);
            old
        })
        .collect();
    write_json(&store, keys::TASKS, &old).unwrap();
    let used = store.size_bytes().unwrap();
    let store = Arc::new(store.with_capacity_bytes(Some(used + 700)));
    let engine = fixture.device_on(store, settings(), FreshnessKey::CreatedAt);
    fixture.remote.set_offline(true);

    let mut fresh = task("new", NOW, "Current");
    fresh.description = "y".repeat(800);
    engine.save_task(fresh).unwrap();
    engine.settle().await;

    assert_eq!(ids(&engine.cached_tasks()), vec!["new"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn write_that_never_fits_is_dropped_without_error() {
    let fixture = Fixture::new();
    let store = Arc::new(
        SqliteStore::open_in_memory()
            .unwrap()
            .with_capacity_bytes(Some(2_048)),
    );
    let engine = fixture.device_on(store, settings(), FreshnessKey::CreatedAt);
    fixture.remote.set_offline(true);

    let mut huge = task("huge", NOW, "Scanned attachment");
    huge.description = "z".repeat(10_000);

    assert!(engine.save_task(huge).is_ok());
    engine.settle().await;
    assert!(engine.cached_tasks().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn reset_keeps_device_id() {
    let fixture = Fixture::new();
    let store: Arc<dyn LocalStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
    let engine = fixture.device_on(store.clone(), settings(), FreshnessKey::CreatedAt);
    engine.save_task(task("t1", 1_000, "Local")).unwrap();
    engine.settle().await;
    let device_id = engine.device_id().to_string();

    engine.reset_local_cache().unwrap();

    assert!(engine.cached_tasks().is_empty());
    assert_eq!(engine.tasks_state(), CacheState::Cold);
    let reopened = fixture.device_on(store, settings(), FreshnessKey::CreatedAt);
    assert_eq!(reopened.device_id(), device_id);
    assert!(device_id.starts_with("device_"));
}

#[tokio::test(flavor = "multi_thread")]
async fn reset_does_not_reuse_queue_sequences() {
    let fixture = Fixture::new();
    let engine = fixture.device();
    let id = TaskId::from("t1");
    fixture.remote.set_offline(true);
    engine.save_task(task("t1", 1_000, "Before reset")).unwrap();
    engine.settle().await;
    let old_seq = engine.pending_ops().task_upserts[&id];

    engine.reset_local_cache().unwrap();
    assert!(engine.pending_ops().is_empty());
    engine.save_task(task("t1", 2_000, "After reset")).unwrap();
    engine.settle().await;

    assert!(engine.pending_ops().task_upserts[&id] > old_seq);
}

#[tokio::test(flavor = "multi_thread")]
async fn stats_report_sync_health() {
    let fixture = Fixture::new();
    let engine = fixture.device();

    let before = engine.stats().unwrap();
    assert!(before.offline_too_long);
    assert_eq!(before.last_sync, None);
    assert_eq!(before.tasks_state, CacheState::Cold);

    engine.save_task(task("t1", 1_000, "Counted")).unwrap();
    engine.settle().await;
    engine.sync_now().await.unwrap();
    fixture.clock.advance(Duration::from_secs(60));
    let after = engine.stats().unwrap();

    assert!(!after.offline_too_long);
    assert_eq!(after.last_sync, Some(NOW));
    assert_eq!(after.next_sync_in_ms, Some(29 * 60 * 1_000));
    assert_eq!(after.cached_tasks, 1);
    assert_eq!(after.pending_ops, 0);
    assert_eq!(after.ttl_days, 3);
    assert!(after.bytes_used > 0);
    assert_eq!(after.tasks_state, CacheState::Fresh);
}

#[tokio::test(flavor = "multi_thread")]
async fn remote_stats_and_cleanup_pass_through() {
    let fixture = Fixture::new();
    fixture
        .remote
        .insert_task_synced_at(task("old", 1, "Old"), NOW - 4 * DAY_MS);
    let engine = fixture.device();

    assert_eq!(engine.remote_stats().await.unwrap().old_tasks, 1);
    assert_eq!(engine.remote_cleanup().await.unwrap(), 1);
    assert_eq!(engine.remote_stats().await.unwrap().total_tasks, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn background_scheduler_runs_due_cycles_until_stopped() {
    let fixture = Fixture::new();
    let mut fast = settings();
    fast.sync_interval = Duration::from_millis(20);
    fast.force_sync_after = Duration::ZERO;
    let engine = fixture.device_with(fast, FreshnessKey::CreatedAt);

    let scheduler = engine.start_background_sync();
    assert!(scheduler.is_running());
    tokio::time::timeout(Duration::from_secs(5), async {
        while fixture.remote.calls("getTasks") < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("scheduler ticked");
    scheduler.stop().await;

    let calls = fixture.remote.calls("getTasks");
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(fixture.remote.calls("getTasks"), calls);
}

#[tokio::test(flavor = "multi_thread")]
async fn scheduler_skips_ticks_when_nothing_is_due() {
    let fixture = Fixture::new();
    let engine = fixture.device();
    engine.sync_now().await.unwrap();

    assert!(!engine.sync_due());
    assert_eq!(engine.background_tick().await.unwrap(), None);

    fixture.remote.set_offline(true);
    engine.save_task(task("t1", 1_000, "Queued")).unwrap();
    engine.settle().await;
    assert!(engine.sync_due());
}
