use super::*;
use parking_lot::Mutex;
use reqwest::StatusCode;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// In-memory `saved_shows` that enforces the (tmdb_id, user_id) key.
#[derive(Default)]
struct MemoryTable {
    rows: Mutex<Vec<ShowRecord>>,
    calls: AtomicUsize,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    /// Hold the insert reply back for a few polls after the row is stored.
    slow_insert: AtomicBool,
    /// Return every user's rows from selects, like a table without row-level security.
    leak_rows: AtomicBool,
}

impl MemoryTable {
    fn seeded(rows: Vec<ShowRecord>) -> Self {
        Self {
            rows: Mutex::new(rows),
            ..Self::default()
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn remote(&self, tmdb_id: i64, user_id: &str) -> Vec<ShowRecord> {
        self.rows
            .lock()
            .iter()
            .filter(|r| r.tmdb_id == tmdb_id && r.user_id == user_id)
            .cloned()
            .collect()
    }

    fn check_write(&self) -> Result<(), StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::RemoteWrite {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                message: "boom".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ShowTable for MemoryTable {
    async fn select_for_user(&self, user_id: &str) -> Result<Vec<ShowRecord>, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::RemoteRead {
                status: StatusCode::SERVICE_UNAVAILABLE,
                message: "unavailable".into(),
            });
        }

        let leak = self.leak_rows.load(Ordering::SeqCst);
        Ok(self
            .rows
            .lock()
            .iter()
            .filter(|r| leak || r.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn insert(&self, row: &NewShowRecord) -> Result<ShowRecord, StoreError> {
        self.check_write()?;
        let record = {
            let mut rows = self.rows.lock();
            if rows
                .iter()
                .any(|r| r.tmdb_id == row.tmdb_id && r.user_id == row.user_id)
            {
                return Err(StoreError::DuplicateKey);
            }

            let mut record = row.clone().into_record();
            record.id = Some(rows.len() as i64 + 1);
            rows.push(record.clone());
            record
        };

        if self.slow_insert.load(Ordering::SeqCst) {
            for _ in 0..3 {
                tokio::task::yield_now().await;
            }
        }
        Ok(record)
    }

    async fn update(
        &self,
        tmdb_id: i64,
        user_id: &str,
        changes: &ShowChanges,
    ) -> Result<(), StoreError> {
        self.check_write()?;
        for row in self
            .rows
            .lock()
            .iter_mut()
            .filter(|r| r.tmdb_id == tmdb_id && r.user_id == user_id)
        {
            row.status = changes.status;
            row.name = changes.name.clone();
            row.image = changes.image.clone();
            row.is_favourite = changes.is_favourite;
        }
        Ok(())
    }

    async fn delete(&self, tmdb_id: i64, user_id: &str) -> Result<(), StoreError> {
        self.check_write()?;
        self.rows
            .lock()
            .retain(|r| !(r.tmdb_id == tmdb_id && r.user_id == user_id));
        Ok(())
    }
}

fn record(tmdb_id: i64, user_id: &str, status: ShowStatus) -> ShowRecord {
    ShowRecord {
        id: None,
        tmdb_id,
        name: format!("Show {}", tmdb_id),
        status,
        is_favourite: false,
        image: None,
        added_date: "2025-01-01T00:00:00Z".parse().unwrap(),
        user_id: user_id.into(),
    }
}

#[tokio::test]
async fn saving_twice_keeps_one_record_with_latest_status() {
    let store = LibraryStore::new(MemoryTable::default());

    let first = store
        .save(SaveShow::new(1399, "Game of Thrones", ShowStatus::Planning), Some("u1"))
        .await
        .unwrap();
    let second = store
        .save(
            SaveShow::new(1399, "Game of Thrones", ShowStatus::Watching).favourite(true),
            Some("u1"),
        )
        .await
        .unwrap();

    assert_eq!(first, SaveOutcome::Inserted);
    assert_eq!(second, SaveOutcome::Updated);
    let shows = store.shows();
    assert_eq!(shows.len(), 1);
    assert_eq!(shows[0].status, ShowStatus::Watching);
    assert!(shows[0].is_favourite);
    assert_eq!(store.table().remote(1399, "u1").len(), 1);
    assert_eq!(store.table().remote(1399, "u1")[0].status, ShowStatus::Watching);
}

#[tokio::test]
async fn added_date_is_kept_across_updates() {
    let store = LibraryStore::new(MemoryTable::default());

    store
        .save(SaveShow::new(1, "One", ShowStatus::Planning), Some("u1"))
        .await
        .unwrap();
    let added = store.shows()[0].added_date;
    store
        .save(SaveShow::new(1, "One", ShowStatus::Watched), Some("u1"))
        .await
        .unwrap();

    assert_eq!(store.shows()[0].added_date, added);
}

#[tokio::test]
async fn save_without_user_touches_nothing() {
    let store = LibraryStore::new(MemoryTable::default());

    let result = store
        .save(SaveShow::new(1, "One", ShowStatus::Planning), None)
        .await;
    let blank = store
        .save(SaveShow::new(1, "One", ShowStatus::Planning), Some(""))
        .await;

    assert!(matches!(result, Err(StoreError::MissingIdentity)));
    assert!(matches!(blank, Err(StoreError::MissingIdentity)));
    assert_eq!(store.total_count(), 0);
    assert_eq!(store.table().calls(), 0);
}

#[tokio::test]
async fn insert_race_falls_back_to_update() {
    // Another tab saved the show after our last load.
    let table = MemoryTable::seeded(vec![record(42, "u1", ShowStatus::Planning)]);
    let store = LibraryStore::new(table);

    let outcome = store
        .save(SaveShow::new(42, "Show 42", ShowStatus::Watched), Some("u1"))
        .await
        .unwrap();

    assert_eq!(outcome, SaveOutcome::RecoveredConflict);
    assert_eq!(store.total_count(), 1);
    assert_eq!(store.status_of(42), Some(ShowStatus::Watched));
    assert_eq!(store.table().remote(42, "u1")[0].status, ShowStatus::Watched);
}

#[tokio::test]
async fn failed_write_leaves_local_list_alone() {
    let store = LibraryStore::new(MemoryTable::default());
    store
        .save(SaveShow::new(1, "One", ShowStatus::Planning), Some("u1"))
        .await
        .unwrap();
    store.table().fail_writes.store(true, Ordering::SeqCst);

    let update = store
        .save(SaveShow::new(1, "One", ShowStatus::Dropped), Some("u1"))
        .await;
    let insert = store
        .save(SaveShow::new(2, "Two", ShowStatus::Planning), Some("u1"))
        .await;
    let remove = store.remove(1, Some("u1")).await;

    assert!(matches!(update, Err(StoreError::RemoteWrite { .. })));
    assert!(matches!(insert, Err(StoreError::RemoteWrite { .. })));
    assert!(remove.is_err());
    assert_eq!(store.total_count(), 1);
    assert_eq!(store.status_of(1), Some(ShowStatus::Planning));
}

#[tokio::test]
async fn removing_unknown_show_changes_nothing() {
    let store = LibraryStore::new(MemoryTable::default());
    store
        .save(SaveShow::new(1, "One", ShowStatus::Planning), Some("u1"))
        .await
        .unwrap();

    let removed = store.remove(999, Some("u1")).await.unwrap();

    assert!(!removed);
    assert_eq!(store.total_count(), 1);
    assert!(matches!(
        store.remove(1, None).await,
        Err(StoreError::MissingIdentity)
    ));
}

#[tokio::test]
async fn remove_deletes_remote_and_local() {
    let store = LibraryStore::new(MemoryTable::default());
    store
        .save(SaveShow::new(1, "One", ShowStatus::Planning), Some("u1"))
        .await
        .unwrap();

    assert!(store.remove(1, Some("u1")).await.unwrap());
    assert_eq!(store.total_count(), 0);
    assert!(store.table().remote(1, "u1").is_empty());
    assert_eq!(store.status_of(1), None);
}

#[tokio::test]
async fn load_is_scoped_to_one_user() {
    let table = MemoryTable::seeded(vec![
        record(1, "u1", ShowStatus::Planning),
        record(2, "u1", ShowStatus::Watching),
        record(3, "u3", ShowStatus::Planning),
    ]);
    table.leak_rows.store(true, Ordering::SeqCst);
    let store = LibraryStore::new(table);

    assert_eq!(store.load("u1").await.unwrap(), Flight::Completed(2));

    assert_eq!(store.planning_count(), 1);
    assert_eq!(store.watching_count(), 1);
    assert_eq!(store.total_count(), 2);
    assert!(store.shows().iter().all(|s| s.user_id == "u1"));
    assert_eq!(store.shelf.read().owner.as_deref(), Some("u1"));
}

#[tokio::test]
async fn failed_load_keeps_current_list() {
    let store = LibraryStore::new(MemoryTable::seeded(vec![
        record(1, "u1", ShowStatus::Planning),
        record(2, "u1", ShowStatus::Watched),
    ]));
    store.load("u1").await.unwrap();
    store.table().fail_reads.store(true, Ordering::SeqCst);

    let result = store.load("u1").await;

    assert!(matches!(result, Err(StoreError::RemoteRead { .. })));
    assert_eq!(store.total_count(), 2);
    assert_eq!(store.status_of(2), Some(ShowStatus::Watched));

    store.table().fail_reads.store(false, Ordering::SeqCst);
    assert_eq!(store.load("u1").await.unwrap(), Flight::Completed(2));
}

#[tokio::test]
async fn repeated_loads_replace_the_list() {
    let store = LibraryStore::new(MemoryTable::seeded(vec![record(1, "u1", ShowStatus::Planning)]));

    store.load("u1").await.unwrap();
    store.set_status_local(1, ShowStatus::Dropped);
    store.load("u1").await.unwrap();

    assert_eq!(store.total_count(), 1);
    assert_eq!(store.status_of(1), Some(ShowStatus::Planning));
}

#[tokio::test]
async fn overlapping_load_is_dropped() {
    let store = LibraryStore::new(MemoryTable::seeded(vec![record(1, "u1", ShowStatus::Planning)]));

    let (first, second) = tokio::join!(store.load("u1"), store.load("u1"));

    assert_eq!(first.unwrap(), Flight::Completed(1));
    assert!(second.unwrap().is_dropped());
    assert_eq!(store.table().calls(), 1);
}

#[tokio::test]
async fn saving_for_another_user_drops_previous_users_rows() {
    let store = LibraryStore::new(MemoryTable::seeded(vec![record(1, "u1", ShowStatus::Planning)]));
    store.load("u1").await.unwrap();

    store
        .save(SaveShow::new(2, "Two", ShowStatus::Watching), Some("u2"))
        .await
        .unwrap();

    assert_eq!(store.total_count(), 1);
    assert_eq!(store.shows()[0].user_id, "u2");
    assert_eq!(store.shelf.read().owner.as_deref(), Some("u2"));
}

#[tokio::test]
async fn removing_for_another_user_drops_previous_users_rows() {
    let store = LibraryStore::new(MemoryTable::seeded(vec![
        record(1, "u1", ShowStatus::Planning),
        record(5, "u1", ShowStatus::Watching),
    ]));
    store.load("u1").await.unwrap();

    let removed = store.remove(5, Some("u2")).await.unwrap();

    assert!(!removed);
    assert_eq!(store.total_count(), 0);
    assert_eq!(store.shelf.read().owner.as_deref(), Some("u2"));
    assert_eq!(store.table().remote(5, "u1").len(), 1);
}

#[tokio::test]
async fn record_loaded_during_insert_is_updated_not_duplicated() {
    let table = MemoryTable::default();
    table.slow_insert.store(true, Ordering::SeqCst);
    let store = LibraryStore::new(table);

    let (saved, loaded) = tokio::join!(
        store.save(SaveShow::new(7, "Seven", ShowStatus::Watching), Some("u1")),
        store.load("u1"),
    );

    assert_eq!(saved.unwrap(), SaveOutcome::Inserted);
    assert_eq!(loaded.unwrap(), Flight::Completed(1));
    assert_eq!(store.total_count(), 1);
    assert_eq!(store.status_of(7), Some(ShowStatus::Watching));
}

#[tokio::test]
async fn local_status_change_is_not_written_through() {
    let store = LibraryStore::new(MemoryTable::default());
    store
        .save(SaveShow::new(1, "One", ShowStatus::Planning), Some("u1"))
        .await
        .unwrap();
    let calls = store.table().calls();

    assert!(store.set_status_local(1, ShowStatus::Watched));
    assert!(!store.set_status_local(2, ShowStatus::Watched));

    assert_eq!(store.table().calls(), calls);
    assert_eq!(store.status_of(1), Some(ShowStatus::Watched));
    assert_eq!(store.table().remote(1, "u1")[0].status, ShowStatus::Planning);
}

#[tokio::test]
async fn derived_views_follow_local_state() {
    let store = LibraryStore::new(MemoryTable::default());
    for (id, status, fav) in [
        (1, ShowStatus::Planning, true),
        (2, ShowStatus::Planning, false),
        (3, ShowStatus::Watched, true),
        (4, ShowStatus::Dropped, false),
    ] {
        store
            .save(SaveShow::new(id, format!("Show {}", id), status).favourite(fav), Some("u1"))
            .await
            .unwrap();
    }

    let counts = store.status_counts();
    assert_eq!(
        counts,
        StatusCounts {
            planning: 2,
            watching: 0,
            watched: 1,
            dropped: 1
        }
    );
    assert_eq!(counts.get(ShowStatus::Dropped), store.dropped_count());
    assert_eq!(store.watched_count(), 1);
    assert_eq!(store.favourite_count(), 2);
    assert_eq!(store.favourite_shows().len(), 2);
    assert_eq!(store.shows_by_status(ShowStatus::Planning).len(), 2);
    assert_eq!(store.status_of(3), Some(ShowStatus::Watched));
    assert_eq!(store.status_of(99), None);

    store.clear();
    assert_eq!(store.total_count(), 0);
    assert_eq!(store.shelf.read().owner, None);
}
