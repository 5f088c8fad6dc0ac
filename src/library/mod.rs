//! The signed-in user's saved shows, mirrored from the remote table.
//!
//! The local list only ever holds one user's rows. It follows the remote
//! table through explicit `load` calls and through the writes made here;
//! there is no background refresh.

use crate::error::StoreError;
use crate::flight::{Flight, FlightKey, SingleFlight};
use crate::models::{NewShowRecord, ShowChanges, ShowRecord, ShowStatus};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

/// Remote storage for saved shows, keyed by (tmdb_id, user_id).
#[async_trait]
pub trait ShowTable: Send + Sync {
    async fn select_for_user(&self, user_id: &str) -> Result<Vec<ShowRecord>, StoreError>;

    /// Fails with [`StoreError::DuplicateKey`] when the user already saved the show.
    async fn insert(&self, row: &NewShowRecord) -> Result<ShowRecord, StoreError>;

    async fn update(
        &self,
        tmdb_id: i64,
        user_id: &str,
        changes: &ShowChanges,
    ) -> Result<(), StoreError>;

    async fn delete(&self, tmdb_id: i64, user_id: &str) -> Result<(), StoreError>;
}

#[derive(Debug, Clone)]
pub struct SaveShow {
    pub tmdb_id: i64,
    pub name: String,
    pub status: ShowStatus,
    pub image: Option<String>,
    pub is_favourite: bool,
}

impl SaveShow {
    pub fn new(tmdb_id: i64, name: impl Into<String>, status: ShowStatus) -> Self {
        Self {
            tmdb_id,
            name: name.into(),
            status,
            image: None,
            is_favourite: false,
        }
    }

    pub fn image(mut self, image: Option<String>) -> Self {
        self.image = image;
        self
    }

    pub fn favourite(mut self, is_favourite: bool) -> Self {
        self.is_favourite = is_favourite;
        self
    }

    fn changes(&self) -> ShowChanges {
        ShowChanges {
            status: self.status,
            name: self.name.clone(),
            image: self.image.clone(),
            is_favourite: self.is_favourite,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Inserted,
    Updated,
    /// The insert lost a race with another writer and was turned into an update.
    RecoveredConflict,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub planning: usize,
    pub watching: usize,
    pub watched: usize,
    pub dropped: usize,
}

impl StatusCounts {
    pub fn get(&self, status: ShowStatus) -> usize {
        match status {
            ShowStatus::Planning => self.planning,
            ShowStatus::Watching => self.watching,
            ShowStatus::Watched => self.watched,
            ShowStatus::Dropped => self.dropped,
        }
    }
}

#[derive(Debug, Default)]
struct Shelf {
    owner: Option<String>,
    shows: Vec<ShowRecord>,
}

impl Shelf {
    /// Makes `user_id` the owner, dropping rows that belonged to someone else.
    fn claim(&mut self, user_id: &str) {
        if self.owner.as_deref() != Some(user_id) {
            if !self.shows.is_empty() {
                debug!("Saved shows belong to another user, clearing local list");
            }
            self.shows.clear();
            self.owner = Some(user_id.to_string());
        }
    }

    fn find_mut(&mut self, tmdb_id: i64, user_id: &str) -> Option<&mut ShowRecord> {
        self.shows
            .iter_mut()
            .find(|s| s.tmdb_id == tmdb_id && s.user_id == user_id)
    }

    fn apply(&mut self, show: &SaveShow, user_id: &str) -> bool {
        match self.find_mut(show.tmdb_id, user_id) {
            Some(existing) => {
                existing.status = show.status;
                existing.is_favourite = show.is_favourite;
                existing.name = show.name.clone();
                existing.image = show.image.clone();
                true
            }
            None => false,
        }
    }
}

pub struct LibraryStore<T> {
    table: T,
    shelf: RwLock<Shelf>,
    flight: SingleFlight,
}

impl<T: ShowTable> LibraryStore<T> {
    pub fn new(table: T) -> Self {
        Self {
            table,
            shelf: RwLock::new(Shelf::default()),
            flight: SingleFlight::new(),
        }
    }

    /// A load started while another is pending is dropped, not queued.
    #[instrument(skip(self))]
    pub async fn load(&self, user_id: &str) -> Result<Flight<usize>, StoreError> {
        let Some(_guard) = self.flight.try_begin(FlightKey::LibraryLoad) else {
            debug!("Saved shows load already in flight, dropping");
            return Ok(Flight::Dropped);
        };

        let rows = self
            .table
            .select_for_user(user_id)
            .await
            .inspect_err(|e| error!("Error fetching saved shows: {}", e))?;

        let total = rows.len();
        let shows: Vec<ShowRecord> = rows.into_iter().filter(|r| r.user_id == user_id).collect();
        if shows.len() != total {
            warn!("Discarded {} rows owned by other users", total - shows.len());
        }

        let count = shows.len();
        *self.shelf.write() = Shelf {
            owner: Some(user_id.to_string()),
            shows,
        };

        info!("Fetched {} saved shows", count);
        Ok(Flight::Completed(count))
    }

    /// Saves a show for `user_id`: update when it is already in the list,
    /// otherwise insert, falling back to update if the row already exists
    /// remotely. Without a user id nothing happens.
    #[instrument(skip(self, show), fields(tmdb_id = show.tmdb_id, status = %show.status))]
    pub async fn save(&self, show: SaveShow, user_id: Option<&str>) -> Result<SaveOutcome, StoreError> {
        let Some(user_id) = user_id.filter(|u| !u.is_empty()) else {
            error!("User ID required to save show");
            return Err(StoreError::MissingIdentity);
        };

        let exists = {
            let mut shelf = self.shelf.write();
            shelf.claim(user_id);
            shelf.find_mut(show.tmdb_id, user_id).is_some()
        };

        let result = if exists {
            self.update(&show, user_id).await.map(|_| SaveOutcome::Updated)
        } else {
            self.insert(&show, user_id).await
        };

        result.inspect_err(|e| error!("Error saving show: {}", e))
    }

    async fn update(&self, show: &SaveShow, user_id: &str) -> Result<(), StoreError> {
        self.table
            .update(show.tmdb_id, user_id, &show.changes())
            .await?;

        let mut shelf = self.shelf.write();
        shelf.claim(user_id);
        if !shelf.apply(show, user_id) {
            // Removed locally while the write was in flight.
            debug!("Updated show {} is no longer in the local list", show.tmdb_id);
        }
        info!("Updated show: {} to {}", show.name, show.status);
        Ok(())
    }

    async fn insert(&self, show: &SaveShow, user_id: &str) -> Result<SaveOutcome, StoreError> {
        let row = NewShowRecord {
            tmdb_id: show.tmdb_id,
            name: show.name.clone(),
            status: show.status,
            is_favourite: show.is_favourite,
            image: show.image.clone(),
            user_id: user_id.to_string(),
            added_date: Utc::now(),
        };

        match self.table.insert(&row).await {
            Ok(saved) => {
                let mut shelf = self.shelf.write();
                shelf.claim(user_id);
                if !shelf.apply(show, user_id) {
                    shelf.shows.push(saved);
                }
                info!("Saved new show: {} as {}", show.name, show.status);
                Ok(SaveOutcome::Inserted)
            }
            Err(StoreError::DuplicateKey) => {
                debug!("Show {} already saved remotely, updating instead", show.tmdb_id);
                self.table
                    .update(show.tmdb_id, user_id, &show.changes())
                    .await?;

                let mut shelf = self.shelf.write();
                shelf.claim(user_id);
                if !shelf.apply(show, user_id) {
                    shelf.shows.push(row.into_record());
                }
                info!("Updated show (duplicate key): {} to {}", show.name, show.status);
                Ok(SaveOutcome::RecoveredConflict)
            }
            Err(e) => Err(e),
        }
    }

    /// Deletes the remote row, then the local one. Returns whether a local
    /// record was removed.
    #[instrument(skip(self))]
    pub async fn remove(&self, tmdb_id: i64, user_id: Option<&str>) -> Result<bool, StoreError> {
        let Some(user_id) = user_id.filter(|u| !u.is_empty()) else {
            error!("User ID required to remove show");
            return Err(StoreError::MissingIdentity);
        };

        self.table
            .delete(tmdb_id, user_id)
            .await
            .inspect_err(|e| error!("Error removing show: {}", e))?;

        let mut shelf = self.shelf.write();
        shelf.claim(user_id);
        let before = shelf.shows.len();
        shelf
            .shows
            .retain(|s| !(s.tmdb_id == tmdb_id && s.user_id == user_id));
        let removed = shelf.shows.len() != before;

        info!("Removed show: {}", tmdb_id);
        Ok(removed)
    }

    /// Changes the local status only; a later `save` has to write it through.
    pub fn set_status_local(&self, tmdb_id: i64, status: ShowStatus) -> bool {
        let mut shelf = self.shelf.write();
        match shelf.shows.iter_mut().find(|s| s.tmdb_id == tmdb_id) {
            Some(show) => {
                show.status = status;
                true
            }
            None => false,
        }
    }

    pub fn clear(&self) {
        *self.shelf.write() = Shelf::default();
    }

    pub fn table(&self) -> &T {
        &self.table
    }
}

impl<T> LibraryStore<T> {
    pub fn shows(&self) -> Vec<ShowRecord> {
        self.shelf.read().shows.clone()
    }

    pub fn shows_by_status(&self, status: ShowStatus) -> Vec<ShowRecord> {
        self.filtered(|s| s.status == status)
    }

    pub fn favourite_shows(&self) -> Vec<ShowRecord> {
        self.filtered(|s| s.is_favourite)
    }

    pub fn status_counts(&self) -> StatusCounts {
        let shelf = self.shelf.read();
        let mut counts = StatusCounts::default();
        for show in &shelf.shows {
            match show.status {
                ShowStatus::Planning => counts.planning += 1,
                ShowStatus::Watching => counts.watching += 1,
                ShowStatus::Watched => counts.watched += 1,
                ShowStatus::Dropped => counts.dropped += 1,
            }
        }
        counts
    }

    pub fn planning_count(&self) -> usize {
        self.status_counts().planning
    }

    pub fn watching_count(&self) -> usize {
        self.status_counts().watching
    }

    pub fn watched_count(&self) -> usize {
        self.status_counts().watched
    }

    pub fn dropped_count(&self) -> usize {
        self.status_counts().dropped
    }

    pub fn total_count(&self) -> usize {
        self.shelf.read().shows.len()
    }

    pub fn favourite_count(&self) -> usize {
        self.shelf.read().shows.iter().filter(|s| s.is_favourite).count()
    }

    pub fn status_of(&self, tmdb_id: i64) -> Option<ShowStatus> {
        self.shelf
            .read()
            .shows
            .iter()
            .find(|s| s.tmdb_id == tmdb_id)
            .map(|s| s.status)
    }

    fn filtered<F>(&self, predicate: F) -> Vec<ShowRecord>
    where
        F: Fn(&ShowRecord) -> bool,
    {
        self.shelf
            .read()
            .shows
            .iter()
            .filter(|s| predicate(s))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests;
