//! Persistence seam between the engine and storage.
//!
//! The engine only talks to [`Store`]. [`SqliteStore`] adapts the blocking
//! [`fc_db::Database`] by serializing access behind a mutex and running each
//! call on the blocking thread pool.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use fc_core::{
    AuditEvent, EntryClose, EntryId, GeofenceRegion, RegionId, RegionPatch, RegionScope,
    TimeEntry, UserId,
};
use fc_db::{Database, DbError};

/// Default number of audit rows kept per user.
pub const DEFAULT_AUDIT_RETENTION: usize = 10_000;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The store already holds an open entry for the user.
    #[error("user {user_id} already has an open time entry")]
    OpenEntryExists { user_id: String },
    #[error(transparent)]
    Database(DbError),
    #[error("storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("storage connection lock poisoned")]
    Poisoned,
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<DbError> for StoreError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::OpenEntryExists { user_id } => Self::OpenEntryExists { user_id },
            other => Self::Database(other),
        }
    }
}

/// Storage operations the engine depends on.
#[async_trait]
pub trait Store: Send + Sync {
    /// Inserts a time entry. An open entry for a user who already has one
    /// fails with [`StoreError::OpenEntryExists`].
    async fn insert_time_entry(&self, entry: &TimeEntry) -> Result<(), StoreError>;

    /// Closes an open entry. Returns `false` if it was not open.
    async fn update_time_entry(&self, id: &EntryId, close: &EntryClose)
    -> Result<bool, StoreError>;

    async fn query_open_time_entry(&self, user_id: &UserId)
    -> Result<Option<TimeEntry>, StoreError>;

    async fn list_time_entries(
        &self,
        user_id: &UserId,
        limit: usize,
    ) -> Result<Vec<TimeEntry>, StoreError>;

    async fn list_active_regions(
        &self,
        scope: &RegionScope,
    ) -> Result<Vec<GeofenceRegion>, StoreError>;

    async fn list_regions(
        &self,
        scope: &RegionScope,
        include_inactive: bool,
    ) -> Result<Vec<GeofenceRegion>, StoreError>;

    async fn get_region(&self, id: &RegionId) -> Result<Option<GeofenceRegion>, StoreError>;

    async fn insert_region(&self, region: &GeofenceRegion) -> Result<(), StoreError>;

    async fn update_region(
        &self,
        id: &RegionId,
        patch: &RegionPatch,
        now: DateTime<Utc>,
    ) -> Result<Option<GeofenceRegion>, StoreError>;

    async fn remove_region(&self, id: &RegionId) -> Result<bool, StoreError>;

    /// Appends to the audit log.
    async fn append_event(&self, event: &AuditEvent) -> Result<(), StoreError>;

    async fn list_audit_events(
        &self,
        user_id: &UserId,
        limit: usize,
    ) -> Result<Vec<AuditEvent>, StoreError>;

    /// The most recent successfully processed Enter/Exit record.
    async fn last_transition_event(
        &self,
        user_id: &UserId,
    ) -> Result<Option<AuditEvent>, StoreError>;
}

/// [`Store`] backed by a SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    db: Arc<Mutex<Database>>,
    audit_retention: usize,
}

impl SqliteStore {
    pub fn new(db: Database, audit_retention: usize) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            audit_retention,
        }
    }

    pub fn open(path: &Path, audit_retention: usize) -> Result<Self, StoreError> {
        Ok(Self::new(Database::open(path)?, audit_retention))
    }

    pub fn open_in_memory(audit_retention: usize) -> Result<Self, StoreError> {
        Ok(Self::new(Database::open_in_memory()?, audit_retention))
    }

    async fn run<T, F>(&self, call: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Database) -> Result<T, DbError> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let mut guard = db.lock().map_err(|_| StoreError::Poisoned)?;
            call(&mut guard).map_err(StoreError::from)
        })
        .await?
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn insert_time_entry(&self, entry: &TimeEntry) -> Result<(), StoreError> {
        let entry = entry.clone();
        self.run(move |db| db.insert_time_entry(&entry)).await
    }

    async fn update_time_entry(
        &self,
        id: &EntryId,
        close: &EntryClose,
    ) -> Result<bool, StoreError> {
        let id = id.clone();
        let close = close.clone();
        self.run(move |db| db.close_time_entry(&id, &close)).await
    }

    async fn query_open_time_entry(
        &self,
        user_id: &UserId,
    ) -> Result<Option<TimeEntry>, StoreError> {
        let user_id = user_id.clone();
        self.run(move |db| db.open_time_entry(&user_id)).await
    }

    async fn list_time_entries(
        &self,
        user_id: &UserId,
        limit: usize,
    ) -> Result<Vec<TimeEntry>, StoreError> {
        let user_id = user_id.clone();
        self.run(move |db| db.list_time_entries(&user_id, limit))
            .await
    }

    async fn list_active_regions(
        &self,
        scope: &RegionScope,
    ) -> Result<Vec<GeofenceRegion>, StoreError> {
        let scope = scope.clone();
        self.run(move |db| db.list_active_regions(&scope)).await
    }

    async fn list_regions(
        &self,
        scope: &RegionScope,
        include_inactive: bool,
    ) -> Result<Vec<GeofenceRegion>, StoreError> {
        let scope = scope.clone();
        self.run(move |db| db.list_regions(&scope, include_inactive))
            .await
    }

    async fn get_region(&self, id: &RegionId) -> Result<Option<GeofenceRegion>, StoreError> {
        let id = id.clone();
        self.run(move |db| db.get_region(&id)).await
    }

    async fn insert_region(&self, region: &GeofenceRegion) -> Result<(), StoreError> {
        let region = region.clone();
        self.run(move |db| db.insert_region(&region)).await
    }

    async fn update_region(
        &self,
        id: &RegionId,
        patch: &RegionPatch,
        now: DateTime<Utc>,
    ) -> Result<Option<GeofenceRegion>, StoreError> {
        let id = id.clone();
        let patch = patch.clone();
        self.run(move |db| db.update_region(&id, &patch, now)).await
    }

    async fn remove_region(&self, id: &RegionId) -> Result<bool, StoreError> {
        let id = id.clone();
        self.run(move |db| db.remove_region(&id)).await
    }

    async fn append_event(&self, event: &AuditEvent) -> Result<(), StoreError> {
        let event = event.clone();
        let retention = self.audit_retention;
        self.run(move |db| db.append_audit_event(&event, retention).map(|_| ()))
            .await
    }

    async fn list_audit_events(
        &self,
        user_id: &UserId,
        limit: usize,
    ) -> Result<Vec<AuditEvent>, StoreError> {
        let user_id = user_id.clone();
        self.run(move |db| db.list_audit_events(&user_id, limit))
            .await
    }

    async fn last_transition_event(
        &self,
        user_id: &UserId,
    ) -> Result<Option<AuditEvent>, StoreError> {
        let user_id = user_id.clone();
        self.run(move |db| db.last_transition_event(&user_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fc_core::{ClockSource, CompanyId, Coordinate};

    fn region() -> GeofenceRegion {
        GeofenceRegion::new(
            CompanyId::new("acme").unwrap(),
            "Depot",
            Coordinate::new(0.0, 0.0).unwrap(),
            50.0,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn duplicate_open_entry_maps_to_store_error() {
        let store = SqliteStore::open_in_memory(DEFAULT_AUDIT_RETENTION).unwrap();
        let region = region();
        let user = UserId::new("worker").unwrap();
        let first = TimeEntry::open(user.clone(), &region, Utc::now(), None, ClockSource::Auto);
        let second = TimeEntry::open(user.clone(), &region, Utc::now(), None, ClockSource::Auto);

        store.insert_time_entry(&first).await.unwrap();
        let err = store.insert_time_entry(&second).await.unwrap_err();
        assert!(matches!(err, StoreError::OpenEntryExists { .. }));

        let open = store.query_open_time_entry(&user).await.unwrap().unwrap();
        assert_eq!(open.id, first.id);
    }

    #[tokio::test]
    async fn clones_share_one_database() {
        let store = SqliteStore::open_in_memory(DEFAULT_AUDIT_RETENTION).unwrap();
        let other = store.clone();
        let region = region();
        store.insert_region(&region).await.unwrap();

        let fetched = other.get_region(&region.id).await.unwrap();
        assert_eq!(fetched.map(|r| r.id), Some(region.id));
    }

    #[tokio::test]
    async fn on_disk_store_persists_across_instances() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("fc.db");
        let region = region();
        {
            let store = SqliteStore::open(&path, DEFAULT_AUDIT_RETENTION).unwrap();
            store.insert_region(&region).await.unwrap();
        }
        let store = SqliteStore::open(&path, DEFAULT_AUDIT_RETENTION).unwrap();
        let scope = RegionScope::company(CompanyId::new("acme").unwrap());
        assert_eq!(store.list_active_regions(&scope).await.unwrap().len(), 1);
    }
}
