//! Test doubles shared by the engine's unit tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;

use fc_core::geo::METERS_PER_DEGREE;
use fc_core::{
    AuditEvent, CompanyId, Coordinate, EntryClose, EntryId, GeofenceRegion, LocationSample,
    RegionId, RegionPatch, RegionScope, TimeEntry, UserId,
};

use crate::notify::{Notifier, NotifyError};
use crate::store::{DEFAULT_AUDIT_RETENTION, SqliteStore, Store, StoreError};

pub fn acme() -> CompanyId {
    CompanyId::new("acme").unwrap()
}

/// A region centered on (0, 0) named after its id.
pub fn region_at(id: &str, radius_m: f64) -> GeofenceRegion {
    let mut region =
        GeofenceRegion::new(acme(), id, Coordinate::new(0.0, 0.0).unwrap(), radius_m).unwrap();
    region.id = RegionId::new(id).unwrap();
    region
}

pub fn base_time() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2025-01-06T08:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

/// A sample `meters` due north of (0, 0) with 10 m accuracy.
pub fn sample_north(meters: f64, seconds: i64) -> LocationSample {
    LocationSample::new(
        base_time() + chrono::Duration::seconds(seconds),
        meters / METERS_PER_DEGREE,
        0.0,
        10.0,
    )
    .unwrap()
}

/// Wraps a real store and injects failures on demand.
pub struct FlakyStore {
    inner: SqliteStore,
    fail_writes: AtomicBool,
    fail_inserts: AtomicBool,
    fail_audit: AtomicBool,
    hide_open: AtomicBool,
    write_delay: Mutex<Option<Duration>>,
    commit_delay: Mutex<Option<Duration>>,
}

impl FlakyStore {
    pub fn in_memory() -> Self {
        Self {
            inner: SqliteStore::open_in_memory(DEFAULT_AUDIT_RETENTION).unwrap(),
            fail_writes: AtomicBool::new(false),
            fail_inserts: AtomicBool::new(false),
            fail_audit: AtomicBool::new(false),
            hide_open: AtomicBool::new(false),
            write_delay: Mutex::new(None),
            commit_delay: Mutex::new(None),
        }
    }

    /// Time entry inserts and updates fail.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Only time entry inserts fail; closes still succeed.
    pub fn fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_audit(&self, fail: bool) {
        self.fail_audit.store(fail, Ordering::SeqCst);
    }

    /// Open-entry queries report nothing, as if another process had not yet
    /// committed.
    pub fn hide_open_entries(&self, hide: bool) {
        self.hide_open.store(hide, Ordering::SeqCst);
    }

    pub fn delay_writes(&self, delay: Option<Duration>) {
        *self.write_delay.lock().unwrap() = delay;
    }

    /// Time entry writes commit, then take `delay` to report back.
    pub fn delay_commits(&self, delay: Option<Duration>) {
        *self.commit_delay.lock().unwrap() = delay;
    }

    async fn after_write(&self) {
        let delay = *self.commit_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    async fn before_write(&self) -> Result<(), StoreError> {
        let delay = *self.write_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected write failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Store for FlakyStore {
    async fn insert_time_entry(&self, entry: &TimeEntry) -> Result<(), StoreError> {
        self.before_write().await?;
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected insert failure".to_string()));
        }
        let result = self.inner.insert_time_entry(entry).await;
        self.after_write().await;
        result
    }

    async fn update_time_entry(
        &self,
        id: &EntryId,
        close: &EntryClose,
    ) -> Result<bool, StoreError> {
        self.before_write().await?;
        let result = self.inner.update_time_entry(id, close).await;
        self.after_write().await;
        result
    }

    async fn query_open_time_entry(
        &self,
        user_id: &UserId,
    ) -> Result<Option<TimeEntry>, StoreError> {
        if self.hide_open.load(Ordering::SeqCst) {
            return Ok(None);
        }
        self.inner.query_open_time_entry(user_id).await
    }

    async fn list_time_entries(
        &self,
        user_id: &UserId,
        limit: usize,
    ) -> Result<Vec<TimeEntry>, StoreError> {
        self.inner.list_time_entries(user_id, limit).await
    }

    async fn list_active_regions(
        &self,
        scope: &RegionScope,
    ) -> Result<Vec<GeofenceRegion>, StoreError> {
        self.inner.list_active_regions(scope).await
    }

    async fn list_regions(
        &self,
        scope: &RegionScope,
        include_inactive: bool,
    ) -> Result<Vec<GeofenceRegion>, StoreError> {
        self.inner.list_regions(scope, include_inactive).await
    }

    async fn get_region(&self, id: &RegionId) -> Result<Option<GeofenceRegion>, StoreError> {
        self.inner.get_region(id).await
    }

    async fn insert_region(&self, region: &GeofenceRegion) -> Result<(), StoreError> {
        self.inner.insert_region(region).await
    }

    async fn update_region(
        &self,
        id: &RegionId,
        patch: &RegionPatch,
        now: DateTime<Utc>,
    ) -> Result<Option<GeofenceRegion>, StoreError> {
        self.inner.update_region(id, patch, now).await
    }

    async fn remove_region(&self, id: &RegionId) -> Result<bool, StoreError> {
        self.inner.remove_region(id).await
    }

    async fn append_event(&self, event: &AuditEvent) -> Result<(), StoreError> {
        if self.fail_audit.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected audit failure".to_string()));
        }
        self.inner.append_event(event).await
    }

    async fn list_audit_events(
        &self,
        user_id: &UserId,
        limit: usize,
    ) -> Result<Vec<AuditEvent>, StoreError> {
        self.inner.list_audit_events(user_id, limit).await
    }

    async fn last_transition_event(
        &self,
        user_id: &UserId,
    ) -> Result<Option<AuditEvent>, StoreError> {
        self.inner.last_transition_event(user_id).await
    }
}

/// Captures notifications for assertions.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<(String, String)>>>,
    signal: Arc<Notify>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    /// Waits until at least `count` notifications arrived.
    pub async fn wait_for(&self, count: usize) -> Vec<(String, String)> {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let notified = self.signal.notified();
                let sent = self.sent();
                if sent.len() >= count {
                    return sent;
                }
                notified.await;
            }
        })
        .await
        .expect("notifications not delivered")
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, title: &str, message: &str) -> Result<(), NotifyError> {
        self.sent
            .lock()
            .unwrap()
            .push((title.to_string(), message.to_string()));
        self.signal.notify_waiters();
        Ok(())
    }
}
