//! Storage layer for geofenced time tracking.
//!
//! Provides persistence for geofence regions, time entries and the audit log
//! using `rusqlite`.
//!
//! # Thread Safety
//!
//! The [`Database`] type wraps a `rusqlite::Connection`, which is `Send` but not `Sync`.
//! This means a `Database` instance can be moved between threads but cannot be shared
//! across threads without external synchronization. The engine serializes access
//! through a `Mutex<Database>` and drives it from blocking tasks.
//!
//! # Schema
//!
//! ## Timestamp Format
//!
//! Timestamps are stored as TEXT in RFC 3339 format with millisecond precision
//! (e.g., `2024-01-15T10:30:00.000Z`). This ensures:
//! - Lexicographic ordering matches chronological ordering
//! - Human-readable values in the database
//! - Timezone-aware (always UTC)
//!
//! ## Open Entry Invariant
//!
//! A partial unique index on `time_entries(user_id) WHERE clock_out_time IS NULL`
//! guarantees at most one open entry per user even when several processes
//! write to the same file. A violating insert surfaces as
//! [`DbError::OpenEntryExists`].
//!
//! ## Audit Retention
//!
//! Audit rows carry an autoincrement `seq` that defines append order. Each
//! append prunes the user's oldest rows beyond the configured retention.

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, params};
use thiserror::Error;

use fc_core::{
    AuditEvent, AuditEventId, AuditKind, AuditOutcome, ClockSource, CompanyId, Coordinate,
    EntryClose, EntryId, GeofenceRegion, LocationSample, ProjectId, RegionId, RegionPatch,
    RegionScope, TimeEntry, UserId, ValidationError,
};

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// An error from the underlying database.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// A stored or incoming value failed domain validation.
    #[error("invalid value: {0}")]
    Validation(#[from] ValidationError),
    /// Failed to parse a stored timestamp.
    #[error("invalid timestamp for {record}: {timestamp}")]
    TimestampParse {
        record: String,
        timestamp: String,
        #[source]
        source: chrono::ParseError,
    },
    /// The user already has an open time entry.
    #[error("user {user_id} already has an open time entry")]
    OpenEntryExists { user_id: String },
}

/// Database connection wrapper.
///
/// See the [module documentation](self) for thread safety considerations.
pub struct Database {
    conn: Connection,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.conn.path())
            .finish()
    }
}

impl Database {
    /// Opens a database at the given path, creating it if necessary.
    ///
    /// The database schema is automatically initialized on first open.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Opens an in-memory database.
    ///
    /// Useful for testing. The database is destroyed when the connection closes.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Initializes the database schema.
    ///
    /// This is idempotent - safe to call on an already-initialized database.
    fn init(&self) -> Result<(), DbError> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")?;
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS regions (
                id TEXT PRIMARY KEY,
                company_id TEXT NOT NULL,
                name TEXT NOT NULL,
                center_lat REAL NOT NULL,
                center_lon REAL NOT NULL,
                radius_m REAL NOT NULL CHECK (radius_m > 0),
                project_id TEXT,
                auto_clock_in INTEGER NOT NULL DEFAULT 1,
                auto_clock_out INTEGER NOT NULL DEFAULT 1,
                entry_alert INTEGER NOT NULL DEFAULT 0,
                exit_alert INTEGER NOT NULL DEFAULT 0,
                active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_regions_company ON regions(company_id, active);

            -- Time entries are never deleted, only closed or flagged.
            CREATE TABLE IF NOT EXISTS time_entries (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                region_id TEXT NOT NULL,
                project_id TEXT,
                clock_in_time TEXT NOT NULL,
                clock_in_lat REAL,
                clock_in_lon REAL,
                clock_in_source TEXT NOT NULL,
                clock_out_time TEXT,
                clock_out_lat REAL,
                clock_out_lon REAL,
                clock_out_source TEXT,
                total_hours REAL,
                needs_review INTEGER NOT NULL DEFAULT 0
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_time_entries_one_open
                ON time_entries(user_id) WHERE clock_out_time IS NULL;
            CREATE INDEX IF NOT EXISTS idx_time_entries_user
                ON time_entries(user_id, clock_in_time);

            -- Append-only audit log; seq defines append order.
            CREATE TABLE IF NOT EXISTS audit_events (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                user_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                region_id TEXT,
                timestamp TEXT NOT NULL,
                lat REAL,
                lon REAL,
                accuracy_m REAL,
                outcome TEXT NOT NULL,
                entry_id TEXT,
                detail TEXT,
                recorded_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_audit_events_user ON audit_events(user_id, seq);
            ",
        )?;
        Ok(())
    }

    // ========== Regions ==========

    /// Inserts a new region.
    pub fn insert_region(&self, region: &GeofenceRegion) -> Result<(), DbError> {
        region.validate()?;
        self.conn.execute(
            "
            INSERT INTO regions
            (id, company_id, name, center_lat, center_lon, radius_m, project_id,
             auto_clock_in, auto_clock_out, entry_alert, exit_alert, active, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
            params![
                region.id.as_str(),
                region.company_id.as_str(),
                region.name,
                region.center.lat,
                region.center.lon,
                region.radius_m,
                region.project_id.as_ref().map(ProjectId::as_str),
                region.auto_clock_in,
                region.auto_clock_out,
                region.entry_alert,
                region.exit_alert,
                region.active,
                format_timestamp(region.created_at),
                format_timestamp(region.updated_at),
            ],
        )?;
        Ok(())
    }

    /// Fetches a region by ID, active or not.
    pub fn get_region(&self, id: &RegionId) -> Result<Option<GeofenceRegion>, DbError> {
        fetch_region(&self.conn, id)
    }

    /// Applies a patch to a region inside a transaction.
    ///
    /// Returns the updated region, or `None` if no region has that ID.
    pub fn update_region(
        &mut self,
        id: &RegionId,
        patch: &RegionPatch,
        now: DateTime<Utc>,
    ) -> Result<Option<GeofenceRegion>, DbError> {
        let tx = self.conn.transaction()?;
        let Some(mut region) = fetch_region(&tx, id)? else {
            return Ok(None);
        };
        region.apply(patch, now)?;
        tx.execute(
            "
            UPDATE regions SET
                name = ?, center_lat = ?, center_lon = ?, radius_m = ?, project_id = ?,
                auto_clock_in = ?, auto_clock_out = ?, entry_alert = ?, exit_alert = ?,
                active = ?, updated_at = ?
            WHERE id = ?
            ",
            params![
                region.name,
                region.center.lat,
                region.center.lon,
                region.radius_m,
                region.project_id.as_ref().map(ProjectId::as_str),
                region.auto_clock_in,
                region.auto_clock_out,
                region.entry_alert,
                region.exit_alert,
                region.active,
                format_timestamp(region.updated_at),
                region.id.as_str(),
            ],
        )?;
        tx.commit()?;
        Ok(Some(region))
    }

    /// Deletes a region definition. Time entries referencing it are kept.
    ///
    /// Returns `true` if a region was removed.
    pub fn remove_region(&self, id: &RegionId) -> Result<bool, DbError> {
        let removed = self
            .conn
            .execute("DELETE FROM regions WHERE id = ?", [id.as_str()])?;
        Ok(removed > 0)
    }

    /// Lists regions in a scope ordered by name then ID.
    pub fn list_regions(
        &self,
        scope: &RegionScope,
        include_inactive: bool,
    ) -> Result<Vec<GeofenceRegion>, DbError> {
        let mut stmt = self.conn.prepare(&format!(
            "
            SELECT {REGION_COLUMNS}
            FROM regions
            WHERE company_id = ?1
              AND (?2 IS NULL OR project_id = ?2)
              AND (?3 OR active = 1)
            ORDER BY name ASC, id ASC
            "
        ))?;
        let rows = stmt.query_map(
            params![
                scope.company_id.as_str(),
                scope.project_id.as_ref().map(ProjectId::as_str),
                include_inactive,
            ],
            RegionRow::read,
        )?;
        let mut regions = Vec::new();
        for row in rows {
            regions.push(row?.into_region()?);
        }
        Ok(regions)
    }

    /// Lists active regions in a scope ordered by name then ID.
    pub fn list_active_regions(&self, scope: &RegionScope) -> Result<Vec<GeofenceRegion>, DbError> {
        self.list_regions(scope, false)
    }

    // ========== Time entries ==========

    /// Inserts a new time entry.
    ///
    /// Fails with [`DbError::OpenEntryExists`] if the entry is open and the
    /// user already has an open entry.
    pub fn insert_time_entry(&self, entry: &TimeEntry) -> Result<(), DbError> {
        let result = self.conn.execute(
            "
            INSERT INTO time_entries
            (id, user_id, region_id, project_id, clock_in_time, clock_in_lat, clock_in_lon,
             clock_in_source, clock_out_time, clock_out_lat, clock_out_lon, clock_out_source,
             total_hours, needs_review)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
            params![
                entry.id.as_str(),
                entry.user_id.as_str(),
                entry.region_id.as_str(),
                entry.project_id.as_ref().map(ProjectId::as_str),
                format_timestamp(entry.clock_in_time),
                entry.clock_in_location.map(|c| c.lat),
                entry.clock_in_location.map(|c| c.lon),
                entry.clock_in_source.as_str(),
                entry.clock_out_time.map(format_timestamp),
                entry.clock_out_location.map(|c| c.lat),
                entry.clock_out_location.map(|c| c.lon),
                entry.clock_out_source.map(|s| s.as_str()),
                entry.total_hours,
                entry.needs_review,
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation && entry.is_open() =>
            {
                Err(DbError::OpenEntryExists {
                    user_id: entry.user_id.to_string(),
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Closes an open time entry.
    ///
    /// Returns `false` if the entry does not exist or is already closed.
    pub fn close_time_entry(&self, id: &EntryId, close: &EntryClose) -> Result<bool, DbError> {
        let updated = self.conn.execute(
            "
            UPDATE time_entries SET
                clock_out_time = ?, clock_out_lat = ?, clock_out_lon = ?, clock_out_source = ?,
                total_hours = ?, needs_review = ?
            WHERE id = ? AND clock_out_time IS NULL
            ",
            params![
                format_timestamp(close.clock_out_time),
                close.clock_out_location.map(|c| c.lat),
                close.clock_out_location.map(|c| c.lon),
                close.clock_out_source.as_str(),
                close.total_hours,
                close.needs_review,
                id.as_str(),
            ],
        )?;
        Ok(updated > 0)
    }

    /// Returns the user's open time entry, if any.
    pub fn open_time_entry(&self, user_id: &UserId) -> Result<Option<TimeEntry>, DbError> {
        let row = self
            .conn
            .query_row(
                &format!(
                    "SELECT {ENTRY_COLUMNS} FROM time_entries
                     WHERE user_id = ? AND clock_out_time IS NULL"
                ),
                [user_id.as_str()],
                EntryRow::read,
            )
            .optional()?;
        row.map(EntryRow::into_entry).transpose()
    }

    /// Fetches a time entry by ID.
    pub fn get_time_entry(&self, id: &EntryId) -> Result<Option<TimeEntry>, DbError> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {ENTRY_COLUMNS} FROM time_entries WHERE id = ?"),
                [id.as_str()],
                EntryRow::read,
            )
            .optional()?;
        row.map(EntryRow::into_entry).transpose()
    }

    /// Lists a user's time entries, most recent clock-in first.
    pub fn list_time_entries(
        &self,
        user_id: &UserId,
        limit: usize,
    ) -> Result<Vec<TimeEntry>, DbError> {
        let mut stmt = self.conn.prepare(&format!(
            "
            SELECT {ENTRY_COLUMNS}
            FROM time_entries
            WHERE user_id = ?
            ORDER BY clock_in_time DESC, id DESC
            LIMIT ?
            "
        ))?;
        let rows = stmt.query_map(params![user_id.as_str(), sql_limit(limit)], EntryRow::read)?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?.into_entry()?);
        }
        Ok(entries)
    }

    // ========== Audit log ==========

    /// Appends an audit event and prunes the user's oldest rows beyond
    /// `retention`. A retention of 0 disables pruning.
    ///
    /// Returns the number of pruned rows.
    pub fn append_audit_event(
        &mut self,
        event: &AuditEvent,
        retention: usize,
    ) -> Result<usize, DbError> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "
            INSERT INTO audit_events
            (id, user_id, kind, region_id, timestamp, lat, lon, accuracy_m, outcome, entry_id,
             detail, recorded_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
            params![
                event.id.as_str(),
                event.user_id.as_str(),
                event.kind.as_str(),
                event.region_id.as_ref().map(RegionId::as_str),
                format_timestamp(event.timestamp),
                event.sample.map(|s| s.position.lat),
                event.sample.map(|s| s.position.lon),
                event.sample.map(|s| s.accuracy_m),
                event.outcome.as_str(),
                event.entry_id.as_ref().map(EntryId::as_str),
                event.detail,
                format_timestamp(event.recorded_at),
            ],
        )?;
        let pruned = if retention == 0 {
            0
        } else {
            tx.execute(
                "
                DELETE FROM audit_events
                WHERE user_id = ?1
                  AND seq <= (
                      SELECT seq FROM audit_events
                      WHERE user_id = ?1
                      ORDER BY seq DESC
                      LIMIT 1 OFFSET ?2
                  )
                ",
                params![event.user_id.as_str(), sql_limit(retention)],
            )?
        };
        tx.commit()?;
        if pruned > 0 {
            tracing::debug!(user_id = %event.user_id, pruned, "pruned audit events");
        }
        Ok(pruned)
    }

    /// Lists a user's audit events, most recent first.
    pub fn list_audit_events(
        &self,
        user_id: &UserId,
        limit: usize,
    ) -> Result<Vec<AuditEvent>, DbError> {
        let mut stmt = self.conn.prepare(&format!(
            "
            SELECT {AUDIT_COLUMNS}
            FROM audit_events
            WHERE user_id = ?
            ORDER BY seq DESC
            LIMIT ?
            "
        ))?;
        let rows = stmt.query_map(params![user_id.as_str(), sql_limit(limit)], AuditRow::read)?;
        let mut events = Vec::new();
        for row in rows {
            events.push(row?.into_event()?);
        }
        Ok(events)
    }

    /// Returns the most recent successfully processed Enter/Exit record.
    pub fn last_transition_event(&self, user_id: &UserId) -> Result<Option<AuditEvent>, DbError> {
        let row = self
            .conn
            .query_row(
                &format!(
                    "
                    SELECT {AUDIT_COLUMNS}
                    FROM audit_events
                    WHERE user_id = ? AND kind IN ('enter', 'exit') AND outcome != 'failed'
                    ORDER BY seq DESC
                    LIMIT 1
                    "
                ),
                [user_id.as_str()],
                AuditRow::read,
            )
            .optional()?;
        row.map(AuditRow::into_event).transpose()
    }
}

const REGION_COLUMNS: &str = "id, company_id, name, center_lat, center_lon, radius_m, project_id, \
    auto_clock_in, auto_clock_out, entry_alert, exit_alert, active, created_at, updated_at";

const ENTRY_COLUMNS: &str = "id, user_id, region_id, project_id, clock_in_time, clock_in_lat, \
    clock_in_lon, clock_in_source, clock_out_time, clock_out_lat, clock_out_lon, clock_out_source, \
    total_hours, needs_review";

const AUDIT_COLUMNS: &str = "id, user_id, kind, region_id, timestamp, lat, lon, accuracy_m, \
    outcome, entry_id, detail, recorded_at";

fn fetch_region(conn: &Connection, id: &RegionId) -> Result<Option<GeofenceRegion>, DbError> {
    let row = conn
        .query_row(
            &format!("SELECT {REGION_COLUMNS} FROM regions WHERE id = ?"),
            [id.as_str()],
            RegionRow::read,
        )
        .optional()?;
    row.map(RegionRow::into_region).transpose()
}

/// Raw `regions` row before domain validation.
struct RegionRow {
    id: String,
    company_id: String,
    name: String,
    center_lat: f64,
    center_lon: f64,
    radius_m: f64,
    project_id: Option<String>,
    auto_clock_in: bool,
    auto_clock_out: bool,
    entry_alert: bool,
    exit_alert: bool,
    active: bool,
    created_at: String,
    updated_at: String,
}

impl RegionRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            company_id: row.get(1)?,
            name: row.get(2)?,
            center_lat: row.get(3)?,
            center_lon: row.get(4)?,
            radius_m: row.get(5)?,
            project_id: row.get(6)?,
            auto_clock_in: row.get(7)?,
            auto_clock_out: row.get(8)?,
            entry_alert: row.get(9)?,
            exit_alert: row.get(10)?,
            active: row.get(11)?,
            created_at: row.get(12)?,
            updated_at: row.get(13)?,
        })
    }

    fn into_region(self) -> Result<GeofenceRegion, DbError> {
        let record = format!("region {}", self.id);
        let region = GeofenceRegion {
            created_at: parse_timestamp(&self.created_at, &record)?,
            updated_at: parse_timestamp(&self.updated_at, &record)?,
            id: RegionId::new(self.id)?,
            company_id: CompanyId::new(self.company_id)?,
            name: self.name,
            center: Coordinate::new(self.center_lat, self.center_lon)?,
            radius_m: self.radius_m,
            project_id: self.project_id.map(ProjectId::new).transpose()?,
            auto_clock_in: self.auto_clock_in,
            auto_clock_out: self.auto_clock_out,
            entry_alert: self.entry_alert,
            exit_alert: self.exit_alert,
            active: self.active,
        };
        region.validate()?;
        Ok(region)
    }
}

/// Raw `time_entries` row before domain validation.
struct EntryRow {
    id: String,
    user_id: String,
    region_id: String,
    project_id: Option<String>,
    clock_in_time: String,
    clock_in_lat: Option<f64>,
    clock_in_lon: Option<f64>,
    clock_in_source: String,
    clock_out_time: Option<String>,
    clock_out_lat: Option<f64>,
    clock_out_lon: Option<f64>,
    clock_out_source: Option<String>,
    total_hours: Option<f64>,
    needs_review: bool,
}

impl EntryRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            region_id: row.get(2)?,
            project_id: row.get(3)?,
            clock_in_time: row.get(4)?,
            clock_in_lat: row.get(5)?,
            clock_in_lon: row.get(6)?,
            clock_in_source: row.get(7)?,
            clock_out_time: row.get(8)?,
            clock_out_lat: row.get(9)?,
            clock_out_lon: row.get(10)?,
            clock_out_source: row.get(11)?,
            total_hours: row.get(12)?,
            needs_review: row.get(13)?,
        })
    }

    fn into_entry(self) -> Result<TimeEntry, DbError> {
        let record = format!("time entry {}", self.id);
        Ok(TimeEntry {
            clock_in_time: parse_timestamp(&self.clock_in_time, &record)?,
            clock_out_time: self
                .clock_out_time
                .as_deref()
                .map(|ts| parse_timestamp(ts, &record))
                .transpose()?,
            id: EntryId::new(self.id)?,
            user_id: UserId::new(self.user_id)?,
            region_id: RegionId::new(self.region_id)?,
            project_id: self.project_id.map(ProjectId::new).transpose()?,
            clock_in_location: coordinate(self.clock_in_lat, self.clock_in_lon)?,
            clock_in_source: self.clock_in_source.parse::<ClockSource>()?,
            clock_out_location: coordinate(self.clock_out_lat, self.clock_out_lon)?,
            clock_out_source: self
                .clock_out_source
                .as_deref()
                .map(str::parse::<ClockSource>)
                .transpose()?,
            total_hours: self.total_hours,
            needs_review: self.needs_review,
        })
    }
}

/// Raw `audit_events` row before domain validation.
struct AuditRow {
    id: String,
    user_id: String,
    kind: String,
    region_id: Option<String>,
    timestamp: String,
    lat: Option<f64>,
    lon: Option<f64>,
    accuracy_m: Option<f64>,
    outcome: String,
    entry_id: Option<String>,
    detail: Option<String>,
    recorded_at: String,
}

impl AuditRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            kind: row.get(2)?,
            region_id: row.get(3)?,
            timestamp: row.get(4)?,
            lat: row.get(5)?,
            lon: row.get(6)?,
            accuracy_m: row.get(7)?,
            outcome: row.get(8)?,
            entry_id: row.get(9)?,
            detail: row.get(10)?,
            recorded_at: row.get(11)?,
        })
    }

    fn into_event(self) -> Result<AuditEvent, DbError> {
        let record = format!("audit event {}", self.id);
        let timestamp = parse_timestamp(&self.timestamp, &record)?;
        let sample = match (self.lat, self.lon) {
            (Some(lat), Some(lon)) => Some(LocationSample::new(
                timestamp,
                lat,
                lon,
                self.accuracy_m.unwrap_or(0.0),
            )?),
            _ => None,
        };
        Ok(AuditEvent {
            recorded_at: parse_timestamp(&self.recorded_at, &record)?,
            id: AuditEventId::new(self.id)?,
            user_id: UserId::new(self.user_id)?,
            kind: self.kind.parse::<AuditKind>()?,
            region_id: self.region_id.map(RegionId::new).transpose()?,
            timestamp,
            sample,
            outcome: self.outcome.parse::<AuditOutcome>()?,
            entry_id: self.entry_id.map(EntryId::new).transpose()?,
            detail: self.detail,
        })
    }
}

fn coordinate(lat: Option<f64>, lon: Option<f64>) -> Result<Option<Coordinate>, DbError> {
    match (lat, lon) {
        (Some(lat), Some(lon)) => Ok(Some(Coordinate::new(lat, lon)?)),
        _ => Ok(None),
    }
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn parse_timestamp(timestamp: &str, record: &str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(timestamp)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|source| DbError::TimestampParse {
            record: record.to_string(),
            timestamp: timestamp.to_string(),
            source,
        })
}

fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    use chrono::Duration;

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn acme() -> RegionScope {
        RegionScope::company(CompanyId::new("acme").unwrap())
    }

    fn make_region(id: &str, name: &str, radius_m: f64) -> GeofenceRegion {
        let mut region = GeofenceRegion::new(
            CompanyId::new("acme").unwrap(),
            name,
            Coordinate::new(45.0, 7.0).unwrap(),
            radius_m,
        )
        .unwrap();
        region.id = RegionId::new(id).unwrap();
        region
    }

    fn worker() -> UserId {
        UserId::new("worker-1").unwrap()
    }

    fn make_entry(region: &GeofenceRegion, clock_in: &str) -> TimeEntry {
        TimeEntry::open(
            worker(),
            region,
            ts(clock_in),
            Some(region.center),
            ClockSource::Auto,
        )
    }

    fn make_audit(outcome: AuditOutcome, kind: AuditKind, seconds: i64) -> AuditEvent {
        let timestamp = ts("2025-01-01T08:00:00Z") + Duration::seconds(seconds);
        let mut event = AuditEvent::for_manual(
            worker(),
            kind,
            Some(RegionId::new("site").unwrap()),
            timestamp,
            outcome,
            None,
        );
        event.sample = Some(LocationSample::new(timestamp, 45.0, 7.0, 8.0).unwrap());
        event
    }

    #[test]
    fn open_in_memory_database() {
        let db = Database::open_in_memory();
        assert!(db.is_ok());
    }

    #[test]
    fn schema_matches_data_model() {
        let db = Database::open_in_memory().expect("open in-memory db");

        assert_eq!(
            table_columns(&db.conn, "regions"),
            vec![
                "id",
                "company_id",
                "name",
                "center_lat",
                "center_lon",
                "radius_m",
                "project_id",
                "auto_clock_in",
                "auto_clock_out",
                "entry_alert",
                "exit_alert",
                "active",
                "created_at",
                "updated_at",
            ]
        );
        assert_eq!(
            table_columns(&db.conn, "time_entries"),
            vec![
                "id",
                "user_id",
                "region_id",
                "project_id",
                "clock_in_time",
                "clock_in_lat",
                "clock_in_lon",
                "clock_in_source",
                "clock_out_time",
                "clock_out_lat",
                "clock_out_lon",
                "clock_out_source",
                "total_hours",
                "needs_review",
            ]
        );
        assert_eq!(
            table_columns(&db.conn, "audit_events"),
            vec![
                "seq",
                "id",
                "user_id",
                "kind",
                "region_id",
                "timestamp",
                "lat",
                "lon",
                "accuracy_m",
                "outcome",
                "entry_id",
                "detail",
                "recorded_at",
            ]
        );

        let entry_indexes = index_names(&db.conn, "time_entries");
        let expected: HashSet<String> = ["idx_time_entries_one_open", "idx_time_entries_user"]
            .into_iter()
            .map(String::from)
            .collect();
        assert!(expected.is_subset(&entry_indexes));
        assert!(index_names(&db.conn, "regions").contains("idx_regions_company"));
        assert!(index_names(&db.conn, "audit_events").contains("idx_audit_events_user"));
    }

    #[test]
    fn init_is_idempotent() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("fc.db");
        let db = Database::open(&path).unwrap();
        db.insert_region(&make_region("site", "Site", 50.0)).unwrap();
        drop(db);

        let db = Database::open(&path).unwrap();
        assert_eq!(db.list_active_regions(&acme()).unwrap().len(), 1);
    }

    #[test]
    fn region_roundtrip() {
        let db = Database::open_in_memory().unwrap();
        let region = make_region("site", "Site", 50.0)
            .with_project(ProjectId::new("bridge").unwrap());
        db.insert_region(&region).unwrap();

        let stored = db.get_region(&region.id).unwrap().unwrap();
        assert_eq!(stored.name, region.name);
        assert_eq!(stored.project_id, region.project_id);
        assert_eq!(stored.center, region.center);
        assert!((stored.radius_m - 50.0).abs() < f64::EPSILON);
        // Stored with millisecond precision.
        assert!((stored.created_at - region.created_at).num_milliseconds().abs() < 1);
    }

    #[test]
    fn list_active_regions_filters_and_orders() {
        let db = Database::open_in_memory().unwrap();
        let mut inactive = make_region("r0", "Alpha", 10.0);
        inactive.active = false;
        db.insert_region(&inactive).unwrap();
        db.insert_region(&make_region("r2", "Charlie", 10.0)).unwrap();
        db.insert_region(&make_region("r1", "Bravo", 10.0)).unwrap();
        let mut other_company = make_region("r3", "Delta", 10.0);
        other_company.company_id = CompanyId::new("other").unwrap();
        db.insert_region(&other_company).unwrap();

        let names: Vec<String> = db
            .list_active_regions(&acme())
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["Bravo", "Charlie"]);

        let all = db.list_regions(&acme(), true).unwrap();
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn list_regions_by_project_scope() {
        let db = Database::open_in_memory().unwrap();
        db.insert_region(
            &make_region("r1", "Bridge north", 10.0).with_project(ProjectId::new("bridge").unwrap()),
        )
        .unwrap();
        db.insert_region(&make_region("r2", "Yard", 10.0)).unwrap();

        let scope = RegionScope::project(
            CompanyId::new("acme").unwrap(),
            ProjectId::new("bridge").unwrap(),
        );
        let regions = db.list_active_regions(&scope).unwrap();
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].id.as_str(), "r1");
    }

    #[test]
    fn update_region_applies_patch() {
        let mut db = Database::open_in_memory().unwrap();
        let region = make_region("site", "Site", 50.0);
        db.insert_region(&region).unwrap();

        let patch = RegionPatch {
            radius_m: Some(80.0),
            active: Some(false),
            ..RegionPatch::default()
        };
        let now = region.updated_at + Duration::hours(1);
        let updated = db.update_region(&region.id, &patch, now).unwrap().unwrap();
        assert!((updated.radius_m - 80.0).abs() < f64::EPSILON);
        assert!(!updated.active);

        let stored = db.get_region(&region.id).unwrap().unwrap();
        assert!(!stored.active);
        assert!(db.list_active_regions(&acme()).unwrap().is_empty());
    }

    #[test]
    fn update_region_rejects_invalid_patch() {
        let mut db = Database::open_in_memory().unwrap();
        let region = make_region("site", "Site", 50.0);
        db.insert_region(&region).unwrap();

        let patch = RegionPatch {
            radius_m: Some(0.0),
            ..RegionPatch::default()
        };
        let result = db.update_region(&region.id, &patch, Utc::now());
        assert!(matches!(result, Err(DbError::Validation(_))));
        let stored = db.get_region(&region.id).unwrap().unwrap();
        assert!((stored.radius_m - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn update_missing_region_returns_none() {
        let mut db = Database::open_in_memory().unwrap();
        let result = db
            .update_region(
                &RegionId::new("missing").unwrap(),
                &RegionPatch::default(),
                Utc::now(),
            )
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn remove_region_keeps_entries() {
        let db = Database::open_in_memory().unwrap();
        let region = make_region("site", "Site", 50.0);
        db.insert_region(&region).unwrap();
        let entry = make_entry(&region, "2025-01-01T08:00:00Z");
        db.insert_time_entry(&entry).unwrap();

        assert!(db.remove_region(&region.id).unwrap());
        assert!(!db.remove_region(&region.id).unwrap());
        assert!(db.get_region(&region.id).unwrap().is_none());
        assert!(db.get_time_entry(&entry.id).unwrap().is_some());
    }

    #[test]
    fn time_entry_roundtrip() {
        let db = Database::open_in_memory().unwrap();
        let region = make_region("site", "Site", 50.0);
        let entry = make_entry(&region, "2025-01-01T08:00:00Z");
        db.insert_time_entry(&entry).unwrap();

        let open = db.open_time_entry(&worker()).unwrap().unwrap();
        assert_eq!(open, entry);
    }

    #[test]
    fn second_open_entry_is_rejected() {
        let db = Database::open_in_memory().unwrap();
        let region = make_region("site", "Site", 50.0);
        db.insert_time_entry(&make_entry(&region, "2025-01-01T08:00:00Z"))
            .unwrap();

        let result = db.insert_time_entry(&make_entry(&region, "2025-01-01T08:00:05Z"));
        assert!(matches!(result, Err(DbError::OpenEntryExists { .. })));

        let count: i64 = db
            .conn
            .query_row("SELECT COUNT(*) FROM time_entries", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn open_entries_for_different_users_coexist() {
        let db = Database::open_in_memory().unwrap();
        let region = make_region("site", "Site", 50.0);
        db.insert_time_entry(&make_entry(&region, "2025-01-01T08:00:00Z"))
            .unwrap();
        let mut other = make_entry(&region, "2025-01-01T08:00:00Z");
        other.user_id = UserId::new("worker-2").unwrap();
        db.insert_time_entry(&other).unwrap();
    }

    #[test]
    fn close_entry_allows_a_new_open_entry() {
        let db = Database::open_in_memory().unwrap();
        let region = make_region("site", "Site", 50.0);
        let entry = make_entry(&region, "2025-01-01T08:00:00Z");
        db.insert_time_entry(&entry).unwrap();

        let close = entry.close_at(ts("2025-01-01T12:30:00Z"), None, ClockSource::Auto);
        assert!(db.close_time_entry(&entry.id, &close).unwrap());
        // Closing twice is a no-op.
        assert!(!db.close_time_entry(&entry.id, &close).unwrap());

        let stored = db.get_time_entry(&entry.id).unwrap().unwrap();
        assert!(!stored.is_open());
        assert!((stored.total_hours.unwrap() - 4.5).abs() < 1e-9);
        assert_eq!(stored.clock_out_source, Some(ClockSource::Auto));
        assert!(db.open_time_entry(&worker()).unwrap().is_none());

        db.insert_time_entry(&make_entry(&region, "2025-01-01T13:00:00Z"))
            .unwrap();
        assert!(db.open_time_entry(&worker()).unwrap().is_some());
    }

    #[test]
    fn list_time_entries_most_recent_first() {
        let db = Database::open_in_memory().unwrap();
        let region = make_region("site", "Site", 50.0);
        for (clock_in, clock_out) in [
            ("2025-01-01T08:00:00Z", "2025-01-01T09:00:00Z"),
            ("2025-01-02T08:00:00Z", "2025-01-02T09:00:00Z"),
            ("2025-01-03T08:00:00Z", "2025-01-03T09:00:00Z"),
        ] {
            let entry = make_entry(&region, clock_in);
            db.insert_time_entry(&entry).unwrap();
            let close = entry.close_at(ts(clock_out), None, ClockSource::Auto);
            db.close_time_entry(&entry.id, &close).unwrap();
        }

        let entries = db.list_time_entries(&worker(), 2).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].clock_in_time, ts("2025-01-03T08:00:00Z"));
        assert_eq!(entries[1].clock_in_time, ts("2025-01-02T08:00:00Z"));
    }

    #[test]
    fn audit_events_read_most_recent_first() {
        let mut db = Database::open_in_memory().unwrap();
        for (i, outcome) in [
            AuditOutcome::Created,
            AuditOutcome::Closed,
            AuditOutcome::Conflict,
        ]
        .into_iter()
        .enumerate()
        {
            let event = make_audit(outcome, AuditKind::Enter, i64::try_from(i).unwrap());
            db.append_audit_event(&event, 100).unwrap();
        }

        let events = db.list_audit_events(&worker(), 10).unwrap();
        let outcomes: Vec<AuditOutcome> = events.iter().map(|e| e.outcome).collect();
        assert_eq!(
            outcomes,
            vec![
                AuditOutcome::Conflict,
                AuditOutcome::Closed,
                AuditOutcome::Created,
            ]
        );
        let sample = events[0].sample.unwrap();
        assert!((sample.accuracy_m - 8.0).abs() < f64::EPSILON);
        assert_eq!(sample.timestamp, events[0].timestamp);
    }

    #[test]
    fn audit_retention_prunes_oldest() {
        let mut db = Database::open_in_memory().unwrap();
        let mut pruned_total = 0;
        for i in 0..8 {
            let event = make_audit(AuditOutcome::NoOp, AuditKind::Exit, i);
            pruned_total += db.append_audit_event(&event, 5).unwrap();
        }
        assert_eq!(pruned_total, 3);

        let events = db.list_audit_events(&worker(), 100).unwrap();
        assert_eq!(events.len(), 5);
        assert_eq!(
            events[0].timestamp,
            ts("2025-01-01T08:00:00Z") + Duration::seconds(7)
        );
        assert_eq!(
            events[4].timestamp,
            ts("2025-01-01T08:00:00Z") + Duration::seconds(3)
        );
    }

    #[test]
    fn audit_retention_is_per_user() {
        let mut db = Database::open_in_memory().unwrap();
        let mut other = make_audit(AuditOutcome::NoOp, AuditKind::Exit, 0);
        other.user_id = UserId::new("worker-2").unwrap();
        db.append_audit_event(&other, 2).unwrap();

        for i in 0..4 {
            db.append_audit_event(&make_audit(AuditOutcome::NoOp, AuditKind::Exit, i), 2)
                .unwrap();
        }
        assert_eq!(
            db.list_audit_events(&UserId::new("worker-2").unwrap(), 10)
                .unwrap()
                .len(),
            1
        );
        assert_eq!(db.list_audit_events(&worker(), 10).unwrap().len(), 2);
    }

    #[test]
    fn last_transition_skips_manual_and_failed() {
        let mut db = Database::open_in_memory().unwrap();
        db.append_audit_event(&make_audit(AuditOutcome::Created, AuditKind::Enter, 0), 0)
            .unwrap();
        db.append_audit_event(
            &make_audit(AuditOutcome::Closed, AuditKind::ManualClockOut, 1),
            0,
        )
        .unwrap();
        db.append_audit_event(&make_audit(AuditOutcome::Failed, AuditKind::Exit, 2), 0)
            .unwrap();

        let last = db.last_transition_event(&worker()).unwrap().unwrap();
        assert_eq!(last.kind, AuditKind::Enter);
        assert_eq!(last.outcome, AuditOutcome::Created);
    }

    #[test]
    fn last_transition_none_for_new_user() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.last_transition_event(&worker()).unwrap().is_none());
    }

    fn table_columns(conn: &Connection, table: &str) -> Vec<String> {
        let mut stmt = conn
            .prepare(&format!("PRAGMA table_info({table})"))
            .expect("prepare table_info");
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(1))
            .expect("query table_info");
        rows.map(|row| row.expect("table_info row")).collect()
    }

    fn index_names(conn: &Connection, table: &str) -> HashSet<String> {
        let mut stmt = conn
            .prepare(&format!("PRAGMA index_list({table})"))
            .expect("prepare index_list");
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(1))
            .expect("query index_list");
        rows.map(|row| row.expect("index_list row")).collect()
    }
}
