//! Time entries: continuous on-site work periods.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geo::Coordinate;
use crate::region::GeofenceRegion;
use crate::types::{ClockSource, EntryId, ProjectId, RegionId, UserId};

const SECONDS_PER_HOUR: f64 = 3600.0;

/// A work period for one user at one region.
///
/// An entry is open while `clock_out_time` is `None`. Entries are never
/// deleted; they are closed and, when the recorded times disagree, flagged
/// for review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeEntry {
    pub id: EntryId,
    pub user_id: UserId,
    pub region_id: RegionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<ProjectId>,
    pub clock_in_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clock_in_location: Option<Coordinate>,
    pub clock_in_source: ClockSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clock_out_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clock_out_location: Option<Coordinate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clock_out_source: Option<ClockSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_hours: Option<f64>,
    #[serde(default)]
    pub needs_review: bool,
}

impl TimeEntry {
    /// Opens a new entry at `region`, inheriting its project.
    pub fn open(
        user_id: UserId,
        region: &GeofenceRegion,
        clock_in_time: DateTime<Utc>,
        clock_in_location: Option<Coordinate>,
        source: ClockSource,
    ) -> Self {
        Self {
            id: EntryId::generate(),
            user_id,
            region_id: region.id.clone(),
            project_id: region.project_id.clone(),
            clock_in_time,
            clock_in_location,
            clock_in_source: source,
            clock_out_time: None,
            clock_out_location: None,
            clock_out_source: None,
            total_hours: None,
            needs_review: false,
        }
    }

    pub const fn is_open(&self) -> bool {
        self.clock_out_time.is_none()
    }

    /// Computes the update that closes this entry.
    pub fn close_at(
        &self,
        clock_out_time: DateTime<Utc>,
        clock_out_location: Option<Coordinate>,
        source: ClockSource,
    ) -> EntryClose {
        let worked = worked_hours(self.clock_in_time, clock_out_time);
        EntryClose {
            clock_out_time,
            clock_out_location,
            clock_out_source: source,
            total_hours: worked.hours,
            needs_review: self.needs_review || worked.clamped,
        }
    }

    /// Applies a close update in memory.
    pub fn apply_close(&mut self, close: &EntryClose) {
        self.clock_out_time = Some(close.clock_out_time);
        self.clock_out_location = close.clock_out_location;
        self.clock_out_source = Some(close.clock_out_source);
        self.total_hours = Some(close.total_hours);
        self.needs_review = close.needs_review;
    }
}

/// The fields written when an entry is closed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryClose {
    pub clock_out_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clock_out_location: Option<Coordinate>,
    pub clock_out_source: ClockSource,
    pub total_hours: f64,
    pub needs_review: bool,
}

/// Duration between clock-in and clock-out in fractional hours.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorkedHours {
    pub hours: f64,
    /// The clock-out preceded the clock-in and the duration was clamped to 0.
    pub clamped: bool,
}

/// Computes `(clock_out - clock_in) / 3600` with millisecond precision.
///
/// A negative duration (clock skew between devices) yields 0 hours with
/// `clamped` set, so the entry can be persisted and reviewed.
pub fn worked_hours(clock_in: DateTime<Utc>, clock_out: DateTime<Utc>) -> WorkedHours {
    let millis = clock_out.signed_duration_since(clock_in).num_milliseconds();
    if millis < 0 {
        return WorkedHours {
            hours: 0.0,
            clamped: true,
        };
    }
    #[expect(
        clippy::cast_precision_loss,
        reason = "work periods are far below 2^52 milliseconds"
    )]
    let seconds = millis as f64 / 1000.0;
    WorkedHours {
        hours: seconds / SECONDS_PER_HOUR,
        clamped: false,
    }
}
