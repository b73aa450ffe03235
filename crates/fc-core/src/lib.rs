//! Core domain logic for geofenced time tracking.
//!
//! This crate contains the fundamental types and logic for:
//! - Geodesy: haversine distance on a spherical Earth
//! - Membership: which geofence (if any) contains a location sample
//! - Transitions: turning membership changes into Enter/Exit events
//! - Time entries: clock-in/clock-out records and worked-hours arithmetic

pub mod audit;
pub mod entry;
pub mod geo;
pub mod membership;
pub mod region;
pub mod sample;
pub mod transition;
pub mod types;

pub use audit::{AuditEvent, AuditKind, AuditOutcome, recover_membership};
pub use entry::{EntryClose, TimeEntry, WorkedHours, worked_hours};
pub use geo::{Coordinate, EARTH_RADIUS_M, distance};
pub use membership::{LinearDetector, MembershipDetector};
pub use region::{GeofenceRegion, RegionPatch};
pub use sample::LocationSample;
pub use transition::{MembershipState, TransitionEvent, TransitionKind, TransitionMachine};
pub use types::{
    AuditEventId, ClockSource, CompanyId, EntryId, ProjectId, RegionId, RegionScope, UserId,
    ValidationError,
};
