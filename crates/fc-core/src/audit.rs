//! Append-only audit records of transitions and clock actions.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entry::TimeEntry;
use crate::sample::LocationSample;
use crate::transition::{MembershipState, TransitionEvent, TransitionKind};
use crate::types::{AuditEventId, EntryId, RegionId, UserId, ValidationError};

/// What triggered an audit record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    Enter,
    Exit,
    ManualClockIn,
    ManualClockOut,
}

impl AuditKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Enter => "enter",
            Self::Exit => "exit",
            Self::ManualClockIn => "manual_clock_in",
            Self::ManualClockOut => "manual_clock_out",
        }
    }

    /// Whether the record came from a detected transition.
    pub const fn is_transition(&self) -> bool {
        matches!(self, Self::Enter | Self::Exit)
    }
}

impl From<TransitionKind> for AuditKind {
    fn from(kind: TransitionKind) -> Self {
        match kind {
            TransitionKind::Enter => Self::Enter,
            TransitionKind::Exit => Self::Exit,
        }
    }
}

impl fmt::Display for AuditKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "enter" => Ok(Self::Enter),
            "exit" => Ok(Self::Exit),
            "manual_clock_in" => Ok(Self::ManualClockIn),
            "manual_clock_out" => Ok(Self::ManualClockOut),
            _ => Err(ValidationError::InvalidTransitionKind {
                value: s.to_string(),
            }),
        }
    }
}

/// The effect a transition or clock action had on the time entry store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    /// A new time entry was opened.
    Created,
    /// An open time entry was closed.
    Closed,
    /// An open time entry was closed with its hours clamped for review.
    Flagged,
    /// Nothing to do (auto clock disabled, no matching entry).
    NoOp,
    /// An entry was already open; nothing was created.
    Conflict,
    /// Persistence failed; the transition will be retried.
    Failed,
}

impl AuditOutcome {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Closed => "closed",
            Self::Flagged => "flagged",
            Self::NoOp => "no_op",
            Self::Conflict => "conflict",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for AuditOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditOutcome {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "closed" => Ok(Self::Closed),
            "flagged" => Ok(Self::Flagged),
            "no_op" => Ok(Self::NoOp),
            "conflict" => Ok(Self::Conflict),
            "failed" => Ok(Self::Failed),
            _ => Err(ValidationError::InvalidOutcome {
                value: s.to_string(),
            }),
        }
    }
}

/// One row of the audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: AuditEventId,
    pub user_id: UserId,
    pub kind: AuditKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region_id: Option<RegionId>,
    /// When the transition or action happened.
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample: Option<LocationSample>,
    pub outcome: AuditOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_id: Option<EntryId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// When the record was written.
    pub recorded_at: DateTime<Utc>,
}

impl AuditEvent {
    /// Records the outcome of a detected transition.
    pub fn for_transition(
        user_id: UserId,
        transition: &TransitionEvent,
        outcome: AuditOutcome,
        entry_id: Option<EntryId>,
    ) -> Self {
        Self {
            id: AuditEventId::generate(),
            user_id,
            kind: transition.kind.into(),
            region_id: Some(transition.region_id.clone()),
            timestamp: transition.timestamp,
            sample: Some(transition.sample),
            outcome,
            entry_id,
            detail: None,
            recorded_at: Utc::now(),
        }
    }

    /// Records the outcome of an operator override.
    pub fn for_manual(
        user_id: UserId,
        kind: AuditKind,
        region_id: Option<RegionId>,
        timestamp: DateTime<Utc>,
        outcome: AuditOutcome,
        entry_id: Option<EntryId>,
    ) -> Self {
        Self {
            id: AuditEventId::generate(),
            user_id,
            kind,
            region_id,
            timestamp,
            sample: None,
            outcome,
            entry_id,
            detail: None,
            recorded_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Rebuilds the membership state after a restart.
///
/// The last successfully processed Enter/Exit record wins. Without one, an
/// open entry implies the worker is still inside its region.
pub fn recover_membership(
    last_transition: Option<&AuditEvent>,
    open_entry: Option<&TimeEntry>,
) -> MembershipState {
    let processed = last_transition
        .filter(|event| event.kind.is_transition() && event.outcome != AuditOutcome::Failed);
    match processed {
        Some(event) => match (&event.kind, &event.region_id) {
            (AuditKind::Enter, Some(region_id)) => MembershipState::Inside(region_id.clone()),
            _ => MembershipState::Outside,
        },
        None => open_entry
            .filter(|entry| entry.is_open())
            .map_or(MembershipState::Outside, |entry| {
                MembershipState::Inside(entry.region_id.clone())
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::Coordinate;
    use crate::region::GeofenceRegion;
    use crate::types::{ClockSource, CompanyId};

    fn user() -> UserId {
        UserId::new("worker").unwrap()
    }

    fn transition(kind: TransitionKind, region: &str) -> TransitionEvent {
        let sample = LocationSample::new(Utc::now(), 0.0, 0.0, 5.0).unwrap();
        let region_id = RegionId::new(region).unwrap();
        match kind {
            TransitionKind::Enter => TransitionEvent::enter(region_id, sample),
            TransitionKind::Exit => TransitionEvent::exit(region_id, sample),
        }
    }

    fn open_entry(region: &str) -> TimeEntry {
        let mut site = GeofenceRegion::new(
            CompanyId::new("acme").unwrap(),
            "Site",
            Coordinate::new(0.0, 0.0).unwrap(),
            50.0,
        )
        .unwrap();
        site.id = RegionId::new(region).unwrap();
        TimeEntry::open(user(), &site, Utc::now(), None, ClockSource::Manual)
    }

    #[test]
    fn outcome_roundtrip() {
        for outcome in [
            AuditOutcome::Created,
            AuditOutcome::Closed,
            AuditOutcome::Flagged,
            AuditOutcome::NoOp,
            AuditOutcome::Conflict,
            AuditOutcome::Failed,
        ] {
            assert_eq!(outcome.as_str().parse::<AuditOutcome>().unwrap(), outcome);
            let json = serde_json::to_string(&outcome).unwrap();
            assert_eq!(json, format!("\"{}\"", outcome.as_str()));
        }
        assert!("ok".parse::<AuditOutcome>().is_err());
    }

    #[test]
    fn kind_roundtrip() {
        for kind in [
            AuditKind::Enter,
            AuditKind::Exit,
            AuditKind::ManualClockIn,
            AuditKind::ManualClockOut,
        ] {
            assert_eq!(kind.as_str().parse::<AuditKind>().unwrap(), kind);
        }
    }

    #[test]
    fn transition_record_copies_sample() {
        let event = transition(TransitionKind::Enter, "r");
        let audit = AuditEvent::for_transition(user(), &event, AuditOutcome::Created, None);
        assert_eq!(audit.kind, AuditKind::Enter);
        assert_eq!(audit.region_id.as_ref().map(RegionId::as_str), Some("r"));
        assert_eq!(audit.sample, Some(event.sample));
        assert_eq!(audit.timestamp, event.timestamp);
    }

    #[test]
    fn recover_from_last_enter() {
        let audit = AuditEvent::for_transition(
            user(),
            &transition(TransitionKind::Enter, "r"),
            AuditOutcome::Conflict,
            None,
        );
        assert_eq!(
            recover_membership(Some(&audit), None),
            MembershipState::Inside(RegionId::new("r").unwrap())
        );
    }

    #[test]
    fn recover_from_last_exit_ignores_open_entry() {
        let audit = AuditEvent::for_transition(
            user(),
            &transition(TransitionKind::Exit, "r"),
            AuditOutcome::NoOp,
            None,
        );
        let entry = open_entry("r");
        assert_eq!(
            recover_membership(Some(&audit), Some(&entry)),
            MembershipState::Outside
        );
    }

    #[test]
    fn recover_falls_back_to_open_entry() {
        let entry = open_entry("site-9");
        assert_eq!(
            recover_membership(None, Some(&entry)),
            MembershipState::Inside(RegionId::new("site-9").unwrap())
        );
        assert_eq!(recover_membership(None, None), MembershipState::Outside);
    }

    #[test]
    fn failed_transitions_are_not_trusted() {
        let audit = AuditEvent::for_transition(
            user(),
            &transition(TransitionKind::Enter, "r"),
            AuditOutcome::Failed,
            None,
        );
        assert_eq!(recover_membership(Some(&audit), None), MembershipState::Outside);
    }
}
