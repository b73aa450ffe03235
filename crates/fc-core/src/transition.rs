//! Membership state machine producing Enter/Exit transitions.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::sample::LocationSample;
use crate::types::{RegionId, ValidationError};

/// Which region currently contains the worker, if any.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", content = "region_id", rename_all = "snake_case")]
pub enum MembershipState {
    #[default]
    Outside,
    Inside(RegionId),
}

impl MembershipState {
    /// The containing region, if inside one.
    pub const fn region(&self) -> Option<&RegionId> {
        match self {
            Self::Outside => None,
            Self::Inside(region) => Some(region),
        }
    }

    fn from_detected(detected: Option<&RegionId>) -> Self {
        detected.map_or(Self::Outside, |region| Self::Inside(region.clone()))
    }
}

/// Direction of a membership change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionKind {
    Enter,
    Exit,
}

impl TransitionKind {
    /// String representation for database storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Enter => "enter",
            Self::Exit => "exit",
        }
    }
}

impl fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransitionKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "enter" => Ok(Self::Enter),
            "exit" => Ok(Self::Exit),
            _ => Err(ValidationError::InvalidTransitionKind {
                value: s.to_string(),
            }),
        }
    }
}

/// A detected change in geofence membership. Immutable once emitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionEvent {
    pub kind: TransitionKind,
    pub region_id: RegionId,
    pub timestamp: DateTime<Utc>,
    /// The sample that produced the transition.
    pub sample: LocationSample,
}

impl TransitionEvent {
    pub fn enter(region_id: RegionId, sample: LocationSample) -> Self {
        Self {
            kind: TransitionKind::Enter,
            region_id,
            timestamp: sample.timestamp,
            sample,
        }
    }

    pub fn exit(region_id: RegionId, sample: LocationSample) -> Self {
        Self {
            kind: TransitionKind::Exit,
            region_id,
            timestamp: sample.timestamp,
            sample,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct PendingChange {
    target: MembershipState,
    first_seen: LocationSample,
}

/// Turns a sequence of detector outputs into transitions.
///
/// With a zero dwell window every change is emitted on the sample that
/// reveals it. With a positive window a change is held back until the new
/// membership has been observed for at least that long; the emitted events
/// then carry the first sample that observed it. A sample that reverts to the
/// committed state discards the pending change.
///
/// Moving directly from one region to another emits `Exit` then `Enter`.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionMachine {
    state: MembershipState,
    dwell: Duration,
    pending: Option<PendingChange>,
}

impl Default for TransitionMachine {
    fn default() -> Self {
        Self::new(Duration::zero())
    }
}

impl TransitionMachine {
    /// Creates a machine in the `Outside` state.
    pub fn new(dwell: Duration) -> Self {
        Self::with_state(MembershipState::Outside, dwell)
    }

    /// Creates a machine resuming from a known state.
    pub fn with_state(state: MembershipState, dwell: Duration) -> Self {
        Self {
            state,
            dwell: dwell.max(Duration::zero()),
            pending: None,
        }
    }

    pub const fn state(&self) -> &MembershipState {
        &self.state
    }

    /// Whether a change is waiting for the dwell window to elapse.
    pub const fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Moves the committed state past one transition that has been applied.
    ///
    /// Used when only a prefix of the events from [`Self::advance`] could be
    /// processed: the next sample then recomputes just the remainder. A
    /// pending change toward some other state is kept.
    pub fn settle(&mut self, event: &TransitionEvent) {
        self.state = match event.kind {
            TransitionKind::Enter => MembershipState::Inside(event.region_id.clone()),
            TransitionKind::Exit => MembershipState::Outside,
        };
        if self
            .pending
            .as_ref()
            .is_some_and(|pending| pending.target == self.state)
        {
            self.pending = None;
        }
    }

    /// Feeds one detector output and returns the transitions it causes.
    pub fn advance(
        &mut self,
        detected: Option<&RegionId>,
        sample: &LocationSample,
    ) -> Vec<TransitionEvent> {
        let target = MembershipState::from_detected(detected);
        if target == self.state {
            self.pending = None;
            return Vec::new();
        }

        if self.dwell <= Duration::zero() {
            return self.commit(target, *sample);
        }

        let first_seen = self
            .pending
            .as_ref()
            .filter(|pending| pending.target == target)
            .map(|pending| pending.first_seen);

        match first_seen {
            Some(first_seen) if sample.timestamp - first_seen.timestamp >= self.dwell => {
                self.commit(target, first_seen)
            }
            Some(_) => Vec::new(),
            None => {
                tracing::trace!(?target, "membership change pending dwell window");
                self.pending = Some(PendingChange {
                    target,
                    first_seen: *sample,
                });
                Vec::new()
            }
        }
    }

    fn commit(&mut self, target: MembershipState, sample: LocationSample) -> Vec<TransitionEvent> {
        let mut events = Vec::with_capacity(2);
        if let MembershipState::Inside(previous) = &self.state {
            events.push(TransitionEvent::exit(previous.clone(), sample));
        }
        if let MembershipState::Inside(next) = &target {
            events.push(TransitionEvent::enter(next.clone(), sample));
        }
        self.state = target;
        self.pending = None;
        events
    }
}
