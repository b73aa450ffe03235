//! Geofence region definitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geo::Coordinate;
use crate::types::{CompanyId, ProjectId, RegionId, ValidationError};

/// A named circular job-site boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeofenceRegion {
    pub id: RegionId,
    pub company_id: CompanyId,
    pub name: String,
    pub center: Coordinate,
    /// Boundary radius in meters. Always positive.
    pub radius_m: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<ProjectId>,
    pub auto_clock_in: bool,
    pub auto_clock_out: bool,
    pub entry_alert: bool,
    pub exit_alert: bool,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GeofenceRegion {
    /// Creates an active region that clocks in and out automatically, with
    /// alerts disabled.
    pub fn new(
        company_id: CompanyId,
        name: impl Into<String>,
        center: Coordinate,
        radius_m: f64,
    ) -> Result<Self, ValidationError> {
        let now = Utc::now();
        let region = Self {
            id: RegionId::generate(),
            company_id,
            name: name.into(),
            center,
            radius_m,
            project_id: None,
            auto_clock_in: true,
            auto_clock_out: true,
            entry_alert: false,
            exit_alert: false,
            active: true,
            created_at: now,
            updated_at: now,
        };
        region.validate()?;
        Ok(region)
    }

    /// Attaches the region to a project.
    #[must_use]
    pub fn with_project(mut self, project_id: ProjectId) -> Self {
        self.project_id = Some(project_id);
        self
    }

    /// Checks the invariants a stored region must satisfy.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::Empty {
                field: "region name",
            });
        }
        validate_radius(self.radius_m)?;
        Coordinate::new(self.center.lat, self.center.lon)?;
        Ok(())
    }

    /// Applies a partial update, validating the result before committing it.
    pub fn apply(&mut self, patch: &RegionPatch, now: DateTime<Utc>) -> Result<(), ValidationError> {
        let mut updated = self.clone();
        if let Some(name) = &patch.name {
            updated.name.clone_from(name);
        }
        if let Some(center) = patch.center {
            updated.center = center;
        }
        if let Some(radius_m) = patch.radius_m {
            updated.radius_m = radius_m;
        }
        if let Some(project_id) = &patch.project_id {
            updated.project_id.clone_from(project_id);
        }
        if let Some(flag) = patch.auto_clock_in {
            updated.auto_clock_in = flag;
        }
        if let Some(flag) = patch.auto_clock_out {
            updated.auto_clock_out = flag;
        }
        if let Some(flag) = patch.entry_alert {
            updated.entry_alert = flag;
        }
        if let Some(flag) = patch.exit_alert {
            updated.exit_alert = flag;
        }
        if let Some(flag) = patch.active {
            updated.active = flag;
        }
        updated.validate()?;
        updated.updated_at = now;
        *self = updated;
        Ok(())
    }
}

fn validate_radius(radius_m: f64) -> Result<(), ValidationError> {
    if radius_m.is_finite() && radius_m > 0.0 {
        Ok(())
    } else {
        Err(ValidationError::InvalidRadius { value: radius_m })
    }
}

/// A partial update to a region. `None` leaves a field unchanged.
///
/// `project_id` is doubly optional: `Some(None)` detaches the project.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegionPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub center: Option<Coordinate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub radius_m: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<Option<ProjectId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_clock_in: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_clock_out: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_alert: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_alert: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
}

impl RegionPatch {
    /// True when the patch would not change anything.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
