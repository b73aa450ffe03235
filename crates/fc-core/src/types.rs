//! Core type definitions with validation.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Validation errors for core types.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    /// The provided value was empty.
    #[error("{field} cannot be empty")]
    Empty { field: &'static str },

    /// Latitude outside \[-90, 90\] or not finite.
    #[error("latitude must be between -90 and 90, got {value}")]
    LatitudeOutOfRange { value: f64 },

    /// Longitude outside \[-180, 180\] or not finite.
    #[error("longitude must be between -180 and 180, got {value}")]
    LongitudeOutOfRange { value: f64 },

    /// Geofence radius must be a positive, finite number of meters.
    #[error("radius must be a positive number of meters, got {value}")]
    InvalidRadius { value: f64 },

    /// Invalid clock source value.
    #[error("invalid clock source: {value}")]
    InvalidClockSource { value: String },

    /// Invalid transition kind value.
    #[error("invalid transition kind: {value}")]
    InvalidTransitionKind { value: String },

    /// Invalid audit outcome value.
    #[error("invalid audit outcome: {value}")]
    InvalidOutcome { value: String },
}

/// How a time entry boundary was recorded.
///
/// This enum encodes the valid clock sources, preventing invalid string values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClockSource {
    /// Triggered by a geofence transition.
    Auto,
    /// Entered by an operator override.
    Manual,
}

impl ClockSource {
    /// String representation for database storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Manual => "manual",
        }
    }
}

impl fmt::Display for ClockSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ClockSource {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(Self::Auto),
            "manual" => Ok(Self::Manual),
            _ => Err(ValidationError::InvalidClockSource {
                value: s.to_string(),
            }),
        }
    }
}

/// Generates a validated string ID newtype with common trait implementations.
macro_rules! define_string_id {
    (
        $(#[$meta:meta])*
        $name:ident, $field_name:literal
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Creates a new ID after validation.
            pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
                let id = id.into();
                if id.trim().is_empty() {
                    return Err(ValidationError::Empty { field: $field_name });
                }
                Ok(Self(id))
            }

            /// Returns the ID as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = ValidationError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

/// Adds a random (UUID v4) constructor to a generated ID type.
macro_rules! impl_generate {
    ($($name:ident),+) => {
        $(
            impl $name {
                /// Generates a fresh random ID.
                pub fn generate() -> Self {
                    Self(Uuid::new_v4().to_string())
                }
            }
        )+
    };
}

define_string_id!(
    /// A validated geofence region identifier.
    RegionId, "region ID"
);

define_string_id!(
    /// A validated worker identifier.
    ///
    /// Identity is established by an external authentication collaborator;
    /// here it is only an opaque non-empty string.
    UserId, "user ID"
);

define_string_id!(
    /// A validated time entry identifier.
    EntryId, "entry ID"
);

define_string_id!(
    /// A validated audit event identifier.
    AuditEventId, "audit event ID"
);

define_string_id!(
    /// A validated project identifier.
    ProjectId, "project ID"
);

define_string_id!(
    /// A validated company identifier.
    ///
    /// Companies own geofence regions and form the outer scope for registry reads.
    CompanyId, "company ID"
);

impl_generate!(RegionId, EntryId, AuditEventId);

/// Selects the regions visible to a user: all of a company's regions, or only
/// those attached to one project.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegionScope {
    pub company_id: CompanyId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<ProjectId>,
}

impl RegionScope {
    /// Scope covering every region of a company.
    pub const fn company(company_id: CompanyId) -> Self {
        Self {
            company_id,
            project_id: None,
        }
    }

    /// Scope restricted to a single project of a company.
    pub const fn project(company_id: CompanyId, project_id: ProjectId) -> Self {
        Self {
            company_id,
            project_id: Some(project_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_id_rejects_empty() {
        assert!(RegionId::new("").is_err());
        assert!(RegionId::new("   ").is_err());
        assert!(RegionId::new("site-a").is_ok());
    }

    #[test]
    fn user_id_serde_roundtrip() {
        let id = UserId::new("worker-7").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"worker-7\"");
        let parsed: UserId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn entry_id_serde_rejects_empty() {
        let result: Result<EntryId, _> = serde_json::from_str("\"\"");
        assert!(result.is_err());
    }

    #[test]
    fn generated_ids_are_unique() {
        let a = EntryId::generate();
        let b = EntryId::generate();
        assert_ne!(a, b);
        assert!(Uuid::parse_str(a.as_str()).is_ok());
    }

    #[test]
    fn clock_source_from_str() {
        assert_eq!("auto".parse::<ClockSource>().unwrap(), ClockSource::Auto);
        assert_eq!(
            "manual".parse::<ClockSource>().unwrap(),
            ClockSource::Manual
        );
        assert!("punch".parse::<ClockSource>().is_err());
    }

    #[test]
    fn clock_source_serde_matches_as_str() {
        for source in [ClockSource::Auto, ClockSource::Manual] {
            let json = serde_json::to_string(&source).unwrap();
            assert_eq!(json, format!("\"{}\"", source.as_str()));
        }
    }

    #[test]
    fn scope_serialization_omits_missing_project() {
        let scope = RegionScope::company(CompanyId::new("acme").unwrap());
        let json = serde_json::to_string(&scope).unwrap();
        assert_eq!(json, r#"{"company_id":"acme"}"#);
    }
}
