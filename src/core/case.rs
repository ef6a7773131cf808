//! Case aggregate root.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CaseStatus {
    /// Open and accepting evidence.
    Active,
    /// Closed; evidence retained.
    Closed,
    /// Archived; read-only.
    Archived,
}

impl CaseStatus {
    /// Stable string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Closed => "CLOSED",
            Self::Archived => "ARCHIVED",
        }
    }
}

impl std::str::FromStr for CaseStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(Self::Active),
            "CLOSED" => Ok(Self::Closed),
            "ARCHIVED" => Ok(Self::Archived),
            other => Err(crate::Error::validation(format!(
                "unknown case status: {other}"
            ))),
        }
    }
}

/// Root aggregate. Evidence and research runs are owned by a case and
/// cascade-delete with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Case {
    /// Case identifier.
    pub id: Uuid,
    /// Globally unique docket/case number.
    pub case_number: String,
    /// Client name.
    pub client: String,
    /// Matter type (e.g., "criminal-defense", "contract-dispute").
    pub matter_type: String,
    /// Lifecycle status.
    pub status: CaseStatus,
    /// Owning team, when team scoping is in use.
    pub team_id: Option<Uuid>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Case {
    /// Creates a new active case.
    ///
    /// # Errors
    ///
    /// Returns a validation error when `case_number` is empty.
    pub fn new(
        case_number: impl Into<String>,
        client: impl Into<String>,
        matter_type: impl Into<String>,
    ) -> crate::Result<Self> {
        let case_number = case_number.into();
        if case_number.trim().is_empty() {
            return Err(crate::Error::validation("case_number must not be empty"));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            case_number,
            client: client.into(),
            matter_type: matter_type.into(),
            status: CaseStatus::Active,
            team_id: None,
            created_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_new() {
        let case = Case::new("2024-CV-0042", "Acme Corp", "contract-dispute").unwrap();
        assert_eq!(case.status, CaseStatus::Active);
        assert_eq!(case.case_number, "2024-CV-0042");
        assert!(case.team_id.is_none());
    }

    #[test]
    fn test_case_rejects_empty_number() {
        assert!(Case::new("  ", "Acme", "x").is_err());
    }

    #[test]
    fn test_case_status_roundtrip() {
        for status in [CaseStatus::Active, CaseStatus::Closed, CaseStatus::Archived] {
            let parsed: CaseStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }
}
