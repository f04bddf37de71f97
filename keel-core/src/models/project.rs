use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Top-level organizational unit.
///
/// A project is created once and never deleted; its lifecycle is expressed
/// through the workflow state instead. The key is immutable and names both
/// the project ref in the repository and its audit file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub key: String,
    pub name: String,
    pub methodology: Methodology,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    /// Last number handed out to a RAID item. Ids are never reused.
    #[serde(default)]
    pub raid_counter: u64,
}

/// Delivery approach the project follows.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Methodology {
    Predictive,
    Agile,
    Hybrid,
}

impl Methodology {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Predictive => "predictive",
            Self::Agile => "agile",
            Self::Hybrid => "hybrid",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "predictive" => Some(Self::Predictive),
            "agile" => Some(Self::Agile),
            "hybrid" => Some(Self::Hybrid),
            _ => None,
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        Self::from_str(s).ok_or_else(|| {
            Error::validation(
                "project",
                "methodology",
                format!("unknown value '{s}', expected one of predictive, agile, hybrid"),
            )
        })
    }
}

/// Input for creating a new project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateProjectInput {
    pub key: String,
    pub name: String,
    pub methodology: Methodology,
    pub description: Option<String>,
}

/// Checks a project key: 2-32 ASCII letters, digits, `-` or `_`, starting
/// with a letter or digit.
pub fn validate_project_key(key: &str) -> Result<()> {
    let reject = |reason: &str| Err(Error::validation("project", "key", reason.to_string()));

    if key.len() < 2 || key.len() > 32 {
        return reject("must be 2 to 32 characters long");
    }
    if !key.starts_with(|c: char| c.is_ascii_alphanumeric()) {
        return reject("must start with a letter or digit");
    }
    if !key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return reject("may only contain letters, digits, '-' and '_'");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_keys() {
        assert!(validate_project_key("P1").is_ok());
        assert!(validate_project_key("apollo-2_b").is_ok());
    }

    #[test]
    fn rejects_bad_keys() {
        for key in ["P", "-lead", "has space", "../etc", "x".repeat(33).as_str()] {
            assert!(
                matches!(validate_project_key(key), Err(Error::Validation { field: "key", .. })),
                "{key} should be rejected"
            );
        }
    }

    #[test]
    fn methodology_parse_names_allowed_values() {
        let err = Methodology::parse("scrumfall").unwrap_err();
        assert!(err.to_string().contains("predictive, agile, hybrid"));
        assert_eq!(Methodology::parse("agile").unwrap(), Methodology::Agile);
    }
}
