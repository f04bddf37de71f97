use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A risk, assumption, issue or dependency tracked for a project.
///
/// Each item lives in its own file (`raid/<id>.json`) so every mutation is a
/// small, independently diffable commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaidItem {
    /// `<prefix>-<n>`, e.g. `R-3`. The number is never reused.
    pub id: String,
    #[serde(rename = "type")]
    pub item_type: RaidType,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub status: RaidStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    pub priority: Priority,
    /// 1 (negligible) to 5 (severe).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impact: Option<u8>,
    /// 1 (rare) to 5 (almost certain).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub likelihood: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RaidItem {
    /// Numeric part of the id, used for insertion ordering.
    pub fn sequence(&self) -> u64 {
        parse_sequence(&self.id).unwrap_or(u64::MAX)
    }

    /// impact x likelihood, when both are known.
    pub fn exposure(&self) -> Option<u8> {
        Some(self.impact? * self.likelihood?)
    }
}

pub(crate) fn parse_sequence(id: &str) -> Option<u64> {
    id.split_once('-').and_then(|(_, n)| n.parse().ok())
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RaidType {
    Risk,
    Assumption,
    Issue,
    Dependency,
}

impl RaidType {
    pub const ALL: [RaidType; 4] = [Self::Risk, Self::Assumption, Self::Issue, Self::Dependency];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Risk => "risk",
            Self::Assumption => "assumption",
            Self::Issue => "issue",
            Self::Dependency => "dependency",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "risk" => Some(Self::Risk),
            "assumption" => Some(Self::Assumption),
            "issue" => Some(Self::Issue),
            "dependency" => Some(Self::Dependency),
            _ => None,
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        Self::from_str(s).ok_or_else(|| {
            Error::validation(
                "raid_item",
                "type",
                format!("unknown value '{s}', expected one of risk, assumption, issue, dependency"),
            )
        })
    }

    pub fn id_prefix(&self) -> &'static str {
        match self {
            Self::Risk => "R",
            Self::Assumption => "A",
            Self::Issue => "I",
            Self::Dependency => "D",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RaidStatus {
    Open,
    InProgress,
    Resolved,
    Closed,
}

impl RaidStatus {
    pub const ALL: [RaidStatus; 4] = [Self::Open, Self::InProgress, Self::Resolved, Self::Closed];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::Resolved => "resolved",
            Self::Closed => "closed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "open" => Some(Self::Open),
            "in_progress" => Some(Self::InProgress),
            "resolved" => Some(Self::Resolved),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        Self::from_str(s).ok_or_else(|| {
            Error::validation(
                "raid_item",
                "status",
                format!("unknown value '{s}', expected one of open, in_progress, resolved, closed"),
            )
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        Self::from_str(s).ok_or_else(|| {
            Error::validation(
                "raid_item",
                "priority",
                format!("unknown value '{s}', expected one of low, medium, high, critical"),
            )
        })
    }
}

/// Input for creating a RAID item. `status` defaults to `Open`, `priority`
/// to `Medium`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRaidItemInput {
    #[serde(rename = "type")]
    pub item_type: RaidType,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<RaidStatus>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub impact: Option<u8>,
    #[serde(default)]
    pub likelihood: Option<u8>,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
}

impl CreateRaidItemInput {
    pub fn new(item_type: RaidType, title: impl Into<String>) -> Self {
        Self {
            item_type,
            title: title.into(),
            description: None,
            status: None,
            owner: None,
            priority: None,
            impact: None,
            likelihood: None,
            due_date: None,
        }
    }
}

/// Partial update. Fields left `None` keep their current value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateRaidItemInput {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<RaidStatus>,
    pub owner: Option<String>,
    pub priority: Option<Priority>,
    pub impact: Option<u8>,
    pub likelihood: Option<u8>,
    pub due_date: Option<NaiveDate>,
}

impl UpdateRaidItemInput {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.status.is_none()
            && self.owner.is_none()
            && self.priority.is_none()
            && self.impact.is_none()
            && self.likelihood.is_none()
            && self.due_date.is_none()
    }
}

/// Typed list filter. All set fields must match (logical AND).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RaidFilter {
    pub item_type: Option<RaidType>,
    pub status: Option<RaidStatus>,
    pub owner: Option<String>,
    pub priority: Option<Priority>,
}

impl RaidFilter {
    pub fn matches(&self, item: &RaidItem) -> bool {
        self.item_type.is_none_or(|t| item.item_type == t)
            && self.status.is_none_or(|s| item.status == s)
            && self.priority.is_none_or(|p| item.priority == p)
            && self
                .owner
                .as_deref()
                .is_none_or(|o| item.owner.as_deref() == Some(o))
    }
}

/// Untyped filter as it arrives from a caller (query string, CLI flags).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RaidQuery {
    #[serde(rename = "type")]
    pub item_type: Option<String>,
    pub status: Option<String>,
    pub owner: Option<String>,
    pub priority: Option<String>,
}

impl RaidQuery {
    /// Rejects values that are not enum members.
    pub fn into_filter(self) -> Result<RaidFilter> {
        Ok(RaidFilter {
            item_type: self.item_type.as_deref().map(RaidType::parse).transpose()?,
            status: self.status.as_deref().map(RaidStatus::parse).transpose()?,
            owner: self.owner,
            priority: self.priority.as_deref().map(Priority::parse).transpose()?,
        })
    }
}

/// Counts per type and status, used by generated reports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaidSummary {
    pub total: usize,
    pub open: usize,
    pub risks: usize,
    pub assumptions: usize,
    pub issues: usize,
    pub dependencies: usize,
    pub critical_open: usize,
}

impl RaidSummary {
    pub fn from_items(items: &[RaidItem]) -> Self {
        let mut summary = Self {
            total: items.len(),
            ..Self::default()
        };
        for item in items {
            match item.item_type {
                RaidType::Risk => summary.risks += 1,
                RaidType::Assumption => summary.assumptions += 1,
                RaidType::Issue => summary.issues += 1,
                RaidType::Dependency => summary.dependencies += 1,
            }
            let active = matches!(item.status, RaidStatus::Open | RaidStatus::InProgress);
            if active {
                summary.open += 1;
                if item.priority == Priority::Critical {
                    summary.critical_open += 1;
                }
            }
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, item_type: RaidType, status: RaidStatus, priority: Priority) -> RaidItem {
        let now = Utc::now();
        RaidItem {
            id: id.to_string(),
            item_type,
            title: id.to_string(),
            description: String::new(),
            status,
            owner: Some("dana".into()),
            priority,
            impact: Some(4),
            likelihood: Some(3),
            due_date: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn query_rejects_unknown_enum_values() {
        let err = RaidQuery {
            item_type: Some("rumour".into()),
            ..Default::default()
        }
        .into_filter()
        .unwrap_err();
        assert!(matches!(err, Error::Validation { field: "type", .. }));

        let err = RaidQuery {
            priority: Some("urgent".into()),
            ..Default::default()
        }
        .into_filter()
        .unwrap_err();
        assert!(matches!(err, Error::Validation { field: "priority", .. }));
    }

    #[test]
    fn filter_is_logical_and() {
        let risk = item("R-1", RaidType::Risk, RaidStatus::Open, Priority::High);
        let filter = RaidFilter {
            item_type: Some(RaidType::Risk),
            priority: Some(Priority::Low),
            ..Default::default()
        };
        assert!(!filter.matches(&risk));
        assert!(RaidFilter::default().matches(&risk));
    }

    #[test]
    fn sequence_and_exposure() {
        let risk = item("R-12", RaidType::Risk, RaidStatus::Open, Priority::High);
        assert_eq!(risk.sequence(), 12);
        assert_eq!(risk.exposure(), Some(12));
    }

    #[test]
    fn summary_counts_active_critical_items() {
        let items = vec![
            item("R-1", RaidType::Risk, RaidStatus::Open, Priority::Critical),
            item("I-2", RaidType::Issue, RaidStatus::Closed, Priority::Critical),
            item("D-3", RaidType::Dependency, RaidStatus::InProgress, Priority::Low),
        ];
        let summary = RaidSummary::from_items(&items);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.open, 2);
        assert_eq!(summary.critical_open, 1);
        assert_eq!(summary.issues, 1);
    }
}
