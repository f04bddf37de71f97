use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// An append-only record of one completed mutating action.
///
/// Events are written one per line to the project's audit file and are never
/// rewritten or removed. `resource_hash` holds the commit id the action
/// produced, when there was one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: Uuid,
    pub event_type: AuditEventType,
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    pub project_key: String,
    pub payload_summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_hash: Option<String>,
    /// Structured payload, e.g. from/to/reason for a transition.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub details: serde_json::Value,
}

impl AuditEvent {
    pub fn new(
        event_type: AuditEventType,
        project_key: &str,
        actor: &str,
        payload_summary: impl Into<String>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type,
            timestamp: Utc::now(),
            actor: actor.to_string(),
            correlation_id: None,
            project_key: project_key.to_string(),
            payload_summary: payload_summary.into(),
            resource_hash: None,
            details: serde_json::Value::Null,
        }
    }

    pub fn with_resource(mut self, hash: impl Into<String>) -> Self {
        self.resource_hash = Some(hash.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    pub fn with_correlation(mut self, correlation_id: Option<String>) -> Self {
        self.correlation_id = correlation_id;
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    ProjectCreated,
    WorkflowStateChanged,
    RaidItemCreated,
    RaidItemUpdated,
    RaidItemDeleted,
    CommandApplied,
    CommandRejected,
}

impl AuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProjectCreated => "project_created",
            Self::WorkflowStateChanged => "workflow_state_changed",
            Self::RaidItemCreated => "raid_item_created",
            Self::RaidItemUpdated => "raid_item_updated",
            Self::RaidItemDeleted => "raid_item_deleted",
            Self::CommandApplied => "command_applied",
            Self::CommandRejected => "command_rejected",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "project_created" => Some(Self::ProjectCreated),
            "workflow_state_changed" => Some(Self::WorkflowStateChanged),
            "raid_item_created" => Some(Self::RaidItemCreated),
            "raid_item_updated" => Some(Self::RaidItemUpdated),
            "raid_item_deleted" => Some(Self::RaidItemDeleted),
            "command_applied" => Some(Self::CommandApplied),
            "command_rejected" => Some(Self::CommandRejected),
            _ => None,
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        Self::from_str(s).ok_or_else(|| {
            Error::validation("audit_query", "event_type", format!("unknown event type '{s}'"))
        })
    }
}

/// Query filter for the audit log. Bounds are inclusive.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub event_type: Option<AuditEventType>,
    pub actor: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl AuditFilter {
    pub fn matches(&self, event: &AuditEvent) -> bool {
        self.event_type.is_none_or(|t| event.event_type == t)
            && self.actor.as_deref().is_none_or(|a| event.actor == a)
            && self.since.is_none_or(|s| event.timestamp >= s)
            && self.until.is_none_or(|u| event.timestamp <= u)
    }

    pub fn validate(&self) -> Result<()> {
        if let (Some(since), Some(until)) = (self.since, self.until) {
            if since > until {
                return Err(Error::validation(
                    "audit_query",
                    "since",
                    format!("since ({since}) is after until ({until})"),
                ));
            }
        }
        Ok(())
    }
}

/// Who is acting, and on behalf of which request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub name: String,
    pub correlation_id: Option<String>,
}

impl Actor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            correlation_id: None,
        }
    }

    pub fn with_correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::validation("actor", "name", "must not be empty"));
        }
        Ok(())
    }
}

impl From<&str> for Actor {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_one_line_with_snake_case_type() {
        let event = AuditEvent::new(AuditEventType::RaidItemCreated, "P1", "dana", "created R-1")
            .with_resource("abc123");
        let line = serde_json::to_string(&event).unwrap();
        assert!(!line.contains('\n'));
        assert!(line.contains("\"event_type\":\"raid_item_created\""));
        assert!(!line.contains("details"));

        let back: AuditEvent = serde_json::from_str(&line).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn inverted_range_is_rejected() {
        let now = Utc::now();
        let filter = AuditFilter {
            since: Some(now),
            until: Some(now - chrono::Duration::hours(1)),
            ..Default::default()
        };
        assert!(filter.validate().is_err());
    }
}
