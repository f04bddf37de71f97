use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The phase a project is in.
///
/// Projects start in `Initiating` and may only move along the pairs listed in
/// [`TRANSITIONS`]. `Closed` is terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    Initiating,
    Planning,
    Executing,
    Monitoring,
    Closing,
    Closed,
}

/// Every allowed (from, to) pair. Anything not listed is rejected.
pub const TRANSITIONS: &[(WorkflowState, WorkflowState)] = &[
    (WorkflowState::Initiating, WorkflowState::Planning),
    (WorkflowState::Planning, WorkflowState::Executing),
    (WorkflowState::Planning, WorkflowState::Initiating),
    (WorkflowState::Executing, WorkflowState::Monitoring),
    (WorkflowState::Executing, WorkflowState::Planning),
    (WorkflowState::Monitoring, WorkflowState::Executing),
    (WorkflowState::Monitoring, WorkflowState::Closing),
    (WorkflowState::Closing, WorkflowState::Closed),
];

impl WorkflowState {
    pub const ALL: [WorkflowState; 6] = [
        Self::Initiating,
        Self::Planning,
        Self::Executing,
        Self::Monitoring,
        Self::Closing,
        Self::Closed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initiating => "initiating",
            Self::Planning => "planning",
            Self::Executing => "executing",
            Self::Monitoring => "monitoring",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "initiating" => Some(Self::Initiating),
            "planning" => Some(Self::Planning),
            "executing" => Some(Self::Executing),
            "monitoring" => Some(Self::Monitoring),
            "closing" => Some(Self::Closing),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        Self::from_str(s).ok_or_else(|| {
            Error::validation(
                "workflow",
                "state",
                format!(
                    "unknown value '{s}', expected one of initiating, planning, executing, monitoring, closing, closed"
                ),
            )
        })
    }

    /// Targets reachable from this state in one step, in table order.
    pub fn successors(self) -> Vec<WorkflowState> {
        TRANSITIONS
            .iter()
            .filter(|(from, _)| *from == self)
            .map(|(_, to)| *to)
            .collect()
    }

    pub fn can_transition_to(self, to: WorkflowState) -> bool {
        TRANSITIONS.contains(&(self, to))
    }

    pub fn is_terminal(self) -> bool {
        self.successors().is_empty()
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted form of a project's workflow state (`workflow.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowRecord {
    pub state: WorkflowState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous: Option<WorkflowState>,
    pub entered_at: DateTime<Utc>,
    pub changed_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl WorkflowRecord {
    pub fn initial(actor: &str, at: DateTime<Utc>) -> Self {
        Self {
            state: WorkflowState::Initiating,
            previous: None,
            entered_at: at,
            changed_by: actor.to_string(),
            reason: None,
        }
    }
}

/// Input for a workflow transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionInput {
    pub to: WorkflowState,
    pub reason: Option<String>,
}

/// One past transition, reconstructed from the audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: WorkflowState,
    pub to: WorkflowState,
    pub actor: String,
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
    pub commit_id: Option<String>,
}
