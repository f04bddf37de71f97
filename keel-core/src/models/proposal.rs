use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A computed, not yet committed set of file changes awaiting review.
///
/// Proposals capture the project revision they were computed against. Apply
/// only succeeds while that revision is still the project HEAD; otherwise the
/// caller must propose again. Status moves from `Pending` to `Applied` or
/// `Rejected` exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub proposal_id: Uuid,
    pub project_key: String,
    pub intent: String,
    /// HEAD at propose time. `None` only for a project with no commits.
    pub base_revision: Option<String>,
    pub file_changes: Vec<ProposedFileChange>,
    pub status: ProposalStatus,
    /// Set once applied.
    pub commit_id: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Proposal {
    /// Concatenated per-file diffs, in path order.
    pub fn combined_diff(&self) -> String {
        self.file_changes
            .iter()
            .map(|c| c.diff_from_current.as_str())
            .collect()
    }

    pub fn is_noop(&self) -> bool {
        self.file_changes.iter().all(|c| c.diff_from_current.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedFileChange {
    pub path: String,
    pub new_content: String,
    pub change_kind: ChangeKind,
    /// Unified diff against the file at the base revision.
    pub diff_from_current: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Modified,
    Unchanged,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Modified => "modified",
            Self::Unchanged => "unchanged",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "added" => Some(Self::Added),
            "modified" => Some(Self::Modified),
            "unchanged" => Some(Self::Unchanged),
            _ => None,
        }
    }
}

/// - `Pending`: awaiting apply or reject
/// - `Applied`: committed; `commit_id` is set
/// - `Rejected`: discarded without any repository write
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    Pending,
    Applied,
    Rejected,
}

impl ProposalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Applied => "applied",
            Self::Rejected => "rejected",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "applied" => Some(Self::Applied),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Input for proposing a generated artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposeInput {
    pub intent: String,
}

/// Input for proposing caller-edited content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposeEditInput {
    pub intent: String,
    pub edits: Vec<FileEdit>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEdit {
    pub path: String,
    pub content: String,
}

/// Result of applying a proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyOutcome {
    pub proposal_id: Uuid,
    pub commit_id: String,
    /// False when the proposal had already been applied earlier.
    pub newly_applied: bool,
}
