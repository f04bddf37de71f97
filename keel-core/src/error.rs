//! Error taxonomy shared by every engine in the crate.
//!
//! Each rejection names the entity, the rule that was violated and, where one
//! exists, the expected value. Validation and rule errors are raised before
//! any write; infrastructure faults are surfaced unchanged.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed input. Detected before any write.
    #[error("invalid {entity}.{field}: {reason}")]
    Validation {
        entity: &'static str,
        field: &'static str,
        reason: String,
    },

    /// Workflow rule violation. Nothing was written.
    #[error("project {project_key}: transition {from} -> {to} is not allowed (allowed: {allowed})")]
    InvalidTransition {
        project_key: String,
        from: String,
        to: String,
        allowed: String,
    },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The project ref moved since the caller read it.
    #[error("project {project_key}: expected revision {expected}, found {actual}")]
    ConcurrentModification {
        project_key: String,
        expected: String,
        actual: String,
    },

    /// The proposal was computed against a revision that is no longer HEAD.
    #[error("proposal {proposal_id} is stale: computed against {base}, head is now {head}")]
    StaleProposal {
        proposal_id: String,
        base: String,
        head: String,
    },

    #[error("proposal {proposal_id} is already {status}")]
    ProposalClosed { proposal_id: String, status: String },

    #[error("repository unavailable: {0}")]
    RepositoryUnavailable(String),

    #[error("audit write failed after {attempts} attempts: {reason}")]
    AuditWriteFailure { attempts: u32, reason: String },

    #[error("content generator failed for {template_ref}: {reason}")]
    Generator { template_ref: String, reason: String },

    #[error("proposal index error: {0}")]
    Index(String),
}

impl Error {
    pub fn validation(entity: &'static str, field: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation {
            entity,
            field,
            reason: reason.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Stable machine-readable discriminator, used by the front layer.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation_error",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::NotFound { .. } => "not_found",
            Self::ConcurrentModification { .. } => "concurrent_modification",
            Self::StaleProposal { .. } => "stale_proposal",
            Self::ProposalClosed { .. } => "proposal_closed",
            Self::RepositoryUnavailable(_) => "repository_unavailable",
            Self::AuditWriteFailure { .. } => "audit_write_failure",
            Self::Generator { .. } => "generator_error",
            Self::Index(_) => "index_error",
        }
    }

    /// True when the caller should re-read state and retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConcurrentModification { .. } | Self::StaleProposal { .. }
        )
    }
}

impl From<git2::Error> for Error {
    fn from(e: git2::Error) -> Self {
        Self::RepositoryUnavailable(e.message().to_string())
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Self::Index(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::RepositoryUnavailable(format!("corrupt document: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_entity_and_rule() {
        let err = Error::InvalidTransition {
            project_key: "P1".into(),
            from: "planning".into(),
            to: "closed".into(),
            allowed: "executing, initiating".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("P1"));
        assert!(msg.contains("planning -> closed"));
        assert!(msg.contains("executing, initiating"));
        assert_eq!(err.kind(), "invalid_transition");
    }

    #[test]
    fn only_staleness_is_retryable() {
        assert!(Error::StaleProposal {
            proposal_id: "x".into(),
            base: "a".into(),
            head: "b".into()
        }
        .is_retryable());
        assert!(!Error::not_found("raid_item", "R-1").is_retryable());
    }
}
