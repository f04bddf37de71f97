//! Per-project phase state machine.
//!
//! The only legal moves are the pairs in [`TRANSITIONS`]. A transition is
//! checked against the current state before anything is written; a rejected
//! transition leaves no commit and no audit event behind.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;

use crate::error::{Error, Result};
use crate::models::*;
use crate::repo::Change;
use crate::shared::{to_document, Shared, WORKFLOW_FILE};

const MAX_REASON_LEN: usize = 2000;

#[derive(Clone)]
pub struct WorkflowEngine {
    shared: Arc<Shared>,
}

impl WorkflowEngine {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    pub fn get_state(&self, project_key: &str) -> Result<WorkflowState> {
        Ok(self.record(project_key)?.state)
    }

    /// The full persisted record: state, previous state, who moved it and why.
    pub fn record(&self, project_key: &str) -> Result<WorkflowRecord> {
        let head = self.shared.require_project(project_key)?;
        load_workflow(&self.shared, project_key, &head)
    }

    pub fn allowed_transitions(&self, project_key: &str) -> Result<Vec<WorkflowState>> {
        Ok(self.get_state(project_key)?.successors())
    }

    /// Move the project to `to`.
    ///
    /// Commits the new `workflow.json` and records `workflow_state_changed`
    /// with from/to/actor/reason.
    pub fn transition(
        &self,
        project_key: &str,
        to: WorkflowState,
        actor: &Actor,
        reason: Option<String>,
    ) -> Result<WorkflowRecord> {
        actor.validate()?;
        let reason = reason.map(|r| r.trim().to_string()).filter(|r| !r.is_empty());
        if reason.as_ref().is_some_and(|r| r.len() > MAX_REASON_LEN) {
            return Err(Error::validation(
                "workflow",
                "reason",
                format!("must be at most {MAX_REASON_LEN} characters"),
            ));
        }

        let shared = &self.shared;
        shared.locks.with(project_key, || {
            let head = shared.require_project(project_key)?;
            let current = load_workflow(shared, project_key, &head)?;
            let from = current.state;

            if !from.can_transition_to(to) {
                let allowed = from.successors();
                tracing::warn!(
                    project = project_key,
                    from = from.as_str(),
                    to = to.as_str(),
                    "Rejected workflow transition"
                );
                return Err(Error::InvalidTransition {
                    project_key: project_key.to_string(),
                    from: from.to_string(),
                    to: to.to_string(),
                    allowed: if allowed.is_empty() {
                        "none, state is terminal".to_string()
                    } else {
                        allowed
                            .iter()
                            .map(|s| s.as_str())
                            .collect::<Vec<_>>()
                            .join(", ")
                    },
                });
            }

            let next = WorkflowRecord {
                state: to,
                previous: Some(from),
                entered_at: Utc::now(),
                changed_by: actor.name.clone(),
                reason: reason.clone(),
            };

            let mut message = format!("Move {project_key} from {from} to {to}");
            if let Some(reason) = &reason {
                message.push_str("\n\n");
                message.push_str(reason);
            }
            let commit = shared.commit(
                project_key,
                &[Change::write(WORKFLOW_FILE, to_document(&next)?)],
                message,
                &actor.name,
                Some(&head),
            )?;

            shared.audit.record(
                &AuditEvent::new(
                    AuditEventType::WorkflowStateChanged,
                    project_key,
                    &actor.name,
                    format!("{from} -> {to}"),
                )
                .with_resource(commit.clone())
                .with_correlation(actor.correlation_id.clone())
                .with_details(json!({
                    "from": from.as_str(),
                    "to": to.as_str(),
                    "actor": actor.name,
                    "reason": reason,
                })),
            );

            tracing::info!(project = project_key, %from, %to, commit = %commit, "Workflow transition");
            Ok(next)
        })
    }

    /// Past transitions, oldest first, as recorded in the audit trail.
    pub fn history(&self, project_key: &str) -> Result<Vec<TransitionRecord>> {
        self.shared.require_project(project_key)?;
        let records = self
            .shared
            .audit
            .events(project_key)?
            .into_iter()
            .filter(|e| e.event_type == AuditEventType::WorkflowStateChanged)
            .filter_map(|e| {
                let from = WorkflowState::from_str(e.details.get("from")?.as_str()?)?;
                let to = WorkflowState::from_str(e.details.get("to")?.as_str()?)?;
                Some(TransitionRecord {
                    from,
                    to,
                    actor: e.actor,
                    reason: e
                        .details
                        .get("reason")
                        .and_then(|r| r.as_str())
                        .map(str::to_string),
                    at: e.timestamp,
                    commit_id: e.resource_hash,
                })
            })
            .collect();
        Ok(records)
    }
}

pub(crate) fn load_workflow(
    shared: &Shared,
    project_key: &str,
    revision: &str,
) -> Result<WorkflowRecord> {
    shared
        .read_json(project_key, revision, WORKFLOW_FILE)?
        .ok_or_else(|| {
            Error::RepositoryUnavailable(format!(
                "project {project_key} has no {WORKFLOW_FILE} at {revision}"
            ))
        })
}
