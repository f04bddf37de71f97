//! Two-phase change protocol: propose, then apply or reject.
//!
//! `propose` captures the project's current revision, builds content and
//! diffs against it, and stores the result in the [`ProposalIndex`]. Nothing
//! touches the project tree until `apply`, which commits only if the
//! captured revision is still the project's head.

mod catalog;
mod generator;
mod index;

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

pub use catalog::{ArtifactCatalog, ArtifactFormat, ArtifactSchema, ArtifactTemplate};
pub use generator::{ContentGenerator, GenerationContext, TemplateGenerator};
pub use index::ProposalIndex;

use crate::error::{Error, Result};
use crate::models::*;
use crate::projects::load_project;
use crate::raid::load_items;
use crate::repo::{validate_path, Change};
use crate::shared::{Shared, ARTIFACT_DIR};
use crate::workflow::load_workflow;

const MAX_INTENT_LEN: usize = 120;

#[derive(Clone)]
pub struct ProposalEngine {
    shared: Arc<Shared>,
    index: ProposalIndex,
    catalog: Arc<ArtifactCatalog>,
    generator: Arc<dyn ContentGenerator>,
}

impl ProposalEngine {
    pub(crate) fn new(
        shared: Arc<Shared>,
        index: ProposalIndex,
        catalog: ArtifactCatalog,
        generator: Arc<dyn ContentGenerator>,
    ) -> Self {
        Self {
            shared,
            index,
            catalog: Arc::new(catalog),
            generator,
        }
    }

    pub fn catalog(&self) -> &ArtifactCatalog {
        &self.catalog
    }

    /// Generate the artifact for `intent` and store it as a pending proposal.
    pub fn propose(&self, project_key: &str, intent: &str, actor: &Actor) -> Result<Proposal> {
        actor.validate()?;
        let template = self.catalog.resolve(intent)?;

        let base = self.shared.require_project(project_key)?;
        let current = self
            .shared
            .store
            .read_at(project_key, &base, template.path)?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned());

        let context = GenerationContext {
            intent: intent.to_string(),
            project: load_project(&self.shared, project_key, &base)?,
            workflow: load_workflow(&self.shared, project_key, &base)?,
            raid_items: load_items(&self.shared, project_key, &base)?,
            current_content: current,
            revision: Some(base.clone()),
            requested_by: actor.name.clone(),
            generated_at: Utc::now(),
        };

        let content = self.generator.generate(template.template_ref, &context)?;
        template.schema.validate(template.path, &content)?;

        self.store_proposal(
            project_key,
            intent,
            &base,
            vec![(template.path.to_string(), content)],
            actor,
        )
    }

    /// Store caller-supplied artifact content as a pending proposal.
    pub fn propose_edit(&self, project_key: &str, input: ProposeEditInput, actor: &Actor) -> Result<Proposal> {
        actor.validate()?;
        let intent = validate_intent(&input.intent)?;
        if input.edits.is_empty() {
            return Err(Error::validation("proposal", "edits", "no edits given"));
        }

        let mut seen = HashSet::new();
        let mut files = Vec::with_capacity(input.edits.len());
        for edit in input.edits {
            validate_path(&edit.path)?;
            if !seen.insert(edit.path.clone()) {
                return Err(Error::validation(
                    "proposal",
                    "edits",
                    format!("path '{}' appears more than once", edit.path),
                ));
            }
            if !edit.path.starts_with(ARTIFACT_DIR) {
                return Err(Error::validation(
                    "proposal",
                    "path",
                    format!("'{}' is outside {ARTIFACT_DIR}", edit.path),
                ));
            }
            self.catalog.schema_for_path(&edit.path).validate(&edit.path, &edit.content)?;
            files.push((edit.path, edit.content));
        }

        let base = self.shared.require_project(project_key)?;
        self.store_proposal(project_key, &intent, &base, files, actor)
    }

    fn store_proposal(
        &self,
        project_key: &str,
        intent: &str,
        base: &str,
        mut files: Vec<(String, String)>,
        actor: &Actor,
    ) -> Result<Proposal> {
        files.sort_by(|a, b| a.0.cmp(&b.0));

        let mut file_changes = Vec::with_capacity(files.len());
        for (path, content) in files {
            let change = Change::write(path.clone(), content.clone().into_bytes());
            let diff = self.shared.store.diff_at(project_key, Some(base), &[change])?;
            let change_kind = if diff.is_empty() {
                ChangeKind::Unchanged
            } else if self.shared.store.read_at(project_key, base, &path)?.is_none() {
                ChangeKind::Added
            } else {
                ChangeKind::Modified
            };
            file_changes.push(ProposedFileChange {
                path,
                new_content: content,
                change_kind,
                diff_from_current: diff,
            });
        }

        let proposal = Proposal {
            proposal_id: Uuid::new_v4(),
            project_key: project_key.to_string(),
            intent: intent.to_string(),
            base_revision: Some(base.to_string()),
            file_changes,
            status: ProposalStatus::Pending,
            commit_id: None,
            created_by: actor.name.clone(),
            created_at: Utc::now(),
            resolved_at: None,
        };
        self.index.insert(&proposal)?;

        tracing::info!(
            project = project_key,
            proposal = %proposal.proposal_id,
            intent,
            files = proposal.file_changes.len(),
            "Proposed changes"
        );
        Ok(proposal)
    }

    pub fn get(&self, project_key: &str, proposal_id: Uuid) -> Result<Proposal> {
        self.shared.require_project(project_key)?;
        self.index
            .get(project_key, proposal_id)?
            .ok_or_else(|| Error::not_found("proposal", proposal_id.to_string()))
    }

    /// Newest first, optionally only those in `status`.
    pub fn list(&self, project_key: &str, status: Option<ProposalStatus>) -> Result<Vec<Proposal>> {
        self.shared.require_project(project_key)?;
        self.index.list(project_key, status)
    }

    /// Commit a pending proposal.
    ///
    /// Applying an already applied proposal returns its original commit id.
    /// Fails with [`Error::StaleProposal`] once the project has moved past the
    /// proposal's base revision.
    pub fn apply(&self, project_key: &str, proposal_id: Uuid, actor: &Actor) -> Result<ApplyOutcome> {
        actor.validate()?;
        let shared = &self.shared;
        shared.locks.with(project_key, || {
            let head = shared.require_project(project_key)?;
            let proposal = self
                .index
                .get(project_key, proposal_id)?
                .ok_or_else(|| Error::not_found("proposal", proposal_id.to_string()))?;

            match proposal.status {
                ProposalStatus::Applied => {
                    let commit_id = proposal.commit_id.ok_or_else(|| {
                        Error::Index(format!("applied proposal {proposal_id} has no commit id"))
                    })?;
                    tracing::debug!(proposal = %proposal_id, commit = %commit_id, "Proposal already applied");
                    return Ok(ApplyOutcome {
                        proposal_id,
                        commit_id,
                        newly_applied: false,
                    });
                }
                ProposalStatus::Rejected => {
                    return Err(Error::ProposalClosed {
                        proposal_id: proposal_id.to_string(),
                        status: proposal.status.as_str().to_string(),
                    });
                }
                ProposalStatus::Pending => {}
            }

            let base = proposal.base_revision.clone().unwrap_or_default();
            if base != head {
                tracing::warn!(project = project_key, proposal = %proposal_id, %base, %head, "Stale proposal");
                return Err(Error::StaleProposal {
                    proposal_id: proposal_id.to_string(),
                    base,
                    head,
                });
            }
            if proposal.is_noop() {
                return Err(Error::validation(
                    "proposal",
                    "file_changes",
                    "proposal changes nothing at the current revision",
                ));
            }

            let changes: Vec<Change> = proposal
                .file_changes
                .iter()
                .filter(|c| c.change_kind != ChangeKind::Unchanged)
                .map(|c| Change::write(c.path.clone(), c.new_content.clone().into_bytes()))
                .collect();
            let message = format!(
                "Apply {} to {project_key}\n\nProposal-Id: {proposal_id}",
                proposal.intent
            );
            let commit_id = shared.commit(project_key, &changes, message, &actor.name, Some(&head))?;

            let paths: Vec<&str> = changes.iter().map(Change::path).collect();
            shared.audit.record(
                &AuditEvent::new(
                    AuditEventType::CommandApplied,
                    project_key,
                    &actor.name,
                    format!("Applied {} ({} file(s))", proposal.intent, paths.len()),
                )
                .with_resource(commit_id.clone())
                .with_correlation(actor.correlation_id.clone())
                .with_details(json!({
                    "proposal_id": proposal_id.to_string(),
                    "intent": proposal.intent,
                    "paths": paths,
                    "base_revision": base,
                })),
            );

            // The commit stands from here on; the index only mirrors it.
            match self.index.mark_applied(proposal_id, &commit_id, Utc::now()) {
                Ok(true) => {}
                Ok(false) => tracing::error!(
                    proposal = %proposal_id,
                    commit = %commit_id,
                    "Committed proposal but it was no longer pending in the index"
                ),
                Err(e) => tracing::error!(
                    proposal = %proposal_id,
                    commit = %commit_id,
                    "Committed proposal but could not mark it applied: {}",
                    e
                ),
            }

            Ok(ApplyOutcome {
                proposal_id,
                commit_id,
                newly_applied: true,
            })
        })
    }

    /// Discard a pending proposal. No repository write.
    pub fn reject(&self, project_key: &str, proposal_id: Uuid, actor: &Actor) -> Result<Proposal> {
        actor.validate()?;
        let shared = &self.shared;
        shared.locks.with(project_key, || {
            shared.require_project(project_key)?;
            let proposal = self
                .index
                .get(project_key, proposal_id)?
                .ok_or_else(|| Error::not_found("proposal", proposal_id.to_string()))?;

            match proposal.status {
                ProposalStatus::Rejected => return Ok(proposal),
                ProposalStatus::Applied => {
                    return Err(Error::ProposalClosed {
                        proposal_id: proposal_id.to_string(),
                        status: proposal.status.as_str().to_string(),
                    });
                }
                ProposalStatus::Pending => {}
            }

            let now = Utc::now();
            if !self.index.mark_rejected(proposal_id, now)? {
                return Err(Error::Index(format!(
                    "proposal {proposal_id} changed status while being rejected"
                )));
            }

            shared.audit.record(
                &AuditEvent::new(
                    AuditEventType::CommandRejected,
                    project_key,
                    &actor.name,
                    format!("Rejected {}", proposal.intent),
                )
                .with_correlation(actor.correlation_id.clone())
                .with_details(json!({
                    "proposal_id": proposal_id.to_string(),
                    "intent": proposal.intent,
                })),
            );

            Ok(Proposal {
                status: ProposalStatus::Rejected,
                resolved_at: Some(now),
                ..proposal
            })
        })
    }
}

fn validate_intent(intent: &str) -> Result<String> {
    let intent = intent.trim();
    if intent.is_empty() || intent.len() > MAX_INTENT_LEN {
        return Err(Error::validation(
            "proposal",
            "intent",
            format!("must be 1 to {MAX_INTENT_LEN} characters"),
        ));
    }
    Ok(intent.to_string())
}
