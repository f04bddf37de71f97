use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::audit::AuditLog;
use crate::error::{Error, Result};
use crate::locks::ProjectLocks;
use crate::models::validate_project_key;
use crate::repo::{Change, CommitId, CommitMeta, RepositoryStore};
use crate::worktree::Worktree;

pub(crate) const PROJECT_FILE: &str = "project.json";
pub(crate) const WORKFLOW_FILE: &str = "workflow.json";
pub(crate) const RAID_DIR: &str = "raid/";
pub(crate) const ARTIFACT_DIR: &str = "artifacts/";

/// The store, audit log and lock table every engine mutates through.
pub(crate) struct Shared {
    pub store: Arc<dyn RepositoryStore>,
    pub audit: AuditLog,
    pub locks: ProjectLocks,
    pub worktree: Option<Worktree>,
}

impl Shared {
    pub fn new(store: Arc<dyn RepositoryStore>, audit: AuditLog, worktree: Option<Worktree>) -> Self {
        Self {
            store,
            audit,
            locks: ProjectLocks::new(),
            worktree,
        }
    }

    /// Current revision of an existing project.
    pub fn require_project(&self, project_key: &str) -> Result<CommitId> {
        validate_project_key(project_key)?;
        self.store
            .head(project_key)?
            .ok_or_else(|| Error::not_found("project", project_key))
    }

    pub fn read_json<T: DeserializeOwned>(
        &self,
        project_key: &str,
        revision: &str,
        path: &str,
    ) -> Result<Option<T>> {
        match self.store.read_at(project_key, revision, path)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn commit(
        &self,
        project_key: &str,
        changes: &[Change],
        message: String,
        actor: &str,
        base: Option<&str>,
    ) -> Result<CommitId> {
        let commit = self.store.write_and_commit(
            project_key,
            changes,
            &CommitMeta::new(message, actor),
            base,
        )?;
        tracing::info!(project = project_key, commit = %commit, actor, "Committed");
        if let Some(worktree) = &self.worktree {
            worktree.sync(project_key, changes);
        }
        Ok(commit)
    }
}

/// Pretty JSON with a trailing newline, so diffs stay line-oriented.
pub(crate) fn to_document<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec_pretty(value)?;
    bytes.push(b'\n');
    Ok(bytes)
}
