use std::sync::Arc;

use chrono::Utc;
use serde_json::json;

use crate::error::{Error, Result};
use crate::models::*;
use crate::repo::Change;
use crate::shared::{to_document, Shared, PROJECT_FILE, WORKFLOW_FILE};

const MAX_NAME_LEN: usize = 120;

/// Creates and looks up projects.
#[derive(Clone)]
pub struct ProjectRegistry {
    shared: Arc<Shared>,
}

impl ProjectRegistry {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Create a project in `Initiating`.
    ///
    /// Writes `project.json` and `workflow.json` in one commit, then records
    /// `project_created`.
    pub fn create(&self, input: CreateProjectInput, actor: &Actor) -> Result<Project> {
        actor.validate()?;
        validate_project_key(&input.key)?;
        let name = input.name.trim().to_string();
        if name.is_empty() || name.len() > MAX_NAME_LEN {
            return Err(Error::validation(
                "project",
                "name",
                format!("must be 1 to {MAX_NAME_LEN} characters"),
            ));
        }

        let shared = &self.shared;
        shared.locks.with(&input.key, || {
            if shared.store.head(&input.key)?.is_some() {
                return Err(Error::validation(
                    "project",
                    "key",
                    format!("project '{}' already exists", input.key),
                ));
            }

            let now = Utc::now();
            let project = Project {
                key: input.key.clone(),
                name,
                methodology: input.methodology,
                description: input.description.filter(|d| !d.trim().is_empty()),
                created_at: now,
                created_by: actor.name.clone(),
                raid_counter: 0,
            };
            let workflow = WorkflowRecord::initial(&actor.name, now);

            let commit = shared.commit(
                &project.key,
                &[
                    Change::write(PROJECT_FILE, to_document(&project)?),
                    Change::write(WORKFLOW_FILE, to_document(&workflow)?),
                ],
                format!("Create project {}", project.key),
                &actor.name,
                None,
            )?;

            shared.audit.record(
                &AuditEvent::new(
                    AuditEventType::ProjectCreated,
                    &project.key,
                    &actor.name,
                    format!("Created project {} ({})", project.key, project.name),
                )
                .with_resource(commit)
                .with_correlation(actor.correlation_id.clone())
                .with_details(json!({
                    "name": project.name,
                    "methodology": project.methodology.as_str(),
                    "state": workflow.state.as_str(),
                })),
            );

            Ok(project)
        })
    }

    pub fn get(&self, project_key: &str) -> Result<Project> {
        let head = self.shared.require_project(project_key)?;
        load_project(&self.shared, project_key, &head)
    }

    /// All projects, ordered by key.
    pub fn list(&self) -> Result<Vec<Project>> {
        let mut projects = Vec::new();
        for key in self.shared.store.projects()? {
            if let Some(head) = self.shared.store.head(&key)? {
                projects.push(load_project(&self.shared, &key, &head)?);
            }
        }
        Ok(projects)
    }
}

pub(crate) fn load_project(shared: &Shared, project_key: &str, revision: &str) -> Result<Project> {
    shared
        .read_json(project_key, revision, PROJECT_FILE)?
        .ok_or_else(|| {
            Error::RepositoryUnavailable(format!(
                "project {project_key} has no {PROJECT_FILE} at {revision}"
            ))
        })
}
