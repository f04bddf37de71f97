//! Versioned project documents, phase workflow, RAID register and a
//! propose/apply change protocol over a git-backed store.
//!
//! [`Keel`] wires the pieces together. Every mutation commits to the
//! [`repo::RepositoryStore`] first and then appends to the [`audit::AuditLog`].

pub mod audit;
pub mod error;
mod locks;
pub mod models;
pub mod projects;
pub mod proposal;
pub mod raid;
pub mod repo;
mod shared;
pub mod workflow;
pub mod worktree;

use std::path::PathBuf;
use std::sync::Arc;

pub use error::{Error, Result};

use audit::{AuditConfig, AuditLog};
use models::{AuditEvent, AuditFilter};
use projects::ProjectRegistry;
use proposal::{ArtifactCatalog, ContentGenerator, ProposalEngine, ProposalIndex, TemplateGenerator};
use raid::RaidRegister;
use repo::{Committer, GitStore, RepositoryStore};
use shared::Shared;
use workflow::WorkflowEngine;
use worktree::Worktree;

/// Where and how [`Keel::open`] lays out its data directory.
#[derive(Debug, Clone)]
pub struct KeelConfig {
    pub data_dir: PathBuf,
    pub committer: Committer,
    pub audit: AuditConfig,
}

impl KeelConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            committer: Committer::default(),
            audit: AuditConfig::default(),
        }
    }
}

#[derive(Clone)]
pub struct Keel {
    shared: Arc<Shared>,
    projects: ProjectRegistry,
    workflow: WorkflowEngine,
    raid: RaidRegister,
    proposals: ProposalEngine,
}

impl Keel {
    /// Open (or initialise) a data directory:
    ///
    /// - `repo.git`: bare repository, one ref per project
    /// - `projects/<key>/`: the project's head tree (`project.json`,
    ///   `workflow.json`, `raid/<id>.json`, `artifacts/`) and `audit.jsonl`
    /// - `keel.db`: proposal index
    pub fn open(config: KeelConfig) -> Result<Self> {
        let projects_dir = config.data_dir.join("projects");
        let store: Arc<dyn RepositoryStore> =
            Arc::new(GitStore::open(config.data_dir.join("repo.git"), config.committer)?);
        let audit = AuditLog::new(&projects_dir, config.audit);
        let index = ProposalIndex::open(&config.data_dir.join("keel.db"))?;

        let worktree = Worktree::new(&projects_dir);
        for key in store.projects()? {
            worktree.rebuild(store.as_ref(), &key)?;
        }

        tracing::info!(data_dir = %config.data_dir.display(), "Opened keel data directory");
        Ok(Self::assemble(
            store,
            audit,
            Some(worktree),
            index,
            Arc::new(TemplateGenerator::builtin()),
        ))
    }

    /// Assemble from explicit parts, e.g. a [`repo::MemoryStore`] in tests
    /// or a custom generator. Project directories are not mirrored.
    pub fn with_parts(
        store: Arc<dyn RepositoryStore>,
        audit: AuditLog,
        index: ProposalIndex,
        generator: Arc<dyn ContentGenerator>,
    ) -> Self {
        Self::assemble(store, audit, None, index, generator)
    }

    fn assemble(
        store: Arc<dyn RepositoryStore>,
        audit: AuditLog,
        worktree: Option<Worktree>,
        index: ProposalIndex,
        generator: Arc<dyn ContentGenerator>,
    ) -> Self {
        let shared = Arc::new(Shared::new(store, audit, worktree));
        Self {
            projects: ProjectRegistry::new(shared.clone()),
            workflow: WorkflowEngine::new(shared.clone()),
            raid: RaidRegister::new(shared.clone()),
            proposals: ProposalEngine::new(shared.clone(), index, ArtifactCatalog::builtin(), generator),
            shared,
        }
    }

    pub fn projects(&self) -> &ProjectRegistry {
        &self.projects
    }

    pub fn workflow(&self) -> &WorkflowEngine {
        &self.workflow
    }

    pub fn raid(&self) -> &RaidRegister {
        &self.raid
    }

    pub fn proposals(&self) -> &ProposalEngine {
        &self.proposals
    }

    pub fn store(&self) -> &dyn RepositoryStore {
        self.shared.store.as_ref()
    }

    /// Audit events of a project, newest first.
    pub fn audit_query(
        &self,
        project_key: &str,
        filter: &AuditFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<AuditEvent>> {
        self.shared.require_project(project_key)?;
        self.shared.audit.query(project_key, filter, limit, offset)
    }

    /// File content at the project's current revision.
    pub fn read_file(&self, project_key: &str, path: &str) -> Result<Vec<u8>> {
        self.shared.require_project(project_key)?;
        self.shared.store.read(project_key, path)
    }

    pub fn list_files(&self, project_key: &str, prefix: &str) -> Result<Vec<String>> {
        self.shared.require_project(project_key)?;
        self.shared.store.list(project_key, prefix)
    }

    /// Unified diff a commit introduced.
    pub fn commit_diff(&self, project_key: &str, commit_id: &str) -> Result<String> {
        self.shared.require_project(project_key)?;
        self.shared.store.commit_diff(project_key, commit_id)
    }
}
