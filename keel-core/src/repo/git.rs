use std::path::{Path, PathBuf};

use git2::{
    Commit, ErrorCode, Index, IndexEntry, IndexTime, ObjectType, Oid, Repository, Signature,
    TreeWalkMode, TreeWalkResult,
};

use super::{validate_changes, Change, CommitId, CommitMeta, RepositoryStore};
use crate::error::{Error, Result};

const REF_PREFIX: &str = "refs/keel/projects/";

/// Identity recorded as committer on every commit.
#[derive(Debug, Clone)]
pub struct Committer {
    pub name: String,
    pub email: String,
}

impl Default for Committer {
    fn default() -> Self {
        Self {
            name: "keel".to_string(),
            email: "keel@localhost".to_string(),
        }
    }
}

/// Repository Store backed by a bare git repository.
///
/// Each project's history hangs off its own ref (`refs/keel/projects/<key>`)
/// whose tree is the project directory. Commits are assembled purely in the
/// object database from an in-memory index and published by a conditional
/// ref update, so no working tree is ever touched and a failed commit leaves
/// only unreachable objects behind.
///
/// `git2::Repository` is not `Sync`; a fresh handle is opened per call.
#[derive(Debug, Clone)]
pub struct GitStore {
    path: PathBuf,
    committer: Committer,
}

impl GitStore {
    /// Open the repository at `path`, initializing a bare one if missing.
    pub fn open(path: impl Into<PathBuf>, committer: Committer) -> Result<Self> {
        let path = path.into();
        if path.join("HEAD").exists() {
            Repository::open_bare(&path)?;
        } else {
            std::fs::create_dir_all(&path)
                .map_err(|e| Error::RepositoryUnavailable(e.to_string()))?;
            Repository::init_bare(&path)?;
            tracing::info!("Initialized repository at {}", path.display());
        }
        Ok(Self { path, committer })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn repo(&self) -> Result<Repository> {
        Ok(Repository::open_bare(&self.path)?)
    }

    fn ref_name(project_key: &str) -> String {
        format!("{REF_PREFIX}{project_key}")
    }

    fn current_oid(repo: &Repository, project_key: &str) -> Result<Option<Oid>> {
        match repo.find_reference(&Self::ref_name(project_key)) {
            Ok(reference) => Ok(reference.target()),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn find_commit<'r>(repo: &'r Repository, revision: &str) -> Result<Commit<'r>> {
        let oid = Oid::from_str(revision).map_err(|_| {
            Error::validation("revision", "id", format!("'{revision}' is not a commit id"))
        })?;
        match repo.find_commit(oid) {
            Ok(commit) => Ok(commit),
            Err(e) if e.code() == ErrorCode::NotFound => Err(Error::not_found("revision", revision)),
            Err(e) => Err(e.into()),
        }
    }

    /// A commit on the project's own history. Commits of other projects are
    /// reported as not found.
    fn project_commit<'r>(repo: &'r Repository, project_key: &str, revision: &str) -> Result<Commit<'r>> {
        let commit = Self::find_commit(repo, revision)?;
        let reachable = match Self::current_oid(repo, project_key)? {
            Some(head) => head == commit.id() || repo.graph_descendant_of(head, commit.id())?,
            None => false,
        };
        if !reachable {
            return Err(Error::not_found("revision", revision));
        }
        Ok(commit)
    }

    fn signature(&self, author: &str) -> Result<(Signature<'static>, Signature<'static>)> {
        let author_name = if author.trim().is_empty() {
            self.committer.name.as_str()
        } else {
            author
        };
        let author = Signature::now(author_name, &self.committer.email)?;
        let committer = Signature::now(&self.committer.name, &self.committer.email)?;
        Ok((author, committer))
    }
}

fn index_entry(path: &str, id: Oid, size: usize) -> IndexEntry {
    IndexEntry {
        ctime: IndexTime::new(0, 0),
        mtime: IndexTime::new(0, 0),
        dev: 0,
        ino: 0,
        mode: 0o100644,
        uid: 0,
        gid: 0,
        file_size: size as u32,
        id,
        flags: path.len().min(0xfff) as u16,
        flags_extended: 0,
        path: path.as_bytes().to_vec(),
    }
}

impl RepositoryStore for GitStore {
    fn head(&self, project_key: &str) -> Result<Option<CommitId>> {
        let repo = self.repo()?;
        Ok(Self::current_oid(&repo, project_key)?.map(|oid| oid.to_string()))
    }

    fn read_at(&self, project_key: &str, revision: &str, path: &str) -> Result<Option<Vec<u8>>> {
        let repo = self.repo()?;
        let tree = Self::project_commit(&repo, project_key, revision)?.tree()?;
        let entry = match tree.get_path(Path::new(path)) {
            Ok(entry) => entry,
            Err(e) if e.code() == ErrorCode::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if entry.kind() != Some(ObjectType::Blob) {
            return Ok(None);
        }
        let blob = repo.find_blob(entry.id())?;
        Ok(Some(blob.content().to_vec()))
    }

    fn list_at(&self, project_key: &str, revision: &str, prefix: &str) -> Result<Vec<String>> {
        let repo = self.repo()?;
        let tree = Self::project_commit(&repo, project_key, revision)?.tree()?;

        let mut paths = Vec::new();
        tree.walk(TreeWalkMode::PreOrder, |root, entry| {
            if entry.kind() == Some(ObjectType::Blob) {
                if let Some(name) = entry.name() {
                    let path = format!("{root}{name}");
                    if path.starts_with(prefix) {
                        paths.push(path);
                    }
                }
            }
            TreeWalkResult::Ok
        })?;
        paths.sort();
        Ok(paths)
    }

    fn write_and_commit(
        &self,
        project_key: &str,
        changes: &[Change],
        meta: &CommitMeta,
        base: Option<&str>,
    ) -> Result<CommitId> {
        validate_changes(changes)?;
        let repo = self.repo()?;

        let current = Self::current_oid(&repo, project_key)?;
        let current_str = current.map(|oid| oid.to_string());
        if current_str.as_deref() != base {
            return Err(Error::ConcurrentModification {
                project_key: project_key.to_string(),
                expected: base.unwrap_or("<none>").to_string(),
                actual: current_str.unwrap_or_else(|| "<none>".to_string()),
            });
        }

        let parent = current.map(|oid| repo.find_commit(oid)).transpose()?;

        let mut index = Index::new()?;
        if let Some(parent) = &parent {
            index.read_tree(&parent.tree()?)?;
        }

        for change in changes {
            match change {
                Change::Write { path, content } => {
                    let blob = repo.blob(content)?;
                    index.add(&index_entry(path, blob, content.len()))?;
                }
                Change::Delete { path } => {
                    if index.get_path(Path::new(path), 0).is_none() {
                        return Err(Error::not_found("file", format!("{project_key}:{path}")));
                    }
                    index.remove_path(Path::new(path))?;
                }
            }
        }

        let tree = repo.find_tree(index.write_tree_to(&repo)?)?;
        let (author, committer) = self.signature(&meta.author)?;
        let parents: Vec<&Commit> = parent.iter().collect();
        let oid = repo.commit(None, &author, &committer, &meta.message, &tree, &parents)?;

        // Publishing the ref is the commit point. Until then the new objects
        // are unreachable.
        let ref_name = Self::ref_name(project_key);
        let log_message = format!("keel: {}", meta.message.lines().next().unwrap_or_default());
        let published = match current {
            Some(expected) => repo.reference_matching(&ref_name, oid, true, expected, &log_message),
            None => repo.reference(&ref_name, oid, false, &log_message),
        };
        if let Err(e) = published {
            return Err(match e.code() {
                ErrorCode::Modified | ErrorCode::Exists | ErrorCode::Locked => {
                    Error::ConcurrentModification {
                        project_key: project_key.to_string(),
                        expected: base.unwrap_or("<none>").to_string(),
                        actual: Self::current_oid(&repo, project_key)
                            .ok()
                            .flatten()
                            .map(|oid| oid.to_string())
                            .unwrap_or_else(|| "<unknown>".to_string()),
                    }
                }
                _ => e.into(),
            });
        }

        tracing::debug!(
            project = project_key,
            commit = %oid,
            files = changes.len(),
            "Committed changes"
        );
        Ok(oid.to_string())
    }

    fn changed_paths(&self, project_key: &str, commit_id: &str) -> Result<Vec<String>> {
        let repo = self.repo()?;
        let commit = Self::project_commit(&repo, project_key, commit_id)?;
        let new_tree = commit.tree()?;
        let old_tree = match commit.parent_count() {
            0 => None,
            _ => Some(commit.parent(0)?.tree()?),
        };

        let diff = repo.diff_tree_to_tree(old_tree.as_ref(), Some(&new_tree), None)?;
        let mut paths: Vec<String> = diff
            .deltas()
            .filter_map(|delta| {
                delta
                    .new_file()
                    .path()
                    .or_else(|| delta.old_file().path())
                    .and_then(|p| p.to_str())
                    .map(str::to_string)
            })
            .collect();
        paths.sort();
        paths.dedup();
        Ok(paths)
    }

    fn parent(&self, project_key: &str, commit_id: &str) -> Result<Option<CommitId>> {
        let repo = self.repo()?;
        let commit = Self::project_commit(&repo, project_key, commit_id)?;
        Ok(commit.parent_ids().next().map(|oid| oid.to_string()))
    }

    fn projects(&self) -> Result<Vec<String>> {
        let repo = self.repo()?;
        let mut keys = Vec::new();
        for reference in repo.references_glob(&format!("{REF_PREFIX}*"))? {
            let reference = reference?;
            if let Some(key) = reference.name().and_then(|n| n.strip_prefix(REF_PREFIX)) {
                keys.push(key.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }
}
