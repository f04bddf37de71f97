//! Repository Store: versioned, diffable file storage per project.
//!
//! Every project owns an independent line of history. A commit replaces the
//! project's revision pointer in one compare-and-swap step, so a reader
//! always sees either the old tree or the new one, never a partial write.
//! Callers hand in the revision they based their changes on; if the pointer
//! has moved the commit fails with [`Error::ConcurrentModification`].
//!
//! [`GitStore`] is the production backend. [`MemoryStore`] keeps the same
//! contract in process memory.

mod diff;
mod git;
mod memory;

use std::collections::HashSet;

pub use diff::render_file_diff;
pub use git::{Committer, GitStore};
pub use memory::MemoryStore;

use crate::error::{Error, Result};

/// Hex id of a commit. Doubles as the project revision.
pub type CommitId = String;

/// One file operation inside an atomic commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    Write { path: String, content: Vec<u8> },
    Delete { path: String },
}

impl Change {
    pub fn write(path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self::Write {
            path: path.into(),
            content: content.into(),
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::Delete { path: path.into() }
    }

    pub fn path(&self) -> &str {
        match self {
            Self::Write { path, .. } | Self::Delete { path } => path,
        }
    }

    pub fn content(&self) -> Option<&[u8]> {
        match self {
            Self::Write { content, .. } => Some(content),
            Self::Delete { .. } => None,
        }
    }
}

/// Message and author attached to a commit.
#[derive(Debug, Clone)]
pub struct CommitMeta {
    pub message: String,
    pub author: String,
}

impl CommitMeta {
    pub fn new(message: impl Into<String>, author: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            author: author.into(),
        }
    }
}

pub trait RepositoryStore: Send + Sync {
    /// Current revision of the project, `None` before its first commit.
    fn head(&self, project_key: &str) -> Result<Option<CommitId>>;

    /// File content at a revision, `None` if the path does not exist there.
    fn read_at(&self, project_key: &str, revision: &str, path: &str) -> Result<Option<Vec<u8>>>;

    /// Paths starting with `prefix` at a revision, in lexicographic order.
    fn list_at(&self, project_key: &str, revision: &str, prefix: &str) -> Result<Vec<String>>;

    /// Apply all changes as one commit on top of `base`.
    ///
    /// Fails with [`Error::ConcurrentModification`] when `base` is not the
    /// project's current revision. On any failure the revision pointer is
    /// left untouched.
    fn write_and_commit(
        &self,
        project_key: &str,
        changes: &[Change],
        meta: &CommitMeta,
        base: Option<&str>,
    ) -> Result<CommitId>;

    /// Paths touched by a commit relative to its first parent, sorted.
    fn changed_paths(&self, project_key: &str, commit_id: &str) -> Result<Vec<String>>;

    /// First parent of a commit.
    fn parent(&self, project_key: &str, commit_id: &str) -> Result<Option<CommitId>>;

    /// Keys of every project that has at least one commit.
    fn projects(&self) -> Result<Vec<String>>;

    fn read(&self, project_key: &str, path: &str) -> Result<Vec<u8>> {
        validate_path(path)?;
        let Some(head) = self.head(project_key)? else {
            return Err(Error::not_found("project", project_key));
        };
        self.read_at(project_key, &head, path)?
            .ok_or_else(|| Error::not_found("file", format!("{project_key}:{path}")))
    }

    fn list(&self, project_key: &str, prefix: &str) -> Result<Vec<String>> {
        match self.head(project_key)? {
            Some(head) => self.list_at(project_key, &head, prefix),
            None => Ok(Vec::new()),
        }
    }

    /// Unified diff of `changes` against the current revision. Read-only.
    fn diff(&self, project_key: &str, changes: &[Change]) -> Result<String> {
        let head = self.head(project_key)?;
        self.diff_at(project_key, head.as_deref(), changes)
    }

    /// Unified diff of `changes` against a fixed revision, files in path
    /// order. `None` diffs against an empty tree.
    fn diff_at(&self, project_key: &str, revision: Option<&str>, changes: &[Change]) -> Result<String> {
        validate_changes(changes)?;

        let mut ordered: Vec<&Change> = changes.iter().collect();
        ordered.sort_by(|a, b| a.path().cmp(b.path()));

        let mut out = String::new();
        for change in ordered {
            let current = match revision {
                Some(rev) => self.read_at(project_key, rev, change.path())?,
                None => None,
            };
            out.push_str(&render_file_diff(
                change.path(),
                current.as_deref(),
                change.content(),
            ));
        }
        Ok(out)
    }

    /// Diff a commit introduced, rendered exactly like [`RepositoryStore::diff`].
    fn commit_diff(&self, project_key: &str, commit_id: &str) -> Result<String> {
        let parent = self.parent(project_key, commit_id)?;
        let mut out = String::new();
        for path in self.changed_paths(project_key, commit_id)? {
            let before = match &parent {
                Some(p) => self.read_at(project_key, p, &path)?,
                None => None,
            };
            let after = self.read_at(project_key, commit_id, &path)?;
            out.push_str(&render_file_diff(&path, before.as_deref(), after.as_deref()));
        }
        Ok(out)
    }
}

/// Checks that a path is relative, `/`-separated and free of `.`/`..`
/// segments.
pub fn validate_path(path: &str) -> Result<()> {
    let reject = |reason: &str| {
        Err(Error::validation(
            "file",
            "path",
            format!("'{path}' {reason}"),
        ))
    };

    if path.is_empty() {
        return reject("is empty");
    }
    if path.starts_with('/') || path.contains('\\') {
        return reject("must be a relative '/'-separated path");
    }
    if path.contains('\0') {
        return reject("contains a NUL byte");
    }
    for segment in path.split('/') {
        match segment {
            "" => return reject("contains an empty segment"),
            "." | ".." => return reject("must not contain '.' or '..' segments"),
            ".git" => return reject("must not touch '.git'"),
            _ => {}
        }
    }
    Ok(())
}

pub(crate) fn validate_changes(changes: &[Change]) -> Result<()> {
    if changes.is_empty() {
        return Err(Error::validation("commit", "changes", "no changes given"));
    }
    let mut seen = HashSet::new();
    for change in changes {
        validate_path(change.path())?;
        if !seen.insert(change.path()) {
            return Err(Error::validation(
                "commit",
                "changes",
                format!("path '{}' appears more than once", change.path()),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_escaping_paths() {
        for path in ["", "/etc/passwd", "a/../b", "./a", "a//b", ".git/config", "a\\b"] {
            assert!(validate_path(path).is_err(), "{path:?} should be rejected");
        }
        assert!(validate_path("raid/R-1.json").is_ok());
    }

    #[test]
    fn rejects_duplicate_paths_in_one_commit() {
        let changes = vec![Change::write("a.md", "x"), Change::delete("a.md")];
        assert!(matches!(
            validate_changes(&changes),
            Err(Error::Validation { field: "changes", .. })
        ));
        assert!(validate_changes(&[]).is_err());
    }
}
