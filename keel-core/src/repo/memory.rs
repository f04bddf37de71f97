use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use sha2::{Digest, Sha256};

use super::{validate_changes, Change, CommitId, CommitMeta, RepositoryStore};
use crate::error::{Error, Result};

type Tree = BTreeMap<String, Vec<u8>>;

#[derive(Debug, Clone)]
struct MemCommit {
    project_key: String,
    parent: Option<CommitId>,
    tree: Tree,
}

#[derive(Debug, Default)]
struct Inner {
    heads: HashMap<String, CommitId>,
    commits: HashMap<CommitId, MemCommit>,
}

/// In-process Repository Store.
///
/// Keeps full snapshots per commit and derives content-addressed ids with
/// SHA-256, so it behaves like [`super::GitStore`] for every caller.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn commit_id(parent: Option<&str>, meta: &CommitMeta, tree: &Tree, seq: usize) -> CommitId {
        let mut hasher = Sha256::new();
        hasher.update(parent.unwrap_or_default().as_bytes());
        hasher.update(meta.message.as_bytes());
        hasher.update(meta.author.as_bytes());
        hasher.update(seq.to_le_bytes());
        for (path, content) in tree {
            hasher.update(path.as_bytes());
            hasher.update([0u8]);
            hasher.update(Sha256::digest(content));
        }
        format!("{:x}", hasher.finalize())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| Error::RepositoryUnavailable("memory store lock poisoned".to_string()))
    }
}

impl Inner {
    /// A commit on `project_key`'s history.
    fn commit(&self, project_key: &str, revision: &str) -> Result<&MemCommit> {
        self.commits
            .get(revision)
            .filter(|commit| commit.project_key == project_key)
            .ok_or_else(|| Error::not_found("revision", revision))
    }
}

impl RepositoryStore for MemoryStore {
    fn head(&self, project_key: &str) -> Result<Option<CommitId>> {
        Ok(self.lock()?.heads.get(project_key).cloned())
    }

    fn read_at(&self, project_key: &str, revision: &str, path: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.lock()?.commit(project_key, revision)?.tree.get(path).cloned())
    }

    fn list_at(&self, project_key: &str, revision: &str, prefix: &str) -> Result<Vec<String>> {
        let inner = self.lock()?;
        Ok(inner
            .commit(project_key, revision)?
            .tree
            .keys()
            .filter(|p| p.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn write_and_commit(
        &self,
        project_key: &str,
        changes: &[Change],
        meta: &CommitMeta,
        base: Option<&str>,
    ) -> Result<CommitId> {
        validate_changes(changes)?;
        let mut inner = self.lock()?;

        let current = inner.heads.get(project_key).cloned();
        if current.as_deref() != base {
            return Err(Error::ConcurrentModification {
                project_key: project_key.to_string(),
                expected: base.unwrap_or("<none>").to_string(),
                actual: current.unwrap_or_else(|| "<none>".to_string()),
            });
        }

        let mut tree = match &current {
            Some(rev) => inner.commit(project_key, rev)?.tree.clone(),
            None => Tree::new(),
        };
        for change in changes {
            match change {
                Change::Write { path, content } => {
                    tree.insert(path.clone(), content.clone());
                }
                Change::Delete { path } => {
                    if tree.remove(path).is_none() {
                        return Err(Error::not_found("file", format!("{project_key}:{path}")));
                    }
                }
            }
        }

        let id = Self::commit_id(current.as_deref(), meta, &tree, inner.commits.len());
        inner.commits.insert(
            id.clone(),
            MemCommit {
                project_key: project_key.to_string(),
                parent: current,
                tree,
            },
        );
        inner.heads.insert(project_key.to_string(), id.clone());
        Ok(id)
    }

    fn changed_paths(&self, project_key: &str, commit_id: &str) -> Result<Vec<String>> {
        let inner = self.lock()?;
        let commit = inner.commit(project_key, commit_id)?;
        let empty = Tree::new();
        let before = match &commit.parent {
            Some(p) => &inner.commit(project_key, p)?.tree,
            None => &empty,
        };

        let mut paths: Vec<String> = before
            .keys()
            .chain(commit.tree.keys())
            .filter(|p| before.get(*p) != commit.tree.get(*p))
            .cloned()
            .collect();
        paths.sort();
        paths.dedup();
        Ok(paths)
    }

    fn parent(&self, project_key: &str, commit_id: &str) -> Result<Option<CommitId>> {
        Ok(self.lock()?.commit(project_key, commit_id)?.parent.clone())
    }

    fn projects(&self) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self.lock()?.heads.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn behaves_like_a_versioned_store() {
        let store = MemoryStore::new();
        let meta = CommitMeta::new("m", "dana");
        let first = store
            .write_and_commit("P1", &[Change::write("a.md", "1\n")], &meta, None)
            .unwrap();
        let second = store
            .write_and_commit("P1", &[Change::delete("a.md"), Change::write("b.md", "2\n")], &meta, Some(&first))
            .unwrap();

        assert_ne!(first, second);
        assert_eq!(store.read_at("P1", &first, "a.md").unwrap(), Some(b"1\n".to_vec()));
        assert_eq!(store.read_at("P1", &second, "a.md").unwrap(), None);
        assert_eq!(
            store.changed_paths("P1", &second).unwrap(),
            vec!["a.md".to_string(), "b.md".to_string()]
        );
        assert_eq!(store.parent("P1", &second).unwrap(), Some(first));
    }

    #[test]
    fn revisions_belong_to_one_project() {
        let store = MemoryStore::new();
        let meta = CommitMeta::new("m", "dana");
        store
            .write_and_commit("P1", &[Change::write("a.md", "1\n")], &meta, None)
            .unwrap();
        let other = store
            .write_and_commit("P2", &[Change::write("b.md", "2\n")], &meta, None)
            .unwrap();

        assert!(matches!(
            store.read_at("P1", &other, "b.md"),
            Err(Error::NotFound { entity: "revision", .. })
        ));
        assert!(store.parent("P1", &other).is_err());
        assert_eq!(store.read_at("P2", &other, "b.md").unwrap(), Some(b"2\n".to_vec()));
    }
}
