//! Plain-file copy of each project's current tree.
//!
//! `<root>/<key>/` mirrors the project head: `project.json`,
//! `workflow.json`, `raid/<id>.json` and `artifacts/`, next to the project's
//! `audit.jsonl`. The repository stays the source of truth; the mirror is
//! refreshed after every commit and rebuilt from the head on open.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::repo::{Change, RepositoryStore};

/// Files in a project directory that the repository does not own.
const UNMANAGED: &[&str] = &["audit.jsonl"];

#[derive(Debug, Clone)]
pub struct Worktree {
    root: PathBuf,
}

impl Worktree {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn dir_for(&self, project_key: &str) -> PathBuf {
        self.root.join(project_key)
    }

    /// Mirror the changes of a commit that has already been published.
    ///
    /// Failures are logged and leave the mirror to be rebuilt on next open.
    pub fn sync(&self, project_key: &str, changes: &[Change]) {
        let dir = self.dir_for(project_key);
        for change in changes {
            let path = dir.join(change.path());
            let outcome = match change.content() {
                Some(content) => write_file(&path, content),
                None => remove_file(&path),
            };
            if let Err(e) = outcome {
                tracing::error!(
                    project = project_key,
                    path = change.path(),
                    "Failed to update project directory: {}",
                    e
                );
            }
        }
    }

    /// Rewrite the project directory from the project's head.
    pub fn rebuild(&self, store: &dyn RepositoryStore, project_key: &str) -> Result<()> {
        let Some(head) = store.head(project_key)? else {
            return Ok(());
        };
        let dir = self.dir_for(project_key);
        let paths = store.list_at(project_key, &head, "")?;

        for path in &paths {
            if let Some(content) = store.read_at(project_key, &head, path)? {
                write_file(&dir.join(path), &content).map_err(unavailable)?;
            }
        }

        let keep: HashSet<PathBuf> = paths.iter().map(|p| dir.join(p)).collect();
        for file in files_under(&dir).map_err(unavailable)? {
            let unmanaged = file
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| UNMANAGED.contains(&n))
                && file.parent() == Some(dir.as_path());
            if !unmanaged && !keep.contains(&file) {
                remove_file(&file).map_err(unavailable)?;
            }
        }
        tracing::debug!(project = project_key, files = paths.len(), "Rebuilt project directory");
        Ok(())
    }
}

fn unavailable(e: io::Error) -> Error {
    Error::RepositoryUnavailable(e.to_string())
}

/// Write through a sibling temp file so readers never see half a document.
fn write_file(path: &Path, content: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, content)?;
    fs::rename(&tmp, path)
}

fn remove_file(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

fn files_under(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let entries = match fs::read_dir(&current) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                pending.push(entry.path());
            } else {
                files.push(entry.path());
            }
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::{CommitMeta, MemoryStore};

    #[test]
    fn sync_writes_and_removes_files() {
        let dir = tempfile::tempdir().unwrap();
        let worktree = Worktree::new(dir.path());

        worktree.sync("P1", &[Change::write("raid/R-1.json", "{}\n")]);
        assert_eq!(fs::read(dir.path().join("P1/raid/R-1.json")).unwrap(), b"{}\n");

        worktree.sync("P1", &[Change::delete("raid/R-1.json")]);
        assert!(!dir.path().join("P1/raid/R-1.json").exists());
    }

    #[test]
    fn rebuild_matches_head_and_keeps_the_audit_file() {
        let dir = tempfile::tempdir().unwrap();
        let worktree = Worktree::new(dir.path());
        let store = MemoryStore::new();
        store
            .write_and_commit(
                "P1",
                &[Change::write("project.json", "{}\n"), Change::write("raid/R-1.json", "{}\n")],
                &CommitMeta::new("m", "dana"),
                None,
            )
            .unwrap();

        fs::create_dir_all(dir.path().join("P1/raid")).unwrap();
        fs::write(dir.path().join("P1/raid/R-9.json"), "stale").unwrap();
        fs::write(dir.path().join("P1/audit.jsonl"), "{}\n").unwrap();

        worktree.rebuild(&store, "P1").unwrap();

        assert!(dir.path().join("P1/project.json").exists());
        assert!(dir.path().join("P1/raid/R-1.json").exists());
        assert!(!dir.path().join("P1/raid/R-9.json").exists());
        assert!(dir.path().join("P1/audit.jsonl").exists());
    }
}
