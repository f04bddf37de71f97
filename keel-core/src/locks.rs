use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// One mutex per project key.
///
/// Every mutating operation on a project runs inside [`ProjectLocks::with`],
/// from the moment it reads the current revision until its audit event is
/// written. Operations on different projects never wait on each other.
#[derive(Debug, Default)]
pub struct ProjectLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ProjectLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, project_key: &str) -> Arc<Mutex<()>> {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .entry(project_key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Run `f` while holding the project's lock.
    ///
    /// A panic in an earlier holder does not wedge the project: the lock
    /// protects no data of its own, so poisoning is ignored.
    pub fn with<T>(&self, project_key: &str, f: impl FnOnce() -> T) -> T {
        let handle = self.handle(project_key);
        let _guard = handle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn same_project_is_serialized() {
        let locks = Arc::new(ProjectLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let locks = locks.clone();
                let inside = inside.clone();
                let max_seen = max_seen.clone();
                thread::spawn(move || {
                    locks.with("P1", || {
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        thread::sleep(std::time::Duration::from_millis(2));
                        inside.fetch_sub(1, Ordering::SeqCst);
                    })
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn different_projects_do_not_share_a_lock() {
        let locks = ProjectLocks::new();
        let nested = locks.with("P1", || locks.with("P2", || 42));
        assert_eq!(nested, 42);
    }
}
