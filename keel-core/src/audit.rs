//! Append-only audit trail, one JSON-lines file per project.
//!
//! Records are only ever appended; nothing rewrites or reorders existing
//! lines. Readers stream the file line by line and skip lines they cannot
//! parse.

use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::locks::ProjectLocks;
use crate::models::{AuditEvent, AuditFilter};

const AUDIT_FILE: &str = "audit.jsonl";

#[derive(Debug, Clone)]
pub struct AuditConfig {
    /// Attempts per append, including the first.
    pub max_attempts: u32,
    /// Delay before retry `n` is `n * backoff`.
    pub backoff: Duration,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(25),
        }
    }
}

#[derive(Debug)]
pub struct AuditLog {
    root: PathBuf,
    config: AuditConfig,
    writers: ProjectLocks,
}

impl AuditLog {
    /// `root` holds one directory per project.
    pub fn new(root: impl Into<PathBuf>, config: AuditConfig) -> Self {
        Self {
            root: root.into(),
            config,
            writers: ProjectLocks::new(),
        }
    }

    pub fn path_for(&self, project_key: &str) -> PathBuf {
        self.root.join(project_key).join(AUDIT_FILE)
    }

    /// Append one event, retrying transient failures.
    pub fn append(&self, event: &AuditEvent) -> Result<()> {
        let mut line = serde_json::to_string(event)?;
        line.push('\n');
        let path = self.path_for(&event.project_key);

        let attempts = self.config.max_attempts.max(1);
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            match self.write_line(&event.project_key, &path, line.as_bytes()) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::warn!(
                        project = %event.project_key,
                        event_id = %event.event_id,
                        attempt,
                        "Audit append failed: {}",
                        e
                    );
                    last_error = e.to_string();
                    if attempt < attempts {
                        std::thread::sleep(self.config.backoff * attempt);
                    }
                }
            }
        }

        Err(Error::AuditWriteFailure {
            attempts,
            reason: last_error,
        })
    }

    /// Append after a state change has already been committed.
    ///
    /// The commit stands no matter what happens here; an event that could not
    /// be written is logged in full so it can be replayed.
    pub fn record(&self, event: &AuditEvent) {
        if let Err(e) = self.append(event) {
            tracing::error!(
                project = %event.project_key,
                event = %serde_json::to_string(event).unwrap_or_default(),
                "Audit event lost after commit: {}",
                e
            );
        }
    }

    fn write_line(&self, project_key: &str, path: &Path, line: &[u8]) -> std::io::Result<()> {
        self.writers.with(project_key, || {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut file = OpenOptions::new().create(true).append(true).open(path)?;
            file.write_all(line)?;
            file.flush()
        })
    }

    /// Every readable event for a project, in insertion order.
    pub fn events(&self, project_key: &str) -> Result<Vec<AuditEvent>> {
        let path = self.path_for(project_key);
        let file = match fs::File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::RepositoryUnavailable(e.to_string())),
        };

        let mut events = Vec::new();
        for (number, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| Error::RepositoryUnavailable(e.to_string()))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AuditEvent>(&line) {
                Ok(event) => events.push(event),
                Err(e) => {
                    tracing::warn!(
                        project = project_key,
                        line = number + 1,
                        "Skipping unreadable audit record: {}",
                        e
                    );
                }
            }
        }
        Ok(events)
    }

    /// Matching events, newest first. Events with equal timestamps come out
    /// in reverse insertion order.
    pub fn query(
        &self,
        project_key: &str,
        filter: &AuditFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<AuditEvent>> {
        filter.validate()?;

        let mut matching: Vec<(usize, AuditEvent)> = self
            .events(project_key)?
            .into_iter()
            .enumerate()
            .filter(|(_, event)| filter.matches(event))
            .collect();

        matching.sort_by(|(ia, a), (ib, b)| b.timestamp.cmp(&a.timestamp).then(ib.cmp(ia)));

        Ok(matching
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|(_, event)| event)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AuditEventType;
    use chrono::{Duration as ChronoDuration, Utc};

    fn log() -> (tempfile::TempDir, AuditLog) {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(
            dir.path(),
            AuditConfig {
                max_attempts: 2,
                backoff: Duration::from_millis(1),
            },
        );
        (dir, log)
    }

    fn event(summary: &str, offset_secs: i64) -> AuditEvent {
        let mut event = AuditEvent::new(AuditEventType::RaidItemCreated, "P1", "dana", summary);
        event.timestamp = Utc::now() + ChronoDuration::seconds(offset_secs);
        event
    }

    #[test]
    fn query_is_newest_first_regardless_of_insertion_order() {
        let (_dir, log) = log();
        log.append(&event("middle", 0)).unwrap();
        log.append(&event("oldest", -60)).unwrap();
        log.append(&event("newest", 60)).unwrap();

        let summaries: Vec<_> = log
            .query("P1", &AuditFilter::default(), 10, 0)
            .unwrap()
            .into_iter()
            .map(|e| e.payload_summary)
            .collect();
        assert_eq!(summaries, vec!["newest", "middle", "oldest"]);
    }

    #[test]
    fn equal_timestamps_come_out_latest_inserted_first() {
        let (_dir, log) = log();
        let first = event("first", 0);
        let mut second = event("second", 0);
        second.timestamp = first.timestamp;
        log.append(&first).unwrap();
        log.append(&second).unwrap();

        let events = log.query("P1", &AuditFilter::default(), 10, 0).unwrap();
        assert_eq!(events[0].payload_summary, "second");
        assert_eq!(events[1].payload_summary, "first");
    }

    #[test]
    fn limit_and_offset_page_through_results() {
        let (_dir, log) = log();
        for i in 0..5 {
            log.append(&event(&format!("e{i}"), i)).unwrap();
        }
        let page = log.query("P1", &AuditFilter::default(), 2, 1).unwrap();
        let summaries: Vec<_> = page.into_iter().map(|e| e.payload_summary).collect();
        assert_eq!(summaries, vec!["e3", "e2"]);
    }

    #[test]
    fn corrupt_lines_are_skipped() {
        let (_dir, log) = log();
        log.append(&event("good", 0)).unwrap();
        let mut file = OpenOptions::new()
            .append(true)
            .open(log.path_for("P1"))
            .unwrap();
        file.write_all(b"{not json\n").unwrap();
        log.append(&event("also good", 1)).unwrap();

        assert_eq!(log.events("P1").unwrap().len(), 2);
    }

    #[test]
    fn append_reports_failure_after_bounded_retries() {
        let (_dir, log) = log();
        // A directory where the file should be makes every open fail.
        fs::create_dir_all(log.path_for("P1")).unwrap();

        let err = log.append(&event("lost", 0)).unwrap_err();
        assert!(matches!(err, Error::AuditWriteFailure { attempts: 2, .. }));
    }

    #[test]
    fn appends_to_one_project_do_not_wait_on_another() {
        let (_dir, log) = log();
        let mut other = event("other project", 0);
        other.project_key = "P2".to_string();

        log.writers.with("P1", || log.append(&other)).unwrap();

        assert_eq!(log.events("P2").unwrap().len(), 1);
    }

    #[test]
    fn concurrent_appends_stay_whole_lines() {
        let (_dir, log) = log();
        std::thread::scope(|scope| {
            for t in 0..4 {
                let log = &log;
                scope.spawn(move || {
                    for i in 0..25 {
                        log.append(&event(&format!("t{t}-{i}"), 0)).unwrap();
                    }
                });
            }
        });

        assert_eq!(log.events("P1").unwrap().len(), 100);
    }
}
