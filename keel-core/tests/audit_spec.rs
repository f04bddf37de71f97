use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use keel_core::audit::{AuditConfig, AuditLog};
use keel_core::models::*;
use keel_core::proposal::{ProposalIndex, TemplateGenerator};
use keel_core::repo::{MemoryStore, RepositoryStore};
use keel_core::{Error, Keel, KeelConfig};
use speculate2::speculate;

fn project_input(key: &str) -> CreateProjectInput {
    CreateProjectInput {
        key: key.to_string(),
        name: "Apollo".to_string(),
        methodology: Methodology::Predictive,
        description: None,
    }
}

fn event_at(summary: &str, offset_secs: i64) -> AuditEvent {
    let mut event = AuditEvent::new(AuditEventType::RaidItemUpdated, "P1", "sam", summary);
    event.timestamp = Utc::now() + ChronoDuration::seconds(offset_secs);
    event
}

speculate! {
    before {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let keel = Keel::open(KeelConfig::new(dir.path())).expect("Failed to open keel");
        let actor = Actor::new("dana").with_correlation("req-42");
        keel.projects().create(project_input("P1"), &actor).expect("Failed to create project");
    }

    describe "trail" {
        it "records who did what with the commit it produced" {
            let events = keel.audit_query("P1", &AuditFilter::default(), 10, 0).unwrap();
            assert_eq!(events.len(), 1);

            let created = &events[0];
            assert_eq!(created.event_type, AuditEventType::ProjectCreated);
            assert_eq!(created.actor, "dana");
            assert_eq!(created.correlation_id.as_deref(), Some("req-42"));
            assert_eq!(created.resource_hash, keel.store().head("P1").unwrap());
        }

        it "stores one JSON object per line" {
            keel.workflow().transition("P1", WorkflowState::Planning, &actor, None).unwrap();

            let text = std::fs::read_to_string(dir.path().join("projects/P1/audit.jsonl")).unwrap();
            let lines: Vec<&str> = text.lines().collect();
            assert_eq!(lines.len(), 2);
            for line in lines {
                let value: serde_json::Value = serde_json::from_str(line).unwrap();
                assert!(value.get("event_id").is_some());
                assert!(value.get("timestamp").is_some());
            }
        }
    }

    describe "query" {
        it "returns newest first regardless of insertion order" {
            let log = AuditLog::new(dir.path().join("scratch"), AuditConfig::default());
            log.append(&event_at("middle", 0)).unwrap();
            log.append(&event_at("newest", 60)).unwrap();
            log.append(&event_at("oldest", -60)).unwrap();

            let summaries: Vec<String> = log
                .query("P1", &AuditFilter::default(), 10, 0)
                .unwrap()
                .into_iter()
                .map(|e| e.payload_summary)
                .collect();
            assert_eq!(summaries, vec!["newest", "middle", "oldest"]);
        }

        it "filters by type, actor and time window" {
            keel.workflow().transition("P1", WorkflowState::Planning, &Actor::new("sam"), None).unwrap();

            let by_actor = AuditFilter {
                actor: Some("sam".into()),
                ..Default::default()
            };
            let events = keel.audit_query("P1", &by_actor, 10, 0).unwrap();
            assert_eq!(events.len(), 1);
            assert_eq!(events[0].event_type, AuditEventType::WorkflowStateChanged);

            let future = AuditFilter {
                since: Some(Utc::now() + ChronoDuration::hours(1)),
                ..Default::default()
            };
            assert!(keel.audit_query("P1", &future, 10, 0).unwrap().is_empty());
        }

        it "pages with limit and offset" {
            keel.workflow().transition("P1", WorkflowState::Planning, &actor, None).unwrap();
            keel.workflow().transition("P1", WorkflowState::Executing, &actor, None).unwrap();

            let page = keel.audit_query("P1", &AuditFilter::default(), 1, 1).unwrap();
            assert_eq!(page.len(), 1);
            assert_eq!(page[0].details["to"], "planning");
        }

        it "rejects an inverted time window" {
            let filter = AuditFilter {
                since: Some(Utc::now()),
                until: Some(Utc::now() - ChronoDuration::hours(1)),
                ..Default::default()
            };
            let err = keel.audit_query("P1", &filter, 10, 0).unwrap_err();
            assert!(matches!(err, Error::Validation { .. }));
        }
    }

    describe "failure" {
        it "keeps the commit when the audit write fails" {
            let blocker = dir.path().join("not-a-dir");
            std::fs::write(&blocker, b"file").unwrap();

            let broken = Keel::with_parts(
                Arc::new(MemoryStore::new()),
                AuditLog::new(
                    &blocker,
                    AuditConfig {
                        max_attempts: 2,
                        backoff: Duration::from_millis(1),
                    },
                ),
                ProposalIndex::open_memory().unwrap(),
                Arc::new(TemplateGenerator::builtin()),
            );

            broken.projects().create(project_input("P1"), &actor).unwrap();
            broken.workflow().transition("P1", WorkflowState::Planning, &actor, None).unwrap();

            assert_eq!(broken.workflow().get_state("P1").unwrap(), WorkflowState::Planning);
            let head = broken.store().head("P1").unwrap().unwrap();
            assert!(broken.store().parent("P1", &head).unwrap().is_some());
        }
    }
}
