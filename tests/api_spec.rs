use axum::http::StatusCode;
use axum_test::TestServer;
use keel::api::create_router;
use keel::api::middleware::SecurityConfig;
use keel_core::models::*;
use keel_core::{Keel, KeelConfig};
use serde_json::{json, Value};

fn setup_with(security: SecurityConfig) -> (tempfile::TempDir, TestServer) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let keel = Keel::open(KeelConfig::new(dir.path())).expect("Failed to open keel");
    let app = create_router(keel, security);
    let server = TestServer::new(app).expect("Failed to create test server");
    (dir, server)
}

fn setup() -> (tempfile::TempDir, TestServer) {
    setup_with(SecurityConfig::disabled())
}

async fn create_test_project(server: &TestServer, key: &str) -> Project {
    server
        .post("/api/v1/projects")
        .add_header("x-keel-actor", "dana")
        .json(&json!({ "key": key, "name": "Apollo", "methodology": "agile" }))
        .await
        .json::<Project>()
}

mod projects {
    use super::*;

    #[tokio::test]
    async fn creates_and_fetches_a_project() {
        let (_dir, server) = setup();
        let created = create_test_project(&server, "P1").await;
        assert_eq!(created.key, "P1");
        assert_eq!(created.methodology, Methodology::Agile);

        let response = server.get("/api/v1/projects/P1").await;
        response.assert_status_ok();
        assert_eq!(response.json::<Project>(), created);

        let all: Vec<Project> = server.get("/api/v1/projects").await.json();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn requires_an_actor_for_mutations() {
        let (_dir, server) = setup();
        let response = server
            .post("/api/v1/projects")
            .json(&json!({ "key": "P1", "name": "Apollo", "methodology": "agile" }))
            .await;

        response.assert_status(StatusCode::BAD_REQUEST);
        let body: Value = response.json();
        assert_eq!(body["kind"], "validation_error");
    }

    #[tokio::test]
    async fn returns_structured_not_found() {
        let (_dir, server) = setup();
        let response = server.get("/api/v1/projects/NOPE").await;

        response.assert_status(StatusCode::NOT_FOUND);
        let body: Value = response.json();
        assert_eq!(body["kind"], "not_found");
        assert_eq!(body["entity"], "project");
        assert_eq!(body["id"], "NOPE");
    }
}

mod workflow {
    use super::*;

    #[tokio::test]
    async fn transitions_and_reports_allowed_moves() {
        let (_dir, server) = setup();
        create_test_project(&server, "P1").await;

        let response = server
            .post("/api/v1/projects/P1/workflow/transitions")
            .add_header("x-keel-actor", "dana")
            .json(&json!({ "to": "planning", "reason": "charter signed" }))
            .await;
        response.assert_status_ok();

        let view: Value = server.get("/api/v1/projects/P1/workflow").await.json();
        assert_eq!(view["state"], "planning");
        assert_eq!(view["allowed_transitions"], json!(["initiating", "executing"]));
    }

    #[tokio::test]
    async fn rejects_illegal_transitions_with_allowed_list() {
        let (_dir, server) = setup();
        create_test_project(&server, "P1").await;

        let response = server
            .post("/api/v1/projects/P1/workflow/transitions")
            .add_header("x-keel-actor", "dana")
            .json(&json!({ "to": "closed" }))
            .await;

        response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
        let body: Value = response.json();
        assert_eq!(body["kind"], "invalid_transition");
        assert_eq!(body["from"], "initiating");
        assert_eq!(body["allowed"], "planning");
    }
}

mod raid {
    use super::*;

    #[tokio::test]
    async fn creates_filters_updates_and_deletes_items() {
        let (_dir, server) = setup();
        create_test_project(&server, "P1").await;

        for (kind, title) in [("risk", "Vendor delay"), ("issue", "Build broken")] {
            server
                .post("/api/v1/projects/P1/raid")
                .add_header("x-keel-actor", "dana")
                .json(&json!({ "type": kind, "title": title }))
                .await
                .assert_status(StatusCode::CREATED);
        }

        let risks: Vec<RaidItem> = server.get("/api/v1/projects/P1/raid?type=risk").await.json();
        assert_eq!(risks.len(), 1);
        assert_eq!(risks[0].id, "R-1");

        let updated: RaidItem = server
            .patch("/api/v1/projects/P1/raid/R-1")
            .add_header("x-keel-actor", "dana")
            .json(&json!({ "status": "resolved" }))
            .await
            .json();
        assert_eq!(updated.status, RaidStatus::Resolved);

        let summary: RaidSummary = server.get("/api/v1/projects/P1/raid/summary").await.json();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.open, 1);

        server
            .delete("/api/v1/projects/P1/raid/R-1")
            .add_header("x-keel-actor", "dana")
            .await
            .assert_status(StatusCode::NO_CONTENT);
        server
            .get("/api/v1/projects/P1/raid/R-1")
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn rejects_unknown_filter_values() {
        let (_dir, server) = setup();
        create_test_project(&server, "P1").await;

        server
            .get("/api/v1/projects/P1/raid?type=rumour")
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn reports_unknown_body_values_as_validation_errors() {
        let (_dir, server) = setup();
        create_test_project(&server, "P1").await;

        let response = server
            .post("/api/v1/projects/P1/raid")
            .add_header("x-keel-actor", "dana")
            .json(&json!({ "type": "rumour", "title": "Heard a thing" }))
            .await;

        response.assert_status(StatusCode::BAD_REQUEST);
        let body: Value = response.json();
        assert_eq!(body["kind"], "validation_error");
        assert_eq!(body["entity"], "request");
        assert_eq!(body["field"], "body");

        let response = server
            .post("/api/v1/projects/P1/workflow/transitions")
            .add_header("x-keel-actor", "dana")
            .json(&json!({ "to": "done" }))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(response.json::<Value>()["kind"], "validation_error");
    }
}

mod proposals {
    use super::*;

    #[tokio::test]
    async fn proposes_applies_and_serves_the_artifact() {
        let (_dir, server) = setup();
        create_test_project(&server, "P1").await;

        let response = server
            .post("/api/v1/projects/P1/proposals")
            .add_header("x-keel-actor", "dana")
            .json(&json!({ "intent": "generate_status_report" }))
            .await;
        response.assert_status(StatusCode::CREATED);
        let proposal: Proposal = response.json();

        let outcome: ApplyOutcome = server
            .post(&format!("/api/v1/projects/P1/proposals/{}/apply", proposal.proposal_id))
            .add_header("x-keel-actor", "dana")
            .await
            .json();

        let file = server.get("/api/v1/projects/P1/files/artifacts/status-report.md").await;
        file.assert_status_ok();
        assert_eq!(file.text(), proposal.file_changes[0].new_content);

        let diff = server
            .get(&format!("/api/v1/projects/P1/commits/{}/diff", outcome.commit_id))
            .await
            .text();
        assert_eq!(diff, proposal.combined_diff());

        let applied: Vec<Proposal> = server.get("/api/v1/projects/P1/proposals?status=applied").await.json();
        assert_eq!(applied.len(), 1);
    }

    #[tokio::test]
    async fn reports_stale_proposals_as_conflicts() {
        let (_dir, server) = setup();
        create_test_project(&server, "P1").await;

        let proposal: Proposal = server
            .post("/api/v1/projects/P1/proposals")
            .add_header("x-keel-actor", "dana")
            .json(&json!({ "intent": "generate_raid_log" }))
            .await
            .json();

        server
            .post("/api/v1/projects/P1/workflow/transitions")
            .add_header("x-keel-actor", "dana")
            .json(&json!({ "to": "planning" }))
            .await
            .assert_status_ok();

        let response = server
            .post(&format!("/api/v1/projects/P1/proposals/{}/apply", proposal.proposal_id))
            .add_header("x-keel-actor", "dana")
            .await;

        response.assert_status(StatusCode::CONFLICT);
        let body: Value = response.json();
        assert_eq!(body["kind"], "stale_proposal");
    }

    #[tokio::test]
    async fn rejects_malformed_proposal_ids() {
        let (_dir, server) = setup();
        create_test_project(&server, "P1").await;

        let response = server
            .post("/api/v1/projects/P1/proposals/not-a-uuid/apply")
            .add_header("x-keel-actor", "dana")
            .await;

        response.assert_status(StatusCode::BAD_REQUEST);
        let body: Value = response.json();
        assert_eq!(body["kind"], "validation_error");
        assert_eq!(body["field"], "path");
    }

    #[tokio::test]
    async fn does_not_serve_another_projects_commits() {
        let (_dir, server) = setup();
        create_test_project(&server, "P1").await;
        create_test_project(&server, "P2").await;

        let item: RaidItem = server
            .post("/api/v1/projects/P2/raid")
            .add_header("x-keel-actor", "dana")
            .json(&json!({ "type": "risk", "title": "P2 secret" }))
            .await
            .json();
        let events: Vec<AuditEvent> = server.get("/api/v1/projects/P2/audit").await.json();
        assert_eq!(item.id, "R-1");
        assert_eq!(events[0].event_type, AuditEventType::RaidItemCreated);
        let commit = events[0].resource_hash.clone().expect("commit recorded");

        server
            .get(&format!("/api/v1/projects/P2/commits/{commit}/diff"))
            .await
            .assert_status_ok();

        let response = server.get(&format!("/api/v1/projects/P1/commits/{commit}/diff")).await;
        response.assert_status(StatusCode::NOT_FOUND);
        assert_eq!(response.json::<Value>()["entity"], "revision");
    }

    #[tokio::test]
    async fn lists_known_intents() {
        let (_dir, server) = setup();
        let intents: Value = server.get("/api/v1/intents").await.json();
        assert_eq!(intents.as_array().map(Vec::len), Some(3));
    }
}

mod audit {
    use super::*;

    #[tokio::test]
    async fn returns_events_newest_first() {
        let (_dir, server) = setup();
        create_test_project(&server, "P1").await;
        server
            .post("/api/v1/projects/P1/workflow/transitions")
            .add_header("x-keel-actor", "dana")
            .add_header("x-correlation-id", "req-7")
            .json(&json!({ "to": "planning" }))
            .await
            .assert_status_ok();

        let events: Vec<AuditEvent> = server.get("/api/v1/projects/P1/audit").await.json();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, AuditEventType::WorkflowStateChanged);
        assert_eq!(events[0].correlation_id.as_deref(), Some("req-7"));
        assert_eq!(events[1].event_type, AuditEventType::ProjectCreated);

        let filtered: Vec<AuditEvent> = server
            .get("/api/v1/projects/P1/audit?event_type=project_created")
            .await
            .json();
        assert_eq!(filtered.len(), 1);
    }
}

mod security {
    use super::*;

    #[tokio::test]
    async fn enforces_the_api_key_when_configured() {
        let (_dir, server) = setup_with(SecurityConfig::with_api_key("secret"));

        server
            .get("/api/v1/projects")
            .await
            .assert_status(StatusCode::UNAUTHORIZED);

        server
            .get("/api/v1/projects")
            .add_header("Authorization", "Bearer secret")
            .await
            .assert_status_ok();

        server.get("/api/v1/health").await.assert_status_ok();
    }
}
