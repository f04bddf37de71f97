pub mod handlers;
pub mod middleware;

use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use keel_core::Keel;
use tower_http::trace::TraceLayer;

use middleware::SecurityConfig;

pub fn create_router(keel: Keel, security: SecurityConfig) -> Router {
    let api = Router::new()
        // Projects
        .route("/projects", get(handlers::list_projects).post(handlers::create_project))
        .route("/projects/{key}", get(handlers::get_project))
        // Workflow
        .route("/projects/{key}/workflow", get(handlers::get_workflow))
        .route("/projects/{key}/workflow/transitions", post(handlers::transition))
        .route("/projects/{key}/workflow/history", get(handlers::workflow_history))
        // RAID
        .route(
            "/projects/{key}/raid",
            get(handlers::list_raid_items).post(handlers::create_raid_item),
        )
        .route("/projects/{key}/raid/summary", get(handlers::raid_summary))
        .route(
            "/projects/{key}/raid/{id}",
            get(handlers::get_raid_item)
                .patch(handlers::update_raid_item)
                .delete(handlers::delete_raid_item),
        )
        // Proposals
        .route("/intents", get(handlers::list_intents))
        .route(
            "/projects/{key}/proposals",
            get(handlers::list_proposals).post(handlers::propose),
        )
        .route("/projects/{key}/proposals/edits", post(handlers::propose_edit))
        .route("/projects/{key}/proposals/{id}", get(handlers::get_proposal))
        .route("/projects/{key}/proposals/{id}/apply", post(handlers::apply_proposal))
        .route("/projects/{key}/proposals/{id}/reject", post(handlers::reject_proposal))
        // Audit
        .route("/projects/{key}/audit", get(handlers::list_audit_events))
        // Repository
        .route("/projects/{key}/files", get(handlers::list_files))
        .route("/projects/{key}/files/{*path}", get(handlers::read_file))
        .route("/projects/{key}/commits/{commit}/diff", get(handlers::commit_diff))
        .route_layer(from_fn_with_state(security.clone(), middleware::auth_middleware))
        // Health
        .route("/health", get(handlers::health));

    Router::new()
        .nest("/api/v1", api)
        .layer(TraceLayer::new_for_http())
        .layer(security.cors_layer())
        .with_state(keel)
}
