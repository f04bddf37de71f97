use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        FromRequest, FromRequestParts, Path, Query, Request, State,
    },
    http::{header, request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use keel_core::models::*;
use keel_core::{Error, Keel};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use super::middleware::RequestActor;

const DEFAULT_AUDIT_LIMIT: usize = 50;
const MAX_AUDIT_LIMIT: usize = 500;

// ============================================================
// Error Handling
// ============================================================

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Core(#[from] Error),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }
}

fn status_for(e: &Error) -> StatusCode {
    match e {
        Error::Validation { .. } => StatusCode::BAD_REQUEST,
        Error::NotFound { .. } => StatusCode::NOT_FOUND,
        Error::InvalidTransition { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        Error::ConcurrentModification { .. }
        | Error::StaleProposal { .. }
        | Error::ProposalClosed { .. } => StatusCode::CONFLICT,
        Error::RepositoryUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        Error::AuditWriteFailure { .. } | Error::Generator { .. } | Error::Index(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Structured fields a client can act on, beside the message.
fn fields_for(e: &Error) -> Value {
    match e {
        Error::Validation { entity, field, reason } => {
            json!({ "entity": entity, "field": field, "reason": reason })
        }
        Error::InvalidTransition { project_key, from, to, allowed } => {
            json!({ "project_key": project_key, "from": from, "to": to, "allowed": allowed })
        }
        Error::NotFound { entity, id } => json!({ "entity": entity, "id": id }),
        Error::ConcurrentModification { project_key, expected, actual } => {
            json!({ "project_key": project_key, "expected": expected, "actual": actual })
        }
        Error::StaleProposal { proposal_id, base, head } => {
            json!({ "proposal_id": proposal_id, "base": base, "head": head })
        }
        Error::ProposalClosed { proposal_id, status } => {
            json!({ "proposal_id": proposal_id, "status": status })
        }
        _ => json!({}),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            Self::Core(e) => {
                let status = status_for(e);
                // Server-side faults are logged in full and returned without details.
                let message = if status.is_server_error() {
                    tracing::error!("Internal error: {}", e);
                    match status {
                        StatusCode::SERVICE_UNAVAILABLE => "Repository unavailable".to_string(),
                        _ => "Internal server error".to_string(),
                    }
                } else {
                    tracing::warn!("Request rejected: {}", e);
                    e.to_string()
                };
                let mut body = fields_for(e);
                body["error"] = json!(message);
                body["kind"] = json!(e.kind());
                (status, body)
            }
            Self::BadRequest(msg) => {
                tracing::warn!("Bad request: {}", msg);
                (StatusCode::BAD_REQUEST, json!({ "error": msg, "kind": "validation_error" }))
            }
            Self::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "Internal server error", "kind": "internal" }),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// [`Json`] whose rejections are reported as validation errors.
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(Error::validation("request", "body", rejection.body_text()).into()),
        }
    }
}

/// [`Path`] whose rejections are reported as validation errors.
pub struct ApiPath<T>(pub T);

impl<S, T> FromRequestParts<S> for ApiPath<T>
where
    Path<T>: FromRequestParts<S, Rejection = PathRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Path::<T>::from_request_parts(parts, state).await {
            Ok(Path(value)) => Ok(Self(value)),
            Err(rejection) => Err(Error::validation("request", "path", rejection.body_text()).into()),
        }
    }
}

/// Run a blocking core call off the async runtime.
async fn run<T, F>(f: F) -> ApiResult<T>
where
    F: FnOnce() -> keel_core::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(format!("Task join error: {e}")))?
        .map_err(ApiError::from)
}

// ============================================================
// Health
// ============================================================

pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

// ============================================================
// Projects
// ============================================================

pub async fn list_projects(State(keel): State<Keel>) -> ApiResult<Json<Vec<Project>>> {
    run(move || keel.projects().list()).await.map(Json)
}

pub async fn get_project(
    State(keel): State<Keel>,
    ApiPath(key): ApiPath<String>,
) -> ApiResult<Json<Project>> {
    run(move || keel.projects().get(&key)).await.map(Json)
}

pub async fn create_project(
    State(keel): State<Keel>,
    RequestActor(actor): RequestActor,
    ApiJson(input): ApiJson<CreateProjectInput>,
) -> ApiResult<(StatusCode, Json<Project>)> {
    run(move || keel.projects().create(input, &actor))
        .await
        .map(|p| (StatusCode::CREATED, Json(p)))
}

// ============================================================
// Workflow
// ============================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct WorkflowView {
    #[serde(flatten)]
    pub record: WorkflowRecord,
    pub allowed_transitions: Vec<WorkflowState>,
}

pub async fn get_workflow(
    State(keel): State<Keel>,
    ApiPath(key): ApiPath<String>,
) -> ApiResult<Json<WorkflowView>> {
    run(move || {
        let record = keel.workflow().record(&key)?;
        Ok(WorkflowView {
            allowed_transitions: record.state.successors(),
            record,
        })
    })
    .await
    .map(Json)
}

pub async fn transition(
    State(keel): State<Keel>,
    ApiPath(key): ApiPath<String>,
    RequestActor(actor): RequestActor,
    ApiJson(input): ApiJson<TransitionInput>,
) -> ApiResult<Json<WorkflowRecord>> {
    run(move || keel.workflow().transition(&key, input.to, &actor, input.reason))
        .await
        .map(Json)
}

pub async fn workflow_history(
    State(keel): State<Keel>,
    ApiPath(key): ApiPath<String>,
) -> ApiResult<Json<Vec<TransitionRecord>>> {
    run(move || keel.workflow().history(&key)).await.map(Json)
}

// ============================================================
// RAID
// ============================================================

pub async fn list_raid_items(
    State(keel): State<Keel>,
    ApiPath(key): ApiPath<String>,
    Query(query): Query<RaidQuery>,
) -> ApiResult<Json<Vec<RaidItem>>> {
    run(move || keel.raid().query(&key, query)).await.map(Json)
}

pub async fn create_raid_item(
    State(keel): State<Keel>,
    ApiPath(key): ApiPath<String>,
    RequestActor(actor): RequestActor,
    ApiJson(input): ApiJson<CreateRaidItemInput>,
) -> ApiResult<(StatusCode, Json<RaidItem>)> {
    run(move || keel.raid().create(&key, input, &actor))
        .await
        .map(|item| (StatusCode::CREATED, Json(item)))
}

pub async fn get_raid_item(
    State(keel): State<Keel>,
    ApiPath((key, id)): ApiPath<(String, String)>,
) -> ApiResult<Json<RaidItem>> {
    run(move || keel.raid().get(&key, &id)).await.map(Json)
}

pub async fn update_raid_item(
    State(keel): State<Keel>,
    ApiPath((key, id)): ApiPath<(String, String)>,
    RequestActor(actor): RequestActor,
    ApiJson(patch): ApiJson<UpdateRaidItemInput>,
) -> ApiResult<Json<RaidItem>> {
    run(move || keel.raid().update(&key, &id, patch, &actor))
        .await
        .map(Json)
}

pub async fn delete_raid_item(
    State(keel): State<Keel>,
    ApiPath((key, id)): ApiPath<(String, String)>,
    RequestActor(actor): RequestActor,
) -> ApiResult<StatusCode> {
    run(move || keel.raid().delete(&key, &id, &actor)).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn raid_summary(
    State(keel): State<Keel>,
    ApiPath(key): ApiPath<String>,
) -> ApiResult<Json<RaidSummary>> {
    run(move || keel.raid().summary(&key)).await.map(Json)
}

// ============================================================
// Proposals
// ============================================================

#[derive(Debug, Deserialize)]
pub struct ProposalListQuery {
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct IntentInfo {
    pub intent: &'static str,
    pub path: &'static str,
    pub description: &'static str,
}

pub async fn list_intents(State(keel): State<Keel>) -> Json<Vec<IntentInfo>> {
    Json(
        keel.proposals()
            .catalog()
            .templates()
            .iter()
            .map(|t| IntentInfo {
                intent: t.intent,
                path: t.path,
                description: t.description,
            })
            .collect(),
    )
}

pub async fn list_proposals(
    State(keel): State<Keel>,
    ApiPath(key): ApiPath<String>,
    Query(query): Query<ProposalListQuery>,
) -> ApiResult<Json<Vec<Proposal>>> {
    let status = query
        .status
        .as_deref()
        .map(|s| {
            ProposalStatus::from_str(s).ok_or_else(|| {
                Error::validation("proposal_query", "status", format!("unknown status '{s}'"))
            })
        })
        .transpose()?;
    run(move || keel.proposals().list(&key, status)).await.map(Json)
}

pub async fn propose(
    State(keel): State<Keel>,
    ApiPath(key): ApiPath<String>,
    RequestActor(actor): RequestActor,
    ApiJson(input): ApiJson<ProposeInput>,
) -> ApiResult<(StatusCode, Json<Proposal>)> {
    run(move || keel.proposals().propose(&key, &input.intent, &actor))
        .await
        .map(|p| (StatusCode::CREATED, Json(p)))
}

pub async fn propose_edit(
    State(keel): State<Keel>,
    ApiPath(key): ApiPath<String>,
    RequestActor(actor): RequestActor,
    ApiJson(input): ApiJson<ProposeEditInput>,
) -> ApiResult<(StatusCode, Json<Proposal>)> {
    run(move || keel.proposals().propose_edit(&key, input, &actor))
        .await
        .map(|p| (StatusCode::CREATED, Json(p)))
}

pub async fn get_proposal(
    State(keel): State<Keel>,
    ApiPath((key, id)): ApiPath<(String, Uuid)>,
) -> ApiResult<Json<Proposal>> {
    run(move || keel.proposals().get(&key, id)).await.map(Json)
}

pub async fn apply_proposal(
    State(keel): State<Keel>,
    ApiPath((key, id)): ApiPath<(String, Uuid)>,
    RequestActor(actor): RequestActor,
) -> ApiResult<Json<ApplyOutcome>> {
    run(move || keel.proposals().apply(&key, id, &actor))
        .await
        .map(Json)
}

pub async fn reject_proposal(
    State(keel): State<Keel>,
    ApiPath((key, id)): ApiPath<(String, Uuid)>,
    RequestActor(actor): RequestActor,
) -> ApiResult<Json<Proposal>> {
    run(move || keel.proposals().reject(&key, id, &actor))
        .await
        .map(Json)
}

// ============================================================
// Audit
// ============================================================

#[derive(Debug, Default, Deserialize)]
pub struct AuditQuery {
    pub event_type: Option<String>,
    pub actor: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

pub async fn list_audit_events(
    State(keel): State<Keel>,
    ApiPath(key): ApiPath<String>,
    Query(query): Query<AuditQuery>,
) -> ApiResult<Json<Vec<AuditEvent>>> {
    let filter = AuditFilter {
        event_type: query.event_type.as_deref().map(AuditEventType::parse).transpose()?,
        actor: query.actor,
        since: query.since,
        until: query.until,
    };
    let limit = query.limit.unwrap_or(DEFAULT_AUDIT_LIMIT).min(MAX_AUDIT_LIMIT);
    let offset = query.offset.unwrap_or(0);
    run(move || keel.audit_query(&key, &filter, limit, offset))
        .await
        .map(Json)
}

// ============================================================
// Files
// ============================================================

#[derive(Debug, Default, Deserialize)]
pub struct FileListQuery {
    pub prefix: Option<String>,
}

pub async fn list_files(
    State(keel): State<Keel>,
    ApiPath(key): ApiPath<String>,
    Query(query): Query<FileListQuery>,
) -> ApiResult<Json<Vec<String>>> {
    let prefix = query.prefix.unwrap_or_default();
    run(move || keel.list_files(&key, &prefix)).await.map(Json)
}

pub async fn read_file(
    State(keel): State<Keel>,
    ApiPath((key, path)): ApiPath<(String, String)>,
) -> ApiResult<Response> {
    let bytes = run(move || keel.read_file(&key, &path)).await?;
    Ok(([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], bytes).into_response())
}

pub async fn commit_diff(
    State(keel): State<Keel>,
    ApiPath((key, commit)): ApiPath<(String, String)>,
) -> ApiResult<Response> {
    let diff = run(move || keel.commit_diff(&key, &commit)).await?;
    Ok(([(header::CONTENT_TYPE, "text/x-diff; charset=utf-8")], diff).into_response())
}
