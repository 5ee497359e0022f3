use crate::{
    chaos::{ChaosConfig, ChaosUpdate},
    config::{Credential, Credentials},
    seed,
    stream::EventHub,
    submission::SubmissionService,
    workflow::{AutoApplyDriver, RunOptions, StartError, DEFAULT_MAX_JOBS},
};
use autoapply_core::{submission::SubmitError, ApplicationRequest, ApplicationStatus};
use autoapply_storage::AppliedFilter;
use axum::{
    body::Bytes,
    extract::{ws::WebSocketUpgrade, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub submissions: SubmissionService,
    pub hub: Arc<EventHub>,
    pub driver: Arc<AutoApplyDriver>,
    pub credentials: Arc<Credentials>,
    pub seed_jobs: usize,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/seed", post(seed_catalog))
        .route("/api/jobs", get(list_jobs))
        .route("/api/apply-job", post(apply_job))
        .route("/api/apply", post(apply_job))
        .route("/api/applied-jobs", get(applied_jobs))
        .route("/api/chaos", get(chaos_config).post(update_chaos))
        .route("/api/auto-apply/start", post(start_auto_apply))
        .route("/api/auto-apply/status", get(auto_apply_status))
        .route("/api/auto-apply/queue/clear", delete(clear_queue))
        .route("/ws/dashboard", get(dashboard_stream))
        .with_state(state)
}

fn error_body(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(json!({
            "success": false,
            "error": message,
            "retryable": false,
        })),
    )
        .into_response()
}

/// Maps a classified submission failure to its HTTP response. Every body
/// carries an explicit `retryable` flag.
pub fn submit_error_response(err: &SubmitError) -> Response {
    let status =
        StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = match err {
        SubmitError::Validation { missing } => json!({
            "success": false,
            "error": "Missing required fields",
            "missing": missing,
            "required": ApplicationRequest::REQUIRED_FIELDS,
            "optional": ApplicationRequest::OPTIONAL_FIELDS,
            "retryable": false,
        }),
        SubmitError::Malformed(detail) => json!({
            "success": false,
            "error": "Malformed request body",
            "message": detail,
            "required": ApplicationRequest::REQUIRED_FIELDS,
            "optional": ApplicationRequest::OPTIONAL_FIELDS,
            "retryable": false,
        }),
        SubmitError::JobNotFound { job_id } => json!({
            "success": false,
            "error": "Job not found",
            "jobId": job_id,
            "retryable": false,
        }),
        SubmitError::Conflict { application_id } => json!({
            "success": false,
            "error": "Application already submitted for this job",
            "applicationId": application_id,
            "retryable": false,
        }),
        SubmitError::Injected { fault } => json!({
            "success": false,
            "error": fault.message,
            "chaos": true,
            "retryable": fault.retryable,
            "retryAfter": fault.suggested_retry_delay,
        }),
        SubmitError::Unexpected(detail) => json!({
            "success": false,
            "error": "Failed to submit application",
            "message": detail,
            "retryable": true,
        }),
    };
    let mut response = (status, Json(body)).into_response();
    if let Some(after) = err.retry_after() {
        if let Ok(value) = HeaderValue::from_str(&after.as_secs().to_string()) {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
    }
    response
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let chaos = state.submissions.injector().config();
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
        "chaos": if chaos.enabled { "enabled" } else { "disabled" },
        "failureRate": chaos.rate_label(),
    }))
}

async fn seed_catalog(State(state): State<AppState>) -> Response {
    match seed::reseed(&state.submissions, state.seed_jobs) {
        Ok(created) => Json(json!({
            "success": true,
            "message": "Database seeded successfully",
            "jobsCreated": created,
        }))
        .into_response(),
        Err(err) => {
            warn!(event = "seed_failed", error = %err);
            submit_error_response(&err)
        }
    }
}

async fn list_jobs(State(state): State<AppState>) -> Response {
    match state.submissions.jobs() {
        Ok(jobs) => Json(json!({
            "success": true,
            "count": jobs.len(),
            "data": jobs,
        }))
        .into_response(),
        Err(err) => submit_error_response(&err),
    }
}

async fn apply_job(State(state): State<AppState>, body: Bytes) -> Response {
    match state.submissions.submit_raw(&body) {
        Ok(receipt) => (
            StatusCode::CREATED,
            Json(json!({
                "success": true,
                "message": "Application submitted successfully",
                "receipt": receipt,
            })),
        )
            .into_response(),
        Err(err) => {
            info!(
                event = "application_rejected",
                kind = err.kind(),
                status = err.http_status(),
                retryable = err.retryable()
            );
            submit_error_response(&err)
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppliedJobsQuery {
    #[serde(default)]
    applicant_name: Option<String>,
    #[serde(default)]
    applicant_email: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|inner| !inner.trim().is_empty())
}

async fn applied_jobs(
    State(state): State<AppState>,
    Query(query): Query<AppliedJobsQuery>,
) -> Response {
    let status = match non_blank(query.status) {
        Some(raw) => match raw.parse::<ApplicationStatus>() {
            Ok(status) => Some(status),
            Err(message) => return error_body(StatusCode::BAD_REQUEST, &message),
        },
        None => None,
    };
    let filter = AppliedFilter {
        applicant_name: non_blank(query.applicant_name),
        applicant_email: non_blank(query.applicant_email),
        status,
    };
    match state.submissions.applied(&filter) {
        Ok(rows) => Json(json!({
            "success": true,
            "count": rows.len(),
            "data": rows,
        }))
        .into_response(),
        Err(err) => submit_error_response(&err),
    }
}

async fn chaos_config(State(state): State<AppState>) -> Json<ChaosConfig> {
    Json(state.submissions.injector().config())
}

/// Always answers with the effective config; bad fields are dropped silently.
async fn update_chaos(State(state): State<AppState>, body: Bytes) -> Json<ChaosConfig> {
    let update = serde_json::from_slice::<Value>(&body)
        .map(|value| ChaosUpdate {
            enabled: value.get("enabled").and_then(Value::as_bool),
            failure_rate: value.get("failureRate").and_then(Value::as_f64),
        })
        .unwrap_or_default();
    Json(state.submissions.injector().update(update))
}

fn bearer_user(headers: &HeaderMap, credentials: &Credentials) -> Option<Credential> {
    let raw = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = raw
        .strip_prefix("Bearer ")
        .or_else(|| raw.strip_prefix("bearer "))?;
    credentials.authenticate(token).cloned()
}

fn unauthorized() -> Response {
    error_body(StatusCode::UNAUTHORIZED, "Invalid or missing credentials")
}

#[derive(Debug, Default, Deserialize)]
struct StartQuery {
    #[serde(default)]
    max_jobs: Option<usize>,
    #[serde(default)]
    auto_apply: Option<bool>,
}

async fn start_auto_apply(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<StartQuery>,
) -> Response {
    let Some(user) = bearer_user(&headers, &state.credentials) else {
        return unauthorized();
    };
    let options = RunOptions {
        max_jobs: query.max_jobs.unwrap_or(DEFAULT_MAX_JOBS),
        auto_apply: query.auto_apply.unwrap_or(true),
    };
    let email = user.email.clone();
    match state.driver.start(user, options) {
        Ok(_) => (
            StatusCode::ACCEPTED,
            Json(json!({
                "message": "Auto-apply workflow started",
                "userEmail": email,
                "maxJobs": options.max_jobs,
                "autoApply": options.auto_apply,
                "status": "Connect to the event stream for real-time updates",
            })),
        )
            .into_response(),
        Err(err @ StartError::AlreadyRunning(_)) => error_body(StatusCode::CONFLICT, &err.to_string()),
    }
}

async fn auto_apply_status(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(user) = bearer_user(&headers, &state.credentials) else {
        return unauthorized();
    };
    let queue = state.driver.queue();
    Json(json!({
        "userEmail": user.email,
        "totalInQueue": queue.len(&user.email),
        "byStatus": queue.status_counts(&user.email),
        "websocketConnected": state.hub.is_connected(&user.email).await,
        "running": state.driver.is_running(&user.email),
    }))
    .into_response()
}

async fn clear_queue(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(user) = bearer_user(&headers, &state.credentials) else {
        return unauthorized();
    };
    let removed = state.driver.clear_queue(&user.email).await;
    Json(json!({
        "message": format!("Cleared {removed} jobs from queue"),
        "removed": removed,
    }))
    .into_response()
}

#[derive(Debug, Default, Deserialize)]
struct StreamQuery {
    #[serde(default)]
    token: Option<String>,
}

/// The credential is checked once, before the upgrade.
async fn dashboard_stream(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
    ws: Option<WebSocketUpgrade>,
) -> Response {
    let user = query
        .token
        .as_deref()
        .and_then(|token| state.credentials.authenticate(token))
        .cloned();
    let Some(user) = user else {
        warn!(event = "stream_auth_failed");
        return error_body(StatusCode::UNAUTHORIZED, "Invalid or missing token");
    };
    let Some(ws) = ws else {
        return error_body(StatusCode::BAD_REQUEST, "Expected a websocket upgrade");
    };
    let hub = state.hub.clone();
    let max_frame_bytes = hub.config().max_frame_bytes;
    ws.max_message_size(max_frame_bytes)
        .on_upgrade(move |socket| async move {
            hub.handle_socket(socket, user.email).await;
        })
}
