//! HTTP surface: the analysis trigger, read-only repository browsing and a
//! health probe.
//!
//! The caller's identity is taken from the `x-user-id` header, which the
//! authentication layer in front of this service sets after verifying the
//! session. Requests without it are rejected with `401`.

use std::future::Future;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use repo_analyst_core::browse::describe_repository;
use repo_analyst_core::contract::{
    AccessCredential, CredentialResolver, FetchError, Provider, RepositoryHost,
};
use repo_analyst_core::coordinates::RepositoryCoordinates;
use repo_analyst_core::queue::{JobQueue, JobRequest, SubmitError};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

pub const USER_HEADER: &str = "x-user-id";

#[derive(Clone)]
pub struct AppState {
    pub queue: JobQueue,
    pub host: Arc<dyn RepositoryHost>,
    pub credentials: Arc<dyn CredentialResolver>,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct StartAnalysisBody {
    #[serde(rename = "fullName", default)]
    pub full_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/analysis/start", post(start_analysis))
        .route("/api/github/repos", get(list_repositories))
        .route("/api/github/repos/:owner/:repo/details", get(repository_details))
        .with_state(state)
}

/// Serves `state` on `listener` until `shutdown` resolves and in-flight
/// requests have completed.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let local_addr = listener.local_addr()?;
    info!(addr = %local_addr, "[HTTP] Listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    info!("[HTTP] Server stopped");
    Ok(())
}

fn caller(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ApiError::new(StatusCode::UNAUTHORIZED, "Authentication required."))
}

async fn token_for(state: &AppState, user_id: &str) -> Result<AccessCredential, ApiError> {
    match state.credentials.resolve_token(user_id, Provider::GitHub).await {
        Ok(Some(credential)) => Ok(credential),
        Ok(None) => Err(ApiError::new(
            StatusCode::NOT_FOUND,
            "GitHub access token not found.",
        )),
        Err(e) => {
            error!(user_id, error = %e, "[HTTP] Credential lookup failed");
            Err(ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Credential lookup failed.",
            ))
        }
    }
}

fn upstream_error(error: FetchError) -> ApiError {
    warn!(error = %error, "[HTTP] Hosting API request failed");
    ApiError::new(
        StatusCode::BAD_GATEWAY,
        format!("GitHub request failed: {error}"),
    )
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// Validates the request, enqueues the job and answers `202` without
/// waiting for any pipeline work.
async fn start_analysis(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<StartAnalysisBody>, JsonRejection>,
) -> Result<Response, ApiError> {
    let user_id = caller(&headers)?;
    let full_name = match body {
        Ok(Json(body)) => body.full_name,
        Err(rejection) => {
            warn!(error = %rejection.body_text(), "[HTTP] Unreadable analysis request body");
            None
        }
    };
    let full_name = full_name
        .filter(|name| !name.trim().is_empty())
        .ok_or_else(|| ApiError::new(StatusCode::BAD_REQUEST, "Repository fullName is required."))?;

    let repository = RepositoryCoordinates::parse(&full_name)
        .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, e.to_string()))?;

    match state.queue.submit(JobRequest::new(user_id, repository)) {
        Ok(job_id) => Ok((
            StatusCode::ACCEPTED,
            Json(json!({ "message": "Analysis job started.", "jobId": job_id })),
        )
            .into_response()),
        Err(e @ SubmitError::AlreadyQueued(_)) => {
            Err(ApiError::new(StatusCode::CONFLICT, e.to_string()))
        }
        Err(e @ (SubmitError::QueueFull | SubmitError::ShuttingDown)) => {
            Err(ApiError::new(StatusCode::SERVICE_UNAVAILABLE, e.to_string()))
        }
    }
}

async fn list_repositories(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<PageQuery>,
) -> Result<Response, ApiError> {
    let user_id = caller(&headers)?;
    let credential = token_for(&state, &user_id).await?;
    let repos = state
        .host
        .list_repositories(
            query.page.unwrap_or(1),
            query.per_page.unwrap_or(30),
            &credential,
        )
        .await
        .map_err(upstream_error)?;
    Ok(Json(repos).into_response())
}

async fn repository_details(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((owner, repo)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let user_id = caller(&headers)?;
    let repository = RepositoryCoordinates::parse(&format!("{owner}/{repo}"))
        .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, e.to_string()))?;
    let credential = token_for(&state, &user_id).await?;

    match describe_repository(state.host.as_ref(), &repository, &credential).await {
        Ok(overview) => Ok(Json(overview).into_response()),
        Err(FetchError::NotFound) => Err(ApiError::new(
            StatusCode::NOT_FOUND,
            "Repository not found.",
        )),
        Err(e) => Err(upstream_error(e)),
    }
}
