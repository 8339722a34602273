//! HTTP surface of the coordinator.
//!
//! Management endpoints (agents, repositories, backups, jobs) are consumed by
//! operators; the progress and error callbacks are consumed by agents and
//! authenticated with `authorization: PSK <secret>` against the configured
//! agent set. All errors leave as the protocol's error envelope.

use crate::manager::{JobError, JobManager};
use crate::notify::Observers;
use crate::scheduler::{run_schedule, ScheduleError, Scheduler};
use crate::service::{Services, StoreError};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use dorsal_core::entity::{agent, backup, job, repo, retention};
use dorsal_core::protocol::{
    AgentRequest, DeleteSnapshotRequest, ErrorEnvelope, ErrorReport, JobPayload,
    ListSnapshotRequest, ProgressReport, SnapshotsRequest, CALLBACK_SCHEME,
};
use dorsal_core::trigger::Cron;
use futures::StreamExt;
use serde::Deserialize;
use std::sync::Arc;
use time::OffsetDateTime;

#[derive(Clone)]
pub struct AppState {
    pub services: Services,
    pub manager: Arc<JobManager>,
    pub scheduler: Arc<Scheduler>,
    pub observers: Observers,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/agent", get(list_agents).post(create_agent))
        .route("/api/agent/{id}", delete(delete_agent))
        .route("/api/repo", get(list_repos).post(create_repo))
        .route("/api/repo/{id}", delete(delete_repo))
        .route("/api/backup", get(list_backups).post(create_backup))
        .route(
            "/api/backup/{id}",
            put(update_backup).delete(delete_backup),
        )
        .route(
            "/api/backup/{id}/subscribers",
            get(get_subscribers).put(put_subscribers),
        )
        .route("/api/backup/{id}/run", post(run_backup))
        .route("/api/job", get(list_jobs).post(create_job))
        .route("/api/job/{id}", get(get_job))
        .route("/api/job/{id}/stop", post(stop_job))
        .route("/api/job/{id}/progress", post(job_progress))
        .route("/api/job/{id}/error", post(job_error))
        .route("/api/retention", get(get_retention).put(put_retention))
        .route("/api/snapshot", post(list_snapshots).delete(delete_snapshot))
        .route("/api/snapshot/list", post(list_snapshot_contents))
        .route("/api/ws", get(observe))
        .with_state(state)
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not authorized")]
    Unauthorized,
    #[error("no {entity} with id {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Job(#[from] JobError),
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::FORBIDDEN,
            ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Job(err) => match err {
                JobError::Validation(_) => StatusCode::BAD_REQUEST,
                JobError::QueueFull(_) => StatusCode::SERVICE_UNAVAILABLE,
                JobError::UnknownJob(_) => StatusCode::NOT_FOUND,
                JobError::Transport(_) | JobError::RemoteAgent(_) => StatusCode::BAD_GATEWAY,
                JobError::Encode(_) => StatusCode::INTERNAL_SERVER_ERROR,
                JobError::Persistence(err) => store_status(err),
            },
            ApiError::Schedule(err) => match err {
                ScheduleError::InvalidSchedule { .. } => StatusCode::BAD_REQUEST,
                ScheduleError::UnknownBackup(_) | ScheduleError::UnknownRepo(_) => {
                    StatusCode::NOT_FOUND
                }
                ScheduleError::Persistence(err) => store_status(err),
                ScheduleError::JobCreation { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Store(err) => store_status(err),
        }
    }
}

fn store_status(err: &StoreError) -> StatusCode {
    match err {
        StoreError::Missing { .. } => StatusCode::NOT_FOUND,
        StoreError::Backend(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let envelope = ErrorEnvelope {
            code: status.as_u16(),
            error: status
                .canonical_reason()
                .unwrap_or("unknown error")
                .to_string(),
            message: self.to_string(),
        };
        (status, Json(envelope)).into_response()
    }
}

/// Validates an agent callback's `authorization: PSK <secret>` header against
/// the full agent set. Agents without a secret never match.
async fn authorize_agent(services: &Services, headers: &HeaderMap) -> Result<(), ApiError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or(ApiError::Unauthorized)?;
    let (scheme, secret) = value.split_once(' ').ok_or(ApiError::Unauthorized)?;
    if !scheme.eq_ignore_ascii_case(CALLBACK_SCHEME) {
        return Err(ApiError::Unauthorized);
    }
    let known = services
        .agents
        .get_all()
        .await?
        .into_iter()
        .any(|agent| !agent.psk.is_empty() && agent.psk == secret);
    if known {
        Ok(())
    } else {
        Err(ApiError::Unauthorized)
    }
}

async fn list_agents(State(state): State<AppState>) -> Result<Json<Vec<agent::Agent>>, ApiError> {
    Ok(Json(state.services.agents.get_all().await?))
}

async fn create_agent(
    State(state): State<AppState>,
    Json(agent): Json<agent::Agent>,
) -> Result<Json<agent::Agent>, ApiError> {
    Ok(Json(state.services.agents.create(agent).await?))
}

async fn delete_agent(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.services.agents.delete(agent::Id(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_repos(State(state): State<AppState>) -> Result<Json<Vec<repo::Repository>>, ApiError> {
    Ok(Json(state.services.repos.get_all().await?))
}

async fn create_repo(
    State(state): State<AppState>,
    Json(repo): Json<repo::Repository>,
) -> Result<Json<repo::Repository>, ApiError> {
    Ok(Json(state.services.repos.create(repo).await?))
}

async fn delete_repo(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.services.repos.delete(repo::Id(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn check_schedule(definition: &backup::Definition) -> Result<(), ApiError> {
    if definition.schedule.is_empty() {
        return Ok(());
    }
    Cron(definition.schedule.clone())
        .next_schedule(OffsetDateTime::now_utc())
        .map(|_| ())
        .map_err(|err| ApiError::BadRequest(format!("invalid schedule: {err}")))
}

async fn list_backups(
    State(state): State<AppState>,
) -> Result<Json<Vec<backup::Definition>>, ApiError> {
    Ok(Json(state.services.backups.get_all().await?))
}

async fn create_backup(
    State(state): State<AppState>,
    Json(definition): Json<backup::Definition>,
) -> Result<Json<backup::Definition>, ApiError> {
    check_schedule(&definition)?;
    let definition = state.services.backups.create(definition).await?;
    if !definition.schedule.is_empty() {
        state.scheduler.add(&definition)?;
    }
    Ok(Json(definition))
}

async fn update_backup(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(mut definition): Json<backup::Definition>,
) -> Result<Json<backup::Definition>, ApiError> {
    definition.id = backup::Id(id);
    check_schedule(&definition)?;
    let definition = state.services.backups.update(definition).await?;
    if definition.schedule.is_empty() {
        state.scheduler.remove(definition.id);
    } else {
        state.scheduler.add(&definition)?;
    }
    Ok(Json(definition))
}

async fn delete_backup(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let id = backup::Id(id);
    state.scheduler.remove(id);
    state.services.subscribers.delete(id).await?;
    state.services.backups.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_subscribers(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<backup::Subscribers>, ApiError> {
    let id = backup::Id(id);
    let subscribers = state
        .services
        .subscribers
        .get(id)
        .await?
        .unwrap_or(backup::Subscribers {
            backup_id: id,
            agent_ids: Vec::new(),
        });
    Ok(Json(subscribers))
}

async fn put_subscribers(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(mut subscribers): Json<backup::Subscribers>,
) -> Result<Json<backup::Subscribers>, ApiError> {
    subscribers.backup_id = backup::Id(id);
    state.services.subscribers.update(subscribers.clone()).await?;
    Ok(Json(subscribers))
}

async fn run_backup(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<job::Job>>, ApiError> {
    let jobs = run_schedule(&state.services, &state.manager, backup::Id(id)).await?;
    Ok(Json(jobs))
}

#[derive(Debug, Deserialize)]
struct CreateJob {
    agent: agent::Id,
    #[serde(flatten)]
    payload: JobPayload,
}

async fn list_jobs(State(state): State<AppState>) -> Result<Json<Vec<job::Job>>, ApiError> {
    Ok(Json(state.services.jobs.get_all().await?))
}

async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<job::Id>,
) -> Result<Json<job::Job>, ApiError> {
    let job = state
        .services
        .jobs
        .get(id)
        .await?
        .ok_or_else(|| ApiError::NotFound {
            entity: "job",
            id: id.to_string(),
        })?;
    Ok(Json(job))
}

async fn create_job(
    State(state): State<AppState>,
    Json(request): Json<CreateJob>,
) -> Result<Json<job::Job>, ApiError> {
    let agent = state
        .services
        .agents
        .get(request.agent)
        .await?
        .ok_or_else(|| ApiError::NotFound {
            entity: "agent",
            id: request.agent.to_string(),
        })?;
    let job = state.manager.new_job(agent, request.payload).await?;
    Ok(Json(job))
}

async fn stop_job(
    State(state): State<AppState>,
    Path(id): Path<job::Id>,
) -> Result<StatusCode, ApiError> {
    let job = state
        .services
        .jobs
        .get(id)
        .await?
        .ok_or(JobError::UnknownJob(id))?;
    state.manager.stop_job(&job).await?;
    Ok(StatusCode::ACCEPTED)
}

async fn job_progress(
    State(state): State<AppState>,
    Path(id): Path<job::Id>,
    headers: HeaderMap,
    Json(report): Json<ProgressReport>,
) -> Result<Json<job::Job>, ApiError> {
    authorize_agent(&state.services, &headers).await?;
    let job = state.manager.update_job_progress(id, report.msg).await?;
    Ok(Json(job))
}

async fn job_error(
    State(state): State<AppState>,
    Path(id): Path<job::Id>,
    headers: HeaderMap,
    Json(report): Json<ErrorReport>,
) -> Result<Json<job::Job>, ApiError> {
    authorize_agent(&state.services, &headers).await?;
    let job = state.manager.fail_job(id, report.error, report.msg).await?;
    Ok(Json(job))
}

async fn get_retention(
    State(state): State<AppState>,
) -> Result<Json<retention::Policy>, ApiError> {
    let policy = state.services.retention.get().await?.unwrap_or_default();
    Ok(Json(policy))
}

async fn put_retention(
    State(state): State<AppState>,
    Json(policy): Json<retention::Policy>,
) -> Result<Json<retention::Policy>, ApiError> {
    state.services.retention.update(policy).await?;
    Ok(Json(policy))
}

#[derive(Debug, Deserialize)]
struct SnapshotQuery {
    agent: agent::Id,
    repo: repo::Id,
    #[serde(default)]
    snapshot: Option<String>,
}

async fn resolve_snapshot_query(
    state: &AppState,
    query: &SnapshotQuery,
) -> Result<(agent::Agent, repo::Repository), ApiError> {
    let agent = state
        .services
        .agents
        .get(query.agent)
        .await?
        .ok_or_else(|| ApiError::NotFound {
            entity: "agent",
            id: query.agent.to_string(),
        })?;
    let repo = state
        .services
        .repos
        .get(query.repo)
        .await?
        .ok_or_else(|| ApiError::NotFound {
            entity: "repository",
            id: query.repo.to_string(),
        })?;
    Ok((agent, repo))
}

fn raw_json(bytes: Vec<u8>) -> Response {
    ([(header::CONTENT_TYPE, "application/json")], bytes).into_response()
}

fn required_snapshot(query: &SnapshotQuery) -> Result<String, ApiError> {
    query
        .snapshot
        .clone()
        .ok_or_else(|| ApiError::BadRequest("missing snapshot id".to_string()))
}

async fn list_snapshots(
    State(state): State<AppState>,
    Json(query): Json<SnapshotQuery>,
) -> Result<Response, ApiError> {
    let (agent, repo) = resolve_snapshot_query(&state, &query).await?;
    let request = AgentRequest::GetSnapshots(SnapshotsRequest { repo });
    let body = state.manager.send_request(&request, &agent).await?;
    Ok(raw_json(body))
}

async fn list_snapshot_contents(
    State(state): State<AppState>,
    Json(query): Json<SnapshotQuery>,
) -> Result<Response, ApiError> {
    let snapshot = required_snapshot(&query)?;
    let (agent, repo) = resolve_snapshot_query(&state, &query).await?;
    let request = AgentRequest::ListSnapshot(ListSnapshotRequest { repo, snapshot });
    let body = state.manager.send_request(&request, &agent).await?;
    Ok(raw_json(body))
}

async fn delete_snapshot(
    State(state): State<AppState>,
    Json(query): Json<SnapshotQuery>,
) -> Result<Response, ApiError> {
    let snapshot = required_snapshot(&query)?;
    let (agent, repo) = resolve_snapshot_query(&state, &query).await?;
    let request = AgentRequest::DeleteSnapshot(DeleteSnapshotRequest { repo, snapshot });
    let body = state.manager.send_request(&request, &agent).await?;
    Ok(raw_json(body))
}

async fn observe(State(state): State<AppState>, upgrade: WebSocketUpgrade) -> Response {
    upgrade.on_upgrade(move |socket| observer_loop(state.observers, socket))
}

async fn observer_loop(observers: Observers, socket: WebSocket) {
    let (sink, mut stream) = socket.split();
    let id = observers.insert(sink).await;
    tracing::debug!(observer = %id, "observer connected");

    while let Some(Ok(message)) = stream.next().await {
        match message {
            // inbound frames carry no commands yet; echo them back
            Message::Text(text) => observers.send_to(id, text.to_string()).await,
            Message::Close(_) => break,
            _ => {}
        }
    }

    observers.remove(id).await;
    tracing::debug!(observer = %id, "observer disconnected");
}
