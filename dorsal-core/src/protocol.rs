//! Wire protocol between the coordinator and its agents.
//!
//! Outbound requests map one-to-one onto endpoints of the agent's API; the
//! coordinator authenticates with the agent's pre-shared secret in the
//! [`PSK_HEADER`] header. Agents report back through progress and error
//! callbacks keyed by job id.

use crate::entity::{backup, job, repo, retention};
use http::Method;
use serde::{Deserialize, Serialize};

/// Header carrying the shared secret on coordinator-to-agent requests.
pub const PSK_HEADER: &str = "x-psk";

/// Authorization scheme used by agent callbacks (`authorization: PSK <secret>`).
pub const CALLBACK_SCHEME: &str = "psk";

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<job::Id>,
    pub backup: backup::Definition,
    pub repo: repo::Repository,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<job::Id>,
    pub repo: repo::Repository,
    pub snapshot: String,
    pub target: String,
    #[serde(default)]
    pub include: String,
    #[serde(default)]
    pub exclude: String,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<job::Id>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForgetRequest {
    pub repo: repo::Repository,
    pub policy: retention::Policy,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotsRequest {
    pub repo: repo::Repository,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListSnapshotRequest {
    pub repo: repo::Repository,
    pub snapshot: String,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteSnapshotRequest {
    pub repo: repo::Repository,
    pub snapshot: String,
}

/// Payload of a dispatchable job, one variant per job type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum JobPayload {
    Backup(BackupRequest),
    Restore(RestoreRequest),
    Stop(StopRequest),
}

impl JobPayload {
    /// Stamps the job's id into the sub-payload so the agent can correlate
    /// its callbacks.
    pub fn stamp(&mut self, id: job::Id) {
        match self {
            JobPayload::Backup(request) => request.id = Some(id),
            JobPayload::Restore(request) => request.id = Some(id),
            JobPayload::Stop(request) => request.id = Some(id),
        }
    }
}

/// Everything the coordinator can send to an agent, including the one-shot
/// maintenance requests that never become tracked jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AgentRequest {
    Backup(BackupRequest),
    Restore(RestoreRequest),
    Stop(StopRequest),
    GetSnapshots(SnapshotsRequest),
    ListSnapshot(ListSnapshotRequest),
    Forget(ForgetRequest),
    DeleteSnapshot(DeleteSnapshotRequest),
}

impl AgentRequest {
    /// Method and path of this request type on the agent's API.
    pub fn endpoint(&self) -> (Method, &'static str) {
        match self {
            AgentRequest::Backup(_) => (Method::POST, "/backup"),
            AgentRequest::Restore(_) => (Method::POST, "/snapshot/restore"),
            AgentRequest::Stop(_) => (Method::POST, "/stop"),
            AgentRequest::GetSnapshots(_) => (Method::POST, "/snapshot"),
            AgentRequest::ListSnapshot(_) => (Method::POST, "/snapshot/list"),
            AgentRequest::Forget(_) => (Method::POST, "/snapshot/forget"),
            AgentRequest::DeleteSnapshot(_) => (Method::DELETE, "/snapshot"),
        }
    }

    /// Type-specific JSON body sent to the agent.
    pub fn body(&self) -> serde_json::Result<serde_json::Value> {
        match self {
            AgentRequest::Backup(request) => serde_json::to_value(request),
            AgentRequest::Restore(request) => serde_json::to_value(request),
            AgentRequest::Stop(request) => serde_json::to_value(request),
            AgentRequest::GetSnapshots(request) => serde_json::to_value(request),
            AgentRequest::ListSnapshot(request) => serde_json::to_value(request),
            AgentRequest::Forget(request) => serde_json::to_value(request),
            AgentRequest::DeleteSnapshot(request) => serde_json::to_value(request),
        }
    }
}

impl From<JobPayload> for AgentRequest {
    fn from(payload: JobPayload) -> Self {
        match payload {
            JobPayload::Backup(request) => AgentRequest::Backup(request),
            JobPayload::Restore(request) => AgentRequest::Restore(request),
            JobPayload::Stop(request) => AgentRequest::Stop(request),
        }
    }
}

/// Error body returned by agents on any status >= 300, and by the
/// coordinator's own API.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub code: u16,
    pub error: String,
    pub message: String,
}

/// Body of a progress callback: the opaque payload produced by the agent's
/// backup tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressReport {
    pub msg: serde_json::Value,
}

/// Body of an error callback.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub msg: String,
}

/// Classification of a progress payload by its embedded discriminator. Only
/// `summary` and `error` drive state transitions; anything else is stored
/// verbatim as an intermediate update.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ProgressKind {
    Summary,
    Error,
    Intermediate,
}

impl ProgressKind {
    pub fn of(payload: &serde_json::Value) -> Self {
        match payload.get("message_type").and_then(serde_json::Value::as_str) {
            Some("summary") => ProgressKind::Summary,
            Some("error") => ProgressKind::Error,
            _ => ProgressKind::Intermediate,
        }
    }
}
