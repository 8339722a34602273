use crate::entity::agent::Agent;
use crate::protocol::JobPayload;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Debug, PartialEq, Eq, Hash, Copy, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id(uuid::Uuid);

impl Default for Id {
    fn default() -> Self {
        Id(uuid::Uuid::new_v4())
    }
}

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl Id {
    pub fn new() -> Self {
        Default::default()
    }
}

/// Request for one unit of work on a specific agent, consumed exactly once by
/// the dispatch worker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobRequest {
    pub id: Id,
    pub agent: Agent,
    #[serde(flatten)]
    pub payload: JobPayload,
}

/// One tracked unit of work, from creation to terminal state. The job manager
/// is the sole mutator; jobs are never deleted, only queried.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    pub id: Id,
    pub done: bool,
    pub aborted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<serde_json::Value>,
    pub request: JobRequest,
    #[serde(with = "time::serde::rfc3339")]
    pub start_time: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub end_time: Option<OffsetDateTime>,
}

impl Job {
    pub fn new(request: JobRequest) -> Self {
        Job {
            id: request.id,
            done: false,
            aborted: false,
            progress: None,
            start_time: OffsetDateTime::now_utc(),
            end_time: None,
            request,
        }
    }
}
