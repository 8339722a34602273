use crate::entity::{agent, repo};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(
    Debug, Default, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Id(pub i64);

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Backup of a certain source path into the target repository, fired by a
/// cron schedule.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Definition {
    pub id: Id,
    pub target: repo::Id,
    pub source: String,
    pub schedule: String,
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_run: Option<OffsetDateTime>,
}

/// Agents subscribed to a backup definition; each schedule fire creates one
/// job per subscriber.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscribers {
    pub backup_id: Id,
    pub agent_ids: Vec<agent::Id>,
}
