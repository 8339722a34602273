use serde::{Deserialize, Serialize};

/// Count-bucketed pruning policy applied to a repository after a successful
/// backup.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    pub id: i64,
    pub enabled: bool,
    pub last_x: u32,
    pub hourly: u32,
    pub daily: u32,
    pub weekly: u32,
    pub monthly: u32,
    pub yearly: u32,
}
