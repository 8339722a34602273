use serde::{Deserialize, Serialize};

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

/// Remote process executing backup and restore work, reachable at `ip:port`
/// and authenticated with a pre-shared secret.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub id: Id,
    pub name: String,
    pub ip: String,
    pub port: u16,
    /// Shared secret; never serialized into API responses or observer frames.
    #[serde(skip_serializing)]
    pub psk: String,
}

impl Agent {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.ip, self.port)
    }
}
