//! Persistence boundary for the orchestration core.
//!
//! Each entity gets its own store trait with Get/GetAll/Create/Update/Delete
//! operations as applicable. The coordinator treats these as external
//! collaborators; the in-memory adapters back the server by default and every
//! test.

use async_trait::async_trait;
use dorsal_core::entity::{
    agent::{self, Agent},
    backup, job,
    job::Job,
    repo,
    repo::Repository,
    retention,
};
use std::sync::Arc;

pub mod memory;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("no {entity} with id {id}")]
    Missing {
        entity: &'static str,
        id: String,
    },
    #[error("store backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait AgentStore: std::fmt::Debug + Send + Sync {
    async fn get(&self, id: agent::Id) -> StoreResult<Option<Agent>>;
    async fn get_all(&self) -> StoreResult<Vec<Agent>>;
    async fn create(&self, agent: Agent) -> StoreResult<Agent>;
    async fn update(&self, agent: Agent) -> StoreResult<Agent>;
    async fn delete(&self, id: agent::Id) -> StoreResult<()>;
}

#[async_trait]
pub trait RepoStore: std::fmt::Debug + Send + Sync {
    async fn get(&self, id: repo::Id) -> StoreResult<Option<Repository>>;
    async fn get_all(&self) -> StoreResult<Vec<Repository>>;
    async fn create(&self, repo: Repository) -> StoreResult<Repository>;
    async fn update(&self, repo: Repository) -> StoreResult<Repository>;
    async fn delete(&self, id: repo::Id) -> StoreResult<()>;
}

#[async_trait]
pub trait BackupStore: std::fmt::Debug + Send + Sync {
    async fn get(&self, id: backup::Id) -> StoreResult<Option<backup::Definition>>;
    async fn get_all(&self) -> StoreResult<Vec<backup::Definition>>;
    async fn create(&self, backup: backup::Definition) -> StoreResult<backup::Definition>;
    async fn update(&self, backup: backup::Definition) -> StoreResult<backup::Definition>;
    async fn delete(&self, id: backup::Id) -> StoreResult<()>;
}

#[async_trait]
pub trait SubscriberStore: std::fmt::Debug + Send + Sync {
    async fn get(&self, backup_id: backup::Id) -> StoreResult<Option<backup::Subscribers>>;
    async fn update(&self, subscribers: backup::Subscribers) -> StoreResult<()>;
    async fn delete(&self, backup_id: backup::Id) -> StoreResult<()>;
}

#[async_trait]
pub trait JobStore: std::fmt::Debug + Send + Sync {
    async fn get(&self, id: job::Id) -> StoreResult<Option<Job>>;
    async fn get_all(&self) -> StoreResult<Vec<Job>>;
    async fn create(&self, job: Job) -> StoreResult<Job>;
    async fn update(&self, job: Job) -> StoreResult<Job>;
}

#[async_trait]
pub trait RetentionStore: std::fmt::Debug + Send + Sync {
    async fn get(&self) -> StoreResult<Option<retention::Policy>>;
    async fn update(&self, policy: retention::Policy) -> StoreResult<()>;
}

/// Grouped store handles handed to every component that needs persistence.
#[derive(Debug, Clone)]
pub struct Services {
    pub agents: Arc<dyn AgentStore>,
    pub repos: Arc<dyn RepoStore>,
    pub backups: Arc<dyn BackupStore>,
    pub subscribers: Arc<dyn SubscriberStore>,
    pub jobs: Arc<dyn JobStore>,
    pub retention: Arc<dyn RetentionStore>,
}

impl Services {
    pub fn in_memory() -> Self {
        Services {
            agents: Arc::new(memory::MemoryAgents::default()),
            repos: Arc::new(memory::MemoryRepos::default()),
            backups: Arc::new(memory::MemoryBackups::default()),
            subscribers: Arc::new(memory::MemorySubscribers::default()),
            jobs: Arc::new(memory::MemoryJobs::default()),
            retention: Arc::new(memory::MemoryRetention::default()),
        }
    }
}
