//! In-memory store adapters.

use super::{
    AgentStore, BackupStore, JobStore, RepoStore, RetentionStore, StoreError, StoreResult,
    SubscriberStore,
};
use async_trait::async_trait;
use dorsal_core::entity::{
    agent::{self, Agent},
    backup, job,
    job::Job,
    repo,
    repo::Repository,
    retention,
};
use parking_lot::RwLock;
use std::collections::HashMap;

fn missing(entity: &'static str, id: impl std::fmt::Display) -> StoreError {
    StoreError::Missing {
        entity,
        id: id.to_string(),
    }
}

#[derive(Debug, Default)]
struct Numbered<T> {
    next_id: i64,
    rows: HashMap<i64, T>,
}

impl<T> Numbered<T> {
    fn allocate(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Debug, Default)]
pub struct MemoryAgents(RwLock<Numbered<Agent>>);

#[async_trait]
impl AgentStore for MemoryAgents {
    async fn get(&self, id: agent::Id) -> StoreResult<Option<Agent>> {
        Ok(self.0.read().rows.get(&id.0).cloned())
    }

    async fn get_all(&self) -> StoreResult<Vec<Agent>> {
        Ok(self.0.read().rows.values().cloned().collect())
    }

    async fn create(&self, mut agent: Agent) -> StoreResult<Agent> {
        let mut table = self.0.write();
        if agent.id.0 == 0 {
            agent.id = agent::Id(table.allocate());
        }
        table.rows.insert(agent.id.0, agent.clone());
        Ok(agent)
    }

    async fn update(&self, agent: Agent) -> StoreResult<Agent> {
        let mut table = self.0.write();
        if !table.rows.contains_key(&agent.id.0) {
            return Err(missing("agent", agent.id));
        }
        table.rows.insert(agent.id.0, agent.clone());
        Ok(agent)
    }

    async fn delete(&self, id: agent::Id) -> StoreResult<()> {
        self.0.write().rows.remove(&id.0);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryRepos(RwLock<Numbered<Repository>>);

#[async_trait]
impl RepoStore for MemoryRepos {
    async fn get(&self, id: repo::Id) -> StoreResult<Option<Repository>> {
        Ok(self.0.read().rows.get(&id.0).cloned())
    }

    async fn get_all(&self) -> StoreResult<Vec<Repository>> {
        Ok(self.0.read().rows.values().cloned().collect())
    }

    async fn create(&self, mut repo: Repository) -> StoreResult<Repository> {
        let mut table = self.0.write();
        if repo.id.0 == 0 {
            repo.id = repo::Id(table.allocate());
        }
        table.rows.insert(repo.id.0, repo.clone());
        Ok(repo)
    }

    async fn update(&self, repo: Repository) -> StoreResult<Repository> {
        let mut table = self.0.write();
        if !table.rows.contains_key(&repo.id.0) {
            return Err(missing("repository", repo.id));
        }
        table.rows.insert(repo.id.0, repo.clone());
        Ok(repo)
    }

    async fn delete(&self, id: repo::Id) -> StoreResult<()> {
        self.0.write().rows.remove(&id.0);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryBackups(RwLock<Numbered<backup::Definition>>);

#[async_trait]
impl BackupStore for MemoryBackups {
    async fn get(&self, id: backup::Id) -> StoreResult<Option<backup::Definition>> {
        Ok(self.0.read().rows.get(&id.0).cloned())
    }

    async fn get_all(&self) -> StoreResult<Vec<backup::Definition>> {
        Ok(self.0.read().rows.values().cloned().collect())
    }

    async fn create(&self, mut backup: backup::Definition) -> StoreResult<backup::Definition> {
        let mut table = self.0.write();
        if backup.id.0 == 0 {
            backup.id = backup::Id(table.allocate());
        }
        table.rows.insert(backup.id.0, backup.clone());
        Ok(backup)
    }

    async fn update(&self, backup: backup::Definition) -> StoreResult<backup::Definition> {
        let mut table = self.0.write();
        if !table.rows.contains_key(&backup.id.0) {
            return Err(missing("backup", backup.id));
        }
        table.rows.insert(backup.id.0, backup.clone());
        Ok(backup)
    }

    async fn delete(&self, id: backup::Id) -> StoreResult<()> {
        self.0.write().rows.remove(&id.0);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemorySubscribers(RwLock<HashMap<backup::Id, backup::Subscribers>>);

#[async_trait]
impl SubscriberStore for MemorySubscribers {
    async fn get(&self, backup_id: backup::Id) -> StoreResult<Option<backup::Subscribers>> {
        Ok(self.0.read().get(&backup_id).cloned())
    }

    async fn update(&self, subscribers: backup::Subscribers) -> StoreResult<()> {
        self.0.write().insert(subscribers.backup_id, subscribers);
        Ok(())
    }

    async fn delete(&self, backup_id: backup::Id) -> StoreResult<()> {
        self.0.write().remove(&backup_id);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryJobs(RwLock<HashMap<job::Id, Job>>);

#[async_trait]
impl JobStore for MemoryJobs {
    async fn get(&self, id: job::Id) -> StoreResult<Option<Job>> {
        Ok(self.0.read().get(&id).cloned())
    }

    async fn get_all(&self) -> StoreResult<Vec<Job>> {
        Ok(self.0.read().values().cloned().collect())
    }

    async fn create(&self, job: Job) -> StoreResult<Job> {
        self.0.write().insert(job.id, job.clone());
        Ok(job)
    }

    async fn update(&self, job: Job) -> StoreResult<Job> {
        let mut jobs = self.0.write();
        if !jobs.contains_key(&job.id) {
            return Err(missing("job", job.id));
        }
        jobs.insert(job.id, job.clone());
        Ok(job)
    }
}

#[derive(Debug, Default)]
pub struct MemoryRetention(RwLock<Option<retention::Policy>>);

#[async_trait]
impl RetentionStore for MemoryRetention {
    async fn get(&self) -> StoreResult<Option<retention::Policy>> {
        Ok(*self.0.read())
    }

    async fn update(&self, policy: retention::Policy) -> StoreResult<()> {
        *self.0.write() = Some(policy);
        Ok(())
    }
}
