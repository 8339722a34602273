//! Cron-driven scheduling of backup jobs.
//!
//! Each scheduled backup definition owns one trigger task that sleeps until
//! the next cron fire and then creates a job per subscribed agent. The
//! scheduler keeps the trigger registry; replacing or removing a definition
//! replaces or aborts its task rather than mutating a running one.

use crate::manager::{JobError, JobManager};
use crate::service::{Services, StoreError};
use crate::shutdown::Shutdown;
use dorsal_core::entity::{backup, job::Job, repo};
use dorsal_core::protocol::{BackupRequest, JobPayload};
use dorsal_core::trigger::Cron;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use time::OffsetDateTime;

#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("invalid schedule for backup {backup}: {reason}")]
    InvalidSchedule {
        backup: backup::Id,
        reason: String,
    },
    #[error("no backup definition with id {0}")]
    UnknownBackup(backup::Id),
    #[error("no repository with id {0}")]
    UnknownRepo(repo::Id),
    #[error(transparent)]
    Persistence(#[from] StoreError),
    #[error("job creation stopped after {} jobs", created.len())]
    JobCreation {
        /// Jobs that were already queued before the failure; they run
        /// regardless.
        created: Vec<Job>,
        #[source]
        source: JobError,
    },
}

#[derive(Debug)]
struct Entry {
    schedule: String,
    handle: tokio::task::JoinHandle<()>,
}

#[derive(Debug)]
pub struct Scheduler {
    services: Services,
    manager: Arc<JobManager>,
    shutdown: Shutdown,
    registry: Mutex<HashMap<backup::Id, Entry>>,
}

impl Scheduler {
    pub fn new(services: Services, manager: Arc<JobManager>, shutdown: Shutdown) -> Self {
        Scheduler {
            services,
            manager,
            shutdown,
            registry: Mutex::new(HashMap::new()),
        }
    }

    /// Registers triggers for every stored backup definition with a
    /// schedule. A definition with a broken cron expression is skipped so it
    /// cannot keep the rest from starting.
    pub async fn start_all(&self) -> Result<(), ScheduleError> {
        for definition in self.services.backups.get_all().await? {
            if definition.schedule.is_empty() {
                continue;
            }
            if let Err(err) = self.add(&definition) {
                tracing::warn!(backup = %definition.id, error = %err, "skipping trigger");
            }
        }
        Ok(())
    }

    /// Registers (or replaces) the trigger for one backup definition.
    pub fn add(&self, definition: &backup::Definition) -> Result<(), ScheduleError> {
        let cron = Cron(definition.schedule.clone());
        if let Err(err) = cron.next_schedule(OffsetDateTime::now_utc()) {
            return Err(ScheduleError::InvalidSchedule {
                backup: definition.id,
                reason: err.to_string(),
            });
        }

        let mut registry = self.registry.lock();
        if let Some(previous) = registry.remove(&definition.id) {
            previous.handle.abort();
        }
        let handle = tokio::spawn(trigger_loop(
            self.services.clone(),
            self.manager.clone(),
            definition.id,
            cron,
            self.shutdown.clone(),
        ));
        registry.insert(
            definition.id,
            Entry {
                schedule: definition.schedule.clone(),
                handle,
            },
        );
        tracing::info!(backup = %definition.id, schedule = %definition.schedule, "registered trigger");
        Ok(())
    }

    /// Drops the trigger for a backup definition, if any.
    pub fn remove(&self, id: backup::Id) {
        if let Some(entry) = self.registry.lock().remove(&id) {
            entry.handle.abort();
            tracing::info!(backup = %id, "removed trigger");
        }
    }

    pub fn contains(&self, id: backup::Id) -> bool {
        self.registry.lock().contains_key(&id)
    }

    pub fn schedule_of(&self, id: backup::Id) -> Option<String> {
        self.registry
            .lock()
            .get(&id)
            .map(|entry| entry.schedule.clone())
    }

    /// Aborts every trigger task. Jobs already handed to the dispatch queue
    /// are unaffected.
    pub fn stop_all(&self) {
        let mut registry = self.registry.lock();
        for (_, entry) in registry.drain() {
            entry.handle.abort();
        }
    }
}

async fn trigger_loop(
    services: Services,
    manager: Arc<JobManager>,
    id: backup::Id,
    cron: Cron,
    shutdown: Shutdown,
) {
    let mut signal = shutdown.subscribe();
    loop {
        let now = OffsetDateTime::now_utc();
        let next = match cron.next_schedule(now) {
            Ok(next) => next,
            Err(err) => {
                tracing::error!(backup = %id, error = %err, "cannot compute next fire, trigger stops");
                return;
            }
        };
        let wait = (next - now).try_into().unwrap_or(std::time::Duration::ZERO);
        tracing::debug!(backup = %id, fire = %next, "trigger sleeping");

        tokio::select! {
            _ = signal.recv() => return,
            _ = tokio::time::sleep(wait) => {}
        }

        match run_schedule(&services, &manager, id).await {
            Ok(jobs) => {
                tracing::info!(backup = %id, jobs = jobs.len(), "schedule fired");
            }
            Err(err) => {
                tracing::error!(backup = %id, error = %err, "schedule run failed");
            }
        }
    }
}

/// Creates one backup job per subscribed agent of a definition. On a job
/// creation failure the already-queued jobs are reported alongside the error;
/// they run regardless.
pub async fn run_schedule(
    services: &Services,
    manager: &JobManager,
    id: backup::Id,
) -> Result<Vec<Job>, ScheduleError> {
    let definition = services
        .backups
        .get(id)
        .await?
        .ok_or(ScheduleError::UnknownBackup(id))?;
    let repo = services
        .repos
        .get(definition.target)
        .await?
        .ok_or(ScheduleError::UnknownRepo(definition.target))?;
    let subscribers = services.subscribers.get(id).await?.unwrap_or_default();

    let mut created = Vec::new();
    for agent_id in subscribers.agent_ids {
        let Some(agent) = services.agents.get(agent_id).await? else {
            tracing::warn!(backup = %id, agent = %agent_id, "skipping unknown subscriber");
            continue;
        };
        let payload = JobPayload::Backup(BackupRequest {
            id: None,
            backup: definition.clone(),
            repo: repo.clone(),
        });
        match manager.new_job(agent, payload).await {
            Ok(job) => created.push(job),
            Err(source) => return Err(ScheduleError::JobCreation { created, source }),
        }
    }
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{NotificationBus, Notifier, Observers};
    use dorsal_core::entity::agent::Agent;
    use dorsal_core::entity::job::JobRequest;
    use dorsal_core::entity::repo::Repository;
    use tokio::sync::mpsc;

    fn test_notifier(shutdown: &Shutdown) -> Notifier {
        let (notifier, _bus) =
            NotificationBus::new(16, Observers::default(), shutdown.subscribe());
        notifier
    }

    struct Fixture {
        services: Services,
        manager: Arc<JobManager>,
        shutdown: Shutdown,
        receiver: mpsc::Receiver<JobRequest>,
    }

    fn fixture(queue_size: usize) -> Fixture {
        let shutdown = Shutdown::new();
        let services = Services::in_memory();
        let (sender, receiver) = mpsc::channel(queue_size);
        let manager = Arc::new(
            JobManager::new(services.clone(), sender, test_notifier(&shutdown)).unwrap(),
        );
        Fixture {
            services,
            manager,
            shutdown,
            receiver,
        }
    }

    async fn seed_backup(services: &Services, agents: usize) -> backup::Definition {
        let repo = services.repos.create(Repository::default()).await.unwrap();
        let definition = services
            .backups
            .create(backup::Definition {
                target: repo.id,
                source: "/srv/data".to_string(),
                schedule: "0 2 * * *".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        let mut agent_ids = Vec::new();
        for _ in 0..agents {
            agent_ids.push(services.agents.create(Agent::default()).await.unwrap().id);
        }
        services
            .subscribers
            .update(backup::Subscribers {
                backup_id: definition.id,
                agent_ids,
            })
            .await
            .unwrap();
        definition
    }

    #[tokio::test]
    async fn should_create_one_job_per_subscribed_agent() {
        let mut fx = fixture(8);
        let definition = seed_backup(&fx.services, 3).await;

        let jobs = run_schedule(&fx.services, &fx.manager, definition.id)
            .await
            .unwrap();

        assert_eq!(jobs.len(), 3);
        for _ in 0..3 {
            let request = fx.receiver.recv().await.unwrap();
            assert!(matches!(request.payload, JobPayload::Backup(_)));
        }
    }

    #[tokio::test]
    async fn should_create_no_jobs_without_subscribers() {
        let fx = fixture(8);
        let definition = seed_backup(&fx.services, 0).await;

        let jobs = run_schedule(&fx.services, &fx.manager, definition.id)
            .await
            .unwrap();
        assert!(jobs.is_empty());
    }

    #[tokio::test]
    async fn should_fail_for_missing_repository() {
        let fx = fixture(8);
        let definition = fx
            .services
            .backups
            .create(backup::Definition {
                target: repo::Id(99),
                source: "/srv/data".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        let result = run_schedule(&fx.services, &fx.manager, definition.id).await;
        assert!(matches!(result, Err(ScheduleError::UnknownRepo(_))));
    }

    #[tokio::test]
    async fn should_keep_created_jobs_on_partial_failure() {
        let mut fx = fixture(1);
        let definition = seed_backup(&fx.services, 2).await;

        // capacity one: the first job queues, the second aborts
        let result = run_schedule(&fx.services, &fx.manager, definition.id).await;

        match result {
            Err(ScheduleError::JobCreation { created, source }) => {
                assert_eq!(created.len(), 1);
                assert!(matches!(source, JobError::QueueFull(_)));
            }
            other => panic!("expected job creation failure, got {other:?}"),
        }
        assert!(fx.receiver.recv().await.is_some());
    }

    #[tokio::test]
    async fn should_replace_trigger_for_same_backup() {
        let fx = fixture(8);
        let scheduler = Scheduler::new(fx.services.clone(), fx.manager.clone(), fx.shutdown.clone());
        let mut definition = seed_backup(&fx.services, 1).await;

        scheduler.add(&definition).unwrap();
        definition.schedule = "30 4 * * *".to_string();
        scheduler.add(&definition).unwrap();

        assert!(scheduler.contains(definition.id));
        assert_eq!(
            scheduler.schedule_of(definition.id).as_deref(),
            Some("30 4 * * *")
        );
        scheduler.stop_all();
    }

    #[tokio::test]
    async fn should_remove_trigger() {
        let fx = fixture(8);
        let scheduler = Scheduler::new(fx.services.clone(), fx.manager.clone(), fx.shutdown.clone());
        let definition = seed_backup(&fx.services, 1).await;

        scheduler.add(&definition).unwrap();
        scheduler.remove(definition.id);

        assert!(!scheduler.contains(definition.id));
    }

    #[tokio::test]
    async fn should_reject_invalid_cron_expression() {
        let fx = fixture(8);
        let scheduler = Scheduler::new(fx.services.clone(), fx.manager.clone(), fx.shutdown.clone());
        let definition = backup::Definition {
            id: backup::Id(1),
            schedule: "not a schedule".to_string(),
            ..Default::default()
        };

        let result = scheduler.add(&definition);
        assert!(matches!(
            result,
            Err(ScheduleError::InvalidSchedule { .. })
        ));
        assert!(!scheduler.contains(definition.id));
    }

    #[tokio::test]
    async fn should_start_triggers_for_stored_definitions() {
        let fx = fixture(8);
        let scheduler = Scheduler::new(fx.services.clone(), fx.manager.clone(), fx.shutdown.clone());
        let definition = seed_backup(&fx.services, 1).await;

        scheduler.start_all().await.unwrap();

        assert!(scheduler.contains(definition.id));
        scheduler.stop_all();
        assert!(!scheduler.contains(definition.id));
    }
}
