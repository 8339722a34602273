//! Job lifecycle owner.
//!
//! The manager is the only component that creates jobs and the only one that
//! mutates them afterwards. Progress and error callbacks are serialized
//! through one async mutex so concurrent reports cannot interleave their
//! read-modify-write cycles; outbound agent calls always happen after the
//! lock is released.

use crate::notify::{Frame, Notifier};
use crate::service::{Services, StoreError};
use dorsal_core::entity::{
    agent::Agent,
    job::{self, Job, JobRequest},
};
use dorsal_core::protocol::{
    AgentRequest, ErrorEnvelope, ForgetRequest, JobPayload, ProgressKind, StopRequest, PSK_HEADER,
};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::{mpsc, Mutex};

const AGENT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("invalid job: {0}")]
    Validation(String),
    #[error("dispatch queue full, job {0} aborted")]
    QueueFull(job::Id),
    #[error("no job with id {0}")]
    UnknownJob(job::Id),
    #[error("failed to reach agent")]
    Transport(#[from] reqwest::Error),
    #[error("agent rejected request: {} {}", .0.error, .0.message)]
    RemoteAgent(ErrorEnvelope),
    #[error("failed to encode agent request")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Persistence(#[from] StoreError),
}

#[derive(Debug)]
pub struct JobManager {
    services: Services,
    dispatch: mpsc::Sender<JobRequest>,
    notifier: Notifier,
    http: reqwest::Client,
    update_lock: Mutex<()>,
}

impl JobManager {
    pub fn new(
        services: Services,
        dispatch: mpsc::Sender<JobRequest>,
        notifier: Notifier,
    ) -> eyre::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(AGENT_REQUEST_TIMEOUT)
            .build()?;
        Ok(JobManager {
            services,
            dispatch,
            notifier,
            http,
            update_lock: Mutex::new(()),
        })
    }

    /// Creates a job for `agent`, persists it, and hands it to the dispatch
    /// worker. Never blocks on a full queue: the job is aborted instead.
    pub async fn new_job(&self, agent: Agent, mut payload: JobPayload) -> Result<Job, JobError> {
        if let JobPayload::Backup(request) = &payload {
            let mut definition = self
                .services
                .backups
                .get(request.backup.id)
                .await?
                .ok_or_else(|| {
                    JobError::Validation(format!("unknown backup definition {}", request.backup.id))
                })?;
            if definition.source.is_empty() {
                return Err(JobError::Validation(format!(
                    "backup definition {} has no source path",
                    definition.id
                )));
            }
            definition.last_run = Some(OffsetDateTime::now_utc());
            if let Err(err) = self.services.backups.update(definition).await {
                tracing::warn!(error = %err, "failed to record backup last run");
            }
        }

        let id = job::Id::new();
        payload.stamp(id);
        let request = JobRequest { id, agent, payload };
        let mut job = self.services.jobs.create(Job::new(request.clone())).await?;

        if self.dispatch.try_send(request).is_err() {
            job.aborted = true;
            job.end_time = Some(OffsetDateTime::now_utc());
            if let Err(err) = self.services.jobs.update(job.clone()).await {
                tracing::error!(job = %job.id, error = %err, "failed to persist aborted job");
            }
            self.notifier.publish(Frame::JobError { job });
            return Err(JobError::QueueFull(id));
        }

        tracing::info!(job = %job.id, agent = %job.request.agent.name, "queued job");
        Ok(job)
    }

    /// Applies an agent progress callback. `summary` payloads complete the
    /// job, `error` payloads abort it, anything else is stored verbatim.
    pub async fn update_job_progress(
        &self,
        id: job::Id,
        payload: serde_json::Value,
    ) -> Result<Job, JobError> {
        let job = {
            let _guard = self.update_lock.lock().await;
            let mut job = self
                .services
                .jobs
                .get(id)
                .await?
                .ok_or(JobError::UnknownJob(id))?;
            match ProgressKind::of(&payload) {
                ProgressKind::Summary => {
                    job.done = true;
                    job.end_time = Some(OffsetDateTime::now_utc());
                }
                ProgressKind::Error => job.aborted = true,
                ProgressKind::Intermediate => {}
            }
            job.progress = Some(payload);
            self.services.jobs.update(job).await?
        };

        self.notifier.publish(Frame::JobProgress { job: job.clone() });
        if job.done {
            if let Err(err) = self.apply_retention(&job).await {
                tracing::warn!(job = %job.id, error = %err, "retention run failed");
            }
        }
        Ok(job)
    }

    /// Applies an agent error callback, aborting the job.
    pub async fn fail_job(
        &self,
        id: job::Id,
        error: String,
        msg: String,
    ) -> Result<Job, JobError> {
        let job = {
            let _guard = self.update_lock.lock().await;
            let mut job = self
                .services
                .jobs
                .get(id)
                .await?
                .ok_or(JobError::UnknownJob(id))?;
            job.aborted = true;
            self.services.jobs.update(job).await?
        };

        tracing::warn!(job = %job.id, %error, %msg, "job reported an error");
        self.notifier.publish(Frame::Error { error, msg });
        self.notifier.publish(Frame::JobError { job: job.clone() });
        Ok(job)
    }

    /// Asks the owning agent to stop a running job. The job's state is left
    /// untouched; the agent confirms through its usual callbacks.
    pub async fn stop_job(&self, job: &Job) -> Result<(), JobError> {
        let request = AgentRequest::Stop(StopRequest { id: Some(job.id) });
        self.send_request(&request, &job.request.agent).await?;
        Ok(())
    }

    /// Sends one request to an agent and returns the raw response body. Any
    /// status >= 300 is surfaced as the agent's error envelope.
    pub async fn send_request(
        &self,
        request: &AgentRequest,
        agent: &Agent,
    ) -> Result<Vec<u8>, JobError> {
        let (method, path) = request.endpoint();
        let url = format!("{}{}", agent.base_url(), path);
        let body = request.body()?;
        let response = self
            .http
            .request(method, url)
            .header(PSK_HEADER, &agent.psk)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let bytes = response.bytes().await?;
        if status.as_u16() >= 300 {
            let envelope =
                serde_json::from_slice(&bytes).unwrap_or_else(|_| ErrorEnvelope {
                    code: status.as_u16(),
                    error: status.to_string(),
                    message: String::from_utf8_lossy(&bytes).into_owned(),
                });
            return Err(JobError::RemoteAgent(envelope));
        }
        Ok(bytes.to_vec())
    }

    /// Runs the retention policy against the repository of a completed backup
    /// job, on the agent that produced the snapshots.
    async fn apply_retention(&self, job: &Job) -> Result<(), JobError> {
        let JobPayload::Backup(backup) = &job.request.payload else {
            return Ok(());
        };
        let Some(policy) = self.services.retention.get().await? else {
            return Ok(());
        };
        if !policy.enabled {
            return Ok(());
        }

        tracing::info!(job = %job.id, repo = %backup.repo.name, "applying retention policy");
        let request = AgentRequest::Forget(ForgetRequest {
            repo: backup.repo.clone(),
            policy,
        });
        self.send_request(&request, &job.request.agent).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{NotificationBus, Observers};
    use crate::shutdown::Shutdown;
    use dorsal_core::entity::{backup, repo, retention};
    use dorsal_core::protocol::BackupRequest;
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn test_notifier() -> Notifier {
        let shutdown = Shutdown::new();
        let (notifier, _bus) =
            NotificationBus::new(16, Observers::default(), shutdown.subscribe());
        notifier
    }

    /// Accepts connections, counts them, and answers every request with 200.
    async fn agent_stub() -> (u16, Arc<AtomicUsize>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                counter.fetch_add(1, Ordering::SeqCst);
                let mut buf = vec![0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let _ = socket
                    .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\n\r\n{}")
                    .await;
            }
        });
        (port, hits)
    }

    fn test_manager(queue_size: usize) -> (JobManager, mpsc::Receiver<JobRequest>, Services) {
        let services = Services::in_memory();
        let (sender, receiver) = mpsc::channel(queue_size);
        let manager = JobManager::new(services.clone(), sender, test_notifier()).unwrap();
        (manager, receiver, services)
    }

    fn stop_payload() -> JobPayload {
        JobPayload::Stop(StopRequest { id: None })
    }

    async fn seeded_backup_payload(services: &Services, source: &str) -> JobPayload {
        let definition = services
            .backups
            .create(backup::Definition {
                source: source.to_string(),
                target: repo::Id(1),
                schedule: "0 2 * * *".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        JobPayload::Backup(BackupRequest {
            id: None,
            backup: definition,
            repo: repo::Repository::default(),
        })
    }

    #[tokio::test]
    async fn should_create_job_with_fresh_id_and_clean_flags() {
        let (manager, mut receiver, _services) = test_manager(4);

        let job = manager.new_job(Agent::default(), stop_payload()).await.unwrap();

        assert!(!job.done);
        assert!(!job.aborted);
        assert!(job.progress.is_none());
        assert!(job.end_time.is_none());

        let dispatched = receiver.recv().await.unwrap();
        assert_eq!(dispatched.id, job.id);
        match dispatched.payload {
            JobPayload::Stop(request) => assert_eq!(request.id, Some(job.id)),
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn should_reject_backup_for_unknown_definition() {
        let (manager, _receiver, _services) = test_manager(4);
        let payload = JobPayload::Backup(BackupRequest {
            id: None,
            backup: backup::Definition {
                id: backup::Id(42),
                ..Default::default()
            },
            repo: repo::Repository::default(),
        });

        let result = manager.new_job(Agent::default(), payload).await;
        assert!(matches!(result, Err(JobError::Validation(_))));
    }

    #[tokio::test]
    async fn should_reject_backup_with_empty_source() {
        let (manager, _receiver, services) = test_manager(4);
        let payload = seeded_backup_payload(&services, "").await;

        let result = manager.new_job(Agent::default(), payload).await;
        assert!(matches!(result, Err(JobError::Validation(_))));
    }

    #[tokio::test]
    async fn should_record_last_run_when_dispatching_backup() {
        let (manager, _receiver, services) = test_manager(4);
        let payload = seeded_backup_payload(&services, "/srv/data").await;

        manager.new_job(Agent::default(), payload).await.unwrap();

        let definition = services.backups.get(backup::Id(1)).await.unwrap().unwrap();
        assert!(definition.last_run.is_some());
    }

    #[tokio::test]
    async fn should_abort_job_when_queue_is_full() {
        let (manager, _receiver, services) = test_manager(1);

        manager.new_job(Agent::default(), stop_payload()).await.unwrap();
        let result = manager.new_job(Agent::default(), stop_payload()).await;

        let id = match result {
            Err(JobError::QueueFull(id)) => id,
            other => panic!("expected queue full, got {other:?}"),
        };
        let job = services.jobs.get(id).await.unwrap().unwrap();
        assert!(job.aborted);
        assert!(job.end_time.is_some());
    }

    #[tokio::test]
    async fn should_assign_unique_ids_under_concurrent_creation() {
        let (manager, mut receiver, _services) = test_manager(64);
        let manager = Arc::new(manager);

        let tasks: Vec<_> = (0..32)
            .map(|_| {
                let manager = manager.clone();
                tokio::spawn(async move {
                    manager.new_job(Agent::default(), stop_payload()).await.unwrap().id
                })
            })
            .collect();
        let mut ids = HashSet::new();
        for task in tasks {
            ids.insert(task.await.unwrap());
        }
        assert_eq!(ids.len(), 32);

        receiver.close();
    }

    #[tokio::test]
    async fn should_mark_job_done_on_summary_progress() {
        let (manager, _receiver, _services) = test_manager(4);
        let job = manager.new_job(Agent::default(), stop_payload()).await.unwrap();

        let updated = manager
            .update_job_progress(job.id, json!({"message_type": "summary", "files_new": 12}))
            .await
            .unwrap();

        assert!(updated.done);
        assert!(!updated.aborted);
        assert!(updated.end_time.is_some());
    }

    #[tokio::test]
    async fn should_mark_job_aborted_on_error_progress() {
        let (manager, _receiver, _services) = test_manager(4);
        let job = manager.new_job(Agent::default(), stop_payload()).await.unwrap();

        let updated = manager
            .update_job_progress(job.id, json!({"message_type": "error"}))
            .await
            .unwrap();

        assert!(updated.aborted);
        assert!(!updated.done);
        assert!(updated.end_time.is_none());
    }

    #[tokio::test]
    async fn should_store_intermediate_progress_verbatim() {
        let (manager, _receiver, _services) = test_manager(4);
        let job = manager.new_job(Agent::default(), stop_payload()).await.unwrap();
        let payload = json!({"message_type": "status", "percent_done": 0.4});

        let updated = manager.update_job_progress(job.id, payload.clone()).await.unwrap();

        assert!(!updated.done);
        assert!(!updated.aborted);
        assert_eq!(updated.progress, Some(payload));
    }

    #[tokio::test]
    async fn should_reject_progress_for_unknown_job() {
        let (manager, _receiver, _services) = test_manager(4);

        let result = manager.update_job_progress(job::Id::new(), json!({})).await;
        assert!(matches!(result, Err(JobError::UnknownJob(_))));
    }

    #[tokio::test]
    async fn should_abort_job_on_error_callback() {
        let (manager, _receiver, _services) = test_manager(4);
        let job = manager.new_job(Agent::default(), stop_payload()).await.unwrap();

        let updated = manager
            .fail_job(job.id, "exit status 1".to_string(), "restic failed".to_string())
            .await
            .unwrap();

        assert!(updated.aborted);
    }

    #[tokio::test]
    async fn should_apply_late_error_callback_after_completion() {
        let (manager, _receiver, _services) = test_manager(4);
        let job = manager.new_job(Agent::default(), stop_payload()).await.unwrap();

        manager
            .update_job_progress(job.id, json!({"message_type": "summary"}))
            .await
            .unwrap();
        let updated = manager
            .update_job_progress(job.id, json!({"message_type": "error"}))
            .await
            .unwrap();

        // terminal flags are last-writer-wins, not once-only
        assert!(updated.done);
        assert!(updated.aborted);
    }

    #[tokio::test]
    async fn should_run_retention_after_completed_backup() {
        let (manager, _receiver, services) = test_manager(4);
        services
            .retention
            .update(retention::Policy {
                enabled: true,
                daily: 7,
                ..Default::default()
            })
            .await
            .unwrap();
        let (port, hits) = agent_stub().await;
        let agent = Agent {
            ip: "127.0.0.1".to_string(),
            port,
            ..Default::default()
        };
        let payload = seeded_backup_payload(&services, "/srv/data").await;
        let job = manager.new_job(agent, payload).await.unwrap();

        let updated = manager
            .update_job_progress(job.id, json!({"message_type": "summary"}))
            .await
            .unwrap();

        assert!(updated.done);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn should_skip_retention_when_policy_disabled() {
        let (manager, _receiver, services) = test_manager(4);
        services
            .retention
            .update(retention::Policy {
                enabled: false,
                daily: 7,
                ..Default::default()
            })
            .await
            .unwrap();
        let (port, hits) = agent_stub().await;
        let agent = Agent {
            ip: "127.0.0.1".to_string(),
            port,
            ..Default::default()
        };
        let payload = seeded_backup_payload(&services, "/srv/data").await;
        let job = manager.new_job(agent, payload).await.unwrap();

        let updated = manager
            .update_job_progress(job.id, json!({"message_type": "summary"}))
            .await
            .unwrap();

        assert!(updated.done);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn should_keep_job_done_when_retention_fails() {
        let (manager, _receiver, services) = test_manager(4);
        services
            .retention
            .update(retention::Policy {
                enabled: true,
                daily: 7,
                ..Default::default()
            })
            .await
            .unwrap();
        let agent = Agent {
            ip: "127.0.0.1".to_string(),
            port: 1,
            ..Default::default()
        };
        let payload = seeded_backup_payload(&services, "/srv/data").await;
        let job = manager.new_job(agent, payload).await.unwrap();

        // the forget request cannot reach the agent; completion stands
        let updated = manager
            .update_job_progress(job.id, json!({"message_type": "summary"}))
            .await
            .unwrap();

        assert!(updated.done);
        assert!(updated.end_time.is_some());
        let stored = services.jobs.get(job.id).await.unwrap().unwrap();
        assert!(stored.done);
    }

    #[tokio::test]
    async fn should_publish_error_frames_on_error_callback() {
        let services = Services::in_memory();
        let (sender, _dispatch) = mpsc::channel(4);
        let (notifier, mut frames) = crate::notify::test_channel(8);
        let manager = JobManager::new(services, sender, notifier).unwrap();
        let job = manager.new_job(Agent::default(), stop_payload()).await.unwrap();

        manager
            .fail_job(job.id, "exit status 1".to_string(), "restic failed".to_string())
            .await
            .unwrap();

        match frames.recv().await.unwrap() {
            Frame::Error { error, msg } => {
                assert_eq!(error, "exit status 1");
                assert_eq!(msg, "restic failed");
            }
            other => panic!("unexpected frame {other:?}"),
        }
        match frames.recv().await.unwrap() {
            Frame::JobError { job } => assert!(job.aborted),
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[tokio::test]
    async fn should_leave_job_untouched_when_stop_cannot_reach_agent() {
        let (manager, _receiver, services) = test_manager(4);
        let agent = Agent {
            ip: "127.0.0.1".to_string(),
            port: 1,
            ..Default::default()
        };
        let job = manager.new_job(agent, stop_payload()).await.unwrap();

        let result = manager.stop_job(&job).await;
        assert!(matches!(result, Err(JobError::Transport(_))));

        let stored = services.jobs.get(job.id).await.unwrap().unwrap();
        assert!(!stored.done);
        assert!(!stored.aborted);
    }
}
