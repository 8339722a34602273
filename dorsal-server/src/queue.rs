//! Dispatch queue consumer.
//!
//! A single worker drains the bounded job queue and delivers each request to
//! its agent. Delivery is at-most-once: a failure is logged and the worker
//! moves to the next item; the job's state only changes through agent
//! callbacks.

use crate::manager::JobManager;
use crate::shutdown::Signal;
use dorsal_core::entity::job::JobRequest;
use dorsal_core::protocol::AgentRequest;
use std::sync::Arc;
use tokio::sync::mpsc;

pub struct DispatchWorker {
    receiver: mpsc::Receiver<JobRequest>,
    manager: Arc<JobManager>,
    signal: Signal,
}

impl DispatchWorker {
    pub fn new(
        receiver: mpsc::Receiver<JobRequest>,
        manager: Arc<JobManager>,
        signal: Signal,
    ) -> Self {
        DispatchWorker {
            receiver,
            manager,
            signal,
        }
    }

    #[tracing::instrument(name = "dispatch", skip_all)]
    pub async fn run(mut self) -> eyre::Result<()> {
        loop {
            tokio::select! {
                _ = self.signal.recv() => {
                    tracing::debug!("dispatch worker stopping");
                    break;
                }
                request = self.receiver.recv() => {
                    let Some(request) = request else { break };
                    self.deliver(request).await;
                }
            }
        }
        Ok(())
    }

    async fn deliver(&self, request: JobRequest) {
        tracing::debug!(job = %request.id, agent = %request.agent.name, "delivering job");
        let agent_request = AgentRequest::from(request.payload.clone());
        if let Err(err) = self
            .manager
            .send_request(&agent_request, &request.agent)
            .await
        {
            // no retry, no state change; the job only progresses through
            // agent callbacks
            tracing::warn!(job = %request.id, error = %err, "failed to deliver job");
        }
    }
}
