//! Best-effort fan-out of job lifecycle events to connected observers.
//!
//! One bounded outbound queue feeds a single writer task that broadcasts each
//! frame to every live observer connection. Publishing never blocks; a full
//! queue drops the frame. Observers must treat their view as eventually
//! consistent and pull authoritative state through the service layer.

use crate::shutdown::Signal;
use axum::extract::ws::{Message, WebSocket};
use dorsal_core::entity::job::Job;
use futures::{stream::SplitSink, SinkExt};
use serde::Serialize;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::{mpsc, Mutex};

/// Outbound observer frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    JobProgress { job: Job },
    JobError { job: Job },
    Error { error: String, msg: String },
}

pub type ObserverId = uuid::Uuid;

type Sink = SplitSink<WebSocket, Message>;

/// Live observer connections. The writer task owns delivery through the write
/// halves stored here; each connection's read loop owns its teardown.
#[derive(Clone, Default)]
pub struct Observers(Arc<Mutex<HashMap<ObserverId, Sink>>>);

impl Observers {
    pub async fn insert(&self, sink: Sink) -> ObserverId {
        let id = ObserverId::new_v4();
        self.0.lock().await.insert(id, sink);
        id
    }

    pub async fn remove(&self, id: ObserverId) {
        self.0.lock().await.remove(&id);
    }

    pub async fn len(&self) -> usize {
        self.0.lock().await.len()
    }

    /// Writes raw text to a single observer, used to echo unrecognized
    /// inbound frames.
    pub async fn send_to(&self, id: ObserverId, text: String) {
        if let Some(sink) = self.0.lock().await.get_mut(&id) {
            if let Err(err) = sink.send(Message::Text(text.into())).await {
                tracing::warn!(observer = %id, error = %err, "failed to echo to observer");
            }
        }
    }
}

/// Non-blocking publish handle onto the notification bus.
#[derive(Debug, Clone)]
pub struct Notifier {
    sender: mpsc::Sender<Frame>,
}

impl Notifier {
    /// Queues a frame for broadcast. Never blocks: if the outbound queue is
    /// full (or the writer is gone) the frame is dropped.
    pub fn publish(&self, frame: Frame) {
        if self.sender.try_send(frame).is_err() {
            tracing::debug!("notification queue full, dropping frame");
        }
    }
}

/// Builds a notifier whose published frames can be inspected directly,
/// without a writer task.
#[cfg(test)]
pub(crate) fn test_channel(capacity: usize) -> (Notifier, mpsc::Receiver<Frame>) {
    let (sender, receiver) = mpsc::channel(capacity);
    (Notifier { sender }, receiver)
}

/// Writer task draining the outbound queue and broadcasting each frame to
/// every observer.
pub struct NotificationBus {
    receiver: mpsc::Receiver<Frame>,
    observers: Observers,
    signal: Signal,
}

impl NotificationBus {
    pub fn new(capacity: usize, observers: Observers, signal: Signal) -> (Notifier, Self) {
        let (sender, receiver) = mpsc::channel(capacity);
        let bus = NotificationBus {
            receiver,
            observers,
            signal,
        };
        (Notifier { sender }, bus)
    }

    #[tracing::instrument(name = "notify", skip_all)]
    pub async fn run(mut self) -> eyre::Result<()> {
        loop {
            tokio::select! {
                _ = self.signal.recv() => {
                    tracing::debug!("notification writer stopping");
                    break;
                }
                frame = self.receiver.recv() => {
                    let Some(frame) = frame else { break };
                    self.broadcast(frame).await;
                }
            }
        }
        Ok(())
    }

    async fn broadcast(&self, frame: Frame) {
        let text = match serde_json::to_string(&frame) {
            Ok(text) => text,
            Err(err) => {
                tracing::error!(error = %err, "failed to encode observer frame");
                return;
            }
        };
        let mut observers = self.observers.0.lock().await;
        for (id, sink) in observers.iter_mut() {
            // a broken observer is skipped, not closed; its read loop will
            // notice and unregister it
            if let Err(err) = sink.send(Message::Text(text.clone().into())).await {
                tracing::warn!(observer = %id, error = %err, "failed to deliver frame");
            }
        }
    }
}
