//! Process-wide shutdown signal shared by all long-running tasks.

use std::time::Duration;
use tokio::sync::broadcast;

/// Bounded wait for background tasks after shutdown is requested; in-flight
/// outbound agent calls are not forcibly cancelled.
pub const GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Handle used to request shutdown and to hand out per-task signals.
#[derive(Debug, Clone)]
pub struct Shutdown {
    sender: broadcast::Sender<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1);
        Shutdown { sender }
    }

    pub fn subscribe(&self) -> Signal {
        Signal(self.sender.subscribe())
    }

    pub fn request(&self) {
        // no receivers just means nothing is running yet
        let _ = self.sender.send(());
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Shutdown::new()
    }
}

/// One task's view of the shutdown signal.
#[derive(Debug)]
pub struct Signal(broadcast::Receiver<()>);

impl Signal {
    /// Completes once shutdown has been requested. A dropped or lagged sender
    /// counts as shutdown.
    pub async fn recv(&mut self) {
        let _ = self.0.recv().await;
    }
}
