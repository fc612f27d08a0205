//! Shutdown coordination for the node.

use tokio::sync::broadcast;

/// Fan-out shutdown signal shared by the server and background tasks.
///
/// Clones share one broadcast channel; `trigger` releases every subscriber
/// at once so the listener stops accepting and in-flight requests drain.
#[derive(Clone)]
pub struct Shutdown {
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    /// Subscribe to the shutdown signal. Subscribe before spawning the
    /// task; later subscribers miss an already-fired signal.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Fire the signal.
    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn trigger_releases_every_subscriber() {
        let shutdown = Shutdown::new();
        let mut server = shutdown.subscribe();
        let mut task = shutdown.clone().subscribe();

        shutdown.trigger();
        assert!(server.recv().await.is_ok());
        assert!(task.recv().await.is_ok());
    }
}
