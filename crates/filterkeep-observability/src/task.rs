//! Cancellable periodic background tasks

use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;

/// Handle to a task spawned by [`spawn_periodic`]
///
/// Dropping the handle also stops the task, at its next wake-up.
#[derive(Debug)]
pub struct PeriodicTask {
    name: &'static str,
    interval: Duration,
    shutdown_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Signal the task to stop and wait until it has exited
    ///
    /// A tick already in progress runs to completion first.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        if let Err(e) = self.handle.await {
            tracing::warn!(task = self.name, "Periodic task ended abnormally: {}", e);
        }
    }
}

/// Spawn `tick` every `interval` until shut down
///
/// The first tick runs one full interval after spawning.
pub fn spawn_periodic<F, Fut>(name: &'static str, interval: Duration, mut tick: F) -> PeriodicTask
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

    let handle = tokio::spawn(async move {
        tracing::debug!(task = name, interval_ms = interval.as_millis() as u64, "Starting periodic task");

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::debug!(task = name, "Periodic task shutting down");
                    break;
                }
                _ = sleep(interval) => {
                    tick().await;
                }
            }
        }
    });

    PeriodicTask {
        name,
        interval,
        shutdown_tx,
        handle,
    }
}
