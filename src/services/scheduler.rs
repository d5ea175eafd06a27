//! Periodic background jobs with cooperative shutdown.

use std::future::Future;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{error, info};

/// A job run on a fixed interval until shutdown is signalled.
///
/// A run in progress is never interrupted; shutdown is observed between runs.
pub struct PeriodicTask {
    name: &'static str,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    /// Spawn `job` on the current tokio runtime. The first run happens
    /// immediately.
    pub fn spawn<F, Fut>(
        name: &'static str,
        period: Duration,
        mut shutdown_rx: broadcast::Receiver<()>,
        mut job: F,
    ) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            info!("{} loop started (every {:?})", name, period);
            let mut ticker = interval(period);
            // Overlong runs push the schedule back instead of bursting
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => job().await,
                    _ = shutdown_rx.recv() => {
                        info!("{} loop received shutdown signal", name);
                        break;
                    }
                }
            }
        });

        Self { name, handle }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Wait for the loop to exit.
    pub async fn join(self) {
        if let Err(e) = self.handle.await {
            error!("{} loop terminated abnormally: {}", self.name, e);
        }
    }
}
