//! Sync scheduling - manual requests and the auto-mode interval.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, error, info};

use vaultsync_common::{Error, Result};

use crate::client::SyncResult;
use crate::protocol::RequestType;
use crate::settings::SyncMode;

/// Messages accepted by the scheduler task.
#[derive(Debug)]
pub enum ScheduledRequest {
    /// Run one cycle of the given kind.
    Sync(RequestType),
    /// Stop the scheduler.
    Shutdown,
}

type Envelope = (ScheduledRequest, oneshot::Sender<SyncResult>);

/// Front end for submitting sync requests to a running scheduler.
#[derive(Clone)]
pub struct SyncScheduler {
    mode: Arc<RwLock<SyncMode>>,
    request_tx: mpsc::Sender<Envelope>,
    shutdown: Arc<RwLock<bool>>,
}

impl SyncScheduler {
    /// Create a scheduler; `period` applies while the mode is auto.
    pub fn new(mode: SyncMode, period: Duration) -> (Self, SyncSchedulerHandle) {
        let (request_tx, request_rx) = mpsc::channel(16);
        let mode = Arc::new(RwLock::new(mode));
        let shutdown = Arc::new(RwLock::new(false));

        let scheduler = Self {
            mode: mode.clone(),
            request_tx,
            shutdown: shutdown.clone(),
        };

        let handle = SyncSchedulerHandle {
            mode,
            period,
            request_rx,
            shutdown,
        };

        (scheduler, handle)
    }

    /// Request a cycle and wait for its result.
    pub async fn request_sync(&self, request_type: RequestType) -> Result<SyncResult> {
        let (response_tx, response_rx) = oneshot::channel();

        self.request_tx
            .send((ScheduledRequest::Sync(request_type), response_tx))
            .await
            .map_err(|_| Error::Scheduler("Scheduler not running".to_string()))?;

        response_rx
            .await
            .map_err(|_| Error::Scheduler("Failed to receive sync result".to_string()))
    }

    pub async fn set_mode(&self, mode: SyncMode) {
        *self.mode.write().await = mode;
    }

    pub async fn mode(&self) -> SyncMode {
        *self.mode.read().await
    }

    /// Stop the scheduler after any cycle in progress.
    pub async fn shutdown(&self) {
        *self.shutdown.write().await = true;

        let (response_tx, _) = oneshot::channel();
        let _ = self
            .request_tx
            .send((ScheduledRequest::Shutdown, response_tx))
            .await;
    }
}

/// Background half of the scheduler; consumed by [`SyncSchedulerHandle::run`].
pub struct SyncSchedulerHandle {
    mode: Arc<RwLock<SyncMode>>,
    period: Duration,
    request_rx: mpsc::Receiver<Envelope>,
    shutdown: Arc<RwLock<bool>>,
}

impl SyncSchedulerHandle {
    /// Run the scheduler loop.
    ///
    /// This should be spawned in a tokio task. `sync_fn` runs one cycle;
    /// cycles never overlap because the loop awaits each one.
    pub async fn run<F, Fut>(mut self, sync_fn: F)
    where
        F: Fn(RequestType) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = SyncResult> + Send,
    {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Sync scheduler started");

        loop {
            if *self.shutdown.read().await {
                break;
            }

            tokio::select! {
                received = self.request_rx.recv() => {
                    let Some((request, response_tx)) = received else {
                        debug!("All scheduler senders dropped");
                        break;
                    };
                    match request {
                        ScheduledRequest::Shutdown => {
                            info!("Received shutdown request");
                            break;
                        }
                        ScheduledRequest::Sync(request_type) => {
                            debug!("Processing sync request: {:?}", request_type);
                            let result = sync_fn(request_type).await;
                            let _ = response_tx.send(result);
                        }
                    }
                }

                _ = Self::tick(&mut ticker) => {
                    if *self.mode.read().await != SyncMode::Auto {
                        continue;
                    }
                    debug!("Triggering scheduled sync");
                    let result = sync_fn(RequestType::Full).await;
                    if result.success {
                        info!(
                            "Scheduled sync completed: {} uploaded, {} downloaded, {} pending",
                            result.uploaded, result.downloaded, result.conflicts_pending
                        );
                    } else {
                        error!("Scheduled sync failed: {}", result.message);
                    }
                }
            }
        }

        info!("Sync scheduler stopped");
    }

    async fn tick(ticker: &mut Interval) {
        ticker.tick().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn ok_result(message: &str) -> SyncResult {
        SyncResult {
            success: true,
            message: message.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_mode_change() {
        let (scheduler, _handle) = SyncScheduler::new(SyncMode::Manual, Duration::from_secs(60));
        assert_eq!(scheduler.mode().await, SyncMode::Manual);

        scheduler.set_mode(SyncMode::Auto).await;
        assert_eq!(scheduler.mode().await, SyncMode::Auto);
    }

    #[tokio::test]
    async fn test_manual_request_runs_once() {
        let (scheduler, handle) = SyncScheduler::new(SyncMode::Manual, Duration::from_secs(3600));

        let count = Arc::new(AtomicU32::new(0));
        let count_clone = count.clone();
        let task = tokio::spawn(handle.run(move |request_type| {
            let count = count_clone.clone();
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                ok_result(&format!("{:?}", request_type))
            }
        }));

        let result = scheduler.request_sync(RequestType::Pull).await.unwrap();
        assert!(result.success);
        assert_eq!(result.message, "Pull");
        assert_eq!(count.load(Ordering::SeqCst), 1);

        scheduler.shutdown().await;
        task.await.unwrap();

        assert!(matches!(
            scheduler.request_sync(RequestType::Full).await,
            Err(Error::Scheduler(_))
        ));
    }

    #[tokio::test]
    async fn test_auto_mode_runs_on_interval() {
        let (scheduler, handle) = SyncScheduler::new(SyncMode::Auto, Duration::from_millis(10));

        let count = Arc::new(AtomicU32::new(0));
        let count_clone = count.clone();
        let task = tokio::spawn(handle.run(move |_| {
            let count = count_clone.clone();
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                ok_result("tick")
            }
        }));

        tokio::time::sleep(Duration::from_millis(60)).await;
        scheduler.shutdown().await;
        task.await.unwrap();

        assert!(count.load(Ordering::SeqCst) >= 2);
    }
}
