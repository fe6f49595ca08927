//! Dispatcher: claims build jobs from the request tier and hands them
//! to the worker pool over a capacity-1 channel (spec §4.C/§4.D,
//! grounded on `original_source/worker.py`'s `Boss`).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{error, info, instrument};

use crate::config::FactoryConfig;
use crate::db::{BuildJob, RequestTier};
use crate::worker::VersionOverlay;

pub struct Dispatcher {
    request_tier: Arc<dyn RequestTier>,
    factory_config: Arc<FactoryConfig>,
    tx: mpsc::Sender<(BuildJob, VersionOverlay)>,
    idle_interval: Duration,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        request_tier: Arc<dyn RequestTier>,
        factory_config: Arc<FactoryConfig>,
        tx: mpsc::Sender<(BuildJob, VersionOverlay)>,
        idle_interval: Duration,
    ) -> Self {
        Self {
            request_tier,
            factory_config,
            tx,
            idle_interval,
        }
    }

    fn overlay_for(&self, job: &BuildJob) -> VersionOverlay {
        self.factory_config
            .version_config(&job.subtarget.distro, &job.subtarget.version)
            .map(|v| VersionOverlay {
                ib_version: v.parent_version.clone(),
                repos: v.repos.clone(),
            })
            .unwrap_or_default()
    }

    /// Run the claim loop until shutdown is signaled. Claims are tight:
    /// the dispatcher only sleeps when the queue is empty, matching the
    /// reference `Boss.run`'s `if build_job: ... else: time.sleep(10)`.
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            idle_interval_secs = self.idle_interval.as_secs(),
            "starting dispatcher"
        );

        let mut idle = tokio::time::interval(self.idle_interval);
        idle.tick().await;

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.request_tier.pop_build_job().await {
                Ok(Some(job)) => {
                    let overlay = self.overlay_for(&job);
                    info!(request_hash = %job.request_hash, "dispatching build job");
                    if self.tx.send((job, overlay)).await.is_err() {
                        error!("worker pool channel closed, stopping dispatcher");
                        break;
                    }
                }
                Ok(None) => {
                    tokio::select! {
                        _ = idle.tick() => {}
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() {
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    error!(error = %e, "failed to claim build job");
                    tokio::select! {
                        _ = idle.tick() => {}
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() {
                                break;
                            }
                        }
                    }
                }
            }
        }

        info!("dispatcher shutting down");
    }
}
