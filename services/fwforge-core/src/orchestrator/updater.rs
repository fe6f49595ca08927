//! Updater: claims outdated subtargets and hands them to the update
//! worker pool (spec §4.C/§4.D, grounded on
//! `original_source/worker.py`'s `Updater`).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{error, info, instrument};

use crate::config::FactoryConfig;
use crate::db::{OutdatedSubtarget, RequestTier};
use crate::worker::VersionOverlay;

pub struct Updater {
    request_tier: Arc<dyn RequestTier>,
    factory_config: Arc<FactoryConfig>,
    tx: mpsc::Sender<(OutdatedSubtarget, VersionOverlay)>,
    idle_interval: Duration,
}

impl Updater {
    #[must_use]
    pub fn new(
        request_tier: Arc<dyn RequestTier>,
        factory_config: Arc<FactoryConfig>,
        tx: mpsc::Sender<(OutdatedSubtarget, VersionOverlay)>,
        idle_interval: Duration,
    ) -> Self {
        Self {
            request_tier,
            factory_config,
            tx,
            idle_interval,
        }
    }

    fn overlay_for(&self, job: &OutdatedSubtarget) -> VersionOverlay {
        self.factory_config
            .version_config(&job.subtarget.distro, &job.subtarget.version)
            .map(|v| VersionOverlay {
                ib_version: v.parent_version.clone(),
                repos: v.repos.clone(),
            })
            .unwrap_or_default()
    }

    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            idle_interval_secs = self.idle_interval.as_secs(),
            "starting updater"
        );

        let mut idle = tokio::time::interval(self.idle_interval);
        idle.tick().await;

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.request_tier.pop_outdated_subtarget().await {
                Ok(Some(job)) => {
                    let overlay = self.overlay_for(&job);
                    info!(subtarget = %job.subtarget, "found outdated subtarget");
                    if self.tx.send((job, overlay)).await.is_err() {
                        error!("update worker pool channel closed, stopping updater");
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
                    error!(error = %e, "failed to claim outdated subtarget");
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

        info!("updater shutting down");
    }
}
