//! Collector: reclaims outdated images, manifests, and stale request
//! rows on a periodic sweep (spec §4.C/§5, grounded on
//! `original_source/worker.py`'s `GarbageCollector`).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, instrument};

use fwforge_store::ArtifactStore;

use crate::db::{ReclaimableImage, RequestTier};

#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub interval: Duration,
    pub snapshot_ttl_hours: i64,
    pub custom_image_ttl_days: i64,
    pub stale_request_ttl_days: i64,
}

pub struct Collector {
    request_tier: Arc<dyn RequestTier>,
    store: ArtifactStore,
    config: CollectorConfig,
}

impl Collector {
    #[must_use]
    pub fn new(request_tier: Arc<dyn RequestTier>, store: ArtifactStore, config: CollectorConfig) -> Self {
        Self {
            request_tier,
            store,
            config,
        }
    }

    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            "starting collector"
        );

        let mut interval = tokio::time::interval(self.config.interval);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.sweep().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("collector shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn sweep(&self) {
        match self.request_tier.get_outdated_snapshots(self.config.snapshot_ttl_hours).await {
            Ok(images) => {
                let count = images.len();
                for image in images {
                    self.reclaim_image(image).await;
                }
                if count > 0 {
                    info!(count, "reclaimed outdated snapshot images");
                }
            }
            Err(e) => error!(error = %e, "failed to list outdated snapshots"),
        }

        match self.request_tier.get_outdated_customs(self.config.custom_image_ttl_days).await {
            Ok(images) => {
                let count = images.len();
                for image in images {
                    self.reclaim_image(image).await;
                }
                if count > 0 {
                    info!(count, "reclaimed outdated custom images");
                }
            }
            Err(e) => error!(error = %e, "failed to list outdated custom images"),
        }

        match self.request_tier.get_outdated_manifests().await {
            Ok(manifests) => {
                let count = manifests.len();
                for manifest in manifests {
                    if let Err(e) = self.request_tier.del_manifest(&manifest.manifest_hash).await {
                        error!(error = %e, manifest_hash = %manifest.manifest_hash, "failed to delete outdated manifest");
                    }
                }
                if count > 0 {
                    info!(count, "reclaimed outdated manifests");
                }
            }
            Err(e) => error!(error = %e, "failed to list outdated manifests"),
        }

        match self.request_tier.del_outdated_request(self.config.stale_request_ttl_days).await {
            Ok(count) if count > 0 => info!(count, "reclaimed stale request rows"),
            Ok(_) => {}
            Err(e) => error!(error = %e, "failed to reclaim stale request rows"),
        }
    }

    async fn reclaim_image(&self, image: ReclaimableImage) {
        if let Err(e) = self.request_tier.del_image(&image.image_hash).await {
            error!(error = %e, image_hash = %image.image_hash, "failed to delete image row");
        }
        if let Err(e) = self
            .store
            .delete_image_dir(std::path::Path::new(&image.directory))
            .await
        {
            error!(error = %e, directory = %image.directory, "failed to delete image directory");
        }
    }
}
