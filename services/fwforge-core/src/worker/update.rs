//! Update worker protocol (spec §4.D.2): refresh one subtarget's
//! profile/package catalog from the toolchain.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{error, info, instrument, warn};

use fwforge_id::SubtargetKey;
use fwforge_toolchain::{parse_info, parse_package_list, MetaCommand, ToolchainDriver};

use crate::db::{OutdatedSubtarget, ProfileRecord, RequestTier};

use super::{VersionOverlay, WorkerPaths};

/// An update worker: refreshes profile and package-catalog state for
/// subtargets handed to it by the updater loop.
pub struct UpdateWorker {
    driver: ToolchainDriver,
    request_tier: Arc<dyn RequestTier>,
    paths: WorkerPaths,
}

impl UpdateWorker {
    #[must_use]
    pub fn new(request_tier: Arc<dyn RequestTier>, paths: WorkerPaths) -> Self {
        Self {
            driver: ToolchainDriver::new(paths.location.clone()),
            request_tier,
            paths,
        }
    }

    /// One-time checkout setup, to run before this worker's first job.
    pub async fn ensure_setup(&self) -> Result<(), fwforge_toolchain::ToolchainError> {
        self.driver.ensure_setup().await
    }

    fn base_params(&self, key: &SubtargetKey, overlay: &VersionOverlay) -> BTreeMap<String, String> {
        let mut params = BTreeMap::new();
        params.insert("distro".to_string(), key.distro.clone());
        params.insert("version".to_string(), key.version.clone());
        params.insert("target".to_string(), key.target.clone());
        params.insert("subtarget".to_string(), key.subtarget.clone());
        if let Some(ib_version) = &overlay.ib_version {
            params.insert("ib_version".to_string(), ib_version.clone());
        }
        if !overlay.repos.is_empty() {
            params.insert("repos".to_string(), overlay.repos.join(" "));
        }
        params
    }

    /// Refresh one subtarget: profiles and default packages via `info`,
    /// platform.sh-based sysupgrade support detection, then the full
    /// package catalog via `package_list`. Logs failures rather than
    /// propagating them, matching the reference updater's loop that
    /// never stops on a single subtarget's failure.
    #[instrument(skip(self, job, overlay), fields(subtarget = %job.subtarget))]
    pub async fn update(&self, job: OutdatedSubtarget, overlay: VersionOverlay) {
        let key = job.subtarget;
        let params = self.base_params(&key, &overlay);

        match self.driver.run(MetaCommand::Info, &params).await {
            Ok(output) if output.success => {
                let info = parse_info(&output.stdout);
                let profiles: Vec<ProfileRecord> = info
                    .profiles
                    .into_iter()
                    .map(|p| ProfileRecord {
                        name: p.name,
                        description: p.description,
                        packages: p.packages,
                    })
                    .collect();
                if let Err(e) = self
                    .request_tier
                    .insert_profiles(&key, &info.default_packages, &profiles)
                    .await
                {
                    error!(error = %e, "failed to persist profiles");
                }

                if self.platform_sh_supported(&key) {
                    info!(target = %key.target, "target is supported");
                    if let Err(e) = self.request_tier.insert_supported(&key).await {
                        error!(error = %e, "failed to mark subtarget supported");
                    }
                }
            }
            Ok(_) => warn!("info invocation exited nonzero, skipping profile refresh"),
            Err(e) => error!(error = %e, "failed to invoke info toolchain"),
        }

        match self.driver.run(MetaCommand::PackageList, &params).await {
            Ok(output) if output.success => {
                let packages: Vec<(String, String)> = parse_package_list(&output.stdout)
                    .into_iter()
                    .map(|p| (p.name, p.version))
                    .collect();
                info!(count = packages.len(), "found packages");
                if let Err(e) = self
                    .request_tier
                    .insert_packages_available(&key, &packages)
                    .await
                {
                    error!(error = %e, "failed to persist package catalog");
                }
            }
            Ok(_) => warn!("package_list invocation exited nonzero, skipping catalog refresh"),
            Err(e) => error!(error = %e, "failed to invoke package_list toolchain"),
        }

        if let Err(e) = self.request_tier.update_last_refreshed(&key).await {
            error!(error = %e, "failed to update last-refreshed timestamp");
        }
    }

    /// A subtarget's target supports `sysupgrade` when its imagebuilder
    /// checkout carries `target/linux/<target>/base-files/lib/upgrade/platform.sh`.
    fn platform_sh_supported(&self, key: &SubtargetKey) -> bool {
        self.paths
            .location
            .join("imagebuilder")
            .join(&key.distro)
            .join(&key.version)
            .join(&key.target)
            .join(&key.subtarget)
            .join("target/linux")
            .join(&key.target)
            .join("base-files/lib/upgrade/platform.sh")
            .exists()
    }
}
