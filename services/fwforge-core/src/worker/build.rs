//! Build worker protocol (spec §4.D.1): manifest → image-hash
//! derivation → dedup short-circuit → build → outcome → link.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{error, info, instrument, warn};

use fwforge_id::ImageHash;
use fwforge_store::ArtifactStore;
use fwforge_toolchain::{parse_manifest, MetaCommand, ToolchainDriver};

use crate::db::{BuildJob, ImageKind, NewImage, RequestStatus, RequestTier};

use super::{VersionOverlay, WorkerPaths};

/// A build worker: one [`ToolchainDriver`] checkout, one [`ArtifactStore`]
/// handle, and the shared request tier.
pub struct BuildWorker {
    driver: ToolchainDriver,
    store: ArtifactStore,
    request_tier: Arc<dyn RequestTier>,
    paths: WorkerPaths,
}

impl BuildWorker {
    #[must_use]
    pub fn new(
        store: ArtifactStore,
        request_tier: Arc<dyn RequestTier>,
        paths: WorkerPaths,
    ) -> Self {
        Self {
            driver: ToolchainDriver::new(paths.location.clone()),
            store,
            request_tier,
            paths,
        }
    }

    /// One-time checkout setup, to run before this worker's first job.
    pub async fn ensure_setup(&self) -> Result<(), fwforge_toolchain::ToolchainError> {
        self.driver.ensure_setup().await
    }

    fn base_params(&self, job: &BuildJob, overlay: &VersionOverlay) -> BTreeMap<String, String> {
        let mut params = BTreeMap::new();
        params.insert("request_hash".to_string(), job.request_hash.to_string());
        params.insert("distro".to_string(), job.subtarget.distro.clone());
        params.insert("version".to_string(), job.subtarget.version.clone());
        params.insert("target".to_string(), job.subtarget.target.clone());
        params.insert("subtarget".to_string(), job.subtarget.subtarget.clone());
        params.insert("profile".to_string(), job.profile.clone());
        params.insert("packages".to_string(), job.packages.join(" "));
        if let Some(defaults_hash) = &job.defaults_hash {
            params.insert("defaults_hash".to_string(), defaults_hash.to_string());
        }
        if let Some(ib_version) = &overlay.ib_version {
            params.insert("ib_version".to_string(), ib_version.clone());
        }
        if !overlay.repos.is_empty() {
            params.insert("repos".to_string(), overlay.repos.join(" "));
        }
        params
    }

    /// Run the full build protocol for one claimed job. Infallible
    /// against per-job failures: every error path writes a terminal
    /// status to the request row rather than propagating (spec §7,
    /// "Worker errors become terminal states ... never thrown to the
    /// dispatcher").
    #[instrument(skip(self, job, overlay), fields(request_hash = %job.request_hash))]
    pub async fn build(&self, job: BuildJob, overlay: VersionOverlay) {
        let fail_log_path = self
            .store
            .layout()
            .faillog_path(&self.paths.download_folder, job.request_hash.as_str());

        let mut params = self.base_params(&job, &overlay);

        // 1. Manifest phase.
        let manifest_output = match self.driver.run(MetaCommand::Manifest, &params).await {
            Ok(output) => output,
            Err(e) => {
                error!(error = %e, "failed to invoke manifest toolchain");
                self.fail_request(&job, RequestStatus::ManifestFail, &fail_log_path, &params, None, Some(&e.to_string()))
                    .await;
                return;
            }
        };

        if !manifest_output.success {
            warn!("manifest invocation exited nonzero");
            self.fail_request(
                &job,
                RequestStatus::ManifestFail,
                &fail_log_path,
                &params,
                Some(&manifest_output.stdout),
                Some(&manifest_output.stderr),
            )
            .await;
            return;
        }

        let manifest_hash =
            fwforge_id::ManifestHash::from_digest_input(&manifest_output.stdout);

        let manifest_packages: BTreeMap<String, String> = parse_manifest(&manifest_output.stdout)
            .into_iter()
            .map(|entry| (entry.name, entry.version))
            .collect();

        if let Err(e) = self
            .request_tier
            .add_manifest_packages(&manifest_hash, &manifest_packages)
            .await
        {
            error!(error = %e, "failed to persist manifest packages");
        }
        info!(manifest_hash = %manifest_hash, "parsed manifest");

        // 2. Image-hash derivation.
        let image_hash = ImageHash::from_manifest_hash(&manifest_hash);
        let image_dir = self.store.image_dir(&job.subtarget, &job.profile, &image_hash);

        // 3. Dedup short-circuit.
        if self.store.image_exists(&image_dir).await {
            let status = match self.request_tier.get_image_sysupgrade(&image_hash).await {
                Ok(Some(sysupgrade)) if sysupgrade.is_empty() => RequestStatus::NoSysupgrade,
                Ok(_) => RequestStatus::Created,
                Err(e) => {
                    warn!(error = %e, "could not look up existing image, defaulting to created");
                    RequestStatus::Created
                }
            };
            info!(image_hash = %image_hash, "image already built, skipping toolchain invocation");
            if let Err(e) = self
                .request_tier
                .done_build_job(&job.request_hash, &image_hash, status)
                .await
            {
                error!(error = %e, "failed to link deduped request to image");
            }
            return;
        }

        // 4. Build phase.
        let build_dir = match tempfile_dir(&self.paths.tempdir).await {
            Ok(dir) => dir,
            Err(e) => {
                error!(error = %e, "failed to allocate build directory");
                self.fail_request(&job, RequestStatus::BuildFail, &fail_log_path, &params, None, Some(&e.to_string()))
                    .await;
                return;
            }
        };

        params.insert("worker".to_string(), self.paths.location.display().to_string());
        params.insert("bin_dir".to_string(), build_dir.display().to_string());
        params.insert("j".to_string(), num_cpus().to_string());
        let mut extra_image_name = manifest_hash.to_string();
        if let Some(defaults_hash) = &job.defaults_hash {
            let defaults_dir = build_dir.join("files").join("etc").join("uci-defaults");
            if let Err(e) = tokio::fs::create_dir_all(&defaults_dir).await {
                error!(error = %e, "failed to create uci-defaults directory");
            }
            match self.request_tier.get_defaults(defaults_hash).await {
                Ok(content) => {
                    if let Err(e) = tokio::fs::write(
                        defaults_dir.join("99-server-defaults"),
                        content,
                    )
                    .await
                    {
                        error!(error = %e, "failed to write uci-defaults file");
                    }
                }
                Err(e) => error!(error = %e, "failed to fetch defaults content"),
            }
            params.insert(
                "files".to_string(),
                build_dir.join("files").display().to_string() + "/",
            );
            extra_image_name.push('-');
            extra_image_name.push_str(&defaults_hash.short(6));
        }
        params.insert("extra_image_name".to_string(), extra_image_name);
        params.insert("no_download".to_string(), "1".to_string());

        let build_start = std::time::Instant::now();
        let image_output = match self.driver.run(MetaCommand::Image, &params).await {
            Ok(output) => output,
            Err(e) => {
                error!(error = %e, "failed to invoke image toolchain");
                self.fail_request(&job, RequestStatus::BuildFail, &fail_log_path, &params, None, Some(&e.to_string()))
                    .await;
                let _ = tokio::fs::remove_dir_all(&build_dir).await;
                return;
            }
        };
        let build_seconds = build_start.elapsed().as_secs() as i64;

        // 5. Outcome.
        if !image_output.success {
            warn!("image invocation exited nonzero");
            self.fail_request(
                &job,
                RequestStatus::BuildFail,
                &fail_log_path,
                &params,
                Some(&image_output.stdout),
                Some(&image_output.stderr),
            )
            .await;
            let _ = tokio::fs::remove_dir_all(&build_dir).await;
            return;
        }

        if let Err(e) = self.store.move_in(&build_dir, &image_dir).await {
            error!(error = %e, "failed to move build artifacts into place");
            self.fail_request(&job, RequestStatus::BuildFail, &fail_log_path, &params, Some(&image_output.stdout), Some(&image_output.stderr))
                .await;
            let _ = tokio::fs::remove_dir_all(&build_dir).await;
            return;
        }
        let _ = tokio::fs::remove_dir_all(&build_dir).await;

        let sysupgrade = fwforge_store::find_sysupgrade(&image_dir);
        let status = match &sysupgrade {
            Some(_) => RequestStatus::Created,
            None if image_output.stdout.contains("too big") => {
                warn!("built image was too big");
                self.fail_request(
                    &job,
                    RequestStatus::ImagesizeFail,
                    &fail_log_path,
                    &params,
                    Some(&image_output.stdout),
                    Some(&image_output.stderr),
                )
                .await;
                return;
            }
            None => RequestStatus::NoSysupgrade,
        };

        let success_log_path = self.store.layout().buildlog_path(&image_dir, &image_hash);
        if let Err(e) = self
            .store
            .write_log(&success_log_path, &params, Some(&image_output.stdout), None)
            .await
        {
            warn!(error = %e, "failed to write success buildlog");
        }

        let new_image = NewImage {
            image_hash: image_hash.clone(),
            manifest_hash,
            subtarget: job.subtarget.clone(),
            profile: job.profile.clone(),
            directory: image_dir.display().to_string(),
            sysupgrade: sysupgrade.unwrap_or_default(),
            build_seconds,
            kind: ImageKind::Snapshot,
        };
        if let Err(e) = self.request_tier.add_image(&new_image).await {
            error!(error = %e, "failed to insert image row");
        }

        info!(request_hash = %job.request_hash, image_hash = %image_hash, "link request to image");
        if let Err(e) = self
            .request_tier
            .done_build_job(&job.request_hash, &image_hash, status)
            .await
        {
            error!(error = %e, "failed to finalize build job");
        }
    }

    async fn fail_request(
        &self,
        job: &BuildJob,
        status: RequestStatus,
        fail_log_path: &std::path::Path,
        params: &BTreeMap<String, String>,
        stdout: Option<&str>,
        stderr: Option<&str>,
    ) {
        if let Err(e) = self.store.write_log(fail_log_path, params, stdout, stderr).await {
            warn!(error = %e, "failed to write fail log");
        }
        if let Err(e) = self
            .request_tier
            .set_image_requests_status(&job.request_hash, status)
            .await
        {
            error!(error = %e, "failed to set terminal status");
        }
    }
}

async fn tempfile_dir(tempdir: &std::path::Path) -> std::io::Result<std::path::PathBuf> {
    tokio::fs::create_dir_all(tempdir).await?;
    let dir = tempdir.join(format!("fwforge-build-{}", ulid_like()));
    tokio::fs::create_dir_all(&dir).await?;
    Ok(dir)
}

/// A short unique-enough suffix for a build's scratch directory. Not a
/// content fingerprint — just needs to avoid colliding with concurrent
/// builds on the same worker.
fn ulid_like() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    format!(
        "{}-{}",
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1)
}
