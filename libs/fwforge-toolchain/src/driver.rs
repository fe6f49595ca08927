//! Subprocess driver for the `meta-imagebuilder` toolchain.
//!
//! Mirrors `original_source/worker.py`'s `Worker.setup_meta`/`run_meta`:
//! one-time git clone into a worker-local directory, then repeated
//! `sh meta <cmd>` invocations with build parameters passed as
//! upper-cased environment variables.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, info, instrument};

use crate::error::ToolchainError;

/// The three subcommands the factory drives through `sh meta`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaCommand {
    Info,
    Manifest,
    Image,
    PackageList,
}

impl MetaCommand {
    fn as_arg(self) -> &'static str {
        match self {
            MetaCommand::Info => "info",
            MetaCommand::Manifest => "manifest",
            MetaCommand::Image => "image",
            MetaCommand::PackageList => "package_list",
        }
    }
}

/// The decoded result of a `sh meta <cmd>` invocation.
#[derive(Debug, Clone)]
pub struct MetaOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Drives one worker's private checkout of the meta-imagebuilder
/// toolchain. Each [`ToolchainDriver`] owns exactly one `location`
/// directory on disk, matching the original's one-worker-one-checkout
/// layout (build workers and update workers never share a checkout).
#[derive(Debug, Clone)]
pub struct ToolchainDriver {
    location: PathBuf,
    meta_repo_url: String,
}

impl ToolchainDriver {
    #[must_use]
    pub fn new(location: impl Into<PathBuf>) -> Self {
        Self {
            location: location.into(),
            meta_repo_url: "https://github.com/aparcar/meta-imagebuilder.git".to_string(),
        }
    }

    #[must_use]
    pub fn location(&self) -> &Path {
        &self.location
    }

    /// Clone the meta-imagebuilder toolchain into `location` if it is not
    /// already present. Idempotent: a second call against an already-set-up
    /// location is a no-op. Setup failure is fatal — the worker cannot run
    /// any `sh meta` command without it.
    #[instrument(skip(self), fields(location = %self.location.display()))]
    pub async fn ensure_setup(&self) -> Result<(), ToolchainError> {
        tokio::fs::create_dir_all(&self.location)
            .await
            .map_err(|e| ToolchainError::Setup {
                location: self.location.display().to_string(),
                reason: format!("failed to create worker directory: {e}"),
            })?;

        if self.location.join("meta").exists() {
            debug!("meta toolchain already present, skipping clone");
            return Ok(());
        }

        let status = Command::new("git")
            .args(["clone", &self.meta_repo_url, "."])
            .current_dir(&self.location)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .status()
            .await
            .map_err(|e| ToolchainError::Setup {
                location: self.location.display().to_string(),
                reason: format!("failed to spawn git clone: {e}"),
            })?;

        if !status.success() {
            return Err(ToolchainError::Setup {
                location: self.location.display().to_string(),
                reason: format!("git clone exited with {status}"),
            });
        }

        info!("meta toolchain successfully set up");
        Ok(())
    }

    /// Run `sh meta <cmd>` with `params` exported as upper-cased
    /// environment variables, inheriting the current process environment.
    #[instrument(skip(self, params), fields(cmd = cmd.as_arg()))]
    pub async fn run(
        &self,
        cmd: MetaCommand,
        params: &BTreeMap<String, String>,
    ) -> Result<MetaOutput, ToolchainError> {
        let mut command = Command::new("sh");
        command
            .arg("meta")
            .arg(cmd.as_arg())
            .current_dir(&self.location)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        for (key, value) in params {
            command.env(key.to_uppercase(), value);
        }

        let full_command = format!("sh meta {}", cmd.as_arg());
        let output = command
            .output()
            .await
            .map_err(|source| ToolchainError::Spawn {
                command: full_command,
                source,
            })?;

        Ok(MetaOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meta_command_args_match_toolchain_subcommands() {
        assert_eq!(MetaCommand::Info.as_arg(), "info");
        assert_eq!(MetaCommand::Manifest.as_arg(), "manifest");
        assert_eq!(MetaCommand::Image.as_arg(), "image");
        assert_eq!(MetaCommand::PackageList.as_arg(), "package_list");
    }

    #[tokio::test]
    async fn ensure_setup_creates_location_directory() {
        let dir = std::env::temp_dir().join(format!(
            "fwforge-toolchain-test-{}",
            std::process::id()
        ));
        let driver = ToolchainDriver::new(&dir);
        // git clone will fail in a sandboxed test environment without
        // network access; we only assert the directory gets created
        // before that failure, matching setup_meta's os.makedirs-first
        // ordering.
        let _ = driver.ensure_setup().await;
        assert!(dir.exists());
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
