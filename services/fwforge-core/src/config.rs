//! Configuration for the image factory.
//!
//! Two layers, split the way the teacher splits per-process environment
//! settings from connection-pool tuning: [`ServiceConfig`] is read from
//! environment variables at startup (listen address, log level, poll
//! intervals); [`FactoryConfig`] is read from a TOML manifest describing
//! the distributions this factory builds for.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Process-level configuration, loaded from the environment.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address the liveness/readiness HTTP surface listens on.
    pub listen_addr: SocketAddr,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Path to the [`FactoryConfig`] TOML manifest.
    pub factory_config_path: PathBuf,

    /// Dispatcher poll interval when the build queue is empty.
    pub dispatcher_idle_interval: Duration,

    /// Updater poll interval when no subtarget is outdated.
    pub updater_idle_interval: Duration,

    /// Collector sweep interval.
    pub collector_interval: Duration,

    /// Whether to run pending migrations at startup.
    pub run_migrations: bool,
}

impl ServiceConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let listen_addr = std::env::var("FWFORGE_LISTEN_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
            .parse()
            .context("invalid FWFORGE_LISTEN_ADDR")?;

        let log_level = std::env::var("FWFORGE_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let factory_config_path = std::env::var("FWFORGE_CONFIG")
            .unwrap_or_else(|_| "fwforge.toml".to_string())
            .into();

        let dispatcher_idle_interval = Duration::from_secs(
            env_parsed("FWFORGE_DISPATCHER_IDLE_SECS").unwrap_or(10),
        );
        let updater_idle_interval =
            Duration::from_secs(env_parsed("FWFORGE_UPDATER_IDLE_SECS").unwrap_or(5));
        let collector_interval =
            Duration::from_secs(env_parsed("FWFORGE_COLLECTOR_INTERVAL_SECS").unwrap_or(6 * 3600));

        let run_migrations = std::env::var("FWFORGE_RUN_MIGRATIONS")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        Ok(Self {
            listen_addr,
            log_level,
            factory_config_path,
            dispatcher_idle_interval,
            updater_idle_interval,
            collector_interval,
            run_migrations,
        })
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

/// Per-version toolchain overlay: which parent toolchain version to
/// invoke and which extra package repositories to add.
#[derive(Debug, Clone, Deserialize)]
pub struct VersionConfig {
    pub parent_version: Option<String>,
    #[serde(default)]
    pub repos: Vec<String>,
}

/// A configured distribution: its latest version alias and the set of
/// versions it supports.
#[derive(Debug, Clone, Deserialize)]
pub struct DistroConfig {
    pub latest: String,
    pub versions: BTreeMap<String, VersionConfig>,
}

/// Static factory configuration, loaded from a TOML manifest: which
/// distributions/versions this factory builds, where worker locations
/// live, and retention policy.
#[derive(Debug, Clone, Deserialize)]
pub struct FactoryConfig {
    pub distros: BTreeMap<String, DistroConfig>,

    /// Build-worker locations (each a private meta-imagebuilder checkout).
    pub workers: Vec<PathBuf>,

    /// Shared update-worker location.
    #[serde(default = "default_updater_dir")]
    pub updater_dir: PathBuf,

    /// Number of concurrent update workers.
    #[serde(default = "default_updater_threads")]
    pub updater_threads: usize,

    pub download_folder: PathBuf,
    pub tempdir: PathBuf,

    /// Snapshot image retention, in hours.
    #[serde(default = "default_snapshot_ttl_hours")]
    pub snapshot_ttl_hours: i64,

    /// Custom image retention, in days. Fixed at 7 per spec invariant 5.
    #[serde(default = "default_custom_image_ttl_days")]
    pub custom_image_ttl_days: i64,

    /// Stale (non-terminal-forever) request-row retention, in days.
    #[serde(default = "default_stale_request_ttl_days")]
    pub stale_request_ttl_days: i64,
}

fn default_updater_dir() -> PathBuf {
    PathBuf::from("updater")
}

fn default_updater_threads() -> usize {
    4
}

fn default_snapshot_ttl_hours() -> i64 {
    24
}

fn default_custom_image_ttl_days() -> i64 {
    7
}

fn default_stale_request_ttl_days() -> i64 {
    7
}

impl FactoryConfig {
    /// Load and parse the factory manifest from `path`.
    pub async fn load(path: &Path) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read factory config at {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("failed to parse factory config at {}", path.display()))?;
        Ok(config)
    }

    /// Resolve a version's toolchain overlay, if configured.
    #[must_use]
    pub fn version_config(&self, distro: &str, version: &str) -> Option<&VersionConfig> {
        self.distros.get(distro)?.versions.get(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_factory_manifest() {
        let toml_str = r#"
            workers = ["/srv/fwforge/worker-a", "/srv/fwforge/worker-b"]
            download_folder = "/srv/fwforge/downloads"
            tempdir = "/srv/fwforge/tmp"

            [distros.openwrt]
            latest = "23.05"

            [distros.openwrt.versions."23.05"]
            repos = ["https://downloads.openwrt.org/23.05"]

            [distros.openwrt.versions."18.06"]
            parent_version = "18.06.9"
        "#;
        let config: FactoryConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.workers.len(), 2);
        assert_eq!(config.updater_threads, 4);
        assert_eq!(config.snapshot_ttl_hours, 24);
        assert_eq!(config.custom_image_ttl_days, 7);
        assert_eq!(
            config.version_config("openwrt", "18.06").unwrap().parent_version.as_deref(),
            Some("18.06.9")
        );
    }
}
