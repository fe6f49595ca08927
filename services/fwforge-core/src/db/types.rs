//! Row and parameter types shared between the request-tier trait and
//! its Postgres implementation.

use fwforge_id::{DefaultsHash, ImageHash, ManifestHash, RequestHash, SubtargetKey};
use serde::{Deserialize, Serialize};

/// Terminal and intermediate states of an `image_requests` row, per
/// spec §3 Lifecycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum RequestStatus {
    Requested,
    Building,
    Created,
    NoSysupgrade,
    BuildFail,
    ManifestFail,
    ImagesizeFail,
}

impl RequestStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, RequestStatus::Requested | RequestStatus::Building)
    }
}

/// Retention class of a built image, driving the collector's TTLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum ImageKind {
    Snapshot,
    Release,
    Custom,
}

/// One claimed build job, as returned by `pop_build_job`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildJob {
    pub request_hash: RequestHash,
    pub subtarget: SubtargetKey,
    /// Device profile selected by the client; part of the on-disk
    /// directory layout (spec §6) alongside distro/version/target/subtarget.
    pub profile: String,
    pub packages: Vec<String>,
    pub defaults_hash: Option<DefaultsHash>,
}

/// One claimed update job, as returned by `pop_outdated_subtarget`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutdatedSubtarget {
    pub subtarget: SubtargetKey,
}

/// A device profile and its default package set, as reported by the
/// `info` toolchain invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileRecord {
    pub name: String,
    pub description: String,
    pub packages: Vec<String>,
}

/// A fully built image, as inserted by `add_image`.
#[derive(Debug, Clone)]
pub struct NewImage {
    pub image_hash: ImageHash,
    pub manifest_hash: ManifestHash,
    pub subtarget: SubtargetKey,
    pub profile: String,
    pub directory: String,
    pub sysupgrade: String,
    pub build_seconds: i64,
    pub kind: ImageKind,
}

/// An image eligible for reclamation: enough to delete the row and the
/// directory tree.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ReclaimableImage {
    pub image_hash: String,
    pub directory: String,
}

/// A manifest with no referencing image, eligible for reclamation.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ReclaimableManifest {
    pub manifest_hash: String,
}
