//! The request-tier contract (spec §6) and its Postgres implementation.
//!
//! The request-intake HTTP layer is explicitly out of scope; this trait
//! is the seam between it and the core. `PgRequestTier` is the only
//! production implementation — there is no mock, by design (see
//! `tests/core_loop.rs`, which exercises a real Postgres).
//!
//! Queries are built with `sqlx::query`/`query_as` rather than the
//! `query!` macros: the macros need a live database at compile time,
//! which this workspace avoids (see the `sqlx` feature note in the
//! workspace `Cargo.toml`).

use std::collections::BTreeMap;

use async_trait::async_trait;
use sqlx::{FromRow, PgPool, Row};
use tracing::{debug, instrument};

use fwforge_id::{DefaultsHash, ImageHash, ManifestHash, RequestHash, SubtargetKey};

use super::error::DbError;
use super::types::{
    BuildJob, ImageKind, NewImage, OutdatedSubtarget, ProfileRecord, ReclaimableImage,
    ReclaimableManifest, RequestStatus,
};

/// Everything the core invokes on the request tier. Method names and
/// signatures mirror spec §6 exactly.
#[async_trait]
pub trait RequestTier: Send + Sync {
    async fn pop_build_job(&self) -> Result<Option<BuildJob>, DbError>;
    async fn pop_outdated_subtarget(&self) -> Result<Option<OutdatedSubtarget>, DbError>;
    async fn add_manifest_packages(
        &self,
        manifest_hash: &ManifestHash,
        packages: &BTreeMap<String, String>,
    ) -> Result<(), DbError>;
    async fn add_image(&self, image: &NewImage) -> Result<(), DbError>;
    async fn done_build_job(
        &self,
        request_hash: &RequestHash,
        image_hash: &ImageHash,
        status: RequestStatus,
    ) -> Result<(), DbError>;
    async fn set_image_requests_status(
        &self,
        request_hash: &RequestHash,
        status: RequestStatus,
    ) -> Result<(), DbError>;
    async fn insert_profiles(
        &self,
        key: &SubtargetKey,
        default_packages: &[String],
        profiles: &[ProfileRecord],
    ) -> Result<(), DbError>;
    async fn insert_packages_available(
        &self,
        key: &SubtargetKey,
        packages: &[(String, String)],
    ) -> Result<(), DbError>;
    async fn insert_supported(&self, key: &SubtargetKey) -> Result<(), DbError>;
    async fn update_last_refreshed(&self, key: &SubtargetKey) -> Result<(), DbError>;
    async fn get_outdated_snapshots(
        &self,
        ttl_hours: i64,
    ) -> Result<Vec<ReclaimableImage>, DbError>;
    async fn get_outdated_customs(&self, ttl_days: i64) -> Result<Vec<ReclaimableImage>, DbError>;
    async fn get_outdated_manifests(&self) -> Result<Vec<ReclaimableManifest>, DbError>;
    /// The recorded sysupgrade filename for an existing image, if any —
    /// empty string means the image was built without one
    /// (`no_sysupgrade`). Used by the build worker's dedup short-circuit
    /// (§4.D.1 step 3) to recover the correct terminal status without
    /// re-running the toolchain.
    async fn get_image_sysupgrade(&self, image_hash: &ImageHash) -> Result<Option<String>, DbError>;
    async fn del_image(&self, image_hash: &str) -> Result<(), DbError>;
    async fn del_manifest(&self, manifest_hash: &str) -> Result<(), DbError>;
    async fn del_outdated_request(&self, ttl_days: i64) -> Result<u64, DbError>;
    async fn check_packages(
        &self,
        key: &SubtargetKey,
        packages: &[String],
    ) -> Result<Vec<String>, DbError>;
    async fn sysupgrade_supported(&self, key: &SubtargetKey) -> Result<Option<bool>, DbError>;
    /// Fetch uci-defaults content by its fingerprint. Not enumerated in
    /// spec §6's method list, but required by the build protocol
    /// (§4.D.1 step 4, `database.get_defaults` in the reference worker)
    /// to materialize the defaults file before invoking `image`.
    async fn get_defaults(&self, defaults_hash: &DefaultsHash) -> Result<String, DbError>;
    /// Sweep every row still `building` back to `requested`. Called once
    /// at startup (spec §5 "Cancellation"; see DESIGN.md open question 2).
    async fn sweep_stuck_building(&self) -> Result<u64, DbError>;
}

#[derive(Debug, FromRow)]
struct BuildJobRow {
    request_hash: String,
    distro: String,
    version: String,
    target: String,
    subtarget: String,
    profile: String,
    packages: Vec<String>,
    defaults_hash: Option<String>,
}

#[derive(Debug, FromRow)]
struct SubtargetRow {
    distro: String,
    version: String,
    target: String,
    subtarget: String,
}

/// Postgres-backed implementation of [`RequestTier`].
#[derive(Clone)]
pub struct PgRequestTier {
    pool: PgPool,
}

impl PgRequestTier {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RequestTier for PgRequestTier {
    #[instrument(skip(self))]
    async fn pop_build_job(&self) -> Result<Option<BuildJob>, DbError> {
        let row: Option<BuildJobRow> = sqlx::query_as(
            r#"
            UPDATE image_requests
            SET status = 'building'
            WHERE request_hash = (
                SELECT request_hash FROM image_requests
                WHERE status = 'requested'
                ORDER BY created_at
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING request_hash, distro, version, target, subtarget, profile,
                      packages, defaults_hash
            "#,
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::Query)?;

        let Some(row) = row else {
            return Ok(None);
        };

        debug!(request_hash = %row.request_hash, "claimed build job");

        let request_hash = RequestHash::from_hex(&row.request_hash)
            .map_err(|_| DbError::CorruptFingerprint(row.request_hash.clone()))?;
        let defaults_hash = row
            .defaults_hash
            .map(|d| DefaultsHash::from_hex(&d).map_err(|_| DbError::CorruptFingerprint(d)))
            .transpose()?;

        Ok(Some(BuildJob {
            request_hash,
            subtarget: SubtargetKey::new(row.distro, row.version, row.target, row.subtarget),
            profile: row.profile,
            packages: row.packages,
            defaults_hash,
        }))
    }

    #[instrument(skip(self))]
    async fn pop_outdated_subtarget(&self) -> Result<Option<OutdatedSubtarget>, DbError> {
        let row: Option<SubtargetRow> = sqlx::query_as(
            r#"
            UPDATE subtargets
            SET last_refreshed = now()
            WHERE (distro, version, target, subtarget) = (
                SELECT distro, version, target, subtarget FROM subtargets
                WHERE last_refreshed IS NULL
                   OR last_refreshed < now() - interval '24 hours'
                ORDER BY last_refreshed NULLS FIRST
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING distro, version, target, subtarget
            "#,
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::Query)?;

        Ok(row.map(|r| OutdatedSubtarget {
            subtarget: SubtargetKey::new(r.distro, r.version, r.target, r.subtarget),
        }))
    }

    #[instrument(skip(self, packages))]
    async fn add_manifest_packages(
        &self,
        manifest_hash: &ManifestHash,
        packages: &BTreeMap<String, String>,
    ) -> Result<(), DbError> {
        sqlx::query(
            "INSERT INTO manifests (manifest_hash, last_used) VALUES ($1, now())
             ON CONFLICT (manifest_hash) DO UPDATE SET last_used = now()",
        )
        .bind(manifest_hash.as_str())
        .execute(&self.pool)
        .await
        .map_err(DbError::Query)?;

        for (name, version) in packages {
            sqlx::query(
                "INSERT INTO manifest_packages (manifest_hash, name, version)
                 VALUES ($1, $2, $3)
                 ON CONFLICT (manifest_hash, name) DO UPDATE SET version = EXCLUDED.version",
            )
            .bind(manifest_hash.as_str())
            .bind(name)
            .bind(version)
            .execute(&self.pool)
            .await
            .map_err(DbError::Query)?;
        }

        Ok(())
    }

    #[instrument(skip(self, image))]
    async fn add_image(&self, image: &NewImage) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO images (image_hash, manifest_hash, distro, version, target,
                                 subtarget, profile, directory, sysupgrade, build_seconds, kind)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (image_hash) DO NOTHING
            "#,
        )
        .bind(image.image_hash.as_str())
        .bind(image.manifest_hash.as_str())
        .bind(&image.subtarget.distro)
        .bind(&image.subtarget.version)
        .bind(&image.subtarget.target)
        .bind(&image.subtarget.subtarget)
        .bind(&image.profile)
        .bind(&image.directory)
        .bind(&image.sysupgrade)
        .bind(image.build_seconds)
        .bind(image.kind)
        .execute(&self.pool)
        .await
        .map_err(DbError::Query)?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn done_build_job(
        &self,
        request_hash: &RequestHash,
        image_hash: &ImageHash,
        status: RequestStatus,
    ) -> Result<(), DbError> {
        sqlx::query("UPDATE image_requests SET status = $1, image_hash = $2 WHERE request_hash = $3")
            .bind(status)
            .bind(image_hash.as_str())
            .bind(request_hash.as_str())
            .execute(&self.pool)
            .await
            .map_err(DbError::Query)?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn set_image_requests_status(
        &self,
        request_hash: &RequestHash,
        status: RequestStatus,
    ) -> Result<(), DbError> {
        sqlx::query("UPDATE image_requests SET status = $1 WHERE request_hash = $2")
            .bind(status)
            .bind(request_hash.as_str())
            .execute(&self.pool)
            .await
            .map_err(DbError::Query)?;

        Ok(())
    }

    #[instrument(skip(self, profiles))]
    async fn insert_profiles(
        &self,
        key: &SubtargetKey,
        default_packages: &[String],
        profiles: &[ProfileRecord],
    ) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO subtargets (distro, version, target, subtarget, default_packages, last_refreshed)
            VALUES ($1, $2, $3, $4, $5, now())
            ON CONFLICT (distro, version, target, subtarget)
            DO UPDATE SET default_packages = EXCLUDED.default_packages, last_refreshed = now()
            "#,
        )
        .bind(&key.distro)
        .bind(&key.version)
        .bind(&key.target)
        .bind(&key.subtarget)
        .bind(default_packages)
        .execute(&self.pool)
        .await
        .map_err(DbError::Query)?;

        sqlx::query(
            "DELETE FROM profiles WHERE distro = $1 AND version = $2 AND target = $3 AND subtarget = $4",
        )
        .bind(&key.distro)
        .bind(&key.version)
        .bind(&key.target)
        .bind(&key.subtarget)
        .execute(&self.pool)
        .await
        .map_err(DbError::Query)?;

        for profile in profiles {
            sqlx::query(
                r#"
                INSERT INTO profiles (distro, version, target, subtarget, name, description, packages)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(&key.distro)
            .bind(&key.version)
            .bind(&key.target)
            .bind(&key.subtarget)
            .bind(&profile.name)
            .bind(&profile.description)
            .bind(&profile.packages)
            .execute(&self.pool)
            .await
            .map_err(DbError::Query)?;
        }

        Ok(())
    }

    #[instrument(skip(self, packages))]
    async fn insert_packages_available(
        &self,
        key: &SubtargetKey,
        packages: &[(String, String)],
    ) -> Result<(), DbError> {
        sqlx::query(
            "DELETE FROM packages_available WHERE distro = $1 AND version = $2 AND target = $3 AND subtarget = $4",
        )
        .bind(&key.distro)
        .bind(&key.version)
        .bind(&key.target)
        .bind(&key.subtarget)
        .execute(&self.pool)
        .await
        .map_err(DbError::Query)?;

        for (name, version) in packages {
            sqlx::query(
                r#"
                INSERT INTO packages_available (distro, version, target, subtarget, name, version_string)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(&key.distro)
            .bind(&key.version)
            .bind(&key.target)
            .bind(&key.subtarget)
            .bind(name)
            .bind(version)
            .execute(&self.pool)
            .await
            .map_err(DbError::Query)?;
        }

        Ok(())
    }

    #[instrument(skip(self))]
    async fn insert_supported(&self, key: &SubtargetKey) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO subtargets (distro, version, target, subtarget, supported, last_refreshed)
            VALUES ($1, $2, $3, $4, true, now())
            ON CONFLICT (distro, version, target, subtarget)
            DO UPDATE SET supported = true
            "#,
        )
        .bind(&key.distro)
        .bind(&key.version)
        .bind(&key.target)
        .bind(&key.subtarget)
        .execute(&self.pool)
        .await
        .map_err(DbError::Query)?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn update_last_refreshed(&self, key: &SubtargetKey) -> Result<(), DbError> {
        sqlx::query(
            r#"
            UPDATE subtargets SET last_refreshed = now()
            WHERE distro = $1 AND version = $2 AND target = $3 AND subtarget = $4
            "#,
        )
        .bind(&key.distro)
        .bind(&key.version)
        .bind(&key.target)
        .bind(&key.subtarget)
        .execute(&self.pool)
        .await
        .map_err(DbError::Query)?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_outdated_snapshots(
        &self,
        ttl_hours: i64,
    ) -> Result<Vec<ReclaimableImage>, DbError> {
        sqlx::query_as(
            r#"
            SELECT image_hash, directory FROM images
            WHERE kind = 'snapshot' AND created_at < now() - make_interval(hours => $1::int)
            "#,
        )
        .bind(ttl_hours as i32)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::Query)
    }

    #[instrument(skip(self))]
    async fn get_outdated_customs(&self, ttl_days: i64) -> Result<Vec<ReclaimableImage>, DbError> {
        sqlx::query_as(
            r#"
            SELECT image_hash, directory FROM images
            WHERE kind = 'custom' AND created_at < now() - make_interval(days => $1::int)
            "#,
        )
        .bind(ttl_days as i32)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::Query)
    }

    #[instrument(skip(self))]
    async fn get_outdated_manifests(&self) -> Result<Vec<ReclaimableManifest>, DbError> {
        sqlx::query_as(
            r#"
            SELECT m.manifest_hash FROM manifests m
            WHERE NOT EXISTS (
                SELECT 1 FROM images i WHERE i.manifest_hash = m.manifest_hash
            )
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::Query)
    }

    #[instrument(skip(self))]
    async fn get_image_sysupgrade(&self, image_hash: &ImageHash) -> Result<Option<String>, DbError> {
        let row = sqlx::query("SELECT sysupgrade FROM images WHERE image_hash = $1")
            .bind(image_hash.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::Query)?;

        Ok(row.map(|r| r.get::<String, _>("sysupgrade")))
    }

    #[instrument(skip(self))]
    async fn del_image(&self, image_hash: &str) -> Result<(), DbError> {
        sqlx::query("DELETE FROM images WHERE image_hash = $1")
            .bind(image_hash)
            .execute(&self.pool)
            .await
            .map_err(DbError::Query)?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn del_manifest(&self, manifest_hash: &str) -> Result<(), DbError> {
        sqlx::query("DELETE FROM manifest_packages WHERE manifest_hash = $1")
            .bind(manifest_hash)
            .execute(&self.pool)
            .await
            .map_err(DbError::Query)?;
        sqlx::query("DELETE FROM manifests WHERE manifest_hash = $1")
            .bind(manifest_hash)
            .execute(&self.pool)
            .await
            .map_err(DbError::Query)?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn del_outdated_request(&self, ttl_days: i64) -> Result<u64, DbError> {
        let result = sqlx::query(
            r#"
            DELETE FROM image_requests
            WHERE status NOT IN ('requested', 'building')
              AND created_at < now() - make_interval(days => $1::int)
            "#,
        )
        .bind(ttl_days as i32)
        .execute(&self.pool)
        .await
        .map_err(DbError::Query)?;

        Ok(result.rows_affected())
    }

    #[instrument(skip(self))]
    async fn check_packages(
        &self,
        key: &SubtargetKey,
        packages: &[String],
    ) -> Result<Vec<String>, DbError> {
        let rows = sqlx::query(
            r#"
            SELECT name FROM packages_available
            WHERE distro = $1 AND version = $2 AND target = $3 AND subtarget = $4
              AND name = ANY($5)
            "#,
        )
        .bind(&key.distro)
        .bind(&key.version)
        .bind(&key.target)
        .bind(&key.subtarget)
        .bind(packages)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::Query)?;

        let known: std::collections::HashSet<String> = rows
            .iter()
            .map(|r| r.get::<String, _>("name"))
            .collect();
        Ok(packages
            .iter()
            .filter(|p| !known.contains(*p))
            .cloned()
            .collect())
    }

    #[instrument(skip(self))]
    async fn sysupgrade_supported(&self, key: &SubtargetKey) -> Result<Option<bool>, DbError> {
        let row = sqlx::query(
            r#"
            SELECT supported FROM subtargets
            WHERE distro = $1 AND version = $2 AND target = $3 AND subtarget = $4
            "#,
        )
        .bind(&key.distro)
        .bind(&key.version)
        .bind(&key.target)
        .bind(&key.subtarget)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::Query)?;

        Ok(row.map(|r| r.get::<bool, _>("supported")))
    }

    #[instrument(skip(self))]
    async fn get_defaults(&self, defaults_hash: &DefaultsHash) -> Result<String, DbError> {
        let row = sqlx::query("SELECT content FROM defaults WHERE defaults_hash = $1")
            .bind(defaults_hash.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::Query)?;

        row.map(|r| r.get::<String, _>("content"))
            .ok_or_else(|| DbError::RequestNotFound(defaults_hash.to_string()))
    }

    #[instrument(skip(self))]
    async fn sweep_stuck_building(&self) -> Result<u64, DbError> {
        let result = sqlx::query(
            "UPDATE image_requests SET status = 'requested' WHERE status = 'building'",
        )
        .execute(&self.pool)
        .await
        .map_err(DbError::Query)?;

        Ok(result.rows_affected())
    }
}
