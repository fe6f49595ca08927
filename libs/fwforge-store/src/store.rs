//! The artifact store itself: moving build output into its final
//! content-addressed home and reclaiming it later.

use std::path::Path;

use fwforge_id::{ImageHash, SubtargetKey};
use tracing::{debug, instrument, warn};

use crate::error::StoreError;
use crate::layout::ImageLayout;

/// Owns the on-disk tree of built images.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    layout: ImageLayout,
}

impl ArtifactStore {
    #[must_use]
    pub fn new(root: impl Into<std::path::PathBuf>) -> Self {
        Self {
            layout: ImageLayout::new(root),
        }
    }

    #[must_use]
    pub fn layout(&self) -> &ImageLayout {
        &self.layout
    }

    /// Resolve the final directory for an image, without creating it.
    #[must_use]
    pub fn image_dir(
        &self,
        key: &SubtargetKey,
        profile: &str,
        image_hash: &ImageHash,
    ) -> std::path::PathBuf {
        self.layout.image_dir(key, profile, image_hash)
    }

    /// Whether an image's directory already exists on disk. A dedup hit:
    /// the build worker skips the expensive `sh meta image` invocation
    /// when this returns `true`.
    #[must_use]
    pub async fn image_exists(&self, dir: &Path) -> bool {
        tokio::fs::metadata(dir)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    /// Move every entry out of `build_dir` into `dest_dir`, creating
    /// `dest_dir` if needed. First-writer-wins: if a file with the same
    /// name already exists at the destination (a concurrent build of the
    /// same manifest finished first), leave the existing one untouched
    /// and stop — mirrors the reference worker's `break`-on-collision
    /// loop rather than overwriting.
    #[instrument(skip(self), fields(dest = %dest_dir.display()))]
    pub async fn move_in(
        &self,
        build_dir: &Path,
        dest_dir: &Path,
    ) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(dest_dir)
            .await
            .map_err(|source| StoreError::CreateDir {
                path: dest_dir.display().to_string(),
                source,
            })?;

        let mut entries =
            tokio::fs::read_dir(build_dir)
                .await
                .map_err(|source| StoreError::ReadBuildDir {
                    path: build_dir.display().to_string(),
                    source,
                })?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|source| StoreError::ReadBuildDir {
                path: build_dir.display().to_string(),
                source,
            })?
        {
            let name = entry.file_name();
            let dest_path = dest_dir.join(&name);
            if tokio::fs::metadata(&dest_path).await.is_ok() {
                debug!(name = ?name, "artifact already present at destination, stopping");
                break;
            }
            tokio::fs::rename(entry.path(), &dest_path)
                .await
                .map_err(|source| StoreError::MoveArtifact {
                    name: name.to_string_lossy().into_owned(),
                    dest: dest_dir.display().to_string(),
                    source,
                })?;
        }

        Ok(())
    }

    /// Reclaim an image's directory from disk. Idempotent: a missing
    /// directory is not an error, matching the reclaimer's
    /// `os.path.exists` guard.
    #[instrument(skip(self))]
    pub async fn delete_image_dir(&self, dir: &Path) -> Result<(), StoreError> {
        if tokio::fs::metadata(dir).await.is_err() {
            warn!(dir = %dir.display(), "image directory already gone");
            return Ok(());
        }
        tokio::fs::remove_dir_all(dir)
            .await
            .map_err(|source| StoreError::RemoveDir {
                path: dir.display().to_string(),
                source,
            })
    }

    /// Append a build command/stdout/stderr transcript to a log file,
    /// creating it if absent. Used for both the success buildlog and the
    /// failure faillog paths.
    #[instrument(skip(self, params, stdout, stderr))]
    pub async fn write_log(
        &self,
        path: &Path,
        params: &std::collections::BTreeMap<String, String>,
        stdout: Option<&str>,
        stderr: Option<&str>,
    ) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| StoreError::CreateDir {
                    path: parent.display().to_string(),
                    source,
                })?;
        }

        let mut contents = String::from("### BUILD COMMAND:\n\n");
        for (key, value) in params {
            contents.push_str(&key.to_uppercase());
            contents.push('=');
            contents.push_str(value);
            contents.push('\n');
        }
        contents.push_str("sh meta\n");
        if let Some(stdout) = stdout {
            contents.push_str("\n\n### STDOUT:\n\n");
            contents.push_str(stdout);
        }
        if let Some(stderr) = stderr {
            contents.push_str("\n\n### STDERR:\n\n");
            contents.push_str(stderr);
        }

        use tokio::io::AsyncWriteExt;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|source| StoreError::WriteLog {
                path: path.display().to_string(),
                source,
            })?;
        file.write_all(contents.as_bytes())
            .await
            .map_err(|source| StoreError::WriteLog {
                path: path.display().to_string(),
                source,
            })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn tmp_dir(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("fwforge-store-test-{name}-{}", std::process::id()))
    }

    #[tokio::test]
    async fn move_in_relocates_files_and_creates_dest() {
        let build_dir = tmp_dir("build");
        let dest_dir = tmp_dir("dest");
        tokio::fs::create_dir_all(&build_dir).await.unwrap();
        tokio::fs::write(build_dir.join("image.bin"), b"data")
            .await
            .unwrap();

        let store = ArtifactStore::new(tmp_dir("root"));
        store.move_in(&build_dir, &dest_dir).await.unwrap();

        assert!(dest_dir.join("image.bin").exists());
        assert!(!build_dir.join("image.bin").exists());

        tokio::fs::remove_dir_all(&build_dir).await.ok();
        tokio::fs::remove_dir_all(&dest_dir).await.ok();
    }

    #[tokio::test]
    async fn move_in_leaves_existing_destination_file_untouched() {
        let build_dir = tmp_dir("build2");
        let dest_dir = tmp_dir("dest2");
        tokio::fs::create_dir_all(&build_dir).await.unwrap();
        tokio::fs::create_dir_all(&dest_dir).await.unwrap();
        tokio::fs::write(build_dir.join("image.bin"), b"new")
            .await
            .unwrap();
        tokio::fs::write(dest_dir.join("image.bin"), b"already-there")
            .await
            .unwrap();

        let store = ArtifactStore::new(tmp_dir("root2"));
        store.move_in(&build_dir, &dest_dir).await.unwrap();

        let contents = tokio::fs::read(dest_dir.join("image.bin")).await.unwrap();
        assert_eq!(contents, b"already-there");

        tokio::fs::remove_dir_all(&build_dir).await.ok();
        tokio::fs::remove_dir_all(&dest_dir).await.ok();
    }

    #[tokio::test]
    async fn delete_image_dir_is_idempotent() {
        let store = ArtifactStore::new(tmp_dir("root3"));
        let missing = tmp_dir("never-existed");
        store.delete_image_dir(&missing).await.unwrap();
    }

    #[tokio::test]
    async fn write_log_appends_command_and_streams() {
        let path = tmp_dir("log").join("buildlog.txt");
        let store = ArtifactStore::new(tmp_dir("root4"));
        let mut params = BTreeMap::new();
        params.insert("distro".to_string(), "openwrt".to_string());

        store
            .write_log(&path, &params, Some("ok"), None)
            .await
            .unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(contents.contains("DISTRO=openwrt"));
        assert!(contents.contains("STDOUT"));
        assert!(contents.contains("ok"));

        tokio::fs::remove_dir_all(path.parent().unwrap())
            .await
            .ok();
    }
}
