//! Content-addressed directory layout for built images.
//!
//! Mirrors the reference `Image.set_image_dir`: one directory per
//! `(distro, version, target, subtarget, image_hash)`, with the image
//! hash as the final path component so two requests that converge on
//! the same manifest converge on the same directory too.

use std::path::PathBuf;

use fwforge_id::{ImageHash, SubtargetKey};

/// Computes on-disk paths for a store rooted at `root`.
#[derive(Debug, Clone)]
pub struct ImageLayout {
    root: PathBuf,
}

impl ImageLayout {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &std::path::Path {
        &self.root
    }

    /// The directory a built image's artifacts live in:
    /// `<root>/<distro>/<version>/<target>/<subtarget>/<profile>/<image_hash>/`.
    #[must_use]
    pub fn image_dir(&self, key: &SubtargetKey, profile: &str, image_hash: &ImageHash) -> PathBuf {
        self.root
            .join(&key.distro)
            .join(&key.version)
            .join(&key.target)
            .join(&key.subtarget)
            .join(profile)
            .join(image_hash.as_str())
    }

    /// The build-failure log path, keyed by request hash (a failed build
    /// has no image hash yet).
    #[must_use]
    pub fn faillog_path(&self, download_folder: &std::path::Path, request_hash: &str) -> PathBuf {
        download_folder
            .join("faillogs")
            .join(format!("faillog-{request_hash}.txt"))
    }

    /// The success-path build log, keyed by image hash.
    #[must_use]
    pub fn buildlog_path(&self, image_dir: &std::path::Path, image_hash: &ImageHash) -> PathBuf {
        image_dir.join(format!("buildlog-{image_hash}.txt"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fwforge_id::ManifestHash;

    #[test]
    fn image_dir_nests_by_subtarget_and_hash() {
        let layout = ImageLayout::new("/srv/fwforge");
        let key = SubtargetKey::new("openwrt", "23.05", "ath79", "generic");
        let manifest = ManifestHash::from_digest_input("luci - 1.0\n");
        let image_hash = ImageHash::from_manifest_hash(&manifest);
        let dir = layout.image_dir(&key, "generic-profile", &image_hash);
        assert_eq!(
            dir,
            PathBuf::from(format!(
                "/srv/fwforge/openwrt/23.05/ath79/generic/generic-profile/{image_hash}"
            ))
        );
    }
}
