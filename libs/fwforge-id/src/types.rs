//! Fingerprint and key types used throughout the factory.

use serde::{Deserialize, Serialize};

crate::define_fingerprint!(RequestHash, 15);
crate::define_fingerprint!(ManifestHash, 15);
crate::define_fingerprint!(ImageHash, 15);
crate::define_fingerprint!(DefaultsHash, 15);

impl ImageHash {
    /// `image_hash = H(manifest_hash joined with the original's separator)`.
    ///
    /// The reference implementation computes this over
    /// `" ".join([manifest_hash])`, i.e. the manifest hash followed by a
    /// trailing space, not the bare manifest hash. Reproduced literally so
    /// two independent implementations agree on the same digest.
    #[must_use]
    pub fn from_manifest_hash(manifest_hash: &ManifestHash) -> Self {
        Self::from_digest_input(format!("{manifest_hash} "))
    }
}

/// Identifies a (distribution, version, target, subtarget) family.
///
/// This is a natural key, not a generated fingerprint: the request tier
/// and the updater both address subtargets by these four fields.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SubtargetKey {
    pub distro: String,
    pub version: String,
    pub target: String,
    pub subtarget: String,
}

impl SubtargetKey {
    #[must_use]
    pub fn new(
        distro: impl Into<String>,
        version: impl Into<String>,
        target: impl Into<String>,
        subtarget: impl Into<String>,
    ) -> Self {
        Self {
            distro: distro.into(),
            version: version.into(),
            target: target.into(),
            subtarget: subtarget.into(),
        }
    }
}

impl std::fmt::Display for SubtargetKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.distro, self.version, self.target, self.subtarget
        )
    }
}

/// Canonicalize a raw package list the way the request tier is required to
/// before computing a request hash: deduplicate, drop `libc`/`kernel`
/// (which are implied by the profile and whose presence/absence must not
/// perturb the hash), and sort for order-independence.
#[must_use]
pub fn canonicalize_packages<I, S>(packages: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut set: std::collections::BTreeSet<String> = packages
        .into_iter()
        .map(Into::into)
        .filter(|p| p != "libc" && p != "kernel")
        .collect();
    // BTreeSet already dedups and sorts; collect in order.
    let packages: Vec<String> = set.iter().cloned().collect();
    set.clear();
    packages
}

/// Compute the request fingerprint over the canonical tuple
/// `(distro, version, target, subtarget, sorted canonical packages,
/// defaults_hash?)`, per spec.md §3. Centralized here so every caller —
/// the request tier's insert path, tests, and the worker's dedup check —
/// agrees on exactly the same canonicalization.
#[must_use]
pub fn compute_request_hash(
    key: &SubtargetKey,
    packages: &[String],
    defaults_hash: Option<&DefaultsHash>,
) -> RequestHash {
    let mut input = format!(
        "{}|{}|{}|{}|{}",
        key.distro,
        key.version,
        key.target,
        key.subtarget,
        packages.join(",")
    );
    if let Some(defaults) = defaults_hash {
        input.push('|');
        input.push_str(defaults.as_str());
    }
    RequestHash::from_digest_input(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalize_dedups_sorts_and_drops_libc_kernel() {
        let packages = canonicalize_packages(["b", "a", "libc", "kernel", "a"]);
        assert_eq!(packages, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn request_hash_invariant_under_permutation_and_libc_kernel() {
        let key = SubtargetKey::new("openwrt", "18.06", "ar71xx", "generic");
        let p1 = canonicalize_packages(["luci", "vim"]);
        let p2 = canonicalize_packages(["vim", "luci", "libc"]);
        assert_eq!(p1, p2);
        assert_eq!(
            compute_request_hash(&key, &p1, None),
            compute_request_hash(&key, &p2, None)
        );
    }

    #[test]
    fn image_hash_derives_from_manifest_hash() {
        let manifest = ManifestHash::from_digest_input("luci - 1.0\nvim - 8.1\n");
        let image = ImageHash::from_manifest_hash(&manifest);
        let image_again = ImageHash::from_manifest_hash(&manifest);
        assert_eq!(image, image_again);
    }

    #[test]
    fn from_hex_rejects_wrong_length_and_non_hex() {
        assert!(RequestHash::from_hex("abc").is_err());
        assert!(RequestHash::from_hex("zzzzzzzzzzzzzzz").is_err());
        assert!(RequestHash::from_hex("a1b2c3d4e5f6070").is_ok());
    }
}
