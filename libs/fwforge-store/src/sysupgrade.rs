//! Sysupgrade artifact discovery.
//!
//! The toolchain emits a target-specific sysupgrade filename; the
//! reference worker tries a fixed list of glob patterns, most likely
//! first, and takes the first match. Reproduced verbatim so the same
//! image always yields the same `sysupgrade` field.

use std::path::Path;

const SYSUPGRADE_PATTERNS: &[&str] = &[
    "*-squashfs-sysupgrade.bin",
    "*-squashfs-sysupgrade.tar",
    "*-squashfs.trx",
    "*-squashfs.chk",
    "*-squashfs.bin",
    "*-squashfs-sdcard.img.gz",
    "*-combined-squashfs*",
    "*.img.gz",
];

/// Find the sysupgrade artifact in `dir`, trying patterns in priority
/// order and returning the first match's file name.
#[must_use]
pub fn find_sysupgrade(dir: &Path) -> Option<String> {
    for pattern in SYSUPGRADE_PATTERNS {
        let full_pattern = dir.join(pattern);
        let Some(full_pattern) = full_pattern.to_str() else {
            continue;
        };
        if let Ok(mut matches) = glob::glob(full_pattern) {
            if let Some(Ok(path)) = matches.next() {
                return path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(str::to_string);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn picks_first_matching_pattern_in_priority_order() {
        let dir = std::env::temp_dir().join(format!(
            "fwforge-store-sysupgrade-test-{}",
            std::process::id()
        ));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("openwrt-generic.img.gz"), b"x").unwrap();
        fs::write(dir.join("openwrt-generic-squashfs-sysupgrade.bin"), b"x").unwrap();

        let found = find_sysupgrade(&dir);
        assert_eq!(
            found.as_deref(),
            Some("openwrt-generic-squashfs-sysupgrade.bin")
        );

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn returns_none_when_nothing_matches() {
        let dir = std::env::temp_dir().join(format!(
            "fwforge-store-sysupgrade-empty-{}",
            std::process::id()
        ));
        fs::create_dir_all(&dir).unwrap();
        assert_eq!(find_sysupgrade(&dir), None);
        fs::remove_dir_all(&dir).unwrap();
    }
}
