//! Regex-level parsers for toolchain stdout.
//!
//! These mirror `original_source/worker.py`'s `parse_info`,
//! `parse_packages`, and the manifest-parsing step of `build` exactly —
//! same capture groups, same line shapes — but hand back typed records
//! instead of raw tuples, per Design Note §9 ("downstream code operates
//! on typed records").

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref DEFAULT_PACKAGES_RE: Regex = Regex::new(r"(?m)^Default Packages: (.+)$").unwrap();
    static ref PROFILE_RE: Regex =
        Regex::new(r"(?m)^(.+):\n    (.+)\n    Packages: (.*)$").unwrap();
    static ref MANIFEST_ENTRY_RE: Regex = Regex::new(r"(?m)^(.+) - (.+)$").unwrap();
    static ref PACKAGE_LIST_RE: Regex = Regex::new(r"(?m)^(.+?) - (.+?) - .*$").unwrap();
}

/// A device profile parsed from `info` output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileInfo {
    pub name: String,
    pub description: String,
    pub packages: Vec<String>,
}

/// The parsed result of an `info` invocation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InfoOutput {
    pub default_packages: Vec<String>,
    pub profiles: Vec<ProfileInfo>,
}

/// A single (name, version) entry from a `manifest` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub name: String,
    pub version: String,
}

/// A single catalog entry from a `package_list` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailablePackage {
    pub name: String,
    pub version: String,
}

fn split_packages(list: &str) -> Vec<String> {
    list.split_whitespace().map(str::to_string).collect()
}

/// Parse `sh meta info` stdout: one `Default Packages: <list>` line,
/// then repeated `<profile>:\n    <description>\n    Packages: <list>`
/// blocks.
#[must_use]
pub fn parse_info(stdout: &str) -> InfoOutput {
    let default_packages = DEFAULT_PACKAGES_RE
        .captures(stdout)
        .map(|c| split_packages(&c[1]))
        .unwrap_or_default();

    let profiles = PROFILE_RE
        .captures_iter(stdout)
        .map(|c| ProfileInfo {
            name: c[1].to_string(),
            description: c[2].to_string(),
            packages: split_packages(&c[3]),
        })
        .collect();

    InfoOutput {
        default_packages,
        profiles,
    }
}

/// Parse `sh meta manifest` stdout: lines of `<name> - <version>`.
#[must_use]
pub fn parse_manifest(stdout: &str) -> Vec<ManifestEntry> {
    MANIFEST_ENTRY_RE
        .captures_iter(stdout)
        .map(|c| ManifestEntry {
            name: c[1].to_string(),
            version: c[2].to_string(),
        })
        .collect()
}

/// Parse `sh meta package_list` stdout: lines of
/// `<name> - <version> - <desc>`.
#[must_use]
pub fn parse_package_list(stdout: &str) -> Vec<AvailablePackage> {
    PACKAGE_LIST_RE
        .captures_iter(stdout)
        .map(|c| AvailablePackage {
            name: c[1].to_string(),
            version: c[2].to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_info_block() {
        let stdout = "Default Packages: base-files libc\n\
             generic:\n    Generic\n    Packages: kmod-usb kmod-gpio\n\
             other:\n    Other device\n    Packages: kmod-foo\n";
        let info = parse_info(stdout);
        assert_eq!(
            info.default_packages,
            vec!["base-files".to_string(), "libc".to_string()]
        );
        assert_eq!(info.profiles.len(), 2);
        assert_eq!(info.profiles[0].name, "generic");
        assert_eq!(info.profiles[0].description, "Generic");
        assert_eq!(
            info.profiles[0].packages,
            vec!["kmod-usb".to_string(), "kmod-gpio".to_string()]
        );
        assert_eq!(info.profiles[1].name, "other");
    }

    #[test]
    fn parses_manifest_lines() {
        let stdout = "luci - 1.0\nvim - 8.1\n";
        let entries = parse_manifest(stdout);
        assert_eq!(
            entries,
            vec![
                ManifestEntry {
                    name: "luci".to_string(),
                    version: "1.0".to_string()
                },
                ManifestEntry {
                    name: "vim".to_string(),
                    version: "8.1".to_string()
                },
            ]
        );
    }

    #[test]
    fn parses_package_list_lines() {
        let stdout = "luci - 1.0 - Web interface\nvim - 8.1 - Text editor\n";
        let packages = parse_package_list(stdout);
        assert_eq!(packages.len(), 2);
        assert_eq!(packages[0].name, "luci");
        assert_eq!(packages[0].version, "1.0");
        assert_eq!(packages[1].name, "vim");
    }

    #[test]
    fn missing_default_packages_line_yields_empty() {
        let info = parse_info("no match here\n");
        assert!(info.default_packages.is_empty());
        assert!(info.profiles.is_empty());
    }
}
