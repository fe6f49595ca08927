//! Subprocess driver and output parsers for the `meta-imagebuilder`
//! toolchain that the build and update workers shell out to.

mod driver;
mod error;
mod parser;

pub use driver::{MetaCommand, MetaOutput, ToolchainDriver};
pub use error::ToolchainError;
pub use parser::{
    parse_info, parse_manifest, parse_package_list, AvailablePackage, InfoOutput, ManifestEntry,
    ProfileInfo,
};
