//! Typed content-fingerprint identifiers for the firmware image factory.
//!
//! Every identifier in this crate is a deterministic function of its
//! inputs (a truncated SHA-256 hex digest), not a freshly generated
//! value — see [`RequestHash`], [`ManifestHash`], [`ImageHash`] and
//! [`DefaultsHash`].

mod error;
#[macro_use]
mod macros;
mod types;

pub use error::FingerprintError;
pub use types::{
    canonicalize_packages, compute_request_hash, DefaultsHash, ImageHash, ManifestHash,
    RequestHash, SubtargetKey,
};
