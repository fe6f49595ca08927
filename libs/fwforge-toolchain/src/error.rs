//! Error types for the toolchain driver.

use thiserror::Error;

/// Errors the toolchain driver can surface.
///
/// Per spec: transient and permanent failures are not distinguished here;
/// callers treat any nonzero exit as a terminal failure for the job at
/// hand, with [`ToolchainError::Setup`] as the sole fatal exception.
#[derive(Debug, Error)]
pub enum ToolchainError {
    /// One-time worker-location setup (directory creation / meta clone)
    /// failed. Fatal: the worker cannot function without it.
    #[error("toolchain setup failed in {location}: {reason}")]
    Setup { location: String, reason: String },

    /// Failed to spawn or communicate with the subprocess itself (not a
    /// nonzero exit — an actual I/O failure launching it).
    #[error("failed to invoke toolchain command {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
}
