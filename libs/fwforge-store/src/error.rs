//! Error types for the artifact store.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to create image directory {path}: {source}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to move built artifact {name} into {dest}: {source}")]
    MoveArtifact {
        name: String,
        dest: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to remove image directory {path}: {source}")]
    RemoveDir {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read build output directory {path}: {source}")]
    ReadBuildDir {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write log file {path}: {source}")]
    WriteLog {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
