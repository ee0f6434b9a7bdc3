//! Unified error types for the capsa workspace.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum CapsaError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value or invocation argument is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// A mount, pivot or other filesystem syscall failed.
    #[error("{operation} failed at {target}: {source}")]
    Syscall {
        /// Name of the failing operation (`mount`, `pivot_root`, ...).
        operation: &'static str,
        /// Path the operation was applied to.
        target: PathBuf,
        /// Underlying OS error.
        source: std::io::Error,
    },

    /// Creating namespaces or the re-executed child failed.
    #[error("namespace setup failed: {message}")]
    Namespace {
        /// Description of the failure.
        message: String,
    },

    /// Starting or waiting on a process failed.
    #[error("process error: {message}")]
    Process {
        /// Description of the failure.
        message: String,
    },

    /// A volume relocation was attempted after the old root was detached.
    #[error("old root already detached, cannot relocate volume {volume}")]
    OldRootDetached {
        /// The volume that could not be relocated.
        volume: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl CapsaError {
    /// Builds an [`CapsaError::Io`] for `path`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Builds a [`CapsaError::Syscall`] from anything convertible to an I/O
    /// error, such as `nix::Errno`.
    pub fn syscall(
        operation: &'static str,
        target: impl Into<PathBuf>,
        source: impl Into<std::io::Error>,
    ) -> Self {
        Self::Syscall {
            operation,
            target: target.into(),
            source: source.into(),
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, CapsaError>;
