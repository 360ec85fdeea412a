//! Domain-specific error types for sandbox operations.
//!
//! Typed errors enable callers to match on specific failure modes
//! rather than parsing error message strings.

use std::time::Duration;

/// Errors that can occur during sandbox operations.
#[derive(Debug, thiserror::Error)]
pub(crate) enum SandboxError {
    /// Docker daemon is not running or not accessible.
    #[error("Docker is not available: {message}")]
    DockerUnavailable { message: String },

    /// Runtime image does not exist locally or in the registry.
    #[error("Runtime image not found: {image}")]
    ImageNotFound { image: String },

    /// Runtime image could not be pulled.
    #[error("Failed to pull runtime image {image}: {message}")]
    ImagePullFailed { image: String, message: String },

    /// A sandbox operation did not finish in time.
    #[error("Sandbox operation timed out after {timeout_secs} seconds")]
    Timeout { timeout_secs: u64 },

    /// The sandbox does not exist (never created, or already removed).
    #[error("Sandbox not found: {id}")]
    NotFound { id: String },

    /// Container operation failed (create, start, copy, exec, stop, remove).
    #[error("Container operation failed: {message}")]
    ContainerFailed { message: String },

    /// The snapshot archive could not be read while staging it.
    #[error("Failed to read snapshot archive: {message}")]
    ArchiveRead { message: String },

    /// Operation is not valid in the current lifecycle state.
    #[error("Invalid sandbox state: {message}")]
    InvalidState { message: String },

    /// Exit status of an execution could not be retrieved.
    #[error("Failed to query execution {exec}: {message}")]
    ExecutionQuery { exec: String, message: String },

    /// Command output could not be written to the output sink.
    #[error("Failed to forward command output: {message}")]
    OutputWrite { message: String },
}

impl SandboxError {
    /// Creates a `DockerUnavailable` error.
    pub fn docker_unavailable(message: impl Into<String>) -> Self {
        Self::DockerUnavailable {
            message: message.into(),
        }
    }

    /// Creates an `ImageNotFound` error.
    pub fn image_not_found(image: impl Into<String>) -> Self {
        Self::ImageNotFound {
            image: image.into(),
        }
    }

    /// Creates a `Timeout` error from a `Duration`.
    pub fn timeout(duration: Duration) -> Self {
        Self::Timeout {
            timeout_secs: duration.as_secs(),
        }
    }

    /// Creates a `NotFound` error.
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Creates a `ContainerFailed` error.
    pub fn container_failed(message: impl Into<String>) -> Self {
        Self::ContainerFailed {
            message: message.into(),
        }
    }

    /// Creates an `InvalidState` error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Creates an `ExecutionQuery` error.
    pub fn execution_query(exec: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExecutionQuery {
            exec: exec.into(),
            message: message.into(),
        }
    }

    /// Returns true if this is a timeout error.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns true if the sandbox did not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns true if this is a lifecycle state violation.
    #[allow(dead_code)] // Public API for callers
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, Self::InvalidState { .. })
    }

    /// Returns true if this is a Docker unavailability error.
    #[allow(dead_code)] // Public API for callers
    pub fn is_docker_unavailable(&self) -> bool {
        matches!(self, Self::DockerUnavailable { .. })
    }

    /// Returns true if this is an image not found error.
    pub fn is_image_not_found(&self) -> bool {
        matches!(self, Self::ImageNotFound { .. })
    }
}
