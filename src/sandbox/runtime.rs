//! The container engine seam.
//!
//! [`ContainerRuntime`] is the narrow set of engine calls the sandbox
//! lifecycle needs. The Docker implementation lives in `docker.rs`; tests
//! use the recording mock in `mock.rs`.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use std::fmt;

use super::SandboxError;
use crate::snapshot::ByteStream;

/// Identifies a sandbox container. Also used as its container name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct SandboxId(String);

impl SandboxId {
    /// A fresh, unique sandbox name such as `runbox-1f2e3d4c`.
    pub fn generate() -> Self {
        let uuid = uuid::Uuid::new_v4().simple().to_string();
        Self(format!("runbox-{}", &uuid[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SandboxId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for SandboxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifies one command execution inside a sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct ExecId(String);

impl ExecId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ExecId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for ExecId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Combined stdout/stderr of an execution, as raw terminal bytes.
pub(crate) type OutputStream = BoxStream<'static, Result<Bytes, SandboxError>>;

/// A launched execution and its attached output.
pub(crate) struct Attached {
    pub exec: ExecId,
    pub output: OutputStream,
}

/// Container engine operations used by the sandbox lifecycle.
#[async_trait]
pub(crate) trait ContainerRuntime: Send + Sync {
    /// Returns the engine name for display.
    fn name(&self) -> &'static str;

    /// Makes `image` available locally, pulling it if absent.
    async fn ensure_image(&self, image: &str) -> Result<(), SandboxError>;

    /// Creates a stopped sandbox named `id` from `image`, with standard
    /// streams attachable and no startup command.
    async fn create(&self, id: &SandboxId, image: &str) -> Result<(), SandboxError>;

    /// Starts a created sandbox.
    async fn start(&self, id: &SandboxId) -> Result<(), SandboxError>;

    /// Unpacks a tar archive stream at the sandbox's filesystem root.
    async fn upload(&self, id: &SandboxId, archive: ByteStream) -> Result<(), SandboxError>;

    /// Launches `argv` in `workdir` and attaches to its combined output.
    async fn exec(
        &self,
        id: &SandboxId,
        argv: &[String],
        workdir: &str,
    ) -> Result<Attached, SandboxError>;

    /// Returns the exit code of a finished execution.
    async fn exit_code(&self, exec: &ExecId) -> Result<i64, SandboxError>;

    /// Stops a running sandbox.
    async fn stop(&self, id: &SandboxId) -> Result<(), SandboxError>;

    /// Removes a sandbox, killing it if still running.
    async fn remove(&self, id: &SandboxId) -> Result<(), SandboxError>;
}
