//! Running one configured command inside a sandbox.
//!
//! Execution is three separate steps against the same exec: launch with
//! [`execute`], forward its output with [`drain_output`], then read the exit
//! code with [`inspect`]. The engine only finalizes the exit code once the
//! attached output has ended, so inspecting an undrained execution is
//! rejected.

use futures_util::StreamExt;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

use super::provision::SandboxLease;
use super::runtime::{ContainerRuntime, ExecId, OutputStream};
use super::SandboxError;
use crate::build_config::CommandSpec;

/// An in-flight command and its attached output.
pub(crate) struct ExecutionHandle {
    exec: ExecId,
    command: String,
    output: Option<OutputStream>,
}

impl ExecutionHandle {
    pub fn exec_id(&self) -> &ExecId {
        &self.exec
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn is_drained(&self) -> bool {
        self.output.is_none()
    }
}

/// Launch `command` in the sandbox with `workdir` as its working directory.
pub(crate) async fn execute(
    runtime: &dyn ContainerRuntime,
    lease: &SandboxLease,
    command: &CommandSpec,
    workdir: &str,
) -> Result<ExecutionHandle, SandboxError> {
    let id = lease.running_id()?;
    let argv = command.argv();
    if argv.is_empty() {
        return Err(SandboxError::container_failed(format!(
            "command '{command}' has no program to run"
        )));
    }

    debug!("exec in {} ({}): {:?}", id, workdir, argv);
    let attached = runtime.exec(id, &argv, workdir).await?;

    Ok(ExecutionHandle {
        exec: attached.exec,
        command: command.to_string(),
        output: Some(attached.output),
    })
}

/// Forward the execution's output to `sink` until the stream ends.
///
/// Returns the number of bytes forwarded.
pub(crate) async fn drain_output<W>(
    handle: &mut ExecutionHandle,
    sink: &mut W,
) -> Result<u64, SandboxError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut output = handle.output.take().ok_or_else(|| {
        SandboxError::invalid_state(format!("output of '{}' was already drained", handle.command))
    })?;

    let mut forwarded = 0u64;
    while let Some(chunk) = output.next().await {
        let chunk = chunk?;
        sink.write_all(&chunk)
            .await
            .map_err(|e| SandboxError::OutputWrite {
                message: e.to_string(),
            })?;
        sink.flush().await.map_err(|e| SandboxError::OutputWrite {
            message: e.to_string(),
        })?;
        forwarded += chunk.len() as u64;
    }

    debug!("'{}' produced {} bytes", handle.command, forwarded);
    Ok(forwarded)
}

/// Read the exit code of a drained execution. Consumes the handle.
pub(crate) async fn inspect(
    runtime: &dyn ContainerRuntime,
    handle: ExecutionHandle,
) -> Result<i64, SandboxError> {
    if !handle.is_drained() {
        return Err(SandboxError::invalid_state(format!(
            "output of '{}' must be drained before its exit code is read",
            handle.command
        )));
    }
    runtime.exit_code(&handle.exec).await
}
