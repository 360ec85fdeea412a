use tracing::info;

use super::provision::SandboxLease;
use super::runtime::ContainerRuntime;
use super::SandboxError;
use crate::snapshot::Snapshot;

/// Copy the snapshot archive into the running sandbox's filesystem root.
///
/// The snapshot's content is consumed here and released when the copy
/// ends; staging the same snapshot again is an `InvalidState` error.
/// Failures are returned as-is, teardown stays with the caller.
pub(crate) async fn stage(
    runtime: &dyn ContainerRuntime,
    lease: &SandboxLease,
    snapshot: &mut Snapshot,
) -> Result<(), SandboxError> {
    let id = lease.running_id()?;
    let content = snapshot
        .take_content()
        .map_err(|e| SandboxError::invalid_state(e.to_string()))?;

    info!("Staging {} into sandbox {}", snapshot.root_name(), id);
    runtime.upload(id, content).await
}
