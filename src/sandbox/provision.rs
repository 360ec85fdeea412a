//! Sandbox provisioning and teardown.
//!
//! A [`SandboxLease`] owns one sandbox for the length of a run. The name is
//! reserved before the container is created, so a creation interrupted by
//! cancellation can still be removed by name.

use tracing::{debug, info, warn};

use super::runtime::{ContainerRuntime, SandboxId};
use super::SandboxError;

/// Lifecycle of a leased sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LeaseState {
    /// Name chosen, nothing exists yet.
    Reserved,
    /// Creation requested but not confirmed.
    Creating,
    /// Container exists but is not running.
    Created,
    /// Container is running; staging and execution are allowed.
    Running,
    /// Teardown has been invoked; every further access fails.
    Released,
}

/// What a release did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Teardown {
    /// No container had been created.
    NotNeeded,
    /// The container was stopped (if running) and removed.
    Done,
}

/// Exclusive ownership of one sandbox for one run.
#[derive(Debug)]
pub(crate) struct SandboxLease {
    id: SandboxId,
    state: LeaseState,
}

impl SandboxLease {
    /// Reserve a fresh sandbox name.
    pub fn reserve() -> Self {
        Self::with_id(SandboxId::generate())
    }

    pub fn with_id(id: SandboxId) -> Self {
        Self {
            id,
            state: LeaseState::Reserved,
        }
    }

    pub fn id(&self) -> &SandboxId {
        &self.id
    }

    pub fn state(&self) -> LeaseState {
        self.state
    }

    /// True while a container may exist that nobody has removed yet.
    pub fn needs_teardown(&self) -> bool {
        matches!(
            self.state,
            LeaseState::Creating | LeaseState::Created | LeaseState::Running
        )
    }

    /// The sandbox id, provided it is running.
    pub fn running_id(&self) -> Result<&SandboxId, SandboxError> {
        match self.state {
            LeaseState::Running => Ok(&self.id),
            LeaseState::Released => Err(SandboxError::invalid_state(format!(
                "sandbox {} was already torn down",
                self.id
            ))),
            state => Err(SandboxError::invalid_state(format!(
                "sandbox {} is not running ({state:?})",
                self.id
            ))),
        }
    }

    /// Tear the sandbox down. Runs at most once per lease.
    ///
    /// A failed stop is only logged since removal is forced; a failed
    /// removal is returned because the container may still exist.
    pub async fn release(
        &mut self,
        runtime: &dyn ContainerRuntime,
    ) -> Result<Teardown, SandboxError> {
        let previous = self.state;
        match previous {
            LeaseState::Released => {
                return Err(SandboxError::invalid_state(format!(
                    "sandbox {} was already torn down",
                    self.id
                )));
            }
            LeaseState::Reserved => {
                self.state = LeaseState::Released;
                debug!("Sandbox {} was never created, nothing to tear down", self.id);
                return Ok(Teardown::NotNeeded);
            }
            LeaseState::Creating | LeaseState::Created | LeaseState::Running => {}
        }

        self.state = LeaseState::Released;
        info!("Tearing down sandbox {}", self.id);

        if previous == LeaseState::Running {
            if let Err(e) = runtime.stop(&self.id).await {
                warn!("Failed to stop sandbox {}: {}. Removing anyway.", self.id, e);
            }
        }

        match runtime.remove(&self.id).await {
            Ok(()) => Ok(Teardown::Done),
            // An interrupted creation may never have reached the daemon
            Err(e) if e.is_not_found() && previous == LeaseState::Creating => {
                Ok(Teardown::NotNeeded)
            }
            Err(e) => Err(e),
        }
    }
}

impl Drop for SandboxLease {
    fn drop(&mut self) {
        if self.needs_teardown() {
            warn!(
                "Sandbox {} dropped without teardown; remove it with `docker rm -f {}`",
                self.id, self.id
            );
        }
    }
}

/// Make `image` available, then create and start the leased sandbox from it.
///
/// On failure the lease reflects how far provisioning got: after a failed
/// start it still holds a created container that must be released.
pub(crate) async fn provision(
    runtime: &dyn ContainerRuntime,
    image: &str,
    lease: &mut SandboxLease,
) -> Result<(), SandboxError> {
    if lease.state != LeaseState::Reserved {
        return Err(SandboxError::invalid_state(format!(
            "sandbox {} cannot be provisioned twice",
            lease.id
        )));
    }

    runtime.ensure_image(image).await?;

    lease.state = LeaseState::Creating;
    if let Err(e) = runtime.create(&lease.id, image).await {
        lease.state = LeaseState::Reserved;
        return Err(e);
    }
    lease.state = LeaseState::Created;

    runtime.start(&lease.id).await?;
    lease.state = LeaseState::Running;

    info!("Sandbox {} running from {} ({})", lease.id, image, runtime.name());
    Ok(())
}
