//! Disposable Docker sandboxes for running build commands.
//!
//! A run leases one sandbox ([`SandboxLease`]), provisions it from the
//! build's runtime image, stages the source snapshot into it, executes
//! commands one at a time, and releases it exactly once.

mod docker;
mod error;
mod exec;
#[cfg(test)]
pub(crate) mod mock;
mod provision;
mod runtime;
mod stage;

pub(crate) use docker::DockerRuntime;
pub(crate) use error::SandboxError;
pub(crate) use exec::{drain_output, execute, inspect};
pub(crate) use provision::{provision, SandboxLease, Teardown};
pub(crate) use runtime::ContainerRuntime;
pub(crate) use stage::stage;
