//! The run controller.
//!
//! A run moves through
//! `Idle → ConfigResolved → Provisioned → Staged → Executing(i) → Succeeded | Failed → TornDown`.
//! Every phase is raced against the run deadline and the cancel signal.
//! Once the phases end, however they end, the sandbox lease is released
//! under its own grace timeout, so a cancelled or timed-out run still
//! removes its sandbox.

mod format;

use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWrite;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::build_config::{BuildConfig, BuildConfigError};
use crate::config::RunConfig;
use crate::github::{ArchiveFormat, SourceHost, SourceHostError};
use crate::repo::RepoSlug;
use crate::sandbox::{self, ContainerRuntime, SandboxError, SandboxLease, Teardown};

use format::{format_run_banner, format_step_header, format_summary};

/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RunState {
    Idle,
    ConfigResolved,
    Provisioned,
    Staged,
    /// Running the command at this index.
    Executing(usize),
    Succeeded,
    Failed,
    TornDown,
}

/// Why a run failed.
#[derive(Debug, thiserror::Error)]
pub(crate) enum PipelineError {
    /// The source-control host rejected the credential.
    #[error("Credential rejected by the source-control host")]
    Authentication,

    /// Fetching the configuration or the snapshot failed.
    #[error(transparent)]
    Collaborator(#[from] SourceHostError),

    /// The build configuration could not be used.
    #[error(transparent)]
    Configuration(#[from] BuildConfigError),

    /// The sandbox could not be provisioned.
    #[error("Provisioning failed: {0}")]
    Provisioning(#[source] SandboxError),

    /// The snapshot could not be copied into the sandbox.
    #[error("Staging failed: {0}")]
    Staging(#[source] SandboxError),

    /// A command could not be launched, attached to, or inspected.
    #[error("Failed to run '{command}': {source}")]
    ExecutionLaunch {
        command: String,
        #[source]
        source: SandboxError,
    },

    /// A command ran and exited non-zero.
    #[error("Command '{command}' exited with code {exit_code}")]
    CommandFailed { command: String, exit_code: i64 },

    /// The run deadline elapsed.
    #[error("Run exceeded its deadline of {timeout_secs} seconds")]
    Timeout { timeout_secs: u64 },

    /// Cancellation was requested.
    #[error("Run was cancelled")]
    Cancelled,

    /// The sandbox could not be removed after an otherwise successful run.
    #[error("Teardown failed: {0}")]
    Teardown(#[source] SandboxError),
}

impl PipelineError {
    /// The exit code of the failing command, if a command failed.
    pub fn command_exit_code(&self) -> Option<i64> {
        match self {
            Self::CommandFailed { exit_code, .. } => Some(*exit_code),
            _ => None,
        }
    }
}

/// The terminal result of a run.
#[derive(Debug)]
pub(crate) struct RunOutcome {
    pub succeeded: bool,
    pub failing_exit_code: Option<i64>,
    pub error: Option<PipelineError>,
    pub commands_run: usize,
    pub final_state: RunState,
    /// Teardown failure recorded behind an earlier error.
    pub teardown_error: Option<SandboxError>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunOutcome {
    /// Process exit code for this outcome.
    ///
    /// A failing command's own code is passed through when the process can
    /// represent it; every other failure is 1.
    pub fn exit_code(&self) -> u8 {
        if self.succeeded {
            return 0;
        }
        self.failing_exit_code
            .and_then(|code| u8::try_from(code).ok())
            .filter(|code| *code != 0)
            .unwrap_or(1)
    }
}

/// Requests cancellation of a run.
#[derive(Debug)]
pub(crate) struct Canceller(watch::Sender<bool>);

impl Canceller {
    pub fn cancel(&self) {
        self.0.send_replace(true);
    }
}

/// Observed by a run; fires once cancellation has been requested.
#[derive(Debug, Clone)]
pub(crate) struct CancelSignal(watch::Receiver<bool>);

impl CancelSignal {
    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once cancelled. Never resolves if the canceller is dropped.
    pub async fn cancelled(&mut self) {
        if self.0.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// A connected canceller and signal.
pub(crate) fn cancellation() -> (Canceller, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (Canceller(tx), CancelSignal(rx))
}

/// Settings for one run.
#[derive(Debug, Clone)]
pub(crate) struct RunOptions {
    /// Deadline covering everything up to teardown.
    pub timeout: Duration,
    /// Bound on teardown alone, applied even after the deadline passed.
    pub teardown_timeout: Duration,
    /// Path of the build configuration inside the repository.
    pub config_path: String,
    /// Ref to build; the repository's default branch when unset.
    pub git_ref: Option<String>,
    pub show_progress: bool,
}

impl RunOptions {
    pub fn from_config(run: &RunConfig, git_ref: Option<String>) -> Self {
        Self {
            timeout: run.timeout(),
            teardown_timeout: run.teardown_timeout(),
            config_path: run.config_path.clone(),
            git_ref,
            show_progress: run.show_progress,
        }
    }
}

/// Deadline used when the configured timeout does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Races each phase against the deadline and the cancel signal.
struct Bounds {
    deadline: Instant,
    timeout: Duration,
    cancel: CancelSignal,
}

impl Bounds {
    fn new(timeout: Duration, cancel: CancelSignal) -> Self {
        let now = Instant::now();
        Self {
            deadline: now
                .checked_add(timeout)
                .unwrap_or_else(|| now + FAR_FUTURE),
            timeout,
            cancel,
        }
    }

    async fn run<F: Future>(&mut self, phase: &str, fut: F) -> Result<F::Output, PipelineError> {
        if self.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let timeout_secs = self.timeout.as_secs();
        let deadline = self.deadline;
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => {
                debug!("{} interrupted by cancellation", phase);
                Err(PipelineError::Cancelled)
            }
            result = tokio::time::timeout_at(deadline, fut) => result.map_err(|_| {
                debug!("{} interrupted by the run deadline", phase);
                PipelineError::Timeout { timeout_secs }
            }),
        }
    }
}

struct Progress {
    state: RunState,
    commands_run: usize,
}

/// Drives runs against a source-control host and a container runtime.
pub(crate) struct Pipeline {
    host: Arc<dyn SourceHost>,
    runtime: Arc<dyn ContainerRuntime>,
    options: RunOptions,
}

impl Pipeline {
    pub fn new(
        host: Arc<dyn SourceHost>,
        runtime: Arc<dyn ContainerRuntime>,
        options: RunOptions,
    ) -> Self {
        Self {
            host,
            runtime,
            options,
        }
    }

    /// Run the repository's build, writing command output to `sink`.
    pub async fn run<W>(&self, repo: &RepoSlug, sink: &mut W, cancel: CancelSignal) -> RunOutcome
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let started_at = Utc::now();
        let mut lease = SandboxLease::reserve();
        let mut bounds = Bounds::new(self.options.timeout, cancel);
        let mut progress = Progress {
            state: RunState::Idle,
            commands_run: 0,
        };

        info!(
            event = "run_start",
            repo = %repo,
            sandbox = %lease.id(),
            timeout_secs = self.options.timeout.as_secs(),
            "Starting run for {}",
            repo
        );

        let result = self
            .drive(repo, sink, &mut bounds, &mut lease, &mut progress)
            .await;
        progress.state = if result.is_ok() {
            RunState::Succeeded
        } else {
            RunState::Failed
        };

        let mut error = result.err();
        let mut teardown_error = None;
        match self.teardown(&mut lease).await {
            Ok(Teardown::Done) => progress.state = RunState::TornDown,
            Ok(Teardown::NotNeeded) => {}
            Err(e) => {
                progress.state = RunState::Failed;
                if e.is_timeout() {
                    warn!(
                        "Sandbox {} may still exist; remove it with `docker rm -f {}`",
                        lease.id(),
                        lease.id()
                    );
                }
                if error.is_none() {
                    error = Some(PipelineError::Teardown(e));
                } else {
                    warn!("Teardown of sandbox {} failed: {}", lease.id(), e);
                    teardown_error = Some(e);
                }
            }
        }

        let outcome = RunOutcome {
            succeeded: error.is_none(),
            failing_exit_code: error.as_ref().and_then(PipelineError::command_exit_code),
            error,
            commands_run: progress.commands_run,
            final_state: progress.state,
            teardown_error,
            started_at,
            finished_at: Utc::now(),
        };

        let elapsed_ms = (outcome.finished_at - outcome.started_at).num_milliseconds();
        match outcome.error {
            None => info!(
                event = "run_finished",
                succeeded = true,
                exit_code = outcome.exit_code(),
                commands_run = outcome.commands_run,
                elapsed_ms,
                "Run succeeded"
            ),
            Some(ref e) => error!(
                event = "run_finished",
                succeeded = false,
                exit_code = outcome.exit_code(),
                commands_run = outcome.commands_run,
                elapsed_ms,
                "Run failed: {}",
                e
            ),
        }

        if self.options.show_progress {
            eprint!("{}", format_summary(&outcome));
        }
        outcome
    }

    async fn drive<W>(
        &self,
        repo: &RepoSlug,
        sink: &mut W,
        bounds: &mut Bounds,
        lease: &mut SandboxLease,
        progress: &mut Progress,
    ) -> Result<(), PipelineError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let host = self.host.as_ref();
        let runtime = self.runtime.as_ref();

        let valid = match bounds
            .run("credential check", host.validate_credential())
            .await?
        {
            Ok(valid) => valid,
            Err(e) if e.is_unauthorized() => false,
            Err(e) => return Err(e.into()),
        };
        if !valid {
            return Err(PipelineError::Authentication);
        }

        let git_ref = match self.options.git_ref {
            Some(ref git_ref) => git_ref.clone(),
            None => {
                bounds
                    .run("default branch lookup", host.default_branch(repo))
                    .await??
            }
        };

        let expression = format!("{git_ref}:{}", self.options.config_path);
        let text = bounds
            .run("config fetch", host.fetch_file_text(repo, &expression))
            .await??;
        let config = BuildConfig::parse(&text)?;
        progress.state = RunState::ConfigResolved;
        info!(
            "Resolved {} at {}: image {}, {} command(s)",
            repo,
            git_ref,
            config.runtime_image,
            config.commands.len()
        );
        if self.options.show_progress {
            eprintln!(
                "{}",
                format_run_banner(
                    &repo.to_string(),
                    &git_ref,
                    &config.runtime_image,
                    config.commands.len()
                )
            );
        }

        bounds
            .run(
                "provisioning",
                sandbox::provision(runtime, &config.runtime_image, lease),
            )
            .await?
            .map_err(|e| {
                if e.is_image_not_found() {
                    warn!(
                        "Image {} is not available; check runtime_image in {}",
                        config.runtime_image, self.options.config_path
                    );
                }
                PipelineError::Provisioning(e)
            })?;
        progress.state = RunState::Provisioned;
        info!(
            event = "provisioned",
            sandbox = %lease.id(),
            image = %config.runtime_image,
            "Sandbox provisioned"
        );

        let mut snapshot = bounds
            .run(
                "snapshot fetch",
                host.fetch_snapshot(repo, ArchiveFormat::Tarball, &git_ref),
            )
            .await??;
        bounds
            .run("staging", sandbox::stage(runtime, lease, &mut snapshot))
            .await?
            .map_err(PipelineError::Staging)?;
        let workdir = snapshot.root_name().to_string();
        progress.state = RunState::Staged;
        info!(event = "staged", sandbox = %lease.id(), workdir = %workdir, "Snapshot staged");

        let total = config.commands.len();
        for (index, command) in config.commands.iter().enumerate() {
            progress.state = RunState::Executing(index);
            if self.options.show_progress {
                eprintln!("{}", format_step_header(index, total, &command.to_string()));
            }

            let launch_error = |source| PipelineError::ExecutionLaunch {
                command: command.to_string(),
                source,
            };

            let mut handle = bounds
                .run("launch", sandbox::execute(runtime, lease, command, &workdir))
                .await?
                .map_err(launch_error)?;
            debug!("Launched '{}' as exec {}", handle.command(), handle.exec_id());

            bounds
                .run("output", sandbox::drain_output(&mut handle, sink))
                .await?
                .map_err(launch_error)?;
            let exit_code = bounds
                .run("inspect", sandbox::inspect(runtime, handle))
                .await?
                .map_err(launch_error)?;

            progress.commands_run += 1;
            info!(
                event = "command_finished",
                index,
                command = %command,
                exit_code,
                "Command finished"
            );

            if exit_code != 0 {
                return Err(PipelineError::CommandFailed {
                    command: command.to_string(),
                    exit_code,
                });
            }
        }

        Ok(())
    }

    async fn teardown(&self, lease: &mut SandboxLease) -> Result<Teardown, SandboxError> {
        debug!("Releasing sandbox {} ({:?})", lease.id(), lease.state());
        let grace = self.options.teardown_timeout;
        match tokio::time::timeout(grace, lease.release(self.runtime.as_ref())).await {
            Ok(result) => result,
            Err(_) => Err(SandboxError::timeout(grace)),
        }
    }
}
