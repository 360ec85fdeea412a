use async_trait::async_trait;
use bollard::container::{
    Config as ContainerConfig, CreateContainerOptions, RemoveContainerOptions,
    StopContainerOptions, UploadToContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::models::ExecInspectResponse;
use bollard::Docker;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::runtime::{Attached, ContainerRuntime, ExecId, SandboxId};
use super::SandboxError;
use crate::snapshot::ByteStream;

/// Label set on every sandbox so stray containers can be found by hand.
const MANAGED_LABEL: &str = "runbox.managed";

/// How often an exec is inspected before it is reported as unfinished.
const EXIT_CODE_POLLS: u32 = 10;
const EXIT_CODE_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Holds the read error that ended an upload body early.
type ReadErrorSlot = Arc<Mutex<Option<std::io::Error>>>;

/// Runs sandboxes as Docker containers through the local daemon.
pub(crate) struct DockerRuntime {
    docker: Docker,
    stop_timeout_secs: i64,
}

impl DockerRuntime {
    /// Connect to the local Docker daemon and check that it answers.
    pub async fn connect(stop_timeout_secs: u64) -> Result<Self, SandboxError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| SandboxError::docker_unavailable(e.to_string()))?;

        docker
            .ping()
            .await
            .map_err(|e| SandboxError::docker_unavailable(format!("cannot ping daemon: {e}")))?;

        Ok(Self {
            docker,
            stop_timeout_secs: i64::try_from(stop_timeout_secs).unwrap_or(i64::MAX),
        })
    }

    async fn pull_image(&self, image: &str) -> Result<(), SandboxError> {
        info!("Pulling runtime image: {}", image);

        let pull_options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };
        let mut stream = self.docker.create_image(Some(pull_options), None, None);

        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(output) => {
                    if let Some(error) = output.error {
                        return Err(SandboxError::ImagePullFailed {
                            image: image.to_string(),
                            message: error,
                        });
                    }
                    if let Some(status) = output.status {
                        debug!("pull {}: {}", image, status.trim());
                    }
                }
                Err(e) if status_code(&e) == Some(404) => {
                    return Err(SandboxError::image_not_found(image));
                }
                Err(e) => {
                    return Err(SandboxError::ImagePullFailed {
                        image: image.to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }

        info!("Image pulled successfully: {}", image);
        Ok(())
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn ensure_image(&self, image: &str) -> Result<(), SandboxError> {
        match self.docker.inspect_image(image).await {
            Ok(_) => {
                debug!("Image {} present locally", image);
                Ok(())
            }
            Err(e) if status_code(&e) == Some(404) => self.pull_image(image).await,
            Err(e) => Err(SandboxError::container_failed(format!(
                "inspect image {image}: {e}"
            ))),
        }
    }

    async fn create(&self, id: &SandboxId, image: &str) -> Result<(), SandboxError> {
        debug!("Creating container: {}", id);
        let response = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: id.as_str(),
                    platform: None,
                }),
                build_container_config(image),
            )
            .await
            .map_err(|e| map_container_error(id, "create", &e))?;

        for warning in &response.warnings {
            warn!("Docker warning while creating {}: {}", id, warning);
        }
        Ok(())
    }

    async fn start(&self, id: &SandboxId) -> Result<(), SandboxError> {
        debug!("Starting container: {}", id);
        self.docker
            .start_container::<String>(id.as_str(), None)
            .await
            .map_err(|e| map_container_error(id, "start", &e))
    }

    async fn upload(&self, id: &SandboxId, archive: ByteStream) -> Result<(), SandboxError> {
        let (body, read_error) = infallible_body(archive);

        let options = UploadToContainerOptions {
            path: "/".to_string(),
            ..Default::default()
        };
        let uploaded = self
            .docker
            .upload_to_container_streaming(id.as_str(), Some(options), body)
            .await;

        if let Some(e) = read_error.lock().ok().and_then(|mut slot| slot.take()) {
            return Err(SandboxError::ArchiveRead {
                message: e.to_string(),
            });
        }
        uploaded.map_err(|e| map_container_error(id, "copy archive into", &e))
    }

    async fn exec(
        &self,
        id: &SandboxId,
        argv: &[String],
        workdir: &str,
    ) -> Result<Attached, SandboxError> {
        let exec = self
            .docker
            .create_exec(
                id.as_str(),
                CreateExecOptions {
                    cmd: Some(argv.to_vec()),
                    working_dir: Some(workdir.to_string()),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    tty: Some(true),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| map_container_error(id, "create exec in", &e))?;

        let started = self
            .docker
            .start_exec(
                &exec.id,
                Some(StartExecOptions {
                    detach: false,
                    tty: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| map_container_error(id, "start exec in", &e))?;

        match started {
            StartExecResults::Attached { output, .. } => Ok(Attached {
                exec: ExecId::from(exec.id),
                output: output
                    .map(|chunk| {
                        chunk.map(bollard::container::LogOutput::into_bytes).map_err(|e| {
                            SandboxError::container_failed(format!("read exec output: {e}"))
                        })
                    })
                    .boxed(),
            }),
            StartExecResults::Detached => Err(SandboxError::container_failed(
                "exec was detached unexpectedly",
            )),
        }
    }

    async fn exit_code(&self, exec: &ExecId) -> Result<i64, SandboxError> {
        // The daemon can report the exec as running briefly after its
        // output stream has closed.
        for attempt in 1..=EXIT_CODE_POLLS {
            let inspect = self
                .docker
                .inspect_exec(exec.as_str())
                .await
                .map_err(|e| SandboxError::execution_query(exec.as_str(), e.to_string()))?;

            if let Some(code) = settled_exit_code(&inspect) {
                return Ok(code);
            }
            if attempt < EXIT_CODE_POLLS {
                debug!("Exec {} has not settled yet (attempt {})", exec, attempt);
                tokio::time::sleep(EXIT_CODE_POLL_INTERVAL).await;
            }
        }

        Err(SandboxError::execution_query(
            exec.as_str(),
            "execution did not report an exit code",
        ))
    }

    async fn stop(&self, id: &SandboxId) -> Result<(), SandboxError> {
        debug!("Stopping container: {}", id);
        match self
            .docker
            .stop_container(
                id.as_str(),
                Some(StopContainerOptions {
                    t: self.stop_timeout_secs,
                }),
            )
            .await
        {
            // 304: already stopped
            Err(e) if status_code(&e) == Some(304) => Ok(()),
            result => result.map_err(|e| map_container_error(id, "stop", &e)),
        }
    }

    async fn remove(&self, id: &SandboxId) -> Result<(), SandboxError> {
        debug!("Removing container: {}", id);
        self.docker
            .remove_container(
                id.as_str(),
                Some(RemoveContainerOptions {
                    force: true,
                    v: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| map_container_error(id, "remove", &e))
    }
}

/// Container configuration for a sandbox: attachable standard streams,
/// stdin held open so the image's default process keeps running.
fn build_container_config(image: &str) -> ContainerConfig<String> {
    ContainerConfig {
        image: Some(image.to_string()),
        attach_stdin: Some(true),
        attach_stdout: Some(true),
        attach_stderr: Some(true),
        open_stdin: Some(true),
        labels: Some(HashMap::from([(
            MANAGED_LABEL.to_string(),
            "true".to_string(),
        )])),
        ..Default::default()
    }
}

fn status_code(error: &DockerError) -> Option<u16> {
    match error {
        DockerError::DockerResponseServerError { status_code, .. } => Some(*status_code),
        _ => None,
    }
}

fn map_container_error(id: &SandboxId, action: &str, error: &DockerError) -> SandboxError {
    if status_code(error) == Some(404) {
        return SandboxError::not_found(id.as_str());
    }
    SandboxError::container_failed(format!("{action} {id}: {error}"))
}

/// Turns the archive into an upload body, which must be infallible.
///
/// A read error ends the body early and is left in the returned slot, to be
/// reported once the daemon has answered.
fn infallible_body(archive: ByteStream) -> (BoxStream<'static, Bytes>, ReadErrorSlot) {
    let read_error: ReadErrorSlot = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&read_error);
    let body = archive
        .scan(slot, |slot, chunk| {
            let next = match chunk {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    if let Ok(mut slot) = slot.lock() {
                        *slot = Some(e);
                    }
                    None
                }
            };
            futures_util::future::ready(next)
        })
        .boxed();
    (body, read_error)
}

/// Exit code of a finished exec, or `None` while it is still settling.
fn settled_exit_code(inspect: &ExecInspectResponse) -> Option<i64> {
    if inspect.running == Some(true) {
        return None;
    }
    inspect.exit_code
}
