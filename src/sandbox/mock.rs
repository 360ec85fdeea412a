//! Mock container runtime for testing.
//!
//! Scripted results per operation and a shared call log, so tests can
//! assert the exact sequence of engine calls a run made.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{stream, StreamExt};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::runtime::{Attached, ContainerRuntime, ExecId, SandboxId};
use super::SandboxError;
use crate::snapshot::ByteStream;

/// An engine call, as recorded by [`MockRuntime`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    EnsureImage(String),
    Create(String),
    Start,
    Upload,
    Exec { argv: Vec<String>, workdir: String },
    ExitCode(String),
    Stop,
    Remove,
}

/// Scripted behavior for commands whose first argument matches a key.
#[derive(Debug, Clone)]
pub(crate) enum ExecScript {
    /// Emit these output chunks, then exit with this code.
    Exit { output: Vec<String>, code: i64 },
    /// Fail to launch.
    LaunchError(String),
    /// Never produce output or finish.
    Hang,
}

/// Which engine operation should fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Failure {
    Pull,
    Create,
    Start,
    Upload,
    ExitCode,
    Stop,
    Remove,
}

#[derive(Debug, Default)]
struct Recorded {
    calls: Vec<Call>,
    uploaded: Vec<u8>,
}

/// A mock container runtime.
#[derive(Debug, Clone, Default)]
pub(crate) struct MockRuntime {
    failures: Vec<Failure>,
    scripts: HashMap<String, ExecScript>,
    hang_on_create: bool,
    hang_on_remove: bool,
    recorded: Arc<Mutex<Recorded>>,
    exit_codes: Arc<Mutex<HashMap<String, i64>>>,
}

impl MockRuntime {
    /// A runtime where every operation succeeds and unknown commands echo
    /// their arguments and exit 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make one operation fail.
    pub fn failing(mut self, failure: Failure) -> Self {
        self.failures.push(failure);
        self
    }

    /// Script the command whose program is `program`.
    pub fn script(mut self, program: &str, script: ExecScript) -> Self {
        self.scripts.insert(program.to_string(), script);
        self
    }

    /// Never finish container creation.
    pub fn hanging_on_create(mut self) -> Self {
        self.hang_on_create = true;
        self
    }

    /// Never finish container removal.
    pub fn hanging_on_remove(mut self) -> Self {
        self.hang_on_remove = true;
        self
    }

    /// All calls made so far.
    pub fn calls(&self) -> Vec<Call> {
        self.recorded.lock().unwrap().calls.clone()
    }

    /// Number of calls matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| predicate(c)).count()
    }

    /// Argument vectors of every launched command, in order.
    pub fn executed(&self) -> Vec<Vec<String>> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Exec { argv, .. } => Some(argv),
                _ => None,
            })
            .collect()
    }

    /// Bytes received by uploads.
    pub fn uploaded(&self) -> Vec<u8> {
        self.recorded.lock().unwrap().uploaded.clone()
    }

    fn record(&self, call: Call) {
        self.recorded.lock().unwrap().calls.push(call);
    }

    fn fails(&self, failure: Failure) -> bool {
        self.failures.contains(&failure)
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn ensure_image(&self, image: &str) -> Result<(), SandboxError> {
        self.record(Call::EnsureImage(image.to_string()));
        if self.fails(Failure::Pull) {
            return Err(SandboxError::image_not_found(image));
        }
        Ok(())
    }

    async fn create(&self, id: &SandboxId, image: &str) -> Result<(), SandboxError> {
        self.record(Call::Create(image.to_string()));
        if self.hang_on_create {
            std::future::pending::<()>().await;
        }
        if self.fails(Failure::Create) {
            return Err(SandboxError::container_failed(format!("create {id}")));
        }
        Ok(())
    }

    async fn start(&self, id: &SandboxId) -> Result<(), SandboxError> {
        self.record(Call::Start);
        if self.fails(Failure::Start) {
            return Err(SandboxError::container_failed(format!("start {id}")));
        }
        Ok(())
    }

    async fn upload(&self, id: &SandboxId, mut archive: ByteStream) -> Result<(), SandboxError> {
        self.record(Call::Upload);
        let mut received = Vec::new();
        while let Some(chunk) = archive.next().await {
            let chunk = chunk.map_err(|e| SandboxError::ArchiveRead {
                message: e.to_string(),
            })?;
            received.extend_from_slice(&chunk);
        }
        if self.fails(Failure::Upload) {
            return Err(SandboxError::container_failed(format!(
                "copy archive into {id}"
            )));
        }
        self.recorded.lock().unwrap().uploaded.extend(received);
        Ok(())
    }

    async fn exec(
        &self,
        _id: &SandboxId,
        argv: &[String],
        workdir: &str,
    ) -> Result<Attached, SandboxError> {
        self.record(Call::Exec {
            argv: argv.to_vec(),
            workdir: workdir.to_string(),
        });

        let program = argv.first().cloned().unwrap_or_default();
        let script = self.scripts.get(&program).cloned().unwrap_or(ExecScript::Exit {
            output: vec![format!("{}\n", argv.get(1..).unwrap_or_default().join(" "))],
            code: 0,
        });

        let exec_id = format!("exec-{}", self.count(|c| matches!(c, Call::Exec { .. })));
        match script {
            ExecScript::Exit { output, code } => {
                self.exit_codes
                    .lock()
                    .unwrap()
                    .insert(exec_id.clone(), code);
                let chunks: Vec<Result<Bytes, SandboxError>> =
                    output.into_iter().map(|s| Ok(Bytes::from(s))).collect();
                Ok(Attached {
                    exec: ExecId::from(exec_id),
                    output: stream::iter(chunks).boxed(),
                })
            }
            ExecScript::LaunchError(message) => Err(SandboxError::container_failed(message)),
            ExecScript::Hang => Ok(Attached {
                exec: ExecId::from(exec_id),
                output: stream::pending().boxed(),
            }),
        }
    }

    async fn exit_code(&self, exec: &ExecId) -> Result<i64, SandboxError> {
        self.record(Call::ExitCode(exec.to_string()));
        if self.fails(Failure::ExitCode) {
            return Err(SandboxError::execution_query(exec.as_str(), "unreachable"));
        }
        self.exit_codes
            .lock()
            .unwrap()
            .get(exec.as_str())
            .copied()
            .ok_or_else(|| SandboxError::execution_query(exec.as_str(), "no such exec"))
    }

    async fn stop(&self, id: &SandboxId) -> Result<(), SandboxError> {
        self.record(Call::Stop);
        if self.fails(Failure::Stop) {
            return Err(SandboxError::container_failed(format!("stop {id}")));
        }
        Ok(())
    }

    async fn remove(&self, id: &SandboxId) -> Result<(), SandboxError> {
        self.record(Call::Remove);
        if self.hang_on_remove {
            std::future::pending::<()>().await;
        }
        if self.fails(Failure::Remove) {
            return Err(SandboxError::container_failed(format!("remove {id}")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_runtime_default_exec_echoes() {
        let runtime = MockRuntime::new();
        let id = SandboxId::from("runbox-1");
        let argv = vec!["echo".to_string(), "hi".to_string()];

        let mut attached = runtime.exec(&id, &argv, "/src").await.unwrap();
        let first = attached.output.next().await.unwrap().unwrap();
        assert_eq!(&first[..], b"hi\n");
        assert_eq!(runtime.exit_code(&attached.exec).await.unwrap(), 0);
        assert_eq!(runtime.executed(), vec![argv]);
    }

    #[tokio::test]
    async fn test_mock_runtime_scripted_exit() {
        let runtime = MockRuntime::new().script(
            "false",
            ExecScript::Exit {
                output: vec![],
                code: 1,
            },
        );
        let id = SandboxId::from("runbox-1");
        let attached = runtime
            .exec(&id, &["false".to_string()], "/src")
            .await
            .unwrap();
        assert_eq!(runtime.exit_code(&attached.exec).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_mock_runtime_failures() {
        let runtime = MockRuntime::new().failing(Failure::Start);
        let id = SandboxId::from("runbox-1");
        assert!(runtime.create(&id, "img").await.is_ok());
        assert!(runtime.start(&id).await.is_err());
        assert_eq!(
            runtime.calls(),
            vec![Call::Create("img".to_string()), Call::Start]
        );
    }
}
