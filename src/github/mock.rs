//! Mock source-control host for testing.
//!
//! Serves a fixed build configuration and snapshot, and records which
//! operations were requested for test assertions.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{stream, StreamExt};
use std::sync::{Arc, Mutex};

use super::{ArchiveFormat, SourceHost, SourceHostError};
use crate::repo::RepoSlug;
use crate::snapshot::{ByteStream, Snapshot};

/// A mock source-control host.
#[derive(Debug, Clone)]
pub(crate) struct MockSourceHost {
    credential_valid: bool,
    default_branch: String,
    config_text: Option<String>,
    archive: Vec<u8>,
    root_name: String,
    fail_snapshot: bool,
    requests: Arc<Mutex<Vec<String>>>,
}

impl MockSourceHost {
    /// A host with a valid credential that serves `config_text` from `main`.
    pub fn new(config_text: &str) -> Self {
        Self {
            credential_valid: true,
            default_branch: "main".to_string(),
            config_text: Some(config_text.to_string()),
            archive: b"archive".to_vec(),
            root_name: "/octo-widgets-1a2b3c".to_string(),
            fail_snapshot: false,
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Reject the credential.
    pub fn with_invalid_credential(mut self) -> Self {
        self.credential_valid = false;
        self
    }

    /// Answer every file lookup with "not found".
    pub fn without_config(mut self) -> Self {
        self.config_text = None;
        self
    }

    /// Serve these archive bytes as the snapshot.
    pub fn with_archive(mut self, archive: Vec<u8>) -> Self {
        self.archive = archive;
        self
    }

    /// Fail snapshot downloads.
    pub fn with_failing_snapshot(mut self) -> Self {
        self.fail_snapshot = true;
        self
    }

    /// The requests made so far, e.g. `"file main:.runbox/config.yml"`.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    fn record(&self, request: String) {
        self.requests.lock().unwrap().push(request);
    }
}

#[async_trait]
impl SourceHost for MockSourceHost {
    async fn validate_credential(&self) -> Result<bool, SourceHostError> {
        self.record("validate".to_string());
        Ok(self.credential_valid)
    }

    async fn default_branch(&self, _repo: &RepoSlug) -> Result<String, SourceHostError> {
        self.record("default_branch".to_string());
        Ok(self.default_branch.clone())
    }

    async fn fetch_file_text(
        &self,
        repo: &RepoSlug,
        expression: &str,
    ) -> Result<String, SourceHostError> {
        self.record(format!("file {expression}"));
        self.config_text
            .clone()
            .ok_or_else(|| SourceHostError::FileNotFound {
                repo: repo.to_string(),
                expression: expression.to_string(),
            })
    }

    async fn fetch_snapshot(
        &self,
        _repo: &RepoSlug,
        format: ArchiveFormat,
        git_ref: &str,
    ) -> Result<Snapshot, SourceHostError> {
        self.record(format!("snapshot {format} {git_ref}"));
        if self.fail_snapshot {
            return Err(SourceHostError::Status {
                endpoint: "mock".to_string(),
                status: 500,
                body: "snapshot unavailable".to_string(),
            });
        }

        let content: ByteStream = stream::once(futures_util::future::ready(Ok(Bytes::from(
            self.archive.clone(),
        ))))
        .boxed();
        Ok(Snapshot::new(self.root_name.clone(), content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_host_records_requests() {
        let host = MockSourceHost::new("runtime_image: alpine\n");
        let repo: RepoSlug = "octo/widgets".parse().unwrap();

        assert!(host.validate_credential().await.unwrap());
        let text = host.fetch_file_text(&repo, "main:ci.yml").await.unwrap();
        assert_eq!(text, "runtime_image: alpine\n");

        assert_eq!(host.requests(), vec!["validate", "file main:ci.yml"]);
    }

    #[tokio::test]
    async fn test_mock_host_without_config() {
        let host = MockSourceHost::new("").without_config();
        let repo: RepoSlug = "octo/widgets".parse().unwrap();
        let err = host.fetch_file_text(&repo, "main:ci.yml").await.unwrap_err();
        assert!(matches!(err, SourceHostError::FileNotFound { .. }));
    }
}
