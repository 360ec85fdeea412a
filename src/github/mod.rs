//! Source-control host collaborator.
//!
//! The pipeline talks to the host through [`SourceHost`]: credential
//! validation, reading one file's text, and downloading a snapshot of the
//! repository. [`GithubClient`] implements it against the GitHub GraphQL
//! (v4) and REST (v3) APIs.

mod client;
mod graphql;
#[cfg(test)]
pub(crate) mod mock;

pub(crate) use client::GithubClient;

use async_trait::async_trait;
use std::fmt;

use crate::repo::RepoSlug;
use crate::snapshot::Snapshot;

/// An access token. Immutable once created; never printed.
#[derive(Clone, PartialEq, Eq)]
pub(crate) struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Value for the `Authorization` header.
    pub fn bearer(&self) -> String {
        format!("bearer {}", self.0)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Snapshot archive formats offered by the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[allow(dead_code)] // Zipball is offered by the API; sandboxes only unpack tarballs
pub(crate) enum ArchiveFormat {
    #[default]
    Tarball,
    Zipball,
}

impl ArchiveFormat {
    /// File-name suffix the host uses for this format.
    pub fn suffix(self) -> &'static str {
        match self {
            Self::Tarball => ".tar.gz",
            Self::Zipball => ".zip",
        }
    }
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tarball => write!(f, "tarball"),
            Self::Zipball => write!(f, "zipball"),
        }
    }
}

/// Errors returned by the source-control host.
#[derive(Debug, thiserror::Error)]
pub(crate) enum SourceHostError {
    /// Request could not be sent or the response could not be read.
    #[error("Request to {endpoint} failed: {source}")]
    Http {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    /// The host rejected the credential.
    #[error("Credential rejected by {endpoint}")]
    Unauthorized { endpoint: String },

    /// The host answered with an unexpected status.
    #[error("{endpoint} returned {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    /// The GraphQL response carried errors.
    #[error("GraphQL query failed: {}", messages.join("; "))]
    GraphQl { messages: Vec<String> },

    /// The requested file does not exist (or is not a text blob).
    #[error("File {expression} not found in {repo}")]
    FileNotFound { repo: String, expression: String },

    /// The repository does not exist or is not visible with this credential.
    #[error("Repository {repo} not found")]
    RepositoryNotFound { repo: String },

    /// The response could not be interpreted.
    #[error("Unexpected response: {message}")]
    Malformed { message: String },
}

impl SourceHostError {
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed {
            message: message.into(),
        }
    }

    /// Returns true if the host rejected the credential.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }
}

/// Operations the pipeline needs from the source-control host.
#[async_trait]
pub(crate) trait SourceHost: Send + Sync {
    /// Returns whether the credential is accepted by the host.
    async fn validate_credential(&self) -> Result<bool, SourceHostError>;

    /// Returns the name of the repository's default branch.
    async fn default_branch(&self, repo: &RepoSlug) -> Result<String, SourceHostError>;

    /// Returns the text of a file, addressed as `<ref>:<path>`.
    async fn fetch_file_text(
        &self,
        repo: &RepoSlug,
        expression: &str,
    ) -> Result<String, SourceHostError>;

    /// Starts downloading a snapshot of the repository at `git_ref`.
    async fn fetch_snapshot(
        &self,
        repo: &RepoSlug,
        format: ArchiveFormat,
        git_ref: &str,
    ) -> Result<Snapshot, SourceHostError>;
}
