//! GraphQL request and response envelopes for the GitHub v4 API.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::SourceHostError;

pub(super) const VIEWER_QUERY: &str = "{ viewer { isViewer } }";

pub(super) const DEFAULT_BRANCH_QUERY: &str = r"query ($name: String!, $owner: String!) {
  repository(name: $name, owner: $owner) {
    defaultBranchRef {
      name
    }
  }
}
";

pub(super) const FILE_CONTENT_QUERY: &str = r"query ($name: String!, $owner: String!, $file: String!) {
  repository(name: $name, owner: $owner) {
    content: object(expression: $file) {
      ... on Blob {
        text
      }
    }
  }
}
";

#[derive(Debug, Serialize)]
pub(super) struct Request<'a> {
    pub query: &'a str,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub variables: Value,
}

#[derive(Debug, Deserialize)]
pub(super) struct Response<T> {
    pub data: Option<T>,
    #[serde(default)]
    pub errors: Vec<ErrorEntry>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ErrorEntry {
    pub message: String,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

impl<T> Response<T> {
    /// True if any error reports a missing object.
    pub fn is_not_found(&self) -> bool {
        self.errors
            .iter()
            .any(|e| e.kind.as_deref() == Some("NOT_FOUND"))
    }

    /// Unwrap the data, turning reported errors into `SourceHostError::GraphQl`.
    pub fn into_data(self) -> Result<T, SourceHostError> {
        if !self.errors.is_empty() {
            return Err(SourceHostError::GraphQl {
                messages: self.errors.into_iter().map(|e| e.message).collect(),
            });
        }
        self.data
            .ok_or_else(|| SourceHostError::malformed("GraphQL response has no data"))
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct ViewerData {
    pub viewer: Viewer,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct Viewer {
    pub is_viewer: bool,
}

#[derive(Debug, Deserialize)]
pub(super) struct DefaultBranchData {
    pub repository: Option<DefaultBranchRepository>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct DefaultBranchRepository {
    pub default_branch_ref: Option<BranchRef>,
}

#[derive(Debug, Deserialize)]
pub(super) struct BranchRef {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct FileData {
    pub repository: Option<FileRepository>,
}

#[derive(Debug, Deserialize)]
pub(super) struct FileRepository {
    pub content: Option<Blob>,
}

#[derive(Debug, Deserialize)]
pub(super) struct Blob {
    pub text: Option<String>,
}
