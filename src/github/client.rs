use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use super::graphql::{
    self, DefaultBranchData, FileData, ViewerData, DEFAULT_BRANCH_QUERY, FILE_CONTENT_QUERY,
    VIEWER_QUERY,
};
use super::{ArchiveFormat, Credential, SourceHost, SourceHostError};
use crate::config::GithubConfig;
use crate::repo::RepoSlug;
use crate::snapshot::{root_name_from_filename, ByteStream, Snapshot};

/// GitHub API client. The credential is fixed at construction.
pub(crate) struct GithubClient {
    http: reqwest::Client,
    api_url: String,
    graphql_url: String,
    request_timeout: Duration,
}

impl GithubClient {
    pub fn new(credential: &Credential, config: &GithubConfig) -> Result<Self, SourceHostError> {
        let mut auth = HeaderValue::from_str(&credential.bearer())
            .map_err(|_| SourceHostError::malformed("credential contains invalid characters"))?;
        auth.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, auth);
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));

        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .connect_timeout(config.request_timeout())
            .build()
            .map_err(|source| SourceHostError::Http {
                endpoint: config.api_url.clone(),
                source,
            })?;

        Ok(Self {
            http,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            graphql_url: config.graphql_url.clone(),
            request_timeout: config.request_timeout(),
        })
    }

    async fn query<T: DeserializeOwned>(
        &self,
        query: &str,
        variables: Value,
    ) -> Result<graphql::Response<T>, SourceHostError> {
        debug!("GraphQL query to {}", self.graphql_url);

        let response = self
            .http
            .post(&self.graphql_url)
            .timeout(self.request_timeout)
            .header(header::CACHE_CONTROL, "no-cache")
            .json(&graphql::Request { query, variables })
            .send()
            .await
            .map_err(|source| SourceHostError::Http {
                endpoint: self.graphql_url.clone(),
                source,
            })?;

        let response = check_status(&self.graphql_url, response).await?;

        response
            .json::<graphql::Response<T>>()
            .await
            .map_err(|source| SourceHostError::Http {
                endpoint: self.graphql_url.clone(),
                source,
            })
    }
}

#[async_trait]
impl SourceHost for GithubClient {
    async fn validate_credential(&self) -> Result<bool, SourceHostError> {
        match self.query::<ViewerData>(VIEWER_QUERY, Value::Null).await {
            Ok(response) => Ok(response.into_data()?.viewer.is_viewer),
            Err(e) if e.is_unauthorized() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn default_branch(&self, repo: &RepoSlug) -> Result<String, SourceHostError> {
        let response = self
            .query::<DefaultBranchData>(
                DEFAULT_BRANCH_QUERY,
                json!({ "owner": repo.owner(), "name": repo.name() }),
            )
            .await?;

        if response.is_not_found() {
            return Err(SourceHostError::RepositoryNotFound {
                repo: repo.to_string(),
            });
        }

        let repository = response
            .into_data()?
            .repository
            .ok_or_else(|| SourceHostError::RepositoryNotFound {
                repo: repo.to_string(),
            })?;

        repository
            .default_branch_ref
            .map(|branch| branch.name)
            .ok_or_else(|| SourceHostError::malformed(format!("{repo} has no default branch")))
    }

    async fn fetch_file_text(
        &self,
        repo: &RepoSlug,
        expression: &str,
    ) -> Result<String, SourceHostError> {
        let response = self
            .query::<FileData>(
                FILE_CONTENT_QUERY,
                json!({ "owner": repo.owner(), "name": repo.name(), "file": expression }),
            )
            .await?;

        if response.is_not_found() {
            return Err(SourceHostError::RepositoryNotFound {
                repo: repo.to_string(),
            });
        }

        let not_found = || SourceHostError::FileNotFound {
            repo: repo.to_string(),
            expression: expression.to_string(),
        };

        response
            .into_data()?
            .repository
            .ok_or_else(|| SourceHostError::RepositoryNotFound {
                repo: repo.to_string(),
            })?
            .content
            .and_then(|blob| blob.text)
            .ok_or_else(not_found)
    }

    async fn fetch_snapshot(
        &self,
        repo: &RepoSlug,
        format: ArchiveFormat,
        git_ref: &str,
    ) -> Result<Snapshot, SourceHostError> {
        let url = format!(
            "{}/repos/{}/{}/{}/{}",
            self.api_url,
            repo.owner(),
            repo.name(),
            format,
            git_ref
        );
        debug!("Downloading {} snapshot from {}", format, url);

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|source| SourceHostError::Http {
                endpoint: url.clone(),
                source,
            })?;

        let response = check_status(&url, response).await?;

        let filename = response
            .headers()
            .get(header::CONTENT_DISPOSITION)
            .and_then(|value| value.to_str().ok())
            .and_then(attachment_filename)
            .ok_or_else(|| {
                SourceHostError::malformed(format!(
                    "{url} did not name the archive in Content-Disposition"
                ))
            })?;

        let root_name = root_name_from_filename(&filename, format.suffix());
        let content: ByteStream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(std::io::Error::other))
            .boxed();

        Ok(Snapshot::new(root_name, content))
    }
}

async fn check_status(
    endpoint: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, SourceHostError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == StatusCode::UNAUTHORIZED {
        return Err(SourceHostError::Unauthorized {
            endpoint: endpoint.to_string(),
        });
    }

    let body = response.text().await.unwrap_or_default();
    Err(SourceHostError::Status {
        endpoint: endpoint.to_string(),
        status: status.as_u16(),
        body,
    })
}

/// Extract the `filename` parameter of a `Content-Disposition` header value.
fn attachment_filename(value: &str) -> Option<String> {
    value
        .split(';')
        .skip(1)
        .find_map(|param| {
            let (key, val) = param.split_once('=')?;
            key.trim()
                .eq_ignore_ascii_case("filename")
                .then(|| val.trim().trim_matches('"').to_string())
        })
        .filter(|name| !name.is_empty())
}
