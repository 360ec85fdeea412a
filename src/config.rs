use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

const CONFIG_FILE: &str = "runbox.toml";

/// Runner settings, loaded from `runbox.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub github: GithubConfig,
    #[serde(default)]
    pub run: RunConfig,
}

/// Source-control host endpoints and HTTP behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubConfig {
    /// REST API base URL
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// GraphQL endpoint
    #[serde(default = "default_graphql_url")]
    pub graphql_url: String,

    /// Timeout for API calls (archive downloads are bounded by the run deadline instead)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// User-Agent header sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            graphql_url: default_graphql_url(),
            request_timeout_secs: default_request_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

impl GithubConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Overall deadline for one run, provisioning through teardown
    #[serde(default = "default_timeout")]
    pub timeout_minutes: u64,

    /// Location of the build configuration inside the repository
    #[serde(default = "default_config_path")]
    pub config_path: String,

    /// Grace period for teardown, applied even after the run deadline passed
    #[serde(default = "default_teardown_timeout")]
    pub teardown_timeout_secs: u64,

    /// Seconds Docker waits for the sandbox to stop before killing it
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_secs: u64,

    /// Print step headers and a summary to stderr
    #[serde(default = "default_true")]
    pub show_progress: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            timeout_minutes: default_timeout(),
            config_path: default_config_path(),
            teardown_timeout_secs: default_teardown_timeout(),
            stop_timeout_secs: default_stop_timeout(),
            show_progress: true,
        }
    }
}

impl RunConfig {
    /// Saturates instead of overflowing for absurdly large settings.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_minutes.saturating_mul(60))
    }

    pub fn teardown_timeout(&self) -> Duration {
        Duration::from_secs(self.teardown_timeout_secs)
    }
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_api_url() -> String {
    "https://api.github.com".to_string()
}

fn default_graphql_url() -> String {
    "https://api.github.com/graphql".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_user_agent() -> String {
    concat!("runbox/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_timeout() -> u64 {
    10
}

fn default_config_path() -> String {
    ".runbox/config.yml".to_string()
}

fn default_teardown_timeout() -> u64 {
    60
}

fn default_stop_timeout() -> u64 {
    10
}

impl Config {
    /// Load settings from an explicit file, or `runbox.toml` in `dir` if present.
    ///
    /// An explicit path must exist; the implicit file falls back to defaults.
    pub fn load(explicit: Option<&Path>, dir: &Path) -> Result<Self> {
        let config_path = match explicit {
            Some(path) => path.to_path_buf(),
            None => {
                let path = dir.join(CONFIG_FILE);
                if !path.exists() {
                    return Ok(Self::default());
                }
                path
            }
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.github.api_url, "https://api.github.com");
        assert_eq!(config.run.timeout(), Duration::from_secs(600));
        assert_eq!(config.run.config_path, ".runbox/config.yml");
        assert!(config.run.show_progress);
        assert!(config.github.user_agent.starts_with("runbox/"));
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[github]
api_url = "http://localhost:9000"
request_timeout_secs = 5

[run]
timeout_minutes = 3
show_progress = false
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.github.api_url, "http://localhost:9000");
        assert_eq!(config.github.graphql_url, "https://api.github.com/graphql");
        assert_eq!(config.github.request_timeout(), Duration::from_secs(5));
        assert_eq!(config.run.timeout_minutes, 3);
        assert_eq!(config.run.teardown_timeout(), Duration::from_secs(60));
        assert!(!config.run.show_progress);
    }

    #[test]
    fn test_huge_timeout_saturates() {
        let run = RunConfig {
            timeout_minutes: u64::MAX,
            ..RunConfig::default()
        };
        assert_eq!(run.timeout(), Duration::from_secs(u64::MAX));
    }

    #[test]
    fn test_load_missing_implicit_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let config = Config::load(None, dir.path()).unwrap();
        assert_eq!(config.run.timeout_minutes, 10);
    }

    #[test]
    fn test_load_implicit_file() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE),
            "[run]\nconfig_path = \"ci/build.yml\"\n",
        )
        .unwrap();

        let config = Config::load(None, dir.path()).unwrap();
        assert_eq!(config.run.config_path, "ci/build.yml");
    }

    #[test]
    fn test_load_explicit_missing_file_fails() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        let err = Config::load(Some(&missing), dir.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_load_invalid_toml_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "[run\n").unwrap();
        let err = Config::load(Some(&path), dir.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }
}
