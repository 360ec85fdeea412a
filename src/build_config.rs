//! The build configuration stored inside the target repository.
//!
//! ```yaml
//! runtime_image: rust:1.80
//! commands:
//!   - cargo build
//!   - [sh, -c, "cargo test --all && echo done"]
//! ```
//!
//! A command given as a string is split on whitespace only; quoting is not
//! honored, so `sh -c "a b"` becomes four arguments. Commands that need
//! arguments containing spaces must be written as a list.

use serde::Deserialize;
use std::fmt;

/// Errors raised while decoding a build configuration.
#[derive(Debug, thiserror::Error)]
pub(crate) enum BuildConfigError {
    /// The document is not valid YAML or does not have the expected shape.
    #[error("Malformed build configuration: {0}")]
    Malformed(#[from] serde_yaml::Error),

    /// No runtime image was declared.
    #[error("Build configuration does not declare a runtime_image")]
    MissingRuntimeImage,
}

/// Parsed build configuration. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub(crate) struct BuildConfig {
    /// Image the sandbox is created from.
    #[serde(alias = "runner_image")]
    pub runtime_image: String,

    /// Commands to run, in order.
    #[serde(default)]
    pub commands: Vec<CommandSpec>,
}

/// A single configured command.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub(crate) enum CommandSpec {
    /// A command line split on whitespace.
    Line(String),
    /// A pre-tokenized argument vector, used verbatim.
    Argv(Vec<String>),
}

impl CommandSpec {
    /// Returns the argument vector handed to the sandbox.
    pub fn argv(&self) -> Vec<String> {
        match self {
            Self::Line(line) => line.split_whitespace().map(str::to_string).collect(),
            Self::Argv(args) => args.clone(),
        }
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Line(line) => write!(f, "{}", line.trim()),
            Self::Argv(args) => write!(f, "{}", args.join(" ")),
        }
    }
}

impl From<&str> for CommandSpec {
    fn from(line: &str) -> Self {
        Self::Line(line.to_string())
    }
}

impl BuildConfig {
    /// Decode a configuration document.
    pub fn parse(document: &str) -> Result<Self, BuildConfigError> {
        let config: Self = serde_yaml::from_str(document)?;
        config.validate()?;
        Ok(config)
    }

    /// A runtime image is required before provisioning can proceed.
    pub fn validate(&self) -> Result<(), BuildConfigError> {
        if self.runtime_image.trim().is_empty() {
            return Err(BuildConfigError::MissingRuntimeImage);
        }
        Ok(())
    }
}
