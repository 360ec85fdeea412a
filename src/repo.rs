//! Repository identifiers in `<owner>/<name>` form.

use std::fmt;
use std::str::FromStr;

/// A repository on the source-control host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RepoSlug {
    owner: String,
    name: String,
}

impl RepoSlug {
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for RepoSlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

impl FromStr for RepoSlug {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((owner, name)) = s.trim().split_once('/') else {
            anyhow::bail!("Invalid repository '{s}': expected <owner>/<name>");
        };

        if !is_valid_segment(owner) || !is_valid_segment(name) {
            anyhow::bail!("Invalid repository '{s}': expected <owner>/<name>");
        }

        Ok(Self {
            owner: owner.to_string(),
            name: name.to_string(),
        })
    }
}

fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}
