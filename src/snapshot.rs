//! Repository snapshots fetched from the source-control host.

use bytes::Bytes;
use futures_util::stream::BoxStream;
use std::fmt;

/// A streaming body of archive bytes.
pub(crate) type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;

/// The snapshot content has already been handed out once.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Snapshot {root_name} has already been consumed")]
pub(crate) struct SnapshotConsumed {
    pub root_name: String,
}

/// An archived copy of a repository at some ref.
///
/// The content stream can be taken exactly once. The root name is the
/// directory the archive unpacks into, e.g. `/octo-repo-3f2a9c1`.
pub(crate) struct Snapshot {
    root_name: String,
    content: Option<ByteStream>,
}

impl Snapshot {
    pub fn new(root_name: impl Into<String>, content: ByteStream) -> Self {
        Self {
            root_name: root_name.into(),
            content: Some(content),
        }
    }

    pub fn root_name(&self) -> &str {
        &self.root_name
    }

    pub fn is_consumed(&self) -> bool {
        self.content.is_none()
    }

    /// Hands the content stream to its single consumer.
    pub fn take_content(&mut self) -> Result<ByteStream, SnapshotConsumed> {
        self.content.take().ok_or_else(|| SnapshotConsumed {
            root_name: self.root_name.clone(),
        })
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("root_name", &self.root_name)
            .field("consumed", &self.is_consumed())
            .finish()
    }
}

/// Derives the sandbox root directory from an archive file name.
///
/// `octo-repo-3f2a9c1.tar.gz` becomes `/octo-repo-3f2a9c1`.
pub(crate) fn root_name_from_filename(filename: &str, suffix: &str) -> String {
    let name = filename.strip_suffix(suffix).unwrap_or(filename);
    format!("/{}", name.trim_start_matches('/'))
}
