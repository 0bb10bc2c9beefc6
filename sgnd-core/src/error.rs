//! Error types for node storage.
//!
//! [`NodeError`] covers every failure a single node can report: a missing
//! backing file, a record that does not decode, an I/O failure, and a
//! reference count that would leave its valid range.

use crate::node::NodeId;
use std::path::PathBuf;
use thiserror::Error;

/// Result alias used throughout the node layer.
pub type Result<T> = std::result::Result<T, NodeError>;

/// Errors produced by node operations.
#[derive(Debug, Error)]
pub enum NodeError {
    /// No backing file exists for the requested node.
    #[error("node {id} not found at {}", path.display())]
    NotFound { id: NodeId, path: PathBuf },

    /// The record on disk does not follow the sgnd format.
    #[error("corrupt record{}: {reason}", path.as_ref().map(|p| format!(" at {}", p.display())).unwrap_or_default())]
    CorruptRecord { path: Option<PathBuf>, reason: String },

    /// Reading or writing the backing file failed.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The operation would break a node invariant.
    #[error("invariant violation on node {id}: {reason}")]
    InvariantViolation { id: NodeId, reason: String },

    /// Text handed to the node contains one of the format's separator bytes.
    #[error("{field} contains a reserved separator byte")]
    ReservedDelimiter { field: &'static str },
}

impl NodeError {
    /// Builds a [`NodeError::CorruptRecord`] with no path attached yet.
    pub(crate) fn corrupt(reason: impl Into<String>) -> Self {
        Self::CorruptRecord { path: None, reason: reason.into() }
    }

    /// Attaches `path` to a corrupt-record error that does not carry one.
    #[must_use]
    pub(crate) fn at(self, path: &std::path::Path) -> Self {
        match self {
            Self::CorruptRecord { path: None, reason } => {
                Self::CorruptRecord { path: Some(path.to_path_buf()), reason }
            }
            other => other,
        }
    }

    /// Returns true if this is a [`NodeError::NotFound`].
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns true if this is a [`NodeError::CorruptRecord`].
    #[must_use]
    pub fn is_corrupt(&self) -> bool {
        matches!(self, Self::CorruptRecord { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_corrupt_gains_path_once() {
        let err = NodeError::corrupt("bad group count").at(Path::new("/a/1_data.sgnd"));
        assert!(err.to_string().contains("/a/1_data.sgnd"));

        // A second path does not replace the first
        let err = err.at(Path::new("/b/2_data.sgnd"));
        assert!(err.to_string().contains("/a/1_data.sgnd"));
        assert!(!err.to_string().contains("/b/2_data.sgnd"));
    }

    #[test]
    fn test_corrupt_without_path() {
        let err = NodeError::corrupt("odd pair");
        assert_eq!(err.to_string(), "corrupt record: odd pair");
        assert!(err.is_corrupt());
        assert!(!err.is_not_found());
    }
}
