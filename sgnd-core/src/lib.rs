//! sgnd - File-backed graph node storage
//!
//! Each node of a directed graph lives in its own `.sgnd` file: an identity,
//! a list of outgoing edges, an inbound reference count, and a string-keyed
//! payload. Identity and edges are read eagerly; the payload is loaded on
//! first access and written back only when it changed.
//!
//! # Features
//!
//! - One file per node, named `<folder>/<id>_data.sgnd`
//! - Three-group delimited text format using ASCII separators
//! - Chunked reads: looking up a node never reads its payload
//! - Lazy, dirty-tracked payload cache with explicit eviction
//! - Atomic file replacement on write (temp file + rename)
//!
//! # Example
//!
//! ```no_run
//! use sgnd_core::{Node, NodeOptions};
//!
//! # fn main() -> Result<(), sgnd_core::NodeError> {
//! let options = NodeOptions::default();
//!
//! // Create a node and persist it
//! let mut alice = Node::create("graph", 5, "Alice", &options)?;
//! alice.set_value("color", "blue")?;
//! alice.add_connection(7);
//! alice.write_data()?;
//!
//! // Reload: the payload is read only when first needed
//! let mut alice = Node::load("graph", 5, &options)?;
//! assert_eq!(alice.connection_ids(), &[7]);
//! assert_eq!(alice.get_value("color")?, Some("blue"));
//! # Ok(())
//! # }
//! ```
//!
//! # Design Philosophy
//!
//! The crate handles one node at a time, synchronously, on the calling
//! thread. It does not aim to provide:
//! - Cross-process arbitration (two writers to one id race, last one wins)
//! - Multi-file transactions
//! - Graph traversal or queries
//!
//! [`NodeGraph`] is the small in-process layer that keeps both ends of an
//! edge in step and holds a folder lock; anything beyond that belongs to the
//! application.

pub mod error;
pub mod graph;
pub mod node;

#[cfg(feature = "internals")]
pub mod reader;
#[cfg(not(feature = "internals"))]
pub(crate) mod reader;

#[cfg(feature = "internals")]
pub mod record;
#[cfg(not(feature = "internals"))]
pub(crate) mod record;

pub use error::{NodeError, Result};
pub use graph::{NodeGraph, ReferenceMismatch};
pub use node::{Node, NodeId};
pub use reader::{ChunkedReader, DEFAULT_CHUNK_SIZE, GroupRead};
pub use record::{GROUP_SEP, Group, Payload, RECORD_SEP, Record, UNIT_SEP};

use std::path::{Path, PathBuf};

/// Default file name suffix appended to the node id
pub const DEFAULT_FILE_SUFFIX: &str = "_data.sgnd";

/// Configuration options for nodes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeOptions {
    /// Bytes added to the read buffer per step when scanning a file
    pub chunk_size: usize,

    /// Appended to the id to form the file name
    pub file_suffix: String,
}

impl Default for NodeOptions {
    fn default() -> Self {
        Self { chunk_size: DEFAULT_CHUNK_SIZE, file_suffix: DEFAULT_FILE_SUFFIX.to_string() }
    }
}

impl NodeOptions {
    /// Returns a copy with a different read increment.
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Path of the file backing node `id` in `folder`.
    #[must_use]
    pub fn file_path(&self, folder: &Path, id: NodeId) -> PathBuf {
        folder.join(format!("{id}{}", self.file_suffix))
    }

    /// Parses a node id back out of a file name, if it is one of ours.
    #[must_use]
    pub fn parse_file_name(&self, file_name: &str) -> Option<NodeId> {
        let stem = file_name.strip_suffix(self.file_suffix.as_str())?;
        if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        // Only the canonical spelling maps back to `file_path(id)`
        if stem.len() > 1 && stem.starts_with('0') {
            return None;
        }
        stem.parse().ok()
    }

    pub(crate) fn reader(&self) -> ChunkedReader {
        ChunkedReader::new(self.chunk_size)
    }
}
