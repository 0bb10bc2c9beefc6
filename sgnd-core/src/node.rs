//! File-backed graph node.
//!
//! A [`Node`] is one vertex persisted as `<folder>/<id><suffix>`. Identity and
//! connections are read eagerly on load; the key/value payload stays on disk
//! until the first payload access.
//!
//! # Cache states
//!
//! ```text
//! payload: None           -> not resident, next payload access reads group 2
//! payload: Some(_)        -> resident
//! data_changed            -> resident payload differs from disk
//! record_changed          -> identity, count or connections differ from disk
//!                            (or no file has been written yet)
//! ```
//!
//! `write_data()` writes only when one of the two flags is set, so a second
//! call right after a flush never touches the disk.
//!
//! # Limitations
//!
//! Nothing arbitrates between two `Node` instances (in one process or
//! several) that share an id: the last writer wins. Edge edits that span two
//! nodes are not transactional either; see [`crate::NodeGraph`] for the
//! in-process collaborator that keeps both sides in step.

use crate::error::{NodeError, Result};
use crate::record::{self, GROUP_SEP, Group, Payload, Record};
use crate::reader::ChunkedReader;
use crate::NodeOptions;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Node identifier, unique within a folder
pub type NodeId = u64;

/// A graph vertex stored as a single `.sgnd` file.
#[derive(Debug)]
pub struct Node {
    id: NodeId,
    name: String,

    /// Inbound edges, maintained by callers
    reference_count: u32,

    /// Outgoing edges
    connection_ids: Vec<NodeId>,

    path: PathBuf,
    reader: ChunkedReader,

    /// Resident payload, `None` until first access
    payload: Option<Payload>,

    data_changed: bool,
    record_changed: bool,
}

impl Node {
    /// Loads the node `id` from `folder`.
    ///
    /// Only the identification and connections groups are read; the payload
    /// is loaded on first access.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::NotFound`] if there is no file for `id`,
    /// [`NodeError::CorruptRecord`] if either group fails to decode or the
    /// file holds a different id, and [`NodeError::Io`] on read failure.
    pub fn load<P: AsRef<Path>>(folder: P, id: NodeId, options: &NodeOptions) -> Result<Self> {
        let path = options.file_path(folder.as_ref(), id);
        let reader = options.reader();

        let ident = reader
            .read_group(&path, Group::Identification)
            .map_err(|e| not_found(e, id))?;
        let (stored_id, name) = record::decode_identification(&ident).map_err(|e| e.at(&path))?;
        if stored_id != id {
            return Err(NodeError::corrupt(format!("file holds node {stored_id}, expected {id}"))
                .at(&path));
        }

        let conns = reader.read_group(&path, Group::Connections).map_err(|e| not_found(e, id))?;
        let (reference_count, connection_ids) =
            record::decode_connections(&conns).map_err(|e| e.at(&path))?;

        tracing::debug!(
            id,
            path = %path.display(),
            connections = connection_ids.len(),
            "node loaded"
        );

        Ok(Self {
            id,
            name,
            reference_count,
            connection_ids,
            path,
            reader,
            payload: None,
            data_changed: false,
            record_changed: false,
        })
    }

    /// Creates a fresh node in memory.
    ///
    /// Nothing is written until the first `write_data()` or `dump_data()`.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::ReservedDelimiter`] if `name` contains a
    /// separator byte.
    pub fn create<P: AsRef<Path>>(
        folder: P,
        id: NodeId,
        name: impl Into<String>,
        options: &NodeOptions,
    ) -> Result<Self> {
        let name = name.into();
        if record::contains_delimiter(&name) {
            return Err(NodeError::ReservedDelimiter { field: "name" });
        }

        Ok(Self {
            id,
            name,
            reference_count: 0,
            connection_ids: Vec::new(),
            path: options.file_path(folder.as_ref(), id),
            reader: options.reader(),
            payload: Some(Payload::new()),
            data_changed: false,
            record_changed: true,
        })
    }

    /// Node id
    #[must_use]
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Node name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of nodes pointing at this one
    #[must_use]
    pub fn reference_count(&self) -> u32 {
        self.reference_count
    }

    /// Ids this node points at, in insertion order
    #[must_use]
    pub fn connection_ids(&self) -> &[NodeId] {
        &self.connection_ids
    }

    /// Path of the backing file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true if the payload is resident in memory.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.payload.is_some()
    }

    /// Returns true if the resident payload has unflushed changes.
    #[must_use]
    pub fn is_data_changed(&self) -> bool {
        self.data_changed
    }

    /// Returns true if the next `write_data()` will write.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.data_changed || self.record_changed
    }

    /// Increments the reference count.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::InvariantViolation`] if the count is already
    /// `u32::MAX`; the count is left unchanged.
    pub fn add_reference(&mut self) -> Result<()> {
        let Some(count) = self.reference_count.checked_add(1) else {
            return Err(NodeError::InvariantViolation {
                id: self.id,
                reason: "reference count would overflow".into(),
            });
        };
        self.reference_count = count;
        self.record_changed = true;
        Ok(())
    }

    /// Decrements the reference count.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::InvariantViolation`] if the count is already zero;
    /// the count is left unchanged.
    pub fn remove_reference(&mut self) -> Result<()> {
        let Some(count) = self.reference_count.checked_sub(1) else {
            return Err(NodeError::InvariantViolation {
                id: self.id,
                reason: "reference count would drop below zero".into(),
            });
        };
        self.reference_count = count;
        self.record_changed = true;
        Ok(())
    }

    /// Appends an outgoing edge to `target`.
    ///
    /// The target's reference count is not touched; the caller owns that
    /// half of the edge.
    pub fn add_connection(&mut self, target: NodeId) {
        self.connection_ids.push(target);
        self.record_changed = true;
    }

    /// Removes the first outgoing edge to `target`.
    ///
    /// Returns false if there was no such edge. Later duplicates are kept.
    pub fn remove_connection(&mut self, target: NodeId) -> bool {
        let Some(pos) = self.connection_ids.iter().position(|&c| c == target) else {
            return false;
        };
        self.connection_ids.remove(pos);
        self.record_changed = true;
        true
    }

    /// Reads the payload from disk if it is not resident.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::NotFound`] if the backing file does not exist,
    /// [`NodeError::CorruptRecord`] if the data group fails to decode, and
    /// [`NodeError::Io`] on read failure.
    pub fn load_data(&mut self) -> Result<()> {
        self.resident().map(|_| ())
    }

    /// Writes the node to disk if anything changed since the last write.
    ///
    /// All three groups are re-encoded from memory. If the payload is not
    /// resident, the data group is copied from the current file as-is. The
    /// file is replaced atomically (temp file + rename).
    ///
    /// Returns true if a write happened.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::Io`] if the temp file cannot be written or moved
    /// into place, plus the read errors of `load_data()` when the data group
    /// has to be copied.
    pub fn write_data(&mut self) -> Result<bool> {
        if !self.is_dirty() {
            return Ok(false);
        }

        let data = match &self.payload {
            Some(payload) => record::encode_data(payload),
            None => self
                .reader
                .read_group(&self.path, Group::Data)
                .map_err(|e| not_found(e, self.id))?,
        };

        let text = format!(
            "{}{GROUP_SEP}{}{GROUP_SEP}{data}",
            record::encode_identification(self.id, &self.name),
            record::encode_connections(self.reference_count, &self.connection_ids),
        );
        self.replace_file(text.as_bytes())?;

        self.data_changed = false;
        self.record_changed = false;

        tracing::debug!(id = self.id, path = %self.path.display(), bytes = text.len(), "node written");
        Ok(true)
    }

    /// Flushes pending changes and releases the resident payload.
    ///
    /// # Errors
    ///
    /// Returns the errors of `write_data()`. On error the payload stays
    /// resident.
    pub fn dump_data(&mut self) -> Result<()> {
        self.write_data()?;
        if self.payload.take().is_some() {
            tracing::trace!(id = self.id, "payload evicted");
        }
        self.data_changed = false;
        Ok(())
    }

    /// Looks up `key`, loading the payload on first use.
    ///
    /// # Errors
    ///
    /// Returns the errors of `load_data()`.
    pub fn get_value(&mut self, key: &str) -> Result<Option<&str>> {
        Ok(self.resident()?.get(key).map(String::as_str))
    }

    /// Sets `key` to `value`, loading the payload on first use.
    ///
    /// Setting a key to the value it already holds does not mark the payload
    /// as changed.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::ReservedDelimiter`] if the key or value contains
    /// a separator byte, plus the errors of `load_data()`.
    pub fn set_value(&mut self, key: impl Into<String>, value: impl Into<String>) -> Result<()> {
        let key = key.into();
        let value = value.into();
        if record::contains_delimiter(&key) {
            return Err(NodeError::ReservedDelimiter { field: "payload key" });
        }
        if record::contains_delimiter(&value) {
            return Err(NodeError::ReservedDelimiter { field: "payload value" });
        }

        let payload = self.resident()?;
        if payload.get(&key) == Some(&value) {
            return Ok(());
        }
        payload.insert(key, value);
        self.data_changed = true;
        Ok(())
    }

    /// Removes `key`, loading the payload on first use.
    ///
    /// Returns the removed value. Erasing an absent key is not an error and
    /// leaves the payload unchanged.
    ///
    /// # Errors
    ///
    /// Returns the errors of `load_data()`.
    pub fn erase_value(&mut self, key: &str) -> Result<Option<String>> {
        let removed = self.resident()?.remove(key);
        if removed.is_some() {
            self.data_changed = true;
        }
        Ok(removed)
    }

    /// Returns the full record, loading the payload on first use.
    ///
    /// # Errors
    ///
    /// Returns the errors of `load_data()`.
    pub fn to_record(&mut self) -> Result<Record> {
        let payload = self.resident()?.clone();
        Ok(Record {
            id: self.id,
            name: self.name.clone(),
            reference_count: self.reference_count,
            connection_ids: self.connection_ids.clone(),
            payload,
        })
    }

    /// Deletes the backing file. The in-memory node survives.
    ///
    /// Returns false if the file could not be removed. After a successful
    /// delete the node counts as unwritten: a later `write_data()` recreates
    /// the file from memory, with an empty payload if none was resident.
    pub fn delete_node(&mut self) -> bool {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                self.payload.get_or_insert_with(Payload::new);
                self.record_changed = true;
                tracing::debug!(id = self.id, path = %self.path.display(), "node file deleted");
                true
            }
            Err(e) => {
                tracing::warn!(
                    id = self.id,
                    path = %self.path.display(),
                    error = %e,
                    "failed to delete node file"
                );
                false
            }
        }
    }

    /// Drops the resident payload and every pending change without writing.
    pub(crate) fn discard(&mut self) {
        self.payload = None;
        self.data_changed = false;
        self.record_changed = false;
    }

    /// Returns the resident payload, reading it from disk first if needed.
    fn resident(&mut self) -> Result<&mut Payload> {
        let payload = match self.payload.take() {
            Some(payload) => payload,
            None => {
                let text = self
                    .reader
                    .read_group(&self.path, Group::Data)
                    .map_err(|e| not_found(e, self.id))?;
                let payload = record::decode_data(&text).map_err(|e| e.at(&self.path))?;
                self.data_changed = false;
                tracing::debug!(id = self.id, entries = payload.len(), "payload loaded");
                payload
            }
        };
        Ok(self.payload.insert(payload))
    }

    /// Replaces the backing file with `bytes` in one rename.
    fn replace_file(&self, bytes: &[u8]) -> Result<()> {
        let io = |source: std::io::Error| NodeError::Io { path: self.path.clone(), source };

        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };

        let mut tmp = NamedTempFile::new_in(dir).map_err(io)?;
        tmp.write_all(bytes).map_err(io)?;
        tmp.as_file().sync_all().map_err(io)?;
        tmp.persist(&self.path).map_err(|e| io(e.error))?;
        Ok(())
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        if self.is_dirty() {
            tracing::warn!(id = self.id, "node dropped with unwritten changes");
        }
    }
}

/// Turns a missing-file I/O error into [`NodeError::NotFound`].
fn not_found(err: NodeError, id: NodeId) -> NodeError {
    match err {
        NodeError::Io { path, source } if source.kind() == ErrorKind::NotFound => {
            NodeError::NotFound { id, path }
        }
        other => other,
    }
}
