//! Multi-node collaborator over one folder.
//!
//! [`NodeGraph`] keeps both ends of every edge in step and holds an
//! exclusive lock on the folder while it is open.

use crate::error::NodeError;
use crate::node::{Node, NodeId};
use crate::NodeOptions;
use anyhow::{Context, Result};
use fs2::FileExt;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

/// Name of the advisory lock file inside a graph folder
pub const LOCK_FILE: &str = ".sgnd.lock";

/// A node whose stored reference count disagrees with the folder's edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferenceMismatch {
    /// Node with the wrong count
    pub id: NodeId,
    /// Count stored on the node
    pub recorded: u32,
    /// Number of distinct other nodes pointing at it
    pub actual: u32,
}

/// Set of nodes sharing one folder.
///
/// The graph resolves ids to resident [`Node`]s and performs both halves of
/// an edge edit (`add_connection` on the source, `add_reference` on the
/// target) in one call, so the reference count invariant holds whenever the
/// graph is flushed.
///
/// Opening a graph takes an exclusive advisory lock on the folder; a second
/// `NodeGraph` on the same folder fails until the first is dropped. Nodes
/// opened directly with [`Node::load`] bypass the lock.
///
/// Like [`Node`], dropping the graph does not flush.
#[derive(Debug)]
pub struct NodeGraph {
    folder: PathBuf,
    options: NodeOptions,

    /// Nodes loaded or created through this graph
    nodes: HashMap<NodeId, Node>,

    /// Lock file handle (owns the folder lock)
    lock: File,
}

impl NodeGraph {
    /// Opens the graph stored in `folder`, creating the folder if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The folder or lock file cannot be created
    /// - The folder is already open by another `NodeGraph`
    pub fn open<P: AsRef<Path>>(folder: P, options: NodeOptions) -> Result<Self> {
        let folder = folder.as_ref().to_path_buf();

        fs::create_dir_all(&folder)
            .with_context(|| format!("Failed to create graph folder: {}", folder.display()))?;

        let lock_path = folder.join(LOCK_FILE);
        let lock = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .with_context(|| format!("Failed to open lock file: {}", lock_path.display()))?;

        lock.try_lock_exclusive().context("Graph folder is already open by another process")?;

        tracing::debug!(folder = %folder.display(), "graph opened");

        Ok(Self { folder, options, nodes: HashMap::new(), lock })
    }

    /// Folder holding the node files
    #[must_use]
    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// Options every node in this graph is opened with
    #[must_use]
    pub fn options(&self) -> &NodeOptions {
        &self.options
    }

    /// Number of resident nodes
    #[must_use]
    pub fn resident_len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if `id` is resident or has a file in the folder.
    #[must_use]
    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id) || self.options.file_path(&self.folder, id).exists()
    }

    /// Creates a new node and makes it resident.
    ///
    /// # Errors
    ///
    /// Returns an error if the id is already in use or the name is invalid.
    pub fn create_node(&mut self, id: NodeId, name: &str) -> Result<&mut Node> {
        if self.contains(id) {
            anyhow::bail!("Node {id} already exists in {}", self.folder.display());
        }

        let node = Node::create(&self.folder, id, name, &self.options)?;
        Ok(self.nodes.entry(id).or_insert(node))
    }

    /// Returns the node `id`, loading it on first use.
    ///
    /// # Errors
    ///
    /// Returns the [`NodeError`] from loading (downcastable).
    pub fn node(&mut self, id: NodeId) -> Result<&mut Node> {
        self.ensure_resident(id)?;
        self.nodes.get_mut(&id).with_context(|| format!("Node {id} is not resident"))
    }

    /// Adds the edge `from -> to` and counts it on `to`.
    ///
    /// Returns false if the edge already existed. Both nodes are loaded
    /// before either is modified.
    ///
    /// # Errors
    ///
    /// Returns an error if `from == to`, either node cannot be loaded, or
    /// `to` is already at the maximum reference count (neither node changes).
    pub fn connect(&mut self, from: NodeId, to: NodeId) -> Result<bool> {
        if from == to {
            anyhow::bail!("Self-edge on node {from} is not allowed");
        }

        self.ensure_resident(from)?;
        self.ensure_resident(to)?;

        if self.resident_mut(from)?.connection_ids().contains(&to) {
            return Ok(false);
        }
        self.resident_mut(to)?
            .add_reference()
            .with_context(|| format!("Failed to add edge {from} -> {to}"))?;
        self.resident_mut(from)?.add_connection(to);

        tracing::debug!(from, to, "edge added");
        Ok(true)
    }

    /// Removes one `from -> to` edge.
    ///
    /// `to` is uncounted only when the last duplicate of the edge goes, since
    /// references count distinct source nodes. Returns false if there was no
    /// such edge.
    ///
    /// # Errors
    ///
    /// Returns an error if either node cannot be loaded, or if `to` already
    /// has a zero reference count (the folder was inconsistent; `from` is
    /// left unchanged in that case).
    pub fn disconnect(&mut self, from: NodeId, to: NodeId) -> Result<bool> {
        self.ensure_resident(from)?;
        self.ensure_resident(to)?;

        let edges = self.resident_mut(from)?.connection_ids().iter().filter(|&&c| c == to).count();
        if edges == 0 {
            return Ok(false);
        }

        if edges == 1 {
            self.resident_mut(to)?
                .remove_reference()
                .with_context(|| format!("Failed to remove edge {from} -> {to}"))?;
        }
        self.resident_mut(from)?.remove_connection(to);

        tracing::debug!(from, to, remaining = edges - 1, "edge removed");
        Ok(true)
    }

    /// Deletes node `id` and drops its outgoing edges.
    ///
    /// Each target of `id` loses one reference; their changes are written by
    /// the next `flush()`.
    ///
    /// # Errors
    ///
    /// Returns an error if other nodes still point at `id`, if any node
    /// involved cannot be loaded, or if the file cannot be removed.
    pub fn delete_node(&mut self, id: NodeId) -> Result<()> {
        self.ensure_resident(id)?;

        let node = self.resident_mut(id)?;
        let refs = node.reference_count();
        if refs > 0 {
            return Err(NodeError::InvariantViolation {
                id,
                reason: format!("{refs} nodes still point at it"),
            }
            .into());
        }

        let targets: HashSet<NodeId> =
            node.connection_ids().iter().copied().filter(|&t| t != id).collect();
        for &target in &targets {
            self.ensure_resident(target)?;
            if self.resident_mut(target)?.reference_count() == 0 {
                anyhow::bail!("Node {target} has no reference for edge {id} -> {target}");
            }
        }
        let node = self.resident_mut(id)?;
        if node.path().exists() && !node.delete_node() {
            anyhow::bail!("Failed to delete file for node {id}: {}", node.path().display());
        }
        node.discard();
        self.nodes.remove(&id);

        for &target in &targets {
            self.resident_mut(target)?.remove_reference()?;
        }

        tracing::debug!(id, "node deleted");
        Ok(())
    }

    /// Writes every resident node that has changes.
    ///
    /// Returns the number of nodes written.
    ///
    /// # Errors
    ///
    /// Stops at the first node that fails to write.
    pub fn flush(&mut self) -> Result<usize> {
        let mut written = 0;
        for (id, node) in &mut self.nodes {
            if node.write_data().with_context(|| format!("Failed to write node {id}"))? {
                written += 1;
            }
        }
        tracing::debug!(written, "graph flushed");
        Ok(written)
    }

    /// Flushes node `id` and releases its payload, keeping it resident.
    ///
    /// # Errors
    ///
    /// Returns an error if the node is not resident or fails to write.
    pub fn evict(&mut self, id: NodeId) -> Result<()> {
        self.resident_mut(id)?.dump_data().with_context(|| format!("Failed to evict node {id}"))
    }

    /// Flushes node `id` and removes it from the resident set.
    ///
    /// Releasing a node that is not resident is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the node fails to write; it stays resident.
    pub fn release(&mut self, id: NodeId) -> Result<()> {
        let Some(node) = self.nodes.get_mut(&id) else {
            return Ok(());
        };
        node.dump_data().with_context(|| format!("Failed to release node {id}"))?;
        self.nodes.remove(&id);
        Ok(())
    }

    /// Ids of every node in the folder, plus unwritten resident ones.
    ///
    /// # Errors
    ///
    /// Returns an error if the folder cannot be listed.
    pub fn ids(&self) -> Result<Vec<NodeId>> {
        let mut ids: HashSet<NodeId> = self.nodes.keys().copied().collect();

        let entries = fs::read_dir(&self.folder)
            .with_context(|| format!("Failed to list graph folder: {}", self.folder.display()))?;
        for entry in entries {
            let entry = entry?;
            if let Some(id) = entry.file_name().to_str().and_then(|n| self.options.parse_file_name(n))
            {
                ids.insert(id);
            }
        }

        let mut ids: Vec<NodeId> = ids.into_iter().collect();
        ids.sort_unstable();
        Ok(ids)
    }

    /// Compares every node's reference count with the edges in the folder.
    ///
    /// Resident nodes are read from memory; the rest are loaded without
    /// their payload and not kept. Duplicate edges from one source count
    /// once.
    ///
    /// # Errors
    ///
    /// Returns an error if the folder cannot be listed or a node fails to
    /// load.
    pub fn audit(&self) -> Result<Vec<ReferenceMismatch>> {
        let mut recorded: BTreeMap<NodeId, u32> = BTreeMap::new();
        let mut actual: HashMap<NodeId, u32> = HashMap::new();

        for id in self.ids()? {
            let loaded;
            let node = match self.nodes.get(&id) {
                Some(node) => node,
                None => {
                    loaded = Node::load(&self.folder, id, &self.options)?;
                    &loaded
                }
            };

            recorded.insert(id, node.reference_count());

            let targets: HashSet<NodeId> =
                node.connection_ids().iter().copied().filter(|&t| t != id).collect();
            for target in targets {
                *actual.entry(target).or_default() += 1;
            }
        }

        let mismatches: Vec<ReferenceMismatch> = recorded
            .into_iter()
            .filter_map(|(id, recorded)| {
                let actual = actual.get(&id).copied().unwrap_or(0);
                (recorded != actual).then_some(ReferenceMismatch { id, recorded, actual })
            })
            .collect();

        if !mismatches.is_empty() {
            tracing::warn!(count = mismatches.len(), "reference count mismatches found");
        }
        Ok(mismatches)
    }

    /// Rewrites the reference counts reported by [`NodeGraph::audit`].
    ///
    /// Repaired nodes become resident; call `flush()` to persist them.
    /// Returns the mismatches that were fixed.
    ///
    /// # Errors
    ///
    /// Returns the errors of `audit()` and of loading the affected nodes.
    pub fn repair(&mut self) -> Result<Vec<ReferenceMismatch>> {
        let mismatches = self.audit()?;
        for m in &mismatches {
            let node = self.node(m.id)?;
            while node.reference_count() < m.actual {
                node.add_reference()?;
            }
            while node.reference_count() > m.actual {
                node.remove_reference()?;
            }
        }
        Ok(mismatches)
    }

    fn ensure_resident(&mut self, id: NodeId) -> Result<()> {
        if !self.nodes.contains_key(&id) {
            let node = Node::load(&self.folder, id, &self.options)?;
            self.nodes.insert(id, node);
        }
        Ok(())
    }

    fn resident_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes.get_mut(&id).with_context(|| format!("Node {id} is not resident"))
    }
}

impl Drop for NodeGraph {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.lock);
    }
}
