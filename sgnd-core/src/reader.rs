//! Incremental group reader.
//!
//! Identification and connection lookups only need the first two groups,
//! while the data group can be arbitrarily large. [`ChunkedReader`] pulls the
//! file in `chunk_size` increments and stops as soon as the requested group
//! is terminated, so the bytes read for groups 0 and 1 stay proportional to
//! those groups rather than to the whole file.

use crate::error::{NodeError, Result};
use crate::record::{GROUP_COUNT, GROUP_SEP, Group};
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;

/// Default read increment in bytes
pub const DEFAULT_CHUNK_SIZE: usize = 100;

/// Group separator as a raw byte (ASCII, so one byte in UTF-8)
const GROUP_SEP_BYTE: u8 = GROUP_SEP as u8;

/// Raw text of one group plus the number of bytes consumed to find it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupRead {
    /// Group text, without separators
    pub text: String,
    /// Bytes pulled from the source before the scan stopped
    pub bytes_read: usize,
}

/// Reads single groups out of a record without loading the whole file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkedReader {
    chunk_size: usize,
}

impl Default for ChunkedReader {
    fn default() -> Self {
        Self { chunk_size: DEFAULT_CHUNK_SIZE }
    }
}

impl ChunkedReader {
    /// Creates a reader that grows its buffer by `chunk_size` bytes per read.
    ///
    /// A chunk size of zero is treated as one.
    #[must_use]
    pub fn new(chunk_size: usize) -> Self {
        Self { chunk_size: chunk_size.max(1) }
    }

    /// Returns the read increment.
    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Reads one group from the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::Io`] if the file cannot be opened or read (a
    /// missing file keeps `ErrorKind::NotFound` as its source), and
    /// [`NodeError::CorruptRecord`] if the file does not hold three groups or
    /// the group is not UTF-8.
    pub fn read_group(&self, path: &Path, group: Group) -> Result<String> {
        let mut file = open(path)?;
        let read = self.scan_group(&mut file, group).map_err(|e| attach(e, path))?;

        tracing::trace!(
            path = %path.display(),
            group = group.index(),
            bytes = read.bytes_read,
            "read group"
        );

        Ok(read.text)
    }

    /// Reads the whole file and splits it into its three groups.
    ///
    /// # Errors
    ///
    /// Same as [`ChunkedReader::read_group`].
    pub fn read_groups(&self, path: &Path) -> Result<[String; GROUP_COUNT]> {
        let mut file = open(path)?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)
            .map_err(|source| NodeError::Io { path: path.to_path_buf(), source })?;

        let text = String::from_utf8(buf)
            .map_err(|e| NodeError::corrupt(format!("record is not UTF-8: {e}")).at(path))?;

        let groups: Vec<String> = text.split(GROUP_SEP).map(str::to_string).collect();
        let found = groups.len();
        <[String; GROUP_COUNT]>::try_from(groups).map_err(|_| {
            NodeError::corrupt(format!("expected {GROUP_COUNT} groups, found {found}")).at(path)
        })
    }

    /// Scans `source` until `group` is complete and returns its text.
    ///
    /// The buffer grows by `chunk_size` until it holds `group.index() + 1`
    /// separators or the source is exhausted.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::CorruptRecord`] if the source ends before the
    /// group is terminated (for groups 0 and 1), holds more than three groups
    /// once fully read, or the group is not UTF-8. Read failures surface as
    /// [`NodeError::Io`] with an empty path.
    pub fn scan_group<R: Read>(&self, source: &mut R, group: Group) -> Result<GroupRead> {
        let wanted = group.index();
        let mut buf: Vec<u8> = Vec::with_capacity(self.chunk_size);
        let mut seps: Vec<usize> = Vec::with_capacity(GROUP_COUNT);
        let mut eof = false;

        while seps.len() <= wanted && !eof {
            let start = buf.len();
            buf.resize(start + self.chunk_size, 0);
            let (_, tail) = buf.split_at_mut(start);

            let n = loop {
                match source.read(tail) {
                    Ok(n) => break n,
                    Err(e) if e.kind() == ErrorKind::Interrupted => {}
                    Err(source) => {
                        return Err(NodeError::Io { path: Default::default(), source });
                    }
                }
            };
            buf.truncate(start + n);
            eof = n == 0;

            seps.extend(
                buf.iter()
                    .enumerate()
                    .skip(start)
                    .filter(|&(_, &b)| b == GROUP_SEP_BYTE)
                    .map(|(i, _)| i),
            );
        }

        let begin = match wanted {
            0 => 0,
            n => match seps.get(n - 1) {
                Some(&pos) => pos + 1,
                None => {
                    return Err(NodeError::corrupt(format!(
                        "group {wanted} missing: found {} groups",
                        seps.len() + 1
                    )));
                }
            },
        };

        let end = match seps.get(wanted) {
            Some(&pos) if wanted + 1 < GROUP_COUNT => pos,
            Some(_) => {
                return Err(NodeError::corrupt(format!(
                    "expected {GROUP_COUNT} groups, found more"
                )));
            }
            None if wanted + 1 < GROUP_COUNT => {
                return Err(NodeError::corrupt(format!(
                    "group {wanted} is not terminated: found {} groups",
                    seps.len() + 1
                )));
            }
            None => buf.len(),
        };

        let bytes_read = buf.len();
        buf.truncate(end);
        buf.drain(..begin);

        let text = String::from_utf8(buf)
            .map_err(|e| NodeError::corrupt(format!("group {wanted} is not UTF-8: {e}")))?;

        Ok(GroupRead { text, bytes_read })
    }
}

fn open(path: &Path) -> Result<File> {
    File::open(path).map_err(|source| NodeError::Io { path: path.to_path_buf(), source })
}

/// Fills in the path on errors raised by `scan_group`.
fn attach(err: NodeError, path: &Path) -> NodeError {
    match err {
        NodeError::Io { source, .. } => NodeError::Io { path: path.to_path_buf(), source },
        other => other.at(path),
    }
}
