//! Delimited text codec for `.sgnd` node files.
//!
//! # Layout
//!
//! A record is exactly three groups joined by [`GROUP_SEP`]:
//!
//! ```text
//! Group 0 (identification)  <id> RS <name>
//! Group 1 (connections)     <reference_count> RS <conn> US <conn> US ...
//! Group 2 (data)            <key> US <value> RS <key> US <value> RS ...
//! ```
//!
//! An empty connection list encodes as an empty field; an empty payload
//! encodes as an empty group. The separators are the ASCII control bytes
//! 0x1D-0x1F and must never appear inside names, keys, or values.

use crate::error::{NodeError, Result};
use crate::node::NodeId;
use std::collections::BTreeMap;
use std::fmt::Write as _;

/// ASCII group separator, between the three groups
pub const GROUP_SEP: char = '\u{1d}';

/// ASCII record separator, between fields and between payload pairs
pub const RECORD_SEP: char = '\u{1e}';

/// ASCII unit separator, between connection ids and inside a payload pair
pub const UNIT_SEP: char = '\u{1f}';

/// Number of groups in every record
pub const GROUP_COUNT: usize = 3;

/// Key/value payload carried by a node
pub type Payload = BTreeMap<String, String>;

/// Group index within a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Group {
    /// `<id> RS <name>`
    Identification = 0,
    /// `<reference_count> RS <connection ids>`
    Connections = 1,
    /// `<key> US <value>` pairs
    Data = 2,
}

impl Group {
    /// Position of the group in the file
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Fully decoded node record.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Record {
    /// Node id
    pub id: NodeId,
    /// Human-readable label
    pub name: String,
    /// Inbound edge count
    pub reference_count: u32,
    /// Outgoing edges, in insertion order
    pub connection_ids: Vec<NodeId>,
    /// Key/value data
    pub payload: Payload,
}

impl Record {
    /// Encodes the record into its on-disk text form.
    #[must_use]
    pub fn encode(&self) -> String {
        let mut out = String::new();
        out.push_str(&encode_identification(self.id, &self.name));
        out.push(GROUP_SEP);
        out.push_str(&encode_connections(self.reference_count, &self.connection_ids));
        out.push(GROUP_SEP);
        out.push_str(&encode_data(&self.payload));
        out
    }

    /// Decodes a complete record.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::CorruptRecord`] if the text does not have exactly
    /// three groups or any group fails to decode.
    pub fn decode(text: &str) -> Result<Self> {
        let groups: Vec<&str> = text.split(GROUP_SEP).collect();
        let [ident, conns, data] = groups.as_slice() else {
            return Err(NodeError::corrupt(format!(
                "expected {GROUP_COUNT} groups, found {}",
                groups.len()
            )));
        };

        let (id, name) = decode_identification(ident)?;
        let (reference_count, connection_ids) = decode_connections(conns)?;
        let payload = decode_data(data)?;

        Ok(Self { id, name, reference_count, connection_ids, payload })
    }
}

/// Encodes group 0.
#[must_use]
pub fn encode_identification(id: NodeId, name: &str) -> String {
    format!("{id}{RECORD_SEP}{name}")
}

/// Encodes group 1.
#[must_use]
pub fn encode_connections(reference_count: u32, connection_ids: &[NodeId]) -> String {
    let mut out = format!("{reference_count}{RECORD_SEP}");
    for (i, conn) in connection_ids.iter().enumerate() {
        if i > 0 {
            out.push(UNIT_SEP);
        }
        // Writing into a String cannot fail
        let _ = write!(out, "{conn}");
    }
    out
}

/// Encodes group 2.
#[must_use]
pub fn encode_data(payload: &Payload) -> String {
    let mut out = String::new();
    for (i, (key, value)) in payload.iter().enumerate() {
        if i > 0 {
            out.push(RECORD_SEP);
        }
        out.push_str(key);
        out.push(UNIT_SEP);
        out.push_str(value);
    }
    out
}

/// Decodes group 0 into `(id, name)`.
///
/// # Errors
///
/// Returns [`NodeError::CorruptRecord`] on a field count other than two or a
/// non-integer id.
pub fn decode_identification(group: &str) -> Result<(NodeId, String)> {
    let fields: Vec<&str> = group.split(RECORD_SEP).collect();
    let [id, name] = fields.as_slice() else {
        return Err(NodeError::corrupt(format!(
            "identification group has {} fields, expected 2",
            fields.len()
        )));
    };

    let id = id
        .parse::<NodeId>()
        .map_err(|e| NodeError::corrupt(format!("invalid node id {id:?}: {e}")))?;

    Ok((id, (*name).to_string()))
}

/// Decodes group 1 into `(reference_count, connection_ids)`.
///
/// # Errors
///
/// Returns [`NodeError::CorruptRecord`] on a field count other than two, a
/// non-integer reference count, or a non-integer connection id.
pub fn decode_connections(group: &str) -> Result<(u32, Vec<NodeId>)> {
    let fields: Vec<&str> = group.split(RECORD_SEP).collect();
    let [count, conns] = fields.as_slice() else {
        return Err(NodeError::corrupt(format!(
            "connections group has {} fields, expected 2",
            fields.len()
        )));
    };

    let reference_count = count
        .parse::<u32>()
        .map_err(|e| NodeError::corrupt(format!("invalid reference count {count:?}: {e}")))?;

    if conns.is_empty() {
        return Ok((reference_count, Vec::new()));
    }

    let connection_ids = conns
        .split(UNIT_SEP)
        .map(|c| {
            c.parse::<NodeId>()
                .map_err(|e| NodeError::corrupt(format!("invalid connection id {c:?}: {e}")))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok((reference_count, connection_ids))
}

/// Decodes group 2 into a payload map.
///
/// # Errors
///
/// Returns [`NodeError::CorruptRecord`] if any pair does not split into
/// exactly one key and one value.
pub fn decode_data(group: &str) -> Result<Payload> {
    let mut payload = Payload::new();
    if group.is_empty() {
        return Ok(payload);
    }

    for (i, pair) in group.split(RECORD_SEP).enumerate() {
        let Some((key, value)) = pair.split_once(UNIT_SEP) else {
            return Err(NodeError::corrupt(format!("data pair {i} has no value")));
        };
        if value.contains(UNIT_SEP) {
            return Err(NodeError::corrupt(format!("data pair {i} has more than two units")));
        }
        payload.insert(key.to_string(), value.to_string());
    }

    Ok(payload)
}

/// Returns true if `text` contains any of the three separators.
#[must_use]
pub fn contains_delimiter(text: &str) -> bool {
    text.contains([GROUP_SEP, RECORD_SEP, UNIT_SEP])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Record {
        let mut payload = Payload::new();
        payload.insert("color".into(), "blue".into());
        payload.insert("shape".into(), "round, mostly".into());
        Record {
            id: 42,
            name: "Alice Smith".into(),
            reference_count: 3,
            connection_ids: vec![7, 1, 7],
            payload,
        }
    }

    #[test]
    fn test_encoded_layout() {
        let encoded = sample().encode();
        assert_eq!(
            encoded,
            "42\u{1e}Alice Smith\u{1d}3\u{1e}7\u{1f}1\u{1f}7\u{1d}\
             color\u{1f}blue\u{1e}shape\u{1f}round, mostly"
        );
    }

    #[test]
    fn test_roundtrip() {
        let record = sample();
        assert_eq!(Record::decode(&record.encode()).unwrap(), record);
    }

    #[test]
    fn test_roundtrip_empty_everything() {
        let record = Record { id: 0, name: String::new(), ..Record::default() };
        let encoded = record.encode();
        assert_eq!(encoded, "0\u{1e}\u{1d}0\u{1e}\u{1d}");
        assert_eq!(Record::decode(&encoded).unwrap(), record);
    }

    #[test]
    fn test_empty_key_and_value_is_one_pair() {
        let mut payload = Payload::new();
        payload.insert(String::new(), String::new());
        assert_eq!(encode_data(&payload), "\u{1f}");
        assert_eq!(decode_data("\u{1f}").unwrap(), payload);
    }

    #[test]
    fn test_wrong_group_count() {
        let err = Record::decode("1\u{1e}a\u{1d}0\u{1e}").unwrap_err();
        assert!(err.to_string().contains("expected 3 groups, found 2"));

        let err = Record::decode("1\u{1e}a\u{1d}0\u{1e}\u{1d}\u{1d}").unwrap_err();
        assert!(err.to_string().contains("found 4"));
    }

    #[test]
    fn test_non_integer_id() {
        assert!(decode_identification("abc\u{1e}name").unwrap_err().is_corrupt());
        assert!(decode_identification("-1\u{1e}name").is_err());
    }

    #[test]
    fn test_identification_field_count() {
        assert!(decode_identification("12").is_err());
        assert!(decode_identification("12\u{1e}a\u{1e}b").is_err());
    }

    #[test]
    fn test_non_integer_reference_count() {
        let err = decode_connections("x\u{1e}1").unwrap_err();
        assert!(err.to_string().contains("reference count"));
    }

    #[test]
    fn test_bad_connection_id() {
        let err = decode_connections("0\u{1e}1\u{1f}\u{1f}2").unwrap_err();
        assert!(err.to_string().contains("connection id"));
    }

    #[test]
    fn test_odd_data_pairs() {
        assert!(decode_data("key_without_value").is_err());
        assert!(decode_data("a\u{1f}1\u{1e}b").is_err());
        assert!(decode_data("a\u{1f}1\u{1f}2").is_err());
    }

    #[test]
    fn test_contains_delimiter() {
        assert!(!contains_delimiter("plain text, with punctuation: ok"));
        assert!(contains_delimiter("a\u{1d}b"));
        assert!(contains_delimiter("a\u{1e}b"));
        assert!(contains_delimiter("\u{1f}"));
    }

    #[test]
    fn test_group_index() {
        assert_eq!(Group::Identification.index(), 0);
        assert_eq!(Group::Connections.index(), 1);
        assert_eq!(Group::Data.index(), 2);
    }
}
