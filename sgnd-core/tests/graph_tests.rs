//! Integration tests for the NodeGraph collaborator

use sgnd_core::{Node, NodeError, NodeGraph, NodeOptions, ReferenceMismatch};
use std::fs;
use tempfile::TempDir;

fn open(dir: &TempDir) -> NodeGraph {
    NodeGraph::open(dir.path(), NodeOptions::default()).unwrap()
}

#[test]
fn test_connect_updates_both_sides() {
    let dir = TempDir::new().unwrap();
    let mut graph = open(&dir);

    graph.create_node(1, "A").unwrap();
    graph.create_node(2, "B").unwrap();

    assert!(graph.connect(1, 2).unwrap());
    assert_eq!(graph.node(1).unwrap().connection_ids(), &[2]);
    assert_eq!(graph.node(2).unwrap().reference_count(), 1);

    // Second connect is a no-op
    assert!(!graph.connect(1, 2).unwrap());
    assert_eq!(graph.node(2).unwrap().reference_count(), 1);

    assert_eq!(graph.flush().unwrap(), 2);
    assert_eq!(graph.flush().unwrap(), 0);
}

#[test]
fn test_edges_survive_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let mut graph = open(&dir);
        graph.create_node(1, "A").unwrap();
        graph.create_node(2, "B").unwrap();
        graph.create_node(3, "C").unwrap();
        graph.connect(1, 3).unwrap();
        graph.connect(2, 3).unwrap();
        graph.flush().unwrap();
    }

    let mut graph = open(&dir);
    assert_eq!(graph.resident_len(), 0);
    assert_eq!(graph.node(3).unwrap().reference_count(), 2);
    assert_eq!(graph.ids().unwrap(), vec![1, 2, 3]);
    assert!(graph.audit().unwrap().is_empty());
}

#[test]
fn test_disconnect() {
    let dir = TempDir::new().unwrap();
    let mut graph = open(&dir);
    graph.create_node(1, "A").unwrap();
    graph.create_node(2, "B").unwrap();
    graph.connect(1, 2).unwrap();

    assert!(graph.disconnect(1, 2).unwrap());
    assert!(graph.node(1).unwrap().connection_ids().is_empty());
    assert_eq!(graph.node(2).unwrap().reference_count(), 0);

    assert!(!graph.disconnect(1, 2).unwrap());
}

#[test]
fn test_self_edge_rejected() {
    let dir = TempDir::new().unwrap();
    let mut graph = open(&dir);
    graph.create_node(1, "A").unwrap();

    let err = graph.connect(1, 1).unwrap_err();
    assert!(err.to_string().contains("Self-edge"));
}

#[test]
fn test_connect_to_missing_node_changes_nothing() {
    let dir = TempDir::new().unwrap();
    let mut graph = open(&dir);
    graph.create_node(1, "A").unwrap();

    let err = graph.connect(1, 99).unwrap_err();
    let node_err = err.downcast_ref::<NodeError>().unwrap();
    assert!(node_err.is_not_found());
    assert!(graph.node(1).unwrap().connection_ids().is_empty());
}

#[test]
fn test_create_existing_id_fails() {
    let dir = TempDir::new().unwrap();
    let mut graph = open(&dir);
    graph.create_node(1, "A").unwrap();
    assert!(graph.create_node(1, "again").is_err());

    graph.release(1).unwrap();
    assert_eq!(graph.resident_len(), 0);
    assert!(graph.contains(1));
    assert!(graph.create_node(1, "again").is_err());
}

#[test]
fn test_delete_node_with_inbound_edges_is_refused() {
    let dir = TempDir::new().unwrap();
    let mut graph = open(&dir);
    graph.create_node(1, "A").unwrap();
    graph.create_node(2, "B").unwrap();
    graph.connect(1, 2).unwrap();

    let err = graph.delete_node(2).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<NodeError>(),
        Some(NodeError::InvariantViolation { id: 2, .. })
    ));
}

#[test]
fn test_delete_node_releases_targets() {
    let dir = TempDir::new().unwrap();
    let mut graph = open(&dir);
    graph.create_node(1, "A").unwrap();
    graph.create_node(2, "B").unwrap();
    graph.connect(1, 2).unwrap();
    graph.flush().unwrap();

    graph.delete_node(1).unwrap();
    assert!(!graph.contains(1));
    assert_eq!(graph.node(2).unwrap().reference_count(), 0);

    graph.flush().unwrap();
    assert!(graph.audit().unwrap().is_empty());
    assert_eq!(graph.ids().unwrap(), vec![2]);
}

#[test]
fn test_delete_unwritten_node() {
    let dir = TempDir::new().unwrap();
    let mut graph = open(&dir);
    graph.create_node(5, "never written").unwrap();

    graph.delete_node(5).unwrap();
    assert!(!graph.contains(5));
    assert_eq!(graph.flush().unwrap(), 0);
}

#[test]
fn test_evict_keeps_node_resident() {
    let dir = TempDir::new().unwrap();
    let mut graph = open(&dir);
    graph.create_node(1, "A").unwrap().set_value("k", "v").unwrap();

    graph.evict(1).unwrap();
    assert_eq!(graph.resident_len(), 1);
    let node = graph.node(1).unwrap();
    assert!(!node.is_loaded());
    assert_eq!(node.get_value("k").unwrap(), Some("v"));
}

#[test]
fn test_audit_and_repair() {
    let dir = TempDir::new().unwrap();
    let options = NodeOptions::default();

    // Build an inconsistent folder by hand: 1 -> 3, 2 -> 3 (twice), 3 counts 5
    for (id, conns, refs) in [(1, vec![3], 0), (2, vec![3, 3], 0), (3, vec![], 5)] {
        let mut node = Node::create(dir.path(), id, format!("n{id}"), &options).unwrap();
        for c in conns {
            node.add_connection(c);
        }
        for _ in 0..refs {
            node.add_reference().unwrap();
        }
        node.write_data().unwrap();
    }

    let mut graph = open(&dir);
    assert_eq!(
        graph.audit().unwrap(),
        vec![ReferenceMismatch { id: 3, recorded: 5, actual: 2 }]
    );

    assert_eq!(graph.repair().unwrap().len(), 1);
    assert_eq!(graph.node(3).unwrap().reference_count(), 2);
    graph.flush().unwrap();
    assert!(graph.audit().unwrap().is_empty());
}

#[test]
fn test_audit_prefers_resident_state() {
    let dir = TempDir::new().unwrap();
    let mut graph = open(&dir);
    graph.create_node(1, "A").unwrap();
    graph.create_node(2, "B").unwrap();
    graph.connect(1, 2).unwrap();

    // Nothing flushed yet, the resident nodes are still consistent
    assert!(graph.audit().unwrap().is_empty());
}

#[test]
fn test_second_open_is_locked_out() {
    let dir = TempDir::new().unwrap();
    let _graph = open(&dir);

    let second = NodeGraph::open(dir.path(), NodeOptions::default());
    assert!(second.is_err());
    assert!(second.unwrap_err().to_string().contains("already open"));
}

#[test]
fn test_lock_released_on_drop() {
    let dir = TempDir::new().unwrap();
    {
        let _graph = open(&dir);
    }

    assert!(NodeGraph::open(dir.path(), NodeOptions::default()).is_ok());
}

#[test]
fn test_open_creates_folder() {
    let dir = TempDir::new().unwrap();
    let folder = dir.path().join("nested").join("graph");

    let mut graph = NodeGraph::open(&folder, NodeOptions::default()).unwrap();
    assert!(folder.is_dir());
    assert_eq!(graph.folder(), folder.as_path());

    graph.create_node(1, "A").unwrap();
    graph.flush().unwrap();
    assert!(folder.join("1_data.sgnd").exists());
}

#[test]
fn test_disconnect_duplicate_edge_keeps_reference() {
    let dir = TempDir::new().unwrap();
    let options = NodeOptions::default();

    // 1 -> 2 twice counts as one source for 2
    let mut source = Node::create(dir.path(), 1, "A", &options).unwrap();
    source.add_connection(2);
    source.add_connection(2);
    source.write_data().unwrap();
    let mut target = Node::create(dir.path(), 2, "B", &options).unwrap();
    target.add_reference().unwrap();
    target.write_data().unwrap();

    let mut graph = open(&dir);
    assert!(graph.audit().unwrap().is_empty());

    assert!(graph.disconnect(1, 2).unwrap());
    assert_eq!(graph.node(1).unwrap().connection_ids(), &[2]);
    assert_eq!(graph.node(2).unwrap().reference_count(), 1);
    assert!(graph.audit().unwrap().is_empty());

    assert!(graph.disconnect(1, 2).unwrap());
    assert!(graph.node(1).unwrap().connection_ids().is_empty());
    assert_eq!(graph.node(2).unwrap().reference_count(), 0);
    assert!(graph.audit().unwrap().is_empty());

    assert!(!graph.disconnect(1, 2).unwrap());
}

#[test]
fn test_connect_at_reference_limit_changes_nothing() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("2_data.sgnd"), "2\u{1e}B\u{1d}4294967295\u{1e}\u{1d}").unwrap();

    let mut graph = open(&dir);
    graph.create_node(1, "A").unwrap();

    assert!(graph.connect(1, 2).is_err());
    assert!(graph.node(1).unwrap().connection_ids().is_empty());
    assert_eq!(graph.node(2).unwrap().reference_count(), u32::MAX);
}

#[test]
fn test_audit_ignores_non_canonical_file_names() {
    let dir = TempDir::new().unwrap();
    let mut graph = open(&dir);
    graph.create_node(70, "A").unwrap();
    graph.flush().unwrap();

    fs::copy(dir.path().join("70_data.sgnd"), dir.path().join("0070_data.sgnd")).unwrap();

    assert_eq!(graph.ids().unwrap(), vec![70]);
    assert!(graph.audit().unwrap().is_empty());
}
