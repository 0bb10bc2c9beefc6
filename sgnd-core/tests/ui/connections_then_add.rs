//! The slice returned by `connection_ids()` must not survive an edge edit.
//!
//! If this code compiles, there is a bug in the API design.

use sgnd_core::{Node, NodeOptions};

fn main() {
    let mut node = Node::create("/tmp", 1, "A", &NodeOptions::default()).unwrap();
    node.add_connection(2);

    let conns = node.connection_ids();

    // ERROR: cannot borrow `node` as mutable because it is also borrowed as immutable
    node.add_connection(3);

    println!("{}", conns.len());
}
