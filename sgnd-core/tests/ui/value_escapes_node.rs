//! A borrowed value cannot outlive the node it came from.
//!
//! If this code compiles, there is a bug in the API design.

use sgnd_core::{Node, NodeOptions};

fn value_of_fresh_node() -> &'static str {
    let mut node = Node::create("/tmp", 1, "A", &NodeOptions::default()).unwrap();
    node.set_value("k", "v").unwrap();

    // ERROR: returns a value referencing data owned by the current function
    node.get_value("k").unwrap().unwrap()
}

fn main() {
    println!("{}", value_of_fresh_node());
}
