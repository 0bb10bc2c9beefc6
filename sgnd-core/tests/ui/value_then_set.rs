//! A value borrowed from `get_value()` must not survive a later `set_value()`:
//! the insert may reallocate the payload the `&str` points into.
//!
//! If this code compiles, there is a bug in the API design.

use sgnd_core::{Node, NodeOptions};

fn main() {
    let mut node = Node::create("/tmp", 1, "A", &NodeOptions::default()).unwrap();
    node.set_value("k", "v").unwrap();

    let value = node.get_value("k").unwrap().unwrap();

    // ERROR: cannot borrow `node` as mutable more than once at a time
    node.set_value("k", "w").unwrap();

    println!("{value}");
}
