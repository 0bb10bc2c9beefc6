//! Evicting the payload frees the map a borrowed value points into, so
//! `dump_data()` must be rejected while the value is alive.
//!
//! If this code compiles, there is a bug in the API design.

use sgnd_core::{Node, NodeOptions};

fn main() {
    let mut node = Node::create("/tmp", 1, "A", &NodeOptions::default()).unwrap();
    node.set_value("k", "v").unwrap();

    let value = node.get_value("k").unwrap();

    // ERROR: `dump_data()` needs `&mut node` while `value` borrows it
    node.dump_data().unwrap();

    println!("{value:?}");
}
