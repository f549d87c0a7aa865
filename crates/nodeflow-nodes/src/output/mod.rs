//! Output nodes
//!
//! Nodes that report results.

mod log_node;

pub use log_node::LogNode;
