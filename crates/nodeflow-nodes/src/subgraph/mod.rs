//! Graph nodes
//!
//! Nodes that embed another saved graph.

mod graph_node;

pub use graph_node::GraphNode;
