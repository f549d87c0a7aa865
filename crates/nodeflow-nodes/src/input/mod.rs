//! Input nodes
//!
//! Nodes that feed values into a graph.

mod constant;
mod counter;

pub use constant::ConstantNode;
pub use counter::CounterNode;
