//! Control nodes
//!
//! Nodes for branching, streaming and loops.

mod collector;
mod connector;
mod if_else;
mod is_null;
mod iterator;
mod loop_node;
mod switch;

pub use collector::CollectorNode;
pub use connector::ConnectorNode;
pub use if_else::IfElseNode;
pub use is_null::IsNullNode;
pub use iterator::IteratorNode;
pub use loop_node::LoopNode;
pub use switch::SwitchNode;
