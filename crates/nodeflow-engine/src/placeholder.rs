//! Placeholder for node types missing from the registry

use async_trait::async_trait;

use crate::error::NodeError;
use crate::node::{Node, NodeState};
use crate::types::{PortMap, PortType, PortValues};

/// Category reported by placeholders
pub const PLACEHOLDER_CATEGORY: &str = "Internal";

/// Stands in for a node whose type is not registered
///
/// Keeps the original type name and state so that saving the graph
/// writes the entry back unchanged. Running it always fails; `init`
/// succeeds so a graph holding one can still start.
pub struct UnknownNode {
    node_type: String,
    state: NodeState,
    inputs: PortMap,
    outputs: PortMap,
}

impl UnknownNode {
    pub fn new(node_type: impl Into<String>) -> Self {
        Self {
            node_type: node_type.into(),
            state: NodeState::new(),
            inputs: PortMap::new(),
            outputs: PortMap::new(),
        }
    }

    /// Declare an `any` input so connections to it can be restored
    pub fn declare_input(&mut self, port: impl Into<String>) {
        self.inputs.insert(port.into(), PortType::any());
    }

    /// Declare an `any` output so connections from it can be restored
    pub fn declare_output(&mut self, port: impl Into<String>) {
        self.outputs.insert(port.into(), PortType::any());
    }

    fn error(&self) -> NodeError {
        NodeError::UnknownType(self.node_type.clone())
    }
}

#[async_trait]
impl Node for UnknownNode {
    fn type_name(&self) -> &str {
        &self.node_type
    }

    fn category(&self) -> &str {
        PLACEHOLDER_CATEGORY
    }

    fn input_ports(&self) -> PortMap {
        self.inputs.clone()
    }

    fn output_ports(&self) -> PortMap {
        self.outputs.clone()
    }

    fn state(&self) -> &NodeState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut NodeState {
        &mut self.state
    }

    fn is_placeholder(&self) -> bool {
        true
    }

    async fn run(&mut self, _inputs: PortValues) -> Result<PortValues, NodeError> {
        Err(self.error())
    }
}
