//! Connector Node
//!
//! Joins branches back together.

use async_trait::async_trait;
use nodeflow_engine::{
    Node, NodeError, NodeRegistration, NodeState, PortKind, PortMap, PortType, PortValue,
    PortValues, TypeDescriptor,
};
use serde_json::json;

/// Connector Node
///
/// Has `count` event inputs (static input, default 2) named `input0`,
/// `input1`, ... and forwards the first one, in index order, that carries
/// data. When no branch fired the output is `Exhausted`.
///
/// # Outputs
/// - `out` (event) - The value of the branch that fired
pub struct ConnectorNode {
    state: NodeState,
}

impl ConnectorNode {
    pub const TYPE_NAME: &'static str = "Connector";
    pub const PORT_OUT: &'static str = "out";
    pub const STATIC_COUNT: &'static str = "count";
    pub const DEFAULT_COUNT: usize = 2;

    pub fn new() -> Self {
        Self::with_count(Self::DEFAULT_COUNT)
    }

    pub fn with_count(count: usize) -> Self {
        Self {
            state: NodeState::new().with_static_input(Self::STATIC_COUNT, json!(count)),
        }
    }

    pub fn create() -> Box<dyn Node> {
        Box::new(Self::new())
    }

    pub fn count(&self) -> usize {
        self.state
            .static_inputs
            .get(Self::STATIC_COUNT)
            .and_then(|v| v.as_u64())
            .map_or(Self::DEFAULT_COUNT, |n| n as usize)
    }

    fn input_name(index: usize) -> String {
        format!("input{}", index)
    }
}

impl Default for ConnectorNode {
    fn default() -> Self {
        Self::new()
    }
}

inventory::submit!(NodeRegistration {
    type_name: ConnectorNode::TYPE_NAME,
    category: "Logic",
    factory: ConnectorNode::create,
});

#[async_trait]
impl Node for ConnectorNode {
    fn type_name(&self) -> &str {
        Self::TYPE_NAME
    }

    fn category(&self) -> &str {
        "Logic"
    }

    fn input_ports(&self) -> PortMap {
        (0..self.count())
            .map(|i| (Self::input_name(i), PortType::any().with_kind(PortKind::Event)))
            .collect()
    }

    fn output_ports(&self) -> PortMap {
        PortMap::from([(
            Self::PORT_OUT.to_string(),
            PortType::event(TypeDescriptor::any()),
        )])
    }

    fn static_input_ports(&self) -> PortMap {
        PortMap::from([(
            Self::STATIC_COUNT.to_string(),
            PortType::value(TypeDescriptor::named("int")),
        )])
    }

    fn state(&self) -> &NodeState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut NodeState {
        &mut self.state
    }

    async fn run(&mut self, inputs: PortValues) -> Result<PortValues, NodeError> {
        let fired = (0..self.count())
            .filter_map(|i| inputs.get(&Self::input_name(i)))
            .find(|value| !value.is_sentinel())
            .cloned()
            .unwrap_or(PortValue::Exhausted);

        Ok(PortValues::from([(Self::PORT_OUT.to_string(), fired)]))
    }
}
