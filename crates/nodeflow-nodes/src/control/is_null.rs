//! Is Null Node

use async_trait::async_trait;
use nodeflow_engine::{
    Node, NodeError, NodeRegistration, NodeState, PortMap, PortType, PortValue, PortValues,
    PortValuesExt, TypeDescriptor,
};
use serde_json::{json, Value};

/// Emits whether `input` is `null`
pub struct IsNullNode {
    state: NodeState,
}

impl IsNullNode {
    pub const TYPE_NAME: &'static str = "Is Null";
    pub const PORT_INPUT: &'static str = "input";
    pub const PORT_OUT: &'static str = "out";

    pub fn new() -> Self {
        Self {
            state: NodeState::new().with_default_input(Self::PORT_INPUT, Value::Null),
        }
    }

    pub fn create() -> Box<dyn Node> {
        Box::new(Self::new())
    }
}

impl Default for IsNullNode {
    fn default() -> Self {
        Self::new()
    }
}

inventory::submit!(NodeRegistration {
    type_name: IsNullNode::TYPE_NAME,
    category: "Logic",
    factory: IsNullNode::create,
});

#[async_trait]
impl Node for IsNullNode {
    fn type_name(&self) -> &str {
        Self::TYPE_NAME
    }

    fn category(&self) -> &str {
        "Logic"
    }

    fn input_ports(&self) -> PortMap {
        PortMap::from([(Self::PORT_INPUT.to_string(), PortType::any())])
    }

    fn output_ports(&self) -> PortMap {
        PortMap::from([(
            Self::PORT_OUT.to_string(),
            PortType::value(TypeDescriptor::named("bool")),
        )])
    }

    fn state(&self) -> &NodeState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut NodeState {
        &mut self.state
    }

    async fn run(&mut self, inputs: PortValues) -> Result<PortValues, NodeError> {
        let is_null = inputs.data(Self::PORT_INPUT).map_or(true, Value::is_null);
        Ok(PortValues::from([(
            Self::PORT_OUT.to_string(),
            PortValue::Data(json!(is_null)),
        )]))
    }
}
