//! Counter Node
//!
//! Produces a running count. Caching is disabled, so every consumer of the
//! output triggers a fresh step.

use async_trait::async_trait;
use nodeflow_engine::{
    Node, NodeError, NodeRegistration, NodeState, PortMap, PortType, PortValue, PortValues,
    PortValuesExt, TypeDescriptor,
};
use serde_json::json;

/// Counter Node
///
/// The first activation of a run emits `start`; each later activation adds
/// `step` to the previous value.
///
/// # Inputs
/// - `start` (default 0) - First value
/// - `step` (default 1) - Increment
///
/// # Outputs
/// - `out` - Current count
pub struct CounterNode {
    state: NodeState,
    current: Option<i64>,
}

impl CounterNode {
    pub const TYPE_NAME: &'static str = "Counter";
    pub const PORT_START: &'static str = "start";
    pub const PORT_STEP: &'static str = "step";
    pub const PORT_OUT: &'static str = "out";

    pub fn new() -> Self {
        Self {
            state: NodeState::new()
                .with_default_input(Self::PORT_START, json!(0))
                .with_default_input(Self::PORT_STEP, json!(1)),
            current: None,
        }
    }

    pub fn create() -> Box<dyn Node> {
        Box::new(Self::new())
    }
}

impl Default for CounterNode {
    fn default() -> Self {
        Self::new()
    }
}

inventory::submit!(NodeRegistration {
    type_name: CounterNode::TYPE_NAME,
    category: "Input",
    factory: CounterNode::create,
});

#[async_trait]
impl Node for CounterNode {
    fn type_name(&self) -> &str {
        Self::TYPE_NAME
    }

    fn category(&self) -> &str {
        "Input"
    }

    fn input_ports(&self) -> PortMap {
        let int = PortType::value(TypeDescriptor::named("int"));
        PortMap::from([
            (Self::PORT_START.to_string(), int.clone()),
            (Self::PORT_STEP.to_string(), int),
        ])
    }

    fn output_ports(&self) -> PortMap {
        PortMap::from([(
            Self::PORT_OUT.to_string(),
            PortType::value(TypeDescriptor::named("int")),
        )])
    }

    fn state(&self) -> &NodeState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut NodeState {
        &mut self.state
    }

    fn cache_enabled(&self) -> bool {
        false
    }

    async fn init(&mut self) -> Result<(), NodeError> {
        self.current = None;
        Ok(())
    }

    async fn run(&mut self, inputs: PortValues) -> Result<PortValues, NodeError> {
        let next = match self.current {
            None => inputs.get_i64_or(Self::PORT_START, 0),
            Some(current) => current + inputs.get_i64_or(Self::PORT_STEP, 1),
        };
        self.current = Some(next);
        log::debug!("CounterNode: {}", next);

        Ok(PortValues::from([(
            Self::PORT_OUT.to_string(),
            PortValue::Data(json!(next)),
        )]))
    }
}
