//! Switch Node
//!
//! Routes its input to one of `count` event outputs.

use async_trait::async_trait;
use nodeflow_engine::{
    Node, NodeError, NodeRegistration, NodeState, PortMap, PortType, PortValue, PortValues,
    PortValuesExt, TypeDescriptor,
};
use serde_json::json;

/// Switch Node
///
/// The number of outputs is the `count` static input (default 2), named
/// `out0`, `out1`, ... Output `id` carries `input`; every other output
/// carries `Exhausted`.
///
/// # Inputs
/// - `id` (default 0) - Index of the output to take
/// - `input` - Value to route
///
/// # Outputs
/// - `out{n}` (event) - `input` when `n == id`
pub struct SwitchNode {
    state: NodeState,
    data_type: TypeDescriptor,
}

impl SwitchNode {
    pub const TYPE_NAME: &'static str = "Switch";
    pub const PORT_ID: &'static str = "id";
    pub const PORT_INPUT: &'static str = "input";
    pub const STATIC_COUNT: &'static str = "count";
    pub const DEFAULT_COUNT: usize = 2;

    pub fn new() -> Self {
        Self::with_count(Self::DEFAULT_COUNT)
    }

    pub fn with_count(count: usize) -> Self {
        Self {
            state: NodeState::new()
                .with_default_input(Self::PORT_ID, json!(0))
                .with_static_input(Self::STATIC_COUNT, json!(count)),
            data_type: TypeDescriptor::any(),
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

    fn output_name(index: usize) -> String {
        format!("out{}", index)
    }
}

impl Default for SwitchNode {
    fn default() -> Self {
        Self::new()
    }
}

inventory::submit!(NodeRegistration {
    type_name: SwitchNode::TYPE_NAME,
    category: "Logic",
    factory: SwitchNode::create,
});

#[async_trait]
impl Node for SwitchNode {
    fn type_name(&self) -> &str {
        Self::TYPE_NAME
    }

    fn category(&self) -> &str {
        "Logic"
    }

    fn input_ports(&self) -> PortMap {
        PortMap::from([
            (
                Self::PORT_ID.to_string(),
                PortType::value(TypeDescriptor::named("int")),
            ),
            (Self::PORT_INPUT.to_string(), PortType::any()),
        ])
    }

    fn output_ports(&self) -> PortMap {
        (0..self.count())
            .map(|i| (Self::output_name(i), PortType::event(self.data_type.clone())))
            .collect()
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

    fn on_input_connected(&mut self, port: &str, source: &PortType) -> Result<(), NodeError> {
        if port == Self::PORT_INPUT {
            self.data_type = source.data_type.clone();
        }
        Ok(())
    }

    fn on_input_disconnected(&mut self, port: &str) -> Result<(), NodeError> {
        if port == Self::PORT_INPUT {
            self.data_type = TypeDescriptor::any();
        }
        Ok(())
    }

    async fn run(&mut self, inputs: PortValues) -> Result<PortValues, NodeError> {
        let count = self.count();
        let id = inputs.get_i64(Self::PORT_ID)?;
        let selected = usize::try_from(id)
            .ok()
            .filter(|i| *i < count)
            .ok_or_else(|| {
                NodeError::failed(format!("Switch id {} is out of range 0..{}", id, count))
            })?;

        let value = inputs
            .get(Self::PORT_INPUT)
            .cloned()
            .unwrap_or_else(PortValue::null);
        Ok((0..count)
            .map(|i| {
                let out = if i == selected {
                    value.clone()
                } else {
                    PortValue::Exhausted
                };
                (Self::output_name(i), out)
            })
            .collect())
    }
}
