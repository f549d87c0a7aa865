//! If Else Node
//!
//! Routes its input to one of two event outputs.

use async_trait::async_trait;
use nodeflow_engine::{
    Node, NodeError, NodeRegistration, NodeState, PortMap, PortType, PortValue, PortValues,
    PortValuesExt, TypeDescriptor,
};
use serde_json::json;

/// If Else Node
///
/// Emits `input` on `true` or `false` depending on `condition`; the other
/// output carries `Exhausted`, so only the taken branch runs. The output
/// type follows whatever is connected to `input`; the graph drops branch
/// connections the new type no longer fits.
///
/// # Inputs
/// - `condition` (default false) - Branch selector
/// - `input` - Value to route
///
/// # Outputs
/// - `true` (event) - `input` when the condition holds
/// - `false` (event) - `input` otherwise
pub struct IfElseNode {
    state: NodeState,
    data_type: TypeDescriptor,
}

impl IfElseNode {
    pub const TYPE_NAME: &'static str = "If Else";
    pub const PORT_CONDITION: &'static str = "condition";
    pub const PORT_INPUT: &'static str = "input";
    pub const PORT_TRUE: &'static str = "true";
    pub const PORT_FALSE: &'static str = "false";

    pub fn new() -> Self {
        Self {
            state: NodeState::new().with_default_input(Self::PORT_CONDITION, json!(false)),
            data_type: TypeDescriptor::any(),
        }
    }

    pub fn create() -> Box<dyn Node> {
        Box::new(Self::new())
    }
}

impl Default for IfElseNode {
    fn default() -> Self {
        Self::new()
    }
}

inventory::submit!(NodeRegistration {
    type_name: IfElseNode::TYPE_NAME,
    category: "Logic",
    factory: IfElseNode::create,
});

#[async_trait]
impl Node for IfElseNode {
    fn type_name(&self) -> &str {
        Self::TYPE_NAME
    }

    fn category(&self) -> &str {
        "Logic"
    }

    fn input_ports(&self) -> PortMap {
        PortMap::from([
            (
                Self::PORT_CONDITION.to_string(),
                PortType::value(TypeDescriptor::named("bool")),
            ),
            (Self::PORT_INPUT.to_string(), PortType::any()),
        ])
    }

    fn output_ports(&self) -> PortMap {
        let branch = PortType::event(self.data_type.clone());
        PortMap::from([
            (Self::PORT_TRUE.to_string(), branch.clone()),
            (Self::PORT_FALSE.to_string(), branch),
        ])
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
        let condition = inputs.get_bool_or(Self::PORT_CONDITION, false);
        let value = match inputs.get(Self::PORT_INPUT) {
            Some(PortValue::Data(value)) => PortValue::Data(value.clone()),
            _ => PortValue::null(),
        };

        let (taken, skipped) = if condition {
            (Self::PORT_TRUE, Self::PORT_FALSE)
        } else {
            (Self::PORT_FALSE, Self::PORT_TRUE)
        };
        log::debug!("IfElseNode: taking '{}'", taken);

        Ok(PortValues::from([
            (taken.to_string(), value),
            (skipped.to_string(), PortValue::Exhausted),
        ]))
    }
}
