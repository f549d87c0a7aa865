//! Constant Node
//!
//! Emits a configured value on every activation.

use async_trait::async_trait;
use nodeflow_engine::{
    Node, NodeError, NodeRegistration, NodeState, PortMap, PortType, PortValue, PortValues,
};
use serde_json::Value;

/// Constant Node
///
/// Has no inputs. The emitted value is the `value` default output, so it
/// is saved and restored with the graph.
///
/// # Outputs
/// - `value` - The configured value (`null` when unset)
pub struct ConstantNode {
    state: NodeState,
}

impl ConstantNode {
    pub const TYPE_NAME: &'static str = "Constant";
    /// Port ID for the value output
    pub const PORT_VALUE: &'static str = "value";

    pub fn new() -> Self {
        Self {
            state: NodeState::new(),
        }
    }

    /// Create a constant emitting `value`
    pub fn with_value(value: impl Into<Value>) -> Self {
        Self {
            state: NodeState::new().with_default_output(Self::PORT_VALUE, value.into()),
        }
    }

    pub fn create() -> Box<dyn Node> {
        Box::new(Self::new())
    }
}

impl Default for ConstantNode {
    fn default() -> Self {
        Self::new()
    }
}

inventory::submit!(NodeRegistration {
    type_name: ConstantNode::TYPE_NAME,
    category: "Input",
    factory: ConstantNode::create,
});

#[async_trait]
impl Node for ConstantNode {
    fn type_name(&self) -> &str {
        Self::TYPE_NAME
    }

    fn category(&self) -> &str {
        "Input"
    }

    fn input_ports(&self) -> PortMap {
        PortMap::new()
    }

    fn output_ports(&self) -> PortMap {
        PortMap::from([(Self::PORT_VALUE.to_string(), PortType::any())])
    }

    fn state(&self) -> &NodeState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut NodeState {
        &mut self.state
    }

    async fn run(&mut self, _inputs: PortValues) -> Result<PortValues, NodeError> {
        let value = self
            .state
            .default_outputs
            .get(Self::PORT_VALUE)
            .cloned()
            .unwrap_or(Value::Null);
        Ok(PortValues::from([(
            Self::PORT_VALUE.to_string(),
            PortValue::Data(value),
        )]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_emits_configured_value() {
        let mut node = ConstantNode::with_value(json!({"a": 1}));
        let outputs = node.run(PortValues::new()).await.unwrap();
        assert_eq!(outputs["value"], PortValue::Data(json!({"a": 1})));
    }

    #[tokio::test]
    async fn test_unset_is_null() {
        let mut node = ConstantNode::new();
        let outputs = node.run(PortValues::new()).await.unwrap();
        assert_eq!(outputs["value"], PortValue::null());
    }

    #[test]
    fn test_value_survives_save() {
        let node = ConstantNode::with_value("hello");
        let document = node.save();
        assert_eq!(document.node_type, "Constant");

        let mut restored = ConstantNode::new();
        restored.load(&document).unwrap();
        assert_eq!(restored.state().default_outputs["value"], json!("hello"));
    }
}
