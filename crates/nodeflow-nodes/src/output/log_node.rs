//! Log Node
//!
//! Writes whatever reaches it to the log and passes it on.

use async_trait::async_trait;
use nodeflow_engine::{
    Node, NodeError, NodeRegistration, NodeState, PortMap, PortType, PortValue, PortValues,
    TypeDescriptor,
};
use serde_json::json;

/// Log Node
///
/// # Inputs
/// - `in` - Value to log
///
/// # Outputs
/// - `out` - The same value
///
/// The `label` static input prefixes every line (default `"Log"`).
pub struct LogNode {
    state: NodeState,
}

impl LogNode {
    pub const TYPE_NAME: &'static str = "Log";
    pub const PORT_IN: &'static str = "in";
    pub const PORT_OUT: &'static str = "out";
    pub const STATIC_LABEL: &'static str = "label";

    pub fn new() -> Self {
        Self {
            state: NodeState::new().with_static_input(Self::STATIC_LABEL, json!("Log")),
        }
    }

    pub fn create() -> Box<dyn Node> {
        Box::new(Self::new())
    }

    fn label(&self) -> &str {
        self.state
            .static_inputs
            .get(Self::STATIC_LABEL)
            .and_then(|v| v.as_str())
            .unwrap_or("Log")
    }
}

impl Default for LogNode {
    fn default() -> Self {
        Self::new()
    }
}

inventory::submit!(NodeRegistration {
    type_name: LogNode::TYPE_NAME,
    category: "Output",
    factory: LogNode::create,
});

#[async_trait]
impl Node for LogNode {
    fn type_name(&self) -> &str {
        Self::TYPE_NAME
    }

    fn category(&self) -> &str {
        "Output"
    }

    fn input_ports(&self) -> PortMap {
        PortMap::from([(Self::PORT_IN.to_string(), PortType::any())])
    }

    fn output_ports(&self) -> PortMap {
        PortMap::from([(Self::PORT_OUT.to_string(), PortType::any())])
    }

    fn static_input_ports(&self) -> PortMap {
        PortMap::from([(
            Self::STATIC_LABEL.to_string(),
            PortType::value(TypeDescriptor::named("str")),
        )])
    }

    fn state(&self) -> &NodeState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut NodeState {
        &mut self.state
    }

    async fn run(&mut self, inputs: PortValues) -> Result<PortValues, NodeError> {
        let value = inputs
            .get(Self::PORT_IN)
            .cloned()
            .unwrap_or_else(PortValue::null);
        match &value {
            PortValue::Data(data) => log::info!("{}: {}", self.label(), data),
            other => log::info!("{}: {:?}", self.label(), other),
        }
        Ok(PortValues::from([(Self::PORT_OUT.to_string(), value)]))
    }
}
