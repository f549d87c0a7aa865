//! Collector Node
//!
//! Gathers a stream back into a list.

use async_trait::async_trait;
use nodeflow_engine::{
    Node, NodeError, NodeRegistration, NodeState, PortMap, PortType, PortValue, PortValues,
    TypeDescriptor,
};
use serde_json::Value;

/// Collector Node
///
/// Buffers every item arriving on its generator input and reports
/// `Pending` until the stream is exhausted, then emits the whole list.
///
/// # Inputs
/// - `in` (generator) - Items to collect
///
/// # Outputs
/// - `out` - List of collected items
pub struct CollectorNode {
    state: NodeState,
    collected: Vec<Value>,
}

impl CollectorNode {
    pub const TYPE_NAME: &'static str = "Collector";
    pub const PORT_IN: &'static str = "in";
    pub const PORT_OUT: &'static str = "out";

    pub fn new() -> Self {
        Self {
            state: NodeState::new(),
            collected: Vec::new(),
        }
    }

    pub fn create() -> Box<dyn Node> {
        Box::new(Self::new())
    }
}

impl Default for CollectorNode {
    fn default() -> Self {
        Self::new()
    }
}

inventory::submit!(NodeRegistration {
    type_name: CollectorNode::TYPE_NAME,
    category: "Logic",
    factory: CollectorNode::create,
});

#[async_trait]
impl Node for CollectorNode {
    fn type_name(&self) -> &str {
        Self::TYPE_NAME
    }

    fn category(&self) -> &str {
        "Logic"
    }

    fn input_ports(&self) -> PortMap {
        PortMap::from([(
            Self::PORT_IN.to_string(),
            PortType::generator(TypeDescriptor::any()),
        )])
    }

    fn output_ports(&self) -> PortMap {
        PortMap::from([(
            Self::PORT_OUT.to_string(),
            PortType::value(TypeDescriptor::list(TypeDescriptor::any())),
        )])
    }

    fn state(&self) -> &NodeState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut NodeState {
        &mut self.state
    }

    async fn init(&mut self) -> Result<(), NodeError> {
        self.collected.clear();
        Ok(())
    }

    async fn run(&mut self, inputs: PortValues) -> Result<PortValues, NodeError> {
        let out = match inputs.get(Self::PORT_IN) {
            Some(PortValue::Data(item)) => {
                self.collected.push(item.clone());
                PortValue::Pending
            }
            Some(PortValue::Pending) => PortValue::Pending,
            Some(PortValue::Exhausted) | None => {
                let collected = std::mem::take(&mut self.collected);
                log::debug!("CollectorNode: collected {} items", collected.len());
                PortValue::Data(Value::Array(collected))
            }
        };
        Ok(PortValues::from([(Self::PORT_OUT.to_string(), out)]))
    }
}
