//! Iterator Node
//!
//! Turns a list into a stream, one element per activation.

use async_trait::async_trait;
use nodeflow_engine::{
    Node, NodeError, NodeRegistration, NodeState, PortMap, PortType, PortValue, PortValues,
    Progress, TypeDescriptor,
};
use serde_json::Value;

/// Iterator Node
///
/// Emits the elements of `in` one at a time on a generator port, then
/// `Exhausted` and starts over. A `null` input is an empty stream.
/// Progress counts the elements emitted out of the list length.
///
/// # Inputs
/// - `in` - List to iterate
///
/// # Outputs
/// - `out` (generator) - Current element
pub struct IteratorNode {
    state: NodeState,
    position: usize,
    progress: Option<Progress>,
}

impl IteratorNode {
    pub const TYPE_NAME: &'static str = "Iterator";
    pub const PORT_IN: &'static str = "in";
    pub const PORT_OUT: &'static str = "out";

    pub fn new() -> Self {
        Self {
            state: NodeState::new(),
            position: 0,
            progress: None,
        }
    }

    pub fn create() -> Box<dyn Node> {
        Box::new(Self::new())
    }

    fn emit(value: PortValue) -> PortValues {
        PortValues::from([(Self::PORT_OUT.to_string(), value)])
    }
}

impl Default for IteratorNode {
    fn default() -> Self {
        Self::new()
    }
}

inventory::submit!(NodeRegistration {
    type_name: IteratorNode::TYPE_NAME,
    category: "Logic",
    factory: IteratorNode::create,
});

#[async_trait]
impl Node for IteratorNode {
    fn type_name(&self) -> &str {
        Self::TYPE_NAME
    }

    fn category(&self) -> &str {
        "Logic"
    }

    fn input_ports(&self) -> PortMap {
        PortMap::from([(
            Self::PORT_IN.to_string(),
            PortType::value(TypeDescriptor::list(TypeDescriptor::any())),
        )])
    }

    fn output_ports(&self) -> PortMap {
        PortMap::from([(
            Self::PORT_OUT.to_string(),
            PortType::generator(TypeDescriptor::any()),
        )])
    }

    fn state(&self) -> &NodeState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut NodeState {
        &mut self.state
    }

    async fn init(&mut self) -> Result<(), NodeError> {
        self.position = 0;
        self.progress = None;
        Ok(())
    }

    async fn run(&mut self, inputs: PortValues) -> Result<PortValues, NodeError> {
        let items = match inputs.get(Self::PORT_IN) {
            None | Some(PortValue::Data(Value::Null)) => {
                self.progress = Some(Progress::new(0, 0));
                return Ok(Self::emit(PortValue::Exhausted));
            }
            Some(PortValue::Data(Value::Array(items))) => items,
            Some(_) => return Err(NodeError::invalid_input(Self::PORT_IN, "list")),
        };

        let total = items.len() as u64;
        match items.get(self.position) {
            Some(item) => {
                self.position += 1;
                self.progress = Some(Progress::new(self.position as u64, total));
                log::debug!("IteratorNode: item {}/{}", self.position, items.len());
                Ok(Self::emit(PortValue::Data(item.clone())))
            }
            None => {
                self.position = 0;
                self.progress = Some(Progress::new(total, total));
                Ok(Self::emit(PortValue::Exhausted))
            }
        }
    }

    fn progress(&self) -> Option<Progress> {
        self.progress
    }
}
