//! Loop Node
//!
//! Repeats its input a fixed number of times as a stream.

use async_trait::async_trait;
use nodeflow_engine::{
    Node, NodeError, NodeRegistration, NodeState, PortMap, PortType, PortValue, PortValues,
    PortValuesExt, Progress, TypeDescriptor,
};
use serde_json::json;

/// Loop Node
///
/// Emits `input` on `count` consecutive activations, then `Exhausted`.
/// Progress reports the iteration out of `count`.
///
/// # Inputs
/// - `input` - Value to repeat
/// - `count` (default 1) - Number of repetitions
///
/// # Outputs
/// - `out` (generator) - The repeated value
pub struct LoopNode {
    state: NodeState,
    iteration: i64,
    progress: Option<Progress>,
}

impl LoopNode {
    pub const TYPE_NAME: &'static str = "Loop";
    pub const PORT_INPUT: &'static str = "input";
    pub const PORT_COUNT: &'static str = "count";
    pub const PORT_OUT: &'static str = "out";

    pub fn new() -> Self {
        Self {
            state: NodeState::new().with_default_input(Self::PORT_COUNT, json!(1)),
            iteration: 0,
            progress: None,
        }
    }

    pub fn create() -> Box<dyn Node> {
        Box::new(Self::new())
    }
}

impl Default for LoopNode {
    fn default() -> Self {
        Self::new()
    }
}

inventory::submit!(NodeRegistration {
    type_name: LoopNode::TYPE_NAME,
    category: "Logic",
    factory: LoopNode::create,
});

#[async_trait]
impl Node for LoopNode {
    fn type_name(&self) -> &str {
        Self::TYPE_NAME
    }

    fn category(&self) -> &str {
        "Logic"
    }

    fn input_ports(&self) -> PortMap {
        PortMap::from([
            (Self::PORT_INPUT.to_string(), PortType::any()),
            (
                Self::PORT_COUNT.to_string(),
                PortType::value(TypeDescriptor::named("int")),
            ),
        ])
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
        self.iteration = 0;
        self.progress = None;
        Ok(())
    }

    async fn run(&mut self, inputs: PortValues) -> Result<PortValues, NodeError> {
        let count = inputs.get_i64_or(Self::PORT_COUNT, 1);
        let total = count.max(0) as u64;

        let value = if self.iteration >= count {
            self.iteration = 0;
            self.progress = Some(Progress::new(total, total));
            PortValue::Exhausted
        } else {
            self.iteration += 1;
            self.progress = Some(Progress::new(self.iteration as u64, total));
            log::debug!("LoopNode: iteration {}/{}", self.iteration, count);
            inputs
                .get(Self::PORT_INPUT)
                .cloned()
                .unwrap_or_else(PortValue::null)
        };

        Ok(PortValues::from([(Self::PORT_OUT.to_string(), value)]))
    }

    fn progress(&self) -> Option<Progress> {
        self.progress
    }
}
