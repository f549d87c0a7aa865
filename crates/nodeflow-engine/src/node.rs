//! Node contract
//!
//! A node declares its ports, owns its configurable state and is invoked
//! by the scheduler through `init` and `run`. Everything else a node keeps
//! (counters, buffers, loaded resources) is private to it.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::NodeError;
use crate::persistence::NodeDocument;
use crate::types::{PortMap, PortType, PortValue, PortValues};

/// Category used when a node does not override [`Node::category`]
pub const DEFAULT_CATEGORY: &str = "General";

/// Configurable state shared by every node
///
/// `default_inputs` are used for unconnected inputs, `static_inputs` are
/// configuration values never wired from the graph, `default_outputs` hold
/// values for source-style nodes and `metadata` is free-form (for example
/// an editor position).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeState {
    #[serde(default)]
    pub default_inputs: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub static_inputs: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub default_outputs: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl NodeState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_input(mut self, port: impl Into<String>, value: serde_json::Value) -> Self {
        self.default_inputs.insert(port.into(), value);
        self
    }

    pub fn with_static_input(mut self, port: impl Into<String>, value: serde_json::Value) -> Self {
        self.static_inputs.insert(port.into(), value);
        self
    }

    pub fn with_default_output(mut self, port: impl Into<String>, value: serde_json::Value) -> Self {
        self.default_outputs.insert(port.into(), value);
        self
    }

    /// Overlay every map of `other` onto this state
    pub fn merge(&mut self, other: &NodeState) {
        self.default_inputs
            .extend(other.default_inputs.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.static_inputs
            .extend(other.static_inputs.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.default_outputs
            .extend(other.default_outputs.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.metadata
            .extend(other.metadata.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
}

/// How far a node is through its current stream or task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub current: u64,
    pub total: u64,
}

impl Progress {
    pub fn new(current: u64, total: u64) -> Self {
        Self { current, total }
    }

    pub fn is_complete(&self) -> bool {
        self.current >= self.total
    }
}

/// A processing unit in the graph
///
/// `run` must return exactly one entry per declared output port.
#[async_trait]
pub trait Node: Send + Sync {
    /// Declared type name, used for registry lookup and persistence
    fn type_name(&self) -> &str;

    /// Grouping category
    fn category(&self) -> &str {
        DEFAULT_CATEGORY
    }

    fn input_ports(&self) -> PortMap;

    fn output_ports(&self) -> PortMap;

    /// Configuration values that are not wired from the graph
    fn static_input_ports(&self) -> PortMap {
        PortMap::new()
    }

    fn state(&self) -> &NodeState;

    fn state_mut(&mut self) -> &mut NodeState;

    /// When false the node is recomputed for every consuming activation
    fn cache_enabled(&self) -> bool {
        true
    }

    /// When true `init` is deferred to the first activation
    fn lazy_init(&self) -> bool {
        false
    }

    /// True for placeholders standing in for unregistered types
    fn is_placeholder(&self) -> bool {
        false
    }

    /// Per-run setup; called once per run and must be idempotent
    async fn init(&mut self) -> Result<(), NodeError> {
        Ok(())
    }

    async fn run(&mut self, inputs: PortValues) -> Result<PortValues, NodeError>;

    /// Read after every successful `run`; a change is sent as
    /// [`GraphEvent::NodeProgress`](crate::events::GraphEvent::NodeProgress)
    fn progress(&self) -> Option<Progress> {
        None
    }

    fn on_input_connected(&mut self, _port: &str, _source: &PortType) -> Result<(), NodeError> {
        Ok(())
    }

    fn on_input_disconnected(&mut self, _port: &str) -> Result<(), NodeError> {
        Ok(())
    }

    fn on_output_connected(&mut self, _port: &str, _target: &PortType) -> Result<(), NodeError> {
        Ok(())
    }

    fn on_output_disconnected(&mut self, _port: &str) -> Result<(), NodeError> {
        Ok(())
    }

    fn save(&self) -> NodeDocument {
        NodeDocument::new(self.type_name(), self.state().clone())
    }

    fn load(&mut self, document: &NodeDocument) -> Result<(), NodeError> {
        self.state_mut().merge(&document.state);
        Ok(())
    }
}

/// A node shared between the graph and a running scheduler
pub type SharedNode = Arc<tokio::sync::Mutex<Box<dyn Node>>>;

pub(crate) fn share(node: Box<dyn Node>) -> SharedNode {
    Arc::new(tokio::sync::Mutex::new(node))
}

/// Typed accessors for node inputs
pub trait PortValuesExt {
    /// Real data on a port, `None` for sentinels and missing ports
    fn data(&self, port: &str) -> Option<&serde_json::Value>;

    /// Whether the port carries the `Exhausted` sentinel
    fn is_exhausted(&self, port: &str) -> bool;

    fn get_bool(&self, port: &str) -> Result<bool, NodeError>;

    fn get_bool_or(&self, port: &str, default: bool) -> bool;

    fn get_i64(&self, port: &str) -> Result<i64, NodeError>;

    fn get_i64_or(&self, port: &str, default: i64) -> i64;

    fn get_list(&self, port: &str) -> Result<&Vec<serde_json::Value>, NodeError>;
}

impl PortValuesExt for PortValues {
    fn data(&self, port: &str) -> Option<&serde_json::Value> {
        self.get(port).and_then(PortValue::as_data)
    }

    fn is_exhausted(&self, port: &str) -> bool {
        self.get(port).is_some_and(PortValue::is_exhausted)
    }

    fn get_bool(&self, port: &str) -> Result<bool, NodeError> {
        match self.data(port) {
            None => Err(NodeError::MissingInput(port.to_string())),
            Some(value) => value
                .as_bool()
                .ok_or_else(|| NodeError::invalid_input(port, "bool")),
        }
    }

    fn get_bool_or(&self, port: &str, default: bool) -> bool {
        self.data(port).and_then(|v| v.as_bool()).unwrap_or(default)
    }

    fn get_i64(&self, port: &str) -> Result<i64, NodeError> {
        match self.data(port) {
            None => Err(NodeError::MissingInput(port.to_string())),
            Some(value) => value
                .as_i64()
                .ok_or_else(|| NodeError::invalid_input(port, "int")),
        }
    }

    fn get_i64_or(&self, port: &str, default: i64) -> i64 {
        self.data(port).and_then(|v| v.as_i64()).unwrap_or(default)
    }

    fn get_list(&self, port: &str) -> Result<&Vec<serde_json::Value>, NodeError> {
        match self.data(port) {
            None => Err(NodeError::MissingInput(port.to_string())),
            Some(value) => value
                .as_array()
                .ok_or_else(|| NodeError::invalid_input(port, "list")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_state_merge_overlays() {
        let mut state = NodeState::new()
            .with_default_input("a", json!(1))
            .with_static_input("count", json!(2));
        let incoming = NodeState::new()
            .with_default_input("a", json!(5))
            .with_default_output("out", json!("x"));

        state.merge(&incoming);
        assert_eq!(state.default_inputs["a"], json!(5));
        assert_eq!(state.static_inputs["count"], json!(2));
        assert_eq!(state.default_outputs["out"], json!("x"));
    }

    #[test]
    fn test_state_serializes_camel_case() {
        let state = NodeState::new().with_default_input("a", json!(1));
        let value = serde_json::to_value(&state).unwrap();
        assert_eq!(value["defaultInputs"]["a"], json!(1));
        assert!(value["staticInputs"].as_object().unwrap().is_empty());

        let parsed: NodeState = serde_json::from_value(json!({"metadata": {"x": 1}})).unwrap();
        assert_eq!(parsed.metadata["x"], json!(1));
        assert!(parsed.default_inputs.is_empty());
    }

    #[test]
    fn test_inputs_ext() {
        let mut inputs = PortValues::new();
        inputs.insert("flag".into(), PortValue::Data(json!(true)));
        inputs.insert("count".into(), PortValue::Data(json!(42)));
        inputs.insert("items".into(), PortValue::Data(json!([1, 2])));
        inputs.insert("done".into(), PortValue::Exhausted);

        assert!(inputs.get_bool("flag").unwrap());
        assert_eq!(inputs.get_i64("count").unwrap(), 42);
        assert_eq!(inputs.get_i64_or("missing", 7), 7);
        assert_eq!(inputs.get_list("items").unwrap().len(), 2);
        assert!(inputs.is_exhausted("done"));
        assert!(inputs.data("done").is_none());
        assert!(matches!(inputs.get_bool("missing"), Err(NodeError::MissingInput(_))));
        assert!(matches!(inputs.get_i64("flag"), Err(NodeError::InvalidInput { .. })));
    }
}
