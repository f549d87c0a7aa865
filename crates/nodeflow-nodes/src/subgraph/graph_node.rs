//! Graph Node
//!
//! Runs a saved graph as a single node.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use nodeflow_engine::{
    Graph, Node, NodeDocument, NodeEngineError, NodeError, NodeId, NodeRegistration, NodeRegistry,
    NodeState, PortKind, PortMap, PortType, PortValue, PortValues, PortValuesExt, Progress,
    RunOutcome, TypeDescriptor,
};
use serde_json::{json, Value};

thread_local! {
    /// Documents being loaded on this thread, outermost first
    static LOADING: RefCell<Vec<PathBuf>> = const { RefCell::new(Vec::new()) };
}

/// Graph Node
///
/// Embeds the graph saved at `path` and exposes every port its nodes
/// leave unconnected as `"<node name>.<port>"`. Each activation copies its
/// inputs onto the inner nodes' default inputs, runs the inner graph to
/// completion and returns the exposed outputs. An output the inner run did
/// not produce is `Exhausted`.
///
/// Exposed inputs are value ports. Generator outputs are exposed as value
/// ports holding the last item; event outputs stay events.
///
/// # Static inputs
/// - `path` - Saved graph to embed
/// - `hide_middle_nodes` (default true) - Skip nodes wired on both sides
///
/// # Progress
/// Inner nodes that ran, out of all inner nodes.
pub struct GraphNode {
    state: NodeState,
    graph: Option<Graph>,
    /// Exposed port name to inner node and port
    inputs: BTreeMap<String, (NodeId, String)>,
    outputs: BTreeMap<String, (NodeId, String)>,
    input_ports: PortMap,
    output_ports: PortMap,
    progress: Option<Progress>,
}

impl GraphNode {
    pub const TYPE_NAME: &'static str = "Graph";
    pub const STATIC_PATH: &'static str = "path";
    pub const STATIC_HIDE_MIDDLE: &'static str = "hide_middle_nodes";

    pub fn new() -> Self {
        Self {
            state: NodeState::new()
                .with_static_input(Self::STATIC_PATH, json!(""))
                .with_static_input(Self::STATIC_HIDE_MIDDLE, json!(true)),
            graph: None,
            inputs: BTreeMap::new(),
            outputs: BTreeMap::new(),
            input_ports: PortMap::new(),
            output_ports: PortMap::new(),
            progress: None,
        }
    }

    pub fn create() -> Box<dyn Node> {
        Box::new(Self::new())
    }

    /// Embed a graph built in memory
    pub fn from_graph(graph: Graph) -> Self {
        let mut node = Self::new();
        node.set_graph(graph);
        node
    }

    /// Embed the graph saved at `path`, resolving its node types from the
    /// built-in registry
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, NodeEngineError> {
        let path = path.as_ref();
        let mut graph = Graph::new(NodeRegistry::with_builtins());
        let report = graph.load_from_file(path).await?;
        if !report.is_clean() {
            log::warn!(
                "GraphNode: {} issues loading {}",
                report.issues.len(),
                path.display()
            );
        }

        let mut node = Self::new();
        node.state.static_inputs.insert(
            Self::STATIC_PATH.to_string(),
            json!(path.to_string_lossy()),
        );
        node.set_graph(graph);
        Ok(node)
    }

    pub fn graph(&self) -> Option<&Graph> {
        self.graph.as_ref()
    }

    /// Replace the embedded graph and recompute the exposed ports
    pub fn set_graph(&mut self, graph: Graph) {
        self.graph = Some(graph);
        self.expose();
    }

    fn path(&self) -> Option<&str> {
        self.state
            .static_inputs
            .get(Self::STATIC_PATH)
            .and_then(Value::as_str)
            .filter(|path| !path.is_empty())
    }

    fn hide_middle_nodes(&self) -> bool {
        self.state
            .static_inputs
            .get(Self::STATIC_HIDE_MIDDLE)
            .and_then(Value::as_bool)
            .unwrap_or(true)
    }

    /// Rebuild the exposed ports from the embedded graph
    ///
    /// Default inputs already set for a still exposed port are kept; the
    /// inner node's default fills the others.
    fn expose(&mut self) {
        let hide_middle = self.hide_middle_nodes();
        self.inputs.clear();
        self.outputs.clear();
        self.input_ports.clear();
        self.output_ports.clear();

        let Some(graph) = &self.graph else {
            return;
        };

        let mut inner_defaults = BTreeMap::new();
        for id in graph.node_ids() {
            let Some(name) = graph.node_name(id) else {
                continue;
            };
            let wired_inputs: BTreeSet<String> = graph
                .input_connections(id)
                .into_iter()
                .map(|c| c.target_port.clone())
                .collect();
            let wired_outputs: BTreeSet<String> = graph
                .output_connections(id)
                .into_iter()
                .map(|c| c.source_port.clone())
                .collect();
            if hide_middle && !wired_inputs.is_empty() && !wired_outputs.is_empty() {
                continue;
            }

            let inspected = graph.with_node(id, |node| {
                (
                    node.input_ports(),
                    node.output_ports(),
                    node.state().default_inputs.clone(),
                )
            });
            let Ok((inputs, outputs, defaults)) = inspected else {
                log::warn!("GraphNode: inner node '{}' is busy, not exposed", name);
                continue;
            };

            for (port, ty) in inputs {
                if wired_inputs.contains(&port) {
                    continue;
                }
                let exposed = format!("{}.{}", name, port);
                if let Some(value) = defaults.get(&port) {
                    inner_defaults.insert(exposed.clone(), value.clone());
                }
                self.input_ports
                    .insert(exposed.clone(), PortType::value(ty.data_type));
                self.inputs.insert(exposed, (id, port));
            }

            for (port, ty) in outputs {
                if wired_outputs.contains(&port) {
                    continue;
                }
                let exposed = format!("{}.{}", name, port);
                let kind = match ty.kind {
                    PortKind::Event => PortKind::Event,
                    _ => PortKind::Value,
                };
                self.output_ports.insert(exposed.clone(), ty.with_kind(kind));
                self.outputs.insert(exposed, (id, port));
            }
        }

        let exposed = &self.input_ports;
        self.state
            .default_inputs
            .retain(|port, _| exposed.contains_key(port));
        for (port, value) in inner_defaults {
            self.state.default_inputs.entry(port).or_insert(value);
        }

        log::debug!(
            "GraphNode: exposing {} inputs and {} outputs",
            self.input_ports.len(),
            self.output_ports.len()
        );
    }

    /// Load the document at `path` with the built-in registry
    ///
    /// Fails when `path` is already being loaded further up, which would
    /// otherwise recurse forever.
    fn load_document_at(path: &str) -> Result<Graph, NodeError> {
        let key = std::fs::canonicalize(path).unwrap_or_else(|_| PathBuf::from(path));
        if LOADING.with(|loading| loading.borrow().contains(&key)) {
            return Err(NodeError::failed(format!("Graph '{}' embeds itself", path)));
        }

        LOADING.with(|loading| loading.borrow_mut().push(key));
        let loaded = Self::read_document(path);
        LOADING.with(|loading| loading.borrow_mut().pop());
        loaded
    }

    fn read_document(path: &str) -> Result<Graph, NodeError> {
        // Node::load is synchronous, so the file is read in place
        let json = std::fs::read_to_string(path)
            .map_err(|e| NodeError::failed(format!("Could not read graph '{}': {}", path, e)))?;

        let mut graph = Graph::new(NodeRegistry::with_builtins());
        let report = graph
            .load_from_str(&json)
            .map_err(|e| NodeError::failed(format!("Could not load graph '{}': {}", path, e)))?;
        for issue in &report.issues {
            log::warn!("GraphNode: '{}': {}", path, issue);
        }
        Ok(graph)
    }
}

impl Default for GraphNode {
    fn default() -> Self {
        Self::new()
    }
}

inventory::submit!(NodeRegistration {
    type_name: GraphNode::TYPE_NAME,
    category: "Graph",
    factory: GraphNode::create,
});

#[async_trait]
impl Node for GraphNode {
    fn type_name(&self) -> &str {
        Self::TYPE_NAME
    }

    fn category(&self) -> &str {
        "Graph"
    }

    fn input_ports(&self) -> PortMap {
        self.input_ports.clone()
    }

    fn output_ports(&self) -> PortMap {
        self.output_ports.clone()
    }

    fn static_input_ports(&self) -> PortMap {
        PortMap::from([
            (
                Self::STATIC_PATH.to_string(),
                PortType::value(TypeDescriptor::named("str")),
            ),
            (
                Self::STATIC_HIDE_MIDDLE.to_string(),
                PortType::value(TypeDescriptor::named("bool")),
            ),
        ])
    }

    fn state(&self) -> &NodeState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut NodeState {
        &mut self.state
    }

    async fn init(&mut self) -> Result<(), NodeError> {
        self.progress = None;
        Ok(())
    }

    async fn run(&mut self, inputs: PortValues) -> Result<PortValues, NodeError> {
        let graph = self
            .graph
            .as_ref()
            .ok_or_else(|| NodeError::failed("No graph loaded"))?;

        for (exposed, (id, port)) in &self.inputs {
            let value = inputs.data(exposed).cloned().unwrap_or(Value::Null);
            graph
                .set_default_input(*id, port, value)
                .map_err(|e| NodeError::failed(e.to_string()))?;
        }

        let report = graph
            .run_to_completion()
            .await
            .map_err(|e| NodeError::failed(e.to_string()))?;
        self.progress = Some(Progress::new(
            report.activations.len() as u64,
            graph.len() as u64,
        ));

        match &report.outcome {
            RunOutcome::Finished => {}
            RunOutcome::Failed { error, .. } => {
                return Err(NodeError::failed(format!("Inner graph failed: {}", error)))
            }
            other => log::warn!("GraphNode: inner run ended as {:?}", other.status()),
        }

        Ok(self
            .outputs
            .iter()
            .map(|(exposed, (id, port))| {
                let value = match report.output(*id, port) {
                    Some(PortValue::Data(value)) => PortValue::Data(value.clone()),
                    _ => PortValue::Exhausted,
                };
                (exposed.clone(), value)
            })
            .collect())
    }

    fn progress(&self) -> Option<Progress> {
        self.progress
    }

    fn load(&mut self, document: &NodeDocument) -> Result<(), NodeError> {
        self.state.merge(&document.state);
        if let Some(path) = self.path().map(str::to_string) {
            let graph = Self::load_document_at(&path)?;
            self.set_graph(graph);
        }
        Ok(())
    }
}
