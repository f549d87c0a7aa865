//! Graph container
//!
//! Owns node instances, the connection set and the node registry, and is
//! the entry point for running. Every structural change goes through a
//! validated mutator that notifies subscribers, and every structural
//! mutator is rejected while a run is active.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::error::{ConnectionError, NodeEngineError, Result};
use crate::events::{EventBus, EventError, EventSink, GraphEvent, SubscriptionId};
use crate::node::{share, Node, SharedNode};
use crate::registry::NodeRegistry;
use crate::run::{RunControl, RunGuard, RunHandle, RunReport, RunResults};
use crate::scheduler::{RunPlan, Scheduler};
use crate::types::{can_connect, NodeId, PortMap, PortType};
use crate::validation;

/// A wire from an output port to an input port
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub source: NodeId,
    pub source_port: String,
    pub target: NodeId,
    pub target_port: String,
}

impl Connection {
    pub fn new(
        source: NodeId,
        source_port: impl Into<String>,
        target: NodeId,
        target_port: impl Into<String>,
    ) -> Self {
        Self {
            source,
            source_port: source_port.into(),
            target,
            target_port: target_port.into(),
        }
    }
}

/// A node instance with its display name and notification bus
pub(crate) struct NodeSlot {
    pub(crate) name: String,
    pub(crate) node: SharedNode,
    pub(crate) events: EventBus,
}

type NodeGuard<'a> = tokio::sync::MutexGuard<'a, Box<dyn Node>>;

/// A directed acyclic graph of nodes
pub struct Graph {
    nodes: BTreeMap<NodeId, NodeSlot>,
    /// Keyed by target port; a target port has at most one connection
    connections: BTreeMap<(NodeId, String), Connection>,
    registry: NodeRegistry,
    events: EventBus,
    config: EngineConfig,
    control: Arc<RunControl>,
    next_id: u64,
    name_counter: u64,
}

impl Graph {
    pub fn new(registry: NodeRegistry) -> Self {
        Self::with_config(registry, EngineConfig::default())
    }

    pub fn with_config(registry: NodeRegistry, config: EngineConfig) -> Self {
        Self {
            nodes: BTreeMap::new(),
            connections: BTreeMap::new(),
            registry,
            events: EventBus::new(),
            config,
            control: Arc::new(RunControl::default()),
            next_id: 0,
            name_counter: 0,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: EngineConfig) {
        self.config = config;
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut NodeRegistry {
        &mut self.registry
    }

    /// Graph-level notification bus
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self, sink: Arc<dyn EventSink>) -> SubscriptionId {
        self.events.subscribe(sink)
    }

    /// Notification bus of a single node
    pub fn node_events(&self, id: NodeId) -> Option<&EventBus> {
        self.nodes.get(&id).map(|slot| &slot.events)
    }

    pub fn subscribe_node(&self, id: NodeId, sink: Arc<dyn EventSink>) -> Result<SubscriptionId> {
        Ok(self.slot(id)?.events.subscribe(sink))
    }

    // ------------------------------------------------------------------
    // Nodes
    // ------------------------------------------------------------------

    /// Add a node under a generated `"<type> <n>"` name
    pub fn add_node(&mut self, node: Box<dyn Node>) -> Result<NodeId> {
        self.ensure_idle()?;
        let name = self.next_name(node.type_name());
        self.insert_node(name, node)
    }

    /// Add a node under an explicit, unique name
    pub fn add_node_named(&mut self, name: impl Into<String>, node: Box<dyn Node>) -> Result<NodeId> {
        self.ensure_idle()?;
        let name = name.into();
        if self.node_id(&name).is_some() {
            return Err(NodeEngineError::DuplicateName(name));
        }
        self.insert_node(name, node)
    }

    /// Instantiate a registered type and add it
    pub fn create_node(&mut self, type_name: &str) -> Result<NodeId> {
        let node = self
            .registry
            .create(type_name)
            .ok_or_else(|| NodeEngineError::UnknownNodeType(type_name.to_string()))?;
        self.add_node(node)
    }

    fn insert_node(&mut self, name: String, node: Box<dyn Node>) -> Result<NodeId> {
        self.next_id += 1;
        let id = NodeId::new(self.next_id);
        let node_type = node.type_name().to_string();
        self.nodes.insert(
            id,
            NodeSlot {
                name: name.clone(),
                node: share(node),
                events: EventBus::new(),
            },
        );
        log::debug!("Added node '{}' ({}) as {}", name, node_type, id);
        self.emit_node(
            id,
            GraphEvent::NodeAdded {
                node_id: id,
                name,
                node_type,
            },
        )?;
        Ok(id)
    }

    /// Remove a node and every connection touching it
    pub fn remove_node(&mut self, id: NodeId) -> Result<()> {
        self.ensure_idle()?;
        self.slot(id)?;

        let attached: Vec<Connection> = self
            .connections
            .values()
            .filter(|c| c.source == id || c.target == id)
            .cloned()
            .collect();
        let mut first_error = None;
        for connection in attached {
            if let Err(e) = self.detach(&connection) {
                log::warn!("Error while detaching {:?}: {}", connection, e);
                first_error.get_or_insert(e);
            }
        }

        let name = self.slot(id)?.name.clone();
        let notified = self.emit_node(
            id,
            GraphEvent::NodeRemoved {
                node_id: id,
                name: name.clone(),
            },
        );
        self.nodes.remove(&id);
        self.control.retract(id);
        log::debug!("Removed node '{}'", name);

        match first_error {
            Some(e) => Err(e),
            None => notified.map_err(Into::into),
        }
    }

    /// Change a node's display name; names stay unique
    pub fn rename_node(&mut self, id: NodeId, new_name: impl Into<String>) -> Result<()> {
        let new_name = new_name.into();
        if let Some(existing) = self.node_id(&new_name) {
            if existing == id {
                return Ok(());
            }
            return Err(NodeEngineError::DuplicateName(new_name));
        }
        let slot = self
            .nodes
            .get_mut(&id)
            .ok_or(NodeEngineError::NodeNotFound(id))?;
        let old_name = std::mem::replace(&mut slot.name, new_name.clone());
        self.emit_node(
            id,
            GraphEvent::NodeRenamed {
                node_id: id,
                old_name,
                new_name,
            },
        )?;
        Ok(())
    }

    pub fn node(&self, id: NodeId) -> Option<SharedNode> {
        self.nodes.get(&id).map(|slot| slot.node.clone())
    }

    pub fn node_id(&self, name: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .find(|(_, slot)| slot.name == name)
            .map(|(id, _)| *id)
    }

    pub fn node_name(&self, id: NodeId) -> Option<&str> {
        self.nodes.get(&id).map(|slot| slot.name.as_str())
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.keys().copied().collect()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Borrow a node for inspection
    ///
    /// Fails with `NodeBusy` while the node is being activated.
    pub fn with_node<R>(&self, id: NodeId, f: impl FnOnce(&dyn Node) -> R) -> Result<R> {
        let guard = self.lock(id)?;
        Ok(f(&**guard))
    }

    /// Borrow a node mutably, e.g. to edit its default inputs
    pub fn with_node_mut<R>(&self, id: NodeId, f: impl FnOnce(&mut dyn Node) -> R) -> Result<R> {
        let mut guard = self.lock(id)?;
        Ok(f(&mut **guard))
    }

    pub fn set_default_input(&self, id: NodeId, port: &str, value: serde_json::Value) -> Result<()> {
        self.with_node_mut(id, |node| {
            node.state_mut().default_inputs.insert(port.to_string(), value);
        })
    }

    pub fn set_static_input(&self, id: NodeId, port: &str, value: serde_json::Value) -> Result<()> {
        self.with_node_mut(id, |node| {
            node.state_mut().static_inputs.insert(port.to_string(), value);
        })
    }

    pub fn set_default_output(&self, id: NodeId, port: &str, value: serde_json::Value) -> Result<()> {
        self.with_node_mut(id, |node| {
            node.state_mut().default_outputs.insert(port.to_string(), value);
        })
    }

    // ------------------------------------------------------------------
    // Connections
    // ------------------------------------------------------------------

    pub fn connections(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// The connection feeding a target port, if any
    pub fn connection_into(&self, target: NodeId, target_port: &str) -> Option<&Connection> {
        self.connections.get(&(target, target_port.to_string()))
    }

    pub fn input_connections(&self, id: NodeId) -> Vec<&Connection> {
        self.connections.values().filter(|c| c.target == id).collect()
    }

    pub fn output_connections(&self, id: NodeId) -> Vec<&Connection> {
        self.connections.values().filter(|c| c.source == id).collect()
    }

    /// `"src.port -> dst.port"` using current instance names
    pub fn connection_key(&self, connection: &Connection) -> String {
        format!(
            "{}.{} -> {}.{}",
            self.node_name(connection.source).unwrap_or("?"),
            connection.source_port,
            self.node_name(connection.target).unwrap_or("?"),
            connection.target_port
        )
    }

    /// Check whether a connection could be added, without changing anything
    pub fn can_add_connection(
        &self,
        source: NodeId,
        source_port: &str,
        target: NodeId,
        target_port: &str,
    ) -> std::result::Result<(), ConnectionError> {
        validation::check_connection(self, source, source_port, target, target_port)
    }

    /// Wire `source.source_port` into `target.target_port`
    ///
    /// Any connection already feeding the target port is removed first,
    /// so subscribers see its disconnect before the new connect. When the
    /// new connection's hooks or notifications fail, the previous
    /// connection is put back. Outgoing connections of the target that its
    /// changed port types no longer allow are dropped afterwards.
    pub fn add_connection(
        &mut self,
        source: NodeId,
        source_port: &str,
        target: NodeId,
        target_port: &str,
    ) -> Result<Connection> {
        self.ensure_idle()?;
        self.can_add_connection(source, source_port, target, target_port)?;

        let connection = Connection::new(source, source_port, target, target_port);
        let (source_type, target_type) = self.endpoint_types(&connection)?;

        let previous = self.connection_into(target, target_port).cloned();
        if let Some(existing) = &previous {
            log::debug!("Replacing {}", self.connection_key(existing));
            if let Err(e) = self.detach(existing) {
                self.restore(existing);
                return Err(e);
            }
        }

        if let Err(e) = self.notify_connected(&connection, &source_type, &target_type) {
            self.report_failure(&connection, &e);
            self.unwind_hooks(&connection);
            if let Some(existing) = &previous {
                self.restore(existing);
            }
            return Err(e);
        }

        self.connections
            .insert((target, target_port.to_string()), connection.clone());
        log::debug!("Connected {}", self.connection_key(&connection));
        self.prune_stale_outputs(target);
        Ok(connection)
    }

    /// Remove the connection feeding a target port
    pub fn remove_connection(&mut self, target: NodeId, target_port: &str) -> Result<Connection> {
        self.ensure_idle()?;
        let connection = match self.connection_into(target, target_port) {
            Some(connection) => connection.clone(),
            None => {
                let node = self.slot(target)?.name.clone();
                return Err(ConnectionError::NotConnected {
                    node,
                    port: target_port.to_string(),
                }
                .into());
            }
        };
        self.detach(&connection)?;
        self.prune_stale_outputs(target);
        Ok(connection)
    }

    /// Drop a connection, then run hooks and notifications
    ///
    /// The connection is gone even when a hook or subscriber fails.
    fn detach(&mut self, connection: &Connection) -> Result<()> {
        let key = self.connection_key(connection);
        self.connections
            .remove(&(connection.target, connection.target_port.clone()));
        let result = self.notify_disconnected(connection);
        match &result {
            Ok(()) => log::debug!("Disconnected {}", key),
            Err(e) => self.report_failure(connection, e),
        }
        result
    }

    /// Declared types at both ends of a connection
    fn endpoint_types(&self, connection: &Connection) -> Result<(PortType, PortType)> {
        let (_, source_outputs) = self.ports(connection.source)?;
        let (target_inputs, _) = self.ports(connection.target)?;
        Ok((
            source_outputs
                .get(&connection.source_port)
                .cloned()
                .unwrap_or_default(),
            target_inputs
                .get(&connection.target_port)
                .cloned()
                .unwrap_or_default(),
        ))
    }

    /// Drop outgoing connections that a node's current ports no longer allow
    ///
    /// Hooks may change a node's output declarations. Each dropped
    /// connection disconnects its target, which is checked in turn.
    fn prune_stale_outputs(&mut self, id: NodeId) {
        let mut nodes = vec![id];
        while let Some(node) = nodes.pop() {
            let outputs = match self.ports(node) {
                Ok((_, outputs)) => outputs,
                Err(e) => {
                    log::warn!("Could not re-check outputs of {}: {}", node, e);
                    continue;
                }
            };
            let stale: Vec<Connection> = self
                .output_connections(node)
                .into_iter()
                .filter(|connection| {
                    let Some(source_type) = outputs.get(&connection.source_port) else {
                        return true;
                    };
                    match self.endpoint_types(connection) {
                        Ok((_, target_type)) => !can_connect(source_type, &target_type),
                        Err(_) => false,
                    }
                })
                .cloned()
                .collect();

            for connection in stale {
                log::warn!(
                    "Dropping {}: no longer matches the declared ports",
                    self.connection_key(&connection)
                );
                if let Err(e) = self.detach(&connection) {
                    log::warn!("Dropping {} reported: {}", self.connection_key(&connection), e);
                }
                nodes.push(connection.target);
            }
        }
    }

    /// Put back a connection dropped by a replacement that failed
    fn restore(&mut self, connection: &Connection) {
        let key = self.connection_key(connection);
        self.connections.insert(
            (connection.target, connection.target_port.clone()),
            connection.clone(),
        );
        let restored = self
            .endpoint_types(connection)
            .and_then(|(source_type, target_type)| {
                self.notify_connected(connection, &source_type, &target_type)
            });
        match restored {
            Ok(()) => log::debug!("Restored {}", key),
            Err(e) => log::warn!("Restored {} with errors: {}", key, e),
        }
    }

    /// Revert connect hooks of a connection that was never stored
    fn unwind_hooks(&self, connection: &Connection) {
        let results = [
            self.hook(connection.target, |node| {
                node.on_input_disconnected(&connection.target_port)
            }),
            self.hook(connection.source, |node| {
                node.on_output_disconnected(&connection.source_port)
            }),
        ];
        for result in results {
            if let Err(e) = result {
                log::warn!("Unwinding {} failed: {}", self.connection_key(connection), e);
            }
        }
    }

    fn notify_connected(
        &self,
        connection: &Connection,
        source_type: &PortType,
        target_type: &PortType,
    ) -> Result<()> {
        self.hook(connection.source, |node| {
            node.on_output_connected(&connection.source_port, target_type)
        })?;
        self.hook(connection.target, |node| {
            node.on_input_connected(&connection.target_port, source_type)
        })?;

        self.emit_node(
            connection.source,
            GraphEvent::OutputConnected {
                node_id: connection.source,
                port: connection.source_port.clone(),
                target: connection.target,
                target_port: connection.target_port.clone(),
            },
        )?;
        self.emit_node(
            connection.target,
            GraphEvent::InputConnected {
                node_id: connection.target,
                port: connection.target_port.clone(),
                source: connection.source,
                source_port: connection.source_port.clone(),
                source_type: source_type.clone(),
            },
        )?;
        self.events.emit(GraphEvent::ConnectionAdded {
            connection: connection.clone(),
        })?;
        Ok(())
    }

    fn notify_disconnected(&self, connection: &Connection) -> Result<()> {
        self.hook(connection.target, |node| {
            node.on_input_disconnected(&connection.target_port)
        })?;
        self.hook(connection.source, |node| {
            node.on_output_disconnected(&connection.source_port)
        })?;

        self.emit_node(
            connection.target,
            GraphEvent::InputDisconnected {
                node_id: connection.target,
                port: connection.target_port.clone(),
            },
        )?;
        self.emit_node(
            connection.source,
            GraphEvent::OutputDisconnected {
                node_id: connection.source,
                port: connection.source_port.clone(),
            },
        )?;
        self.events.emit(GraphEvent::ConnectionRemoved {
            connection: connection.clone(),
        })?;
        Ok(())
    }

    fn hook(
        &self,
        id: NodeId,
        f: impl FnOnce(&mut dyn Node) -> std::result::Result<(), crate::error::NodeError>,
    ) -> Result<()> {
        let name = self.slot(id)?.name.clone();
        let mut guard = self.lock(id)?;
        f(&mut **guard).map_err(|e| NodeEngineError::node(name, e))
    }

    /// Surface a connection failure on both endpoints' error channels
    fn report_failure(&self, connection: &Connection, error: &NodeEngineError) {
        log::warn!(
            "Connection {} failed: {}",
            self.connection_key(connection),
            error
        );
        for id in [connection.source, connection.target] {
            if let Err(e) = self.emit_node(id, GraphEvent::node_error(id, error)) {
                log::warn!("Could not deliver error notification for {}: {}", id, e);
            }
        }
    }

    // ------------------------------------------------------------------
    // Control surface
    // ------------------------------------------------------------------

    /// Start a run on a new tokio task
    ///
    /// Must be called from within a tokio runtime. Fails with
    /// `AlreadyRunning` when a run is active.
    pub fn run(&self) -> Result<RunHandle> {
        if !self.control.try_start() {
            return Err(NodeEngineError::AlreadyRunning);
        }

        let plan = match RunPlan::build(self) {
            Ok(plan) => plan,
            Err(e) => {
                self.control.finish();
                return Err(e);
            }
        };

        let scheduler = Scheduler::new(
            plan,
            self.control.clone(),
            self.events.clone(),
            self.config.clone(),
        );
        let run_id = scheduler.run_id().to_string();
        let guard = RunGuard::new(self.control.clone());
        let task = tokio::spawn(async move {
            let _guard = guard;
            scheduler.execute().await
        });
        Ok(RunHandle::new(
            run_id,
            task,
            self.control.clone(),
            self.events.clone(),
        ))
    }

    /// Run and wait for the outcome
    pub async fn run_to_completion(&self) -> Result<RunReport> {
        self.run()?.wait().await
    }

    /// Ask an active run to stop before its next iteration
    pub fn stop(&self) {
        if self.control.is_running() {
            log::info!("Stop requested");
        }
        self.control.request_stop();
    }

    pub fn is_running(&self) -> bool {
        self.control.is_running()
    }

    /// Snapshot of the latest results
    pub fn results(&self) -> RunResults {
        self.control.snapshot()
    }

    /// Discard run results, keeping the topology
    pub fn clear(&self) -> Result<()> {
        self.ensure_idle()?;
        self.control.clear_results();
        Ok(())
    }

    /// Remove every node and connection and restart name numbering
    pub fn reset(&mut self) -> Result<()> {
        self.ensure_idle()?;
        for id in self.node_ids() {
            self.remove_node(id)?;
        }
        self.name_counter = 0;
        self.control.clear_results();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Crate internals
    // ------------------------------------------------------------------

    pub(crate) fn ensure_idle(&self) -> Result<()> {
        if self.control.is_running() {
            return Err(NodeEngineError::AlreadyRunning);
        }
        Ok(())
    }

    pub(crate) fn slot(&self, id: NodeId) -> Result<&NodeSlot> {
        self.nodes.get(&id).ok_or(NodeEngineError::NodeNotFound(id))
    }

    pub(crate) fn slots(&self) -> impl Iterator<Item = (NodeId, &NodeSlot)> {
        self.nodes.iter().map(|(id, slot)| (*id, slot))
    }

    fn lock(&self, id: NodeId) -> Result<NodeGuard<'_>> {
        let slot = self.slot(id)?;
        slot.node
            .try_lock()
            .map_err(|_| NodeEngineError::NodeBusy(slot.name.clone()))
    }

    /// Input and output port maps of a node
    pub(crate) fn ports(&self, id: NodeId) -> std::result::Result<(PortMap, PortMap), ConnectionError> {
        let slot = self.nodes.get(&id).ok_or(ConnectionError::NodeNotFound(id))?;
        let guard = slot
            .node
            .try_lock()
            .map_err(|_| ConnectionError::NodeBusy(slot.name.clone()))?;
        Ok((guard.input_ports(), guard.output_ports()))
    }

    /// Send a node-scoped event to the node's bus and the graph bus
    pub(crate) fn emit_node(&self, id: NodeId, event: GraphEvent) -> std::result::Result<(), EventError> {
        let node_result = match self.nodes.get(&id) {
            Some(slot) => slot.events.emit(event.clone()),
            None => Ok(()),
        };
        let graph_result = self.events.emit(event);
        node_result.and(graph_result)
    }

    fn next_name(&mut self, type_name: &str) -> String {
        loop {
            self.name_counter += 1;
            let candidate = format!("{} {}", type_name, self.name_counter);
            if self.node_id(&candidate).is_none() {
                return candidate;
            }
        }
    }

    /// Continue numbering after the highest numeric name suffix in use
    pub(crate) fn sync_name_counter(&mut self) {
        let highest = self
            .nodes
            .values()
            .filter_map(|slot| trailing_number(&slot.name))
            .max()
            .unwrap_or(0);
        self.name_counter = self.name_counter.max(highest);
    }
}

/// Digits at the end of a name, e.g. `12` for `"Counter 12"`
fn trailing_number(name: &str) -> Option<u64> {
    let digits: String = name
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    digits.parse().ok()
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.nodes.values().map(|slot| slot.name.as_str()).collect();
        let connections: Vec<String> = self
            .connections
            .values()
            .map(|c| self.connection_key(c))
            .collect();
        f.debug_struct("Graph")
            .field("nodes", &names)
            .field("connections", &connections)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{FailingEventSink, VecEventSink};
    use crate::test_nodes::{AddOne, Constant, Picky};
    use serde_json::json;

    fn graph() -> Graph {
        Graph::new(NodeRegistry::new())
    }

    #[test]
    fn test_generated_names_are_unique() {
        let mut graph = graph();
        let a = graph.add_node(Box::new(Constant::new(1))).unwrap();
        let b = graph.add_node(Box::new(Constant::new(2))).unwrap();
        let c = graph.add_node(Box::new(AddOne::new())).unwrap();

        assert_eq!(graph.node_name(a), Some("Constant 1"));
        assert_eq!(graph.node_name(b), Some("Constant 2"));
        assert_eq!(graph.node_name(c), Some("Add One 3"));

        graph.rename_node(a, "Constant 4").unwrap();
        let d = graph.add_node(Box::new(Constant::new(3))).unwrap();
        assert_eq!(graph.node_name(d), Some("Constant 5"));
    }

    #[test]
    fn test_rename_keeps_connections() {
        let mut graph = graph();
        let a = graph.add_node(Box::new(Constant::new(1))).unwrap();
        let b = graph.add_node(Box::new(AddOne::new())).unwrap();
        graph.add_connection(a, "out", b, "in").unwrap();

        graph.rename_node(a, "Source").unwrap();
        let connection = graph.connection_into(b, "in").unwrap();
        assert_eq!(connection.source, a);
        assert_eq!(graph.connection_key(connection), "Source.out -> Add One 2.in");

        assert!(matches!(
            graph.rename_node(b, "Source"),
            Err(NodeEngineError::DuplicateName(_))
        ));
    }

    #[test]
    fn test_duplicate_explicit_name_rejected() {
        let mut graph = graph();
        graph.add_node_named("x", Box::new(Constant::new(1))).unwrap();
        assert!(matches!(
            graph.add_node_named("x", Box::new(Constant::new(1))),
            Err(NodeEngineError::DuplicateName(_))
        ));
    }

    #[test]
    fn test_create_node_from_registry() {
        let mut registry = NodeRegistry::new();
        registry.register("Add One", "Math", || Box::new(AddOne::new()));
        let mut graph = Graph::new(registry);

        let id = graph.create_node("Add One").unwrap();
        assert_eq!(graph.node_name(id), Some("Add One 1"));
        assert!(matches!(
            graph.create_node("Nope"),
            Err(NodeEngineError::UnknownNodeType(_))
        ));
    }

    #[test]
    fn test_fan_in_replaces_existing_connection() {
        let mut graph = graph();
        let a = graph.add_node(Box::new(Constant::new(1))).unwrap();
        let b = graph.add_node(Box::new(Constant::new(2))).unwrap();
        let x = graph.add_node(Box::new(AddOne::new())).unwrap();
        graph.add_connection(a, "out", x, "in").unwrap();

        let sink = Arc::new(VecEventSink::new());
        graph.subscribe(sink.clone());
        graph.add_connection(b, "out", x, "in").unwrap();

        assert_eq!(graph.input_connections(x).len(), 1);
        assert_eq!(graph.connection_into(x, "in").unwrap().source, b);
        assert!(graph.output_connections(a).is_empty());

        let events = sink.events();
        let disconnected = events
            .iter()
            .position(|e| matches!(e, GraphEvent::InputDisconnected { node_id, .. } if *node_id == x))
            .unwrap();
        let connected = events
            .iter()
            .position(|e| matches!(e, GraphEvent::InputConnected { node_id, source, .. } if *node_id == x && *source == b))
            .unwrap();
        assert!(disconnected < connected);
        assert!(events.iter().any(|e| matches!(e, GraphEvent::ConnectionRemoved { connection } if connection.source == a)));
    }

    #[test]
    fn test_rejected_connection_does_not_mutate() {
        let mut graph = graph();
        let a = graph.add_node(Box::new(Constant::new(1))).unwrap();
        let b = graph.add_node(Box::new(AddOne::new())).unwrap();
        let sink = Arc::new(VecEventSink::new());
        graph.subscribe(sink.clone());

        let err = graph.add_connection(a, "missing", b, "in").unwrap_err();
        assert!(matches!(
            err,
            NodeEngineError::Connection(ConnectionError::OutputNotFound { .. })
        ));
        assert_eq!(graph.connection_count(), 0);
        assert!(sink.events().is_empty());
    }

    #[test]
    fn test_node_events_go_to_node_and_graph_bus() {
        let mut graph = graph();
        let a = graph.add_node(Box::new(Constant::new(1))).unwrap();
        let b = graph.add_node(Box::new(AddOne::new())).unwrap();

        let node_sink = Arc::new(VecEventSink::new());
        let graph_sink = Arc::new(VecEventSink::new());
        graph.subscribe_node(b, node_sink.clone()).unwrap();
        graph.subscribe(graph_sink.clone());

        graph.add_connection(a, "out", b, "in").unwrap();

        assert_eq!(node_sink.events().len(), 1);
        assert!(matches!(node_sink.events()[0], GraphEvent::InputConnected { .. }));
        assert_eq!(graph_sink.events().len(), 3);
    }

    #[test]
    fn test_failing_subscriber_surfaces_error() {
        let mut graph = graph();
        let a = graph.add_node(Box::new(Constant::new(1))).unwrap();
        let b = graph.add_node(Box::new(AddOne::new())).unwrap();
        let errors = Arc::new(VecEventSink::new());
        graph.subscribe_node(a, Arc::new(FailingEventSink)).unwrap();
        graph.subscribe_node(b, errors.clone()).unwrap();

        let err = graph.add_connection(a, "out", b, "in").unwrap_err();
        assert!(matches!(err, NodeEngineError::Notification(_)));
        assert_eq!(graph.connection_count(), 0);
        assert!(errors
            .events()
            .iter()
            .any(|e| matches!(e, GraphEvent::NodeError { node_id, .. } if *node_id == b)));
    }

    #[test]
    fn test_failed_replacement_keeps_previous_connection() {
        let mut graph = graph();
        let a = graph.add_node(Box::new(Constant::new(1))).unwrap();
        let b = graph.add_node(Box::new(AddOne::new())).unwrap();
        let c = graph.add_node(Box::new(Constant::new(2))).unwrap();
        graph.add_connection(a, "out", b, "in").unwrap();

        let sink = Arc::new(VecEventSink::new());
        graph.subscribe(sink.clone());
        graph.subscribe_node(c, Arc::new(FailingEventSink)).unwrap();

        let err = graph.add_connection(c, "out", b, "in").unwrap_err();
        assert!(matches!(err, NodeEngineError::Notification(_)));
        assert_eq!(graph.connection_count(), 1);
        assert_eq!(graph.connection_into(b, "in").map(|wire| wire.source), Some(a));

        let last_change = sink
            .events()
            .into_iter()
            .filter(|e| {
                matches!(
                    e,
                    GraphEvent::ConnectionAdded { .. } | GraphEvent::ConnectionRemoved { .. }
                )
            })
            .last();
        assert!(matches!(
            last_change,
            Some(GraphEvent::ConnectionAdded { connection }) if connection.source == a
        ));
    }

    #[test]
    fn test_failing_hook_surfaces_error() {
        let mut graph = graph();
        let a = graph.add_node(Box::new(Constant::new(1))).unwrap();
        let p = graph.add_node(Box::new(Picky::new())).unwrap();
        let sink = Arc::new(VecEventSink::new());
        graph.subscribe(sink.clone());

        let err = graph.add_connection(a, "out", p, "in").unwrap_err();
        assert!(matches!(err, NodeEngineError::Node { .. }));
        assert_eq!(graph.connection_count(), 0);
        let error_events = sink
            .events()
            .into_iter()
            .filter(|e| matches!(e, GraphEvent::NodeError { .. }))
            .count();
        assert_eq!(error_events, 2);
    }

    #[test]
    fn test_remove_node_drops_connections() {
        let mut graph = graph();
        let a = graph.add_node(Box::new(Constant::new(1))).unwrap();
        let b = graph.add_node(Box::new(AddOne::new())).unwrap();
        let c = graph.add_node(Box::new(AddOne::new())).unwrap();
        graph.add_connection(a, "out", b, "in").unwrap();
        graph.add_connection(b, "out", c, "in").unwrap();

        let sink = Arc::new(VecEventSink::new());
        graph.subscribe(sink.clone());
        graph.remove_node(b).unwrap();

        assert!(!graph.contains(b));
        assert_eq!(graph.connection_count(), 0);
        let events = sink.events();
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, GraphEvent::ConnectionRemoved { .. }))
                .count(),
            2
        );
        assert!(matches!(events.last(), Some(GraphEvent::NodeRemoved { node_id, .. }) if *node_id == b));
        assert!(matches!(
            graph.remove_node(b),
            Err(NodeEngineError::NodeNotFound(_))
        ));
    }

    #[test]
    fn test_remove_connection() {
        let mut graph = graph();
        let a = graph.add_node(Box::new(Constant::new(1))).unwrap();
        let b = graph.add_node(Box::new(AddOne::new())).unwrap();
        graph.add_connection(a, "out", b, "in").unwrap();

        let removed = graph.remove_connection(b, "in").unwrap();
        assert_eq!(removed.source, a);
        assert!(matches!(
            graph.remove_connection(b, "in"),
            Err(NodeEngineError::Connection(ConnectionError::NotConnected { .. }))
        ));
    }

    #[test]
    fn test_set_default_input() {
        let mut graph = graph();
        let b = graph.add_node(Box::new(AddOne::new())).unwrap();
        graph.set_default_input(b, "in", json!(41)).unwrap();
        let value = graph
            .with_node(b, |node| node.state().default_inputs["in"].clone())
            .unwrap();
        assert_eq!(value, json!(41));
    }

    #[test]
    fn test_reset_restarts_numbering() {
        let mut graph = graph();
        graph.add_node(Box::new(Constant::new(1))).unwrap();
        graph.add_node(Box::new(Constant::new(1))).unwrap();
        graph.reset().unwrap();
        assert!(graph.is_empty());
        let id = graph.add_node(Box::new(Constant::new(1))).unwrap();
        assert_eq!(graph.node_name(id), Some("Constant 1"));
    }

    #[test]
    fn test_trailing_number() {
        assert_eq!(trailing_number("Counter 12"), Some(12));
        assert_eq!(trailing_number("Counter"), None);
        assert_eq!(trailing_number("7"), Some(7));
    }
}
