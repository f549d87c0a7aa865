//! Run loop
//!
//! The scheduler works on a [`RunPlan`], a snapshot of the topology and port
//! declarations taken when the run starts. It owns all per-run state, so
//! none of it needs locking; the outside world only sees the shared
//! [`RunControl`] block.
//!
//! # Algorithm
//!
//! 1. Every node without input connections is queued with priority 0.
//! 2. Every node that is not lazy is initialized.
//! 3. Until stopped or out of work: dequeue the lowest priority, activate
//!    it, and mark its downstream nodes as scheduled. The priority of a node
//!    is the iteration at which it was first scheduled. When the queue runs
//!    dry, scheduled nodes that can now run are queued (highest priority
//!    first), and failing that the innermost generator producer that still
//!    has output is queued again.
//!
//! An activation gathers inputs (recomputing non-cache upstreams just in
//! time), runs the node, checks its outputs against its declaration and
//! updates the generator bookkeeping. Node calls run on their own task, so
//! a panicking node fails the run like any other node error. A node's
//! reported progress is read after each `run` and sent when it changes.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::error::{NodeEngineError, NodeError, Result};
use crate::events::{EventBus, GraphEvent};
use crate::graph::{Connection, Graph};
use crate::node::{Progress, SharedNode};
use crate::run::{join_message, RunControl, RunOutcome, RunReport};
use crate::types::{NodeId, PortKind, PortMap, PortValue, PortValues};

/// A node as seen by one run
pub(crate) struct PlannedNode {
    name: String,
    node: SharedNode,
    events: EventBus,
    inputs: PortMap,
    outputs: PortMap,
    cache_enabled: bool,
    lazy_init: bool,
}

/// Topology snapshot a run executes against
pub(crate) struct RunPlan {
    nodes: BTreeMap<NodeId, PlannedNode>,
    incoming: HashMap<NodeId, Vec<Connection>>,
    outgoing: HashMap<NodeId, Vec<Connection>>,
}

impl RunPlan {
    pub(crate) fn build(graph: &Graph) -> Result<Self> {
        let mut nodes = BTreeMap::new();
        for (id, slot) in graph.slots() {
            let guard = slot
                .node
                .try_lock()
                .map_err(|_| NodeEngineError::NodeBusy(slot.name.clone()))?;
            nodes.insert(
                id,
                PlannedNode {
                    name: slot.name.clone(),
                    node: slot.node.clone(),
                    events: slot.events.clone(),
                    inputs: guard.input_ports(),
                    outputs: guard.output_ports(),
                    cache_enabled: guard.cache_enabled(),
                    lazy_init: guard.lazy_init(),
                },
            );
        }

        let mut incoming: HashMap<NodeId, Vec<Connection>> = HashMap::new();
        let mut outgoing: HashMap<NodeId, Vec<Connection>> = HashMap::new();
        for connection in graph.connections() {
            incoming
                .entry(connection.target)
                .or_default()
                .push(connection.clone());
            outgoing
                .entry(connection.source)
                .or_default()
                .push(connection.clone());
        }

        Ok(Self {
            nodes,
            incoming,
            outgoing,
        })
    }

    fn incoming(&self, id: NodeId) -> &[Connection] {
        self.incoming.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    fn outgoing(&self, id: NodeId) -> &[Connection] {
        self.outgoing.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    fn cache_enabled(&self, id: NodeId) -> bool {
        self.nodes.get(&id).map_or(true, |n| n.cache_enabled)
    }

    /// Kind of the port a connection feeds; undeclared ports count as values
    fn target_kind(&self, connection: &Connection) -> PortKind {
        self.nodes
            .get(&connection.target)
            .and_then(|n| n.inputs.get(&connection.target_port))
            .map(|port| port.kind)
            .unwrap_or_default()
    }

    fn generator_outputs(&self, id: NodeId) -> Vec<String> {
        self.nodes
            .get(&id)
            .map(|n| {
                n.outputs
                    .iter()
                    .filter(|(_, port)| port.kind == PortKind::Generator)
                    .map(|(name, _)| name.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn name(&self, id: NodeId) -> &str {
        self.nodes.get(&id).map_or("?", |n| n.name.as_str())
    }
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct QueueEntry {
    priority: u64,
    sequence: u64,
    node: NodeId,
}

/// A fatal error attributed to the node that caused it
struct RunFailure {
    node: Option<NodeId>,
    error: NodeEngineError,
}

impl RunFailure {
    fn new(node: NodeId, error: NodeEngineError) -> Self {
        Self {
            node: Some(node),
            error,
        }
    }
}

type Activation<'a> = Pin<Box<dyn Future<Output = std::result::Result<(), RunFailure>> + Send + 'a>>;

pub(crate) struct Scheduler {
    run_id: String,
    plan: RunPlan,
    control: Arc<RunControl>,
    events: EventBus,
    config: EngineConfig,

    results: HashMap<NodeId, PortValues>,
    pending_generator_inputs: HashSet<NodeId>,
    pending_generator_outputs: HashSet<NodeId>,
    /// Generator ports whose stream ended behind a value node
    ended_inputs: HashMap<NodeId, HashSet<String>>,
    /// Last progress sent per node
    progress: HashMap<NodeId, Progress>,
    priority: HashMap<NodeId, u64>,
    queue: BinaryHeap<Reverse<QueueEntry>>,
    queued: HashSet<NodeId>,
    scheduled: HashSet<NodeId>,
    initialized: HashSet<NodeId>,
    activations: BTreeMap<NodeId, u64>,
    total_activations: u64,
    sequence: u64,
    iteration: u64,
}

impl Scheduler {
    pub(crate) fn new(
        plan: RunPlan,
        control: Arc<RunControl>,
        events: EventBus,
        config: EngineConfig,
    ) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            plan,
            control,
            events,
            config,
            results: HashMap::new(),
            pending_generator_inputs: HashSet::new(),
            pending_generator_outputs: HashSet::new(),
            ended_inputs: HashMap::new(),
            progress: HashMap::new(),
            priority: HashMap::new(),
            queue: BinaryHeap::new(),
            queued: HashSet::new(),
            scheduled: HashSet::new(),
            initialized: HashSet::new(),
            activations: BTreeMap::new(),
            total_activations: 0,
            sequence: 0,
            iteration: 0,
        }
    }

    pub(crate) fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Drive the run to completion and release the running flag
    pub(crate) async fn execute(mut self) -> RunReport {
        log::info!(
            "Run {} started with {} nodes",
            self.run_id,
            self.plan.nodes.len()
        );
        self.emit(GraphEvent::RunStarted {
            run_id: self.run_id.clone(),
        });

        let outcome = match self.run_loop().await {
            Ok(outcome) => outcome,
            Err(failure) => self.fail(failure),
        };

        match &outcome {
            RunOutcome::Finished => log::info!(
                "Run {} finished after {} activations",
                self.run_id,
                self.total_activations
            ),
            RunOutcome::Stopped => log::info!("Run {} stopped", self.run_id),
            RunOutcome::Deadlock { stranded } => {
                let names: Vec<&str> = stranded.iter().map(|id| self.plan.name(*id)).collect();
                log::warn!("Run {} deadlocked, stranded: {:?}", self.run_id, names);
            }
            RunOutcome::Incomplete { pending } => {
                let names: Vec<&str> = pending.iter().map(|id| self.plan.name(*id)).collect();
                log::warn!("Run {} ended with pending outputs: {:?}", self.run_id, names);
            }
            RunOutcome::Failed { error, .. } => {
                log::error!("Run {} failed: {}", self.run_id, error)
            }
        }
        if !self.pending_generator_inputs.is_empty() {
            log::debug!(
                "Run {} ended with {} consumers still expecting generator input",
                self.run_id,
                self.pending_generator_inputs.len()
            );
        }

        let report = RunReport {
            run_id: self.run_id.clone(),
            outcome: outcome.clone(),
            results: std::mem::take(&mut self.results).into_iter().collect(),
            activations: std::mem::take(&mut self.activations),
        };

        self.control.finish();
        self.emit(GraphEvent::RunFinished {
            run_id: self.run_id.clone(),
            status: outcome.status(),
        });
        report
    }

    async fn run_loop(&mut self) -> std::result::Result<RunOutcome, RunFailure> {
        let roots: Vec<NodeId> = self
            .plan
            .nodes
            .keys()
            .copied()
            .filter(|id| self.plan.incoming(*id).is_empty())
            .collect();
        for id in roots {
            self.priority.insert(id, 0);
            self.enqueue(id);
        }

        let eager: Vec<NodeId> = self
            .plan
            .nodes
            .iter()
            .filter(|(_, node)| !node.lazy_init)
            .map(|(id, _)| *id)
            .collect();
        for id in eager {
            self.init_node(id).await?;
        }

        loop {
            if self.control.stop_requested() {
                return Ok(RunOutcome::Stopped);
            }
            let Some(id) = self.dequeue() else {
                break;
            };

            self.iteration += 1;
            self.activate(id).await?;
            self.schedule_downstream(id);

            if self.queue.is_empty() {
                self.promote_scheduled();
            }
            if self.queue.is_empty() {
                if let Some(producer) = self.innermost_pending_producer() {
                    log::debug!("Resuming generator '{}'", self.plan.name(producer));
                    self.enqueue(producer);
                }
            }

            if self.config.yield_every_iteration {
                tokio::task::yield_now().await;
            }
        }

        Ok(self.settle())
    }

    /// Outcome of a loop that ran out of work
    fn settle(&self) -> RunOutcome {
        let stranded = self.stranded_nodes();
        if !stranded.is_empty() {
            return RunOutcome::Deadlock { stranded };
        }
        let pending = self.pending_nodes();
        if !pending.is_empty() {
            return RunOutcome::Incomplete { pending };
        }
        RunOutcome::Finished
    }

    // ------------------------------------------------------------------
    // Queue management
    // ------------------------------------------------------------------

    fn priority_of(&self, id: NodeId) -> u64 {
        self.priority.get(&id).copied().unwrap_or(0)
    }

    fn enqueue(&mut self, id: NodeId) {
        if !self.queued.insert(id) {
            return;
        }
        self.sequence += 1;
        self.queue.push(Reverse(QueueEntry {
            priority: self.priority_of(id),
            sequence: self.sequence,
            node: id,
        }));
        self.emit_node(id, GraphEvent::NodeReady { node_id: id });
    }

    fn dequeue(&mut self) -> Option<NodeId> {
        let Reverse(entry) = self.queue.pop()?;
        self.queued.remove(&entry.node);
        Some(entry.node)
    }

    fn schedule_downstream(&mut self, id: NodeId) {
        for connection in self.plan.outgoing(id) {
            self.priority
                .entry(connection.target)
                .or_insert(self.iteration);
            self.scheduled.insert(connection.target);
        }
    }

    /// Queue every scheduled node that can run, highest priority first
    fn promote_scheduled(&mut self) {
        let mut candidates: Vec<NodeId> = self.scheduled.iter().copied().collect();
        candidates.sort_by_key(|id| (Reverse(self.priority_of(*id)), *id));
        for id in candidates {
            if self.can_run(id) {
                self.scheduled.remove(&id);
                self.enqueue(id);
            }
        }
    }

    /// The pending producer discovered last
    fn innermost_pending_producer(&self) -> Option<NodeId> {
        self.pending_generator_outputs
            .iter()
            .copied()
            .max_by_key(|id| (self.priority_of(*id), Reverse(*id)))
    }

    // ------------------------------------------------------------------
    // Readiness
    // ------------------------------------------------------------------

    /// Whether every gating input of `id` has a usable value
    fn can_run(&self, id: NodeId) -> bool {
        self.plan.incoming(id).iter().all(|connection| {
            let kind = self.plan.target_kind(connection);
            if kind == PortKind::Event || self.is_ended(id, &connection.target_port) {
                return true;
            }
            match self.results.get(&connection.source) {
                None => !self.plan.cache_enabled(connection.source) && self.can_run(connection.source),
                Some(outputs) => match outputs.get(&connection.source_port) {
                    Some(PortValue::Pending) => false,
                    Some(PortValue::Exhausted) => kind == PortKind::Generator,
                    _ => true,
                },
            }
        })
    }

    /// Nodes that never ran although they could, with all upstreams done
    fn stranded_nodes(&self) -> Vec<NodeId> {
        self.plan
            .nodes
            .keys()
            .copied()
            .filter(|id| !self.activations.contains_key(id))
            .filter(|id| {
                self.plan.incoming(*id).iter().all(|c| {
                    self.activations.contains_key(&c.source) || self.results.contains_key(&c.source)
                })
            })
            .filter(|id| self.can_run(*id))
            .collect()
    }

    /// Nodes whose latest result still holds back an output
    fn pending_nodes(&self) -> Vec<NodeId> {
        let mut pending: Vec<NodeId> = self
            .results
            .iter()
            .filter(|(_, outputs)| outputs.values().any(PortValue::is_pending))
            .map(|(id, _)| *id)
            .collect();
        pending.sort();
        pending
    }

    fn is_ended(&self, id: NodeId, port: &str) -> bool {
        self.ended_inputs
            .get(&id)
            .is_some_and(|ports| ports.contains(port))
    }

    // ------------------------------------------------------------------
    // Activation
    // ------------------------------------------------------------------

    fn planned(&self, id: NodeId) -> std::result::Result<&PlannedNode, RunFailure> {
        self.plan
            .nodes
            .get(&id)
            .ok_or_else(|| RunFailure::new(id, NodeEngineError::NodeNotFound(id)))
    }

    async fn init_node(&mut self, id: NodeId) -> std::result::Result<(), RunFailure> {
        if !self.initialized.insert(id) {
            return Ok(());
        }
        let planned = self.planned(id)?;
        let node = planned.node.clone();
        let name = planned.name.clone();

        self.emit_node(id, GraphEvent::NodeInit { node_id: id });
        let result = tokio::spawn(async move {
            let mut guard = node.lock_owned().await;
            guard.init().await
        })
        .await
        .unwrap_or_else(|e| Err(NodeError::Panicked(join_message(e))));
        result.map_err(|e| RunFailure::new(id, NodeEngineError::node(name, e)))?;
        self.emit_node(id, GraphEvent::NodeInitFinished { node_id: id });
        Ok(())
    }

    /// Run one node, recomputing its non-cache upstreams first
    ///
    /// Boxed because gathering inputs may activate upstream nodes.
    fn activate(&mut self, id: NodeId) -> Activation<'_> {
        Box::pin(async move {
            if let Some(limit) = self.config.max_activations {
                if self.total_activations >= limit {
                    return Err(RunFailure::new(id, NodeEngineError::ActivationLimit(limit)));
                }
            }

            let planned = self.planned(id)?;
            let node = planned.node.clone();
            let name = planned.name.clone();
            let declared = planned.outputs.clone();
            if planned.lazy_init {
                self.init_node(id).await?;
            }

            let inputs = self.gather_inputs(id, &node).await?;

            log::debug!("Activating '{}'", name);
            self.emit_node(id, GraphEvent::NodeRun { node_id: id });
            let call_inputs = inputs.clone();
            let (result, progress) = tokio::spawn(async move {
                let mut guard = node.lock_owned().await;
                let result = guard.run(call_inputs).await;
                (result, guard.progress())
            })
            .await
            .unwrap_or_else(|e| (Err(NodeError::Panicked(join_message(e))), None));
            let outputs = result.map_err(|e| RunFailure::new(id, NodeEngineError::node(&name, e)))?;
            check_outputs(&name, &declared, &outputs).map_err(|e| RunFailure::new(id, e))?;

            self.total_activations += 1;
            *self.activations.entry(id).or_insert(0) += 1;
            self.emit_node(id, GraphEvent::NodeRunFinished { node_id: id });
            if let Some(progress) = progress {
                self.report_progress(id, progress);
            }

            self.ended_inputs.remove(&id);
            self.track_generator_outputs(id, &outputs);
            self.track_generator_inputs(id, &inputs);
            self.control.publish(id, outputs.clone());
            self.results.insert(id, outputs);
            self.release_uncached_upstreams(id);
            Ok(())
        })
    }

    fn report_progress(&mut self, id: NodeId, progress: Progress) {
        if self.progress.insert(id, progress) == Some(progress) {
            return;
        }
        log::debug!(
            "'{}' progress {}/{}",
            self.plan.name(id),
            progress.current,
            progress.total
        );
        self.emit_node(id, GraphEvent::node_progress(id, progress));
    }

    /// Collect a node's inputs from upstream results and its defaults
    ///
    /// Non-cache upstreams are recomputed for every consuming activation.
    async fn gather_inputs(
        &mut self,
        id: NodeId,
        node: &SharedNode,
    ) -> std::result::Result<PortValues, RunFailure> {
        let defaults = node.lock().await.state().default_inputs.clone();
        let mut inputs: PortValues = defaults
            .into_iter()
            .map(|(port, value)| (port, PortValue::Data(value)))
            .collect();

        let connections = self.plan.incoming(id).to_vec();
        for connection in connections {
            if self.is_ended(id, &connection.target_port) {
                inputs.insert(connection.target_port.clone(), PortValue::Exhausted);
                continue;
            }
            let source = connection.source;
            if !self.plan.cache_enabled(source) && self.can_run(source) {
                log::debug!(
                    "Recomputing '{}' for '{}'",
                    self.plan.name(source),
                    self.plan.name(id)
                );
                self.activate(source).await?;
            }

            let kind = self.plan.target_kind(&connection);
            let upstream = self
                .results
                .get(&source)
                .and_then(|outputs| outputs.get(&connection.source_port))
                .cloned();
            let value = match (upstream, kind) {
                (Some(PortValue::Exhausted), PortKind::Value) => PortValue::null(),
                (Some(value), _) => value,
                (None, PortKind::Event) => PortValue::Exhausted,
                (None, _) => {
                    log::warn!(
                        "No value from '{}.{}' for '{}.{}'",
                        self.plan.name(source),
                        connection.source_port,
                        self.plan.name(id),
                        connection.target_port
                    );
                    continue;
                }
            };
            inputs.insert(connection.target_port.clone(), value);
        }

        Ok(inputs)
    }

    // ------------------------------------------------------------------
    // Generator bookkeeping
    // ------------------------------------------------------------------

    fn track_generator_outputs(&mut self, id: NodeId, outputs: &PortValues) {
        let ports = self.plan.generator_outputs(id);
        if ports.is_empty() {
            return;
        }

        let was_pending = self.pending_generator_outputs.contains(&id);
        let live = ports
            .iter()
            .any(|port| !outputs.get(port).is_some_and(PortValue::is_exhausted));
        if live {
            self.pending_generator_outputs.insert(id);
        } else {
            self.pending_generator_outputs.remove(&id);
        }

        if was_pending {
            for port in ports {
                if outputs.get(&port).is_some_and(PortValue::is_exhausted) {
                    self.end_streams_behind_values(id, &port);
                    self.close_generator_consumers(id, port);
                }
            }
        }
    }

    /// Carry the end of a stream through the value nodes it fed
    ///
    /// A value input that sees `Exhausted` keeps its node from running again,
    /// so a generator consumer further down would never see the stream end.
    /// Every such consumer still mid-stream is handed `Exhausted` on the
    /// port it reads and scheduled.
    fn end_streams_behind_values(&mut self, producer: NodeId, port: &str) {
        let mut stack: Vec<NodeId> = self
            .plan
            .outgoing(producer)
            .iter()
            .filter(|c| c.source_port == port && self.plan.target_kind(c) == PortKind::Value)
            .map(|c| c.target)
            .collect();
        let mut visited = HashSet::new();

        while let Some(node) = stack.pop() {
            if !visited.insert(node) {
                continue;
            }
            for connection in self.plan.outgoing(node).to_vec() {
                match self.plan.target_kind(&connection) {
                    PortKind::Value => stack.push(connection.target),
                    PortKind::Event => {}
                    PortKind::Generator => {
                        let consumer = connection.target;
                        if !self.pending_generator_inputs.contains(&consumer) {
                            continue;
                        }
                        log::debug!(
                            "Stream through '{}' ended for '{}'",
                            self.plan.name(node),
                            self.plan.name(consumer)
                        );
                        self.ended_inputs
                            .entry(consumer)
                            .or_default()
                            .insert(connection.target_port);
                        self.priority.entry(consumer).or_insert(self.iteration);
                        self.scheduled.insert(consumer);
                    }
                }
            }
        }
    }

    /// Release consumers that were only waiting on an exhausted stream
    ///
    /// Pass-through generators are closed recursively. Consumers still get
    /// their exhaustion pass through normal scheduling.
    fn close_generator_consumers(&mut self, producer: NodeId, port: String) {
        let mut stack = vec![(producer, port)];
        let mut closed = HashSet::new();

        while let Some((source, port)) = stack.pop() {
            let consumers: Vec<NodeId> = self
                .plan
                .outgoing(source)
                .iter()
                .filter(|c| c.source_port == port && self.plan.target_kind(c) == PortKind::Generator)
                .map(|c| c.target)
                .collect();

            for consumer in consumers {
                if !self.pending_generator_inputs.remove(&consumer) || !closed.insert(consumer) {
                    continue;
                }
                log::debug!(
                    "Generator '{}' closed for '{}'",
                    self.plan.name(source),
                    self.plan.name(consumer)
                );
                if self.pending_generator_outputs.remove(&consumer) {
                    for next in self.plan.generator_outputs(consumer) {
                        stack.push((consumer, next));
                    }
                }
            }
        }
    }

    fn track_generator_inputs(&mut self, id: NodeId, inputs: &PortValues) {
        for connection in self.plan.incoming(id) {
            if self.plan.target_kind(connection) != PortKind::Generator {
                continue;
            }
            match inputs.get(&connection.target_port) {
                Some(PortValue::Exhausted) => {
                    self.pending_generator_inputs.remove(&id);
                }
                Some(_) => {
                    self.pending_generator_inputs.insert(id);
                }
                None => {}
            }
        }
    }

    fn release_uncached_upstreams(&mut self, id: NodeId) {
        for connection in self.plan.incoming(id) {
            let source = connection.source;
            if !self.plan.cache_enabled(source) && self.results.remove(&source).is_some() {
                self.control.retract(source);
            }
        }
    }

    // ------------------------------------------------------------------
    // Notifications
    // ------------------------------------------------------------------

    fn fail(&mut self, failure: RunFailure) -> RunOutcome {
        let error = failure.error.to_string();
        if let Some(id) = failure.node {
            self.emit_node(id, GraphEvent::node_error(id, &error));
        }
        self.emit(GraphEvent::GraphError {
            run_id: Some(self.run_id.clone()),
            node_id: failure.node,
            error: error.clone(),
        });
        RunOutcome::Failed {
            node: failure.node,
            error,
        }
    }

    fn emit(&self, event: GraphEvent) {
        if let Err(e) = self.events.emit(event) {
            log::warn!("Run {}: notification failed: {}", self.run_id, e);
        }
    }

    /// Node-scoped events go to the node's bus and the graph bus
    fn emit_node(&self, id: NodeId, event: GraphEvent) {
        if let Some(planned) = self.plan.nodes.get(&id) {
            if let Err(e) = planned.events.emit(event.clone()) {
                log::warn!("Run {}: notification for '{}' failed: {}", self.run_id, planned.name, e);
            }
        }
        self.emit(event);
    }
}

/// A result must hold exactly the declared outputs
fn check_outputs(name: &str, declared: &PortMap, outputs: &PortValues) -> Result<()> {
    if let Some(port) = declared.keys().find(|port| !outputs.contains_key(*port)) {
        return Err(NodeEngineError::MissingOutput {
            node: name.to_string(),
            port: port.clone(),
        });
    }
    if let Some(port) = outputs.keys().find(|port| !declared.contains_key(*port)) {
        return Err(NodeEngineError::UnexpectedOutput {
            node: name.to_string(),
            port: port.clone(),
        });
    }
    Ok(())
}
