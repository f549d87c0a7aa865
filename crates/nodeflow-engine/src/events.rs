//! Notifications emitted by graphs and nodes
//!
//! Every node and every graph owns an [`EventBus`]. Collaborators (an
//! editor, a host application, tests) subscribe an [`EventSink`] to mirror
//! structural changes and follow run progress. Notifications have no
//! bearing on scheduling.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::graph::Connection;
use crate::node::Progress;
use crate::types::{NodeId, PortType};

/// Trait for receiving graph events
///
/// This abstracts over the transport mechanism (channel, log, UI bridge)
/// so the engine can be embedded in different hosts.
pub trait EventSink: Send + Sync {
    /// Send an event
    ///
    /// Returns an error if the event could not be delivered (e.g., channel closed)
    fn send(&self, event: GraphEvent) -> Result<(), EventError>;
}

/// Error when sending events fails
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventError {
    pub message: String,
}

impl std::fmt::Display for EventError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Event error: {}", self.message)
    }
}

impl std::error::Error for EventError {}

impl EventError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn channel_closed() -> Self {
        Self::new("Channel closed")
    }
}

/// How a run ended, as reported in [`GraphEvent::RunFinished`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RunStatus {
    Finished,
    Stopped,
    Deadlock,
    Incomplete,
    Failed,
}

/// Events emitted for structural changes and run progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum GraphEvent {
    #[serde(rename_all = "camelCase")]
    NodeAdded {
        node_id: NodeId,
        name: String,
        node_type: String,
    },

    #[serde(rename_all = "camelCase")]
    NodeRemoved { node_id: NodeId, name: String },

    #[serde(rename_all = "camelCase")]
    NodeRenamed {
        node_id: NodeId,
        old_name: String,
        new_name: String,
    },

    ConnectionAdded { connection: Connection },

    ConnectionRemoved { connection: Connection },

    /// Sent on the target node's bus
    #[serde(rename_all = "camelCase")]
    InputConnected {
        node_id: NodeId,
        port: String,
        source: NodeId,
        source_port: String,
        source_type: PortType,
    },

    #[serde(rename_all = "camelCase")]
    InputDisconnected { node_id: NodeId, port: String },

    /// Sent on the source node's bus
    #[serde(rename_all = "camelCase")]
    OutputConnected {
        node_id: NodeId,
        port: String,
        target: NodeId,
        target_port: String,
    },

    #[serde(rename_all = "camelCase")]
    OutputDisconnected { node_id: NodeId, port: String },

    #[serde(rename_all = "camelCase")]
    NodeInit { node_id: NodeId },

    #[serde(rename_all = "camelCase")]
    NodeInitFinished { node_id: NodeId },

    /// The node entered the ready queue
    #[serde(rename_all = "camelCase")]
    NodeReady { node_id: NodeId },

    #[serde(rename_all = "camelCase")]
    NodeRun { node_id: NodeId },

    #[serde(rename_all = "camelCase")]
    NodeRunFinished { node_id: NodeId },

    /// Work done by the node so far, sent when it changes
    #[serde(rename_all = "camelCase")]
    NodeProgress {
        node_id: NodeId,
        current: u64,
        total: u64,
    },

    #[serde(rename_all = "camelCase")]
    NodeError { node_id: NodeId, error: String },

    #[serde(rename_all = "camelCase")]
    RunStarted { run_id: String },

    #[serde(rename_all = "camelCase")]
    RunFinished { run_id: String, status: RunStatus },

    /// Graph-level error channel
    #[serde(rename_all = "camelCase")]
    GraphError {
        run_id: Option<String>,
        node_id: Option<NodeId>,
        error: String,
    },
}

impl GraphEvent {
    /// The node this event is about, if any
    pub fn node_id(&self) -> Option<NodeId> {
        match self {
            Self::NodeAdded { node_id, .. }
            | Self::NodeRemoved { node_id, .. }
            | Self::NodeRenamed { node_id, .. }
            | Self::InputConnected { node_id, .. }
            | Self::InputDisconnected { node_id, .. }
            | Self::OutputConnected { node_id, .. }
            | Self::OutputDisconnected { node_id, .. }
            | Self::NodeInit { node_id }
            | Self::NodeInitFinished { node_id }
            | Self::NodeReady { node_id }
            | Self::NodeRun { node_id }
            | Self::NodeRunFinished { node_id }
            | Self::NodeProgress { node_id, .. }
            | Self::NodeError { node_id, .. } => Some(*node_id),
            Self::GraphError { node_id, .. } => *node_id,
            Self::ConnectionAdded { .. }
            | Self::ConnectionRemoved { .. }
            | Self::RunStarted { .. }
            | Self::RunFinished { .. } => None,
        }
    }

    pub fn node_progress(node_id: NodeId, progress: Progress) -> Self {
        Self::NodeProgress {
            node_id,
            current: progress.current,
            total: progress.total,
        }
    }

    pub fn node_error(node_id: NodeId, error: impl ToString) -> Self {
        Self::NodeError {
            node_id,
            error: error.to_string(),
        }
    }
}

/// Handle returned by [`EventBus::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Multi-subscriber fan-out of events
///
/// Cloning a bus yields another handle to the same subscriber list.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

#[derive(Default)]
struct BusInner {
    next_id: AtomicU64,
    sinks: RwLock<Vec<(SubscriptionId, Arc<dyn EventSink>)>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, sink: Arc<dyn EventSink>) -> SubscriptionId {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner.sinks.write().push((id, sink));
        id
    }

    /// Remove a subscriber; returns false when it was not subscribed
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut sinks = self.inner.sinks.write();
        let before = sinks.len();
        sinks.retain(|(sid, _)| *sid != id);
        sinks.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.sinks.read().len()
    }

    /// Deliver an event to every subscriber
    ///
    /// All subscribers are notified even if one fails; the first failure
    /// is returned.
    pub fn emit(&self, event: GraphEvent) -> Result<(), EventError> {
        let sinks: Vec<Arc<dyn EventSink>> = self
            .inner
            .sinks
            .read()
            .iter()
            .map(|(_, sink)| sink.clone())
            .collect();

        let mut first_error = None;
        for sink in sinks {
            if let Err(e) = sink.send(event.clone()) {
                log::warn!("Event sink rejected {:?}: {}", event, e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// A no-op event sink that discards all events
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn send(&self, _event: GraphEvent) -> Result<(), EventError> {
        Ok(())
    }
}

/// A vector-based event sink that collects events
///
/// Useful for testing to verify events were emitted correctly.
#[derive(Default)]
pub struct VecEventSink {
    events: Mutex<Vec<GraphEvent>>,
}

impl VecEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all collected events
    pub fn events(&self) -> Vec<GraphEvent> {
        self.events.lock().clone()
    }

    /// Clear all collected events
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for VecEventSink {
    fn send(&self, event: GraphEvent) -> Result<(), EventError> {
        self.events.lock().push(event);
        Ok(())
    }
}

#[cfg(test)]
pub(crate) struct FailingEventSink;

#[cfg(test)]
impl EventSink for FailingEventSink {
    fn send(&self, _event: GraphEvent) -> Result<(), EventError> {
        Err(EventError::channel_closed())
    }
}
