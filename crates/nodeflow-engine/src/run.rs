//! Run handles and outcomes
//!
//! A run executes on its own tokio task. The graph and the [`RunHandle`]
//! share a [`RunControl`] block through which callers poll, stop and read
//! the latest results while the run is in flight.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::task::{JoinError, JoinHandle};

use crate::error::{NodeEngineError, Result};
use crate::events::{EventBus, GraphEvent, RunStatus};
use crate::types::{NodeId, PortValue, PortValues};

/// Results keyed by node
pub type RunResults = BTreeMap<NodeId, PortValues>;

/// Thread-safe state shared between a graph, its scheduler and run handles
#[derive(Debug, Default)]
pub(crate) struct RunControl {
    running: AtomicBool,
    stop_requested: AtomicBool,
    results: RwLock<RunResults>,
}

impl RunControl {
    /// Claim the running flag; false when a run is already active
    pub(crate) fn try_start(&self) -> bool {
        if self.running.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.stop_requested.store(false, Ordering::SeqCst);
        self.results.write().clear();
        true
    }

    pub(crate) fn finish(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub(crate) fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    pub(crate) fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    pub(crate) fn publish(&self, node: NodeId, outputs: PortValues) {
        self.results.write().insert(node, outputs);
    }

    pub(crate) fn retract(&self, node: NodeId) {
        self.results.write().remove(&node);
    }

    pub(crate) fn snapshot(&self) -> RunResults {
        self.results.read().clone()
    }

    pub(crate) fn clear_results(&self) {
        self.results.write().clear();
    }
}

/// Releases the running flag when the run task ends, however it ends
pub(crate) struct RunGuard(Arc<RunControl>);

impl RunGuard {
    pub(crate) fn new(control: Arc<RunControl>) -> Self {
        Self(control)
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.0.finish();
    }
}

/// Message carried by a panicked or cancelled task
pub(crate) fn join_message(error: JoinError) -> String {
    if !error.is_panic() {
        return error.to_string();
    }
    let payload = error.into_panic();
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// How a run ended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum RunOutcome {
    /// Queue, scheduled set and generator obligations all drained
    Finished,
    /// `stop` was requested
    Stopped,
    /// Runnable nodes were left behind with nothing scheduled to run them
    Deadlock { stranded: Vec<NodeId> },
    /// Work ran out while nodes were still holding back a `Pending` output
    Incomplete { pending: Vec<NodeId> },
    /// A node failed during `init` or `run`, or broke its output contract
    Failed { node: Option<NodeId>, error: String },
}

impl RunOutcome {
    pub fn status(&self) -> RunStatus {
        match self {
            Self::Finished => RunStatus::Finished,
            Self::Stopped => RunStatus::Stopped,
            Self::Deadlock { .. } => RunStatus::Deadlock,
            Self::Incomplete { .. } => RunStatus::Incomplete,
            Self::Failed { .. } => RunStatus::Failed,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Finished)
    }
}

/// Final state of a completed run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: String,
    pub outcome: RunOutcome,
    /// Results as left by the run; non-cache nodes may have been dropped
    pub results: RunResults,
    /// Number of `run` calls per node
    pub activations: BTreeMap<NodeId, u64>,
}

impl RunReport {
    pub fn output(&self, node: NodeId, port: &str) -> Option<&PortValue> {
        self.results.get(&node).and_then(|outputs| outputs.get(port))
    }

    pub fn activation_count(&self, node: NodeId) -> u64 {
        self.activations.get(&node).copied().unwrap_or(0)
    }
}

/// Handle to an in-flight run
pub struct RunHandle {
    run_id: String,
    task: JoinHandle<RunReport>,
    control: Arc<RunControl>,
    events: EventBus,
}

impl RunHandle {
    pub(crate) fn new(
        run_id: String,
        task: JoinHandle<RunReport>,
        control: Arc<RunControl>,
        events: EventBus,
    ) -> Self {
        Self {
            run_id,
            task,
            control,
            events,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Ask the scheduler to stop before its next iteration
    pub fn stop(&self) {
        self.control.request_stop();
    }

    pub fn is_running(&self) -> bool {
        self.control.is_running()
    }

    /// Latest published results
    pub fn results(&self) -> RunResults {
        self.control.snapshot()
    }

    /// Wait for the run to end
    ///
    /// A run task that dies without a report ends as `Failed`, with the
    /// results it had published so far.
    pub async fn wait(self) -> Result<RunReport> {
        let error = match self.task.await {
            Ok(report) => return Ok(report),
            Err(e) => NodeEngineError::Join(join_message(e)).to_string(),
        };

        log::error!("Run {} aborted: {}", self.run_id, error);
        let outcome = RunOutcome::Failed {
            node: None,
            error: error.clone(),
        };
        for event in [
            GraphEvent::GraphError {
                run_id: Some(self.run_id.clone()),
                node_id: None,
                error,
            },
            GraphEvent::RunFinished {
                run_id: self.run_id.clone(),
                status: outcome.status(),
            },
        ] {
            if let Err(e) = self.events.emit(event) {
                log::warn!("Run {}: notification failed: {}", self.run_id, e);
            }
        }

        Ok(RunReport {
            run_id: self.run_id,
            outcome,
            results: self.control.snapshot(),
            activations: BTreeMap::new(),
        })
    }
}
