//! Nodeflow Engine - typed node graphs with streaming execution
//!
//! This crate provides the graph container, connection validation and the
//! scheduler that runs a graph of nodes. It supports:
//!
//! - Typed ports of three kinds: values, one-shot events and generators
//! - Connection checks (port existence, type compatibility, cycles)
//! - Priority-ordered scheduling with generator streaming
//! - Nodes that opt out of caching and are recomputed per consumer
//! - Event notifications for every structural and run-time change
//! - JSON documents with placeholders for unregistered node types
//!
//! # Architecture
//!
//! - `Graph`: owns nodes and connections, validates every mutation
//! - `Scheduler`: runs on a tokio task per run, reports via `RunHandle`
//! - `NodeRegistry`: maps type names to factories, filled at link time
//! - `EventSink`: generic event streaming, any number of subscribers
//!
//! # Example
//!
//! ```ignore
//! use nodeflow_engine::{Graph, NodeRegistry};
//!
//! let mut graph = Graph::new(NodeRegistry::with_builtins());
//! let counter = graph.create_node("Counter")?;
//! let log = graph.create_node("Log")?;
//! graph.add_connection(counter, "out", log, "in")?;
//!
//! let report = graph.run_to_completion().await?;
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod graph;
pub mod node;
pub mod persistence;
pub mod placeholder;
pub mod registry;
pub mod run;
mod scheduler;
pub mod types;
pub mod validation;

#[cfg(test)]
mod test_nodes;

// Re-export key types
pub use config::EngineConfig;
pub use error::{ConnectionError, LoadIssue, NodeEngineError, NodeError, Result};
pub use events::{
    EventBus, EventError, EventSink, GraphEvent, NullEventSink, RunStatus, SubscriptionId,
    VecEventSink,
};
pub use graph::{Connection, Graph};
pub use node::{Node, NodeState, PortValuesExt, Progress, SharedNode, DEFAULT_CATEGORY};
pub use persistence::{ConnectionDocument, GraphDocument, LoadReport, NodeDocument};
pub use placeholder::UnknownNode;
pub use registry::{NodeRegistration, NodeRegistry};
pub use run::{RunHandle, RunOutcome, RunReport, RunResults};
pub use types::{
    can_connect, NodeId, PortKind, PortMap, PortType, PortValue, PortValues, TypeDescriptor,
    ANY_TYPE,
};
pub use validation::{check_connection, validate_graph, ValidationError};

