//! Error types for the node engine

use thiserror::Error;

use crate::events::EventError;
use crate::types::NodeId;

/// Result type alias using NodeEngineError
pub type Result<T> = std::result::Result<T, NodeEngineError>;

/// Errors raised by node implementations from `init` or `run`
#[derive(Debug, Clone, Error, PartialEq)]
pub enum NodeError {
    /// Missing required input
    #[error("Missing required input: {0}")]
    MissingInput(String),

    /// Invalid input type
    #[error("Invalid input type for '{port}': expected {expected}")]
    InvalidInput { port: String, expected: String },

    /// Node execution failed
    #[error("Node execution failed: {0}")]
    ExecutionFailed(String),

    /// The node stands in for a type missing from the registry
    #[error("Unknown node type '{0}'")]
    UnknownType(String),

    /// Serialization error inside a node
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The node panicked during `init` or `run`
    #[error("Node panicked: {0}")]
    Panicked(String),
}

impl NodeError {
    /// Create an execution failed error with a message
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::ExecutionFailed(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(port: impl Into<String>, expected: impl Into<String>) -> Self {
        Self::InvalidInput {
            port: port.into(),
            expected: expected.into(),
        }
    }
}

impl From<serde_json::Error> for NodeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Why a connection request was rejected
///
/// The `Display` output is the human readable rejection reason.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("Node {0} not found")]
    NodeNotFound(NodeId),

    #[error("Output name '{port}' not found on '{node}'")]
    OutputNotFound { node: String, port: String },

    #[error("Input name '{port}' not found on '{node}'")]
    InputNotFound { node: String, port: String },

    #[error("Cannot connect '{0}' to itself")]
    SelfLoop(String),

    #[error("Loop detected")]
    LoopDetected,

    #[error("Incompatible types: {output} -> {input}")]
    IncompatibleTypes { output: String, input: String },

    #[error("No connection into '{node}.{port}'")]
    NotConnected { node: String, port: String },

    #[error("Node '{0}' is busy")]
    NodeBusy(String),
}

/// Errors that can occur in the node engine
#[derive(Debug, Error)]
pub enum NodeEngineError {
    /// Rejected connection request
    #[error("Invalid connection: {0}")]
    Connection(#[from] ConnectionError),

    /// Node handle does not exist in the graph
    #[error("Node {0} not found")]
    NodeNotFound(NodeId),

    /// No factory registered for a node type
    #[error("Unknown node type: {0}")]
    UnknownNodeType(String),

    /// Instance names must be unique within a graph
    #[error("A node named '{0}' already exists")]
    DuplicateName(String),

    /// Structural change or second run requested while a run is active
    #[error("Graph is already running")]
    AlreadyRunning,

    /// The node is locked by an in-flight activation
    #[error("Node '{0}' is busy")]
    NodeBusy(String),

    /// Error raised by a node's `init`, `run` or connection hooks
    #[error("Node '{node}' failed: {source}")]
    Node {
        node: String,
        #[source]
        source: NodeError,
    },

    /// Node result lacks a declared output
    #[error("Node '{node}' did not produce declared output '{port}'")]
    MissingOutput { node: String, port: String },

    /// Node result contains an output it never declared
    #[error("Node '{node}' produced undeclared output '{port}'")]
    UnexpectedOutput { node: String, port: String },

    /// Configured activation ceiling reached
    #[error("Activation limit of {0} reached")]
    ActivationLimit(u64),

    /// A notification sink rejected an event
    #[error(transparent)]
    Notification(#[from] EventError),

    /// The scheduler task panicked or was cancelled
    #[error("Run task failed: {0}")]
    Join(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl NodeEngineError {
    /// Attribute a node error to a node instance
    pub fn node(node: impl Into<String>, source: NodeError) -> Self {
        Self::Node {
            node: node.into(),
            source,
        }
    }
}

/// A single problem found while loading a graph document
///
/// Loading continues past every issue; the offending entry is skipped
/// or replaced by a placeholder.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LoadIssue {
    #[error("Node '{name}' has unknown type '{node_type}'")]
    UnknownNodeType { name: String, node_type: String },

    #[error("Node entry '{name}' is malformed: {reason}")]
    MalformedNode { name: String, reason: String },

    #[error("Node '{name}' could not be restored: {reason}")]
    InvalidNode { name: String, reason: String },

    #[error("Node name '{0}' is already taken")]
    DuplicateName(String),

    #[error("Connection entry '{key}' is malformed: {reason}")]
    MalformedConnection { key: String, reason: String },

    #[error("Connection '{key}' rejected: {reason}")]
    InvalidConnection { key: String, reason: String },
}
