//! Graph documents
//!
//! A graph is saved as a JSON document keyed by instance name:
//!
//! ```json
//! {
//!   "nodes": {
//!     "Counter 1": { "type": "Counter", "staticInputs": { "start": 0 } }
//!   },
//!   "connections": {
//!     "Counter 1.value -> Log 2.value": {
//!       "sourceNode": "Counter 1", "sourcePort": "value",
//!       "targetNode": "Log 2", "targetPort": "value"
//!     }
//!   }
//! }
//! ```
//!
//! Loading is tolerant: every bad entry is reported in the [`LoadReport`]
//! and skipped, and nodes of unregistered types are replaced by an
//! [`UnknownNode`] so the document survives a load/save cycle.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{LoadIssue, NodeEngineError, Result};
use crate::events::GraphEvent;
use crate::graph::Graph;
use crate::node::{Node, NodeState};
use crate::placeholder::UnknownNode;
use crate::types::NodeId;

/// Saved form of a single node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDocument {
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(flatten)]
    pub state: NodeState,
}

impl NodeDocument {
    pub fn new(node_type: impl Into<String>, state: NodeState) -> Self {
        Self {
            node_type: node_type.into(),
            state,
        }
    }
}

/// Saved form of a connection, referring to nodes by instance name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionDocument {
    pub source_node: String,
    pub source_port: String,
    pub target_node: String,
    pub target_port: String,
}

impl ConnectionDocument {
    /// `"src.port -> dst.port"`
    pub fn key(&self) -> String {
        format!(
            "{}.{} -> {}.{}",
            self.source_node, self.source_port, self.target_node, self.target_port
        )
    }
}

/// A whole saved graph
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphDocument {
    #[serde(default)]
    pub nodes: BTreeMap<String, NodeDocument>,
    #[serde(default)]
    pub connections: BTreeMap<String, ConnectionDocument>,
}

/// Document whose entries are parsed one at a time
#[derive(Deserialize)]
struct RawDocument {
    #[serde(default)]
    nodes: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    connections: serde_json::Map<String, serde_json::Value>,
}

/// Outcome of loading a document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadReport {
    pub nodes_loaded: usize,
    pub connections_loaded: usize,
    pub issues: Vec<LoadIssue>,
    /// Nodes created as placeholders for unregistered types
    pub placeholders: Vec<NodeId>,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

impl Graph {
    /// Capture every node and connection
    pub fn to_document(&self) -> Result<GraphDocument> {
        let mut document = GraphDocument::default();

        for id in self.node_ids() {
            let name = self.slot(id)?.name.clone();
            let saved = self.with_node(id, |node| node.save())?;
            document.nodes.insert(name, saved);
        }

        for connection in self.connections() {
            let saved = ConnectionDocument {
                source_node: self.slot(connection.source)?.name.clone(),
                source_port: connection.source_port.clone(),
                target_node: self.slot(connection.target)?.name.clone(),
                target_port: connection.target_port.clone(),
            };
            document.connections.insert(saved.key(), saved);
        }

        Ok(document)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.to_document()?)?)
    }

    pub async fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = self.to_json_string()?;
        tokio::fs::write(path, json).await?;
        log::info!("Saved graph with {} nodes to {}", self.len(), path.display());
        Ok(())
    }

    /// Add the contents of a parsed document to this graph
    pub fn load_document(&mut self, document: GraphDocument) -> Result<LoadReport> {
        self.ensure_idle()?;
        let mut report = LoadReport::default();
        self.load_entries(
            document.nodes.into_iter().collect(),
            document.connections.into_iter().collect(),
            &mut report,
        );
        Ok(report)
    }

    /// Add the contents of a JSON document to this graph
    ///
    /// Only a document that is not JSON at all fails; malformed entries are
    /// reported and skipped.
    pub fn load_from_str(&mut self, json: &str) -> Result<LoadReport> {
        self.ensure_idle()?;
        let raw: RawDocument = serde_json::from_str(json)?;
        let mut report = LoadReport::default();

        let mut nodes = Vec::new();
        for (name, value) in raw.nodes {
            match serde_json::from_value::<NodeDocument>(value) {
                Ok(document) => nodes.push((name, document)),
                Err(e) => report.issues.push(LoadIssue::MalformedNode {
                    name,
                    reason: e.to_string(),
                }),
            }
        }

        let mut connections = Vec::new();
        for (key, value) in raw.connections {
            match serde_json::from_value::<ConnectionDocument>(value) {
                Ok(document) => connections.push((key, document)),
                Err(e) => report.issues.push(LoadIssue::MalformedConnection {
                    key,
                    reason: e.to_string(),
                }),
            }
        }

        self.load_entries(nodes, connections, &mut report);
        Ok(report)
    }

    pub async fn load_from_file(&mut self, path: impl AsRef<Path>) -> Result<LoadReport> {
        let path = path.as_ref();
        let json = tokio::fs::read_to_string(path).await?;
        let report = self.load_from_str(&json)?;
        log::info!(
            "Loaded {} nodes and {} connections from {}",
            report.nodes_loaded,
            report.connections_loaded,
            path.display()
        );
        Ok(report)
    }

    fn load_entries(
        &mut self,
        nodes: Vec<(String, NodeDocument)>,
        connections: Vec<(String, ConnectionDocument)>,
        report: &mut LoadReport,
    ) {
        let referenced = referenced_ports(&connections);

        let mut loaded: HashMap<String, NodeId> = HashMap::new();
        for (name, document) in nodes {
            if let Some(id) = self.load_node(&name, &document, &referenced, report) {
                loaded.insert(name, id);
                report.nodes_loaded += 1;
            }
        }

        for (key, document) in connections {
            let endpoints = (
                loaded.get(&document.source_node).copied(),
                loaded.get(&document.target_node).copied(),
            );
            let (source, target) = match endpoints {
                (Some(source), Some(target)) => (source, target),
                (None, _) => {
                    report.issues.push(LoadIssue::InvalidConnection {
                        key,
                        reason: format!("Node '{}' not found", document.source_node),
                    });
                    continue;
                }
                (_, None) => {
                    report.issues.push(LoadIssue::InvalidConnection {
                        key,
                        reason: format!("Node '{}' not found", document.target_node),
                    });
                    continue;
                }
            };

            match self.add_connection(source, &document.source_port, target, &document.target_port) {
                Ok(_) => report.connections_loaded += 1,
                Err(e) => report.issues.push(LoadIssue::InvalidConnection {
                    key,
                    reason: match e {
                        NodeEngineError::Connection(reason) => reason.to_string(),
                        other => other.to_string(),
                    },
                }),
            }
        }

        self.sync_name_counter();
        for issue in &report.issues {
            log::warn!("Load issue: {}", issue);
        }
    }

    fn load_node(
        &mut self,
        name: &str,
        document: &NodeDocument,
        referenced: &HashMap<&str, (BTreeSet<&str>, BTreeSet<&str>)>,
        report: &mut LoadReport,
    ) -> Option<NodeId> {
        let (mut node, unknown) = match self.registry().create(&document.node_type) {
            Some(node) => (node, None),
            None => {
                let mut placeholder = UnknownNode::new(document.node_type.clone());
                if let Some((inputs, outputs)) = referenced.get(name) {
                    for port in inputs {
                        placeholder.declare_input(*port);
                    }
                    for port in outputs {
                        placeholder.declare_output(*port);
                    }
                }
                let issue = LoadIssue::UnknownNodeType {
                    name: name.to_string(),
                    node_type: document.node_type.clone(),
                };
                (Box::new(placeholder) as Box<dyn Node>, Some(issue))
            }
        };

        if let Err(e) = node.load(document) {
            report.issues.push(LoadIssue::InvalidNode {
                name: name.to_string(),
                reason: e.to_string(),
            });
            return None;
        }

        let id = match self.add_node_named(name, node) {
            Ok(id) => id,
            Err(NodeEngineError::DuplicateName(name)) => {
                report.issues.push(LoadIssue::DuplicateName(name));
                return None;
            }
            Err(e) => {
                report.issues.push(LoadIssue::InvalidNode {
                    name: name.to_string(),
                    reason: e.to_string(),
                });
                return self.node_id(name);
            }
        };

        if let Some(issue) = unknown {
            if let Err(e) = self.emit_node(id, GraphEvent::node_error(id, &issue)) {
                log::warn!("Could not deliver error notification for '{}': {}", name, e);
            }
            report.issues.push(issue);
            report.placeholders.push(id);
        }
        Some(id)
    }
}

/// Input and output ports each node name is connected through
fn referenced_ports(
    connections: &[(String, ConnectionDocument)],
) -> HashMap<&str, (BTreeSet<&str>, BTreeSet<&str>)> {
    let mut ports: HashMap<&str, (BTreeSet<&str>, BTreeSet<&str>)> = HashMap::new();
    for (_, connection) in connections {
        ports
            .entry(connection.source_node.as_str())
            .or_default()
            .1
            .insert(connection.source_port.as_str());
        ports
            .entry(connection.target_node.as_str())
            .or_default()
            .0
            .insert(connection.target_port.as_str());
    }
    ports
}
