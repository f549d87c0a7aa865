//! Connection and graph validation
//!
//! [`check_connection`] guards every new connection. [`validate_graph`]
//! inspects a whole graph and reports every problem found, which is useful
//! after loading a document or after nodes changed their ports.

use std::collections::{BTreeMap, HashSet, VecDeque};

use crate::error::ConnectionError;
use crate::graph::Graph;
use crate::types::{can_connect, NodeId};

/// Problem found while validating a whole graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Cycle detected in the graph
    CycleDetected,
    /// A placeholder stands in for a type missing from the registry
    PlaceholderNode { node: String, node_type: String },
    /// A connection refers to a port the node no longer declares
    UndeclaredPort { connection: String, port: String },
    /// A connection joins incompatible port types
    IncompatiblePortTypes {
        connection: String,
        source_type: String,
        target_type: String,
    },
    /// A node could not be inspected because it is being activated
    NodeBusy { node: String },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CycleDetected => write!(f, "Cycle detected in graph"),
            Self::PlaceholderNode { node, node_type } => {
                write!(f, "Node '{}' has unknown type '{}'", node, node_type)
            }
            Self::UndeclaredPort { connection, port } => {
                write!(f, "Connection '{}' uses undeclared port '{}'", connection, port)
            }
            Self::IncompatiblePortTypes {
                connection,
                source_type,
                target_type,
            } => write!(
                f,
                "Connection '{}' joins incompatible types: {} -> {}",
                connection, source_type, target_type
            ),
            Self::NodeBusy { node } => write!(f, "Node '{}' is busy", node),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Check whether `source.source_port -> target.target_port` may be added
///
/// Checks, in order: both nodes exist, the source port is a declared
/// output, the target port is a declared input, the nodes differ, the
/// edge closes no cycle, and the port types are compatible.
pub fn check_connection(
    graph: &Graph,
    source: NodeId,
    source_port: &str,
    target: NodeId,
    target_port: &str,
) -> Result<(), ConnectionError> {
    let source_name = graph
        .node_name(source)
        .ok_or(ConnectionError::NodeNotFound(source))?;
    let target_name = graph
        .node_name(target)
        .ok_or(ConnectionError::NodeNotFound(target))?;

    let (_, source_outputs) = graph.ports(source)?;
    let output = source_outputs
        .get(source_port)
        .ok_or_else(|| ConnectionError::OutputNotFound {
            node: source_name.to_string(),
            port: source_port.to_string(),
        })?;

    let (target_inputs, _) = graph.ports(target)?;
    let input = target_inputs
        .get(target_port)
        .ok_or_else(|| ConnectionError::InputNotFound {
            node: target_name.to_string(),
            port: target_port.to_string(),
        })?;

    if source == target {
        return Err(ConnectionError::SelfLoop(source_name.to_string()));
    }

    if reaches(graph, target, source) {
        return Err(ConnectionError::LoopDetected);
    }

    if !can_connect(output, input) {
        return Err(ConnectionError::IncompatibleTypes {
            output: output.to_string(),
            input: input.to_string(),
        });
    }

    Ok(())
}

/// Whether `to` can be reached from `from` along existing connections
///
/// Each call walks with its own visited set.
fn reaches(graph: &Graph, from: NodeId, to: NodeId) -> bool {
    let mut visited = HashSet::new();
    let mut stack = vec![from];

    while let Some(node) = stack.pop() {
        if node == to {
            return true;
        }
        if !visited.insert(node) {
            continue;
        }
        stack.extend(
            graph
                .output_connections(node)
                .into_iter()
                .map(|c| c.target)
                .filter(|next| !visited.contains(next)),
        );
    }

    false
}

/// Validate a whole graph
///
/// Returns all validation errors found (not just the first).
pub fn validate_graph(graph: &Graph) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    validate_nodes(graph, &mut errors);
    validate_connections(graph, &mut errors);
    detect_cycles(graph, &mut errors);

    errors
}

fn validate_nodes(graph: &Graph, errors: &mut Vec<ValidationError>) {
    for (id, slot) in graph.slots() {
        let inspected = graph.with_node(id, |node| {
            node.is_placeholder().then(|| node.type_name().to_string())
        });
        match inspected {
            Ok(Some(node_type)) => errors.push(ValidationError::PlaceholderNode {
                node: slot.name.clone(),
                node_type,
            }),
            Ok(None) => {}
            Err(_) => errors.push(ValidationError::NodeBusy {
                node: slot.name.clone(),
            }),
        }
    }
}

fn validate_connections(graph: &Graph, errors: &mut Vec<ValidationError>) {
    for connection in graph.connections() {
        let key = graph.connection_key(connection);
        let (Ok((_, outputs)), Ok((inputs, _))) =
            (graph.ports(connection.source), graph.ports(connection.target))
        else {
            continue;
        };

        let output = outputs.get(&connection.source_port);
        let input = inputs.get(&connection.target_port);
        if output.is_none() {
            errors.push(ValidationError::UndeclaredPort {
                connection: key.clone(),
                port: connection.source_port.clone(),
            });
        }
        if input.is_none() {
            errors.push(ValidationError::UndeclaredPort {
                connection: key.clone(),
                port: connection.target_port.clone(),
            });
        }
        if let (Some(output), Some(input)) = (output, input) {
            if !can_connect(output, input) {
                errors.push(ValidationError::IncompatiblePortTypes {
                    connection: key,
                    source_type: output.to_string(),
                    target_type: input.to_string(),
                });
            }
        }
    }
}

/// Detect cycles using Kahn's algorithm (topological sort)
fn detect_cycles(graph: &Graph, errors: &mut Vec<ValidationError>) {
    let mut in_degree: BTreeMap<NodeId, usize> =
        graph.node_ids().into_iter().map(|id| (id, 0)).collect();
    for connection in graph.connections() {
        *in_degree.entry(connection.target).or_insert(0) += 1;
    }

    let mut queue: VecDeque<NodeId> = in_degree
        .iter()
        .filter(|(_, &degree)| degree == 0)
        .map(|(&id, _)| id)
        .collect();

    let mut visited = 0;
    while let Some(node) = queue.pop_front() {
        visited += 1;
        for connection in graph.output_connections(node) {
            if let Some(degree) = in_degree.get_mut(&connection.target) {
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(connection.target);
                }
            }
        }
    }

    if visited < in_degree.len() {
        errors.push(ValidationError::CycleDetected);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::NodeRegistry;
    use crate::test_nodes::{AddOne, Constant, Tracked};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn chain(len: usize) -> (Graph, Vec<NodeId>) {
        let mut graph = Graph::new(NodeRegistry::new());
        let mut ids = Vec::new();
        for _ in 0..len {
            let id = graph
                .add_node(Box::new(Tracked::new(Arc::new(AtomicUsize::new(0)))))
                .unwrap();
            if let Some(&prev) = ids.last() {
                graph.add_connection(prev, "out", id, "in").unwrap();
            }
            ids.push(id);
        }
        (graph, ids)
    }

    #[test]
    fn test_valid_connection() {
        let mut graph = Graph::new(NodeRegistry::new());
        let a = graph.add_node(Box::new(Constant::new(1))).unwrap();
        let b = graph.add_node(Box::new(AddOne::new())).unwrap();
        assert_eq!(check_connection(&graph, a, "out", b, "in"), Ok(()));
    }

    #[test]
    fn test_check_order() {
        let mut graph = Graph::new(NodeRegistry::new());
        let a = graph.add_node(Box::new(AddOne::new())).unwrap();
        let missing = NodeId::new(99);

        assert_eq!(
            check_connection(&graph, missing, "out", a, "in"),
            Err(ConnectionError::NodeNotFound(missing))
        );
        assert!(matches!(
            check_connection(&graph, a, "in", a, "in"),
            Err(ConnectionError::OutputNotFound { .. })
        ));
        assert!(matches!(
            check_connection(&graph, a, "out", a, "out"),
            Err(ConnectionError::InputNotFound { .. })
        ));
        assert!(matches!(
            check_connection(&graph, a, "out", a, "in"),
            Err(ConnectionError::SelfLoop(_))
        ));
    }

    #[test]
    fn test_loop_detected() {
        let (mut graph, ids) = chain(4);
        let before = graph.connection_count();

        let err = graph.add_connection(ids[3], "out", ids[0], "in").unwrap_err();
        assert_eq!(err.to_string(), "Invalid connection: Loop detected");
        assert_eq!(graph.connection_count(), before);
        assert_eq!(graph.connection_into(ids[0], "in"), None);
    }

    #[test]
    fn test_repeated_checks_do_not_share_state() {
        let (graph, ids) = chain(3);
        for _ in 0..3 {
            assert_eq!(
                check_connection(&graph, ids[2], "out", ids[0], "in"),
                Err(ConnectionError::LoopDetected)
            );
            assert_eq!(
                check_connection(&graph, ids[1], "out", ids[0], "in"),
                Err(ConnectionError::LoopDetected)
            );
        }
        // replacing the edge into ids[2] from ids[0] is fine
        assert_eq!(check_connection(&graph, ids[0], "out", ids[2], "in"), Ok(()));
    }

    #[test]
    fn test_incompatible_types() {
        let mut graph = Graph::new(NodeRegistry::new());
        let a = graph.add_node(Box::new(AddOne::new())).unwrap();
        let b = graph.add_node(Box::new(AddOne::new())).unwrap();
        let c = graph
            .add_node(Box::new(crate::test_nodes::Branch::new()))
            .unwrap();

        // int -> bool
        assert!(matches!(
            check_connection(&graph, a, "out", c, "condition"),
            Err(ConnectionError::IncompatibleTypes { .. })
        ));
        assert_eq!(check_connection(&graph, a, "out", b, "in"), Ok(()));
    }

    #[test]
    fn test_validate_clean_graph() {
        let (graph, _) = chain(3);
        assert!(validate_graph(&graph).is_empty());
    }

    #[test]
    fn test_validate_reports_placeholder() {
        let mut graph = Graph::new(NodeRegistry::new());
        graph
            .add_node(Box::new(crate::placeholder::UnknownNode::new("Mystery")))
            .unwrap();
        let errors = validate_graph(&graph);
        assert_eq!(
            errors,
            vec![ValidationError::PlaceholderNode {
                node: "Mystery 1".to_string(),
                node_type: "Mystery".to_string(),
            }]
        );
    }

    #[test]
    fn test_acyclic_after_random_attempts() {
        let (mut graph, ids) = chain(5);
        for &from in &ids {
            for &to in &ids {
                let _ = graph.add_connection(from, "out", to, "in");
            }
        }
        let mut errors = Vec::new();
        detect_cycles(&graph, &mut errors);
        assert!(errors.is_empty());
    }
}
