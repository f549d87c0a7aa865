//! Nodeflow Nodes
//!
//! Reference node library for the nodeflow engine. Every node registers
//! itself through `inventory`, so linking this crate is enough for
//! [`builtin_registry`] to see it.
//!
//! # Categories
//!
//! - **Input**: Nodes that feed values into a graph
//! - **Logic**: Branching, joining and streaming nodes
//! - **Output**: Nodes that report results
//! - **Graph**: Saved graphs embedded as a single node

pub mod control;
pub mod input;
pub mod output;
pub mod subgraph;

// Re-export all nodes for convenience
pub use control::*;
pub use input::*;
pub use output::*;
pub use subgraph::*;

use nodeflow_engine::NodeRegistry;

/// Registry holding every node type of this crate
pub fn builtin_registry() -> NodeRegistry {
    NodeRegistry::with_builtins()
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodeflow_engine::{Graph, GraphEvent, Node, NodeId, PortValue, RunOutcome, VecEventSink};
    use serde_json::json;
    use std::sync::Arc;

    fn constant(graph: &mut Graph, value: serde_json::Value) -> NodeId {
        let id = graph.create_node("Constant").unwrap();
        graph.set_default_output(id, "value", value).unwrap();
        id
    }

    #[test]
    fn test_inventory_collects_all_builtins() {
        let registry = builtin_registry();
        assert_eq!(registry.len(), 11, "Expected 11 built-in nodes");

        for name in [
            "Constant",
            "Counter",
            "Iterator",
            "Loop",
            "Collector",
            "If Else",
            "Switch",
            "Connector",
            "Is Null",
            "Log",
            "Graph",
        ] {
            assert!(registry.has_node_type(name), "missing {}", name);
        }
        assert_eq!(registry.category("Counter"), Some("Input"));
        assert_eq!(registry.category("Switch"), Some("Logic"));
        assert_eq!(registry.category("Log"), Some("Output"));
        assert_eq!(registry.category("Graph"), Some("Graph"));
    }

    #[test]
    fn test_registered_type_names_match_nodes() {
        let registry = builtin_registry();
        for name in registry.node_types() {
            let node = registry.create(name).unwrap();
            assert_eq!(node.type_name(), name);
        }
    }

    #[tokio::test]
    async fn test_iterate_and_collect() {
        let mut graph = Graph::new(builtin_registry());
        let list = constant(&mut graph, json!([1, 2, 3]));
        let iterator = graph.create_node("Iterator").unwrap();
        let collector = graph.create_node("Collector").unwrap();
        let log = graph.create_node("Log").unwrap();
        graph.add_connection(list, "value", iterator, "in").unwrap();
        graph.add_connection(iterator, "out", collector, "in").unwrap();
        graph.add_connection(collector, "out", log, "in").unwrap();

        let report = graph.run_to_completion().await.unwrap();

        assert_eq!(report.outcome, RunOutcome::Finished);
        assert_eq!(report.activation_count(iterator), 4);
        assert_eq!(report.activation_count(log), 1);
        assert_eq!(report.output(log, "out"), Some(&PortValue::Data(json!([1, 2, 3]))));
    }

    #[tokio::test]
    async fn test_stream_end_passes_through_value_node() {
        let mut graph = Graph::new(builtin_registry());
        let list = constant(&mut graph, json!([1, 2, 3]));
        let iterator = graph.create_node("Iterator").unwrap();
        let body = graph.create_node("Log").unwrap();
        let collector = graph.create_node("Collector").unwrap();
        let sink = graph.create_node("Log").unwrap();
        graph.add_connection(list, "value", iterator, "in").unwrap();
        graph.add_connection(iterator, "out", body, "in").unwrap();
        graph.add_connection(body, "out", collector, "in").unwrap();
        graph.add_connection(collector, "out", sink, "in").unwrap();

        let report = graph.run_to_completion().await.unwrap();

        assert_eq!(report.outcome, RunOutcome::Finished);
        assert_eq!(report.activation_count(body), 3);
        assert_eq!(report.activation_count(collector), 4);
        assert_eq!(report.activation_count(sink), 1);
        assert_eq!(report.output(sink, "out"), Some(&PortValue::Data(json!([1, 2, 3]))));
    }

    #[tokio::test]
    async fn test_nested_generators_collect_per_outer_item() {
        let mut graph = Graph::new(builtin_registry());
        let lists = constant(&mut graph, json!([[1, 2], [3]]));
        let outer = graph.create_node("Iterator").unwrap();
        let inner = graph.create_node("Iterator").unwrap();
        let collector = graph.create_node("Collector").unwrap();
        let log = graph.create_node("Log").unwrap();
        graph.add_connection(lists, "value", outer, "in").unwrap();
        graph.add_connection(outer, "out", inner, "in").unwrap();
        graph.add_connection(inner, "out", collector, "in").unwrap();
        graph.add_connection(collector, "out", log, "in").unwrap();

        let report = graph.run_to_completion().await.unwrap();

        assert_eq!(report.outcome, RunOutcome::Finished);
        assert_eq!(report.activation_count(log), 2);
        assert_eq!(report.output(log, "out"), Some(&PortValue::Data(json!([3]))));
    }

    #[tokio::test]
    async fn test_loop_repeats_input() {
        let mut graph = Graph::new(builtin_registry());
        let word = constant(&mut graph, json!("hi"));
        let repeat = graph.create_node("Loop").unwrap();
        let collector = graph.create_node("Collector").unwrap();
        graph.set_default_input(repeat, "count", json!(3)).unwrap();
        graph.add_connection(word, "value", repeat, "input").unwrap();
        graph.add_connection(repeat, "out", collector, "in").unwrap();

        let report = graph.run_to_completion().await.unwrap();
        assert_eq!(
            report.output(collector, "out"),
            Some(&PortValue::Data(json!(["hi", "hi", "hi"])))
        );
    }

    #[tokio::test]
    async fn test_branch_and_join() {
        let mut graph = Graph::new(builtin_registry());
        let condition = constant(&mut graph, json!(false));
        let payload = constant(&mut graph, json!("payload"));
        let branch = graph.create_node("If Else").unwrap();
        let join = graph.create_node("Connector").unwrap();
        let joined = graph.create_node("Log").unwrap();
        let on_true = graph.create_node("Log").unwrap();

        graph.add_connection(condition, "value", branch, "condition").unwrap();
        graph.add_connection(payload, "value", branch, "input").unwrap();
        graph.add_connection(branch, "true", join, "input0").unwrap();
        graph.add_connection(branch, "false", join, "input1").unwrap();
        graph.add_connection(branch, "true", on_true, "in").unwrap();
        graph.add_connection(join, "out", joined, "in").unwrap();

        let report = graph.run_to_completion().await.unwrap();

        assert_eq!(report.outcome, RunOutcome::Finished);
        assert_eq!(report.output(joined, "out"), Some(&PortValue::Data(json!("payload"))));
        assert_eq!(report.activation_count(on_true), 0);
    }

    #[tokio::test]
    async fn test_switch_selects_one_branch() {
        let mut graph = Graph::new(builtin_registry());
        let payload = constant(&mut graph, json!(5));
        let switch = graph.create_node("Switch").unwrap();
        let first = graph.create_node("Log").unwrap();
        let second = graph.create_node("Log").unwrap();
        graph.set_default_input(switch, "id", json!(1)).unwrap();
        graph.add_connection(payload, "value", switch, "input").unwrap();
        graph.add_connection(switch, "out0", first, "in").unwrap();
        graph.add_connection(switch, "out1", second, "in").unwrap();

        let report = graph.run_to_completion().await.unwrap();
        assert_eq!(report.activation_count(first), 0);
        assert_eq!(report.output(second, "out"), Some(&PortValue::Data(json!(5))));
    }

    #[tokio::test]
    async fn test_counter_steps_per_consumer() {
        let mut graph = Graph::new(builtin_registry());
        let counter = graph.create_node("Counter").unwrap();
        let first = graph.create_node("Log").unwrap();
        let second = graph.create_node("Log").unwrap();
        graph.add_connection(counter, "out", first, "in").unwrap();
        graph.add_connection(counter, "out", second, "in").unwrap();

        let report = graph.run_to_completion().await.unwrap();

        assert_eq!(report.activation_count(counter), 3);
        assert_eq!(report.output(first, "out"), Some(&PortValue::Data(json!(1))));
        assert_eq!(report.output(second, "out"), Some(&PortValue::Data(json!(2))));
    }

    #[tokio::test]
    async fn test_switch_out_of_range_fails_run() {
        let mut graph = Graph::new(builtin_registry());
        let switch = graph.create_node("Switch").unwrap();
        graph.set_default_input(switch, "id", json!(9)).unwrap();
        let sink = Arc::new(VecEventSink::new());
        graph.subscribe(sink.clone());

        let report = graph.run_to_completion().await.unwrap();

        assert!(matches!(report.outcome, RunOutcome::Failed { node: Some(id), .. } if id == switch));
        assert!(sink
            .events()
            .iter()
            .any(|e| matches!(e, GraphEvent::GraphError { .. })));
    }

    #[tokio::test]
    async fn test_saved_graph_runs_the_same() {
        let mut graph = Graph::new(builtin_registry());
        let list = constant(&mut graph, json!(["a", "b"]));
        let iterator = graph.create_node("Iterator").unwrap();
        let collector = graph.create_node("Collector").unwrap();
        graph.add_connection(list, "value", iterator, "in").unwrap();
        graph.add_connection(iterator, "out", collector, "in").unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.json");
        graph.save_to_file(&path).await.unwrap();

        let mut restored = Graph::new(builtin_registry());
        let load = restored.load_from_file(&path).await.unwrap();
        assert!(load.is_clean());

        let before = graph.run_to_completion().await.unwrap();
        let after = restored.run_to_completion().await.unwrap();
        let collector_after = restored.node_id("Collector 3").unwrap();
        assert_eq!(
            before.output(collector, "out"),
            after.output(collector_after, "out")
        );
    }
}
