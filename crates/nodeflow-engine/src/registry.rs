//! Node type registry
//!
//! Maps declared node type names to factories. Node libraries register
//! their types at link time:
//!
//! ```ignore
//! inventory::submit!(nodeflow_engine::NodeRegistration {
//!     type_name: "Counter",
//!     category: "Input",
//!     factory: || Box::new(CounterNode::new()),
//! });
//! ```
//!
//! and hosts collect everything linked in with [`NodeRegistry::with_builtins`].

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::node::Node;

/// Link-time registration of a node type
pub struct NodeRegistration {
    /// Declared type name
    pub type_name: &'static str,
    /// Grouping category
    pub category: &'static str,
    /// Creates a fresh node instance
    pub factory: fn() -> Box<dyn Node>,
}

inventory::collect!(NodeRegistration);

/// Factory producing fresh node instances
pub type NodeFactory = Arc<dyn Fn() -> Box<dyn Node> + Send + Sync>;

#[derive(Clone)]
struct RegistryEntry {
    category: String,
    factory: NodeFactory,
}

/// Registry of node types available to a graph
///
/// Registries can be composed by merging:
/// ```ignore
/// let mut registry = NodeRegistry::with_builtins();
/// registry.merge(plugin_registry);
/// ```
#[derive(Clone, Default)]
pub struct NodeRegistry {
    entries: HashMap<String, RegistryEntry>,
}

impl NodeRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding every type submitted through `inventory`
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for registration in inventory::iter::<NodeRegistration> {
            registry.register_static(registration);
        }
        log::debug!("Collected {} built-in node types", registry.len());
        registry
    }

    /// Register a node type under a name and category
    ///
    /// A later registration with the same name replaces the earlier one.
    pub fn register<F>(&mut self, type_name: impl Into<String>, category: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn Node> + Send + Sync + 'static,
    {
        self.entries.insert(
            type_name.into(),
            RegistryEntry {
                category: category.into(),
                factory: Arc::new(factory),
            },
        );
    }

    /// Register a link-time registration entry
    pub fn register_static(&mut self, registration: &NodeRegistration) {
        let factory = registration.factory;
        self.register(registration.type_name, registration.category, move || factory());
    }

    /// Instantiate a node of the given type
    pub fn create(&self, type_name: &str) -> Option<Box<dyn Node>> {
        self.entries.get(type_name).map(|entry| (entry.factory)())
    }

    /// Check if a node type is registered
    pub fn has_node_type(&self, type_name: &str) -> bool {
        self.entries.contains_key(type_name)
    }

    /// Category a node type was registered under
    pub fn category(&self, type_name: &str) -> Option<&str> {
        self.entries.get(type_name).map(|entry| entry.category.as_str())
    }

    /// All registered type names, sorted
    pub fn node_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    /// Type names grouped by category, both sorted
    pub fn types_by_category(&self) -> BTreeMap<&str, Vec<&str>> {
        let mut grouped: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for (name, entry) in &self.entries {
            grouped
                .entry(entry.category.as_str())
                .or_default()
                .push(name.as_str());
        }
        for names in grouped.values_mut() {
            names.sort_unstable();
        }
        grouped
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Merge another registry into this one
    ///
    /// Entries from `other` override entries in `self` with the same type name.
    pub fn merge(&mut self, other: NodeRegistry) {
        self.entries.extend(other.entries);
    }
}

impl std::fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRegistry")
            .field("node_types", &self.node_types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_nodes::{AddOne, Constant};

    #[test]
    fn test_register_and_create() {
        let mut registry = NodeRegistry::new();
        registry.register("Constant", "Input", || Box::new(Constant::new(1)));

        assert!(registry.has_node_type("Constant"));
        assert!(!registry.has_node_type("unknown"));
        assert_eq!(registry.category("Constant"), Some("Input"));

        let node = registry.create("Constant").unwrap();
        assert_eq!(node.type_name(), "Constant");
        assert!(registry.create("unknown").is_none());
    }

    #[test]
    fn test_types_by_category() {
        let mut registry = NodeRegistry::new();
        registry.register("Constant", "Input", || Box::new(Constant::new(1)));
        registry.register("Add One", "Math", || Box::new(AddOne::new()));
        registry.register("Other", "Math", || Box::new(AddOne::new()));

        let grouped = registry.types_by_category();
        assert_eq!(grouped["Math"], vec!["Add One", "Other"]);
        assert_eq!(grouped["Input"], vec!["Constant"]);
        assert_eq!(registry.node_types(), vec!["Add One", "Constant", "Other"]);
    }

    #[test]
    fn test_merge_override() {
        let mut first = NodeRegistry::new();
        first.register("Constant", "Input", || Box::new(Constant::new(1)));

        let mut second = NodeRegistry::new();
        second.register("Constant", "Override", || Box::new(Constant::new(2)));
        second.register("Add One", "Math", || Box::new(AddOne::new()));

        first.merge(second);
        assert_eq!(first.len(), 2);
        assert_eq!(first.category("Constant"), Some("Override"));
    }

    #[test]
    fn test_static_registration() {
        static REGISTRATION: NodeRegistration = NodeRegistration {
            type_name: "Add One",
            category: "Math",
            factory: || Box::new(AddOne::new()),
        };

        let mut registry = NodeRegistry::new();
        registry.register_static(&REGISTRATION);
        assert_eq!(registry.create("Add One").unwrap().type_name(), "Add One");
    }
}
