//! Core types for the node graph
//!
//! Port kinds, type descriptors and the values that flow between ports.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable handle of a node inside a graph
///
/// Handles are allocated by the graph and never reused, so renaming a
/// node never invalidates connections or results keyed by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(u64);

impl NodeId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw numeric value of the handle
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How a port participates in scheduling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PortKind {
    /// Ordinary data, must be produced before the consumer runs
    #[default]
    Value,
    /// Conditional branch, never gates readiness
    Event,
    /// Streamed across repeated activations until exhausted
    Generator,
}

/// Name of the wildcard type that matches everything
pub const ANY_TYPE: &str = "any";

/// Data type carried by a port
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "of", rename_all = "camelCase")]
pub enum TypeDescriptor {
    /// A plain type tag such as `int` or `str`
    Named(String),
    /// List of an element type
    List(Box<TypeDescriptor>),
    /// Mapping from key type to value type
    Dict(Box<TypeDescriptor>, Box<TypeDescriptor>),
    /// Any one of the member types
    Union(Vec<TypeDescriptor>),
}

impl TypeDescriptor {
    pub fn any() -> Self {
        Self::Named(ANY_TYPE.to_string())
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }

    pub fn list(inner: TypeDescriptor) -> Self {
        Self::List(Box::new(inner))
    }

    pub fn dict(key: TypeDescriptor, value: TypeDescriptor) -> Self {
        Self::Dict(Box::new(key), Box::new(value))
    }

    pub fn union(members: impl IntoIterator<Item = TypeDescriptor>) -> Self {
        Self::Union(members.into_iter().collect())
    }

    pub fn is_any(&self) -> bool {
        matches!(self, Self::Named(name) if name == ANY_TYPE)
    }

    /// Whether an input port of this type accepts values of `output`
    ///
    /// `any` on either side always matches. An output union is accepted
    /// only when every member is; an input union accepts when any member does.
    pub fn accepts(&self, output: &TypeDescriptor) -> bool {
        if self.is_any() || output.is_any() {
            return true;
        }

        match (self, output) {
            (_, Self::Union(members)) => {
                !members.is_empty() && members.iter().all(|member| self.accepts(member))
            }
            (Self::Union(members), _) => members.iter().any(|member| member.accepts(output)),
            (Self::List(input), Self::List(output)) => input.accepts(output),
            (Self::Dict(input_key, input_value), Self::Dict(output_key, output_value)) => {
                input_key.accepts(output_key) && input_value.accepts(output_value)
            }
            (Self::Named(input), Self::Named(output)) => input == output,
            _ => false,
        }
    }
}

impl Default for TypeDescriptor {
    fn default() -> Self {
        Self::any()
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named(name) => write!(f, "{}", name),
            Self::List(inner) => write!(f, "list[{}]", inner),
            Self::Dict(key, value) => write!(f, "dict[{},{}]", key, value),
            Self::Union(members) => {
                for (i, member) in members.iter().enumerate() {
                    if i > 0 {
                        write!(f, "|")?;
                    }
                    write!(f, "{}", member)?;
                }
                Ok(())
            }
        }
    }
}

/// Full declaration of a port: data type plus scheduling kind
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortType {
    pub data_type: TypeDescriptor,
    pub kind: PortKind,
}

impl PortType {
    pub fn new(data_type: TypeDescriptor, kind: PortKind) -> Self {
        Self { data_type, kind }
    }

    /// A value port of the given type
    pub fn value(data_type: TypeDescriptor) -> Self {
        Self::new(data_type, PortKind::Value)
    }

    /// An event port of the given type
    pub fn event(data_type: TypeDescriptor) -> Self {
        Self::new(data_type, PortKind::Event)
    }

    /// A generator port of the given type
    pub fn generator(data_type: TypeDescriptor) -> Self {
        Self::new(data_type, PortKind::Generator)
    }

    /// A value port accepting anything
    pub fn any() -> Self {
        Self::value(TypeDescriptor::any())
    }

    pub fn with_kind(mut self, kind: PortKind) -> Self {
        self.kind = kind;
        self
    }
}

impl fmt::Display for PortType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            PortKind::Value => write!(f, "{}", self.data_type),
            PortKind::Event => write!(f, "event<{}>", self.data_type),
            PortKind::Generator => write!(f, "generator<{}>", self.data_type),
        }
    }
}

/// Check whether an output port can feed an input port
///
/// Evaluated from the input side; the port kind does not take part.
pub fn can_connect(output: &PortType, input: &PortType) -> bool {
    input.data_type.accepts(&output.data_type)
}

/// Ordered port declarations keyed by port name
pub type PortMap = BTreeMap<String, PortType>;

/// A value travelling through a port
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PortValue {
    /// Real data
    Data(serde_json::Value),
    /// Nothing further this activation, or the stream has closed
    Exhausted,
    /// Accepted but not ready to be forwarded yet
    Pending,
}

impl PortValue {
    pub fn null() -> Self {
        Self::Data(serde_json::Value::Null)
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted)
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    /// True for `Exhausted` and `Pending`
    pub fn is_sentinel(&self) -> bool {
        !matches!(self, Self::Data(_))
    }

    pub fn as_data(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Data(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_data(self) -> Option<serde_json::Value> {
        match self {
            Self::Data(value) => Some(value),
            _ => None,
        }
    }
}

impl From<serde_json::Value> for PortValue {
    fn from(value: serde_json::Value) -> Self {
        Self::Data(value)
    }
}

/// Values keyed by port name, used for both node inputs and outputs
pub type PortValues = BTreeMap<String, PortValue>;
