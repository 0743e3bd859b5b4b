use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque, namespace-wide identity of a node (e.g. `"ns=0;i=84"`).
///
/// Only compared and hashed; the cache never parses it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Category of a namespace node. Drives presentation only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum NodeClass {
    Object,
    Variable,
    Method,
    ObjectType,
    VariableType,
    DataType,
    ReferenceType,
    #[default]
    #[serde(other)]
    Unknown,
}

impl fmt::Display for NodeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Object => "Object",
            Self::Variable => "Variable",
            Self::Method => "Method",
            Self::ObjectType => "ObjectType",
            Self::VariableType => "VariableType",
            Self::DataType => "DataType",
            Self::ReferenceType => "ReferenceType",
            Self::Unknown => "Unknown",
        };
        f.write_str(name)
    }
}

/// Everything the source reports about one node.
///
/// Returned by [`NodeSource::describe`](crate::NodeSource::describe) and, as
/// an unordered list, by
/// [`NodeSource::get_children_descriptions`](crate::NodeSource::get_children_descriptions).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDescription {
    pub node_id: NodeId,
    pub display_name: String,
    pub browse_name: String,
    #[serde(default)]
    pub node_class: NodeClass,
    /// Identity of the defining type (e.g. `i=61` for `FolderType`).
    #[serde(default = "NodeDescription::no_type_definition")]
    pub type_definition: NodeId,
}

impl NodeDescription {
    /// Description whose display name equals its browse name.
    pub fn new(
        node_id: impl Into<NodeId>,
        browse_name: impl Into<String>,
        node_class: NodeClass,
        type_definition: impl Into<NodeId>,
    ) -> Self {
        let browse_name = browse_name.into();
        Self {
            node_id: node_id.into(),
            display_name: browse_name.clone(),
            browse_name,
            node_class,
            type_definition: type_definition.into(),
        }
    }

    #[must_use]
    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    fn no_type_definition() -> NodeId {
        NodeId::new("i=0")
    }
}
