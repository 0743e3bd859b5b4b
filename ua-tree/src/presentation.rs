use crate::node::{NodeClass, NodeDescription, NodeId};

/// `FolderType`: objects of this type are shown as folders.
pub const FOLDER_TYPE: &str = "i=61";
/// `PropertyType`: variables of this type are shown as properties.
pub const PROPERTY_TYPE: &str = "i=68";

/// Column headers of the tree view.
pub const COLUMN_HEADERS: [&str; 3] = ["DisplayName", "BrowseName", "NodeId"];

/// Visual category of a node, derived from its class and type definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Glyph {
    Folder,
    Object,
    Property,
    Variable,
    Method,
    ObjectType,
    VariableType,
    DataType,
    ReferenceType,
    Unknown,
}

impl Glyph {
    pub fn classify(node_class: NodeClass, type_definition: &NodeId) -> Self {
        match node_class {
            NodeClass::Object if type_definition.as_str() == FOLDER_TYPE => Self::Folder,
            NodeClass::Object => Self::Object,
            NodeClass::Variable if type_definition.as_str() == PROPERTY_TYPE => Self::Property,
            NodeClass::Variable => Self::Variable,
            NodeClass::Method => Self::Method,
            NodeClass::ObjectType => Self::ObjectType,
            NodeClass::VariableType => Self::VariableType,
            NodeClass::DataType => Self::DataType,
            NodeClass::ReferenceType => Self::ReferenceType,
            NodeClass::Unknown => {
                tracing::warn!(type_definition = %type_definition, "No glyph for unknown node class");
                Self::Unknown
            }
        }
    }

    pub fn of(description: &NodeDescription) -> Self {
        Self::classify(description.node_class, &description.type_definition)
    }

    /// Single-width marker used by the terminal tree.
    pub const fn symbol(self) -> char {
        match self {
            Self::Folder => '■',
            Self::Object => '●',
            Self::Property => '·',
            Self::Variable => '◆',
            Self::Method => 'ƒ',
            Self::ObjectType => '○',
            Self::VariableType => '◇',
            Self::DataType => '▲',
            Self::ReferenceType => '→',
            Self::Unknown => '?',
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Folder => "Folder",
            Self::Object => "Object",
            Self::Property => "Property",
            Self::Variable => "Variable",
            Self::Method => "Method",
            Self::ObjectType => "Object type",
            Self::VariableType => "Variable type",
            Self::DataType => "Data type",
            Self::ReferenceType => "Reference type",
            Self::Unknown => "Unknown",
        }
    }
}

/// The three tree columns, in [`COLUMN_HEADERS`] order.
pub fn columns(description: &NodeDescription) -> [String; 3] {
    [
        description.display_name.clone(),
        description.browse_name.clone(),
        description.node_id.to_string(),
    ]
}

/// Clipboard text for a browse path.
pub fn path_text(path: &[String]) -> String {
    path.join(",")
}

/// Clipboard text for a selection of nodes.
pub fn node_ids_text<'a>(ids: impl IntoIterator<Item = &'a NodeId>) -> String {
    ids.into_iter()
        .map(NodeId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}
