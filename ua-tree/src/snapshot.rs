//! In-memory [`NodeSource`] backed by a namespace snapshot.
//!
//! Snapshots are JSON documents listing every node once, with the identities
//! of its hierarchical children:
//!
//! ```json
//! { "nodes": [
//!     { "node_id": "i=84", "display_name": "Root", "browse_name": "Root",
//!       "node_class": "Object", "type_definition": "i=61",
//!       "children": ["i=85"] },
//!     { "node_id": "i=85", "display_name": "Objects", "browse_name": "Objects",
//!       "node_class": "Object", "type_definition": "i=61" }
//! ] }
//! ```

use crate::error::{TreeError, TreeResult};
use crate::node::{NodeClass, NodeDescription, NodeId};
use crate::source::NodeSource;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;

/// Errors raised while loading a snapshot.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("Failed to read snapshot: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed snapshot: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Node {0} is listed more than once")]
    DuplicateNode(NodeId),

    #[error("Node {parent} references missing child {child}")]
    MissingChild { parent: NodeId, child: NodeId },
}

#[derive(Debug, Deserialize)]
struct SnapshotFile {
    nodes: Vec<SnapshotNode>,
}

#[derive(Debug, Deserialize)]
struct SnapshotNode {
    #[serde(flatten)]
    description: NodeDescription,
    #[serde(default)]
    children: Vec<NodeId>,
}

#[derive(Debug)]
struct Node {
    description: NodeDescription,
    children: Vec<NodeId>,
}

/// Namespace snapshot served through the [`NodeSource`] interface.
#[derive(Debug)]
pub struct SnapshotSource {
    nodes: HashMap<NodeId, Node>,
    latency: Duration,
    online: AtomicBool,
}

impl SnapshotSource {
    pub fn from_json_str(json: &str) -> Result<Self, SnapshotError> {
        let file: SnapshotFile = serde_json::from_str(json)?;
        Self::from_nodes(file.nodes)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, SnapshotError> {
        let json = std::fs::read_to_string(path.as_ref())?;
        let source = Self::from_json_str(&json)?;
        tracing::info!(path = %path.as_ref().display(), nodes = source.len(), "Snapshot loaded");
        Ok(source)
    }

    fn from_nodes(list: Vec<SnapshotNode>) -> Result<Self, SnapshotError> {
        let mut nodes = HashMap::with_capacity(list.len());
        for SnapshotNode {
            description,
            children,
        } in list
        {
            let node_id = description.node_id.clone();
            if nodes
                .insert(
                    node_id.clone(),
                    Node {
                        description,
                        children,
                    },
                )
                .is_some()
            {
                return Err(SnapshotError::DuplicateNode(node_id));
            }
        }

        for (parent, node) in &nodes {
            if let Some(child) = node.children.iter().find(|c| !nodes.contains_key(*c)) {
                return Err(SnapshotError::MissingChild {
                    parent: parent.clone(),
                    child: child.clone(),
                });
            }
        }

        Ok(Self {
            nodes,
            latency: Duration::ZERO,
            online: AtomicBool::new(true),
        })
    }

    /// Built-in namespace mirroring the standard OPC UA root folders.
    pub fn demo() -> Self {
        use NodeClass::{DataType, Method, Object, ObjectType, ReferenceType, Variable};
        const FOLDER: &str = "i=61";
        const PROPERTY: &str = "i=68";
        const BASE_DATA_VARIABLE: &str = "i=63";

        let node = |id: &str, name: &str, class, type_def: &str, children: &[&str]| SnapshotNode {
            description: NodeDescription::new(id, name, class, type_def),
            children: children.iter().map(|&c| NodeId::new(c)).collect(),
        };

        let list = vec![
            node("i=84", "Root", Object, FOLDER, &["i=85", "i=86", "i=87"]),
            node("i=85", "Objects", Object, FOLDER, &["i=2253", "ns=2;s=Plant"]),
            node("i=86", "Types", Object, FOLDER, &["i=90", "i=88", "i=91"]),
            node("i=87", "Views", Object, FOLDER, &[]),
            node(
                "i=2253",
                "Server",
                Object,
                "i=2004",
                &["i=2254", "i=2256", "i=11492"],
            ),
            node("i=2254", "ServerArray", Variable, PROPERTY, &[]),
            node("i=2256", "ServerStatus", Variable, "i=2138", &["i=2257", "i=2259"]),
            node("i=2257", "StartTime", Variable, BASE_DATA_VARIABLE, &[]),
            node("i=2259", "State", Variable, BASE_DATA_VARIABLE, &[]),
            node("i=11492", "GetMonitoredItems", Method, "i=0", &[]),
            node(
                "ns=2;s=Plant",
                "Plant",
                Object,
                FOLDER,
                &["ns=2;s=Pump1", "ns=2;s=Pump2"],
            ),
            node("ns=2;s=Pump1", "Pump1", Object, "i=58", &["ns=2;s=Pump1.Speed"]),
            node("ns=2;s=Pump1.Speed", "Speed", Variable, BASE_DATA_VARIABLE, &[]),
            node("ns=2;s=Pump2", "Pump2", Object, "i=58", &[]),
            node("i=88", "ObjectTypes", Object, FOLDER, &["i=58"]),
            node("i=58", "BaseObjectType", ObjectType, "i=0", &[]),
            node("i=90", "DataTypes", Object, FOLDER, &["i=24"]),
            node("i=24", "BaseDataType", DataType, "i=0", &[]),
            node("i=91", "ReferenceTypes", Object, FOLDER, &["i=31"]),
            node("i=31", "References", ReferenceType, "i=0", &[]),
        ];

        match Self::from_nodes(list) {
            Ok(source) => source,
            Err(e) => unreachable!("built-in namespace is consistent: {e}"),
        }
    }

    /// Delay every call by `latency` to mimic a slow server.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// While offline every call fails with [`TreeError::SourceUnavailable`].
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::Relaxed);
        tracing::info!(online, "Snapshot source availability changed");
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    async fn round_trip(&self) -> TreeResult<()> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.online.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(TreeError::SourceUnavailable("snapshot source is offline".into()))
        }
    }
}

#[async_trait]
impl NodeSource for SnapshotSource {
    async fn describe(&self, node_id: &NodeId) -> TreeResult<NodeDescription> {
        self.round_trip().await?;
        self.nodes
            .get(node_id)
            .map(|node| node.description.clone())
            .ok_or_else(|| TreeError::UnknownIdentity(node_id.clone()))
    }

    async fn get_children_descriptions(
        &self,
        node_id: &NodeId,
    ) -> TreeResult<Vec<NodeDescription>> {
        self.round_trip().await?;
        let Some(node) = self.nodes.get(node_id) else {
            tracing::debug!(node_id = %node_id, "Children of unknown node requested");
            return Ok(Vec::new());
        };
        Ok(node
            .children
            .iter()
            .filter_map(|child| self.nodes.get(child))
            .map(|child| child.description.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::LazyTreeCache;
    use std::sync::Arc;

    const SMALL: &str = r#"{
        "nodes": [
            { "node_id": "i=84", "display_name": "Root", "browse_name": "Root",
              "node_class": "Object", "type_definition": "i=61",
              "children": ["i=86", "i=85"] },
            { "node_id": "i=85", "display_name": "Objects", "browse_name": "Objects",
              "node_class": "Object", "type_definition": "i=61" },
            { "node_id": "i=86", "display_name": "Types", "browse_name": "Types",
              "node_class": "Object", "type_definition": "i=61" }
        ]
    }"#;

    #[tokio::test]
    async fn test_children_in_file_order() {
        let source = SnapshotSource::from_json_str(SMALL).unwrap();
        let children = source
            .get_children_descriptions(&NodeId::new("i=84"))
            .await
            .unwrap();
        let names: Vec<_> = children.iter().map(|d| d.browse_name.as_str()).collect();
        assert_eq!(names, ["Types", "Objects"]);
    }

    #[tokio::test]
    async fn test_describe_unknown_identity() {
        let source = SnapshotSource::from_json_str(SMALL).unwrap();
        let err = source.describe(&NodeId::new("i=9999")).await.unwrap_err();
        assert_eq!(err, TreeError::UnknownIdentity(NodeId::new("i=9999")));
        assert!(
            source
                .get_children_descriptions(&NodeId::new("i=9999"))
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_offline_source_is_unavailable() {
        let source = SnapshotSource::from_json_str(SMALL).unwrap();
        source.set_online(false);
        assert!(matches!(
            source.describe(&NodeId::new("i=84")).await,
            Err(TreeError::SourceUnavailable(_))
        ));
        source.set_online(true);
        assert!(source.describe(&NodeId::new("i=84")).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_is_applied() {
        let source = SnapshotSource::from_json_str(SMALL)
            .unwrap()
            .with_latency(Duration::from_millis(500));
        let started = tokio::time::Instant::now();
        source.describe(&NodeId::new("i=84")).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(500));
    }

    #[test]
    fn test_duplicate_node_rejected() {
        let json = r#"{ "nodes": [
            { "node_id": "i=1", "display_name": "A", "browse_name": "A" },
            { "node_id": "i=1", "display_name": "B", "browse_name": "B" }
        ] }"#;
        assert!(matches!(
            SnapshotSource::from_json_str(json),
            Err(SnapshotError::DuplicateNode(_))
        ));
    }

    #[test]
    fn test_missing_child_rejected() {
        let json = r#"{ "nodes": [
            { "node_id": "i=1", "display_name": "A", "browse_name": "A", "children": ["i=2"] }
        ] }"#;
        let err = SnapshotSource::from_json_str(json).unwrap_err();
        assert_eq!(err.to_string(), "Node i=1 references missing child i=2");
    }

    #[test]
    fn test_malformed_json_rejected() {
        assert!(matches!(
            SnapshotSource::from_json_str("{ nodes: "),
            Err(SnapshotError::Parse(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            SnapshotSource::from_path("/definitely/not/here.json"),
            Err(SnapshotError::Io(_))
        ));
    }

    #[tokio::test]
    async fn test_bundled_plant_namespace() {
        let source = SnapshotSource::from_json_str(include_str!("../../demos/plant.json")).unwrap();
        let mut cache = LazyTreeCache::new(Arc::new(source));
        let root = cache.set_root(&NodeId::new("i=85")).await.unwrap();

        let lines = cache.children_of(root).await.unwrap().to_vec();
        let line1 = lines[0];
        assert_eq!(cache.get(line1).unwrap().display_name(), "Filling Line");

        let parts = cache.children_of(line1).await.unwrap().to_vec();
        let names: Vec<_> = parts
            .iter()
            .map(|&id| cache.get(id).unwrap().browse_name().to_owned())
            .collect();
        assert_eq!(names, ["Start", "Tank"]);
        assert_eq!(cache.get(parts[0]).unwrap().node_class(), NodeClass::Method);
        assert_eq!(cache.path_to(parts[1]).unwrap(), ["Line1", "Tank"]);
    }

    #[tokio::test]
    async fn test_demo_through_cache() {
        let source = SnapshotSource::demo();
        assert!(!source.is_empty());

        let mut cache = LazyTreeCache::new(Arc::new(source));
        let root = cache.set_root(&NodeId::new("i=84")).await.unwrap();
        let top = cache.children_of(root).await.unwrap().to_vec();
        let names: Vec<_> = top
            .iter()
            .map(|&id| cache.get(id).unwrap().browse_name().to_owned())
            .collect();
        assert_eq!(names, ["Objects", "Types", "Views"]);

        let views = top[2];
        assert!(!cache.has_children(Some(views)).await.unwrap());
    }
}
