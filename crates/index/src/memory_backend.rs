use async_trait::async_trait;
use extract::NOT_AVAILABLE;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::cypher_lite::{self, EdgeView, NodeView};
use crate::error::GraphError;
use crate::graph_store::{GraphBackend, Record};
use crate::write_plan::{NodeRef, Properties, WriteOp};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredNode {
    label: String,
    props: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredEdge {
    source: usize,
    target: usize,
    rel_type: String,
    props: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct GraphState {
    nodes: Vec<StoredNode>,
    edges: Vec<StoredEdge>,
    #[serde(skip)]
    node_index: HashMap<(String, String), usize>,
    #[serde(skip)]
    edge_index: HashMap<(usize, String, usize), usize>,
}

/// Inverse of one in-place change, replayed newest first on rollback
enum Undo {
    NodeAdded,
    NodeProps(usize, BTreeMap<String, String>),
    EdgeAdded,
    EdgeProps(usize, BTreeMap<String, String>),
}

impl GraphState {
    fn reindex(&mut self) {
        self.node_index.clear();
        self.edge_index.clear();
        for (i, node) in self.nodes.iter().enumerate() {
            if let Some(key) = stored_key(node) {
                self.node_index.insert(key, i);
            }
        }
        for (i, edge) in self.edges.iter().enumerate() {
            self.edge_index
                .insert((edge.source, edge.rel_type.clone(), edge.target), i);
        }
    }

    fn find(&self, node: &NodeRef) -> Option<usize> {
        self.node_index
            .get(&(node.kind.label().to_string(), node.key_string()))
            .copied()
    }

    fn merge_node(&mut self, node: &NodeRef, attributes: &Properties, undo: &mut Vec<Undo>) {
        let index = match self.find(node) {
            Some(index) => {
                undo.push(Undo::NodeProps(index, self.nodes[index].props.clone()));
                index
            }
            None => {
                let props = node
                    .key
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.clone()))
                    .collect();
                self.nodes.push(StoredNode {
                    label: node.kind.label().to_string(),
                    props,
                });
                let index = self.nodes.len() - 1;
                self.node_index
                    .insert((node.kind.label().to_string(), node.key_string()), index);
                undo.push(Undo::NodeAdded);
                index
            }
        };

        let props = &mut self.nodes[index].props;
        for (name, value) in attributes {
            set_property(props, name, value);
        }
    }

    fn merge_edge(
        &mut self,
        source: &NodeRef,
        relationship: &str,
        target: &NodeRef,
        context: &str,
        undo: &mut Vec<Undo>,
    ) -> bool {
        let (Some(s), Some(t)) = (self.find(source), self.find(target)) else {
            return false;
        };

        let key = (s, relationship.to_string(), t);
        let index = match self.edge_index.get(&key) {
            Some(&index) => {
                undo.push(Undo::EdgeProps(index, self.edges[index].props.clone()));
                index
            }
            None => {
                self.edges.push(StoredEdge {
                    source: s,
                    target: t,
                    rel_type: relationship.to_string(),
                    props: BTreeMap::new(),
                });
                self.edge_index.insert(key, self.edges.len() - 1);
                undo.push(Undo::EdgeAdded);
                self.edges.len() - 1
            }
        };
        set_property(&mut self.edges[index].props, "context", context);
        true
    }

    fn rollback(&mut self, undo: Vec<Undo>) {
        for change in undo.into_iter().rev() {
            match change {
                Undo::NodeAdded => {
                    if let Some(node) = self.nodes.pop()
                        && let Some(key) = stored_key(&node)
                    {
                        self.node_index.remove(&key);
                    }
                }
                Undo::NodeProps(index, props) => self.nodes[index].props = props,
                Undo::EdgeAdded => {
                    if let Some(edge) = self.edges.pop() {
                        self.edge_index.remove(&(edge.source, edge.rel_type, edge.target));
                    }
                }
                Undo::EdgeProps(index, props) => self.edges[index].props = props,
            }
        }
    }
}

/// `N/A` never replaces a value already known
fn set_property(props: &mut BTreeMap<String, String>, name: &str, value: &str) {
    if value == NOT_AVAILABLE && props.get(name).is_some_and(|current| current != NOT_AVAILABLE) {
        return;
    }
    props.insert(name.to_string(), value.to_string());
}

fn stored_key(node: &StoredNode) -> Option<(String, String)> {
    let kind = extract::EntityKind::parse(&node.label)?;
    let values: Vec<&str> = kind
        .key_properties()
        .iter()
        .map(|p| node.props.get(*p).map(String::as_str).unwrap_or(NOT_AVAILABLE))
        .collect();
    Some((node.label.clone(), values.join("\u{1f}")))
}

/// In-process property graph, optionally snapshotted to a JSON file.
///
/// Batches are applied in place. The snapshot is written on `flush` and
/// `clear`, not after every batch.
pub struct MemoryBackend {
    state: RwLock<GraphState>,
    snapshot: Option<PathBuf>,
    dirty: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(GraphState::default()),
            snapshot: None,
            dirty: AtomicBool::new(false),
        }
    }

    /// Load the snapshot at `path` if it exists; `flush` and `clear` keep it current
    pub async fn persistent(path: impl Into<PathBuf>) -> Result<Self, GraphError> {
        let path = path.into();
        let mut state = match tokio::fs::read_to_string(&path).await {
            Ok(content) => serde_json::from_str::<GraphState>(&content).map_err(|e| {
                GraphError::Backend(format!("corrupt graph snapshot {}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => GraphState::default(),
            Err(e) => {
                let message = format!("failed to read {}: {e}", path.display());
                return Err(GraphError::Backend(message));
            }
        };
        state.reindex();
        info!(
            path = %path.display(),
            nodes = state.nodes.len(),
            edges = state.edges.len(),
            "loaded graph snapshot"
        );

        Ok(Self {
            state: RwLock::new(state),
            snapshot: Some(path),
            dirty: AtomicBool::new(false),
        })
    }

    async fn save(&self, state: &GraphState) -> Result<(), GraphError> {
        let Some(path) = &self.snapshot else {
            return Ok(());
        };
        write_snapshot(path, state)
            .await
            .map_err(|e| GraphError::Write(format!("failed to save graph snapshot: {e:#}")))
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

async fn write_snapshot(path: &Path, state: &GraphState) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, serde_json::to_vec(state)?).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[async_trait]
impl GraphBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn ensure_constraints(&self) -> Result<(), GraphError> {
        // uniqueness is structural: nodes are indexed by label and natural key
        Ok(())
    }

    async fn contains(&self, node: &NodeRef) -> Result<bool, GraphError> {
        Ok(self.state.read().await.find(node).is_some())
    }

    async fn apply(&self, ops: &[WriteOp]) -> Result<(), GraphError> {
        let mut state = self.state.write().await;
        let mut undo = Vec::new();

        for op in ops {
            match op {
                WriteOp::MergeNode { node, attributes } => {
                    state.merge_node(node, attributes, &mut undo)
                }
                WriteOp::MergeEdge { source, relationship, target, context } => {
                    if !state.merge_edge(source, relationship, target, context, &mut undo) {
                        state.rollback(undo);
                        return Err(GraphError::Write(format!(
                            "edge {source} -[{relationship}]-> {target} references a missing node"
                        )));
                    }
                }
            }
        }

        if !undo.is_empty() {
            self.dirty.store(true, Ordering::Release);
        }
        debug!(ops = ops.len(), "applied write batch");
        Ok(())
    }

    async fn read(&self, query: &str) -> Result<Vec<Record>, GraphError> {
        let state = self.state.read().await;
        let nodes: Vec<NodeView> = state
            .nodes
            .iter()
            .map(|n| NodeView { label: &n.label, props: &n.props })
            .collect();
        let edges: Vec<EdgeView> = state
            .edges
            .iter()
            .map(|e| EdgeView {
                source: e.source,
                target: e.target,
                rel_type: &e.rel_type,
                props: &e.props,
            })
            .collect();

        cypher_lite::run(query, &nodes, &edges).map_err(|message| GraphError::query(query, message))
    }

    async fn clear(&self) -> Result<(), GraphError> {
        let mut state = self.state.write().await;
        let empty = GraphState::default();
        self.save(&empty).await?;
        *state = empty;
        self.dirty.store(false, Ordering::Release);
        Ok(())
    }

    async fn flush(&self) -> Result<(), GraphError> {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let state = self.state.read().await;
        if let Err(e) = self.save(&state).await {
            self.dirty.store(true, Ordering::Release);
            return Err(e);
        }
        debug!(nodes = state.nodes.len(), edges = state.edges.len(), "graph snapshot written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use extract::EntityKind;

    fn company(name: &str) -> NodeRef {
        NodeRef {
            kind: EntityKind::Company,
            key: vec![("name", name.to_string())],
        }
    }

    fn merge(name: &str, industry: &str) -> WriteOp {
        WriteOp::MergeNode {
            node: company(name),
            attributes: vec![
                ("ticker", NOT_AVAILABLE.to_string()),
                ("industry", industry.to_string()),
            ],
        }
    }

    #[tokio::test]
    async fn test_failed_batch_leaves_state_untouched() {
        let backend = MemoryBackend::new();
        let ops = vec![
            merge("Apple", "Technology"),
            WriteOp::MergeEdge {
                source: company("Apple"),
                relationship: "IS_COMPETITOR_OF".into(),
                target: company("Ghost"),
                context: NOT_AVAILABLE.into(),
            },
        ];

        assert!(backend.apply(&ops).await.is_err());
        assert!(!backend.contains(&company("Apple")).await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_batch_restores_existing_nodes() {
        let backend = MemoryBackend::new();
        backend.apply(&[merge("Apple", "Technology")]).await.unwrap();

        let ops = vec![
            merge("Apple", "Hardware"),
            merge("Microsoft", "Software"),
            WriteOp::MergeEdge {
                source: company("Apple"),
                relationship: "IS_COMPETITOR_OF".into(),
                target: company("Microsoft"),
                context: "cloud".into(),
            },
            WriteOp::MergeEdge {
                source: company("Apple"),
                relationship: "IS_COMPETITOR_OF".into(),
                target: company("Ghost"),
                context: NOT_AVAILABLE.into(),
            },
        ];
        assert!(backend.apply(&ops).await.is_err());

        assert!(!backend.contains(&company("Microsoft")).await.unwrap());
        let rows = backend.read("MATCH (c:Company) RETURN c.industry AS industry").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["industry"], "Technology");
        let rows = backend.read("MATCH ()-[r]->() RETURN count(r) AS count").await.unwrap();
        assert_eq!(rows[0]["count"], 0);

        // indexes were rolled back too, so the same batch minus the bad edge lands cleanly
        backend.apply(&ops[..3]).await.unwrap();
        let rows = backend.read("MATCH (c:Company) RETURN count(c) AS count").await.unwrap();
        assert_eq!(rows[0]["count"], 2);
    }

    #[tokio::test]
    async fn test_snapshot_is_written_on_flush() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.json");

        let backend = MemoryBackend::persistent(&path).await.unwrap();
        backend.apply(&[merge("Apple", "Technology")]).await.unwrap();
        assert!(!path.exists());

        backend.flush().await.unwrap();
        let reloaded = MemoryBackend::persistent(&path).await.unwrap();
        assert!(reloaded.contains(&company("Apple")).await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_values_do_not_overwrite() {
        let backend = MemoryBackend::new();
        backend.apply(&[merge("Apple", "Technology")]).await.unwrap();
        backend.apply(&[merge("Apple", NOT_AVAILABLE)]).await.unwrap();

        let rows = backend.read("MATCH (c:Company) RETURN c.industry AS industry").await.unwrap();
        assert_eq!(rows[0]["industry"], "Technology");
    }

    #[tokio::test]
    async fn test_snapshot_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.json");

        let backend = MemoryBackend::persistent(&path).await.unwrap();
        backend
            .apply(&[
                merge("Apple", "Technology"),
                merge("Microsoft", "Technology"),
                WriteOp::MergeEdge {
                    source: company("Apple"),
                    relationship: "IS_COMPETITOR_OF".into(),
                    target: company("Microsoft"),
                    context: "smartphones".into(),
                },
            ])
            .await
            .unwrap();
        backend.flush().await.unwrap();
        drop(backend);

        let reloaded = MemoryBackend::persistent(&path).await.unwrap();
        assert!(reloaded.contains(&company("Microsoft")).await.unwrap());
        let rows = reloaded
            .read("MATCH (a)-[r:IS_COMPETITOR_OF]->(b) RETURN a.name AS a, r.context AS context")
            .await
            .unwrap();
        assert_eq!(rows[0]["a"], "Apple");
        assert_eq!(rows[0]["context"], "smartphones");

        // merging again does not duplicate after reload
        reloaded.apply(&[merge("Apple", "Hardware")]).await.unwrap();
        let rows = reloaded.read("MATCH (c:Company) RETURN count(c) AS count").await.unwrap();
        assert_eq!(rows[0]["count"], 2);
    }
}
