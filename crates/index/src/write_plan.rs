//! Compiles an [`ExtractionResult`] into typed graph writes.
//!
//! Labels and property names come from [`EntityKind`]; relationship types
//! are only emitted once they passed the whitelist, so backends can render
//! them into query text without further checks.

use extract::normalizer::{values_match, year_matches};
use extract::{
    EntityKind, ExtractionResult, FinancialFigure, GraphEntity, NOT_AVAILABLE, Relationship,
};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::relations::{RelationWhitelist, is_relation_tag};

pub type Properties = Vec<(&'static str, String)>;

/// A node addressed by its natural key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeRef {
    pub kind: EntityKind,
    pub key: Properties,
}

impl NodeRef {
    fn of<E: GraphEntity>(entity: &E) -> Self {
        Self {
            kind: E::KIND,
            key: entity.key(),
        }
    }

    /// Key values joined, unique within a kind
    pub fn key_string(&self) -> String {
        self.key
            .iter()
            .map(|(_, v)| v.as_str())
            .collect::<Vec<_>>()
            .join("\u{1f}")
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let key = self
            .key
            .iter()
            .map(|(_, v)| v.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "{}({})", self.kind, key)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    MergeNode {
        node: NodeRef,
        attributes: Properties,
    },
    MergeEdge {
        source: NodeRef,
        relationship: String,
        target: NodeRef,
        context: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SkipReason {
    UnknownEntityType(String),
    InvalidRelationshipType,
    UnsupportedShape,
    MissingEndpoint(String),
    UnresolvedFigure,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::UnknownEntityType(t) => write!(f, "unknown entity type {t:?}"),
            SkipReason::InvalidRelationshipType => {
                f.write_str("relationship type is not an identifier")
            }
            SkipReason::UnsupportedShape => f.write_str("relationship shape is not whitelisted"),
            SkipReason::MissingEndpoint(node) => write!(f, "endpoint {node} does not exist"),
            SkipReason::UnresolvedFigure => {
                f.write_str("no financial figure in the batch matches the target")
            }
        }
    }
}

/// A relationship the store declined to write
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedRelation {
    pub source: String,
    pub relationship_type: String,
    pub target: String,
    pub reason: SkipReason,
}

impl SkippedRelation {
    fn new(relationship: &Relationship, reason: SkipReason) -> Self {
        Self {
            source: format!(
                "{}:{}",
                relationship.source_entity_type, relationship.source_entity_name
            ),
            relationship_type: relationship.relationship_type.clone(),
            target: format!(
                "{}:{}",
                relationship.target_entity_type, relationship.target_entity_name
            ),
            reason,
        }
    }
}

#[derive(Debug, Default)]
pub struct WritePlan {
    ops: Vec<WriteOp>,
    skipped: Vec<SkippedRelation>,
    /// Relationship each edge op was built from, by op index
    origins: HashMap<usize, Relationship>,
    batch_nodes: HashSet<NodeRef>,
}

impl WritePlan {
    pub fn compile(result: &ExtractionResult, whitelist: &RelationWhitelist) -> Self {
        let mut plan = WritePlan::default();

        plan.merge_all(&result.companies);
        plan.merge_all(&result.persons);
        plan.merge_all(&result.financial_figures);
        plan.merge_all(&result.projects);
        plan.merge_all(&result.deadlines);

        for relationship in &result.relationships {
            match edge_for(relationship, &result.financial_figures, whitelist) {
                Ok(op) => {
                    plan.origins.insert(plan.ops.len(), relationship.clone());
                    plan.ops.push(op);
                }
                Err(reason) => plan.skipped.push(SkippedRelation::new(relationship, reason)),
            }
        }

        plan
    }

    fn merge_all<E: GraphEntity>(&mut self, entities: &[E]) {
        for entity in entities {
            let node = NodeRef::of(entity);
            if node.key.first().is_none_or(|(_, v)| v.is_empty() || v == NOT_AVAILABLE) {
                continue;
            }
            self.batch_nodes.insert(node.clone());
            self.ops.push(WriteOp::MergeNode {
                node,
                attributes: entity.attributes(),
            });
        }
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn skipped(&self) -> &[SkippedRelation] {
        &self.skipped
    }

    pub fn into_parts(self) -> (Vec<WriteOp>, Vec<SkippedRelation>) {
        (self.ops, self.skipped)
    }

    pub fn node_count(&self) -> usize {
        self.batch_nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.ops.len() - self.node_ops()
    }

    fn node_ops(&self) -> usize {
        self.ops
            .iter()
            .filter(|op| matches!(op, WriteOp::MergeNode { .. }))
            .count()
    }

    /// Edge endpoints this batch does not create; they must already exist
    pub fn external_endpoints(&self) -> Vec<NodeRef> {
        let mut seen = HashSet::new();
        self.ops
            .iter()
            .filter_map(|op| match op {
                WriteOp::MergeEdge { source, target, .. } => Some([source, target]),
                WriteOp::MergeNode { .. } => None,
            })
            .flatten()
            .filter(|node| !self.batch_nodes.contains(*node))
            .filter(|node| seen.insert((*node).clone()))
            .cloned()
            .collect()
    }

    /// Remove edges touching a node the store does not have
    pub fn drop_dangling(&mut self, missing: &HashSet<NodeRef>) {
        if missing.is_empty() {
            return;
        }

        let ops = std::mem::take(&mut self.ops);
        let mut origins = std::mem::take(&mut self.origins);

        for (index, op) in ops.into_iter().enumerate() {
            let origin = origins.remove(&index);
            let dangling = match &op {
                WriteOp::MergeEdge { source, target, .. } => [source, target]
                    .into_iter()
                    .find(|node| missing.contains(*node))
                    .cloned(),
                WriteOp::MergeNode { .. } => None,
            };

            match (dangling, origin) {
                (Some(node), Some(relationship)) => self.skipped.push(SkippedRelation::new(
                    &relationship,
                    SkipReason::MissingEndpoint(node.to_string()),
                )),
                (_, origin) => {
                    if let Some(relationship) = origin {
                        self.origins.insert(self.ops.len(), relationship);
                    }
                    self.ops.push(op);
                }
            }
        }
    }
}

fn edge_for(
    relationship: &Relationship,
    figures: &[FinancialFigure],
    whitelist: &RelationWhitelist,
) -> Result<WriteOp, SkipReason> {
    let source_kind = relationship
        .source_kind()
        .ok_or_else(|| SkipReason::UnknownEntityType(relationship.source_entity_type.clone()))?;
    let target_kind = relationship
        .target_kind()
        .ok_or_else(|| SkipReason::UnknownEntityType(relationship.target_entity_type.clone()))?;

    let tag = relationship.relationship_type.as_str();
    if !is_relation_tag(tag) {
        return Err(SkipReason::InvalidRelationshipType);
    }
    if !whitelist.allows(source_kind, tag, target_kind) {
        return Err(SkipReason::UnsupportedShape);
    }

    let figures = FigureLookup {
        figures,
        metric: reported_metric(tag),
        context: &relationship.context,
    };
    let source = resolve(source_kind, &relationship.source_entity_name, &figures)?;
    let target = resolve(target_kind, &relationship.target_entity_name, &figures)?;

    Ok(WriteOp::MergeEdge {
        source,
        relationship: tag.to_string(),
        target,
        context: relationship.context.clone(),
    })
}

/// Folded metric name carried by a `REPORTS_<METRIC>` tag
fn reported_metric(tag: &str) -> Option<String> {
    tag.strip_prefix("REPORTS_").map(fold_metric).filter(|m| !m.is_empty())
}

/// `Net Income`, `net_income` and `NET-INCOME` all fold to `NETINCOME`
fn fold_metric(metric: &str) -> String {
    metric
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_uppercase)
        .collect()
}

struct FigureLookup<'a> {
    figures: &'a [FinancialFigure],
    metric: Option<String>,
    context: &'a str,
}

impl FigureLookup<'_> {
    /// Same metric as the tag names (when it names one) and same value,
    /// a figure whose year appears in the context preferred.
    fn find(&self, value: &str) -> Option<&FinancialFigure> {
        let candidates: Vec<&FinancialFigure> = self
            .figures
            .iter()
            .filter(|f| f.metric != NOT_AVAILABLE)
            .filter(|f| match &self.metric {
                Some(metric) => fold_metric(&f.metric).contains(metric.as_str()),
                None => true,
            })
            .filter(|f| values_match(&f.value, value))
            .collect();

        candidates
            .iter()
            .find(|f| year_matches(&f.year, self.context))
            .or_else(|| candidates.first())
            .copied()
    }
}

/// Figures resolve through the batch, every other kind by its single key
/// property.
fn resolve(
    kind: EntityKind,
    name: &str,
    figures: &FigureLookup<'_>,
) -> Result<NodeRef, SkipReason> {
    let name = name.trim();

    if kind == EntityKind::FinancialFigure {
        return figures
            .find(name)
            .map(NodeRef::of)
            .ok_or(SkipReason::UnresolvedFigure);
    }

    if name.is_empty() || name == NOT_AVAILABLE {
        return Err(SkipReason::MissingEndpoint(format!("{kind}(N/A)")));
    }

    let property = kind.key_properties()[0];
    Ok(NodeRef {
        kind,
        key: vec![(property, name.to_string())],
    })
}
