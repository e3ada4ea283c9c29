use anyhow::{Context, Result};
use extract::EntityKind;
use std::collections::BTreeSet;
use std::fmt;

/// One allowed `(source)-[TYPE]->(target)` shape
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct RelationShape {
    pub source: EntityKind,
    pub relationship: String,
    pub target: EntityKind,
}

impl RelationShape {
    pub fn new(source: EntityKind, relationship: &str, target: EntityKind) -> Self {
        Self {
            source,
            relationship: relationship.to_string(),
            target,
        }
    }

    /// Parse `Source:TYPE:Target`, e.g. `Person:WORKS_ON:Project`
    pub fn parse(raw: &str) -> Result<Self> {
        let parts: Vec<&str> = raw.split(':').map(str::trim).collect();
        let [source, relationship, target] = parts.as_slice() else {
            anyhow::bail!("expected Source:TYPE:Target, got {:?}", raw);
        };

        let unknown = || format!("unknown entity type in {:?}", raw);
        let source = EntityKind::parse(source).with_context(unknown)?;
        let target = EntityKind::parse(target).with_context(unknown)?;
        if !is_relation_tag(relationship) {
            anyhow::bail!("relationship type must be UPPER_SNAKE_CASE in {:?}", raw);
        }

        Ok(Self::new(source, relationship, target))
    }
}

impl fmt::Display for RelationShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({})-[:{}]->({})", self.source, self.relationship, self.target)
    }
}

/// The relationship shapes the graph store accepts.
#[derive(Debug, Clone)]
pub struct RelationWhitelist {
    shapes: BTreeSet<RelationShape>,
}

impl RelationWhitelist {
    /// Roles, reported figures and competitors
    pub fn baseline() -> Self {
        use EntityKind::*;

        let shapes = [
            (Company, "HAS_CEO", Person),
            (Company, "HAS_CFO", Person),
            (Company, "HAS_FOUNDER", Person),
            (Company, "EMPLOYS", Person),
            (Company, "REPORTS_REVENUE", FinancialFigure),
            (Company, "REPORTS_NET_INCOME", FinancialFigure),
            (Company, "HAS_FINANCIAL_FIGURE", FinancialFigure),
            (Company, "IS_COMPETITOR_OF", Company),
        ]
        .into_iter()
        .map(|(s, r, t)| RelationShape::new(s, r, t))
        .collect();

        Self { shapes }
    }

    /// Baseline plus configured `Source:TYPE:Target` entries
    pub fn with_extra<S: AsRef<str>>(extra: &[S]) -> Result<Self> {
        let mut whitelist = Self::baseline();
        for raw in extra {
            let raw = raw.as_ref().trim();
            if raw.is_empty() {
                continue;
            }
            whitelist.shapes.insert(RelationShape::parse(raw)?);
        }
        Ok(whitelist)
    }

    pub fn allows(&self, source: EntityKind, relationship: &str, target: EntityKind) -> bool {
        self.shapes
            .iter()
            .any(|s| s.source == source && s.target == target && s.relationship == relationship)
    }

    pub fn shapes(&self) -> impl Iterator<Item = &RelationShape> {
        self.shapes.iter()
    }

    pub fn relationship_types(&self) -> BTreeSet<&str> {
        self.shapes.iter().map(|s| s.relationship.as_str()).collect()
    }
}

impl Default for RelationWhitelist {
    fn default() -> Self {
        Self::baseline()
    }
}

/// `UPPER_SNAKE_CASE` identifier, safe to splice into a query as a type
pub fn is_relation_tag(tag: &str) -> bool {
    let mut chars = tag.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_uppercase())
        && chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}
