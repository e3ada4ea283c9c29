use serde::{Deserialize, Serialize};
use std::fmt;

/// Sentinel stored for any attribute the extractor could not find.
pub const NOT_AVAILABLE: &str = "N/A";

/// The closed set of node kinds the fact graph understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    Person,
    Company,
    FinancialFigure,
    Project,
    Deadline,
}

impl EntityKind {
    pub const ALL: [EntityKind; 5] = [
        EntityKind::Person,
        EntityKind::Company,
        EntityKind::FinancialFigure,
        EntityKind::Project,
        EntityKind::Deadline,
    ];

    /// Graph label for this kind
    pub fn label(self) -> &'static str {
        match self {
            EntityKind::Person => "Person",
            EntityKind::Company => "Company",
            EntityKind::FinancialFigure => "FinancialFigure",
            EntityKind::Project => "Project",
            EntityKind::Deadline => "Deadline",
        }
    }

    /// Properties forming the natural key, in key order
    pub fn key_properties(self) -> &'static [&'static str] {
        match self {
            EntityKind::Person => &["name"],
            EntityKind::Company => &["name"],
            EntityKind::FinancialFigure => &["metric", "year", "company_name"],
            EntityKind::Project => &["name"],
            EntityKind::Deadline => &["date"],
        }
    }

    /// Mutable, non-key properties
    pub fn attribute_properties(self) -> &'static [&'static str] {
        match self {
            EntityKind::Person => &["title"],
            EntityKind::Company => &["ticker", "industry"],
            EntityKind::FinancialFigure => &["value", "unit"],
            EntityKind::Project => &["description"],
            EntityKind::Deadline => &["context"],
        }
    }

    /// Resolve a free-text type name coming from model output.
    ///
    /// Case, spacing and punctuation are ignored and a handful of common
    /// synonyms are accepted (`organization` -> Company, `metric` -> FinancialFigure).
    pub fn parse(raw: &str) -> Option<Self> {
        let folded: String = raw
            .chars()
            .filter(|c| c.is_alphanumeric())
            .flat_map(|c| c.to_lowercase())
            .collect();

        match folded.as_str() {
            "person" | "persons" | "people" | "individual" | "executive" => {
                Some(EntityKind::Person)
            }
            "company" | "companies" | "organization" | "organisation" | "org" | "corporation"
            | "firm" | "business" => Some(EntityKind::Company),
            "financialfigure" | "financialfigures" | "figure" | "metric" | "financialmetric"
            | "financial" => Some(EntityKind::FinancialFigure),
            "project" | "projects" | "initiative" => Some(EntityKind::Project),
            "deadline" | "deadlines" | "duedate" | "date" => Some(EntityKind::Deadline),
            _ => None,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A schema entity that can be written to the graph by natural key.
pub trait GraphEntity {
    const KIND: EntityKind;

    /// Natural key values, aligned with `KIND.key_properties()`
    fn key(&self) -> Vec<(&'static str, String)>;

    /// Attribute values, aligned with `KIND.attribute_properties()`
    fn attributes(&self) -> Vec<(&'static str, String)>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub name: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Company {
    pub name: String,
    pub ticker: String,
    pub industry: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinancialFigure {
    pub metric: String,
    pub value: String,
    pub unit: String,
    pub year: String,
    pub company_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deadline {
    pub date: String,
    pub context: String,
}

/// A proposed edge between two extracted entities.
///
/// Entity types are kept as text: a type outside [`EntityKind`] is not an
/// extraction error, it is reported when the graph store rejects the shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub source_entity_name: String,
    pub source_entity_type: String,
    pub relationship_type: String,
    pub target_entity_name: String,
    pub target_entity_type: String,
    pub context: String,
}

impl Relationship {
    pub fn source_kind(&self) -> Option<EntityKind> {
        EntityKind::parse(&self.source_entity_type)
    }

    pub fn target_kind(&self) -> Option<EntityKind> {
        EntityKind::parse(&self.target_entity_type)
    }

    /// `REPORTS_REVENUE`, `REPORTS_NET_INCOME`, `HAS_FINANCIAL_FIGURE`, ...
    pub fn is_figure_reporting(&self) -> bool {
        self.relationship_type.starts_with("REPORTS_")
            || self.relationship_type == "HAS_FINANCIAL_FIGURE"
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionResult {
    pub persons: Vec<Person>,
    pub companies: Vec<Company>,
    pub financial_figures: Vec<FinancialFigure>,
    pub relationships: Vec<Relationship>,
    pub projects: Vec<Project>,
    pub deadlines: Vec<Deadline>,
}

impl ExtractionResult {
    pub fn is_empty(&self) -> bool {
        self.entity_count() == 0 && self.relationships.is_empty()
    }

    /// Number of entities across all five kinds
    pub fn entity_count(&self) -> usize {
        self.persons.len()
            + self.companies.len()
            + self.financial_figures.len()
            + self.projects.len()
            + self.deadlines.len()
    }
}

impl GraphEntity for Person {
    const KIND: EntityKind = EntityKind::Person;

    fn key(&self) -> Vec<(&'static str, String)> {
        vec![("name", self.name.clone())]
    }

    fn attributes(&self) -> Vec<(&'static str, String)> {
        vec![("title", self.title.clone())]
    }
}

impl GraphEntity for Company {
    const KIND: EntityKind = EntityKind::Company;

    fn key(&self) -> Vec<(&'static str, String)> {
        vec![("name", self.name.clone())]
    }

    fn attributes(&self) -> Vec<(&'static str, String)> {
        vec![
            ("ticker", self.ticker.clone()),
            ("industry", self.industry.clone()),
        ]
    }
}

impl GraphEntity for FinancialFigure {
    const KIND: EntityKind = EntityKind::FinancialFigure;

    fn key(&self) -> Vec<(&'static str, String)> {
        vec![
            ("metric", self.metric.clone()),
            ("year", self.year.clone()),
            ("company_name", self.company_name.clone()),
        ]
    }

    fn attributes(&self) -> Vec<(&'static str, String)> {
        vec![("value", self.value.clone()), ("unit", self.unit.clone())]
    }
}

impl GraphEntity for Project {
    const KIND: EntityKind = EntityKind::Project;

    fn key(&self) -> Vec<(&'static str, String)> {
        vec![("name", self.name.clone())]
    }

    fn attributes(&self) -> Vec<(&'static str, String)> {
        vec![("description", self.description.clone())]
    }
}

impl GraphEntity for Deadline {
    const KIND: EntityKind = EntityKind::Deadline;

    fn key(&self) -> Vec<(&'static str, String)> {
        vec![("date", self.date.clone())]
    }

    fn attributes(&self) -> Vec<(&'static str, String)> {
        vec![("context", self.context.clone())]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_aliases() {
        assert_eq!(EntityKind::parse("Company"), Some(EntityKind::Company));
        assert_eq!(EntityKind::parse("ORGANIZATION"), Some(EntityKind::Company));
        assert_eq!(EntityKind::parse("financial_figure"), Some(EntityKind::FinancialFigure));
        assert_eq!(EntityKind::parse("Financial Figure"), Some(EntityKind::FinancialFigure));
        assert_eq!(EntityKind::parse("people"), Some(EntityKind::Person));
        assert_eq!(EntityKind::parse("Product"), None);
    }

    #[test]
    fn test_missing_collections_default_to_empty() {
        let raw = r#"{"companies": [{"name": "Apple", "ticker": "AAPL", "industry": "Tech"}]}"#;
        let result: ExtractionResult = serde_json::from_str(raw).unwrap();
        assert_eq!(result.companies.len(), 1);
        assert!(result.persons.is_empty());
        assert!(result.deadlines.is_empty());
    }

    #[test]
    fn test_key_aligns_with_kind() {
        let figure = FinancialFigure {
            metric: "Revenue".to_string(),
            value: "383.29".to_string(),
            unit: "billion USD".to_string(),
            year: "2023".to_string(),
            company_name: "Apple".to_string(),
        };
        let names: Vec<&str> = figure.key().iter().map(|(k, _)| *k).collect();
        assert_eq!(names, EntityKind::FinancialFigure.key_properties());
        let attrs: Vec<&str> = figure.attributes().iter().map(|(k, _)| *k).collect();
        assert_eq!(attrs, EntityKind::FinancialFigure.attribute_properties());
    }
}
