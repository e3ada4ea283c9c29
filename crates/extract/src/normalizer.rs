use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::LazyLock;
use tracing::debug;

use crate::error::ExtractionError;
use crate::schema::{
    Company, Deadline, EntityKind, ExtractionResult, FinancialFigure, NOT_AVAILABLE, Person,
    Project, Relationship,
};

static CODE_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^\s*```[A-Za-z]*\s*(.*?)\s*```\s*$").expect("valid fence pattern")
});
static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace pattern"));
static NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-?\d[\d,]*(?:\.\d+)?").expect("valid number pattern"));
static PERIOD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?i)(q[1-4]|h[12]|fy\d*)$").expect("valid period pattern"));

/// Trailing words that do not distinguish one company from another
const CORPORATE_SUFFIXES: &[&str] = &[
    "inc", "incorporated", "corp", "corporation", "co", "company", "ltd", "limited", "llc", "plc",
];

/// Values models use when they mean "not found"
const EMPTY_MARKERS: &[&str] = &["", "n/a", "na", "none", "null", "unknown", "not available"];

/// Turns untyped model output into a well-formed [`ExtractionResult`].
///
/// The alias table lives as long as the normalizer, so one instance per
/// ingestion run resolves "Apple Inc." in a later chunk to the "Apple" seen
/// earlier.
pub struct EntityNormalizer {
    /// (kind, folded name) -> canonical name
    aliases: HashMap<(EntityKind, String), String>,
}

impl EntityNormalizer {
    pub fn new() -> Self {
        Self {
            aliases: HashMap::new(),
        }
    }

    /// Canonical display form for an entity name of the given kind
    pub fn normalize(&mut self, kind: EntityKind, name: &str) -> String {
        let display = match kind {
            EntityKind::Deadline => canonical_date(name),
            _ => canonical_text(name),
        };
        if display == NOT_AVAILABLE {
            return display;
        }

        let folded = fold_name(kind, &display);
        if folded.is_empty() {
            return display;
        }

        self.aliases
            .entry((kind, folded))
            .or_insert(display)
            .clone()
    }

    /// Parse raw model text and normalize it.
    pub fn normalize_output(&mut self, raw: &str) -> Result<ExtractionResult, ExtractionError> {
        let json = locate_json_object(raw)
            .ok_or_else(|| ExtractionError::Parse("no JSON object in model output".to_string()))?;
        let value: Value =
            serde_json::from_str(json).map_err(|e| ExtractionError::Parse(e.to_string()))?;
        self.normalize_value(&value)
    }

    /// Normalize an already-parsed JSON document.
    pub fn normalize_value(&mut self, value: &Value) -> Result<ExtractionResult, ExtractionError> {
        let root = value
            .as_object()
            .ok_or_else(|| ExtractionError::Parse("top-level value is not an object".to_string()))?;

        let mut result = ExtractionResult::default();

        for item in collection(root, &["persons", "people", "person"]) {
            let name = self.normalize(EntityKind::Person, &text_field(item, &["name"]));
            if name == NOT_AVAILABLE {
                continue;
            }
            result.persons.push(Person {
                name,
                title: text_field(item, &["title", "role", "position"]),
            });
        }

        for item in collection(root, &["companies", "company", "organizations"]) {
            let name = self.normalize(EntityKind::Company, &text_field(item, &["name"]));
            if name == NOT_AVAILABLE {
                continue;
            }
            result.companies.push(Company {
                name,
                ticker: text_field(item, &["ticker", "symbol"]),
                industry: text_field(item, &["industry", "sector"]),
            });
        }

        for item in collection(
            root,
            &["financial_figures", "financialFigures", "financial_figure", "figures"],
        ) {
            let metric = canonical_text(&text_field(item, &["metric", "name"]));
            if metric == NOT_AVAILABLE {
                continue;
            }
            let company = text_field(item, &["company_name", "company", "companyName"]);
            result.financial_figures.push(FinancialFigure {
                metric,
                value: canonical_text(&text_field(item, &["value", "amount"])),
                unit: text_field(item, &["unit", "currency"]),
                year: canonical_text(&text_field(item, &["year", "period", "fiscal_year"])),
                company_name: self.normalize(EntityKind::Company, &company),
            });
        }

        for item in collection(root, &["projects", "project"]) {
            let name = self.normalize(EntityKind::Project, &text_field(item, &["name", "title"]));
            if name == NOT_AVAILABLE {
                continue;
            }
            result.projects.push(Project {
                name,
                description: text_field(item, &["description", "summary"]),
            });
        }

        for item in collection(root, &["deadlines", "deadline"]) {
            let date = self.normalize(
                EntityKind::Deadline,
                &text_field(item, &["date", "due_date", "deadline"]),
            );
            if date == NOT_AVAILABLE {
                continue;
            }
            result.deadlines.push(Deadline {
                date,
                context: text_field(item, &["context", "text"]),
            });
        }

        for item in collection(root, &["relationships", "relations", "relationship", "edges"]) {
            if let Some(relationship) = self.relationship(item) {
                result.relationships.push(relationship);
            }
        }

        link_figures_to_companies(&mut result);
        collapse_duplicates(&mut result);

        Ok(result)
    }

    fn relationship(&mut self, item: &Map<String, Value>) -> Option<Relationship> {
        let relationship_type =
            canonical_relation_type(&text_field(item, &["relationship_type", "type", "relation"]))?;

        let source_type =
            canonical_kind_text(&text_field(item, &["source_entity_type", "source_type"]));
        let target_type =
            canonical_kind_text(&text_field(item, &["target_entity_type", "target_type"]));

        let source_name = self.endpoint_name(
            &source_type,
            &text_field(item, &["source_entity_name", "source_name", "source"]),
        );
        let target_name = self.endpoint_name(
            &target_type,
            &text_field(item, &["target_entity_name", "target_name", "target"]),
        );

        if source_name == NOT_AVAILABLE || target_name == NOT_AVAILABLE {
            debug!(relationship = %relationship_type, "dropping relationship without endpoints");
            return None;
        }

        Some(Relationship {
            source_entity_name: source_name,
            source_entity_type: source_type,
            relationship_type,
            target_entity_name: target_name,
            target_entity_type: target_type,
            context: text_field(item, &["context", "evidence"]),
        })
    }

    /// Figures are addressed by value, not name, so they skip the alias table
    fn endpoint_name(&mut self, type_text: &str, raw: &str) -> String {
        match EntityKind::parse(type_text) {
            Some(EntityKind::FinancialFigure) | None => canonical_text(raw),
            Some(kind) => self.normalize(kind, raw),
        }
    }

    pub fn alias_count(&self) -> usize {
        self.aliases.len()
    }
}

impl Default for EntityNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Stamp `company_name` on figures that a figure-reporting relationship
/// points at, matching the relationship target against the figure value and
/// its context against the figure year. Best effort: unmatched figures keep
/// the sentinel company.
pub fn link_figures_to_companies(result: &mut ExtractionResult) {
    for relationship in result.relationships.iter().filter(|r| r.is_figure_reporting()) {
        let matched = result.financial_figures.iter_mut().find(|figure| {
            figure.company_name == NOT_AVAILABLE
                && values_match(&figure.value, &relationship.target_entity_name)
                && year_matches(&figure.year, &relationship.context)
        });

        if let Some(figure) = matched {
            debug!(
                metric = %figure.metric,
                company = %relationship.source_entity_name,
                "linked financial figure to company"
            );
            figure.company_name = relationship.source_entity_name.clone();
        }
    }
}

/// Compare a figure value with free text that is supposed to restate it.
/// Numbers are compared by their first numeric token ("$383.29 billion" ~ "383.29").
pub fn values_match(value: &str, text: &str) -> bool {
    if value == NOT_AVAILABLE {
        return false;
    }
    match (first_number(value), first_number(text)) {
        (Some(a), Some(b)) => a == b,
        _ => value.trim().eq_ignore_ascii_case(text.trim()),
    }
}

/// The relationship context either is the year or mentions it as a token.
pub fn year_matches(year: &str, context: &str) -> bool {
    if year == NOT_AVAILABLE {
        return false;
    }
    let context = context.trim();
    context == year || context.split(|c: char| !c.is_alphanumeric()).any(|token| token == year)
}

fn first_number(text: &str) -> Option<String> {
    NUMBER
        .find(text)
        .map(|m| m.as_str().replace(',', ""))
        .map(|n| match n.parse::<f64>() {
            Ok(parsed) => render_float(parsed),
            Err(_) => n,
        })
}

/// Strip markdown fences and surrounding prose, returning the outermost object.
pub fn locate_json_object(raw: &str) -> Option<&str> {
    let unfenced = CODE_FENCE
        .captures(raw)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .unwrap_or(raw);

    let start = unfenced.find('{')?;
    let end = unfenced.rfind('}')?;
    (end > start).then(|| &unfenced[start..=end])
}

/// Uppercase snake case; `None` when nothing identifier-like remains.
pub fn canonical_relation_type(raw: &str) -> Option<String> {
    let mut tag = String::with_capacity(raw.len());
    for c in raw.trim().chars() {
        if c.is_ascii_alphanumeric() {
            tag.push(c.to_ascii_uppercase());
        } else if !tag.ends_with('_') {
            tag.push('_');
        }
    }
    let tag = tag.trim_matches('_').to_string();

    if tag.is_empty() || tag == "N_A" || tag.starts_with(|c: char| c.is_ascii_digit()) {
        None
    } else {
        Some(tag)
    }
}

fn canonical_kind_text(raw: &str) -> String {
    match EntityKind::parse(raw) {
        Some(kind) => kind.label().to_string(),
        None => canonical_text(raw),
    }
}

/// Collapse whitespace and trim stray punctuation; empty markers become `N/A`.
pub fn canonical_text(raw: &str) -> String {
    let collapsed = WHITESPACE.replace_all(raw.trim(), " ");
    let trimmed = collapsed.trim_matches(|c: char| {
        c.is_whitespace() || matches!(c, '.' | ',' | ';' | ':' | '!' | '?' | '"' | '\'' | '`')
    });

    if is_empty_marker(trimmed) {
        NOT_AVAILABLE.to_string()
    } else {
        trimmed.to_string()
    }
}

const MONTHS_AND_DAYS: &[&str] = &[
    "january", "february", "march", "april", "may", "june", "july", "august", "september",
    "october", "november", "december", "jan", "feb", "mar", "apr", "jun", "jul", "aug", "sep",
    "sept", "oct", "nov", "dec", "monday", "tuesday", "wednesday", "thursday", "friday",
    "saturday", "sunday",
];

/// Deadline dates are graph keys, so casing is fixed: month and day names
/// capitalized, `Q3`/`H1`/`FY2024` upper case, every other word lower case.
pub fn canonical_date(raw: &str) -> String {
    let text = canonical_text(raw);
    if text == NOT_AVAILABLE {
        return text;
    }

    text.split(' ')
        .map(|word| {
            let core = word.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase();
            if PERIOD.is_match(&core) {
                word.to_uppercase()
            } else if MONTHS_AND_DAYS.contains(&core.as_str()) {
                capitalize(&word.to_lowercase())
            } else {
                word.to_lowercase()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn is_empty_marker(text: &str) -> bool {
    let lowered = text.trim().to_lowercase();
    EMPTY_MARKERS.contains(&lowered.as_str())
}

fn fold_name(kind: EntityKind, display: &str) -> String {
    let lowered: String = display
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    let mut words: Vec<&str> = lowered.split_whitespace().collect();

    if kind == EntityKind::Company {
        while words.len() > 1 && words.last().is_some_and(|w| CORPORATE_SUFFIXES.contains(w)) {
            words.pop();
        }
    }

    words.join(" ")
}

fn collection<'a>(root: &'a Map<String, Value>, names: &[&str]) -> Vec<&'a Map<String, Value>> {
    names
        .iter()
        .find_map(|name| root.get(*name))
        .map(|value| match value {
            Value::Array(items) => items.iter().filter_map(Value::as_object).collect(),
            Value::Object(single) => vec![single],
            _ => Vec::new(),
        })
        .unwrap_or_default()
}

/// First present, non-empty field among `names`, rendered as text.
fn text_field(item: &Map<String, Value>, names: &[&str]) -> String {
    for name in names {
        let rendered = match item.get(*name) {
            Some(Value::String(s)) => s.trim().to_string(),
            Some(Value::Number(n)) => render_number(n),
            Some(Value::Bool(b)) => b.to_string(),
            _ => continue,
        };
        if !is_empty_marker(&rendered) {
            return rendered;
        }
    }
    NOT_AVAILABLE.to_string()
}

fn render_number(n: &serde_json::Number) -> String {
    if let Some(i) = n.as_i64() {
        i.to_string()
    } else if let Some(u) = n.as_u64() {
        u.to_string()
    } else {
        n.as_f64().map(render_float).unwrap_or_else(|| n.to_string())
    }
}

fn render_float(f: f64) -> String {
    if f.fract() == 0.0 && f.abs() < 1e15 {
        format!("{}", f as i64)
    } else {
        format!("{}", f)
    }
}

/// Keep one item per natural key. Later items overwrite attributes, except
/// that a real value is never replaced by the sentinel.
fn collapse_duplicates(result: &mut ExtractionResult) {
    result.persons = collapse(
        std::mem::take(&mut result.persons),
        |p| vec![p.name.to_lowercase()],
        |kept, p| overwrite(&mut kept.title, p.title),
    );
    result.companies = collapse(
        std::mem::take(&mut result.companies),
        |c| vec![c.name.to_lowercase()],
        |kept, c| {
            overwrite(&mut kept.ticker, c.ticker);
            overwrite(&mut kept.industry, c.industry);
        },
    );
    result.financial_figures = collapse(
        std::mem::take(&mut result.financial_figures),
        |f| vec![f.metric.to_lowercase(), f.year.clone(), f.company_name.to_lowercase()],
        |kept, f| {
            overwrite(&mut kept.value, f.value);
            overwrite(&mut kept.unit, f.unit);
        },
    );
    result.projects = collapse(
        std::mem::take(&mut result.projects),
        |p| vec![p.name.to_lowercase()],
        |kept, p| overwrite(&mut kept.description, p.description),
    );
    result.deadlines = collapse(
        std::mem::take(&mut result.deadlines),
        |d| vec![d.date.to_lowercase()],
        |kept, d| overwrite(&mut kept.context, d.context),
    );
    result.relationships = collapse(
        std::mem::take(&mut result.relationships),
        |r| {
            vec![
                r.source_entity_type.clone(),
                r.source_entity_name.to_lowercase(),
                r.relationship_type.clone(),
                r.target_entity_type.clone(),
                r.target_entity_name.to_lowercase(),
            ]
        },
        |kept, r| overwrite(&mut kept.context, r.context),
    );
}

fn collapse<T, K, M>(items: Vec<T>, key: K, mut merge: M) -> Vec<T>
where
    K: Fn(&T) -> Vec<String>,
    M: FnMut(&mut T, T),
{
    let mut kept: Vec<T> = Vec::with_capacity(items.len());
    let mut positions: HashMap<Vec<String>, usize> = HashMap::new();

    for item in items {
        let k = key(&item);
        match positions.get(&k) {
            Some(&idx) => merge(&mut kept[idx], item),
            None => {
                positions.insert(k, kept.len());
                kept.push(item);
            }
        }
    }

    kept
}

fn overwrite(slot: &mut String, incoming: String) {
    if incoming != NOT_AVAILABLE {
        *slot = incoming;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalization() {
        let mut normalizer = EntityNormalizer::new();

        assert_eq!(normalizer.normalize(EntityKind::Company, "  Apple  "), "Apple");
        assert_eq!(normalizer.normalize(EntityKind::Company, "Apple!"), "Apple");
        assert_eq!(normalizer.normalize(EntityKind::Person, "Tim   Cook"), "Tim Cook");
    }

    #[test]
    fn test_alias_resolution() {
        let mut normalizer = EntityNormalizer::new();

        let n1 = normalizer.normalize(EntityKind::Company, "Apple");
        let n2 = normalizer.normalize(EntityKind::Company, "Apple Inc.");
        let n3 = normalizer.normalize(EntityKind::Company, "APPLE");

        assert_eq!(n1, n2);
        assert_eq!(n1, n3);
        // suffix folding is a company-only rule
        assert_ne!(
            normalizer.normalize(EntityKind::Project, "Nebula"),
            normalizer.normalize(EntityKind::Project, "Nebula Co")
        );
    }

    #[test]
    fn test_missing_attributes_become_sentinel() {
        let mut normalizer = EntityNormalizer::new();
        let result = normalizer
            .normalize_value(&json!({
                "companies": [{"name": "Apple", "ticker": null}],
                "persons": [{"name": "Tim Cook", "title": ""}]
            }))
            .unwrap();

        assert_eq!(result.companies[0].ticker, NOT_AVAILABLE);
        assert_eq!(result.companies[0].industry, NOT_AVAILABLE);
        assert_eq!(result.persons[0].title, NOT_AVAILABLE);
    }

    #[test]
    fn test_entities_without_key_are_dropped() {
        let mut normalizer = EntityNormalizer::new();
        let result = normalizer
            .normalize_value(&json!({
                "persons": [{"title": "CEO"}, {"name": "N/A", "title": "CFO"}],
                "deadlines": [{"context": "soon"}]
            }))
            .unwrap();

        assert!(result.persons.is_empty());
        assert!(result.deadlines.is_empty());
    }

    #[test]
    fn test_fenced_output_is_accepted() {
        let mut normalizer = EntityNormalizer::new();
        let raw = "```json\n{\"companies\": [{\"name\": \"Google\", \"ticker\": \"GOOGL\"}]}\n```";
        let result = normalizer.normalize_output(raw).unwrap();
        assert_eq!(result.companies[0].ticker, "GOOGL");
    }

    #[test]
    fn test_garbage_is_a_parse_error() {
        let mut normalizer = EntityNormalizer::new();
        assert!(matches!(
            normalizer.normalize_output("I could not find anything."),
            Err(ExtractionError::Parse(_))
        ));
        assert!(normalizer.normalize_output("{not json}").is_err());
    }

    #[test]
    fn test_relationship_canonicalization() {
        let mut normalizer = EntityNormalizer::new();
        let result = normalizer
            .normalize_value(&json!({
                "relationships": [{
                    "source_entity_name": "Apple Inc.",
                    "source_entity_type": "organization",
                    "relationship_type": "has ceo",
                    "target_entity_name": "Tim Cook",
                    "target_entity_type": "PERSON",
                    "context": "Tim Cook is the CEO of Apple."
                }]
            }))
            .unwrap();

        let rel = &result.relationships[0];
        assert_eq!(rel.relationship_type, "HAS_CEO");
        assert_eq!(rel.source_entity_type, "Company");
        assert_eq!(rel.target_entity_type, "Person");
        assert_eq!(rel.source_kind(), Some(EntityKind::Company));
    }

    #[test]
    fn test_unknown_entity_type_is_kept_for_reporting() {
        let mut normalizer = EntityNormalizer::new();
        let result = normalizer
            .normalize_value(&json!({
                "relationships": [{
                    "source_entity_name": "Apple",
                    "source_entity_type": "Company",
                    "relationship_type": "MAKES",
                    "target_entity_name": "iPhone",
                    "target_entity_type": "Product"
                }]
            }))
            .unwrap();

        assert_eq!(result.relationships.len(), 1);
        assert_eq!(result.relationships[0].target_kind(), None);
    }

    #[test]
    fn test_numeric_values_render_as_text() {
        let mut normalizer = EntityNormalizer::new();
        let result = normalizer
            .normalize_value(&json!({
                "financial_figures": [
                    {"metric": "Revenue", "value": 383.29, "unit": "billion USD", "year": 2023}
                ]
            }))
            .unwrap();

        let figure = &result.financial_figures[0];
        assert_eq!(figure.value, "383.29");
        assert_eq!(figure.year, "2023");
        assert_eq!(figure.company_name, NOT_AVAILABLE);
    }

    #[test]
    fn test_figure_linked_from_reporting_relationship() {
        let mut normalizer = EntityNormalizer::new();
        let result = normalizer
            .normalize_value(&json!({
                "financial_figures": [
                    {"metric": "Revenue", "value": 383.29, "unit": "billion USD", "year": 2023},
                    {"metric": "Net Income", "value": 73.8, "unit": "billion USD", "year": 2023}
                ],
                "relationships": [{
                    "source_entity_name": "Apple",
                    "source_entity_type": "Company",
                    "relationship_type": "REPORTS_REVENUE",
                    "target_entity_name": "383.29",
                    "target_entity_type": "FinancialFigure",
                    "context": "2023"
                }]
            }))
            .unwrap();

        assert_eq!(result.financial_figures[0].company_name, "Apple");
        assert_eq!(result.financial_figures[1].company_name, NOT_AVAILABLE);
    }

    #[test]
    fn test_link_requires_year_match() {
        let mut result = ExtractionResult {
            financial_figures: vec![FinancialFigure {
                metric: "Revenue".to_string(),
                value: "383.29".to_string(),
                unit: "billion USD".to_string(),
                year: "2023".to_string(),
                company_name: NOT_AVAILABLE.to_string(),
            }],
            relationships: vec![Relationship {
                source_entity_name: "Apple".to_string(),
                source_entity_type: "Company".to_string(),
                relationship_type: "REPORTS_REVENUE".to_string(),
                target_entity_name: "$383.29 billion".to_string(),
                target_entity_type: "FinancialFigure".to_string(),
                context: "fiscal 2022".to_string(),
            }],
            ..Default::default()
        };

        link_figures_to_companies(&mut result);
        assert_eq!(result.financial_figures[0].company_name, NOT_AVAILABLE);

        result.relationships[0].context = "revenue in fiscal year 2023".to_string();
        link_figures_to_companies(&mut result);
        assert_eq!(result.financial_figures[0].company_name, "Apple");
    }

    #[test]
    fn test_duplicates_collapse_keeping_real_values() {
        let mut normalizer = EntityNormalizer::new();
        let result = normalizer
            .normalize_value(&json!({
                "companies": [
                    {"name": "Apple", "ticker": "AAPL", "industry": "N/A"},
                    {"name": "Apple Inc.", "ticker": null, "industry": "Consumer Electronics"}
                ]
            }))
            .unwrap();

        assert_eq!(result.companies.len(), 1);
        assert_eq!(result.companies[0].ticker, "AAPL");
        assert_eq!(result.companies[0].industry, "Consumer Electronics");
    }

    #[test]
    fn test_deadline_dates_are_canonical() {
        assert_eq!(canonical_date("june 30, 2024"), "June 30, 2024");
        assert_eq!(canonical_date("JUNE 30, 2024."), "June 30, 2024");
        assert_eq!(canonical_date("end of q3 fy2024"), "end of Q3 FY2024");
        assert_eq!(canonical_date("n/a"), NOT_AVAILABLE);

        // separate runs agree without sharing an alias table
        let first = EntityNormalizer::new()
            .normalize_value(&serde_json::json!({"deadlines": [{"date": "June 30, 2024"}]}))
            .unwrap();
        let second = EntityNormalizer::new()
            .normalize_value(&serde_json::json!({
                "deadlines": [{"date": "june 30, 2024"}],
                "relationships": [{
                    "source_entity_name": "Vision Pro",
                    "source_entity_type": "Project",
                    "relationship_type": "has deadline",
                    "target_entity_name": "JUNE 30, 2024",
                    "target_entity_type": "Deadline"
                }]
            }))
            .unwrap();
        assert_eq!(first.deadlines[0].date, second.deadlines[0].date);
        assert_eq!(second.relationships[0].target_entity_name, "June 30, 2024");
    }

    #[test]
    fn test_relation_type_tags() {
        assert_eq!(
            canonical_relation_type("is competitor of").as_deref(),
            Some("IS_COMPETITOR_OF")
        );
        assert_eq!(canonical_relation_type("HAS-CEO").as_deref(), Some("HAS_CEO"));
        assert_eq!(canonical_relation_type("  `x`) DELETE n //").as_deref(), Some("X_DELETE_N"));
        assert_eq!(canonical_relation_type("N/A"), None);
        assert_eq!(canonical_relation_type("  "), None);
    }
}
