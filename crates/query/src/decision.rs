use async_trait::async_trait;
use extract::LanguageModel;
use extract::normalizer::locate_json_object;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::prompt::build_decision_prompt;

/// Which store(s) a question is sent to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    Graph,
    Vector,
    Both,
    Generate,
}

impl Route {
    /// Accepts the names a model tends to use for each source
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().replace(['-', ' '], "_").as_str() {
            "graph" | "graph_database" | "graph_db" | "cypher" | "neo4j" | "facts" => {
                Some(Route::Graph)
            }
            "vector" | "vector_database" | "vector_db" | "chunks" | "documents" | "semantic" => {
                Some(Route::Vector)
            }
            "both" | "hybrid" => Some(Route::Both),
            "generate" | "llm" | "none" | "model" => Some(Route::Generate),
            _ => None,
        }
    }

    pub fn uses_graph(self) -> bool {
        matches!(self, Route::Graph | Route::Both)
    }

    pub fn uses_chunks(self) -> bool {
        matches!(self, Route::Vector | Route::Both)
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Route::Graph => "graph",
            Route::Vector => "vector",
            Route::Both => "both",
            Route::Generate => "generate",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    Model,
    Keywords,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    pub route: Route,
    pub cypher: Option<String>,
    pub search: Option<String>,
    pub source: DecisionSource,
}

impl Decision {
    /// A graph route with nothing to run cannot produce evidence
    pub fn settle(mut self) -> Self {
        let has_cypher = self.cypher.as_deref().is_some_and(|c| !c.trim().is_empty());
        if !has_cypher {
            self.cypher = None;
            self.route = match self.route {
                Route::Graph | Route::Both => Route::Vector,
                other => other,
            };
        }
        self
    }
}

/// Chooses a route for a question given the graph schema description.
///
/// Implementations are total: when they cannot decide they return a
/// best-effort decision instead of an error.
#[async_trait]
pub trait DecisionMaker: Send + Sync {
    async fn decide(&self, question: &str, schema: &str) -> Decision;
}

/// Asks the model for a JSON decision, falling back to keywords
pub struct LlmDecisionMaker {
    model: Arc<dyn LanguageModel>,
    fallback: KeywordDecisionMaker,
}

#[derive(Deserialize)]
struct RawDecision {
    route: String,
    #[serde(default)]
    cypher: Option<String>,
    #[serde(default)]
    search: Option<String>,
}

impl LlmDecisionMaker {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self {
            model,
            fallback: KeywordDecisionMaker,
        }
    }
}

/// Parse the model's reply; `None` when it is not a usable decision
pub fn parse_decision(raw: &str) -> Option<Decision> {
    let json = locate_json_object(raw)?;
    let parsed: RawDecision = serde_json::from_str(json).ok()?;
    let route = Route::parse(&parsed.route)?;

    let clean = |value: Option<String>| {
        value
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("null"))
    };

    Some(Decision {
        route,
        cypher: clean(parsed.cypher),
        search: clean(parsed.search),
        source: DecisionSource::Model,
    })
}

#[async_trait]
impl DecisionMaker for LlmDecisionMaker {
    async fn decide(&self, question: &str, schema: &str) -> Decision {
        let prompt = build_decision_prompt(question, schema);
        match self.model.generate_json(&prompt).await {
            Ok(raw) => match parse_decision(&raw) {
                Some(decision) => {
                    debug!(route = %decision.route, "model decision");
                    decision
                }
                None => {
                    warn!("unparseable routing decision, using keyword routing");
                    self.fallback.decide(question, schema).await
                }
            },
            Err(e) => {
                warn!(error = %e, "routing model failed, using keyword routing");
                self.fallback.decide(question, schema).await
            }
        }
    }
}

/// Deterministic routing from question wording, with templated queries
/// for the common fact lookups
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordDecisionMaker;

const SEMANTIC_CUES: &[&str] = &[
    "summarize", "summarise", "summary", "overview", "explain", "describe", "strategy", "why ",
    "how does", "how do", "tell me about", "what does", "outlook", "discuss",
];

const QUESTION_WORDS: &[&str] = &[
    "what", "who", "whom", "which", "when", "where", "how", "is", "are", "was", "were", "does",
    "did", "do", "list", "show", "tell", "name", "give", "summarize", "summarise", "explain",
    "describe", "the", "and", "in", "of", "for", "i",
];

const ROLE_ACRONYMS: &[&str] = &["CEO", "CFO", "CTO", "COO"];

#[derive(Debug, Clone, Copy, PartialEq)]
enum FactIntent {
    Role(&'static str),
    Figure(&'static str),
    AnyFigure,
    Competitors,
    Employees,
    Deadlines,
    Projects,
}

fn fact_intent(lower: &str) -> Option<FactIntent> {
    let has = |cues: &[&str]| cues.iter().any(|cue| lower.contains(cue));

    if has(&["ceo", "chief executive"]) {
        Some(FactIntent::Role("HAS_CEO"))
    } else if has(&["cfo", "chief financial"]) {
        Some(FactIntent::Role("HAS_CFO"))
    } else if has(&["founder", "founded"]) {
        Some(FactIntent::Role("HAS_FOUNDER"))
    } else if has(&["net income", "profit"]) {
        Some(FactIntent::Figure("REPORTS_NET_INCOME"))
    } else if has(&["revenue", "sales"]) {
        Some(FactIntent::Figure("REPORTS_REVENUE"))
    } else if has(&["earnings", "financial", "figure"]) {
        Some(FactIntent::AnyFigure)
    } else if has(&["competitor", "compete", "rival"]) {
        Some(FactIntent::Competitors)
    } else if has(&["employ", "works at", "work at", "works for", "staff"]) {
        Some(FactIntent::Employees)
    } else if has(&["deadline", "due ", "due?", "when "]) {
        Some(FactIntent::Deadlines)
    } else if has(&["project", "initiative"]) {
        Some(FactIntent::Projects)
    } else {
        None
    }
}

/// First capitalized word that is not question phrasing or a role title
fn company_hint(question: &str) -> Option<String> {
    question.split_whitespace().find_map(|token| {
        let word = token.trim_matches(|c: char| !c.is_alphanumeric() && c != '\'' && c != '’');
        let word = word
            .strip_suffix("'s")
            .or_else(|| word.strip_suffix("’s"))
            .unwrap_or(word)
            .trim_matches(|c: char| !c.is_alphanumeric());

        let capitalized = word.chars().next().is_some_and(char::is_uppercase);
        if !capitalized
            || ROLE_ACRONYMS.contains(&word)
            || QUESTION_WORDS.contains(&word.to_lowercase().as_str())
        {
            return None;
        }

        let safe: String = word
            .chars()
            .filter(|c| c.is_alphanumeric() || matches!(c, '&' | '-' | '.'))
            .flat_map(char::to_lowercase)
            .collect();
        (!safe.is_empty()).then_some(safe)
    })
}

fn year_hint(question: &str) -> Option<String> {
    question
        .split(|c: char| !c.is_ascii_digit())
        .find(|token| token.len() == 4 && (token.starts_with("19") || token.starts_with("20")))
        .map(str::to_string)
}

fn company_filter(company: Option<&str>) -> String {
    company
        .map(|name| format!(" WHERE toLower(c.name) CONTAINS '{name}'"))
        .unwrap_or_default()
}

fn figure_query(relationship: &str, company: Option<&str>, year: Option<&str>) -> String {
    let mut conditions = Vec::new();
    if let Some(name) = company {
        conditions.push(format!("toLower(c.name) CONTAINS '{name}'"));
    }
    if let Some(year) = year {
        conditions.push(format!("f.year = '{year}'"));
    }
    let filter = if conditions.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conditions.join(" AND "))
    };

    format!(
        "MATCH (c:Company)-[r:{relationship}]->(f:FinancialFigure){filter} \
         RETURN c.name AS company, f.metric AS metric, f.value AS value, \
         f.unit AS unit, f.year AS year \
         ORDER BY year"
    )
}

fn template_query(intent: FactIntent, question: &str) -> String {
    let company = company_hint(question);
    let company = company.as_deref();

    match intent {
        FactIntent::Role(relationship) => format!(
            "MATCH (c:Company)-[:{relationship}]->(p:Person){} \
             RETURN c.name AS company, p.name AS person, p.title AS title",
            company_filter(company)
        ),
        FactIntent::Figure(relationship) => {
            figure_query(relationship, company, year_hint(question).as_deref())
        }
        FactIntent::AnyFigure => figure_query(
            "REPORTS_REVENUE|REPORTS_NET_INCOME|HAS_FINANCIAL_FIGURE",
            company,
            year_hint(question).as_deref(),
        ),
        FactIntent::Competitors => format!(
            "MATCH (c:Company)-[:IS_COMPETITOR_OF]-(o:Company){} \
             RETURN DISTINCT c.name AS company, o.name AS competitor",
            company_filter(company)
        ),
        FactIntent::Employees => format!(
            "MATCH (c:Company)-[:EMPLOYS]->(p:Person){} \
             RETURN c.name AS company, p.name AS person, p.title AS title",
            company_filter(company)
        ),
        FactIntent::Deadlines => "MATCH (d:Deadline) \
             RETURN d.date AS date, d.context AS context ORDER BY date LIMIT 20"
            .to_string(),
        FactIntent::Projects => "MATCH (p:Project) \
             RETURN p.name AS project, p.description AS description LIMIT 20"
            .to_string(),
    }
}

impl KeywordDecisionMaker {
    pub fn classify(&self, question: &str) -> Decision {
        let lower = question.to_lowercase();
        let semantic = SEMANTIC_CUES.iter().any(|cue| lower.contains(cue));
        // "who is X" asks for a fact even without a known cue
        let intent = fact_intent(&lower);
        let factual = intent.is_some() || lower.starts_with("who ");

        let route = match (factual, semantic) {
            (true, true) => Route::Both,
            (true, false) => Route::Graph,
            (false, _) => Route::Vector,
        };

        Decision {
            route,
            cypher: intent.map(|intent| template_query(intent, question)),
            search: Some(question.trim().to_string()),
            source: DecisionSource::Keywords,
        }
        .settle()
    }
}

#[async_trait]
impl DecisionMaker for KeywordDecisionMaker {
    async fn decide(&self, question: &str, _schema: &str) -> Decision {
        self.classify(question)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Scripted(&'static str);

    #[async_trait]
    impl LanguageModel for Scripted {
        async fn generate(&self, _prompt: &str) -> anyhow::Result<String> {
            if self.0.is_empty() {
                anyhow::bail!("model offline");
            }
            Ok(self.0.to_string())
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    #[test]
    fn test_ceo_question_routes_to_graph() {
        let decision = KeywordDecisionMaker.classify("What is Apple's CEO?");
        assert_eq!(decision.route, Route::Graph);
        let cypher = decision.cypher.unwrap();
        assert!(cypher.contains("[:HAS_CEO]"));
        assert!(cypher.contains("CONTAINS 'apple'"));
    }

    #[test]
    fn test_summary_question_routes_to_chunks() {
        let decision = KeywordDecisionMaker.classify("Summarize Apple's strategy");
        assert_eq!(decision.route, Route::Vector);
        assert_eq!(decision.cypher, None);
        assert_eq!(decision.search.as_deref(), Some("Summarize Apple's strategy"));
    }

    #[test]
    fn test_mixed_question_uses_both() {
        let decision =
            KeywordDecisionMaker.classify("Explain how Microsoft revenue changed in 2023");
        assert_eq!(decision.route, Route::Both);
        let cypher = decision.cypher.unwrap();
        assert!(cypher.contains("REPORTS_REVENUE"));
        assert!(cypher.contains("f.year = '2023'"));
        assert!(cypher.contains("'microsoft'"));
    }

    #[test]
    fn test_who_without_template_degrades_to_vector() {
        let decision = KeywordDecisionMaker.classify("Who is Jane Doe?");
        assert_eq!(decision.route, Route::Vector);
    }

    #[test]
    fn test_company_hint_skips_question_words_and_titles() {
        assert_eq!(company_hint("Who is the CEO of Tesla?").as_deref(), Some("tesla"));
        assert_eq!(company_hint("what is the revenue"), None);
        assert_eq!(company_hint("List O'Reilly's founders").as_deref(), Some("oreilly"));
    }

    #[test]
    fn test_parse_decision_accepts_wrapped_json() {
        let raw = "Sure:\n```json\n{\"route\": \"Graph Database\", \
                   \"cypher\": \"MATCH (c:Company) RETURN c.name AS name\", \
                   \"search\": null}\n```";
        let decision = parse_decision(raw).unwrap();
        assert_eq!(decision.route, Route::Graph);
        assert!(decision.cypher.is_some());
        assert_eq!(decision.search, None);
        assert!(parse_decision("{\"route\": \"somewhere\"}").is_none());
        assert!(parse_decision("no json").is_none());
    }

    #[test]
    fn test_graph_without_query_settles_to_vector() {
        let decision = Decision {
            route: Route::Graph,
            cypher: Some("  ".into()),
            search: None,
            source: DecisionSource::Model,
        }
        .settle();
        assert_eq!(decision.route, Route::Vector);
        assert_eq!(decision.cypher, None);
    }

    #[tokio::test]
    async fn test_llm_decision_falls_back_to_keywords() {
        let offline = LlmDecisionMaker::new(Arc::new(Scripted("")));
        let decision = offline.decide("What is Apple's CEO?", "").await;
        assert_eq!(decision.source, DecisionSource::Keywords);
        assert_eq!(decision.route, Route::Graph);

        let garbled = LlmDecisionMaker::new(Arc::new(Scripted("route: graph")));
        let decision = garbled.decide("Summarize Apple's strategy", "").await;
        assert_eq!(decision.source, DecisionSource::Keywords);
        assert_eq!(decision.route, Route::Vector);
    }

    #[tokio::test]
    async fn test_llm_decision_is_used_when_valid() {
        let reply = r#"{"route": "vector", "search": "apple strategy"}"#;
        let model = LlmDecisionMaker::new(Arc::new(Scripted(reply)));
        let decision = model.decide("anything", "").await;
        assert_eq!(decision.source, DecisionSource::Model);
        assert_eq!(decision.route, Route::Vector);
        assert_eq!(decision.search.as_deref(), Some("apple strategy"));
    }
}
