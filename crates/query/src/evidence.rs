use index::{Record, ScoredChunk};
use serde_json::Value;

/// What the stores returned for one question
#[derive(Debug, Clone, Default)]
pub struct Evidence {
    pub graph: Option<GraphEvidence>,
    pub chunks: Vec<ScoredChunk>,
}

#[derive(Debug, Clone)]
pub struct GraphEvidence {
    pub cypher: String,
    pub records: Vec<Record>,
}

impl Evidence {
    pub fn is_empty(&self) -> bool {
        self.graph.is_none() && self.chunks.is_empty()
    }

    /// Prompt-ready text: graph rows first, then numbered passages
    pub fn render(&self) -> String {
        let mut context = String::new();

        if let Some(graph) = &self.graph {
            context.push_str("FACTS FROM THE GRAPH:\n");
            for record in &graph.records {
                context.push_str(&format!("- {}\n", render_record(record)));
            }
        }

        if !self.chunks.is_empty() {
            if !context.is_empty() {
                context.push('\n');
            }
            context.push_str("RELEVANT PASSAGES:\n");
            for (i, scored) in self.chunks.iter().enumerate() {
                context.push_str(&format!(
                    "[Passage {}] ({}) {}\n\n",
                    i + 1,
                    scored.chunk.filename(),
                    scored.chunk.text.trim()
                ));
            }
        }

        context.trim_end().to_string()
    }

    /// Answer built from the evidence alone, used when synthesis fails
    pub fn plain_answer(&self) -> String {
        if let Some(graph) = &self.graph {
            return graph
                .records
                .iter()
                .map(render_record)
                .collect::<Vec<_>>()
                .join("\n");
        }

        self.chunks
            .first()
            .map(|scored| scored.chunk.text.trim().to_string())
            .unwrap_or_default()
    }
}

/// Rows that carry at least one known value
pub fn usable_records(records: Vec<Record>) -> Vec<Record> {
    records
        .into_iter()
        .filter(|record| record.values().any(is_known))
        .collect()
}

fn is_known(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty() && s != extract::NOT_AVAILABLE,
        Value::Array(items) => items.iter().any(is_known),
        _ => true,
    }
}

pub fn render_record(record: &Record) -> String {
    record
        .iter()
        .filter(|(_, value)| is_known(value))
        .map(|(key, value)| format!("{key}: {}", render_value(value)))
        .collect::<Vec<_>>()
        .join(", ")
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .filter(|item| is_known(item))
            .map(render_value)
            .collect::<Vec<_>>()
            .join("; "),
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| format!("{k}={}", render_value(v)))
            .collect::<Vec<_>>()
            .join(" "),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ingest::Chunk;
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_unknown_values_are_not_evidence() {
        let rows = vec![
            record(json!({"person": "N/A", "title": null})),
            record(json!({"person": "Tim Cook", "title": "N/A"})),
        ];
        let usable = usable_records(rows);
        assert_eq!(usable.len(), 1);
        assert_eq!(render_record(&usable[0]), "person: Tim Cook");
    }

    #[test]
    fn test_render_lists_facts_then_passages() {
        let evidence = Evidence {
            graph: Some(GraphEvidence {
                cypher: "MATCH ...".into(),
                records: vec![record(
                    json!({"company": "Apple", "people": ["Tim Cook", "Luca Maestri"]}),
                )],
            }),
            chunks: vec![ScoredChunk {
                chunk: Chunk::new(
                    "d".into(),
                    "Apple makes phones. ".into(),
                    "apple.txt".into(),
                    (0, 20),
                ),
                score: 0.9,
            }],
        };

        let text = evidence.render();
        let facts = "FACTS FROM THE GRAPH:\n- company: Apple, people: Tim Cook; Luca Maestri";
        assert!(text.starts_with(facts));
        assert!(text.ends_with("[Passage 1] (apple.txt) Apple makes phones."));
        assert_eq!(evidence.plain_answer(), "company: Apple, people: Tim Cook; Luca Maestri");
    }

    #[test]
    fn test_plain_answer_uses_top_chunk() {
        let evidence = Evidence {
            graph: None,
            chunks: vec![ScoredChunk {
                chunk: Chunk::new("d".into(), " first ".into(), "a.txt".into(), (0, 7)),
                score: 0.5,
            }],
        };
        assert_eq!(evidence.plain_answer(), "first");
        assert!(Evidence::default().is_empty());
    }
}
