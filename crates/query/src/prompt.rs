/// Reply the generation fallback uses when the model has no answer either
pub const UNKNOWN_MARKER: &str = "UNKNOWN";

pub fn build_decision_prompt(question: &str, schema: &str) -> String {
    format!(
        r#"You route questions about companies to the right knowledge source.

SOURCES:
- "graph": a property graph of extracted facts (CEOs, founders, revenue and
  other figures, competitors, deadlines). Use it for fact-based questions and
  write one read-only Cypher query against the schema below.
- "vector": a semantic index of document passages. Use it for summaries,
  explanations, strategy and other open-ended questions.
- "both": the question needs facts and surrounding context.
- "generate": neither source can help; answer from general knowledge.

Always try the graph first for fact-based queries.

GRAPH SCHEMA:
{schema}

QUERY RULES:
- Only MATCH, WHERE, RETURN, ORDER BY, SKIP and LIMIT.
- Compare names case-insensitively, e.g. toLower(c.name) CONTAINS 'apple'.
- Give every returned value an alias with AS.

QUESTION: {question}

Respond with ONLY a JSON object:
{{"route": "graph" | "vector" | "both" | "generate", "cypher": "<query or null>", "search": "<text to search passages for, or null>"}}"#
    )
}

pub fn build_answer_prompt(question: &str, evidence: &str) -> String {
    format!(
        r#"You are a corporate intelligence analyst answering questions from retrieved evidence.

EVIDENCE:
{evidence}

USER QUESTION: {question}

INSTRUCTIONS:
- Answer the question using only information from the evidence above
- Quote names, figures and dates exactly as they appear
- If the evidence doesn't contain enough information, say so
- Keep your answer concise and factual

ANSWER:"#
    )
}

pub fn build_generation_prompt(question: &str) -> String {
    format!(
        r#"You are a corporate intelligence analyst. Neither the fact graph nor the document index had information for this question.

Answer from general knowledge in a few sentences. If you do not know, reply with exactly: {UNKNOWN_MARKER}

QUESTION: {question}

ANSWER:"#
    )
}
