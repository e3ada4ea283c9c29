pub fn build_extraction_prompt(chunk_text: &str) -> String {
    format!(
        r#"You are an expert at extracting structured information from business text.

INSTRUCTIONS:
1. Identify people, companies, financial figures, projects and deadlines
2. Extract relationships between those entities
3. Output ONLY valid JSON, nothing else
4. Use the exact schema below

SCHEMA:
{{
  "persons": [
    {{"name": "Name of the person", "title": "Title or role within the company"}}
  ],
  "companies": [
    {{"name": "Name of the company", "ticker": "Stock ticker symbol", "industry": "Industry of the company"}}
  ],
  "financial_figures": [
    {{"metric": "Revenue|Net Income|Assets|...", "value": "numeric value", "unit": "million USD|billion EUR|%|...", "year": "fiscal year or period", "company_name": "company the figure belongs to"}}
  ],
  "projects": [
    {{"name": "Name of the project", "description": "Brief description"}}
  ],
  "deadlines": [
    {{"date": "Deadline date, e.g. July 20th, 2025", "context": "The sentence the deadline was taken from"}}
  ],
  "relationships": [
    {{"source_entity_name": "Apple", "source_entity_type": "Company", "relationship_type": "HAS_CEO", "target_entity_name": "Tim Cook", "target_entity_type": "Person", "context": "supporting text"}}
  ]
}}

RULES:
- Entity types must be one of: Person, Company, FinancialFigure, Project, Deadline
- Relationship types are UPPER_SNAKE_CASE, for example HAS_CEO, HAS_CFO, HAS_FOUNDER, EMPLOYS, REPORTS_REVENUE, REPORTS_NET_INCOME, IS_COMPETITOR_OF
- For REPORTS_* relationships use the figure value as target_entity_name and the figure year as context
- Use 'N/A' if a detail such as ticker or industry is unavailable
- If a deadline is given like "submit by July 20th", extract the date and quote that line as context
- Every list may be empty; never invent facts that are not in the text
- Output ONLY the JSON object, no markdown, no explanations

TEXT:
{}

JSON OUTPUT:"#,
        chunk_text
    )
}

pub fn build_retry_prompt(invalid_json: &str) -> String {
    format!(
        r#"The following JSON is invalid:

{}

Fix this JSON. Output only valid JSON with no markdown formatting, no code blocks, no explanations. Just the raw JSON object."#,
        invalid_json
    )
}
