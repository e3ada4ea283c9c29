use async_trait::async_trait;
use extract::EntityKind;
use neo4rs::{ConfigBuilder, Graph, Query, Txn};
use tracing::{debug, info, warn};

use crate::error::GraphError;
use crate::graph_store::{GraphBackend, Record};
use crate::write_plan::{NodeRef, WriteOp};

#[derive(Debug, Clone)]
pub struct Neo4jConfig {
    pub uri: String,
    pub user: String,
    pub password: String,
    pub database: String,
}

impl Default for Neo4jConfig {
    fn default() -> Self {
        Self {
            uri: "bolt://localhost:7687".to_string(),
            user: "neo4j".to_string(),
            password: String::new(),
            database: "neo4j".to_string(),
        }
    }
}

pub struct Neo4jBackend {
    graph: Graph,
}

impl Neo4jBackend {
    pub fn new(graph: Graph) -> Self {
        Self { graph }
    }

    /// Open a connection pool and check the server answers
    pub async fn connect(config: &Neo4jConfig) -> Result<Self, GraphError> {
        let neo4j_config = ConfigBuilder::default()
            .uri(config.uri.as_str())
            .user(config.user.as_str())
            .password(config.password.as_str())
            .db(config.database.as_str())
            .build()
            .map_err(|e| GraphError::Connection(e.to_string()))?;

        let graph = Graph::connect(neo4j_config)
            .await
            .map_err(|e| GraphError::Connection(format!("{}: {e}", config.uri)))?;

        graph
            .run(Query::new("RETURN 1".to_string()))
            .await
            .map_err(|e| GraphError::Connection(format!("{}: {e}", config.uri)))?;

        info!(uri = %config.uri, database = %config.database, "connected to Neo4j");
        Ok(Self::new(graph))
    }
}

fn constraint_statement(kind: EntityKind) -> String {
    let label = kind.label();
    let name = format!("{}_key", label.to_lowercase());
    let properties: Vec<String> = kind.key_properties().iter().map(|p| format!("n.{p}")).collect();

    let target = if properties.len() == 1 {
        properties[0].clone()
    } else {
        format!("({})", properties.join(", "))
    };
    format!("CREATE CONSTRAINT {name} IF NOT EXISTS FOR (n:{label}) REQUIRE {target} IS UNIQUE")
}

/// `{name: $s_name}` style map plus the parameter values it refers to
fn key_pattern(node: &NodeRef, prefix: &str) -> (String, Vec<(String, String)>) {
    let mut params = Vec::new();
    let fields: Vec<String> = node
        .key
        .iter()
        .map(|(property, value)| {
            let param = format!("{prefix}{property}");
            params.push((param.clone(), value.clone()));
            format!("{property}: ${param}")
        })
        .collect();
    (format!("{{{}}}", fields.join(", ")), params)
}

/// An unknown incoming value keeps whatever the node already has
fn keep_known(target: &str, param: &str) -> String {
    format!("{target} = coalesce(CASE WHEN ${param} = 'N/A' THEN {target} END, ${param})")
}

fn render(op: &WriteOp) -> Query {
    match op {
        WriteOp::MergeNode { node, attributes } => {
            let (pattern, params) = key_pattern(node, "k_");
            let mut text = format!("MERGE (n:{} {pattern})", node.kind.label());
            let sets: Vec<String> = attributes
                .iter()
                .map(|(property, _)| keep_known(&format!("n.{property}"), &format!("a_{property}")))
                .collect();
            if !sets.is_empty() {
                text.push_str(&format!(" SET {}", sets.join(", ")));
            }

            let mut query = Query::new(text);
            for (name, value) in params {
                query = query.param(&name, value);
            }
            for (property, value) in attributes {
                query = query.param(&format!("a_{property}"), value.clone());
            }
            query
        }
        WriteOp::MergeEdge { source, relationship, target, context } => {
            let (source_pattern, source_params) = key_pattern(source, "s_");
            let (target_pattern, target_params) = key_pattern(target, "t_");
            // relationship is a whitelisted UPPER_SNAKE_CASE tag
            let text = format!(
                "MATCH (s:{} {source_pattern}) MATCH (t:{} {target_pattern}) \
                 MERGE (s)-[r:{relationship}]->(t) SET {}",
                source.kind.label(),
                target.kind.label(),
                keep_known("r.context", "context"),
            );

            let mut query = Query::new(text).param("context", context.clone());
            for (name, value) in source_params.into_iter().chain(target_params) {
                query = query.param(&name, value);
            }
            query
        }
    }
}

#[async_trait]
impl GraphBackend for Neo4jBackend {
    fn name(&self) -> &'static str {
        "neo4j"
    }

    async fn ensure_constraints(&self) -> Result<(), GraphError> {
        for kind in EntityKind::ALL {
            let statement = constraint_statement(kind);
            self.graph
                .run(Query::new(statement.clone()))
                .await
                .map_err(|e| GraphError::Backend(format!("{statement}: {e}")))?;
        }
        Ok(())
    }

    async fn contains(&self, node: &NodeRef) -> Result<bool, GraphError> {
        let (pattern, params) = key_pattern(node, "k_");
        let text = format!("MATCH (n:{} {pattern}) RETURN count(n) AS count", node.kind.label());

        let mut query = Query::new(text.clone());
        for (name, value) in params {
            query = query.param(&name, value);
        }

        let mut result = self
            .graph
            .execute(query)
            .await
            .map_err(|e| GraphError::query(&text, e))?;
        let count = match result.next().await.map_err(|e| GraphError::query(&text, e))? {
            Some(row) => row.get::<i64>("count").unwrap_or(0),
            None => 0,
        };
        Ok(count > 0)
    }

    async fn apply(&self, ops: &[WriteOp]) -> Result<(), GraphError> {
        let queries: Vec<Query> = ops.iter().map(render).collect();

        let mut txn = self
            .graph
            .start_txn()
            .await
            .map_err(|e| GraphError::Write(format!("failed to open transaction: {e}")))?;

        if let Err(e) = txn.run_queries(queries).await {
            if let Err(rollback) = txn.rollback().await {
                warn!(error = %rollback, "rollback failed");
            }
            return Err(GraphError::Write(e.to_string()));
        }

        txn.commit()
            .await
            .map_err(|e| GraphError::Write(format!("commit failed: {e}")))?;
        debug!(ops = ops.len(), "committed write batch");
        Ok(())
    }

    /// Reads run inside a transaction that is always rolled back, so a
    /// statement that slips past the keyword guard cannot persist a write.
    async fn read(&self, text: &str) -> Result<Vec<Record>, GraphError> {
        let mut txn = self
            .graph
            .start_txn()
            .await
            .map_err(|e| GraphError::query(text, format!("failed to open transaction: {e}")))?;

        let outcome = collect_rows(&mut txn, text).await;
        if let Err(e) = txn.rollback().await {
            warn!(error = %e, "read transaction rollback failed");
        }
        outcome
    }

    async fn clear(&self) -> Result<(), GraphError> {
        self.graph
            .run(Query::new("MATCH (n) DETACH DELETE n".to_string()))
            .await
            .map_err(|e| GraphError::Write(e.to_string()))
    }
}

async fn collect_rows(txn: &mut Txn, text: &str) -> Result<Vec<Record>, GraphError> {
    let mut result = txn
        .execute(Query::new(text.to_string()))
        .await
        .map_err(|e| GraphError::query(text, e))?;

    let mut records = Vec::new();
    while let Some(row) = result
        .next(txn.handle())
        .await
        .map_err(|e| GraphError::query(text, e))?
    {
        let record = row
            .to::<Record>()
            .map_err(|e| GraphError::query(text, format!("unreadable row: {e}")))?;
        records.push(record);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constraint_statements() {
        assert_eq!(
            constraint_statement(EntityKind::Person),
            "CREATE CONSTRAINT person_key IF NOT EXISTS FOR (n:Person) REQUIRE n.name IS UNIQUE"
        );
        assert_eq!(
            constraint_statement(EntityKind::FinancialFigure),
            "CREATE CONSTRAINT financialfigure_key IF NOT EXISTS FOR (n:FinancialFigure) \
             REQUIRE (n.metric, n.year, n.company_name) IS UNIQUE"
        );
    }

    #[test]
    fn test_key_pattern_uses_parameters() {
        let node = NodeRef {
            kind: EntityKind::Company,
            key: vec![("name", "Apple') DETACH DELETE n //".to_string())],
        };
        let (pattern, params) = key_pattern(&node, "s_");
        assert_eq!(pattern, "{name: $s_name}");
        assert_eq!(params[0].0, "s_name");
    }

    #[test]
    fn test_keep_known() {
        assert_eq!(
            keep_known("n.title", "a_title"),
            "n.title = coalesce(CASE WHEN $a_title = 'N/A' THEN n.title END, $a_title)"
        );
    }
}
