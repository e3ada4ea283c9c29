use thiserror::Error;

#[derive(Debug, Error)]
pub enum GraphError {
    /// The graph engine could not be reached at construction time
    #[error("failed to connect to graph store: {0}")]
    Connection(String),

    #[error("graph query failed: {message}\nquery: {query}")]
    Query { query: String, message: String },

    /// A write batch failed and was rolled back
    #[error("graph write failed: {0}")]
    Write(String),

    #[error("graph backend error: {0}")]
    Backend(String),
}

impl GraphError {
    pub fn query(query: &str, message: impl ToString) -> Self {
        GraphError::Query {
            query: query.to_string(),
            message: message.to_string(),
        }
    }
}
