use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use serde_json::Value;

use crate::agent::{self, ScoutApmAgent, SpanRecord};

/// Operation recorded for every executed query.
pub const QUERY_OPERATION: &str = "SQL/Query";

const DB_STATEMENT: &str = "db.statement";
const DB_BINDINGS: &str = "db.bindings";
const DB_INSTANCE: &str = "db.instance";

/// A query the storage layer has finished executing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryExecuted {
    pub sql: String,
    pub bindings: Vec<String>,
    pub duration: Duration,
    /// Name of the connection the query ran on.
    pub connection: String,
}

impl QueryExecuted {
    pub fn new(sql: impl Into<String>, duration: Duration) -> Self {
        QueryExecuted {
            sql: sql.into(),
            bindings: Vec::new(),
            duration,
            connection: String::from("default"),
        }
    }

    pub fn with_bindings(mut self, bindings: Vec<String>) -> Self {
        self.bindings = bindings;
        self
    }

    pub fn with_connection(mut self, connection: impl Into<String>) -> Self {
        self.connection = connection.into();
        self
    }
}

/// Callback the storage layer invokes synchronously after each query.
pub trait QueryObserver: Send + Sync {
    fn query_executed(&self, query: &QueryExecuted);
}

impl<F> QueryObserver for F
where
    F: Fn(&QueryExecuted) + Send + Sync,
{
    fn query_executed(&self, query: &QueryExecuted) {
        self(query)
    }
}

/// Records each executed query as a `SQL/Query` span under the current
/// request.
///
/// Queries outside any request, e.g. from a background job, are recorded
/// detached. Nothing about the query is retained after the call.
#[derive(Clone)]
pub struct QueryListener {
    agent: Arc<dyn ScoutApmAgent>,
}

impl QueryListener {
    pub fn new(agent: Arc<dyn ScoutApmAgent>) -> Self {
        QueryListener { agent }
    }
}

impl QueryObserver for QueryListener {
    fn query_executed(&self, query: &QueryExecuted) {
        if !agent::is_active(self.agent.as_ref()) {
            return;
        }

        let end = SystemTime::now();
        let start = end.checked_sub(query.duration).unwrap_or(end);

        self.agent.record_span(SpanRecord {
            operation: QUERY_OPERATION.to_string(),
            start,
            end,
            tags: vec![
                (DB_STATEMENT, query.sql.clone()),
                (DB_BINDINGS, Value::from(query.bindings.clone()).to_string()),
                (DB_INSTANCE, query.connection.clone()),
            ],
        });
    }
}
