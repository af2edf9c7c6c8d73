//! Storage client seams. Connection pools, drivers and timeouts live behind
//! these traits; the engine only hands them rendered text.

use crate::rows::Row;
use async_trait::async_trait;
use futures::stream::BoxStream;
use sea_query::Values;

/// Relational storage client.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    /// Run a parameterized statement and return every row.
    async fn query(&self, sql: &str, values: &Values) -> anyhow::Result<Vec<Row>>;
}

/// Graph storage client.
#[async_trait]
pub trait GraphExecutor: Send + Sync {
    /// Run a Cypher statement and return a row cursor.
    async fn run(&self, cypher: &str) -> anyhow::Result<BoxStream<'static, anyhow::Result<Row>>>;
}
