//! Result hydration: bulk-load records for an ordered id list and put them
//! back into that order.

use crate::executor::SqlExecutor;
use crate::sql_compiler::SqlCompiler;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// A stored record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub entity_id: String,
    #[serde(default)]
    pub fields: Map<String, Value>,
    /// `refEntityId#refItemId` of the owning relationship, if any.
    #[serde(default)]
    pub container_id: Option<String>,
}

/// Set-based record loader; the result order is unspecified.
#[async_trait]
pub trait ItemLoader: Send + Sync {
    async fn load(&self, ids: &[String]) -> anyhow::Result<Vec<Item>>;
}

/// Re-project `records` into the order of `ids`. Ids without a record are dropped.
pub fn reorder(ids: &[String], records: Vec<Item>) -> Vec<Item> {
    let mut by_id: HashMap<String, Item> = records
        .into_iter()
        .map(|item| (item.id.clone(), item))
        .collect();
    let ordered: Vec<Item> = ids.iter().filter_map(|id| by_id.remove(id)).collect();
    if ordered.len() < ids.len() {
        warn!(
            requested = ids.len(),
            loaded = ordered.len(),
            "dropping ids without a stored record"
        );
    }
    ordered
}

pub async fn hydrate(loader: &dyn ItemLoader, ids: &[String]) -> anyhow::Result<Vec<Item>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let records = loader.load(ids).await?;
    Ok(reorder(ids, records))
}

/// Loads items from the relational store.
pub struct SqlItemLoader {
    compiler: Arc<SqlCompiler>,
    executor: Arc<dyn SqlExecutor>,
}

impl SqlItemLoader {
    pub fn new(compiler: Arc<SqlCompiler>, executor: Arc<dyn SqlExecutor>) -> Self {
        Self { compiler, executor }
    }
}

#[async_trait]
impl ItemLoader for SqlItemLoader {
    async fn load(&self, ids: &[String]) -> anyhow::Result<Vec<Item>> {
        let statement = self.compiler.load(ids);
        debug!(sql = %statement.sql, count = ids.len(), "loading items");
        let rows = self.executor.query(&statement.sql, &statement.values).await?;
        rows.into_iter()
            .map(|row| serde_json::from_value(Value::Object(row)).map_err(anyhow::Error::from))
            .collect()
    }
}
