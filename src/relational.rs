//! Relational execution backend.

use crate::backend::{Segment, SegmentBackend};
use crate::condition::Condition;
use crate::config::{BackendKind, EngineConfig, PagingConfig};
use crate::error::{EngineError, Result};
use crate::executor::SqlExecutor;
use crate::hydrate::{hydrate, Item, ItemLoader, SqlItemLoader};
use crate::request::{resolve_sum_target, GroupTarget, Grouping, SegmentRequest};
use crate::rows::{counts_from_rows, elements_from_rows, ids_from_rows, sums_from_rows, GroupedCounts, GroupedSums, Row};
use crate::schema::SchemaLookup;
use crate::sql_compiler::{CompiledSql, SqlCompiler};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

pub struct RelationalBackend {
    compiler: Arc<SqlCompiler>,
    schema: Arc<dyn SchemaLookup>,
    executor: Arc<dyn SqlExecutor>,
    loader: Arc<dyn ItemLoader>,
    paging: PagingConfig,
}

impl RelationalBackend {
    /// Items are hydrated from the same store unless [`with_loader`](Self::with_loader) says otherwise.
    pub fn new(config: &EngineConfig, schema: Arc<dyn SchemaLookup>, executor: Arc<dyn SqlExecutor>) -> Self {
        let compiler = Arc::new(SqlCompiler::new(config.relational.clone(), schema.clone()));
        let loader = Arc::new(SqlItemLoader::new(compiler.clone(), executor.clone()));
        Self {
            compiler,
            schema,
            executor,
            loader,
            paging: config.paging,
        }
    }

    pub fn with_loader(mut self, loader: Arc<dyn ItemLoader>) -> Self {
        self.loader = loader;
        self
    }

    async fn query(&self, statement: &CompiledSql) -> Result<Vec<Row>> {
        debug!(sql = %statement.sql, params = statement.values.0.len(), "running relational query");
        self.executor
            .query(&statement.sql, &statement.values)
            .await
            .map_err(EngineError::Execution)
    }

    async fn hydrate(&self, ids: &[String]) -> Result<Vec<Item>> {
        hydrate(self.loader.as_ref(), ids).await.map_err(EngineError::Execution)
    }
}

#[async_trait]
impl SegmentBackend for RelationalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Relational
    }

    async fn result(&self, request: &SegmentRequest) -> Result<Segment> {
        let entity_id = request.entity_id.as_str();
        let page = request
            .page
            .clamp(self.paging.default_page_size, self.paging.max_page_size);
        let segment = self
            .compiler
            .segment(entity_id, &request.conditions, request.sort.as_ref(), Some(page))?;
        let count = if request.with_count {
            Some(self.compiler.count(entity_id, &request.conditions, &GroupTarget::Total)?)
        } else {
            None
        };

        let ids = ids_from_rows(&self.query(&segment).await?)?;
        let counts = match count {
            Some(count) => Some(counts_from_rows(&self.query(&count).await?, &GroupTarget::Total, entity_id)?),
            None => None,
        };
        let items = self.hydrate(&ids).await?;
        Ok(Segment { items, counts })
    }

    async fn count(&self, entity_id: &str, grouping: &Grouping, conditions: &[Condition]) -> Result<GroupedCounts> {
        let target = grouping.resolve(self.schema.as_ref(), entity_id)?;
        let statement = self.compiler.count(entity_id, conditions, &target)?;
        let rows = self.query(&statement).await?;
        counts_from_rows(&rows, &target, entity_id)
    }

    async fn sum(
        &self,
        entity_id: &str,
        sum_key: &str,
        grouping: &Grouping,
        conditions: &[Condition],
    ) -> Result<GroupedSums> {
        let key = resolve_sum_target(self.schema.as_ref(), entity_id, sum_key)?;
        let target = grouping.resolve(self.schema.as_ref(), entity_id)?;
        let statement = self.compiler.sum(entity_id, conditions, &key, &target)?;
        let rows = self.query(&statement).await?;
        sums_from_rows(&rows, &target, entity_id)
    }

    async fn search_elements(&self, entity_id: &str, key: &str, conditions: &[Condition]) -> Result<Vec<Value>> {
        let statement = self.compiler.elements(entity_id, conditions, key)?;
        Ok(elements_from_rows(self.query(&statement).await?))
    }

    async fn search_items(&self, entity_id: &str, conditions: &[Condition]) -> Result<Vec<Item>> {
        let ids = self.search_ids(entity_id, conditions).await?;
        self.hydrate(&ids).await
    }

    async fn search_ids(&self, entity_id: &str, conditions: &[Condition]) -> Result<Vec<String>> {
        let statement = self.compiler.ids(entity_id, conditions)?;
        ids_from_rows(&self.query(&statement).await?)
    }
}
