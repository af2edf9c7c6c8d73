//! Graph execution backend.

use crate::backend::{Segment, SegmentBackend};
use crate::condition::Condition;
use crate::config::{BackendKind, EngineConfig, GraphConfig, PagingConfig};
use crate::cypher_compiler::{CypherCompiler, SegmentOptions};
use crate::error::{EngineError, Result};
use crate::executor::GraphExecutor;
use crate::fanout::fan_out;
use crate::graph_pattern::{PatternBuilder, PatternNode};
use crate::hydrate::{hydrate, Item, ItemLoader};
use crate::request::{resolve_sum_target, GroupTarget, Grouping, SegmentRequest};
use crate::rows::{counts_from_rows, elements_from_rows, ids_from_rows, sums_from_rows, GroupedCounts, GroupedSums, Row};
use crate::schema::SchemaLookup;
use async_trait::async_trait;
use futures::TryStreamExt;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

async fn collect(executor: Arc<dyn GraphExecutor>, cypher: String) -> Result<Vec<Row>> {
    debug!(cypher = %cypher, "running graph query");
    let stream = executor.run(&cypher).await.map_err(EngineError::Execution)?;
    stream.try_collect().await.map_err(EngineError::Execution)
}

pub struct GraphBackend {
    compiler: CypherCompiler,
    config: GraphConfig,
    schema: Arc<dyn SchemaLookup>,
    executor: Arc<dyn GraphExecutor>,
    loader: Arc<dyn ItemLoader>,
    paging: PagingConfig,
}

impl GraphBackend {
    pub fn new(
        config: &EngineConfig,
        schema: Arc<dyn SchemaLookup>,
        executor: Arc<dyn GraphExecutor>,
        loader: Arc<dyn ItemLoader>,
    ) -> Self {
        Self {
            compiler: CypherCompiler::new(config.graph.clone()),
            config: config.graph.clone(),
            schema,
            executor,
            loader,
            paging: config.paging,
        }
    }

    fn pattern(&self, entity_id: &str, identity: Option<&str>, conditions: &[Condition]) -> Result<PatternNode> {
        let node = PatternBuilder::new(self.schema.as_ref(), &self.config).build(entity_id, identity, conditions)?;
        Ok(node)
    }

    async fn run(&self, cypher: String) -> Result<Vec<Row>> {
        collect(self.executor.clone(), cypher).await
    }

    /// Merge the item `identity` of `entity_id` with the properties and
    /// relations described by `conditions`. Running it twice leaves one node.
    pub async fn upsert(&self, entity_id: &str, identity: &str, conditions: &[Condition]) -> Result<()> {
        let node = self.pattern(entity_id, Some(identity), conditions)?;
        let cypher = self.compiler.upsert(&node)?;
        self.run(cypher).await?;
        Ok(())
    }
}

#[async_trait]
impl SegmentBackend for GraphBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Graph
    }

    async fn result(&self, request: &SegmentRequest) -> Result<Segment> {
        let entity_id = request.entity_id.as_str();
        let node = self.pattern(entity_id, None, &request.conditions)?;
        let page = request
            .page
            .clamp(self.paging.default_page_size, self.paging.max_page_size);
        let options = SegmentOptions {
            sort: request.sort.clone(),
            page: Some(page),
        };
        let segment = self.compiler.segment(&node, &options)?;
        let count = if request.with_count {
            Some(self.compiler.count(&node, &GroupTarget::Total)?)
        } else {
            None
        };

        let (rows, count_rows) = if self.config.count_fanout {
            let executor = self.executor.clone();
            fan_out(
                collect(executor.clone(), segment),
                count.map(|cypher| collect(executor, cypher)),
            )
            .await?
        } else {
            let rows = self.run(segment).await?;
            let count_rows = match count {
                Some(cypher) => Some(self.run(cypher).await?),
                None => None,
            };
            (rows, count_rows)
        };

        let ids = ids_from_rows(&rows)?;
        let counts = match count_rows {
            Some(rows) => Some(counts_from_rows(&rows, &GroupTarget::Total, entity_id)?),
            None => None,
        };
        let items = hydrate(self.loader.as_ref(), &ids).await.map_err(EngineError::Execution)?;
        Ok(Segment { items, counts })
    }

    async fn count(&self, entity_id: &str, grouping: &Grouping, conditions: &[Condition]) -> Result<GroupedCounts> {
        let target = grouping.resolve(self.schema.as_ref(), entity_id)?;
        let node = self.pattern(entity_id, None, conditions)?;
        let rows = self.run(self.compiler.count(&node, &target)?).await?;
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
        let node = self.pattern(entity_id, None, conditions)?;
        let rows = self.run(self.compiler.sum(&node, &key, &target)?).await?;
        sums_from_rows(&rows, &target, entity_id)
    }

    async fn search_elements(&self, entity_id: &str, key: &str, conditions: &[Condition]) -> Result<Vec<Value>> {
        let node = self.pattern(entity_id, None, conditions)?;
        let rows = self.run(self.compiler.elements(&node, key)?).await?;
        Ok(elements_from_rows(rows))
    }

    async fn search_items(&self, entity_id: &str, conditions: &[Condition]) -> Result<Vec<Item>> {
        let ids = self.search_ids(entity_id, conditions).await?;
        hydrate(self.loader.as_ref(), &ids).await.map_err(EngineError::Execution)
    }

    async fn search_ids(&self, entity_id: &str, conditions: &[Condition]) -> Result<Vec<String>> {
        let node = self.pattern(entity_id, None, conditions)?;
        let rows = self.run(self.compiler.ids(&node)?).await?;
        ids_from_rows(&rows)
    }
}
