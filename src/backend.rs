//! The capability contract both execution backends implement.

use crate::condition::Condition;
use crate::config::BackendKind;
use crate::error::Result;
use crate::hydrate::Item;
use crate::request::{Grouping, SegmentRequest};
use crate::rows::{GroupedCounts, GroupedSums};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

/// One page of hydrated items, plus the total count when requested.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Segment {
    pub items: Vec<Item>,
    pub counts: Option<GroupedCounts>,
}

#[async_trait]
pub trait SegmentBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Sorted, paged items matching the request's conditions.
    async fn result(&self, request: &SegmentRequest) -> Result<Segment>;

    async fn count(&self, entity_id: &str, grouping: &Grouping, conditions: &[Condition]) -> Result<GroupedCounts>;

    /// Sum of numeric field `sum_key` over the matches, bucketed by `grouping`.
    async fn sum(
        &self,
        entity_id: &str,
        sum_key: &str,
        grouping: &Grouping,
        conditions: &[Condition],
    ) -> Result<GroupedSums>;

    /// Distinct element values of list field `key` among the matches.
    async fn search_elements(&self, entity_id: &str, key: &str, conditions: &[Condition]) -> Result<Vec<Value>>;

    /// Matching items, unordered.
    async fn search_items(&self, entity_id: &str, conditions: &[Condition]) -> Result<Vec<Item>>;

    /// Matching ids, unordered.
    async fn search_ids(&self, entity_id: &str, conditions: &[Condition]) -> Result<Vec<String>>;
}
