//! Tenant routing facade over the two backends.

use crate::backend::{Segment, SegmentBackend};
use crate::condition::Condition;
use crate::config::{BackendKind, EngineConfig};
use crate::error::{EngineError, Result};
use crate::hydrate::Item;
use crate::request::{Grouping, SegmentRequest};
use crate::rows::{GroupedCounts, GroupedSums};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Persisted per-tenant backend choice.
#[async_trait]
pub trait BackendPreferences: Send + Sync {
    async fn backend_for(&self, tenant_id: &str) -> anyhow::Result<BackendKind>;
}

/// Preferences read from [`EngineConfig`].
#[derive(Debug, Clone, Default)]
pub struct ConfiguredPreferences {
    default_backend: BackendKind,
    tenants: HashMap<String, BackendKind>,
}

impl ConfiguredPreferences {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            default_backend: config.default_backend,
            tenants: config.tenant_backends.clone(),
        }
    }

    pub fn pin(mut self, tenant_id: &str, backend: BackendKind) -> Self {
        self.tenants.insert(tenant_id.to_string(), backend);
        self
    }
}

#[async_trait]
impl BackendPreferences for ConfiguredPreferences {
    async fn backend_for(&self, tenant_id: &str) -> anyhow::Result<BackendKind> {
        Ok(self
            .tenants
            .get(tenant_id)
            .copied()
            .unwrap_or(self.default_backend))
    }
}

/// Entry point for callers: every operation takes the tenant id and is
/// dispatched to that tenant's backend.
pub struct QueryEngine {
    relational: Arc<dyn SegmentBackend>,
    graph: Arc<dyn SegmentBackend>,
    preferences: Arc<dyn BackendPreferences>,
}

impl QueryEngine {
    pub fn new(
        relational: Arc<dyn SegmentBackend>,
        graph: Arc<dyn SegmentBackend>,
        preferences: Arc<dyn BackendPreferences>,
    ) -> Self {
        Self { relational, graph, preferences }
    }

    async fn backend(&self, tenant_id: &str) -> Result<&dyn SegmentBackend> {
        let kind = self
            .preferences
            .backend_for(tenant_id)
            .await
            .map_err(EngineError::Execution)?;
        debug!(tenant_id = %tenant_id, backend = ?kind, "routing request");
        Ok(match kind {
            BackendKind::Relational => self.relational.as_ref(),
            BackendKind::Graph => self.graph.as_ref(),
        })
    }

    pub async fn result(&self, tenant_id: &str, request: &SegmentRequest) -> Result<Segment> {
        self.backend(tenant_id).await?.result(request).await
    }

    pub async fn count(
        &self,
        tenant_id: &str,
        entity_id: &str,
        grouping: &Grouping,
        conditions: &[Condition],
    ) -> Result<GroupedCounts> {
        self.backend(tenant_id).await?.count(entity_id, grouping, conditions).await
    }

    pub async fn sum(
        &self,
        tenant_id: &str,
        entity_id: &str,
        sum_key: &str,
        grouping: &Grouping,
        conditions: &[Condition],
    ) -> Result<GroupedSums> {
        self.backend(tenant_id)
            .await?
            .sum(entity_id, sum_key, grouping, conditions)
            .await
    }

    pub async fn search_elements(
        &self,
        tenant_id: &str,
        entity_id: &str,
        key: &str,
        conditions: &[Condition],
    ) -> Result<Vec<Value>> {
        self.backend(tenant_id)
            .await?
            .search_elements(entity_id, key, conditions)
            .await
    }

    pub async fn search_items(&self, tenant_id: &str, entity_id: &str, conditions: &[Condition]) -> Result<Vec<Item>> {
        self.backend(tenant_id).await?.search_items(entity_id, conditions).await
    }

    pub async fn search_ids(&self, tenant_id: &str, entity_id: &str, conditions: &[Condition]) -> Result<Vec<String>> {
        self.backend(tenant_id).await?.search_ids(entity_id, conditions).await
    }
}
