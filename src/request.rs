//! Request shapes shared by both execution backends.

use crate::condition::{Condition, DataType};
use crate::error::CompileError;
use crate::schema::{resolve_field, SchemaLookup};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// Sort by a field key, or by `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sort {
    pub key: String,
    #[serde(default)]
    pub order: SortOrder,
}

impl Sort {
    pub fn asc(key: &str) -> Self {
        Self { key: key.to_string(), order: SortOrder::Asc }
    }

    pub fn desc(key: &str) -> Self {
        Self { key: key.to_string(), order: SortOrder::Desc }
    }
}

/// Zero-based page. `size == 0` means "use the configured default".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Page {
    pub index: u64,
    pub size: u64,
}

impl Page {
    pub fn new(index: u64, size: u64) -> Self {
        Self { index, size }
    }

    /// Applies the configured default and ceiling to the page size.
    pub fn clamp(self, default_size: u64, max_size: u64) -> Self {
        let size = if self.size == 0 { default_size } else { self.size };
        Self { index: self.index, size: size.min(max_size).max(1) }
    }

    pub fn offset(&self) -> u64 {
        self.index.saturating_mul(self.size)
    }
}

/// How a count or sum is bucketed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "mode", content = "key")]
pub enum Grouping {
    /// One bucket, keyed by the entity id.
    Total,
    /// Bucket by a field's value; list fields bucket per element, reference
    /// fields per related identity.
    Field(String),
    /// Bucket by the identity of the item related through a reference field.
    Parent(String),
}

/// A [`Grouping`] resolved against the schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupTarget {
    Total,
    Property { key: String },
    Elements { key: String },
    Related { key: String, ref_id: String, reverse: bool },
}

impl Grouping {
    pub fn resolve(&self, schema: &dyn SchemaLookup, entity_id: &str) -> Result<GroupTarget, CompileError> {
        let (key, parent_only) = match self {
            Grouping::Total => return Ok(GroupTarget::Total),
            Grouping::Field(key) => (key, false),
            Grouping::Parent(key) => (key, true),
        };

        let meta = resolve_field(schema, entity_id, key)?;
        match meta.data_type {
            DataType::Reference => {
                let ref_id = meta
                    .ref_id
                    .clone()
                    .filter(|ref_id| !ref_id.is_empty())
                    .ok_or_else(|| CompileError::MissingReference { key: key.clone() })?;
                if !schema.has_entity(&ref_id) {
                    return Err(CompileError::UnknownReference { key: key.clone(), ref_id });
                }
                Ok(GroupTarget::Related { key: key.clone(), ref_id, reverse: meta.is_reverse })
            }
            _ if parent_only => Err(CompileError::InvalidValue {
                key: key.clone(),
                reason: "grouping by parent needs a reference field".to_string(),
            }),
            DataType::List => Ok(GroupTarget::Elements { key: key.clone() }),
            _ => Ok(GroupTarget::Property { key: key.clone() }),
        }
    }
}

/// The numeric property a sum aggregates over.
pub fn resolve_sum_target(
    schema: &dyn SchemaLookup,
    entity_id: &str,
    key: &str,
) -> Result<String, CompileError> {
    if key.is_empty() {
        return Err(CompileError::MissingAggregateTarget {
            entity_id: entity_id.to_string(),
            reason: "no property to sum".to_string(),
        });
    }
    match schema.field(entity_id, key) {
        Some(meta) if meta.data_type == DataType::Number => Ok(key.to_string()),
        Some(meta) => Err(CompileError::MissingAggregateTarget {
            entity_id: entity_id.to_string(),
            reason: format!("`{}` is a {} field", key, meta.data_type),
        }),
        None => Err(CompileError::UnknownField {
            entity_id: entity_id.to_string(),
            key: key.to_string(),
        }),
    }
}

/// Arguments of a segment query.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentRequest {
    pub entity_id: String,
    pub sort: Option<Sort>,
    pub page: Page,
    pub with_count: bool,
    pub conditions: Vec<Condition>,
}

impl SegmentRequest {
    pub fn new(entity_id: &str, conditions: Vec<Condition>) -> Self {
        Self {
            entity_id: entity_id.to_string(),
            sort: None,
            page: Page::default(),
            with_count: false,
            conditions,
        }
    }

    pub fn sorted(mut self, sort: Sort) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn page(mut self, page: Page) -> Self {
        self.page = page;
        self
    }

    pub fn with_count(mut self) -> Self {
        self.with_count = true;
        self
    }
}
