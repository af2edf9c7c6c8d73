//! 实体/字段元数据查询接口（由外部 schema 存储实现）

use crate::condition::DataType;
use crate::config::ConfigError;
use crate::error::CompileError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// 单个字段的元数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMeta {
    pub data_type: DataType,
    #[serde(default)]
    pub ref_id: Option<String>,
    /// 引用字段是否从"多"的一侧展示
    #[serde(default)]
    pub is_reverse: bool,
}

impl FieldMeta {
    pub fn new(data_type: DataType) -> Self {
        Self { data_type, ref_id: None, is_reverse: false }
    }

    pub fn reference(ref_id: &str) -> Self {
        Self {
            data_type: DataType::Reference,
            ref_id: Some(ref_id.to_string()),
            is_reverse: false,
        }
    }

    pub fn reversed(mut self) -> Self {
        self.is_reverse = true;
        self
    }

    pub fn is_list(&self) -> bool {
        self.data_type == DataType::List
    }

    pub fn is_reference(&self) -> bool {
        self.data_type == DataType::Reference
    }
}

/// schema 查询能力
pub trait SchemaLookup: Send + Sync {
    /// 查询实体上的字段
    fn field(&self, entity_id: &str, key: &str) -> Option<FieldMeta>;

    /// 实体是否存在
    fn has_entity(&self, entity_id: &str) -> bool;
}

/// 查询字段，不存在时返回构造错误
pub fn resolve_field(
    schema: &dyn SchemaLookup,
    entity_id: &str,
    key: &str,
) -> Result<FieldMeta, CompileError> {
    schema.field(entity_id, key).ok_or_else(|| CompileError::UnknownField {
        entity_id: entity_id.to_string(),
        key: key.to_string(),
    })
}

/// 内存中的 schema，可从 JSON 加载：`{"deals": {"amount": {"data_type": "number"}}}`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StaticSchema {
    entities: HashMap<String, HashMap<String, FieldMeta>>,
}

impl StaticSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册一个没有字段的实体
    pub fn with_entity(mut self, entity_id: &str) -> Self {
        self.entities.entry(entity_id.to_string()).or_default();
        self
    }

    pub fn with_field(mut self, entity_id: &str, key: &str, meta: FieldMeta) -> Self {
        self.entities
            .entry(entity_id.to_string())
            .or_default()
            .insert(key.to_string(), meta);
        self
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let content = fs::read_to_string(path_ref).map_err(|e| {
            ConfigError::new(format!("无法读取 schema 文件 {}: {}", path_ref.display(), e))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            ConfigError::new(format!("无法解析 schema 文件 {}: {}", path_ref.display(), e))
        })
    }
}

impl SchemaLookup for StaticSchema {
    fn field(&self, entity_id: &str, key: &str) -> Option<FieldMeta> {
        self.entities.get(entity_id)?.get(key).cloned()
    }

    fn has_entity(&self, entity_id: &str) -> bool {
        self.entities.contains_key(entity_id)
    }
}
