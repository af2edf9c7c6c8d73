//! 配置模块，负责加载JSON配置文件

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// 配置错误
#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "配置错误: {}", self.message)
    }
}

impl std::error::Error for ConfigError {}

impl ConfigError {
    pub fn new(message: String) -> Self {
        Self { message }
    }
}

/// 租户可选的存储后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Relational,
    Graph,
}

/// 关系型存储的表结构
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelationalConfig {
    pub items_table: String,
    pub id_column: String,
    pub entity_column: String,
    /// JSON 列，存放所有字段键值
    pub fields_column: String,
    /// 生成列：`refEntityId#refItemId`
    pub container_column: String,
    /// 空集合时使用的哨兵 id，保证谓词不匹配任何行
    pub empty_set_sentinel: String,
}

impl Default for RelationalConfig {
    fn default() -> Self {
        Self {
            items_table: "items".to_string(),
            id_column: "id".to_string(),
            entity_column: "entity_id".to_string(),
            fields_column: "fields".to_string(),
            container_column: "container_id".to_string(),
            empty_set_sentinel: "00000000-0000-0000-0000-000000000000".to_string(),
        }
    }
}

/// 图存储的命名约定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    pub contains_relation: String,
    pub has_relation: String,
    pub identity_property: String,
    /// 列表元素节点上保存元素值的属性
    pub element_property: String,
    /// `has` 关系上记录字段名的属性
    pub relation_key_property: String,
    /// 是否并发执行分段查询与计数查询
    pub count_fanout: bool,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            contains_relation: "contains".to_string(),
            has_relation: "has".to_string(),
            identity_property: "id".to_string(),
            element_property: "value".to_string(),
            relation_key_property: "key".to_string(),
            count_fanout: true,
        }
    }
}

/// 分页配置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PagingConfig {
    pub default_page_size: u64,
    pub max_page_size: u64,
}

impl Default for PagingConfig {
    fn default() -> Self {
        Self {
            default_page_size: 25,
            max_page_size: 500,
        }
    }
}

/// 引擎配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub relational: RelationalConfig,
    pub graph: GraphConfig,
    pub paging: PagingConfig,
    /// 未单独配置的租户使用的后端
    pub default_backend: BackendKind,
    /// 租户 id 到后端的映射
    pub tenant_backends: HashMap<String, BackendKind>,
}

impl EngineConfig {
    /// 从JSON文件加载引擎配置
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();

        // 检查文件是否存在
        if !path_ref.exists() {
            return Err(ConfigError::new(format!(
                "配置文件不存在: {}",
                path_ref.display()
            )));
        }

        let content = fs::read_to_string(path_ref)
            .map_err(|e| ConfigError::new(format!(
                "无法读取配置文件 {}: {}",
                path_ref.display(),
                e
            )))?;

        serde_json::from_str(&content)
            .map_err(|e| ConfigError::new(format!(
                "无法解析JSON配置文件 {}: {}",
                path_ref.display(),
                e
            )))
    }

    /// 获取租户使用的后端，未配置时返回默认后端
    pub fn backend_for(&self, tenant_id: &str) -> BackendKind {
        self.tenant_backends
            .get(tenant_id)
            .copied()
            .unwrap_or(self.default_backend)
    }
}
