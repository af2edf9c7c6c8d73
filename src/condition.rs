//! 条件模型：与后端无关的字段条件树
//!
//! 上游的过滤表达式解析器产出 [`Field`] 树（线格式，serde 反序列化），
//! 本模块把它校验并转换成带标签的 [`Condition`]。两个编译器都只通过
//! [`ConditionVisitor`] 消费 `Condition`，按数据类型分派只在 [`Condition::accept`]
//! 里出现一次。

use crate::error::CompileError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime};

/// 字段的数据类型
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DataType {
    #[default]
    String,
    Number,
    DateTime,
    DateRange,
    List,
    Reference,
    IdSet,
    /// 未知类型，保留原始名称
    Other(String),
}

impl From<String> for DataType {
    fn from(name: String) -> Self {
        match name.as_str() {
            "string" | "" => DataType::String,
            "number" => DataType::Number,
            "datetime" | "date" => DataType::DateTime,
            "date-range" => DataType::DateRange,
            "list" => DataType::List,
            "reference" => DataType::Reference,
            "id-set" => DataType::IdSet,
            _ => DataType::Other(name),
        }
    }
}

impl From<DataType> for String {
    fn from(data_type: DataType) -> Self {
        data_type.to_string()
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::String => write!(f, "string"),
            DataType::Number => write!(f, "number"),
            DataType::DateTime => write!(f, "datetime"),
            DataType::DateRange => write!(f, "date-range"),
            DataType::List => write!(f, "list"),
            DataType::Reference => write!(f, "reference"),
            DataType::IdSet => write!(f, "id-set"),
            DataType::Other(name) => write!(f, "{}", name),
        }
    }
}

/// 比较运算符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Operator {
    #[default]
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    NotEq,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "in")]
    In,
    #[serde(rename = "not in")]
    NotIn,
    #[serde(rename = "starts-with")]
    StartsWith,
    #[serde(rename = "ends-with")]
    EndsWith,
    #[serde(rename = "contains")]
    Contains,
    #[serde(rename = "between")]
    Between,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::NotEq => "!=",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::In => "in",
            Operator::NotIn => "not in",
            Operator::StartsWith => "starts-with",
            Operator::EndsWith => "ends-with",
            Operator::Contains => "contains",
            Operator::Between => "between",
        }
    }

    /// `!=` 与 `not in`
    pub fn is_negated(&self) -> bool {
        matches!(self, Operator::NotEq | Operator::NotIn)
    }

    pub fn is_membership(&self) -> bool {
        matches!(self, Operator::In | Operator::NotIn)
    }

    fn is_text_match(&self) -> bool {
        matches!(self, Operator::StartsWith | Operator::EndsWith | Operator::Contains)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 聚合运算符，用于关联实体的汇总（rollup）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregate {
    Sum,
    Max,
    Min,
    Count,
}

/// 上游解析器产出的字段条件（线格式）
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Field {
    /// 目标属性名；空字符串表示"来源"条件
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub data_type: DataType,
    #[serde(default)]
    pub expression: Operator,
    #[serde(default)]
    pub ref_id: Option<String>,
    #[serde(default)]
    pub is_reverse: bool,
    /// 遍历到引用实体或列表元素之后再应用的条件
    #[serde(default)]
    pub field: Option<Box<Field>>,
    #[serde(default)]
    pub aggregate: Option<Aggregate>,
}

/// 规范化之后的字面量
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    Text(String),
    /// 毫秒级 Unix 时间戳
    Millis(i64),
    List(Vec<Literal>),
}

impl Literal {
    /// 未经类型约束的 JSON 值转换，用于列表元素和未知类型
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => Literal::Null,
            Value::Bool(b) => Literal::Bool(*b),
            Value::Number(n) => Literal::Number(n.clone()),
            Value::String(s) => Literal::Text(s.clone()),
            Value::Array(items) => Literal::List(items.iter().map(Literal::from_json).collect()),
            Value::Object(_) => Literal::Text(value.to_string()),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Literal::Null => Value::Null,
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Number(n) => Value::Number(n.clone()),
            Literal::Text(s) => Value::String(s.clone()),
            Literal::Millis(ms) => Value::from(*ms),
            Literal::List(items) => Value::Array(items.iter().map(Literal::to_json).collect()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Literal::Null)
    }
}

/// 叶子条件的类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeafKind {
    String,
    Number,
    DateTime,
    DateRange,
}

impl fmt::Display for LeafKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LeafKind::String => "string",
            LeafKind::Number => "number",
            LeafKind::DateTime => "datetime",
            LeafKind::DateRange => "date-range",
        };
        f.write_str(name)
    }
}

/// 直接作用在属性上的条件
#[derive(Debug, Clone, PartialEq)]
pub struct Leaf {
    pub key: String,
    pub kind: LeafKind,
    pub op: Operator,
    /// 对 `in`/`not in`/`between` 为 `Literal::List`
    pub value: Literal,
}

/// 列表元素上的比较
#[derive(Debug, Clone, PartialEq)]
pub struct ElementPredicate {
    pub key: String,
    pub op: Operator,
}

/// 列表字段条件：任一元素满足（`negated` 时为没有元素满足）
#[derive(Debug, Clone, PartialEq)]
pub struct ListCondition {
    pub key: String,
    pub negated: bool,
    pub values: Vec<Literal>,
    pub element: ElementPredicate,
}

/// 关联汇总：`aggregate(target.key) op value`
#[derive(Debug, Clone, PartialEq)]
pub struct Rollup {
    pub aggregate: Aggregate,
    pub key: String,
    pub op: Operator,
    /// `Null` 表示只建立关联，不做比较
    pub value: Literal,
}

/// 遍历到被引用实体之后的谓词
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    /// 被引用记录的 id
    Identity(Vec<String>),
    Property(Leaf),
    Rollup(Rollup),
}

/// 引用字段条件（一跳遍历）
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceCondition {
    pub key: String,
    pub ref_id: String,
    pub reverse: bool,
    pub negated: bool,
    pub target: Target,
}

/// 主键集合条件
#[derive(Debug, Clone, PartialEq)]
pub struct IdSet {
    pub negated: bool,
    pub ids: Vec<String>,
}

/// 来源条件：按 `refEntityId#refItemId` 容器限定
#[derive(Debug, Clone, PartialEq)]
pub struct SourceCondition {
    pub negated: bool,
    pub containers: Vec<String>,
}

/// 未知数据类型的条件
#[derive(Debug, Clone, PartialEq)]
pub struct OtherCondition {
    pub key: String,
    pub data_type: String,
    pub op: Operator,
    pub value: Literal,
}

/// 校验之后的条件
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Leaf(Leaf),
    List(ListCondition),
    Reference(ReferenceCondition),
    IdSet(IdSet),
    Source(SourceCondition),
    Other(OtherCondition),
}

/// 每个渲染器实现一次的按类型分派表
pub trait ConditionVisitor {
    type Output;

    fn visit_leaf(&mut self, leaf: &Leaf) -> Result<Self::Output, CompileError>;
    fn visit_list(&mut self, list: &ListCondition) -> Result<Self::Output, CompileError>;
    fn visit_reference(&mut self, reference: &ReferenceCondition) -> Result<Self::Output, CompileError>;
    fn visit_id_set(&mut self, ids: &IdSet) -> Result<Self::Output, CompileError>;
    fn visit_source(&mut self, source: &SourceCondition) -> Result<Self::Output, CompileError>;
    fn visit_other(&mut self, other: &OtherCondition) -> Result<Self::Output, CompileError>;
}

impl Condition {
    pub fn accept<V: ConditionVisitor + ?Sized>(&self, visitor: &mut V) -> Result<V::Output, CompileError> {
        match self {
            Condition::Leaf(leaf) => visitor.visit_leaf(leaf),
            Condition::List(list) => visitor.visit_list(list),
            Condition::Reference(reference) => visitor.visit_reference(reference),
            Condition::IdSet(ids) => visitor.visit_id_set(ids),
            Condition::Source(source) => visitor.visit_source(source),
            Condition::Other(other) => visitor.visit_other(other),
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Condition::Leaf(leaf) => &leaf.key,
            Condition::List(list) => &list.key,
            Condition::Reference(reference) => &reference.key,
            Condition::IdSet(_) => "id",
            Condition::Source(_) => "",
            Condition::Other(other) => &other.key,
        }
    }
}

impl TryFrom<Field> for Condition {
    type Error = CompileError;

    fn try_from(field: Field) -> Result<Self, Self::Error> {
        Condition::from_field(&field)
    }
}

impl TryFrom<&Field> for Condition {
    type Error = CompileError;

    fn try_from(field: &Field) -> Result<Self, Self::Error> {
        Condition::from_field(field)
    }
}

/// 批量转换一组线格式条件
pub fn conditions_from_fields(fields: &[Field]) -> Result<Vec<Condition>, CompileError> {
    fields.iter().map(Condition::try_from).collect()
}

impl Condition {
    fn from_field(field: &Field) -> Result<Self, CompileError> {
        if field.key.is_empty() {
            let negated = membership_negation(field, "source")?;
            return Ok(Condition::Source(SourceCondition {
                negated,
                containers: texts(&field.value),
            }));
        }

        match &field.data_type {
            DataType::String | DataType::Number | DataType::DateTime | DataType::DateRange => {
                if field.field.is_some() {
                    return Err(CompileError::UnexpectedNestedField {
                        key: field.key.clone(),
                        data_type: field.data_type.to_string(),
                    });
                }
                Ok(Condition::Leaf(leaf_from_field(field)?))
            }
            DataType::List => list_from_field(field).map(Condition::List),
            DataType::Reference => reference_from_field(field).map(Condition::Reference),
            DataType::IdSet => {
                let negated = membership_negation(field, "id-set")?;
                Ok(Condition::IdSet(IdSet {
                    negated,
                    ids: texts(&field.value),
                }))
            }
            DataType::Other(name) => Ok(Condition::Other(OtherCondition {
                key: field.key.clone(),
                data_type: name.clone(),
                op: field.expression,
                value: Literal::from_json(&field.value),
            })),
        }
    }
}

fn nested<'a>(field: &'a Field) -> Result<&'a Field, CompileError> {
    let inner = field.field.as_deref().ok_or_else(|| CompileError::MissingNestedField {
        key: field.key.clone(),
        data_type: field.data_type.to_string(),
    })?;
    if matches!(inner.data_type, DataType::List | DataType::Reference) {
        return Err(CompileError::TraversalTooDeep { key: field.key.clone() });
    }
    Ok(inner)
}

fn membership_negation(field: &Field, kind: &str) -> Result<bool, CompileError> {
    match field.expression {
        Operator::Eq | Operator::In => Ok(false),
        Operator::NotEq | Operator::NotIn => Ok(true),
        op => Err(unsupported(&field.key, op, kind)),
    }
}

fn list_from_field(field: &Field) -> Result<ListCondition, CompileError> {
    let negated = membership_negation(field, "list")?;
    let inner = nested(field)?;
    let element_op = match inner.expression {
        op if op.is_membership() || op == Operator::Between => {
            return Err(unsupported(&inner.key, op, "list element"));
        }
        op => op,
    };

    let source = if json_values(&field.value).is_empty() {
        &inner.value
    } else {
        &field.value
    };
    let values: Vec<Literal> = json_values(source)
        .iter()
        .filter(|v| !v.is_null())
        .map(Literal::from_json)
        .collect();
    if values.is_empty() {
        return Err(invalid(&field.key, "list condition needs at least one value"));
    }

    Ok(ListCondition {
        key: field.key.clone(),
        negated,
        values,
        element: ElementPredicate {
            key: inner.key.clone(),
            op: element_op,
        },
    })
}

fn reference_from_field(field: &Field) -> Result<ReferenceCondition, CompileError> {
    let ref_id = match field.ref_id.as_deref() {
        Some(ref_id) if !ref_id.is_empty() => ref_id.to_string(),
        _ => return Err(CompileError::MissingReference { key: field.key.clone() }),
    };
    let inner = nested(field)?;
    let outer_negated = membership_negation(field, "reference")?;

    if let Some(aggregate) = field.aggregate {
        let target = rollup_from_field(field, inner, aggregate, &ref_id)?;
        return Ok(ReferenceCondition {
            key: field.key.clone(),
            ref_id,
            reverse: field.is_reverse,
            negated: outer_negated,
            target: Target::Rollup(target),
        });
    }

    let (target, negated) = if inner.key == "id" || inner.data_type == DataType::IdSet {
        let inner_negated = membership_negation(inner, "reference identity")?;
        let ids = texts(&inner.value);
        if ids.is_empty() {
            return Err(invalid(&field.key, "reference condition needs at least one id"));
        }
        (Target::Identity(ids), outer_negated ^ inner_negated)
    } else {
        (Target::Property(leaf_from_field(inner)?), outer_negated)
    };

    Ok(ReferenceCondition {
        key: field.key.clone(),
        ref_id,
        reverse: field.is_reverse,
        negated,
        target,
    })
}

fn rollup_from_field(
    field: &Field,
    inner: &Field,
    aggregate: Aggregate,
    ref_id: &str,
) -> Result<Rollup, CompileError> {
    if aggregate != Aggregate::Count && inner.key.is_empty() {
        return Err(CompileError::MissingAggregateTarget {
            entity_id: ref_id.to_string(),
            reason: format!("`{}` aggregates without a target property", field.key),
        });
    }
    if inner.expression.is_membership() || inner.expression.is_text_match() || inner.expression == Operator::Between {
        return Err(unsupported(&inner.key, inner.expression, "rollup"));
    }
    // 空值只建立关联，不做比较
    let value = match &inner.value {
        Value::Null => Literal::Null,
        Value::String(s) if s.is_empty() => Literal::Null,
        Value::Array(items) if items.is_empty() => Literal::Null,
        other => Literal::Number(number_of(&inner.key, other)?),
    };
    Ok(Rollup {
        aggregate,
        key: inner.key.clone(),
        op: inner.expression,
        value,
    })
}

fn leaf_from_field(field: &Field) -> Result<Leaf, CompileError> {
    let key = field.key.clone();
    let op = field.expression;
    let (kind, value, op) = match &field.data_type {
        DataType::Number => {
            if op.is_text_match() || op == Operator::Between {
                return Err(unsupported(&key, op, "number"));
            }
            (LeafKind::Number, typed_value(&key, op, &field.value, |v| number_of(&key, v).map(Literal::Number))?, op)
        }
        DataType::DateTime => {
            if op.is_text_match() || op.is_membership() || op == Operator::Between {
                return Err(unsupported(&key, op, "datetime"));
            }
            (LeafKind::DateTime, typed_value(&key, op, &field.value, |v| parse_millis(&key, v).map(Literal::Millis))?, op)
        }
        DataType::DateRange => {
            if !matches!(op, Operator::Eq | Operator::Between) {
                return Err(unsupported(&key, op, "date-range"));
            }
            (LeafKind::DateRange, range_of(&key, &field.value)?, Operator::Between)
        }
        // 字符串以及未知类型都按字符串处理
        _ => {
            if op == Operator::Between {
                return Err(unsupported(&key, op, "string"));
            }
            (LeafKind::String, typed_value(&key, op, &field.value, |v| Ok(Literal::Text(text_of(v))))?, op)
        }
    };
    Ok(Leaf { key, kind, op, value })
}

/// 按运算符形状转换值：集合运算符得到列表，其余得到标量
fn typed_value(
    key: &str,
    op: Operator,
    value: &Value,
    convert: impl Fn(&Value) -> Result<Literal, CompileError>,
) -> Result<Literal, CompileError> {
    if op.is_membership() {
        let items = json_values(value)
            .iter()
            .map(&convert)
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(Literal::List(items));
    }
    match value {
        Value::Null if matches!(op, Operator::Eq | Operator::NotEq) => Ok(Literal::Null),
        Value::Null => Err(CompileError::InvalidValue {
            key: key.to_string(),
            reason: format!("`{}` needs a value", op),
        }),
        Value::Array(_) => Err(CompileError::InvalidValue {
            key: key.to_string(),
            reason: format!("`{}` expects a single value", op),
        }),
        other => convert(other),
    }
}

fn range_of(key: &str, value: &Value) -> Result<Literal, CompileError> {
    let (from, to) = match value {
        Value::Array(items) if items.len() == 2 => (&items[0], &items[1]),
        Value::Object(map) => match (map.get("from"), map.get("to")) {
            (Some(from), Some(to)) => (from, to),
            _ => return Err(invalid(key, "date range needs `from` and `to`")),
        },
        _ => return Err(invalid(key, "date range needs two bounds")),
    };
    Ok(Literal::List(vec![
        Literal::Millis(parse_millis(key, from)?),
        Literal::Millis(parse_millis(key, to)?),
    ]))
}

fn number_of(key: &str, value: &Value) -> Result<serde_json::Number, CompileError> {
    match value {
        Value::Number(n) => Ok(n.clone()),
        Value::String(s) => {
            let trimmed = s.trim();
            if let Ok(i) = trimmed.parse::<i64>() {
                return Ok(i.into());
            }
            trimmed
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .ok_or_else(|| invalid(key, &format!("`{}` is not a number", s)))
        }
        other => Err(invalid(key, &format!("`{}` is not a number", other))),
    }
}

/// 日期统一成毫秒时间戳：接受毫秒数字、RFC 3339 或 `YYYY-MM-DD`
pub fn parse_millis(key: &str, value: &Value) -> Result<i64, CompileError> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .ok_or_else(|| invalid(key, "timestamp out of range")),
        Value::String(s) => {
            if let Ok(at) = OffsetDateTime::parse(s, &Rfc3339) {
                return Ok((at.unix_timestamp_nanos() / 1_000_000) as i64);
            }
            let day = format_description!("[year]-[month]-[day]");
            Date::parse(s, &day)
                .map(|date| (date.midnight().assume_utc().unix_timestamp_nanos() / 1_000_000) as i64)
                .map_err(|_| invalid(key, &format!("`{}` is not a date", s)))
        }
        other => Err(invalid(key, &format!("`{}` is not a date", other))),
    }
}

/// 毫秒时间戳转回 RFC 3339，供关系型后端做时间戳比较
pub fn millis_to_rfc3339(millis: i64) -> Option<String> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)
        .ok()?
        .format(&Rfc3339)
        .ok()
}

fn json_values(value: &Value) -> Vec<Value> {
    match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items.clone(),
        other => vec![other.clone()],
    }
}

fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn texts(value: &Value) -> Vec<String> {
    json_values(value)
        .iter()
        .filter(|v| !v.is_null())
        .map(text_of)
        .collect()
}

fn unsupported(key: &str, op: Operator, kind: &str) -> CompileError {
    CompileError::UnsupportedOperator {
        key: key.to_string(),
        op: op.to_string(),
        kind: kind.to_string(),
    }
}

fn invalid(key: &str, reason: &str) -> CompileError {
    CompileError::InvalidValue {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}
