//! Normalization of raw backend rows into id lists, count maps and sum maps.

use crate::error::EngineError;
use crate::request::GroupTarget;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A backend row, keyed by column / return alias.
pub type Row = Map<String, Value>;

pub type GroupedCounts = BTreeMap<String, i64>;
pub type GroupedSums = BTreeMap<String, f64>;

pub const ID_COLUMN: &str = "id";
pub const GROUP_COLUMN: &str = "group";
pub const COUNT_COLUMN: &str = "count";
pub const SUM_COLUMN: &str = "total";
pub const VALUE_COLUMN: &str = "value";
pub const ELEMENT_COLUMN: &str = "element";

fn column<'a>(row: &'a Row, name: &str) -> Result<&'a Value, EngineError> {
    row.get(name)
        .ok_or_else(|| EngineError::MalformedRow(format!("missing column `{}`", name)))
}

/// Required identifier column; numbers are accepted and stringified.
pub fn text_column(row: &Row, name: &str) -> Result<String, EngineError> {
    match column(row, name)? {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(EngineError::MalformedRow(format!("column `{}` holds {}", name, other))),
    }
}

/// Group keys: missing/null values share the `""` bucket.
pub fn group_key(row: &Row) -> String {
    match row.get(GROUP_COLUMN) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

pub fn integer_column(row: &Row, name: &str) -> Result<i64, EngineError> {
    match column(row, name)? {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .ok_or_else(|| EngineError::MalformedRow(format!("column `{}` out of range", name))),
        Value::String(s) => s
            .parse()
            .map_err(|_| EngineError::MalformedRow(format!("column `{}` is not an integer", name))),
        other => Err(EngineError::MalformedRow(format!("column `{}` holds {}", name, other))),
    }
}

/// Numeric aggregates; SQL `numeric` often arrives as text, an empty sum as null.
pub fn float_column(row: &Row, name: &str) -> Result<f64, EngineError> {
    match column(row, name)? {
        Value::Null => Ok(0.0),
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| EngineError::MalformedRow(format!("column `{}` out of range", name))),
        Value::String(s) => s
            .parse()
            .map_err(|_| EngineError::MalformedRow(format!("column `{}` is not a number", name))),
        other => Err(EngineError::MalformedRow(format!("column `{}` holds {}", name, other))),
    }
}

pub fn ids_from_rows(rows: &[Row]) -> Result<Vec<String>, EngineError> {
    rows.iter().map(|row| text_column(row, ID_COLUMN)).collect()
}

pub fn elements_from_rows(rows: Vec<Row>) -> Vec<Value> {
    rows.into_iter()
        .filter_map(|mut row| row.remove(ELEMENT_COLUMN))
        .filter(|value| !value.is_null())
        .collect()
}

fn bucket(row: &Row, target: &GroupTarget, entity_id: &str) -> String {
    match target {
        GroupTarget::Total => entity_id.to_string(),
        _ => group_key(row),
    }
}

pub fn counts_from_rows(
    rows: &[Row],
    target: &GroupTarget,
    entity_id: &str,
) -> Result<GroupedCounts, EngineError> {
    let mut counts = GroupedCounts::new();
    if *target == GroupTarget::Total {
        counts.insert(entity_id.to_string(), 0);
    }
    for row in rows {
        let count = integer_column(row, COUNT_COLUMN)?;
        *counts.entry(bucket(row, target, entity_id)).or_insert(0) += count;
    }
    Ok(counts)
}

pub fn sums_from_rows(
    rows: &[Row],
    target: &GroupTarget,
    entity_id: &str,
) -> Result<GroupedSums, EngineError> {
    let mut sums = GroupedSums::new();
    if *target == GroupTarget::Total {
        sums.insert(entity_id.to_string(), 0.0);
    }
    for row in rows {
        let total = float_column(row, SUM_COLUMN)?;
        *sums.entry(bucket(row, target, entity_id)).or_insert(0.0) += total;
    }
    Ok(sums)
}
