#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use sea_query::Values;
use segment_dispatcher::condition::{conditions_from_fields, Condition, DataType, Field};
use segment_dispatcher::config::EngineConfig;
use segment_dispatcher::executor::{GraphExecutor, SqlExecutor};
use segment_dispatcher::hydrate::{Item, ItemLoader};
use segment_dispatcher::rows::Row;
use segment_dispatcher::schema::{FieldMeta, StaticSchema};
use segment_dispatcher::{GraphBackend, RelationalBackend};
use serde_json::{json, Value};

pub const ANN_1: &str = "c-ann-1";
pub const BOB: &str = "c-bob";
pub const ANN_2: &str = "c-ann-2";

pub fn schema() -> StaticSchema {
    StaticSchema::new()
        .with_field("contacts", "name", FieldMeta::new(DataType::String))
        .with_field("contacts", "owner", FieldMeta::reference("deals").reversed())
        .with_field("deals", "title", FieldMeta::new(DataType::String))
        .with_field("deals", "status", FieldMeta::new(DataType::String))
        .with_field("deals", "amount", FieldMeta::new(DataType::Number))
        .with_field("deals", "tags", FieldMeta::new(DataType::List))
        .with_field("deals", "owner", FieldMeta::reference("contacts"))
}

pub fn conditions(value: Value) -> Vec<Condition> {
    let fields: Vec<Field> = serde_json::from_value(value).expect("fixture fields");
    conditions_from_fields(&fields).expect("fixture conditions")
}

pub fn row(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        other => panic!("row fixture must be an object, got {other}"),
    }
}

pub fn id_rows(ids: &[&str]) -> Vec<Row> {
    ids.iter().map(|id| row(json!({"id": id}))).collect()
}

pub fn item(entity_id: &str, id: &str, fields: Value) -> Item {
    Item {
        id: id.to_string(),
        entity_id: entity_id.to_string(),
        fields: match fields {
            Value::Object(map) => map,
            _ => Default::default(),
        },
        container_id: None,
    }
}

/// Contacts `Ann`, `Bob`, `Ann` and deals owned by the first Ann.
pub fn seeded_items() -> Vec<Item> {
    vec![
        item("contacts", ANN_1, json!({"name": "Ann"})),
        item("contacts", BOB, json!({"name": "Bob"})),
        item("contacts", ANN_2, json!({"name": "Ann"})),
        item("deals", "d1", json!({"title": "Renewal", "amount": 100, "owner": [ANN_1]})),
        item("deals", "d2", json!({"title": "Upsell", "amount": 250, "owner": [ANN_1]})),
        item("deals", "d3", json!({"title": "Pilot", "amount": 75, "owner": [BOB]})),
    ]
}

type Rule = (String, anyhow::Result<Vec<Row>>);

/// Answers each query with the rows of the first rule whose marker occurs in
/// the query text, or with no rows.
#[derive(Default)]
struct Script {
    rules: Mutex<Vec<Rule>>,
    queries: Mutex<Vec<String>>,
}

impl Script {
    fn respond(&self, text: &str) -> anyhow::Result<Vec<Row>> {
        self.queries.lock().unwrap().push(text.to_string());
        let rules = self.rules.lock().unwrap();
        match rules.iter().find(|(marker, _)| text.contains(marker.as_str())) {
            Some((_, Ok(rows))) => Ok(rows.clone()),
            Some((_, Err(e))) => Err(anyhow::anyhow!("{e}")),
            None => Ok(Vec::new()),
        }
    }
}

#[derive(Default)]
pub struct ScriptedSqlExecutor {
    script: Script,
    values: Mutex<Vec<Values>>,
}

impl ScriptedSqlExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on(&self, marker: &str, rows: Vec<Row>) {
        self.script.rules.lock().unwrap().push((marker.to_string(), Ok(rows)));
    }

    pub fn fail_on(&self, marker: &str, message: &str) {
        self.script
            .rules
            .lock()
            .unwrap()
            .push((marker.to_string(), Err(anyhow::anyhow!(message.to_string()))));
    }

    pub fn queries(&self) -> Vec<String> {
        self.script.queries.lock().unwrap().clone()
    }

    pub fn values(&self) -> Vec<Values> {
        self.values.lock().unwrap().clone()
    }
}

#[async_trait]
impl SqlExecutor for ScriptedSqlExecutor {
    async fn query(&self, sql: &str, values: &Values) -> anyhow::Result<Vec<Row>> {
        self.values.lock().unwrap().push(values.clone());
        self.script.respond(sql)
    }
}

#[derive(Default)]
pub struct ScriptedGraphExecutor {
    script: Script,
}

impl ScriptedGraphExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on(&self, marker: &str, rows: Vec<Row>) {
        self.script.rules.lock().unwrap().push((marker.to_string(), Ok(rows)));
    }

    pub fn fail_on(&self, marker: &str, message: &str) {
        self.script
            .rules
            .lock()
            .unwrap()
            .push((marker.to_string(), Err(anyhow::anyhow!(message.to_string()))));
    }

    pub fn queries(&self) -> Vec<String> {
        self.script.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl GraphExecutor for ScriptedGraphExecutor {
    async fn run(&self, cypher: &str) -> anyhow::Result<BoxStream<'static, anyhow::Result<Row>>> {
        let rows = self.script.respond(cypher)?;
        Ok(stream::iter(rows.into_iter().map(Ok)).boxed())
    }
}

/// Item store that answers loads in reverse id order, like an unordered bulk load.
pub struct MemoryItemLoader {
    items: HashMap<String, Item>,
    loads: Mutex<usize>,
}

impl MemoryItemLoader {
    pub fn new(items: Vec<Item>) -> Arc<Self> {
        Arc::new(Self {
            items: items.into_iter().map(|item| (item.id.clone(), item)).collect(),
            loads: Mutex::new(0),
        })
    }

    pub fn loads(&self) -> usize {
        *self.loads.lock().unwrap()
    }
}

#[async_trait]
impl ItemLoader for MemoryItemLoader {
    async fn load(&self, ids: &[String]) -> anyhow::Result<Vec<Item>> {
        *self.loads.lock().unwrap() += 1;
        let mut found: Vec<Item> = ids.iter().filter_map(|id| self.items.get(id).cloned()).collect();
        found.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(found)
    }
}

pub fn relational_backend(
    config: &EngineConfig,
    executor: Arc<ScriptedSqlExecutor>,
    loader: Arc<MemoryItemLoader>,
) -> RelationalBackend {
    RelationalBackend::new(config, Arc::new(schema()), executor).with_loader(loader)
}

pub fn graph_backend(
    config: &EngineConfig,
    executor: Arc<ScriptedGraphExecutor>,
    loader: Arc<MemoryItemLoader>,
) -> GraphBackend {
    GraphBackend::new(config, Arc::new(schema()), executor, loader)
}

pub fn ids(items: &[Item]) -> Vec<&str> {
    items.iter().map(|item| item.id.as_str()).collect()
}
