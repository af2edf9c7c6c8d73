use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use segment_dispatcher::condition::{conditions_from_fields, Condition, Field};
use segment_dispatcher::config::EngineConfig;
use segment_dispatcher::cypher_compiler::{CypherCompiler, SegmentOptions};
use segment_dispatcher::graph_pattern::PatternBuilder;
use segment_dispatcher::schema::StaticSchema;
use segment_dispatcher::sql_compiler::SqlCompiler;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// 加载引擎配置，失败时使用默认配置
fn load_config() -> EngineConfig {
    match EngineConfig::from_json_file("engine.json") {
        Ok(config) => {
            println!("✅ 成功从JSON配置文件加载引擎配置");
            config
        }
        Err(e) => {
            println!("⚠️ 无法加载JSON配置文件 ({}), 使用默认配置", e);
            EngineConfig::default()
        }
    }
}

/// 加载实体 schema，失败时使用空 schema
fn load_schema() -> StaticSchema {
    match StaticSchema::from_json_file("schema.json") {
        Ok(schema) => {
            println!("✅ 成功加载 schema.json");
            schema
        }
        Err(e) => {
            println!("⚠️ 无法加载 schema ({}), 使用空 schema", e);
            StaticSchema::new()
        }
    }
}

/// 解析一行输入：`<entity> <JSON 条件数组或单个条件>`
fn parse_line(line: &str) -> anyhow::Result<(String, Vec<Condition>)> {
    let (entity, json) = line.trim().split_once(char::is_whitespace).unwrap_or((line.trim(), "[]"));
    let value: serde_json::Value = serde_json::from_str(json.trim())?;
    let fields: Vec<Field> = match value {
        serde_json::Value::Array(_) => serde_json::from_value(value)?,
        single => vec![serde_json::from_value(single)?],
    };
    Ok((entity.to_string(), conditions_from_fields(&fields)?))
}

fn print_queries(
    sql: &SqlCompiler,
    cypher: &CypherCompiler,
    schema: &StaticSchema,
    config: &EngineConfig,
    line: &str,
) -> anyhow::Result<()> {
    let (entity, conditions) = parse_line(line)?;

    let statement = sql.segment(&entity, &conditions, None, None)?;
    println!("\n[生成的 SQL]:");
    println!("{}", statement.sql);
    println!("参数: {:?}", statement.values.0);

    let node = PatternBuilder::new(schema, &config.graph).build(&entity, None, &conditions)?;
    println!("\n[生成的 Cypher]:");
    println!("{}", cypher.segment(&node, &SegmentOptions::default())?);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    // RUST_LOG=debug 可查看每条查询的编译日志
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .try_init();

    println!("--- Segment Dispatcher: 条件到 SQL / Cypher 编译器 ---");
    println!("输入格式: <实体> <JSON 条件>，例如:");
    println!(r#"  contacts [{{"key": "name", "value": "Ann"}}]"#);
    println!("按 Ctrl-D 退出\n");

    let config = load_config();
    let schema = load_schema();
    let sql = SqlCompiler::new(config.relational.clone(), Arc::new(schema.clone()));
    let cypher = CypherCompiler::new(config.graph.clone());

    let mut editor = DefaultEditor::new()?;
    loop {
        match editor.readline("segment> ") {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                editor.add_history_entry(line.as_str())?;
                if let Err(e) = print_queries(&sql, &cypher, &schema, &config, &line) {
                    println!("✗ 编译失败: {}", e);
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}
