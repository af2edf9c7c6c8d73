//! The same condition trees run through both backends against stores seeded
//! with the same data must agree.

mod support;

use segment_dispatcher::config::EngineConfig;
use segment_dispatcher::request::{Grouping, SegmentRequest};
use segment_dispatcher::{EngineError, GraphBackend, RelationalBackend, SegmentBackend};
use serde_json::{json, Value};
use support::*;

struct Pair {
    sql: std::sync::Arc<ScriptedSqlExecutor>,
    graph: std::sync::Arc<ScriptedGraphExecutor>,
    relational: RelationalBackend,
    graph_backend: GraphBackend,
}

fn pair() -> Pair {
    let config = EngineConfig::default();
    let sql = ScriptedSqlExecutor::new();
    let graph = ScriptedGraphExecutor::new();
    Pair {
        relational: relational_backend(&config, sql.clone(), MemoryItemLoader::new(seeded_items())),
        graph_backend: graph_backend(&config, graph.clone(), MemoryItemLoader::new(seeded_items())),
        sql,
        graph,
    }
}

fn backends(pair: &Pair) -> [&dyn SegmentBackend; 2] {
    [&pair.relational, &pair.graph_backend]
}

#[tokio::test]
async fn test_property_filter_agrees() {
    let pair = pair();
    pair.sql.on("ORDER BY", id_rows(&[ANN_1, ANN_2]));
    pair.graph.on("ORDER BY", id_rows(&[ANN_1, ANN_2]));
    let request = SegmentRequest::new("contacts", conditions(json!([{"key": "name", "value": "Ann"}])));

    for backend in backends(&pair) {
        let segment = backend.result(&request).await.unwrap();
        assert_eq!(ids(&segment.items), vec![ANN_1, ANN_2], "{:?}", backend.kind());
        assert_eq!(segment.items[0].fields.get("name"), Some(&json!("Ann")));
    }
    assert!(pair.sql.queries()[0].contains(r#""items"."fields" ->> $"#));
    assert!(pair.graph.queries()[0].contains("WHERE n.`name` = 'Ann'"));
}

#[tokio::test]
async fn test_reference_filter_agrees() {
    let pair = pair();
    pair.sql.on(r#"AS "id""#, id_rows(&["d1", "d2"]));
    pair.graph.on("AS id", id_rows(&["d1", "d2"]));
    let owned_by_ann = conditions(json!([{
        "key": "owner", "data_type": "reference", "ref_id": "contacts",
        "field": {"key": "id", "value": [ANN_1]}
    }]));

    for backend in backends(&pair) {
        let items = backend.search_items("deals", &owned_by_ann).await.unwrap();
        assert_eq!(ids(&items), vec!["d1", "d2"], "{:?}", backend.kind());
        assert!(items.iter().all(|item| item.fields.get("owner") == Some(&json!([ANN_1]))));
    }
    assert!(pair.sql.queries()[0].contains(r#""items"."fields" @> CAST($"#));
    assert!(pair.graph.queries()[0].contains("m0.`id` IN ['c-ann-1']"));
}

#[tokio::test]
async fn test_grouped_counts_agree() {
    let pair = pair();
    let rows = vec![row(json!({"group": "open", "count": 3})), row(json!({"group": "closed", "count": 2}))];
    pair.sql.on("COUNT(*)", rows.clone());
    pair.graph.on("count(n)", rows);

    let mut results = Vec::new();
    for backend in backends(&pair) {
        results.push(
            backend
                .count("deals", &Grouping::Field("status".into()), &[])
                .await
                .unwrap(),
        );
    }
    assert_eq!(results[0], results[1]);
    assert_eq!(results[0].get("open"), Some(&3));
}

#[tokio::test]
async fn test_parent_sums_agree() {
    let pair = pair();
    // numeric aggregates come back as text from SQL and as numbers from the graph
    pair.sql.on("SUM(", vec![row(json!({"group": ANN_1, "total": "350"})), row(json!({"group": BOB, "total": "75"}))]);
    pair.graph.on("AS total", vec![row(json!({"group": ANN_1, "total": 350})), row(json!({"group": BOB, "total": 75}))]);

    let mut results = Vec::new();
    for backend in backends(&pair) {
        results.push(
            backend
                .sum("deals", "amount", &Grouping::Parent("owner".into()), &[])
                .await
                .unwrap(),
        );
    }
    assert_eq!(results[0], results[1]);
    assert_eq!(results[0].get(ANN_1), Some(&350.0));
    assert_eq!(results[0].get(BOB), Some(&75.0));
}

#[tokio::test]
async fn test_total_count_of_empty_store_agrees() {
    let pair = pair();

    for backend in backends(&pair) {
        let counts = backend.count("deals", &Grouping::Total, &[]).await.unwrap();
        assert_eq!(counts.len(), 1);
        assert_eq!(counts.get("deals"), Some(&0), "{:?}", backend.kind());
    }
}

#[tokio::test]
async fn test_list_values_become_alternatives() {
    let pair = pair();
    let tags = conditions(json!([
        {"key": "tags", "value": ["a", "b", "c"], "data_type": "list", "field": {"key": "value"}}
    ]));

    for backend in backends(&pair) {
        backend.search_ids("deals", &tags).await.unwrap();
    }

    let sql = &pair.sql.queries()[0];
    assert_eq!(sql.matches("@>").count(), 3);
    let cypher = &pair.graph.queries()[0];
    assert_eq!(cypher.matches("[:`contains`]").count(), 3);
    assert_eq!(cypher.matches(" OR ").count(), 2);
}

#[tokio::test]
async fn test_operators_map_to_same_comparison() {
    let cases: Vec<(Value, &str, &str)> = vec![
        (json!({"key": "amount", "value": 10, "data_type": "number", "expression": "<"}), " < ", "n.`amount` < 10"),
        (json!({"key": "amount", "value": 10, "data_type": "number", "expression": ">="}), " >= ", "n.`amount` >= 10"),
        (json!({"key": "status", "value": "open", "expression": "!="}), " <> ", "n.`status` <> 'open'"),
        (json!({"key": "status", "value": ["open", "won"], "expression": "in"}), " IN (", "n.`status` IN ['open', 'won']"),
        (json!({"key": "status", "value": ["lost"], "expression": "not in"}), " NOT IN (", "NOT n.`status` IN ['lost']"),
        (json!({"key": "title", "value": "Re", "expression": "starts-with"}), " LIKE ", "n.`title` STARTS WITH 'Re'"),
        (json!({"key": "title", "value": "al", "expression": "ends-with"}), " LIKE ", "n.`title` ENDS WITH 'al'"),
        (json!({"key": "title", "value": "new", "expression": "contains"}), " LIKE ", "n.`title` CONTAINS 'new'"),
        (json!({"key": "status", "value": null}), " IS NULL", "n.`status` IS NULL"),
    ];

    for (field, sql_fragment, cypher_fragment) in cases {
        let pair = pair();
        let filter = conditions(json!([field.clone()]));
        for backend in backends(&pair) {
            backend.search_ids("deals", &filter).await.unwrap();
        }
        let sql = &pair.sql.queries()[0];
        let cypher = &pair.graph.queries()[0];
        assert!(sql.contains(sql_fragment), "{field}: {sql}");
        assert!(cypher.contains(cypher_fragment), "{field}: {cypher}");
    }
}

#[tokio::test]
async fn test_negations_render_on_both_sides() {
    let cases: Vec<(&str, Value, &str, &str)> = vec![
        (
            "deals",
            json!({"key": "tags", "value": ["a", "b"], "data_type": "list", "expression": "not in", "field": {"key": "value"}}),
            "NOT (",
            "WHERE NOT (EXISTS { MATCH (n)-[:`contains`]->(m0:`tags`)",
        ),
        (
            "deals",
            json!({
                "key": "owner", "data_type": "reference", "ref_id": "contacts", "expression": "not in",
                "field": {"key": "id", "value": [ANN_1]}
            }),
            "NOT (",
            "WHERE NOT EXISTS { MATCH (n)-[:`has` {`key`: 'owner'}]->(m0:`contacts`) WHERE m0.`id` IN ['c-ann-1'] }",
        ),
        (
            "contacts",
            json!({"key": "", "value": ["deals#d1"], "expression": "not in"}),
            r#""items"."container_id" IS NULL OR "items"."container_id" NOT IN ("#,
            "WHERE NOT EXISTS { MATCH (n)-[:`has`]-(m0:`deals`) WHERE m0.`id` = 'd1' }",
        ),
    ];

    for (entity, field, sql_fragment, cypher_fragment) in cases {
        let pair = pair();
        let filter = conditions(json!([field.clone()]));
        for backend in backends(&pair) {
            backend.search_ids(entity, &filter).await.unwrap();
        }
        let sql = &pair.sql.queries()[0];
        let cypher = &pair.graph.queries()[0];
        assert!(sql.contains(sql_fragment), "{field}: {sql}");
        assert!(cypher.contains(cypher_fragment), "{field}: {cypher}");
    }
}

#[tokio::test]
async fn test_rollups_render_on_both_sides() {
    let rollup = |inner: Value| {
        json!({
            "key": "owner", "data_type": "reference", "ref_id": "deals", "is_reverse": true,
            "aggregate": "sum", "field": inner
        })
    };
    let cases: Vec<(Value, &str, &str)> = vec![
        (
            rollup(json!({"key": "amount", "value": 300, "expression": ">"})),
            "(SELECT COALESCE(SUM(",
            "reduce(total = 0, value IN [(n)<-[:`has` {`key`: 'owner'}]-(m0:`deals`) | m0.`amount`]",
        ),
        (
            rollup(json!({"key": "amount", "value": ""})),
            r#"EXISTS (SELECT "r"."id""#,
            "WHERE EXISTS { MATCH (n)<-[:`has` {`key`: 'owner'}]-(m0:`deals`) }",
        ),
    ];

    for (field, sql_fragment, cypher_fragment) in cases {
        let pair = pair();
        let filter = conditions(json!([field.clone()]));
        for backend in backends(&pair) {
            backend.search_ids("contacts", &filter).await.unwrap();
        }
        let sql = &pair.sql.queries()[0];
        let cypher = &pair.graph.queries()[0];
        assert!(sql.contains(sql_fragment), "{field}: {sql}");
        assert!(cypher.contains(cypher_fragment), "{field}: {cypher}");
    }
}

#[tokio::test]
async fn test_numeric_elements_agree() {
    let pair = pair();
    let rows = vec![row(json!({"element": 5})), row(json!({"element": 8}))];
    pair.sql.on("DISTINCT", rows.clone());
    pair.graph.on("RETURN DISTINCT", rows);

    for backend in backends(&pair) {
        let elements = backend.search_elements("deals", "scores", &[]).await.unwrap();
        assert_eq!(elements, vec![json!(5), json!(8)], "{:?}", backend.kind());
    }
    let sql = &pair.sql.queries()[0];
    assert!(sql.contains("jsonb_array_elements("));
    assert!(!sql.contains("jsonb_array_elements_text"));
    assert!(pair.graph.queries()[0].contains("RETURN DISTINCT g.`value` AS element"));
}

#[tokio::test]
async fn test_construction_errors_agree() {
    let pair = pair();
    let nested_too_deep = json!([{
        "key": "owner", "data_type": "reference", "ref_id": "contacts",
        "field": {"key": "deals", "data_type": "reference", "ref_id": "deals", "field": {"key": "id", "value": "d1"}}
    }]);
    let fields: Vec<segment_dispatcher::Field> = serde_json::from_value(nested_too_deep).unwrap();
    assert!(segment_dispatcher::condition::conditions_from_fields(&fields).is_err());

    let unknown_entity = conditions(json!([{
        "key": "owner", "data_type": "reference", "ref_id": "tickets",
        "field": {"key": "title", "value": "x"}
    }]));
    for backend in backends(&pair) {
        let err = backend.search_ids("deals", &unknown_entity).await.unwrap_err();
        assert!(err.is_construction(), "{:?}", backend.kind());
    }
    assert!(pair.sql.queries().is_empty());
    assert!(pair.graph.queries().is_empty());
}

#[tokio::test]
async fn test_unknown_type_is_lenient_only_for_sql() {
    let pair = pair();
    let rating = conditions(json!([{"key": "rating", "value": 5, "data_type": "stars"}]));

    assert!(pair.relational.search_ids("deals", &rating).await.is_ok());
    let err = pair.graph_backend.search_ids("deals", &rating).await.unwrap_err();
    assert!(matches!(err, EngineError::Compile(_)));
}
