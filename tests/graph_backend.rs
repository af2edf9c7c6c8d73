mod support;

use std::sync::Arc;

use segment_dispatcher::config::EngineConfig;
use segment_dispatcher::request::{Grouping, SegmentRequest};
use segment_dispatcher::{CompileError, EngineError, GraphBackend, SegmentBackend};
use serde_json::json;
use support::*;

fn backend(executor: Arc<ScriptedGraphExecutor>) -> GraphBackend {
    graph_backend(&EngineConfig::default(), executor, MemoryItemLoader::new(seeded_items()))
}

fn sequential() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.graph.count_fanout = false;
    config
}

#[tokio::test]
async fn test_segment_with_count_fans_out() {
    let executor = ScriptedGraphExecutor::new();
    executor.on("count(n) AS count", vec![row(json!({"count": 2}))]);
    executor.on("ORDER BY", id_rows(&[ANN_1, ANN_2]));
    let backend = backend(executor.clone());

    let request = SegmentRequest::new("contacts", conditions(json!([{"key": "name", "value": "Ann"}]))).with_count();
    let segment = backend.result(&request).await.unwrap();

    assert_eq!(ids(&segment.items), vec![ANN_1, ANN_2]);
    assert_eq!(segment.counts.unwrap().get("contacts"), Some(&2));

    let queries = executor.queries();
    assert_eq!(queries.len(), 2);
    assert!(queries.iter().all(|q| q.contains("WHERE n.`name` = 'Ann'")));
}

#[tokio::test]
async fn test_segment_without_count_is_one_query() {
    let executor = ScriptedGraphExecutor::new();
    executor.on("ORDER BY", id_rows(&[ANN_2]));
    let backend = backend(executor.clone());

    let segment = backend
        .result(&SegmentRequest::new("contacts", vec![]))
        .await
        .unwrap();

    assert_eq!(ids(&segment.items), vec![ANN_2]);
    assert!(segment.counts.is_none());
    let queries = executor.queries();
    assert_eq!(queries.len(), 1);
    assert!(queries[0].ends_with("SKIP 0\nLIMIT 25"));
}

#[tokio::test]
async fn test_sequential_count_when_fanout_disabled() {
    let executor = ScriptedGraphExecutor::new();
    executor.on("count(n) AS count", vec![row(json!({"count": 1}))]);
    executor.on("ORDER BY", id_rows(&[BOB]));
    let backend = graph_backend(&sequential(), executor.clone(), MemoryItemLoader::new(seeded_items()));

    let segment = backend
        .result(&SegmentRequest::new("contacts", vec![]).with_count())
        .await
        .unwrap();

    assert_eq!(ids(&segment.items), vec![BOB]);
    assert_eq!(segment.counts.unwrap().get("contacts"), Some(&1));
    let queries = executor.queries();
    assert_eq!(queries.len(), 2);
    assert!(queries[0].contains("ORDER BY"));
    assert!(queries[1].contains("count(n) AS count"));
}

#[tokio::test]
async fn test_count_failure_fails_the_segment() {
    let executor = ScriptedGraphExecutor::new();
    executor.fail_on("count(n) AS count", "graph unavailable");
    executor.on("ORDER BY", id_rows(&[ANN_1]));
    let loader = MemoryItemLoader::new(seeded_items());
    let backend = graph_backend(&EngineConfig::default(), executor.clone(), loader.clone());

    let err = backend
        .result(&SegmentRequest::new("contacts", vec![]).with_count())
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::Execution(_)));
    assert_eq!(err.to_string(), "execution failed: graph unavailable");
    assert_eq!(loader.loads(), 0);
}

#[tokio::test]
async fn test_construction_error_before_round_trip() {
    let executor = ScriptedGraphExecutor::new();
    let backend = backend(executor.clone());

    let request = SegmentRequest::new(
        "deals",
        conditions(json!([{
            "key": "owner", "data_type": "reference", "ref_id": "tickets",
            "field": {"key": "id", "value": ["t1"]}
        }])),
    )
    .with_count();
    let err = backend.result(&request).await.unwrap_err();

    assert!(err.is_construction());
    assert!(matches!(err, EngineError::Compile(CompileError::UnknownReference { .. })));
    assert!(executor.queries().is_empty());
}

#[tokio::test]
async fn test_unknown_data_type_is_rejected() {
    let executor = ScriptedGraphExecutor::new();
    let backend = backend(executor.clone());

    let err = backend
        .search_ids("deals", &conditions(json!([{"key": "rating", "value": 5, "data_type": "stars"}])))
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::Compile(CompileError::UnsupportedDataType { .. })));
    assert!(executor.queries().is_empty());
}

#[tokio::test]
async fn test_reference_identity_filter() {
    let executor = ScriptedGraphExecutor::new();
    executor.on("RETURN n.`id` AS id", id_rows(&["d1", "d2"]));
    let backend = backend(executor.clone());

    let found = backend
        .search_ids(
            "deals",
            &conditions(json!([{
                "key": "owner", "data_type": "reference", "ref_id": "contacts",
                "field": {"key": "id", "value": [ANN_1]}
            }])),
        )
        .await
        .unwrap();

    assert_eq!(found, vec!["d1", "d2"]);
    assert!(executor.queries()[0]
        .contains("EXISTS { MATCH (n)-[:`has` {`key`: 'owner'}]->(m0:`contacts`) WHERE m0.`id` IN ['c-ann-1'] }"));
}

#[tokio::test]
async fn test_reverse_reference_walks_incoming_edge() {
    let executor = ScriptedGraphExecutor::new();
    let backend = backend(executor.clone());

    backend
        .search_ids(
            "contacts",
            &conditions(json!([{
                "key": "owner", "data_type": "reference", "ref_id": "deals", "is_reverse": true,
                "field": {"key": "title", "value": "Renewal"}
            }])),
        )
        .await
        .unwrap();

    assert!(executor.queries()[0].contains("(n)<-[:`has` {`key`: 'owner'}]-(m0:`deals`) WHERE m0.`title` = 'Renewal'"));
}

#[tokio::test]
async fn test_grouped_count_and_parent_sum() {
    let executor = ScriptedGraphExecutor::new();
    executor.on(
        "count(n) AS count",
        vec![row(json!({"group": "open", "count": 3})), row(json!({"group": "closed", "count": 2}))],
    );
    executor.on("AS total", vec![row(json!({"group": ANN_1, "total": 350}))]);
    let backend = backend(executor.clone());

    let counts = backend
        .count("deals", &Grouping::Field("status".into()), &[])
        .await
        .unwrap();
    assert_eq!(counts.get("open"), Some(&3));
    assert_eq!(counts.get("closed"), Some(&2));

    let sums = backend
        .sum("deals", "amount", &Grouping::Parent("owner".into()), &[])
        .await
        .unwrap();
    assert_eq!(sums.len(), 1);
    assert_eq!(sums.get(ANN_1), Some(&350.0));

    let queries = executor.queries();
    assert!(queries[0].ends_with("RETURN n.`status` AS `group`, count(n) AS count"));
    assert!(queries[1].contains("MATCH (n)-[:`has` {`key`: 'owner'}]->(g:`contacts`)"));
}

#[tokio::test]
async fn test_search_elements_walks_contains_edges() {
    let executor = ScriptedGraphExecutor::new();
    executor.on(
        "RETURN DISTINCT",
        vec![row(json!({"element": "a"})), row(json!({"element": null})), row(json!({"element": "b"}))],
    );
    let backend = backend(executor.clone());

    let elements = backend.search_elements("deals", "tags", &[]).await.unwrap();

    assert_eq!(elements, vec![json!("a"), json!("b")]);
    assert!(executor.queries()[0].contains("[:`contains`]"));
}

#[tokio::test]
async fn test_upsert_twice_is_idempotent() {
    let executor = ScriptedGraphExecutor::new();
    let backend = backend(executor.clone());
    let fields = conditions(json!([
        {"key": "title", "value": "Renewal"},
        {"key": "owner", "data_type": "reference", "ref_id": "contacts", "field": {"key": "id", "value": [ANN_1]}}
    ]));

    backend.upsert("deals", "d1", &fields).await.unwrap();
    backend.upsert("deals", "d1", &fields).await.unwrap();

    let queries = executor.queries();
    assert_eq!(queries.len(), 2);
    assert_eq!(queries[0], queries[1]);
    assert!(!queries[0].contains("CREATE"));
    assert!(queries[0].starts_with("MERGE (n:`deals` {`id`: 'd1'})"));
    assert!(queries[0].contains("MERGE (m0:`contacts` {`id`: 'c-ann-1'})"));
}

#[tokio::test]
async fn test_upsert_rejects_range_property() {
    let executor = ScriptedGraphExecutor::new();
    let backend = backend(executor.clone());

    let err = backend
        .upsert("deals", "d1", &conditions(json!([{"key": "amount", "value": 5, "data_type": "number", "expression": ">"}])))
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::Compile(CompileError::UnsupportedOperator { .. })));
    assert!(executor.queries().is_empty());
}
