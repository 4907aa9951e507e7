//! Integration tests for pivoting and running configured pipelines
//!
//! Tests go through the public API only:
//! - Pivoting decoded collection messages
//! - Splitting and flattening through registry-built steps
//! - Per-record error isolation
//! - Loading a project from disk and running its pipeline

use rstest::rstest;
use serde_json::{Value, json};
use tempfile::TempDir;
use telepivot_core::config::PROJECT_FILE;
use telepivot_core::metric::MSG_TIMESTAMP;
use telepivot_core::pivot::RawField;
use telepivot_core::{
    Config, ContentTree, DiagnosticKind, MetricRecord, MetricState, Pivot, PivotOptions, Scalar,
    TelemetryMessage, TransformError, Transformation, TransformationDoc, TransformationState,
    default_registry,
};

fn record(path: &str, content: Value) -> MetricRecord {
    MetricRecord::new(path, ContentTree::from_json(&content).unwrap())
}

fn message(value: Value) -> TelemetryMessage {
    serde_json::from_value(value).unwrap()
}

fn step(kind: &str, config: Value) -> Box<dyn Transformation> {
    let doc = TransformationDoc {
        kind: kind.to_string(),
        config,
    };
    default_registry().unwrap().load(&doc).unwrap()
}

// =============================================================================
// Pivot
// =============================================================================

#[test]
fn test_pivot_keys_and_content() {
    let msg = message(json!({
        "node_id_str": "router-1",
        "encoding_path": "model:interfaces/interface",
        "data_gpbkv": [{
            "timestamp": "T",
            "fields": [
                {"name": "keys", "fields": [{"name": "node", "string_value": "A"}]},
                {"name": "content", "fields": [{"name": "x", "uint32_value": 4096}]}
            ]
        }]
    }));

    let state = Pivot::default().pivot_message(&msg);
    let metrics: Vec<_> = state.metrics().collect();
    assert_eq!(metrics.len(), 1);
    let metric = metrics[0];
    assert_eq!(metric.path(), "model:interfaces/interface");
    assert_eq!(metric.keys().to_json(), json!({"node": "A"}));
    assert_eq!(metric.content().to_json(), json!({"x": 4096}));
    assert_eq!(metric.header(MSG_TIMESTAMP), Some(&Scalar::from("T")));
    assert_eq!(metric.node_id(), Some(&Scalar::from("router-1")));
}

#[test]
fn test_pivot_repeated_key_becomes_list() {
    let row = RawField::container(
        "",
        vec![
            RawField::container(
                "keys",
                vec![RawField::text("if", "eth0"), RawField::text("if", "eth1")],
            ),
            RawField::container("content", vec![RawField::uint("x", 1)]),
        ],
    );

    let mut warnings = Vec::new();
    let pivoted = Pivot::default().pivot_row(&row, &mut warnings).unwrap();
    assert_eq!(pivoted.keys.to_json(), json!({"if": ["eth0", "eth1"]}));
    assert!(warnings.is_empty());
}

#[test]
fn test_pivot_is_identity_on_flat_rows() {
    let leaves = vec![
        RawField::text("state", "up"),
        RawField::uint("mtu", 1500),
        RawField::uint("speed", 1000),
    ];
    let row = RawField::container(
        "",
        vec![
            RawField::container("keys", vec![RawField::text("name", "eth0")]),
            RawField::container("content", leaves),
        ],
    );

    let mut warnings = Vec::new();
    let pivoted = Pivot::default().pivot_row(&row, &mut warnings).unwrap();
    assert_eq!(
        pivoted.content.to_json(),
        json!({"state": "up", "mtu": 1500, "speed": 1000})
    );
}

#[test]
fn test_malformed_row_does_not_stop_the_message() {
    let msg = message(json!({
        "encoding_path": "p",
        "data_gpbkv": [
            {"fields": [{"name": "content", "fields": [{"name": "x", "uint64_value": "7"}]}]},
            {"fields": [
                {"name": "keys", "fields": []},
                {"name": "content", "fields": [{"name": "x", "uint64_value": "8"}]}
            ]}
        ]
    }));

    let state = Pivot::new(PivotOptions::default()).pivot_message(&msg);
    assert_eq!(state.states.len(), 2);
    assert!(matches!(
        state.states[0].failure().map(|failure| &failure.error),
        Some(TransformError::MalformedRecord { .. })
    ));
    assert!(state.states[0].error_metric().is_none());
    let good: Vec<_> = state.metrics().collect();
    assert_eq!(good.len(), 1);
    assert_eq!(good[0].content().to_json(), json!({"x": 8}));
}

// =============================================================================
// Splitting and flattening
// =============================================================================

#[test]
fn test_extra_keys_split_reroots_record() {
    let extra_keys = step("extra_keys", json!({"path_list": ["P/a/b"]}));
    let output = extra_keys
        .transform(&record("P", json!({"a": {"b": 1, "c": 2}})))
        .unwrap();

    assert_eq!(output.metrics.len(), 1);
    let metric = &output.metrics[0];
    assert_eq!(metric.path(), "P/a");
    assert_eq!(metric.keys().to_json(), json!({"b": 1}));
    assert_eq!(metric.content().to_json(), json!({"c": 2}));
}

#[test]
fn test_list_split_yields_one_record_per_element() {
    let split = step("split_lists", json!({"path_list": ["P/a"]}));
    let output = split
        .transform(&record("P", json!({"a": [{"x": 1}, {"x": 2}]})))
        .unwrap();

    let contents: Vec<Value> = output
        .metrics
        .iter()
        .map(|metric| metric.content().to_json())
        .collect();
    assert_eq!(contents, vec![json!({"x": 1}), json!({"x": 2})]);
    assert!(output.metrics.iter().all(|metric| metric.path() == "P/a"));
}

#[rstest]
#[case::nothing_matched(json!({"z": {"y": 1}}), 1)]
#[case::all_absorbed(json!({"a": [{"x": 1}, {"x": 2}, {"x": 3}]}), 3)]
#[case::leftover_content(json!({"a": [{"x": 1}], "keep": 5}), 2)]
fn test_split_conserves_content(#[case] content: Value, #[case] expected: usize) {
    let split = step("split_lists", json!({"path_list": ["P/a"]}));
    let output = split.transform(&record("P", content)).unwrap();
    assert_eq!(output.metrics.len(), expected);
    assert!(output.metrics.iter().all(|metric| !metric.content().is_empty()));
}

#[test]
fn test_flatten_collision_gets_suffix() {
    let flatten = step("flatten_hierarchies", json!({"path_list": ["P/a"]}));
    let output = flatten
        .transform(&record("P", json!({"a": {"x": 1}, "x": 2})))
        .unwrap();

    assert_eq!(output.metrics.len(), 1);
    let content = output.metrics[0].content().to_json();
    assert_eq!(content, json!({"x_0": 1, "x": 2}));
    assert_eq!(output.warnings.len(), 1);
    assert_eq!(
        output.warnings[0].kind,
        DiagnosticKind::ExistingNameInFlattening
    );
}

// =============================================================================
// Outcome propagation
// =============================================================================

#[test]
fn test_failed_record_is_isolated_and_keeps_warnings() {
    let steps = vec![
        step("dummy", json!({})),
        step("convert_to_int", json!({"leaf_names": ["v"]})),
    ];
    let state = TransformationState {
        states: vec![
            MetricState::new(record("p", json!({"v": "12"}))),
            MetricState::new(record("p", json!({"v": "abc"}))),
            MetricState::new(record("p", json!({"v": "3"}))),
        ],
        warnings: Vec::new(),
    };

    let state = state.pipeline(&steps).unwrap();
    let good: Vec<Value> = state
        .metrics()
        .map(|metric| metric.content().to_json())
        .collect();
    assert_eq!(good, vec![json!({"v": 12}), json!({"v": 3})]);

    let errors: Vec<_> = state.errors().collect();
    assert_eq!(errors.len(), 1);
    let failed = errors[0];
    assert_eq!(failed.failure().unwrap().step, "convert_to_int");
    assert!(matches!(
        failed.failure().unwrap().error,
        TransformError::NotConvertible { .. }
    ));
    assert_eq!(
        failed.error_metric().unwrap().content().to_json(),
        json!({"v": "abc"})
    );
    assert_eq!(failed.warnings().len(), 1);
    assert_eq!(failed.warnings()[0].kind, DiagnosticKind::Dummy);
}

// =============================================================================
// Registry
// =============================================================================

#[test]
fn test_nested_document_round_trips() {
    let registry = default_registry().unwrap();
    let doc: TransformationDoc = serde_yaml::from_str(
        r#"
kind: transformation_per_path
config:
  transformation_per_path:
    "model:interfaces/interface":
      kind: pipeline
      config:
        transformations:
          - kind: extra_keys
            config:
              path_list: ["model:interfaces/interface/name"]
          - kind: combine_content
            config:
              transformations:
                - kind: flatten_hierarchies
                  config: {keep_naming: true}
                - kind: value_mapper
                  config:
                    leaf_names: [state]
                    mapper: {up: 1, down: 0}
  default:
    kind: equal
"#,
    )
    .unwrap();

    let first = registry.dump(registry.load(&doc).unwrap().as_ref()).unwrap();
    let second = registry.dump(registry.load(&first).unwrap().as_ref()).unwrap();
    assert_eq!(first, second);
}

// =============================================================================
// Projects on disk
// =============================================================================

fn setup_project(transformations: &str) -> TempDir {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join(PROJECT_FILE),
        format!(
            "name: integration\ninput:\n  type: file\n  path: data/in.jsonl\noutput:\n  type: file\n  path: data/out.jsonl\ntransformations:\n{transformations}"
        ),
    )
    .unwrap();
    dir
}

#[test]
fn test_project_pipeline_runs_on_pivoted_message() {
    let dir = setup_project(
        r#"  - kind: split_lists
    config:
      path_list: ["model:queues/queue"]
  - kind: flatten_headers
"#,
    );
    let config = Config::load(dir.path()).unwrap();
    let pipeline = config.build_pipeline(default_registry().unwrap()).unwrap();
    assert_eq!(pipeline.len(), 2);

    let msg = message(json!({
        "node_id_str": "r1",
        "encoding_path": "model:queues",
        "msg_timestamp": 100,
        "data_gpbkv": [{
            "fields": [
                {"name": "keys", "fields": [{"name": "policy", "string_value": "gold"}]},
                {"name": "content", "fields": [
                    {"name": "queue", "fields": [{"name": "drops", "uint64_value": "1"}]},
                    {"name": "queue", "fields": [{"name": "drops", "uint64_value": "2"}]}
                ]}
            ]
        }]
    }));
    let pivot = Pivot::new(config.project.pivot.clone());
    let state = pipeline.run(pivot.pivot_message(&msg)).unwrap();

    let rows: Vec<Value> = state
        .metrics()
        .map(|metric| metric.content().to_json())
        .collect();
    assert_eq!(rows.len(), 2);
    for (row, drops) in rows.iter().zip([1, 2]) {
        assert_eq!(row["policy"], "gold");
        assert_eq!(row["drops"], drops);
        assert_eq!(row["node_id"], "r1");
        assert_eq!(row["msg_timestamp"], 100);
    }
}

#[test]
fn test_project_with_unknown_step_fails_to_build() {
    let dir = setup_project("  - kind: no_such_step\n");
    let config = Config::load(dir.path()).unwrap();
    assert!(matches!(
        config.build_pipeline(default_registry().unwrap()),
        Err(telepivot_core::Error::UnknownTransformationKind { .. })
    ));
}
