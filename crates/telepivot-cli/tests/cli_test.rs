use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use rstest::rstest;

fn init_project() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    cargo_bin_cmd!("telepivot")
        .args(["init", dir.path().to_str().unwrap()])
        .assert()
        .success();
    dir
}

#[test]
fn test_init_and_run() {
    let dir = init_project();

    // Verify generated files exist
    assert!(dir.path().join("telepivot.yaml").exists());
    assert!(dir.path().join("data/input.jsonl").exists());

    cargo_bin_cmd!("telepivot")
        .args(["--config", dir.path().to_str().unwrap(), "run"])
        .assert()
        .success();

    let output_path = dir.path().join("data/output.jsonl");
    assert!(output_path.exists(), "output.jsonl should exist");

    let output = std::fs::read_to_string(&output_path).unwrap();
    let lines: Vec<serde_json::Value> = output
        .lines()
        .filter(|l| !l.is_empty())
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();

    assert_eq!(lines.len(), 3);

    // router-1, eth0: counters flattened, state mapped, row timestamp wins
    assert_eq!(lines[0]["name"], "eth0");
    assert_eq!(lines[0]["state"], 1);
    assert_eq!(lines[0]["counters_in_packets"], 1024);
    assert_eq!(lines[0]["counters_out_packets"], 2048);
    assert_eq!(lines[0]["node_id"], "router-1");
    assert_eq!(lines[0]["msg_timestamp"], 1_700_000_000_100_u64);
    assert!(lines[0].get("counters").is_none());

    // router-1, eth1
    assert_eq!(lines[1]["name"], "eth1");
    assert_eq!(lines[1]["state"], 0);

    // router-2, eth0: unmapped state falls back to the default
    assert_eq!(lines[2]["node_id"], "router-2");
    assert_eq!(lines[2]["state"], -1);
    assert_eq!(lines[2]["collection_id"], 7);
}

#[test]
fn test_init_refuses_existing_project() {
    let dir = init_project();
    cargo_bin_cmd!("telepivot")
        .args(["init", dir.path().to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already contains a telepivot.yaml"));
}

#[test]
fn test_validate_scaffolded_project() {
    let dir = init_project();
    cargo_bin_cmd!("telepivot")
        .args(["--config", dir.path().to_str().unwrap(), "validate"])
        .assert()
        .success()
        .stderr(predicate::str::contains("Fingerprint"));
}

#[rstest]
#[case::yaml("yaml", "kind: flatten_hierarchies")]
#[case::json("json", "\"kind\": \"value_mapper\"")]
fn test_dump_normalized_pipeline(#[case] format: &str, #[case] expected: &str) {
    let dir = init_project();
    cargo_bin_cmd!("telepivot")
        .args([
            "--config",
            dir.path().to_str().unwrap(),
            "dump",
            "--format",
            format,
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains(expected));
}

#[test]
fn test_unknown_step_fails() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("telepivot.yaml"),
        r#"
name: broken
input:
  type: file
  path: in.jsonl
output:
  type: file
  path: out.jsonl
transformations:
  - kind: no_such_step
"#,
    )
    .unwrap();

    cargo_bin_cmd!("telepivot")
        .args(["--config", dir.path().to_str().unwrap(), "validate"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to build pipeline"));
}

#[test]
fn test_missing_config_fails() {
    let dir = tempfile::tempdir().unwrap();
    cargo_bin_cmd!("telepivot")
        .args(["--config", dir.path().to_str().unwrap(), "run"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load configuration"));
}
