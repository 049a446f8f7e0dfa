use serde_json::Value;
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

fn unique_temp_dir(prefix: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time went backwards")
        .as_nanos();
    let dir = std::env::temp_dir().join(format!(
        "motenet-rs-{prefix}-{}-{nanos}",
        std::process::id()
    ));
    fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

fn write_file(dir: &PathBuf, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).expect("write temp file");
    path
}

const TRANSFER_SCENARIO: &str = r#"
{
    "schema_version": 1,
    "name": "three-mote transfer",
    "topology": { "kind": "line", "motes": 3 },
    "commands": [
        { "at_ms": 100, "node": 3, "cmd": "test_server", "port": 41 },
        { "at_ms": 2000, "node": 1, "cmd": "test_client", "src_port": 20, "dest": 3, "dest_port": 41, "transfer": 40, "close_when_done": true },
        { "at_ms": 2500, "node": 1, "cmd": "route_dump" }
    ],
    "until_ms": 8000
}
"#;

#[test]
fn scenario_sim_writes_viz_json_with_meta_first() {
    let dir = unique_temp_dir("scenario-sim-viz");
    let scenario = write_file(&dir, "scenario.json", TRANSFER_SCENARIO);
    let out_json = dir.join("viz.json");

    let output = Command::new(env!("CARGO_BIN_EXE_scenario_sim"))
        .args([
            "--scenario",
            scenario.to_str().unwrap(),
            "--viz-json",
            out_json.to_str().unwrap(),
            "--until-ms",
            "3000",
        ])
        .output()
        .expect("run scenario_sim");
    assert!(
        output.status.success(),
        "scenario_sim failed: stderr={}",
        String::from_utf8_lossy(&output.stderr)
    );

    let raw = fs::read_to_string(&out_json).expect("read viz.json");
    let v: Value = serde_json::from_str(&raw).expect("parse viz.json");
    let arr = v.as_array().expect("viz.json must be a JSON array");
    assert!(arr.len() > 1, "viz.json should contain more than meta");
    assert_eq!(
        arr[0].get("kind").and_then(|k| k.as_str()),
        Some("meta"),
        "expected first viz event to be meta"
    );
    assert!(
        arr.iter()
            .any(|e| e.get("kind").and_then(|k| k.as_str()) == Some("tcp_state")),
        "expected tcp state transitions in viz.json"
    );

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn scenario_sim_summary_reports_routes_and_finished_transfer() {
    let dir = unique_temp_dir("scenario-sim-summary");
    let scenario = write_file(&dir, "scenario.json", TRANSFER_SCENARIO);
    let out_json = dir.join("summary.json");

    let output = Command::new(env!("CARGO_BIN_EXE_scenario_sim"))
        .args([
            "--scenario",
            scenario.to_str().unwrap(),
            "--summary-json",
            out_json.to_str().unwrap(),
        ])
        .output()
        .expect("run scenario_sim");
    assert!(
        output.status.success(),
        "scenario_sim failed: stderr={}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("done @ 8000ms"), "stdout={stdout}");

    let raw = fs::read_to_string(&out_json).expect("read summary.json");
    let v: Value = serde_json::from_str(&raw).expect("parse summary.json");
    assert_eq!(v["now_ms"], 8000);
    let motes = v["motes"].as_array().expect("motes array");
    assert_eq!(motes.len(), 3);

    let m1 = &motes[0];
    assert_eq!(m1["id"], 1);
    assert_eq!(m1["neighbors"], serde_json::json!([2]));
    let routes = m1["routes"].as_array().expect("routes array");
    assert!(
        routes
            .iter()
            .any(|r| r["dest"] == 3 && r["next_hop"] == 2 && r["cost"] == 2),
        "routes={routes:?}"
    );
    assert_eq!(m1["connections"], serde_json::json!([]));
    assert_eq!(motes[2]["connections"], serde_json::json!([]));
    assert!(motes[1]["stats"]["forwarded"].as_u64().unwrap() > 0);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn scenario_sim_rejects_unknown_schema_version() {
    let dir = unique_temp_dir("scenario-sim-schema");
    let scenario = write_file(
        &dir,
        "scenario.json",
        r#"{ "schema_version": 99, "topology": { "kind": "line", "motes": 2 } }"#,
    );

    let output = Command::new(env!("CARGO_BIN_EXE_scenario_sim"))
        .args(["--scenario", scenario.to_str().unwrap()])
        .output()
        .expect("run scenario_sim");
    assert!(!output.status.success());

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn line_transfer_delivers_all_values_in_order() {
    let output = Command::new(env!("CARGO_BIN_EXE_line_transfer"))
        .args(["--motes", "4", "--transfer", "30", "--until-ms", "15000"])
        .output()
        .expect("run line_transfer");
    assert!(
        output.status.success(),
        "line_transfer failed: stderr={}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains("received_values=30/30, in_order=true"),
        "stdout={stdout}"
    );
}
