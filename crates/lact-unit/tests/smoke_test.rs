use std::process::Command;

// Drive the whole binary against the built-in simulator for a short run
// and check the artifacts it leaves behind.
#[test]
fn simulated_run_produces_audit_trail() {
    let dir = tempfile::tempdir().unwrap();
    let audit_path = dir.path().join("audit.jsonl");

    let status = Command::new(env!("CARGO_BIN_EXE_lact-unit"))
        .args([
            "--start",
            "--run-seconds",
            "3",
            "--no-noise",
            "--audit-log",
            audit_path.to_str().unwrap(),
        ])
        .status()
        .expect("failed to launch lact-unit");
    assert!(status.success());

    let content = std::fs::read_to_string(&audit_path).unwrap();
    let lines: Vec<&str> = content.trim().split('\n').collect();
    assert!(lines.len() >= 2, "expected start/shutdown events at least");

    let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(first["event"], "system_start");
    let last: serde_json::Value = serde_json::from_str(lines[lines.len() - 1]).unwrap();
    assert_eq!(last["event"], "system_shutdown");

    // A start command against an aligned simulator reaches Startup, so a
    // state change lands in the journal.
    assert!(content.contains("state_change"));
}

#[test]
fn bad_setpoints_file_aborts_startup() {
    let dir = tempfile::tempdir().unwrap();
    let sp_path = dir.path().join("setpoints.json");
    std::fs::write(&sp_path, r#"{ "meter_factor": 3.5 }"#).unwrap();

    let status = Command::new(env!("CARGO_BIN_EXE_lact-unit"))
        .args(["--run-seconds", "1", "--setpoints", sp_path.to_str().unwrap()])
        .status()
        .expect("failed to launch lact-unit");
    assert!(!status.success());
}
