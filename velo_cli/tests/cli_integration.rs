use assert_cmd::prelude::*;
use predicates::prelude::*;
use rstest::rstest;
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use tempfile::tempdir;

// Short periods keep the timed runs below quick.
fn write_valid_config(dir: &tempfile::TempDir) -> PathBuf {
    let toml = r#"
[node]
peer = "127.0.0.1:1"
listen = "127.0.0.1:0"

[timing]
control_period_ms = 10
reference_period_ms = 4000
connect_timeout_ms = 50
backoff_ms = 50
accept_poll_ms = 5

[controller]
kp = 300000
ki = 400000

[estimator]
counts_per_rev = 44

[reference]
initial = 2000
reset_on_connect = true
"#;
    let path = dir.path().join("cfg.toml");
    fs::write(&path, toml).unwrap();
    path
}

fn velo() -> Command {
    Command::cargo_bin("velo").unwrap()
}

#[rstest]
#[case(&["--help"], 0, "Usage:", "stdout")]
#[case(&["self-check"], 0, "self-check ok", "stdout")]
#[case(&["compute", "--run-ms", "200"], 0, "compute node stopped: sessions=0", "stdout")]
#[case(&["sensor", "--run-ms", "200"], 0, "sensor node stopped: sessions=0", "stdout")]
#[case(&["local", "--run-ms", "300"], 0, "local node stopped: steps=", "stdout")]
#[case(&["bogus"], 2, "unrecognized subcommand", "stderr")]
fn cli_table_cases(
    #[case] args: &[&str],
    #[case] exit_code: i32,
    #[case] needle: &str,
    #[case] stream: &str,
) {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);

    let mut cmd = velo();
    cmd.arg("--config").arg(&cfg).arg("--log-level").arg("error");
    for a in args {
        cmd.arg(a);
    }

    let assert = cmd.assert().code(exit_code);
    match stream {
        "stdout" => {
            assert.stdout(predicate::str::contains(needle));
        }
        "stderr" => {
            assert.stderr(predicate::str::contains(needle));
        }
        other => panic!("unknown stream: {other}"),
    }
}

#[rstest]
fn self_check_json_reports_derived_timing() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);

    let out = velo()
        .arg("--json")
        .arg("--log-level")
        .arg("error")
        .arg("--config")
        .arg(&cfg)
        .arg("self-check")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let stdout = String::from_utf8_lossy(&out);
    let line = stdout.lines().find(|l| l.contains("\"ok\"")).unwrap_or("");
    let v: serde_json::Value = serde_json::from_str(line).unwrap();
    assert_eq!(v["ok"], true);
    assert_eq!(v["settings"]["timing"]["rate_hz"], 100);
    assert_eq!(v["settings"]["timing"]["response_timeout_ms"], 20);
    assert_eq!(v["settings"]["controller"]["kp"], 300_000);
}

#[rstest]
#[case("[timing]\ncontrol_period_ms = 0\n", "control_period_ms")]
#[case("[estimator]\nalpha_num = 3\nalpha_den = 2\n", "alpha_num")]
#[case("[controller]\nkp_den = 0\n", "kp_den")]
fn invalid_config_is_rejected(#[case] toml: &str, #[case] needle: &str) {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    fs::write(&path, toml).unwrap();

    velo()
        .arg("--config")
        .arg(&path)
        .arg("self-check")
        .assert()
        .code(3)
        .stderr(predicate::str::contains("Invalid configuration"))
        .stderr(predicate::str::contains(needle));
}

#[rstest]
fn malformed_toml_is_a_config_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("broken.toml");
    fs::write(&path, "[timing\ncontrol_period_ms = ").unwrap();

    velo()
        .arg("--config")
        .arg(&path)
        .arg("self-check")
        .assert()
        .code(3)
        .stderr(predicate::str::contains("not valid TOML"));
}

#[rstest]
fn missing_explicit_config_fails() {
    let dir = tempdir().unwrap();
    velo()
        .arg("--config")
        .arg(dir.path().join("nope.toml"))
        .arg("self-check")
        .assert()
        .code(3)
        .stderr(predicate::str::contains("Could not read config file"));
}

#[rstest]
fn json_errors_go_to_stdout() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    fs::write(&path, "[timing]\ncontrol_period_ms = 0\n").unwrap();

    let out = velo()
        .arg("--json")
        .arg("--config")
        .arg(&path)
        .arg("self-check")
        .assert()
        .code(3)
        .get_output()
        .stdout
        .clone();
    let v: serde_json::Value = serde_json::from_str(String::from_utf8_lossy(&out).trim()).unwrap();
    assert_eq!(v["reason"], "config");
    assert_eq!(v["exit_code"], 3);
}

#[rstest]
fn compute_reports_bind_failure() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);
    // Hold the port so the node cannot bind it.
    let holder = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = holder.local_addr().unwrap().to_string();

    velo()
        .arg("--config")
        .arg(&cfg)
        .arg("compute")
        .arg("--listen")
        .arg(&addr)
        .arg("--run-ms")
        .arg("100")
        .assert()
        .code(3)
        .stderr(predicate::str::contains("address could not be used"));
}

#[rstest]
fn file_log_is_written() {
    let dir = tempdir().unwrap();
    let log = dir.path().join("logs").join("velo.log");
    let path = dir.path().join("cfg.toml");
    fs::write(
        &path,
        format!(
            "[node]\nlisten = \"127.0.0.1:0\"\n[logging]\nfile = {:?}\nlevel = \"info\"\n",
            log.display().to_string()
        ),
    )
    .unwrap();

    velo()
        .arg("--config")
        .arg(&path)
        .arg("compute")
        .arg("--run-ms")
        .arg("100")
        .assert()
        .success();

    let text = fs::read_to_string(&log).unwrap();
    assert!(text.contains("compute node listening"), "{text}");
}

#[rstest]
fn local_json_summary_reports_steps() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);
    let out = velo()
        .arg("--config")
        .arg(&cfg)
        .arg("--json")
        .arg("--log-level")
        .arg("error")
        .args(["local", "--run-ms", "300"])
        .output()
        .unwrap();
    assert!(out.status.success());
    let line = String::from_utf8(out.stdout).unwrap();
    let v: serde_json::Value = serde_json::from_str(line.trim()).unwrap();
    assert_eq!(v["node"], "local");
    // 10 ms period over 300 ms: allow for a slow machine.
    assert!(v["steps"].as_u64().is_some_and(|n| n >= 5), "{v}");
    assert_eq!(v["sessions"], 0);
}
