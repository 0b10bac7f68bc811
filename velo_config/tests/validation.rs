use rstest::rstest;
use std::fs;
use tempfile::tempdir;
use velo_config::{Config, load_file, load_toml};

#[rstest]
#[case("[timing]\ncontrol_period_ms = 0\n", "control_period_ms must be >= 2")]
#[case("[timing]\ncontrol_period_ms = 1\n", "control_period_ms must be >= 2")]
#[case(
    "[timing]\ncontrol_period_ms = 50\nreference_period_ms = 50\n",
    "reference_period_ms must be greater"
)]
#[case("[controller]\nkp_den = 0\n", "kp_den and controller.ki_den must be > 0")]
#[case("[controller]\nki_time_scale_ms = 0\n", "ki_time_scale_ms must be > 0")]
#[case("[controller]\nkp = -1\n", "gains must be >= 0")]
#[case("[controller]\nki = 4294967296\n", "fit in 31 bits")]
#[case("[estimator]\ncounts_per_rev = 0\n", "counts_per_rev must be >= 1")]
#[case("[estimator]\nalpha_num = 5\nalpha_den = 4\n", "alpha_num must be <=")]
#[case("[logging]\nrotation = \"weekly\"\n", "logging.rotation must be one of")]
#[case("[rt]\ncontrol_priority = 0\n", "rt.control_priority must be in 1..=99")]
#[case("[node]\npeer = \"  \"\n", "node.peer must not be empty")]
fn rejects_invalid_sections(#[case] toml: &str, #[case] needle: &str) {
    let cfg = load_toml(toml).expect("parse TOML");
    let err = cfg.validate().expect_err("config should be rejected");
    assert!(
        format!("{err}").contains(needle),
        "expected {needle:?} in {err}"
    );
}

#[test]
fn accepts_full_reference_deployment() {
    let toml = r#"
[node]
peer = "192.168.0.10:5000"
listen = "0.0.0.0:5000"

[timing]
control_period_ms = 10
reference_period_ms = 4000
connect_timeout_ms = 1000
backoff_ms = 500

[controller]
kp = 300000
ki = 400000

[estimator]
counts_per_rev = 44
alpha_num = 1
alpha_den = 4

[reference]
initial = 2000
reset_on_connect = false

[logging]
level = "debug"
rotation = "daily"
"#;

    let cfg = load_toml(toml).expect("parse TOML");
    cfg.validate().expect("valid config should pass");
    assert_eq!(cfg.estimator.alpha_den, 4);
    assert!(!cfg.reference.reset_on_connect);
}

#[test]
fn load_file_reports_path_on_parse_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("broken.toml");
    fs::write(&path, "[timing\ncontrol_period_ms = 10").unwrap();

    let err = load_file(&path).expect_err("broken TOML must fail");
    let msg = format!("{err}");
    assert!(msg.contains("parse config"), "{msg}");
    assert!(msg.contains("broken.toml"), "{msg}");
}

#[test]
fn load_file_validates() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("zero.toml");
    fs::write(&path, "[estimator]\ncounts_per_rev = 0\n").unwrap();

    let err = load_file(&path).expect_err("invalid config must fail");
    assert!(format!("{err}").contains("counts_per_rev"));
}

#[test]
fn shipped_sample_config_is_valid_and_matches_defaults() {
    let cfg = load_toml(include_str!("../../etc/velo.toml")).expect("parse sample");
    cfg.validate().expect("sample validates");
    let d = Config::default();
    assert_eq!(cfg.timing.control_period_ms, d.timing.control_period_ms);
    assert_eq!(cfg.controller.kp, d.controller.kp);
    assert_eq!(cfg.controller.ki, d.controller.ki);
    assert_eq!(cfg.estimator.counts_per_rev, d.estimator.counts_per_rev);
    assert_eq!(cfg.node.listen, d.node.listen);
}
