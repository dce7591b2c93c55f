//! CLI smoke tests: the `hfw` binary against throwaway hotfolder trees.

mod common;

use std::fs;
use std::path::Path;

use serde_json::Value;

use common::{run_cli_case, run_cli_case_with_env, write_with_mtime};

fn json_line(stdout: &str) -> Value {
    let line = stdout.lines().find(|l| l.trim_start().starts_with('{')).unwrap_or("");
    serde_json::from_str(line).unwrap_or(Value::Null)
}

fn write_config(dir: &Path, root: &Path) -> std::path::PathBuf {
    let path = dir.join("config.toml");
    let body = format!(
        r#"[hotfolders]
roots = ["{root}"]

[defaults]
resting_time_secs = 0
update_mtime = false

[paths]
activity_log = "{log}"
heartbeat_file = "{hb}"
"#,
        root = root.display(),
        log = dir.join("activity.jsonl").display(),
        hb = dir.join("heartbeat.json").display(),
    );
    fs::write(&path, body).expect("write config");
    path
}

#[test]
fn help_command_prints_usage() {
    let result = run_cli_case("help_command_prints_usage", &["--help"]);
    assert!(result.status.success(), "expected success; log: {}", result.log_path.display());
    assert!(
        result.stdout.contains("Usage: hfw [OPTIONS] <COMMAND>"),
        "missing help banner; log: {}",
        result.log_path.display()
    );
}

#[test]
fn version_flag_prints_version() {
    let result = run_cli_case("version_flag_prints_version", &["--version"]);
    assert!(result.status.success(), "log: {}", result.log_path.display());
    assert!(result.stdout.contains(env!("CARGO_PKG_VERSION")), "log: {}", result.log_path.display());
}

#[test]
fn subcommand_help_flags_work() {
    for subcmd in ["run", "once", "state", "config", "completions"] {
        let result = run_cli_case(&format!("subcommand_{subcmd}_help"), &[subcmd, "--help"]);
        assert!(
            result.status.success() && result.stdout.contains("Usage"),
            "subcommand '{subcmd} --help' failed; log: {}",
            result.log_path.display()
        );
    }
}

#[test]
fn config_path_reports_explicit_path() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("absent.toml");
    let path_str = path.to_string_lossy().to_string();
    let result = run_cli_case(
        "config_path_json",
        &["--json", "--config", path_str.as_str(), "config", "path"],
    );
    assert!(result.status.success(), "log: {}", result.log_path.display());
    let payload = json_line(&result.stdout);
    assert_eq!(payload["path"], path_str.as_str());
    assert_eq!(payload["exists"], false);
}

#[test]
fn config_validate_rejects_bad_values() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("config.toml");
    fs::write(&path, "[defaults]\nscan_interval_secs = 0\n").expect("write config");
    let path_str = path.to_string_lossy().to_string();
    let result = run_cli_case(
        "config_validate_bad",
        &["--json", "--config", path_str.as_str(), "config", "validate"],
    );
    assert_eq!(result.status.code(), Some(1), "log: {}", result.log_path.display());
    let payload = json_line(&result.stdout);
    assert_eq!(payload["valid"], false);
}

#[test]
fn env_roots_satisfy_once_without_config_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = dir.path().join("IN");
    write_with_mtime(&root.join("client").join("a.txt"), b"a", 1_000);
    let missing_config = dir.path().join("none.toml").to_string_lossy().to_string();
    let log = dir.path().join("activity.jsonl").to_string_lossy().to_string();
    let root_str = root.to_string_lossy().to_string();

    // An explicit but missing config file is an error; the env-only path uses HOME.
    let explicit = run_cli_case_with_env(
        "once_missing_explicit_config",
        &["--json", "--config", missing_config.as_str(), "once"],
        &[("HFW_HOTFOLDERS", root_str.as_str())],
    );
    assert_eq!(explicit.status.code(), Some(1), "log: {}", explicit.log_path.display());

    let home = dir.path().join("home");
    fs::create_dir_all(&home).expect("home");
    let home_str = home.to_string_lossy().to_string();
    let result = run_cli_case_with_env(
        "once_env_roots",
        &["--json", "once"],
        &[
            ("HOME", home_str.as_str()),
            ("HFW_HOTFOLDERS", root_str.as_str()),
            ("HFW_RESTING_TIME_SECS", "0"),
            ("HFW_ACTIVITY_LOG", log.as_str()),
        ],
    );
    assert!(result.status.success(), "log: {}", result.log_path.display());
    assert!(dir.path().join("OUT").join("client").join("a.txt").is_file());
}

#[test]
fn once_transfers_and_state_reports_records() {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = dir.path().join("IN");
    let folder = root.join("client");
    write_with_mtime(&folder.join("job").join("page.pdf"), b"pdf", 1_000);
    write_with_mtime(&folder.join(".DS_Store"), b"ds", 1_000);
    let config = write_config(dir.path(), &root);
    let config_str = config.to_string_lossy().to_string();

    let once = run_cli_case("once_json", &["--json", "--config", config_str.as_str(), "once"]);
    assert!(once.status.success(), "log: {}", once.log_path.display());
    let payload = json_line(&once.stdout);
    assert_eq!(payload["command"], "once");
    assert_eq!(payload["folders"][0]["status"], "completed");
    assert_eq!(payload["folders"][0]["transferred"][0], "job");
    assert!(dir.path().join("OUT").join("client").join("job").join("page.pdf").is_file());
    assert!(!dir.path().join("OUT").join("client").join(".DS_Store").exists());

    let activity = fs::read_to_string(dir.path().join("activity.jsonl")).expect("activity log");
    assert!(activity.contains("job_transferred"), "activity log:\n{activity}");

    let folder_str = folder.to_string_lossy().to_string();
    let state = run_cli_case(
        "state_json",
        &["--json", "--config", config_str.as_str(), "state", folder_str.as_str()],
    );
    assert!(state.status.success(), "log: {}", state.log_path.display());
    let payload = json_line(&state.stdout);
    let processed = payload["processed"].as_array().cloned().unwrap_or_default();
    assert_eq!(processed.len(), 1);
    assert_eq!(processed[0]["item_id"], "job");
}

#[test]
fn state_without_database_is_user_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let dir_str = dir.path().to_string_lossy().to_string();
    let result = run_cli_case("state_missing_db", &["state", dir_str.as_str()]);
    assert_eq!(result.status.code(), Some(1), "log: {}", result.log_path.display());
    assert!(result.stderr.contains("no state database"));
}

#[test]
fn config_example_reflects_folder_override() {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = dir.path().join("IN");
    let folder = root.join("client");
    fs::create_dir_all(folder.join(".config")).expect("config dir");
    fs::write(
        folder.join(".config").join("config.toml"),
        "[retention]\nkeep_copy = true\n",
    )
    .expect("override");
    let config = write_config(dir.path(), &root).to_string_lossy().to_string();
    let folder_str = folder.to_string_lossy().to_string();

    let result = run_cli_case(
        "config_example_folder",
        &["--json", "--config", config.as_str(), "config", "example", folder_str.as_str()],
    );
    assert!(result.status.success(), "log: {}", result.log_path.display());
    let payload = json_line(&result.stdout);
    assert_eq!(payload["overrides"]["retention"]["keep_copy"], true);
}

#[test]
fn completions_emit_script() {
    let result = run_cli_case("completions_bash", &["completions", "bash"]);
    assert!(result.status.success(), "log: {}", result.log_path.display());
    assert!(result.stdout.contains("hfw"));
}
