//! CLI tests for the non-interactive `sr-olthad` subcommands.

use std::process::Command;

use sr_olthad::core::traversal::OlthadTraversal;
use sr_olthad::io::config::{SrOlthadConfig, load_config};
use sr_olthad::test_support::{pizza_olthad, snapshot_in_tempdir};

fn sr_olthad() -> Command {
    Command::new(env!("CARGO_BIN_EXE_sr-olthad"))
}

#[test]
fn init_writes_default_config_once() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("sr-olthad.toml");

    let status = sr_olthad()
        .args(["init", "--config"])
        .arg(&path)
        .status()
        .expect("init");
    assert!(status.success());
    assert_eq!(load_config(&path).expect("load"), SrOlthadConfig::default());

    let again = sr_olthad()
        .args(["init", "--config"])
        .arg(&path)
        .output()
        .expect("init again");
    assert!(!again.status.success());
    assert!(String::from_utf8_lossy(&again.stderr).contains("already exists"));
}

#[test]
fn show_prints_the_olthad_with_the_task_in_question_obscured() {
    let traversal =
        OlthadTraversal::from_parts(pizza_olthad(), Some("1.1".to_string())).expect("parts");
    let (_dir, path) = snapshot_in_tempdir(&traversal);

    let output = sr_olthad()
        .arg("show")
        .arg(&path)
        .args(["--in-question", "1.1"])
        .output()
        .expect("show");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("\"task\": \"Eat the third slice.\""));
    assert!(stdout.contains("(FUTURE PLANNED TASKS REDACTED)"));
    assert!(!stdout.contains("Eat the fourth slice."));
    // The root's planned subtask is outside the redacted subtree.
    assert!(stdout.contains("Drink a glass of water."));
    assert!(stdout.contains("current node: 1.1"));
}

#[test]
fn show_rejects_a_corrupted_snapshot() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("olthad.json");
    std::fs::write(&path, r#"{"root": {"id": "1"}, "cur_node_id": "1"}"#).expect("write");

    let output = sr_olthad().arg("show").arg(&path).output().expect("show");

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("schema validation failed"));
}

#[test]
fn prompts_renders_system_and_user_messages() {
    let output = sr_olthad()
        .args(["prompts", "planner", "--env-state", "A dark forest."])
        .output()
        .expect("prompts");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let system = stdout.find("=== system ===").expect("system message");
    let user = stdout.find("=== user ===").expect("user message");
    assert!(system < user);
    assert!(stdout.contains("A dark forest."));
}
