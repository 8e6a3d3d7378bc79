//! Integration tests for orderflow
//!
//! These tests drive the binary end to end against a temporary database.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Helper to create an orderflow Command rooted in `dir`
fn orderflow(dir: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("orderflow");
    cmd.current_dir(dir.path())
        .arg("--project-dir")
        .arg(dir.path())
        .env_remove("RUST_LOG")
        .env_remove("ORDERFLOW_DB_PATH")
        .env_remove("ORDERFLOW_LOG_FORMAT")
        .env_remove("ORDERFLOW_BATCH_SIZE");
    cmd
}

/// Helper to create a temporary project directory
fn create_temp_project() -> TempDir {
    TempDir::new().unwrap()
}

/// Create an order and return its id.
fn create_order(dir: &TempDir, tier: &str) -> i64 {
    let output = orderflow(dir)
        .args(["--json", "order", "create", "--tier", tier])
        .output()
        .unwrap();
    assert!(output.status.success());
    let order: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    order["id"].as_i64().unwrap()
}

fn transition(dir: &TempDir, id: i64, status: &str) {
    orderflow(dir)
        .args(["order", "transition", &id.to_string(), status])
        .assert()
        .success();
}

fn show_order(dir: &TempDir, id: i64) -> serde_json::Value {
    let output = orderflow(dir)
        .args(["--json", "order", "show", &id.to_string()])
        .output()
        .unwrap();
    assert!(output.status.success());
    serde_json::from_slice(&output.stdout).unwrap()
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_help() {
        cargo_bin_cmd!("orderflow").arg("--help").assert().success();
    }

    #[test]
    fn test_version() {
        cargo_bin_cmd!("orderflow")
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("orderflow"));
    }

    #[test]
    fn test_init_creates_config_and_database() {
        let dir = create_temp_project();

        orderflow(&dir)
            .arg("init")
            .assert()
            .success()
            .stdout(predicate::str::contains("Database ready"));

        assert!(dir.path().join(".orderflow/orderflow.toml").exists());
        assert!(dir.path().join(".orderflow/orderflow.db").exists());
    }

    #[test]
    fn test_init_idempotent() {
        let dir = create_temp_project();

        orderflow(&dir).arg("init").assert().success();
        orderflow(&dir)
            .arg("init")
            .assert()
            .success()
            .stdout(predicate::str::contains("Config already exists"));
    }
}

// =============================================================================
// Order Lifecycle Tests
// =============================================================================

mod orders {
    use super::*;

    #[test]
    fn test_create_and_show() {
        let dir = create_temp_project();
        let id = create_order(&dir, "B");

        let view = show_order(&dir, id);
        assert_eq!(view["order"]["status"], "SUBMITTED");
        assert_eq!(view["order"]["tier"], "B");
        assert_eq!(view["pending_blocking_checkpoints"], 0);
    }

    #[test]
    fn test_unknown_tier_rejected_at_intake() {
        let dir = create_temp_project();

        orderflow(&dir)
            .args(["order", "create", "--tier", "Z"])
            .assert()
            .failure();
    }

    #[test]
    fn test_legal_transition() {
        let dir = create_temp_project();
        let id = create_order(&dir, "A");

        orderflow(&dir)
            .args(["order", "transition", &id.to_string(), "PROCESSING"])
            .assert()
            .success()
            .stdout(predicate::str::contains("SUBMITTED → PROCESSING"));

        let view = show_order(&dir, id);
        assert_eq!(view["order"]["status"], "PROCESSING");
        assert_eq!(view["order"]["status_version"], 1);
    }

    #[test]
    fn test_illegal_transition_fails_and_leaves_status() {
        let dir = create_temp_project();
        let id = create_order(&dir, "A");

        orderflow(&dir)
            .args(["order", "transition", &id.to_string(), "COMPLETED"])
            .assert()
            .failure();

        let view = show_order(&dir, id);
        assert_eq!(view["order"]["status"], "SUBMITTED");
    }

    #[test]
    fn test_unknown_status_fails() {
        let dir = create_temp_project();
        let id = create_order(&dir, "A");

        orderflow(&dir)
            .args(["order", "transition", &id.to_string(), "SHIPPED"])
            .assert()
            .failure();
    }

    #[test]
    fn test_refund_moves_to_refunded_and_releases_lock() {
        let dir = create_temp_project();
        let id = create_order(&dir, "C");
        transition(&dir, id, "PROCESSING");

        orderflow(&dir)
            .args(["order", "refund", &id.to_string()])
            .assert()
            .success()
            .stdout(predicate::str::contains("refunded"));

        let view = show_order(&dir, id);
        assert_eq!(view["order"]["status"], "REFUNDED");
        assert_eq!(view["order"]["refund_in_progress"], false);
    }

    #[test]
    fn test_terminal_status_cannot_move() {
        let dir = create_temp_project();
        let id = create_order(&dir, "A");
        transition(&dir, id, "CANCELLED");

        orderflow(&dir)
            .args(["order", "transition", &id.to_string(), "PROCESSING"])
            .assert()
            .failure();
    }

    #[test]
    fn test_show_missing_order_fails() {
        let dir = create_temp_project();

        orderflow(&dir)
            .args(["order", "show", "999"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("not found"));
    }

    #[test]
    fn test_sweep_locks_with_nothing_stale() {
        let dir = create_temp_project();
        create_order(&dir, "A");

        orderflow(&dir)
            .arg("sweep-locks")
            .assert()
            .success()
            .stdout(predicate::str::contains("No stale refund locks"));
    }
}

// =============================================================================
// Protocol and Checkpoint Tests
// =============================================================================

mod protocols {
    use super::*;

    #[test]
    fn test_citation_failures_open_hold_then_approve_resumes() {
        let dir = create_temp_project();
        let id = create_order(&dir, "A");
        transition(&dir, id, "PROCESSING");

        orderflow(&dir)
            .args([
                "protocol",
                "citations",
                &id.to_string(),
                "--phase",
                "PHASE_V.1",
                "--failed",
                "c1,c2,c3",
            ])
            .assert()
            .success()
            .stdout(predicate::str::contains("HOLD"));

        let view = show_order(&dir, id);
        assert_eq!(view["order"]["status"], "ON_HOLD");
        assert_eq!(view["pending_blocking_checkpoints"], 1);

        let output = orderflow(&dir)
            .args(["--json", "checkpoint", "list", &id.to_string()])
            .output()
            .unwrap();
        let checkpoints: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        let checkpoint = &checkpoints[0];
        assert_eq!(checkpoint["hold_reason"], "citation_critical_failure");
        let checkpoint_id = checkpoint["id"].as_i64().unwrap();

        orderflow(&dir)
            .args(["checkpoint", "respond", &checkpoint_id.to_string(), "approve"])
            .assert()
            .success()
            .stdout(predicate::str::contains("resuming at PHASE_V.1"));

        let view = show_order(&dir, id);
        assert_eq!(view["order"]["status"], "PROCESSING");
        assert_eq!(view["order"]["resume_phase"], "PHASE_V.1");

        orderflow(&dir)
            .args(["order", "show", &id.to_string()])
            .assert()
            .success()
            .stdout(predicate::str::contains("PHASE_V.1 (Citation verification)"));
        assert_eq!(view["pending_blocking_checkpoints"], 0);

        // A resolved checkpoint cannot be answered twice.
        orderflow(&dir)
            .args(["checkpoint", "respond", &checkpoint_id.to_string(), "approve"])
            .assert()
            .failure();
    }

    #[test]
    fn test_replayed_dispatch_does_not_duplicate_results() {
        let dir = create_temp_project();
        let id = create_order(&dir, "B");

        for _ in 0..2 {
            orderflow(&dir)
                .args([
                    "protocol",
                    "citations",
                    &id.to_string(),
                    "--phase",
                    "PHASE_III",
                    "--passed",
                    "c1,c2",
                ])
                .assert()
                .success();
        }

        let output = orderflow(&dir)
            .args(["--json", "protocol", "results", &id.to_string()])
            .output()
            .unwrap();
        let records: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(records.as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_loop_exhaustion_attaches_disclosure() {
        let dir = create_temp_project();
        let id = create_order(&dir, "B");

        orderflow(&dir)
            .args([
                "protocol",
                "loop",
                &id.to_string(),
                "--phase",
                "PHASE_VII",
                "--loops",
                "3",
                "--grade",
                "B",
                "--draft",
                "draft-2",
            ])
            .assert()
            .success()
            .stdout(predicate::str::contains("exhausted"));

        let view = show_order(&dir, id);
        assert_eq!(view["workflow"]["max_loops_reached"], true);
        assert_eq!(view["workflow"]["retained_draft_id"], "draft-2");
        assert_eq!(view["workflow"]["disclosures"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_invalid_grade_fails() {
        let dir = create_temp_project();
        let id = create_order(&dir, "B");

        orderflow(&dir)
            .args([
                "protocol",
                "loop",
                &id.to_string(),
                "--phase",
                "PHASE_VII",
                "--loops",
                "1",
                "--grade",
                "Q",
            ])
            .assert()
            .failure();
    }

    #[test]
    fn test_cost_cap_escalates_and_alerts() {
        let dir = create_temp_project();
        let id = create_order(&dir, "A");
        transition(&dir, id, "PROCESSING");

        orderflow(&dir)
            .args([
                "protocol",
                "cost",
                &id.to_string(),
                "--phase",
                "PHASE_IV",
                "--cents",
                "600",
            ])
            .assert()
            .success()
            .stdout(predicate::str::contains("ESCALATED"));

        orderflow(&dir)
            .arg("alerts")
            .assert()
            .success()
            .stdout(predicate::str::contains("protocol_escalation"));
    }
}

mod checkpoints {
    use super::*;

    #[test]
    fn test_notification_can_be_dismissed() {
        let dir = create_temp_project();
        let id = create_order(&dir, "A");

        let output = orderflow(&dir)
            .args([
                "--json",
                "checkpoint",
                "open",
                &id.to_string(),
                "--phase",
                "PHASE_II",
                "--kind",
                "notification",
                "--message",
                "intake reviewed",
            ])
            .output()
            .unwrap();
        assert!(output.status.success());
        let checkpoint: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        let checkpoint_id = checkpoint["id"].as_i64().unwrap().to_string();

        orderflow(&dir)
            .args(["checkpoint", "respond", &checkpoint_id, "dismiss"])
            .assert()
            .success()
            .stdout(predicate::str::contains("dismissed"));
    }

    #[test]
    fn test_unknown_action_fails() {
        let dir = create_temp_project();
        let id = create_order(&dir, "A");

        orderflow(&dir)
            .args([
                "checkpoint",
                "open",
                &id.to_string(),
                "--phase",
                "PHASE_II",
            ])
            .assert()
            .success();

        orderflow(&dir)
            .args(["checkpoint", "respond", "1", "shrug"])
            .assert()
            .failure();
    }

    #[test]
    fn test_resume_phase_for_evidence_gap() {
        let dir = create_temp_project();

        orderflow(&dir)
            .args(["resume-phase", "evidence_gap"])
            .assert()
            .success()
            .stdout(predicate::str::contains("PHASE_III"));
    }

    #[test]
    fn test_resume_phase_uses_current_phase() {
        let dir = create_temp_project();

        orderflow(&dir)
            .args([
                "resume-phase",
                "citation_critical_failure",
                "--current",
                "PHASE_VII",
            ])
            .assert()
            .success()
            .stdout(predicate::str::contains("PHASE_VII"));
    }

    #[test]
    fn test_resume_phase_falls_back_to_configured_default() {
        let dir = create_temp_project();
        fs::create_dir_all(dir.path().join(".orderflow")).unwrap();
        fs::write(
            dir.path().join(".orderflow/orderflow.toml"),
            "[checkpoints]\ndefault_resume_phase = \"PHASE_II\"\n",
        )
        .unwrap();

        orderflow(&dir)
            .args(["resume-phase", "cost_cap_exceeded"])
            .assert()
            .success()
            .stdout(predicate::str::contains("PHASE_II"))
            .stderr(predicate::str::contains("using default"));
    }

    #[test]
    fn test_resume_phase_unknown_reason_fails() {
        let dir = create_temp_project();

        orderflow(&dir)
            .args(["resume-phase", "bad_weather"])
            .assert()
            .failure();
    }
}

// =============================================================================
// Configuration Tests
// =============================================================================

mod config {
    use super::*;

    #[test]
    fn test_config_show_defaults() {
        let dir = create_temp_project();

        orderflow(&dir)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No orderflow.toml found"))
            .stdout(predicate::str::contains("batch_size = 50"));
    }

    #[test]
    fn test_config_init_then_show() {
        let dir = create_temp_project();

        orderflow(&dir)
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Created orderflow.toml"));

        orderflow(&dir)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Config file:"));

        orderflow(&dir)
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("already exists"));
    }

    #[test]
    fn test_config_validate_reports_warnings() {
        let dir = create_temp_project();
        fs::create_dir_all(dir.path().join(".orderflow")).unwrap();
        fs::write(
            dir.path().join(".orderflow/orderflow.toml"),
            "[protocols]\nbatch_size = 0\n",
        )
        .unwrap();

        orderflow(&dir)
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("protocols.batch_size is 0"));
    }

    #[test]
    fn test_db_flag_overrides_config() {
        let dir = create_temp_project();
        let db = dir.path().join("elsewhere.db");

        orderflow(&dir)
            .arg("--db")
            .arg(&db)
            .args(["order", "create", "--tier", "A"])
            .assert()
            .success();

        assert!(db.exists());
    }

    #[test]
    fn test_malformed_config_fails() {
        let dir = create_temp_project();
        fs::create_dir_all(dir.path().join(".orderflow")).unwrap();
        fs::write(dir.path().join(".orderflow/orderflow.toml"), "[store\n").unwrap();

        orderflow(&dir).args(["config", "show"]).assert().failure();
    }
}
