#![allow(dead_code)]

use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Output, Stdio};
use tempfile::TempDir;

/// 2099-01-01T09:00:00Z
pub const FAR_FUTURE: &str = "2099-01-01T09:00:00Z";
pub const FAR_FUTURE_MS: i64 = 4_070_941_200_000;
/// 2099-02-01T09:00:00Z
pub const LATER_FUTURE: &str = "2099-02-01T09:00:00Z";
pub const LATER_FUTURE_MS: i64 = 4_073_619_600_000;
/// 2000-01-01T00:00:00Z
pub const LONG_AGO: &str = "2000-01-01T00:00:00Z";
pub const LONG_AGO_MS: i64 = 946_684_800_000;

/// Isolated store, spool and config files for one binary run.
pub struct Sandbox {
    dir: TempDir,
}

impl Sandbox {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("temp dir"),
        }
    }

    pub fn store_path(&self) -> PathBuf {
        self.dir.path().join("tasks.json")
    }

    pub fn spool_path(&self) -> PathBuf {
        self.dir.path().join("pending.json")
    }

    pub fn config_path(&self) -> PathBuf {
        self.dir.path().join("config.json")
    }

    fn command(&self) -> Command {
        let mut command = Command::new(env!("CARGO_BIN_EXE_reminder"));
        command
            .env("REMINDER_STORE_PATH", self.store_path())
            .env("REMINDER_SPOOL_PATH", self.spool_path())
            .env("REMINDER_CONFIG_PATH", self.config_path())
            .env("REMINDER_DISABLE_NOTIFICATIONS", "1")
            .env_remove("REMINDER_LOG");
        command
    }

    pub fn run(&self, args: &[&str]) -> Output {
        self.command()
            .args(args)
            .output()
            .expect("failed to run reminder")
    }

    pub fn run_without_store_env(&self, args: &[&str]) -> Output {
        self.command()
            .env_remove("REMINDER_STORE_PATH")
            .args(args)
            .output()
            .expect("failed to run reminder")
    }

    pub fn run_interactive(&self, script: &str) -> Output {
        let mut child = self
            .command()
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .expect("failed to spawn reminder");
        child
            .stdin
            .take()
            .expect("stdin")
            .write_all(script.as_bytes())
            .expect("write script");
        child.wait_with_output().expect("interactive output")
    }

    pub fn run_json(&self, args: &[&str]) -> serde_json::Value {
        let mut full = vec!["--json"];
        full.extend_from_slice(args);
        let output = self.run(&full);
        assert!(
            output.status.success(),
            "command {args:?} failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
        serde_json::from_slice(&output.stdout).expect("json output")
    }

    pub fn write_tasks(&self, tasks: serde_json::Value) {
        let content = serde_json::json!({
            "schema_version": 1,
            "tasks": tasks,
        });
        std::fs::write(
            self.store_path(),
            serde_json::to_string_pretty(&content).unwrap(),
        )
        .unwrap();
    }

    pub fn write_spool(&self, next_handle: u64, pending: serde_json::Value) {
        let content = serde_json::json!({
            "schema_version": 1,
            "next_handle": next_handle,
            "pending": pending,
        });
        std::fs::write(
            self.spool_path(),
            serde_json::to_string_pretty(&content).unwrap(),
        )
        .unwrap();
    }

    pub fn stored(&self) -> serde_json::Value {
        serde_json::from_str(&std::fs::read_to_string(self.store_path()).unwrap())
            .expect("stored json")
    }

    pub fn stored_task(&self, id: &str) -> serde_json::Value {
        self.stored()["tasks"]
            .as_array()
            .unwrap()
            .iter()
            .find(|task| task["id"] == id)
            .cloned()
            .unwrap_or(serde_json::Value::Null)
    }

    pub fn spooled(&self) -> Vec<serde_json::Value> {
        if !self.spool_path().exists() {
            return Vec::new();
        }
        let spool: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(self.spool_path()).unwrap())
                .expect("spool json");
        spool["pending"].as_array().cloned().unwrap_or_default()
    }
}

pub fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

pub fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}
