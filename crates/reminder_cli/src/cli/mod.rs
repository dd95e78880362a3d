use clap::{Parser, Subcommand};
use reminder_core::config::ConfigOverrides;
use std::path::PathBuf;

pub mod datetime;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Output JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Override configuration values (format KEY=VALUE)
    #[arg(long = "config-override", value_name = "KEY=VALUE", global = true)]
    pub config_override: Vec<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Add a new task, optionally with a reminder
    ///
    /// Example: reminder add "Buy milk" --at 2026-01-05T09:00:00Z
    /// Example: reminder add "Call back" --in-minutes 30
    Add {
        text: Option<String>,
        #[arg(long, value_name = "RFC3339", conflicts_with = "in_minutes")]
        at: Option<String>,
        #[arg(long = "in-minutes", value_name = "MINUTES")]
        in_minutes: Option<i64>,
    },
    /// Edit a task's text
    ///
    /// Example: reminder edit task-1 "Buy oat milk"
    Edit { id: String, text: String },
    /// Set or move a task's reminder
    ///
    /// Example: reminder remind task-1 2026-01-05T09:00:00+01:00
    Remind { id: String, datetime: String },
    /// Remove a task's reminder
    ///
    /// Example: reminder clear-reminder task-1
    ClearReminder { id: String },
    /// Mark a task as done
    ///
    /// Example: reminder done task-1
    Done { id: String },
    /// Mark a done task as open again
    ///
    /// Example: reminder undone task-1
    Undone { id: String },
    /// Delete a task
    ///
    /// Example: reminder delete task-1
    Delete { id: String },
    /// Show details of a task
    ///
    /// Example: reminder show task-1
    Show { id: String },
    /// List all tasks
    ///
    /// Example: reminder list
    List,
    /// List notifications waiting in the spool
    ///
    /// Example: reminder pending
    Pending,
    /// Deliver reminders whose time has come
    ///
    /// Example: reminder notify
    Notify,
    /// Report (or, in interactive mode, rerun) startup reconciliation
    ///
    /// Example: reminder reconcile
    Reconcile,
}

/// Flag name used to identify config override arguments by the runtime.
pub const CONFIG_OVERRIDE_FLAG: &str = "--config-override";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigOverrideTarget {
    StorePath,
    SpoolPath,
    MaxPending,
    LogFilter,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedConfigOverride {
    pub target: ConfigOverrideTarget,
    pub value: String,
}

/// Parse a raw `KEY=VALUE` override string into a structured target.
pub fn parse_config_override(raw: &str) -> Result<ParsedConfigOverride, String> {
    let trimmed = raw.trim();
    let (key_raw, value_raw) = trimmed
        .split_once('=')
        .ok_or_else(|| "override must be in KEY=VALUE format".to_string())?;

    let value = value_raw.trim().to_string();
    let field =
        canonicalize_flag_name(key_raw).ok_or_else(|| "override key cannot be empty".to_string())?;

    let target = match field.as_str() {
        "store_path" | "store" => ConfigOverrideTarget::StorePath,
        "spool_path" | "spool" => ConfigOverrideTarget::SpoolPath,
        "max_pending" => ConfigOverrideTarget::MaxPending,
        "log_filter" | "log" => ConfigOverrideTarget::LogFilter,
        other => return Err(format!("unknown config field '{other}'")),
    };

    if value.is_empty() {
        return Err(format!("override for '{field}' needs a value"));
    }

    Ok(ParsedConfigOverride { target, value })
}

/// Folds every `--config-override` into one set; later values win.
pub fn collect_config_overrides(raw: &[String]) -> Result<ConfigOverrides, String> {
    let mut overrides = ConfigOverrides::default();
    for item in raw {
        let parsed = parse_config_override(item)?;
        match parsed.target {
            ConfigOverrideTarget::StorePath => {
                overrides.store_path = Some(PathBuf::from(parsed.value))
            }
            ConfigOverrideTarget::SpoolPath => {
                overrides.spool_path = Some(PathBuf::from(parsed.value))
            }
            ConfigOverrideTarget::MaxPending => {
                let max_pending = parsed
                    .value
                    .parse::<usize>()
                    .ok()
                    .filter(|value| *value > 0)
                    .ok_or_else(|| "max_pending must be a positive integer".to_string())?;
                overrides.max_pending = Some(max_pending);
            }
            ConfigOverrideTarget::LogFilter => overrides.log_filter = Some(parsed.value),
        }
    }
    Ok(overrides)
}

fn canonicalize_flag_name(name: &str) -> Option<String> {
    let mut cleaned = String::new();
    let mut previous_underscore = false;

    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            cleaned.push(ch.to_ascii_lowercase());
            previous_underscore = false;
        } else if !previous_underscore && !cleaned.is_empty() {
            cleaned.push('_');
            previous_underscore = true;
        }
    }

    let trimmed = cleaned.trim_matches('_');
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
