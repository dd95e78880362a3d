use clap::{CommandFactory, Parser};
use reminder_cli::cli::datetime::{format_timestamp, minutes_from, parse_datetime};
use reminder_cli::cli::{CONFIG_OVERRIDE_FLAG, Cli, Command, collect_config_overrides};
use reminder_core::ReminderApp;
use reminder_core::clock::{Clock, SystemClock};
use reminder_core::config::{self, Config};
use reminder_core::error::AppError;
use reminder_core::model::Task;
use reminder_core::notify::spool::spool_path;
use reminder_core::notify::{self, DEFAULT_MAX_PENDING, PendingNotification, SpoolScheduler};
use reminder_core::reconcile::{ReconcileReport, reconcile};
use reminder_core::storage::json_store::{JsonFileBackend, store_path};
use reminder_core::store::RecordStore;
use std::ffi::OsString;
use std::io::{self, BufRead};
use std::sync::Arc;
use tabled::{Table, Tabled};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

const LOG_ENV_VAR: &str = "REMINDER_LOG";
const DEFAULT_LOG_FILTER: &str = "warn";

struct Runtime {
    app: ReminderApp,
    spool: Arc<SpoolScheduler>,
    clock: Arc<dyn Clock>,
    startup_report: Option<ReconcileReport>,
}

impl Runtime {
    fn open(config: &Config) -> Result<Self, AppError> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let store_path = store_path(config.store_path.as_deref())?;
        debug!(path = %store_path.display(), "opening task store");
        let store = Arc::new(RecordStore::open(Box::new(JsonFileBackend::new(
            store_path,
        )))?);

        let spool_path = spool_path(config.spool_path.as_deref())?;
        debug!(path = %spool_path.display(), "opening notification spool");
        let spool = Arc::new(
            SpoolScheduler::open(spool_path, clock.clone())?
                .with_max_pending(config.max_pending.unwrap_or(DEFAULT_MAX_PENDING)),
        );

        let (app, report) = ReminderApp::start(store, spool.clone(), clock.clone())?;
        Ok(Self {
            app,
            spool,
            clock,
            startup_report: Some(report),
        })
    }

    /// Lets the synchronizer catch up, then rereads the task so output shows
    /// the handle it ended up with.
    fn settled(&self, task: Task) -> Result<Task, AppError> {
        self.app.settle();
        Ok(self.app.store().find(&task.id)?.unwrap_or(task))
    }
}

#[derive(Tabled)]
struct TaskRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Text")]
    text: String,
    #[tabled(rename = "Done")]
    done: &'static str,
    #[tabled(rename = "Reminder")]
    reminder: String,
    #[tabled(rename = "Notification")]
    notification: String,
}

impl From<&Task> for TaskRow {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id.clone(),
            text: task.text.clone(),
            done: if task.done { "yes" } else { "no" },
            reminder: reminder_label(task),
            notification: handle_label(task),
        }
    }
}

fn reminder_label(task: &Task) -> String {
    task.reminder_time
        .map(format_timestamp)
        .unwrap_or_else(|| "-".to_string())
}

fn handle_label(task: &Task) -> String {
    task.notification_handle
        .as_ref()
        .map(|handle| handle.to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn task_json(task: &Task) -> Result<serde_json::Value, AppError> {
    serde_json::to_value(task).map_err(|err| AppError::invalid_data(err.to_string()))
}

fn print_task_json(task: &Task) -> Result<(), AppError> {
    println!("{}", task_json(task)?);
    Ok(())
}

fn print_tasks_json(tasks: &[Task]) -> Result<(), AppError> {
    let payload = tasks
        .iter()
        .map(task_json)
        .collect::<Result<Vec<_>, _>>()?;
    println!("{}", serde_json::Value::Array(payload));
    Ok(())
}

fn print_tasks_table(tasks: &[Task]) {
    if tasks.is_empty() {
        println!("No tasks");
        return;
    }
    let rows: Vec<TaskRow> = tasks.iter().map(TaskRow::from).collect();
    println!("{}", Table::new(rows));
}

fn print_task_details(task: &Task) {
    println!("ID: {}", task.id);
    println!("Text: {}", task.text);
    println!("Done: {}", if task.done { "yes" } else { "no" });
    println!("Created: {}", format_timestamp(task.created_at));
    println!("Reminder: {}", reminder_label(task));
    println!("Notification: {}", handle_label(task));
}

fn pending_json(entry: &PendingNotification) -> serde_json::Value {
    serde_json::json!({
        "handle": entry.handle,
        "fireTime": entry.fire_time,
        "taskId": entry.payload.task_id,
        "text": entry.payload.text,
    })
}

fn print_pending(entries: &[PendingNotification], json: bool, empty_message: &str) {
    if json {
        let payload = entries.iter().map(pending_json).collect();
        println!("{}", serde_json::Value::Array(payload));
        return;
    }
    if entries.is_empty() {
        println!("{empty_message}");
        return;
    }
    for entry in entries {
        println!(
            "{} | {} | {} | {}",
            entry.handle,
            format_timestamp(entry.fire_time),
            entry.payload.task_id,
            entry.payload.text
        );
    }
}

fn print_report(report: &ReconcileReport, json: bool) {
    if json {
        let payload = serde_json::json!({
            "scheduled": report.scheduled,
            "cleared": report.cleared,
            "orphansCanceled": report.orphans_canceled,
            "failures": report.failures,
            "skipped": report.skipped,
        });
        println!("{payload}");
    } else if report.skipped {
        println!("Reconciliation skipped: scheduler or store unreadable");
    } else {
        println!(
            "Reconciled: {} scheduled, {} cleared, {} orphans canceled, {} failures",
            report.scheduled, report.cleared, report.orphans_canceled, report.failures
        );
    }
}

fn print_task_result(task: &Task, json: bool, verb: &str) -> Result<(), AppError> {
    if json {
        return print_task_json(task);
    }
    match task.reminder_time {
        Some(reminder) => println!(
            "{verb} task: {} ({}) reminder at {}",
            task.text,
            task.id,
            format_timestamp(reminder)
        ),
        None => println!("{verb} task: {} ({})", task.text, task.id),
    }
    Ok(())
}

fn normalize_parse_error(err: clap::Error) -> AppError {
    let rendered = err.to_string();
    let first_line = rendered.lines().next().unwrap_or("invalid command").trim();
    let message = first_line
        .strip_prefix("error: ")
        .unwrap_or(first_line)
        .to_string();
    AppError::invalid_input(message)
}

fn split_command_line(line: &str) -> Result<Vec<String>, AppError> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut escape = false;

    for ch in line.chars() {
        if escape {
            if ch != '"' && ch != '\\' {
                current.push('\\');
            }
            current.push(ch);
            escape = false;
            continue;
        }

        if in_quotes && ch == '\\' {
            escape = true;
            continue;
        }

        if ch == '"' {
            in_quotes = !in_quotes;
            continue;
        }

        if ch.is_whitespace() && !in_quotes {
            if !current.is_empty() {
                args.push(std::mem::take(&mut current));
            }
            continue;
        }

        current.push(ch);
    }

    if in_quotes {
        return Err(AppError::invalid_input("unterminated quote in command"));
    }

    if !current.is_empty() {
        args.push(current);
    }

    Ok(args)
}

fn print_help() {
    let mut cmd = Cli::command();
    let help = cmd.render_help();
    println!("{help}");
}

fn init_tracing(config: &Config) {
    let configured = config.log_filter.as_deref().unwrap_or(DEFAULT_LOG_FILTER);
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR)
        .or_else(|_| EnvFilter::try_new(configured))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

/// Loads the config file, applies CLI overrides and installs logging. An
/// unreadable config file is reported and replaced by defaults.
fn prepare(overrides: &[String]) -> Result<Config, AppError> {
    let loaded = config::load_config_with_fallback();
    let overrides = collect_config_overrides(overrides).map_err(AppError::invalid_input)?;
    let config = config::merge_overrides(&loaded.config, &overrides);

    init_tracing(&config);
    if let Some(err) = loaded.error {
        warn!(%err, "config file ignored, using defaults");
    }
    Ok(config)
}

fn run_command(runtime: &mut Runtime, cli: Cli) -> Result<(), AppError> {
    let json = cli.json;
    match cli.command {
        Command::Add {
            text,
            at,
            in_minutes,
        } => {
            let text = match text {
                Some(value) if !value.trim().is_empty() => value,
                _ => return Err(AppError::invalid_input("text is required")),
            };
            let reminder = match (at, in_minutes) {
                (Some(raw), _) => Some(parse_datetime(&raw)?),
                (None, Some(minutes)) => Some(minutes_from(runtime.clock.now_ms(), minutes)?),
                (None, None) => None,
            };

            let task = runtime.app.add_task(&text, reminder)?;
            let task = runtime.settled(task)?;
            print_task_result(&task, json, "Added")?;
        }
        Command::Edit { id, text } => {
            let task = runtime.app.edit_task(&id, &text)?;
            let task = runtime.settled(task)?;
            print_task_result(&task, json, "Updated")?;
        }
        Command::Remind { id, datetime } => {
            let reminder = parse_datetime(&datetime)?;
            let task = runtime.app.set_reminder(&id, Some(reminder))?;
            let task = runtime.settled(task)?;
            print_task_result(&task, json, "Reminder set for")?;
        }
        Command::ClearReminder { id } => {
            let task = runtime.app.set_reminder(&id, None)?;
            let task = runtime.settled(task)?;
            print_task_result(&task, json, "Reminder cleared for")?;
        }
        Command::Done { id } => {
            let task = runtime.app.complete_task(&id)?;
            let task = runtime.settled(task)?;
            print_task_result(&task, json, "Completed")?;
        }
        Command::Undone { id } => {
            let task = runtime.app.reopen_task(&id)?;
            let task = runtime.settled(task)?;
            print_task_result(&task, json, "Reopened")?;
        }
        Command::Delete { id } => {
            let task = runtime.app.delete_task(&id)?;
            runtime.app.settle();
            print_task_result(&task, json, "Deleted")?;
        }
        Command::Show { id } => {
            let task = runtime.app.get_task(&id)?;
            if json {
                print_task_json(&task)?;
            } else {
                print_task_details(&task);
            }
        }
        Command::List => {
            let tasks = runtime.app.list_tasks()?;
            if json {
                print_tasks_json(&tasks)?;
            } else {
                print_tasks_table(&tasks);
            }
        }
        Command::Pending => {
            let entries = runtime.spool.pending()?;
            print_pending(&entries, json, "No pending notifications");
        }
        Command::Notify => {
            let due = runtime.spool.take_due()?;
            let mut delivered = Vec::with_capacity(due.len());
            if !due.is_empty() {
                let deliverer = notify::deliverer_from_env()?;
                for entry in due {
                    let task_id = entry.payload.task_id.as_str();
                    let action = notify::activation_argument(task_id);
                    if let Err(err) = deliverer.deliver_with_action(&entry.payload, &action) {
                        warn!(task_id, handle = %entry.handle, %err, "reminder not delivered");
                    }
                    if let Err(err) = runtime.app.retire_fired(task_id, &entry.handle) {
                        warn!(task_id, handle = %entry.handle, %err, "fired handle not cleared");
                    }
                    delivered.push(entry);
                }
                runtime.app.settle();
            }
            print_pending(&delivered, json, "No reminders due");
        }
        Command::Reconcile => {
            let report = match runtime.startup_report.take() {
                Some(report) => report,
                None => {
                    let report =
                        reconcile(runtime.app.store(), &*runtime.spool, &*runtime.clock);
                    runtime.app.settle();
                    report
                }
            };
            print_report(&report, json);
        }
    }

    Ok(())
}

fn run_interactive() -> Result<(), AppError> {
    let config = prepare(&[])?;
    let mut runtime = Runtime::open(&config)?;
    runtime.app.settle();

    let mut input = String::new();
    let stdin = io::stdin();
    let mut stdin_lock = stdin.lock();

    loop {
        input.clear();
        let bytes = stdin_lock
            .read_line(&mut input)
            .map_err(|err| AppError::store_io(err.to_string()))?;

        if bytes == 0 {
            break;
        }

        let line = input.trim();
        if line.is_empty() {
            continue;
        }

        if line.eq_ignore_ascii_case("exit") || line.eq_ignore_ascii_case("quit") {
            break;
        }

        if line == "help" || line == "?" {
            print_help();
            continue;
        }

        let args = match split_command_line(line) {
            Ok(args) => args,
            Err(err) => {
                eprintln!("ERROR: {}", err);
                continue;
            }
        };

        if args.is_empty() {
            continue;
        }

        if args.iter().any(|arg| arg.starts_with(CONFIG_OVERRIDE_FLAG)) {
            eprintln!(
                "ERROR: {}",
                AppError::invalid_input("config overrides only apply when starting the program")
            );
            continue;
        }

        let mut argv = Vec::with_capacity(args.len() + 1);
        argv.push("reminder".to_string());
        argv.extend(args);

        let cli = match Cli::try_parse_from(argv) {
            Ok(cli) => cli,
            Err(err) if !err.use_stderr() => {
                println!("{err}");
                continue;
            }
            Err(err) => {
                eprintln!("ERROR: {}", normalize_parse_error(err));
                continue;
            }
        };

        if let Err(err) = run_command(&mut runtime, cli) {
            eprintln!("ERROR: {}", err);
        }
    }

    Ok(())
}

/// Notification clicks relaunch the binary with `show:<task id>`.
fn rewrite_activation(mut argv: Vec<OsString>) -> Vec<OsString> {
    if argv.len() == 2
        && let Some(task_id) = argv[1]
            .to_str()
            .and_then(notify::parse_activation_argument)
    {
        argv.truncate(1);
        argv.push(OsString::from("show"));
        argv.push(OsString::from(task_id));
    }
    argv
}

fn run_once(cli: Cli) -> Result<(), AppError> {
    let config = prepare(&cli.config_override)?;
    let mut runtime = Runtime::open(&config)?;
    run_command(&mut runtime, cli)
}

fn main() {
    let argv: Vec<OsString> = std::env::args_os().collect();
    if argv.len() < 2 {
        if let Err(err) = run_interactive() {
            eprintln!("ERROR: {}", err);
            std::process::exit(1);
        }
        return;
    }

    let cli = match Cli::try_parse_from(rewrite_activation(argv)) {
        Ok(cli) => cli,
        Err(err) if !err.use_stderr() => err.exit(),
        Err(err) => {
            eprintln!("ERROR: {}", normalize_parse_error(err));
            std::process::exit(1);
        }
    };

    if let Err(err) = run_once(cli) {
        eprintln!("ERROR: {}", err);
        std::process::exit(1);
    }
}
