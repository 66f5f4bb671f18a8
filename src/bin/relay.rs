//! Operator CLI for the reminder relay.

use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{NaiveDate, NaiveTime, Utc};
use clap::{Parser, Subcommand};
use reminder_relay::config::{ConfigIssueSeverity, RelayConfig};
use reminder_relay::preferences::{PreferenceUpdate, QUIET_HOURS_FORMAT};
use reminder_relay::queue::DispatchEvent;
use reminder_relay::store::generator::{DEFAULT_OFFSET_DAYS, reminders_for_due_date};
use reminder_relay::store::User;
use reminder_relay::{Channel, RelayRuntime};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Reminder Relay: claims due reminders and delivers them over email, SMS, or push.
#[derive(Parser)]
#[command(name = "reminder-relay", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Also write logs to a daily-rotated file in this directory.
    #[arg(long)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler and dispatch workers until Ctrl+C.
    Run,

    /// Run one scheduler pass and wait for its jobs to finish.
    DispatchDue,

    /// Claim and dispatch a single reminder now, even before it is due.
    Dispatch { reminder_id: String },

    /// Inspect or change a user's delivery preferences.
    Prefs {
        #[command(subcommand)]
        action: PrefsAction,
    },

    /// Register or update a user's contact details.
    Users {
        #[command(subcommand)]
        action: UsersAction,
    },

    /// Create an obligation and its reminders.
    Schedule {
        user_id: String,
        title: String,
        /// Due date, YYYY-MM-DD.
        due_date: NaiveDate,
        /// Time of day (UTC) for the due date and every reminder.
        #[arg(long, default_value = "09:00")]
        at: String,
        /// Days before the due date to remind at.
        #[arg(long, value_delimiter = ',')]
        offsets: Option<Vec<i64>>,
    },

    /// List dead-lettered reminders, newest first.
    DeadLetters {
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },

    /// Show the delivery log for one reminder.
    Logs { reminder_id: String },

    /// Validate the configuration and report problems.
    CheckConfig,
}

#[derive(Subcommand)]
enum PrefsAction {
    /// Print preferences, storing the defaults on first read.
    Show { user_id: String },

    /// Update only the given fields.
    Set {
        user_id: String,
        /// Channel order, e.g. `push,email`.
        #[arg(long, value_delimiter = ',')]
        channels: Option<Vec<Channel>>,
        #[arg(long)]
        email: Option<bool>,
        #[arg(long)]
        sms: Option<bool>,
        #[arg(long)]
        push: Option<bool>,
        /// Quiet hours start, HH:MM local time.
        #[arg(long)]
        quiet_start: Option<String>,
        /// Quiet hours end, HH:MM local time.
        #[arg(long)]
        quiet_end: Option<String>,
        /// Remove quiet hours.
        #[arg(long, conflicts_with_all = ["quiet_start", "quiet_end"])]
        clear_quiet_hours: bool,
        /// User's offset from UTC in minutes.
        #[arg(long, allow_hyphen_values = true)]
        utc_offset: Option<i32>,
    },
}

#[derive(Subcommand)]
enum UsersAction {
    /// Insert or replace a user.
    Add {
        user_id: String,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        phone: Option<String>,
        #[arg(long)]
        push_token: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_tracing(cli.log_dir.as_deref())?;

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(RelayConfig::default_config_path);
    let config = if config_path.exists() {
        RelayConfig::from_file(&config_path)
            .with_context(|| format!("loading {}", config_path.display()))?
    } else {
        RelayConfig::default()
    };

    if let Command::CheckConfig = cli.command {
        return check_config(&config, &config_path);
    }

    let runtime = RelayRuntime::from_config(config)?;
    match cli.command {
        Command::Run => run(&runtime).await,
        Command::DispatchDue => dispatch_due(&runtime).await,
        Command::Dispatch { reminder_id } => {
            match runtime.dispatch_one(&reminder_id).await? {
                DispatchEvent::Completed { outcome, .. } => {
                    println!("{reminder_id}: {outcome:?}");
                }
                DispatchEvent::Abandoned {
                    attempts, error, ..
                } => {
                    anyhow::bail!("{reminder_id}: abandoned after {attempts} attempts ({error})");
                }
            }
            Ok(())
        }
        Command::Prefs { action } => prefs(&runtime, action).await,
        Command::Users { action } => users(&runtime, action),
        Command::Schedule {
            user_id,
            title,
            due_date,
            at,
            offsets,
        } => schedule(&runtime, &user_id, &title, due_date, &at, offsets),
        Command::DeadLetters { limit } => {
            let reminders = runtime.store().list_dead_letters(limit)?;
            if reminders.is_empty() {
                println!("No dead-lettered reminders.");
            }
            for r in reminders {
                println!(
                    "{}  obligation={}  retries={}/{}  remind_at={}  error={}",
                    r.id,
                    r.obligation_id,
                    r.retry_count,
                    r.max_retries,
                    r.remind_at.to_rfc3339(),
                    r.last_error.as_deref().unwrap_or("-"),
                );
            }
            Ok(())
        }
        Command::Logs { reminder_id } => {
            for log in runtime.store().logs_for_reminder(&reminder_id)? {
                println!(
                    "{}  {:<5} {:<6} to={}  id={}  error={}",
                    log.created_at.to_rfc3339(),
                    log.channel,
                    log.status.as_str(),
                    log.recipient,
                    log.provider_message_id.as_deref().unwrap_or("-"),
                    log.error_message.as_deref().unwrap_or("-"),
                );
            }
            Ok(())
        }
        Command::CheckConfig => Ok(()),
    }
}

/// Console logging, plus a daily file when `log_dir` is given. The returned
/// guard must live until exit so buffered file output is flushed.
fn init_tracing(log_dir: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("reminder_relay=info"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "reminder-relay.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();
    Ok(guard)
}

async fn run(runtime: &RelayRuntime) -> anyhow::Result<()> {
    println!("Reminder Relay v{}", env!("CARGO_PKG_VERSION"));
    let mut handle = runtime.start();
    println!("Dispatching due reminders. Press Ctrl+C to stop.");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("received Ctrl+C, shutting down...");
                break;
            }
            event = handle.events.recv() => match event {
                Some(DispatchEvent::Abandoned { reminder_id, attempts, error }) => {
                    eprintln!("abandoned {reminder_id} after {attempts} attempts: {error}");
                }
                Some(_) => {}
                None => break,
            },
        }
    }
    handle.shutdown().await;
    Ok(())
}

async fn dispatch_due(runtime: &RelayRuntime) -> anyhow::Result<()> {
    let report = runtime.run_once().await?;
    println!(
        "Claimed {} reminder(s) in {} batch(es); released {} stale claim(s).",
        report.tick.claimed, report.tick.batches, report.tick.released_stale
    );
    for event in &report.events {
        match event {
            DispatchEvent::Completed {
                reminder_id,
                outcome,
            } => println!("  {reminder_id}: {outcome:?}"),
            DispatchEvent::Abandoned {
                reminder_id,
                attempts,
                error,
            } => println!("  {reminder_id}: abandoned after {attempts} attempts ({error})"),
        }
    }
    Ok(())
}

async fn prefs(runtime: &RelayRuntime, action: PrefsAction) -> anyhow::Result<()> {
    match action {
        PrefsAction::Show { user_id } => {
            let pref = runtime
                .preferences()
                .get_or_create_preferences(&user_id)
                .await?;
            println!("{}", serde_json::to_string_pretty(&pref)?);
        }
        PrefsAction::Set {
            user_id,
            channels,
            email,
            sms,
            push,
            quiet_start,
            quiet_end,
            clear_quiet_hours,
            utc_offset,
        } => {
            let (quiet_hours_start, quiet_hours_end) = if clear_quiet_hours {
                (Some(None), Some(None))
            } else {
                (quiet_start.map(Some), quiet_end.map(Some))
            };
            let update = PreferenceUpdate {
                channel_priority: channels,
                email_enabled: email,
                sms_enabled: sms,
                push_enabled: push,
                quiet_hours_start,
                quiet_hours_end,
                utc_offset_minutes: utc_offset,
            };
            let saved = runtime
                .preferences()
                .upsert_preferences(&user_id, &update)
                .await?;
            println!("{}", serde_json::to_string_pretty(&saved)?);
        }
    }
    Ok(())
}

fn users(runtime: &RelayRuntime, action: UsersAction) -> anyhow::Result<()> {
    match action {
        UsersAction::Add {
            user_id,
            email,
            phone,
            push_token,
        } => {
            runtime.store().upsert_user(&User {
                id: user_id.clone(),
                email,
                phone,
                push_token,
            })?;
            println!("Saved user {user_id}.");
        }
    }
    Ok(())
}

fn schedule(
    runtime: &RelayRuntime,
    user_id: &str,
    title: &str,
    due_date: NaiveDate,
    at: &str,
    offsets: Option<Vec<i64>>,
) -> anyhow::Result<()> {
    let time = NaiveTime::parse_from_str(at, QUIET_HOURS_FORMAT)
        .with_context(|| format!("--at must be HH:MM, got {at:?}"))?;
    let due = due_date.and_time(time).and_utc();
    let offsets = offsets.unwrap_or_else(|| DEFAULT_OFFSET_DAYS.to_vec());

    let store = runtime.store();
    let obligation = store.create_obligation(user_id, title, due)?;
    let now = Utc::now();
    let planned = reminders_for_due_date(
        &obligation.id,
        due,
        now,
        &offsets,
        runtime.config().dispatch.default_max_retries,
    );
    println!("Obligation {} due {}", obligation.id, due.to_rfc3339());
    if planned.is_empty() {
        println!("  every reminder time is already in the past; nothing scheduled");
    }
    for new in &planned {
        let reminder = store.create_reminder(new, now)?;
        println!("  reminder {} at {}", reminder.id, reminder.remind_at.to_rfc3339());
    }
    Ok(())
}

fn check_config(config: &RelayConfig, path: &Path) -> anyhow::Result<()> {
    println!("Config: {}", path.display());
    let issues = config.validate();
    if issues.is_empty() {
        println!("OK");
        return Ok(());
    }
    let mut errors = 0;
    for issue in &issues {
        let label = match issue.severity {
            ConfigIssueSeverity::Warning => "warning",
            ConfigIssueSeverity::Error => {
                errors += 1;
                "error"
            }
        };
        println!("{label}: [{}] {}", issue.id, issue.summary);
    }
    if errors > 0 {
        anyhow::bail!("{errors} configuration error(s)");
    }
    Ok(())
}
