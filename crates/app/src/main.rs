use std::fmt;

use exam_core::model::{AssessmentSettings, AssessmentSettingsDraft, SessionId};
use services::{Clock, SubmissionPayload};
use storage::repository::Storage;
use storage::session_store::SessionStore;
use tracing_subscriber::{EnvFilter, fmt as tracing_fmt, prelude::*};

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    MissingSession,
    UnknownArg(String),
    InvalidSessionId { raw: String },
    InvalidDbUrl { raw: String },
    InvalidEnv { name: &'static str, raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::MissingSession => write!(f, "--session is required"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidSessionId { raw } => write!(f, "invalid --session value: {raw:?}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
            ArgsError::InvalidEnv { name, raw } => write!(f, "invalid {name} value: {raw}"),
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

struct Args {
    db_url: String,
    session_id: SessionId,
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p app -- status --session <id> [--db <sqlite_url>]");
    eprintln!("  cargo run -p app -- clear  --session <id> [--db <sqlite_url>]");
    eprintln!();
    eprintln!("Defaults:");
    eprintln!("  --db sqlite:exam.sqlite3");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  EXAM_DB_URL, EXAM_DURATION_SECS, EXAM_MAX_WARNINGS, EXAM_AUTO_SUBMIT, RUST_LOG");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Status,
    Clear,
}

impl Command {
    fn from_arg(arg: &str) -> Option<Self> {
        match arg {
            "status" => Some(Self::Status),
            "clear" => Some(Self::Clear),
            _ => None,
        }
    }
}

impl Args {
    fn parse(args: &mut impl Iterator<Item = String>) -> Result<Self, ArgsError> {
        let mut db_url = std::env::var("EXAM_DB_URL")
            .ok()
            .map_or_else(|| "sqlite://exam.sqlite3".into(), normalize_sqlite_url);
        let mut session_id = None;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    db_url = normalize_sqlite_url(value);
                }
                "--session" => {
                    let value = require_value(args, "--session")?;
                    let parsed = SessionId::new(value.as_str())
                        .map_err(|_| ArgsError::InvalidSessionId { raw: value.clone() })?;
                    session_id = Some(parsed);
                }
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        Ok(Self {
            db_url,
            session_id: session_id.ok_or(ArgsError::MissingSession)?,
        })
    }
}

fn env_number<T: std::str::FromStr>(name: &'static str) -> Result<Option<T>, ArgsError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ArgsError::InvalidEnv { name, raw }),
        Err(_) => Ok(None),
    }
}

fn env_flag(name: &'static str) -> Result<Option<bool>, ArgsError> {
    match std::env::var(name) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(ArgsError::InvalidEnv { name, raw }),
        },
        Err(_) => Ok(None),
    }
}

fn settings_from_env() -> Result<AssessmentSettings, Box<dyn std::error::Error>> {
    let draft = AssessmentSettingsDraft {
        duration_ms: env_number::<u64>("EXAM_DURATION_SECS")?.map(|secs| secs.saturating_mul(1000)),
        max_warnings: env_number("EXAM_MAX_WARNINGS")?,
        auto_submit_on_max_warnings: env_flag("EXAM_AUTO_SUBMIT")?,
        ..AssessmentSettingsDraft::new()
    };
    Ok(draft.validate()?)
}

fn normalize_sqlite_url(raw: String) -> String {
    if raw == "sqlite::memory:" || raw.starts_with("sqlite://") {
        return raw;
    }

    let trimmed = raw.trim().to_string();
    let path_str = trimmed
        .strip_prefix("sqlite:")
        .unwrap_or(trimmed.as_str())
        .to_string();
    let path = std::path::Path::new(&path_str);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| std::path::PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}", absolute.display())
}

fn format_remaining(ms: i64) -> String {
    let secs = ms.max(0) / 1000;
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

async fn print_status(
    store: &SessionStore,
    settings: &AssessmentSettings,
    clock: Clock,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("session: {}", store.session_id());

    match store.load_timer().await? {
        Some(state) if state.is_active => {
            let remaining = state.remaining(settings.duration(), clock.now());
            println!(
                "timer: started {}, {} remaining",
                state.started_at.to_rfc3339(),
                format_remaining(remaining.num_milliseconds())
            );
        }
        _ => println!("timer: not started"),
    }

    match store.load_progress().await? {
        Some(record) => {
            let total = record.entries.len();
            let answered = record
                .entries
                .iter()
                .filter(|entry| entry.status.is_answered())
                .count();
            let marked = record
                .entries
                .iter()
                .filter(|entry| entry.status.is_marked())
                .count();
            println!(
                "progress: on question {}, {answered}/{total} answered, {marked} marked for review",
                record.current_index + 1
            );
        }
        None => println!("progress: none saved"),
    }

    let ledger = store.load_violations().await?.unwrap_or_default();
    println!(
        "warnings: {}/{}",
        ledger.warning_count(),
        settings.max_warnings()
    );
    for violation in ledger.entries() {
        println!(
            "  {}  {}",
            violation.timestamp().to_rfc3339(),
            violation.reason()
        );
    }

    if let Some(payload) = store.load_pending_submission::<SubmissionPayload>().await? {
        println!(
            "submission: unsent ({} trigger, {}/{} correct), locked until retried",
            payload.trigger,
            payload.result.correct(),
            payload.result.total_scored()
        );
    }
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(tracing_fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let argv: Vec<String> = std::env::args().skip(1).collect();

    let cmd = match argv.first().map(String::as_str) {
        None | Some("--help" | "-h") => {
            print_usage();
            return Ok(());
        }
        Some(first) => Command::from_arg(first).ok_or_else(|| {
            eprintln!("unknown subcommand: {first}");
            print_usage();
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "unknown subcommand")
        })?,
    };

    let mut iter = argv.into_iter().skip(1);
    let parsed = Args::parse(&mut iter).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;
    let settings = settings_from_env()?;

    prepare_sqlite_file(&parsed.db_url)?;
    let storage = Storage::sqlite(&parsed.db_url).await?;
    let store = SessionStore::new(storage.kv, parsed.session_id);

    match cmd {
        Command::Status => print_status(&store, &settings, Clock::system()).await,
        Command::Clear => {
            store.clear_all().await?;
            tracing::info!(session_id = %store.session_id(), "cleared persisted session state");
            Ok(())
        }
    }
}

fn prepare_sqlite_file(db_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    if db_url == "sqlite::memory:" {
        return Ok(());
    }

    let path = db_url
        .strip_prefix("sqlite://")
        .ok_or_else(|| ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        })?;
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() {
        return Err(ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        }
        .into());
    }

    let path = std::path::Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if !path.exists() {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}
