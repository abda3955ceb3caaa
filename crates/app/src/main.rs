use std::fmt;

use quant_core::model::{AuthUser, LessonId, LessonReward, UserId};
use services::{AppServices, Clock, LessonCompletion, SyncConfig};
use tokio::sync::oneshot;
use tracing_subscriber::EnvFilter;

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    MissingPositional { what: &'static str },
    UnknownArg(String),
    InvalidUser { raw: String },
    InvalidLesson { raw: String },
    InvalidXp { raw: String },
    InvalidJson { raw: String },
    InvalidDbUrl { raw: String },
    UserRequired { command: &'static str },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::MissingPositional { what } => write!(f, "missing {what}"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidUser { raw } => write!(f, "invalid --user value: {raw:?}"),
            ArgsError::InvalidLesson { raw } => write!(f, "invalid lesson id: {raw:?}"),
            ArgsError::InvalidXp { raw } => write!(f, "invalid --xp value: {raw}"),
            ArgsError::InvalidJson { raw } => write!(f, "progress update is not valid JSON: {raw}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
            ArgsError::UserRequired { command } => write!(f, "{command} requires --user"),
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

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  quant save     [--user <uid>] <json>            # e.g. '{{\"math1_lesson1\": true}}'");
    eprintln!("  quant complete [--user <uid>] <lesson> [--xp <n>] [--badge <name>]");
    eprintln!("  quant flush    --user <uid>");
    eprintln!("  quant show     --user <uid>");
    eprintln!("  quant queue");
    eprintln!();
    eprintln!("Common options:");
    eprintln!("  --db <sqlite_url>   (default: sqlite:quant.sqlite3)");
    eprintln!("  --name <display>    --email <address>   (profile of a new --user)");
    eprintln!();
    eprintln!("Without --user, progress is queued locally until the next signed-in run.");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  QUANT_DB_URL, QUANT_QUEUE_KEY, QUANT_COMPLETION_QUEUE_KEY, QUANT_CURRENT_USER_KEY, RUST_LOG");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Save,
    Complete,
    Flush,
    Show,
    Queue,
}

impl Command {
    fn from_arg(arg: &str) -> Option<Self> {
        match arg {
            "save" => Some(Self::Save),
            "complete" => Some(Self::Complete),
            "flush" => Some(Self::Flush),
            "show" => Some(Self::Show),
            "queue" => Some(Self::Queue),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Save => "save",
            Self::Complete => "complete",
            Self::Flush => "flush",
            Self::Show => "show",
            Self::Queue => "queue",
        }
    }
}

struct Args {
    db_url: String,
    user: Option<UserId>,
    name: Option<String>,
    email: Option<String>,
    xp: Option<u64>,
    badge: Option<String>,
    positional: Vec<String>,
}

impl Args {
    fn parse(args: &mut impl Iterator<Item = String>) -> Result<Self, ArgsError> {
        let mut db_url = normalize_sqlite_url(
            std::env::var("QUANT_DB_URL").unwrap_or_else(|_| "sqlite:quant.sqlite3".into()),
        );
        let mut user = None;
        let mut name = None;
        let mut email = None;
        let mut xp = None;
        let mut badge = None;
        let mut positional = Vec::new();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    db_url = normalize_sqlite_url(value);
                }
                "--user" => {
                    let value = require_value(args, "--user")?;
                    let parsed = UserId::new(value.clone())
                        .map_err(|_| ArgsError::InvalidUser { raw: value })?;
                    user = Some(parsed);
                }
                "--name" => {
                    name = Some(require_value(args, "--name")?);
                }
                "--email" => {
                    email = Some(require_value(args, "--email")?);
                }
                "--xp" => {
                    let value = require_value(args, "--xp")?;
                    let parsed: u64 = value
                        .parse()
                        .map_err(|_| ArgsError::InvalidXp { raw: value.clone() })?;
                    xp = Some(parsed);
                }
                "--badge" => {
                    badge = Some(require_value(args, "--badge")?);
                }
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => {
                    if arg.starts_with("--") {
                        return Err(ArgsError::UnknownArg(arg));
                    }
                    positional.push(arg);
                }
            }
        }

        Ok(Self {
            db_url,
            user,
            name,
            email,
            xp,
            badge,
            positional,
        })
    }

    fn single_positional(&self, what: &'static str) -> Result<&str, ArgsError> {
        match self.positional.as_slice() {
            [value] => Ok(value.as_str()),
            [] => Err(ArgsError::MissingPositional { what }),
            [_, extra, ..] => Err(ArgsError::UnknownArg(extra.clone())),
        }
    }

    fn require_user(&self, command: Command) -> Result<UserId, ArgsError> {
        self.user.clone().ok_or(ArgsError::UserRequired {
            command: command.name(),
        })
    }
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

/// Sign `uid` in and wait until the queued progress has been flushed.
async fn sign_in(
    services: &AppServices,
    user: AuthUser,
) -> Result<AuthUser, Box<dyn std::error::Error>> {
    let (tx, rx) = oneshot::channel();
    let mut tx = Some(tx);
    let subscription = services.progress().on_user_ready(move |user| {
        if let (Some(user), Some(tx)) = (user, tx.take()) {
            let _ = tx.send(user);
        }
    });

    services.profiles().ensure_user_document(&user).await;
    services.auth().sign_in(user).await;

    let ready = rx.await?;
    subscription.unsubscribe();
    Ok(ready)
}

fn print_json(value: &impl serde::Serialize) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut argv = std::env::args().skip(1);

    let cmd = match argv.next() {
        None => {
            print_usage();
            return Ok(());
        }
        Some(first) if first == "--help" || first == "-h" => {
            print_usage();
            return Ok(());
        }
        Some(first) => Command::from_arg(&first).ok_or_else(|| {
            eprintln!("unknown subcommand: {first}");
            print_usage();
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "unknown subcommand")
        })?,
    };

    let parsed = Args::parse(&mut argv).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    // Open + migrate SQLite at startup. Keep this in the binary glue so core/services stay pure.
    prepare_sqlite_file(&parsed.db_url)?;
    let config = SyncConfig::from_env();
    let services = AppServices::new_sqlite(&parsed.db_url, Clock::default_clock(), &config).await?;

    if let Some(uid) = parsed.user.clone() {
        let mut user = AuthUser::new(uid);
        if let Some(name) = parsed.name.clone() {
            user = user.with_display_name(name);
        }
        if let Some(email) = parsed.email.clone() {
            user = user.with_email(email);
        }
        let user = sign_in(&services, user).await?;
        tracing::debug!(user = %user.uid, "session ready");
    }

    match cmd {
        Command::Save => {
            let raw = parsed.single_positional("progress JSON")?;
            let update: serde_json::Value = serde_json::from_str(raw)
                .map_err(|_| ArgsError::InvalidJson { raw: raw.to_string() })?;
            let outcome = services.progress().save_progress(&update).await;
            print_json(&outcome)
        }
        Command::Complete => {
            let raw = parsed.single_positional("lesson id")?;
            let lesson = LessonId::new(raw).map_err(|_| ArgsError::InvalidLesson {
                raw: raw.to_string(),
            })?;
            let mut reward = parsed.xp.map_or_else(LessonReward::default, LessonReward::new);
            if let Some(badge) = parsed.badge.clone() {
                reward = reward.with_badge(badge);
            }

            match services.lessons().complete_lesson(&lesson, &reward).await? {
                LessonCompletion::Completed {
                    xp,
                    level,
                    new_badge,
                } => {
                    println!("Lesson {lesson} complete. XP: {xp}, level: {level}");
                    if let Some(badge) = new_badge {
                        println!("Unlocked badge: {badge}");
                    }
                }
                LessonCompletion::AlreadyCompleted => {
                    println!("Lesson {lesson} was already completed.");
                }
                LessonCompletion::Deferred(outcome) => {
                    println!("Lesson {lesson} queued; rewards apply on the next sign-in.");
                    print_json(&outcome)?;
                }
            }
            Ok(())
        }
        Command::Flush => {
            parsed.require_user(cmd)?;
            // Signing in already flushed; this picks up anything left behind.
            services.progress().flush_queued_progress().await;
            let pending = services.progress().queue().len().await?;
            let completions = services.progress().rewards().completions().read_all().await?;
            println!("Pending queued patches: {pending}");
            println!("Pending lesson completions: {}", completions.len());
            Ok(())
        }
        Command::Show => {
            parsed.require_user(cmd)?;
            match services.profiles().load_profile().await? {
                Some(profile) => print_json(&profile),
                None => {
                    println!("No profile stored yet.");
                    Ok(())
                }
            }
        }
        Command::Queue => {
            let progress = services.progress().queue().read_all().await?;
            let completions = services
                .progress()
                .rewards()
                .completions()
                .read_all()
                .await?;
            print_json(&serde_json::json!({
                "progress": progress,
                "completions": completions,
            }))
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run().await {
        // At this layer (binary glue), printing once is fine.
        eprintln!("{err}");
        std::process::exit(2);
    }
}
