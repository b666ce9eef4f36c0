//! Relay - runs mailhook sync cycles from the command line
//!
//! The outcome is printed to stdout as JSON. The exit status is 0 when the
//! notification was handled (including rejections), 2 on invalid usage and
//! 75 when the cycle failed and the notification should be redelivered.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use log::{Level, error, info, warn};
use mailhook::{
    CredentialResolver, GmailCredentials, GmailGateway, GoogleTokenRefresher, MessageId,
    OutcomeStatus, OwnerAddress, OwnerGate, RefreshedToken, Secret, Settings, SqliteStore,
    SyncEngine, SyncOutcome, TokenRefresher,
};

/// sysexits EX_TEMPFAIL
const EXIT_RETRY: u8 = 75;

const LOG_FILE: &str = "mailhook.log";
const ERROR_LOG_FILE: &str = "mailhook_errors.log";

#[derive(Parser, Debug)]
#[command(name = "relay", version, about = "Relay Gmail push notifications to the task queue")]
struct Cli {
    /// Google OAuth client file, instead of the one in the config directory
    #[arg(long, global = true, value_name = "PATH")]
    credentials: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process a Pub/Sub push body (the default)
    Push {
        /// File holding the body; stdin when absent or "-"
        file: Option<PathBuf>,
    },
    /// Process one message outside the watermark protocol
    Manual {
        email: String,
        /// Defaults to the latest inbox message
        message_id: Option<String>,
    },
}

/// Used when no OAuth client is configured; resolution keeps the stored token
struct MissingClientCredentials;

impl TokenRefresher for MissingClientCredentials {
    fn refresh(&self, _refresh_token: &Secret) -> Result<RefreshedToken> {
        bail!("OAuth client credentials are not configured")
    }
}

/// Copy of error records, kept apart from the main log
struct ErrorLog(Mutex<File>);

impl ErrorLog {
    fn open(path: &Path) -> Result<Self> {
        Ok(Self(Mutex::new(open_append(path)?)))
    }

    fn record(&self, level: Level, line: &str) {
        if level != Level::Error {
            return;
        }
        if let Ok(mut file) = self.0.lock() {
            let _ = writeln!(file, "{}", line);
        }
    }
}

fn open_append(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file {:?}", path))
}

fn init_logging(settings: &Settings) -> Result<()> {
    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(settings.log_level.as_str()),
    );
    builder
        .format_timestamp_millis()
        .filter_module("ureq", log::LevelFilter::Warn);

    if let Some(dir) = &settings.log_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create log directory {:?}", dir))?;
        let errors = ErrorLog::open(&dir.join(ERROR_LOG_FILE))?;
        builder
            .target(env_logger::Target::Pipe(Box::new(open_append(&dir.join(LOG_FILE))?)))
            .format(move |buf, record| {
                let line = format!(
                    "[{} {:<5} {}] {}",
                    buf.timestamp_millis(),
                    record.level(),
                    record.target(),
                    record.args()
                );
                errors.record(record.level(), &line);
                writeln!(buf, "{}", line)
            });
    }

    builder.init();
    Ok(())
}

fn token_refresher(settings: &Settings, credentials: Option<&Path>) -> Arc<dyn TokenRefresher> {
    let loaded = match credentials {
        Some(path) => GmailCredentials::from_file(path),
        None => GmailCredentials::load(),
    };
    match loaded {
        Ok(creds) => Arc::new(GoogleTokenRefresher::from_settings(creds, settings)),
        Err(e) => {
            warn!("Gmail credentials not found: {:#}", e);
            if let Some(path) = GmailCredentials::default_credentials_path() {
                warn!(
                    "Expired tokens will not be refreshed. To configure OAuth, either:\n\
                     1. Place your Google OAuth credentials at: {}\n\
                     2. Or set environment variables: GOOGLE_CLIENT_ID and GOOGLE_CLIENT_SECRET",
                    path.display()
                );
            }
            Arc::new(MissingClientCredentials)
        }
    }
}

fn build_engine(settings: &Settings, credentials: Option<&Path>) -> Result<SyncEngine> {
    let db_path = settings.database_path()?;
    let store = Arc::new(SqliteStore::new(&db_path)?);
    info!("Opened database at {:?}", db_path);

    let resolver = CredentialResolver::from_settings(
        store.clone(),
        token_refresher(settings, credentials),
        settings,
    );
    let gateway = Arc::new(GmailGateway::from_settings(settings));

    Ok(SyncEngine::from_settings(settings, resolver, gateway, store)?
        .with_owner_gate(Arc::new(OwnerGate::new())))
}

fn read_body(file: Option<&Path>) -> Result<Vec<u8>> {
    match file {
        Some(path) if path != Path::new("-") => {
            std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))
        }
        _ => {
            let mut body = Vec::new();
            std::io::stdin()
                .read_to_end(&mut body)
                .context("Failed to read push body from stdin")?;
            Ok(body)
        }
    }
}

fn run(command: Command, engine: &SyncEngine) -> Result<SyncOutcome> {
    match command {
        Command::Push { file } => {
            let body = read_body(file.as_deref())?;
            Ok(engine.handle_envelope(&body))
        }
        Command::Manual { email, message_id } => {
            let message_id = message_id.map(MessageId::new);
            Ok(engine
                .process_manual(&OwnerAddress::new(&email), message_id.as_ref())
                .unwrap_or_else(SyncOutcome::from))
        }
    }
}

fn main() -> ExitCode {
    // Exits with status 2 and usage on invalid arguments
    let cli = Cli::parse();

    // Bootstrap config directory
    if let Err(e) = config::init() {
        eprintln!("Failed to initialize config directory: {}", e);
    }

    let settings = match Settings::load() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Failed to load settings: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_logging(&settings) {
        eprintln!("Failed to initialize logging: {:#}", e);
        return ExitCode::FAILURE;
    }

    let command = cli.command.unwrap_or(Command::Push { file: None });
    let outcome = build_engine(&settings, cli.credentials.as_deref())
        .and_then(|engine| run(command, &engine));
    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("Relay failed: {:#}", e);
            return ExitCode::from(EXIT_RETRY);
        }
    };

    match serde_json::to_string(&outcome) {
        Ok(json) => println!("{}", json),
        Err(e) => error!("Failed to serialize outcome: {}", e),
    }

    if outcome.status == OutcomeStatus::Failed {
        ExitCode::from(EXIT_RETRY)
    } else {
        ExitCode::SUCCESS
    }
}
