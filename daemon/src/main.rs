//! `mailroute` service entry point.
//!
//! ```text
//! mailroute [CONFIG]                      watch every enabled account
//! mailroute add-rule ID TEXT [CONFIG]     store a reply-drafting rule
//! mailroute draft SUBJECT BODY [CONFIG]   draft a reply from stored rules
//! ```
//!
//! Without a config file the configuration is read from `EMAIL_<n>_*` and
//! friends in the environment.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use log::{error, info, warn};
use tokio::sync::watch;

use mailroute::ai::{GeminiClient, ReplyAssistant, RuleStore};
use mailroute::classify::ClassificationService;
use mailroute::config::{load_config, Config};
use mailroute::db::{default_database_path, Database};
use mailroute::email::{FolderRouter, ImapConnector, MailConnector, SessionManager};
use mailroute::index::{IndexStore, OpenSearchIndex};
use mailroute::notify::NotificationDispatcher;
use mailroute::pipeline::MessagePipeline;
use mailroute::telemetry::{init_tracing, LogFormat};
use mailroute::{ConfigError, MailrouteError};

enum Command {
    Watch,
    AddRule { id: String, text: String },
    Draft { subject: String, body: String },
}

fn parse_args(mut args: Vec<String>) -> Result<(Command, Option<PathBuf>), String> {
    let command = match args.first().map(String::as_str) {
        Some("add-rule") => {
            if args.len() < 3 {
                return Err("usage: mailroute add-rule ID TEXT [CONFIG]".to_string());
            }
            let mut rest = args.split_off(1);
            let id = rest.remove(0);
            let text = rest.remove(0);
            args = rest;
            Command::AddRule { id, text }
        }
        Some("draft") => {
            if args.len() < 3 {
                return Err("usage: mailroute draft SUBJECT BODY [CONFIG]".to_string());
            }
            let mut rest = args.split_off(1);
            let subject = rest.remove(0);
            let body = rest.remove(0);
            args = rest;
            Command::Draft { subject, body }
        }
        _ => Command::Watch,
    };

    match args.as_slice() {
        [] => Ok((command, None)),
        [path] => Ok((command, Some(PathBuf::from(path)))),
        _ => Err(format!("unexpected arguments: {}", args[1..].join(" "))),
    }
}

fn load(path: Option<PathBuf>) -> Result<Config, ConfigError> {
    match path {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            load_config(path)
        }
        None => {
            info!("No config file given, reading configuration from the environment");
            Config::from_env()
        }
    }
}

fn open_database(config: &Config) -> Result<Database, MailrouteError> {
    let path = config
        .database
        .path
        .as_ref()
        .map(PathBuf::from)
        .or_else(default_database_path)
        .ok_or_else(|| ConfigError::Validation {
            message: "no database path configured and no home directory found".to_string(),
        })?;
    Ok(Database::open(&path)?)
}

async fn watch(config: Config) -> Result<(), MailrouteError> {
    let db = open_database(&config)?;

    let opensearch = OpenSearchIndex::new(&config.index)?;
    if let Err(e) = opensearch.ensure_index().await {
        warn!("Could not verify index '{}': {}", config.index.index_name, e);
    }
    let index: Arc<dyn IndexStore> = Arc::new(opensearch);

    let model = Arc::new(GeminiClient::new(&config.classifier)?);
    let classifier = Arc::new(ClassificationService::new(model, &config.classifier));

    let connector: Arc<dyn MailConnector> = Arc::new(ImapConnector::new());
    let router = FolderRouter::new(Arc::clone(&connector), config.session.route_timeout());
    let notifier = Arc::new(NotificationDispatcher::from_settings(&config.notifications)?);

    let pipeline = Arc::new(MessagePipeline::new(
        Arc::clone(&index),
        classifier,
        router,
        notifier,
    ));

    let manager = SessionManager::new(&config, &db, connector, index, pipeline)?;
    if manager.is_empty() {
        warn!("No enabled accounts, nothing to do");
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let signal_tx = shutdown_tx.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Shutdown requested");
        let _ = signal_tx.send(true);
    }) {
        warn!("Failed to install signal handler: {}", e);
    }

    let running = manager.spawn(shutdown_rx);
    let statuses = running.join().await;
    drop(shutdown_tx);
    for status in &statuses {
        info!(
            "Account '{}' stopped at marker {} after {} reconnect(s)",
            status.account_id, status.last_seq, status.reconnects
        );
        if let Some(e) = &status.last_error {
            warn!("Account '{}' last error: {}", status.account_id, e);
        }
    }
    info!("All sessions stopped");
    Ok(())
}

fn reply_assistant(config: &Config) -> Result<ReplyAssistant, MailrouteError> {
    let db = open_database(config)?;
    let gemini = Arc::new(GeminiClient::new(&config.classifier)?);
    Ok(ReplyAssistant::new(
        gemini.clone(),
        gemini,
        RuleStore::new(db),
        config.reply.clone(),
    ))
}

async fn run(command: Command, config: Config) -> Result<(), MailrouteError> {
    match command {
        Command::Watch => watch(config).await,
        Command::AddRule { id, text } => {
            let assistant = reply_assistant(&config)?;
            assistant.save_rule(&id, &text).await?;
            info!("Stored rule '{}'", id);
            Ok(())
        }
        Command::Draft { subject, body } => {
            let assistant = reply_assistant(&config)?;
            let reply = assistant.draft_reply(&subject, &body).await?;
            println!("{}", reply);
            Ok(())
        }
    }
}

fn main() -> ExitCode {
    let format = std::env::var("MAILROUTE_LOG_FORMAT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(LogFormat::Compact);
    if let Err(e) = init_tracing(format) {
        eprintln!("Failed to initialize logging: {}", e);
        return ExitCode::FAILURE;
    }

    info!("Starting mailroute v{}", env!("CARGO_PKG_VERSION"));

    let (command, path) = match parse_args(std::env::args().skip(1).collect()) {
        Ok(parsed) => parsed,
        Err(usage) => {
            eprintln!("{}", usage);
            return ExitCode::from(2);
        }
    };

    let config = match load(path) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start async runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(command, config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
