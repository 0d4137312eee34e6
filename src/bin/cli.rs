//! pagewatch CLI
//!
//! `run` starts the monitor daemon. The other commands edit or inspect the
//! rules file directly and must not be used while a daemon owns that file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use pagewatch::{
    MonitorEngine,
    config::{self, DEFAULT_CONFIG_FILE},
    error::{AppError, Result},
    models::{Config, ExtractorType, MonitorRule, RuleStatus},
    services::{HttpFetcher, checker},
    storage::{LocalStorage, RuleRepository, RuleStore},
    utils::logfile,
};
use tokio::sync::broadcast::error::RecvError;

/// pagewatch - Website Change Monitor
#[derive(Parser, Debug)]
#[command(name = "pagewatch", version, about = "Watch web pages for changes")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the monitor until interrupted, printing events as JSON lines
    Run {
        /// Start every rule, not only those saved as enabled
        #[arg(long)]
        all: bool,
    },

    /// List stored rules
    List,

    /// Add a rule (stopped until enabled)
    Add {
        #[arg(long)]
        name: String,

        #[arg(long)]
        url: String,

        /// Extractor type: css, regex or json
        #[arg(long = "type")]
        extractor_type: String,

        /// Selector, pattern or path
        #[arg(long)]
        expr: String,

        /// Seconds between checks
        #[arg(long, default_value_t = 300)]
        interval: u64,

        #[arg(long, default_value = "GET")]
        method: String,

        /// Request header as NAME:VALUE (repeatable)
        #[arg(long = "header")]
        headers: Vec<String>,

        #[arg(long)]
        body: Option<String>,

        #[arg(long, default_value = "")]
        description: String,

        /// Notify when the content changes
        #[arg(long)]
        notify: bool,
    },

    /// Remove a rule
    Remove { id: String },

    /// Mark a rule to be monitored by `run`
    Enable { id: String },

    /// Mark a rule as stopped
    Disable { id: String },

    /// Fetch and extract once without saving anything
    Check { id: String },

    /// Validate the configuration and every stored rule
    Validate,
}

/// Initialize logging based on verbosity flag and the `[logging]` section.
///
/// With `logging.file` set, lines go to that file (rotated by size at
/// startup) instead of stderr.
fn init_logging(verbose: bool, config: Option<&Config>, config_path: &Path) {
    let level = match config {
        _ if verbose => "debug",
        Some(config) => config.logging.level.as_str(),
        None => "info",
    };
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level));
    builder.format_timestamp_secs();

    let mut file_error = None;
    if let Some(config) = config
        && let Some(path) = config.log_path(&config::config_dir(config_path))
    {
        let logging = &config.logging;
        match logfile::open_log_file(&path, logging.max_file_bytes, logging.max_backups) {
            Ok(file) => {
                builder.target(env_logger::Target::Pipe(Box::new(file)));
            }
            Err(e) => file_error = Some(format!("Cannot open log file {}: {e}", path.display())),
        }
    }
    builder.init();

    if let Some(message) = file_error {
        log::warn!("{message}; logging to stderr");
    }
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let loaded = config::load_all(&cli.config);
    init_logging(
        cli.verbose,
        loaded.as_ref().ok().map(|(config, _)| config),
        &cli.config,
    );

    let (config, rules_path) = loaded.inspect_err(|e| log::error!("{e}"))?;
    let storage = LocalStorage::new(&rules_path);

    match cli.command {
        Command::Run { all } => run(config, storage, all).await?,

        Command::List => {
            let rules = storage.load_rules().await?;
            if rules.is_empty() {
                println!("No rules in {}", rules_path.display());
            }
            for rule in rules {
                println!(
                    "{}  {:<6} {:<3} {:>6}s  {:<5} {}  {}",
                    rule.id,
                    rule.status,
                    if rule.enabled { "on" } else { "off" },
                    rule.interval.as_secs(),
                    rule.extractor_type,
                    rule.name,
                    rule.url
                );
            }
        }

        Command::Add {
            name,
            url,
            extractor_type,
            expr,
            interval,
            method,
            headers,
            body,
            description,
            notify,
        } => {
            let mut rule = MonitorRule::new(
                name,
                url,
                extractor_type.parse::<ExtractorType>()?,
                expr,
                Duration::from_secs(interval),
            );
            rule.method = method;
            rule.headers = parse_headers(&headers)?;
            rule.body = body;
            rule.description = description;
            rule.notify_enabled = notify;
            rule.normalize();
            rule.validate(config.monitor.min_interval())?;

            let store = open_store(&storage).await?;
            let rule = store.insert(rule);
            storage.save_rules(&store.snapshot()).await?;
            println!("{}", rule.id);
            log::info!("Rule '{}' added to {}", rule.name, rules_path.display());
        }

        Command::Remove { id } => {
            let store = open_store(&storage).await?;
            let removed = store.remove(&id)?;
            storage.save_rules(&store.snapshot()).await?;
            log::info!("Rule '{}' removed", removed.name);
        }

        Command::Enable { id } => {
            set_enabled(&storage, &id, true).await?;
            log::info!("[{id}] Enabled; it will be monitored on the next run");
        }

        Command::Disable { id } => {
            set_enabled(&storage, &id, false).await?;
            log::info!("[{id}] Disabled");
        }

        Command::Check { id } => {
            let store = open_store(&storage).await?;
            let rule = store.get(&id)?;
            let fetcher = HttpFetcher::new(&config.monitor)?;

            log::info!("Checking {} {}", rule.method, rule.url);
            let extracted =
                checker::run_pipeline(&fetcher, &rule, config.monitor.timeout()).await?;
            let changed = checker::is_change(&rule, &extracted);

            println!("{extracted}");
            log::info!(
                "Content {} compared to the stored value",
                if changed { "differs" } else { "unchanged" }
            );
        }

        Command::Validate => {
            log::info!("Validating configuration...");
            log::info!("✓ Config OK ({})", cli.config.display());

            let rules = storage.load_rules().await?;
            let store = RuleStore::new();
            let mut invalid = 0;
            for rule in rules {
                let mut normalized = rule.clone();
                normalized.normalize();
                if let Err(e) = normalized
                    .validate(config.monitor.min_interval())
                    .and_then(|_| store.restore(rule).map(|_| ()))
                {
                    log::error!("[{}] {e}", normalized.id);
                    invalid += 1;
                }
            }

            if invalid > 0 {
                return Err(AppError::validation(format!("{invalid} invalid rules")));
            }
            log::info!("✓ {} rules OK ({})", store.len(), rules_path.display());
        }
    }

    Ok(())
}

/// Run the engine until Ctrl-C, printing events as JSON lines.
async fn run(config: Config, storage: LocalStorage, all: bool) -> Result<()> {
    log::info!("Rules file: {}", storage.path().display());
    let engine = MonitorEngine::new(config, Arc::new(storage))?;
    let mut events = engine.subscribe();

    engine.initialize().await?;
    if all {
        let started = engine.start_all_monitoring().await;
        log::info!("Started {} additional rules", started.len());
    }
    log::info!(
        "Monitoring {} of {} rules; press Ctrl-C to stop",
        engine.active_count(),
        engine.get_rules().len()
    );

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    log::error!("Failed to listen for Ctrl-C: {e}");
                }
                break;
            }
            event = events.recv() => match event {
                Ok(event) => println!("{}", serde_json::to_string(&event)?),
                Err(RecvError::Lagged(skipped)) => {
                    log::warn!("Event output fell behind; {skipped} events skipped");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    log::info!("Shutting down...");
    engine.shutdown().await
}

/// Load the rules file into a store for offline editing.
async fn open_store(storage: &LocalStorage) -> Result<RuleStore> {
    let store = RuleStore::new();
    for rule in storage.load_rules().await? {
        store.restore(rule)?;
    }
    Ok(store)
}

async fn set_enabled(storage: &LocalStorage, id: &str, enabled: bool) -> Result<()> {
    let store = open_store(storage).await?;
    store.modify(id, |rule| {
        rule.enabled = enabled;
        rule.status = match (enabled, rule.status) {
            (true, RuleStatus::Paused) => RuleStatus::Idle,
            (false, RuleStatus::Idle | RuleStatus::Running) => RuleStatus::Paused,
            (_, status) => status,
        };
    })?;
    storage.save_rules(&store.snapshot()).await
}

fn parse_headers(raw: &[String]) -> Result<BTreeMap<String, String>> {
    raw.iter()
        .map(|header| {
            header
                .split_once(':')
                .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
                .ok_or_else(|| {
                    AppError::invalid_rule(format!("header '{header}' is not NAME:VALUE"))
                })
        })
        .collect()
}
