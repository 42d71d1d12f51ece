//! x2telegram CLI
//!
//! Runs the forwarding pipeline and manages followed accounts.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use x2telegram::{
    error::{AppError, Result},
    models::{Config, Source},
    pipeline,
    storage::RetentionStore,
};

/// x2telegram - forward new posts from X accounts to Telegram
#[derive(Parser, Debug)]
#[command(
    name = "x2telegram",
    version,
    about = "Polls Nitter mirrors for new posts and forwards them to Telegram"
)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "data/config.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch, analyze and deliver new posts for every enabled account
    Run,

    /// Follow an account
    Add { handle: String },

    /// Stop following an account and drop its cached posts
    Remove { handle: String },

    /// Resume polling an account
    Enable { handle: String },

    /// Pause polling an account without dropping its cached posts
    Disable { handle: String },

    /// List followed accounts
    List {
        /// Include disabled accounts
        #[arg(long)]
        all: bool,
    },

    /// Prune every account down to the retention window
    Maintenance,

    /// Validate the configuration
    Validate,
}

/// Initialize logging from the verbosity flag or the configured level.
fn init_logging(verbose: bool, level: &str) {
    let level = if verbose { "debug" } else { level };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

fn print_sources(sources: &[Source]) {
    if sources.is_empty() {
        println!("No accounts followed.");
        return;
    }

    let width = sources
        .iter()
        .map(|s| s.handle.len() + 1)
        .max()
        .unwrap_or(0)
        .max("Handle".len());

    println!("{:<6} {:<width$} {}", "ID", "Handle", "Status");
    println!("{}", "-".repeat(6 + 1 + width + 1 + "Disabled".len()));
    for source in sources {
        println!(
            "{:<6} {:<width$} {}",
            source.id,
            format!("@{}", source.handle),
            source.status_label()
        );
    }
}

fn not_found(handle: &str) -> AppError {
    AppError::validation(format!("account @{} is not followed", handle))
}

fn set_enabled(store: &RetentionStore, handle: &str, enabled: bool) -> Result<()> {
    let handle = Source::normalize_handle(handle)?;
    if !store.set_enabled(&handle, enabled)? {
        return Err(not_found(&handle));
    }
    let state = if enabled { "Enabled" } else { "Disabled" };
    println!("{} @{}", state, handle);
    Ok(())
}

async fn execute(command: Command, config: &Config) -> Result<()> {
    let open_store = || RetentionStore::open(&config.database_path, config.processing.keep_count);

    match command {
        Command::Run => {
            config.validate()?;
            let stats = pipeline::run_pipeline(config).await?;
            log::info!(
                "Delivered {} new and {} pending posts",
                stats.delivered,
                stats.pending_delivered
            );
        }

        Command::Add { handle } => {
            let handle = Source::normalize_handle(&handle)?;
            match open_store()?.add_source(&handle)? {
                Some(source) => println!("Now following {}", source),
                None => {
                    return Err(AppError::validation(format!(
                        "account @{} is already followed",
                        handle
                    )));
                }
            }
        }

        Command::Remove { handle } => {
            let handle = Source::normalize_handle(&handle)?;
            if !open_store()?.remove_source(&handle)? {
                return Err(not_found(&handle));
            }
            println!("Stopped following @{}", handle);
        }

        Command::Enable { handle } => set_enabled(&open_store()?, &handle, true)?,

        Command::Disable { handle } => set_enabled(&open_store()?, &handle, false)?,

        Command::List { all } => {
            let sources = open_store()?.list_sources(!all)?;
            print_sources(&sources);
        }

        Command::Maintenance => {
            let pruned = open_store()?.run_maintenance()?;
            println!("Pruned {} cached posts", pruned);
        }

        Command::Validate => {
            log::info!("Validating configuration...");
            config.validate()?;
            log::info!("✓ Config OK ({} mirrors)", config.scraper.mirrors.len());
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();

    let loaded = Config::load(&cli.config);
    let mut config = match &loaded {
        Ok(config) => config.clone(),
        Err(_) => Config::default(),
    };
    config.apply_env();
    init_logging(cli.verbose, &config.logging.level);

    match &loaded {
        Ok(_) => log::info!("Loaded configuration from {}", cli.config.display()),
        Err(e) => log::warn!(
            "Config load failed from {}: {}. Using defaults.",
            cli.config.display(),
            e
        ),
    }

    match execute(cli.command, &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
