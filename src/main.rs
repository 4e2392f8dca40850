//! # wg-radar CLI (`wgr`)
//!
//! Ingests working-group activity (meeting notes, recordings, chat) and
//! produces LLM-curated intelligence digests per time window.
//!
//! | Command | Description |
//! |---------|-------------|
//! | `wgr report` | Fetch all sources, analyze, and write the digest |
//! | `wgr fetch` | Fetch sources into the local cache only |
//! | `wgr list-groups` | List cached working groups |
//! | `wgr chat-login` | Interactive browser login to the chat service |
//! | `wgr chat-status` | Validate stored chat credentials |
//! | `wgr context show\|set\|clear` | Manage the custom scoring context |
//!
//! Exit codes for `report`: 0 success, 1 partial failure (some sources
//! failed but a report was written), 2 fatal (nothing written), 3
//! configuration error.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use wg_radar::chat_auth;
use wg_radar::config::{self, Config};
use wg_radar::context;
use wg_radar::pipeline::Pipeline;
use wg_radar::store::Store;

const EXIT_PARTIAL: i32 = 1;
const EXIT_FATAL: i32 = 2;
const EXIT_CONFIG: i32 = 3;

/// Working-group intelligence reports.
#[derive(Parser)]
#[command(
    name = "wgr",
    about = "Working-group intelligence reports: ingest notes, recordings, and chat; analyze with an LLM; emit digests",
    version
)]
struct Cli {
    /// Path to a TOML configuration file (defaults to ./wg-radar.toml when
    /// present).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Commands,
}

/// Flag overrides applied on top of the config file.
#[derive(Args)]
struct Overrides {
    /// How far back to look (e.g. 7d, 2w, 1m, 36h).
    #[arg(long, global = true)]
    lookback: Option<String>,

    /// Comma-separated group names to process.
    #[arg(long, global = true, value_delimiter = ',')]
    groups: Vec<String>,

    /// Output directory for reports.
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,

    /// Report format: markdown or json.
    #[arg(long, global = true)]
    format: Option<String>,

    /// SQLite database path (:memory: for ephemeral).
    #[arg(long, global = true)]
    db_path: Option<String>,

    /// Number of concurrent workers.
    #[arg(long, global = true)]
    workers: Option<usize>,

    /// Skip meeting-notes fetching.
    #[arg(long, global = true)]
    skip_notes: bool,

    /// Skip recording-transcript fetching.
    #[arg(long, global = true)]
    skip_videos: bool,

    /// Skip chat fetching.
    #[arg(long, global = true)]
    skip_chat: bool,

    /// Analyze cached data only; fetch nothing.
    #[arg(long, global = true)]
    offline: bool,

    /// Custom context file for relevance scoring.
    #[arg(long, global = true)]
    context_file: Option<PathBuf>,

    /// Verbose logging.
    #[arg(long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch all sources, run the analysis chain, and write the digest.
    Report,

    /// Fetch sources into the local cache without analyzing.
    Fetch,

    /// List the working groups currently in the cache.
    ListGroups,

    /// Log in to the chat service interactively and save credentials.
    ChatLogin,

    /// Validate the stored chat credentials.
    ChatStatus,

    /// Manage the custom context appended to the scoring prompt.
    Context {
        #[command(subcommand)]
        action: ContextAction,
    },
}

#[derive(Subcommand)]
enum ContextAction {
    /// Print the current custom context.
    Show,
    /// Replace the custom context with the given text.
    Set {
        /// The context text.
        text: Vec<String>,
    },
    /// Delete the custom context file.
    Clear,
}

fn apply_overrides(config: &mut Config, overrides: &Overrides) {
    if let Some(lookback) = &overrides.lookback {
        config.lookback = lookback.clone();
    }
    if !overrides.groups.is_empty() {
        config.groups = overrides.groups.clone();
    }
    if let Some(output_dir) = &overrides.output_dir {
        config.output_dir = output_dir.clone();
    }
    if let Some(format) = &overrides.format {
        config.format = format.clone();
    }
    if let Some(db_path) = &overrides.db_path {
        config.db_path = db_path.clone();
    }
    if let Some(workers) = overrides.workers {
        config.workers = workers;
    }
    if overrides.skip_notes {
        config.skip_notes = true;
    }
    if overrides.skip_videos {
        config.skip_videos = true;
    }
    if overrides.skip_chat {
        config.skip_chat = true;
    }
    if overrides.offline {
        config.offline = true;
    }
    if let Some(context_file) = &overrides.context_file {
        config.context_file = context_file.clone();
    }
    if overrides.verbose {
        config.verbose = true;
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut cfg = match config::load_config(cli.config.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {e:#}");
            std::process::exit(EXIT_CONFIG);
        }
    };
    apply_overrides(&mut cfg, &cli.overrides);
    init_tracing(cfg.verbose);

    let code = match cli.command {
        Commands::Report => run_report(cfg).await,
        Commands::Fetch => run_fetch(cfg).await,
        Commands::ListGroups => run_list_groups(cfg).await,
        Commands::ChatLogin => run_chat_login(cfg).await,
        Commands::ChatStatus => run_chat_status(cfg).await,
        Commands::Context { action } => run_context(cfg, action),
    };
    std::process::exit(code);
}

/// Cancel the pipeline on Ctrl-C; a second Ctrl-C kills the process.
fn install_interrupt_handler(pipeline: &Pipeline) {
    let cancel = pipeline.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; cancelling in-flight work");
            cancel.cancel();
        }
    });
}

async fn run_report(cfg: Config) -> i32 {
    if let Err(e) = cfg.validate() {
        eprintln!("Configuration error: {e:#}");
        return EXIT_CONFIG;
    }

    let offline = cfg.offline;
    let pipeline = match Pipeline::new(cfg).await {
        Ok(pipeline) => pipeline,
        Err(e) => {
            eprintln!("Fatal error: failed to create pipeline: {e:#}");
            return EXIT_FATAL;
        }
    };
    install_interrupt_handler(&pipeline);

    let result = if offline {
        pipeline.analyze_only().await
    } else {
        pipeline.run().await
    };

    let failures = pipeline.failure_count();
    pipeline.close().await;

    match result {
        Ok(()) if failures > 0 => {
            eprintln!("Report written with {} source failure(s); see the processing-stats table", failures);
            EXIT_PARTIAL
        }
        Ok(()) => 0,
        Err(e) => {
            eprintln!("Fatal error: {e:#}");
            EXIT_FATAL
        }
    }
}

async fn run_fetch(cfg: Config) -> i32 {
    if let Err(e) = cfg.validate() {
        eprintln!("Configuration error: {e:#}");
        return EXIT_CONFIG;
    }

    let pipeline = match Pipeline::new(cfg).await {
        Ok(pipeline) => pipeline,
        Err(e) => {
            eprintln!("Fatal error: failed to create pipeline: {e:#}");
            return EXIT_FATAL;
        }
    };
    install_interrupt_handler(&pipeline);

    let result = pipeline.fetch_only().await;
    let failures = pipeline.failure_count();
    pipeline.close().await;

    match result {
        Ok(()) if failures > 0 => EXIT_PARTIAL,
        Ok(()) => 0,
        Err(e) => {
            eprintln!("Fatal error: {e:#}");
            EXIT_FATAL
        }
    }
}

async fn run_list_groups(cfg: Config) -> i32 {
    let store = match Store::open(&cfg.db_path).await {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Fatal error: {e:#}");
            return EXIT_FATAL;
        }
    };

    let groups = match store.list_groups(&[]).await {
        Ok(groups) => groups,
        Err(e) => {
            eprintln!("Fatal error: {e:#}");
            store.close().await;
            return EXIT_FATAL;
        }
    };
    store.close().await;

    if groups.is_empty() {
        println!("No groups cached yet. Run `wgr fetch` first.");
        return 0;
    }

    println!("{:<42} {:<16} {:<6} {:<6} {}", "GROUP", "CATEGORY", "NOTES", "CHAT", "MEETING");
    for group in &groups {
        println!(
            "{:<42} {:<16} {:<6} {:<6} {}",
            group.id,
            group.category,
            if group.notes_doc_id.is_empty() { "-" } else { "yes" },
            if group.channel_id.is_empty() { "-" } else { "yes" },
            group.meeting_time,
        );
    }
    println!("\n{} groups", groups.len());
    0
}

async fn run_chat_login(cfg: Config) -> i32 {
    match chat_auth::login(
        &cfg.endpoints.chat_workspace_url,
        &cfg.endpoints.chat_api_base,
        &cfg.chat.credentials_file,
    )
    .await
    {
        Ok(()) => {
            println!("Chat credentials saved.");
            0
        }
        Err(e) => {
            eprintln!("Login failed: {e:#}");
            EXIT_FATAL
        }
    }
}

async fn run_chat_status(cfg: Config) -> i32 {
    let creds = match chat_auth::load_credentials(&cfg.chat.credentials_file) {
        Ok(Some(creds)) => creds,
        Ok(None) => {
            println!("Not logged in. Run `wgr chat-login` first.");
            return 0;
        }
        Err(e) => {
            eprintln!("Error reading credentials: {e:#}");
            return EXIT_FATAL;
        }
    };

    let mut creds = creds;
    match chat_auth::validate_credentials(&cfg.endpoints.chat_api_base, &mut creds).await {
        Ok(()) => {
            println!(
                "Logged in as {} on team {} (saved {})",
                creds.user_name, creds.team_name, creds.saved_at
            );
            0
        }
        Err(e) => {
            eprintln!("Stored credentials are invalid: {e:#}");
            eprintln!("Run `wgr chat-login` to refresh them.");
            EXIT_PARTIAL
        }
    }
}

fn run_context(cfg: Config, action: ContextAction) -> i32 {
    let result = match action {
        ContextAction::Show => match context::load_custom_context(&cfg.context_file) {
            Ok(content) if content.is_empty() => {
                println!("(no custom context set)");
                Ok(())
            }
            Ok(content) => {
                println!("{}", content);
                Ok(())
            }
            Err(e) => Err(e),
        },
        ContextAction::Set { text } => {
            let content = text.join(" ");
            context::save_custom_context(&cfg.context_file, &content).map(|()| {
                println!("Custom context saved to {}", cfg.context_file.display());
            })
        }
        ContextAction::Clear => context::clear_custom_context(&cfg.context_file).map(|()| {
            println!("Custom context cleared.");
        }),
    };

    match result {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("Error: {e:#}");
            EXIT_FATAL
        }
    }
}
