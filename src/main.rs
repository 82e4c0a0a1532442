//! # Bugwarden — polling triage automation
//!
//! Usage:
//!   bugwarden run                      # Scheduler + optional callback server
//!   bugwarden once new-bugs            # Run one workflow or escalation now
//!   bugwarden check                    # Validate config, show next fire times
//!   bugwarden expand group:triage      # Print a flattened group
//!   bugwarden cursors new-bugs/        # Dump stored cursors

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bugwarden_channels::{ActionDispatcher, ActionHandler, interactions_router};
use bugwarden_core::cancel::{CancelHandle, CancelSignal};
use bugwarden_core::config::BugwardenConfig;
use bugwarden_scheduler::{SchedulerEngine, spawn_scheduler};
use bugwarden_store::{CacheStore, open_cursor_store};
use bugwarden_triage::{ClaimHandler, TriageContext};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "bugwarden",
    version,
    about = "🐞 Bugwarden — polling triage automation for pull-only issue trackers"
)]
struct Cli {
    /// Config file (default: ~/.bugwarden/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the scheduler until Ctrl-C
    Run,
    /// Run a single workflow or escalation immediately
    Once { name: String },
    /// Validate the config and print each job's next firing
    Check,
    /// Print the members a group token expands to
    Expand { token: String },
    /// List stored cursors, optionally under a key prefix
    Cursors {
        #[arg(default_value = "")]
        prefix: String,
    },
}

/// Opened stores and assembled collaborators.
struct Runtime {
    cache: Arc<CacheStore>,
    ctx: TriageContext,
}

impl Runtime {
    fn open(config: &BugwardenConfig) -> Result<Self> {
        let data_dir = data_dir(config);
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("creating {}", data_dir.display()))?;

        let cache = Arc::new(CacheStore::open(&data_dir.join("cache.redb"))?);
        let cursors = open_cursor_store(&config.store.cursor_backend, &data_dir)?;
        let tracker = bugwarden_tracker::tracker_from_config(config, cache.clone())?;
        let chat = bugwarden_channels::chat_from_config(config)?;
        Ok(Self {
            cache,
            ctx: TriageContext::new(config, tracker, chat, cursors),
        })
    }

    /// Drop every collaborator, then close the cache file.
    fn close(self) {
        let Self { cache, ctx } = self;
        drop(ctx);
        match Arc::try_unwrap(cache) {
            Ok(cache) => cache.close(),
            Err(_) => tracing::warn!("⚠️ Cache still referenced at shutdown"),
        }
    }
}

fn data_dir(config: &BugwardenConfig) -> PathBuf {
    PathBuf::from(shellexpand::tilde(&config.store.data_dir).to_string())
}

fn load_config(path: Option<&Path>) -> Result<BugwardenConfig> {
    let config = match path {
        Some(p) => BugwardenConfig::load_from(p)?,
        None => BugwardenConfig::load()?,
    };
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "bugwarden=debug,tower_http=debug"
    } else {
        "bugwarden=info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    if cli.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    }

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Run => run(&config).await,
        Command::Once { name } => once(&config, &name).await,
        Command::Check => check(&config),
        Command::Expand { token } => {
            for member in bugwarden_triage::resolve(&config.groups, &[token]) {
                println!("{member}");
            }
            Ok(())
        }
        Command::Cursors { prefix } => {
            let store = open_cursor_store(&config.store.cursor_backend, &data_dir(&config))?;
            for (key, value) in store.list(&prefix)? {
                println!("{key} = {value}");
            }
            Ok(())
        }
    }
}

async fn run(config: &BugwardenConfig) -> Result<()> {
    let runtime = Runtime::open(config)?;
    let (handle, signal) = CancelHandle::new();

    let mut engine = SchedulerEngine::new(handle.signal());
    for job in bugwarden_triage::build_jobs(config, &runtime.ctx, chrono::Utc::now())? {
        engine.add_job(job);
    }

    let server = if config.server.enabled {
        Some(start_server(config, &runtime.ctx, handle.signal()).await?)
    } else {
        None
    };

    println!("🐞 Bugwarden v{}", env!("CARGO_PKG_VERSION"));
    println!("   📅 Jobs:     {}", engine.jobs().len());
    println!("   🗄️  Data Dir: {}", data_dir(config).display());
    if config.staging.enabled {
        println!("   🧪 Staging:  on");
    }
    println!();

    let scheduler = tokio::spawn(spawn_scheduler(engine, config.scheduler.tick_secs, signal));

    tokio::signal::ctrl_c().await?;
    tracing::info!("🛑 Ctrl-C received, shutting down");
    handle.cancel();

    scheduler.await?;
    if let Some((server, worker)) = server {
        server.await??;
        // The worker finishes queued actions once the router is gone.
        if tokio::time::timeout(Duration::from_secs(config.chat.action_timeout_secs), worker)
            .await
            .is_err()
        {
            tracing::warn!("⚠️ Pending chat actions abandoned");
        }
    }

    runtime.close();
    Ok(())
}

type ServerTasks = (
    tokio::task::JoinHandle<std::io::Result<()>>,
    tokio::task::JoinHandle<()>,
);

/// Interactive callback listener with the claim handler behind it.
async fn start_server(
    config: &BugwardenConfig,
    ctx: &TriageContext,
    mut shutdown: CancelSignal,
) -> Result<ServerTasks> {
    let handlers: Vec<Arc<dyn ActionHandler>> = vec![Arc::new(ClaimHandler::new(
        ctx.tracker.clone(),
        config.chat.users.clone(),
    ))];
    let (dispatcher, worker) = ActionDispatcher::spawn(
        ctx.chat.clone(),
        handlers,
        Duration::from_secs(config.chat.action_timeout_secs),
    );
    let app = interactions_router(dispatcher, &config.chat.signing_secret);

    let listener = tokio::net::TcpListener::bind(&config.server.listen)
        .await
        .with_context(|| format!("binding {}", config.server.listen))?;
    tracing::info!("🌐 Callback server listening on {}", config.server.listen);

    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
    });
    Ok((server, worker))
}

async fn once(config: &BugwardenConfig, name: &str) -> Result<()> {
    let runtime = Runtime::open(config)?;
    let job = bugwarden_triage::find_job(config, &runtime.ctx, name)?;
    let (handle, signal) = CancelHandle::new();

    // Ctrl-C stops the run before side effects, without a cursor commit.
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handle.cancel();
        }
    });
    let outcome = job.run(signal).await;
    interrupt.abort();
    drop(job);
    runtime.close();

    let report = outcome?;
    println!("✅ {}", report.job);
    println!("   Candidates: {}", report.candidates);
    println!("   Changes:    {}", report.changes);
    println!("   Applied:    {}", report.applied);
    println!("   Cursor:     {}", if report.cursor_committed { "committed" } else { "-" });
    Ok(())
}

fn check(config: &BugwardenConfig) -> Result<()> {
    // Parsing already validated the structure; this also parses every
    // cron expression.
    let runtime = Runtime::open(config)?;
    let now = chrono::Utc::now();
    let jobs = bugwarden_triage::build_jobs(config, &runtime.ctx, now)?;

    println!("✅ Config OK: {} job(s)", jobs.len());
    for job in &jobs {
        let next = match (job.enabled, job.next_run) {
            (false, _) => "disabled".to_string(),
            (true, Some(t)) => t.to_rfc3339(),
            (true, None) => "never".to_string(),
        };
        println!("   {:<24} {next}", job.name());
    }
    drop(jobs);
    runtime.close();
    Ok(())
}
