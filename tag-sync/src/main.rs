use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use reconcile::ReconcileOptions;
use std::path::PathBuf;
use std::sync::Arc;
use tag_sync::{SyncScheduler, TagSyncConfig, TagSyncService};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(
    name = "tag-sync",
    author,
    version,
    about = "Mirror WeChat official-account tags into Postgres"
)]
struct Cli {
    /// TOML configuration file; environment variables are used when absent
    #[arg(long, global = true, env = "TAG_SYNC_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Reconcile one account, or every configured account")]
    Sync(SyncArgs),

    #[command(about = "Show what a sync would change without applying it")]
    Plan(PlanArgs),

    #[command(about = "Run scheduled syncs until interrupted")]
    Serve,

    #[command(about = "Create the wx_gzh_tag table and indexes")]
    Migrate
}

#[derive(Args)]
struct SyncArgs {
    /// Official account to sync; all configured accounts when omitted
    #[arg(long)]
    app_id: Option<String>,

    /// Compute the plan without writing
    #[arg(long)]
    dry_run: bool,

    /// Confirm that an empty remote tag list may delete every local tag
    #[arg(long)]
    allow_full_wipe: bool
}

#[derive(Args)]
struct PlanArgs {
    #[arg(long)]
    app_id: String
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => TagSyncConfig::from_file(path)?,
        None => TagSyncConfig::from_env()?
    };

    match cli.command {
        Commands::Sync(args) => sync(config, args).await,
        Commands::Plan(args) => plan(config, args).await,
        Commands::Serve => serve(config).await,
        Commands::Migrate => migrate(config).await
    }
}

async fn sync(config: TagSyncConfig, args: SyncArgs) -> Result<()> {
    let service = TagSyncService::connect(config).await?;
    let options = ReconcileOptions {
        dry_run: args.dry_run,
        allow_full_wipe: args.allow_full_wipe
    };

    match args.app_id {
        Some(app_id) => {
            let result = service.sync(&app_id, options).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            if !result.is_success() {
                bail!("sync of {} finished with apply errors", app_id);
            }
        }
        None => {
            let summary = service.sync_all(options).await;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            if summary.has_errors() {
                bail!("one or more accounts failed to sync");
            }
        }
    }
    Ok(())
}

async fn plan(config: TagSyncConfig, args: PlanArgs) -> Result<()> {
    let service = TagSyncService::connect(config).await?;
    let plan = service.plan(&args.app_id).await?;
    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(())
}

async fn serve(config: TagSyncConfig) -> Result<()> {
    let service = Arc::new(TagSyncService::connect(config).await?);
    let mut scheduler = SyncScheduler::new(service).await?;

    let summary = scheduler.run_all(ReconcileOptions::default()).await;
    info!(
        accounts = summary.accounts.len(),
        failed = summary.has_errors(),
        "Initial tag sync finished"
    );

    scheduler.start().await?;
    if let Some(next) = scheduler.next_run().await? {
        info!(next_run = %next, "Next scheduled tag sync");
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    scheduler.stop().await?;
    Ok(())
}

async fn migrate(config: TagSyncConfig) -> Result<()> {
    let store = TagSyncService::connect_store(&config).await?;
    store.migrate().await?;
    Ok(())
}
