mod api;
mod config;
mod http;

use std::{net::IpAddr, sync::Arc};

use anyhow::Result;
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use crm::email::Mailer;
use migration::{Migrator, MigratorTrait};
use platform_db::{DatabaseSettings, DbPool, connect};
use platform_obs::{ObsConfig, init_tracing, shutdown_tracing};
use tracing::info;

use crate::{
    config::AppConfig,
    http::{AppState, ServeConfig},
};

#[derive(Parser, Debug)]
#[command(name = "leadline", version, about = "Leadline sales CRM")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the REST API.
    Serve(ServeCommand),
    /// Run database migrations.
    #[command(subcommand)]
    Migrate(MigrateCommand),
    /// Insert demo templates and leads into an empty database.
    Seed,
    /// Send scheduled emails that are due.
    #[command(name = "sweep-emails")]
    SweepEmails,
    /// Create follow-up tasks for stale leads.
    Reminders,
}

#[derive(Subcommand, Debug)]
enum MigrateCommand {
    /// Apply pending migrations.
    Up,
    /// Roll back the most recent migration.
    Down,
    /// Roll back everything and apply again.
    Reset,
}

#[derive(Args, Debug)]
struct ServeCommand {
    /// Overrides `HOST`.
    #[arg(long)]
    host: Option<IpAddr>,
    /// Overrides `PORT`.
    #[arg(long)]
    port: Option<u16>,
    #[arg(long, help = "Allow starting even when migrations are pending")]
    allow_dirty: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing(ObsConfig::default())?;
    let cli = Cli::parse();
    let config = AppConfig::load()?;
    let result = match cli.command {
        Command::Serve(cmd) => run_server(cmd, config).await,
        Command::Migrate(action) => migrate(action).await,
        Command::Seed => run_seed().await,
        Command::SweepEmails => sweep_emails(&config).await,
        Command::Reminders => run_reminders().await,
    };
    shutdown_tracing();
    result
}

async fn setup_pool() -> Result<DbPool> {
    let settings = DatabaseSettings::from_env()?;
    Ok(connect(&settings).await?)
}

async fn run_server(cmd: ServeCommand, config: AppConfig) -> Result<()> {
    let pool = setup_pool().await?;
    ensure_migrations(&pool, cmd.allow_dirty).await?;
    let serve = ServeConfig::new(
        cmd.host.unwrap_or(config.host),
        cmd.port.unwrap_or(config.port),
    );
    let mailer = Mailer::new(config.email.clone())?;
    if !mailer.is_configured() {
        info!("RESEND_API_KEY not set; email endpoints will answer 503");
    }
    let state = AppState {
        pool,
        mailer,
        config: Arc::new(config),
    };
    http::serve(serve, state).await
}

async fn ensure_migrations(pool: &DbPool, allow_dirty: bool) -> Result<()> {
    let pending = Migrator::get_pending_migrations(pool).await?;
    if !pending.is_empty() && !allow_dirty {
        anyhow::bail!(
            "pending migrations detected; run `leadline migrate up` or pass --allow-dirty"
        );
    }
    Ok(())
}

async fn migrate(action: MigrateCommand) -> Result<()> {
    let pool = setup_pool().await?;
    match action {
        MigrateCommand::Up => {
            Migrator::up(&pool, None).await?;
            info!("database migrations applied");
        }
        MigrateCommand::Down => {
            Migrator::down(&pool, Some(1)).await?;
            info!("most recent migration rolled back");
        }
        MigrateCommand::Reset => {
            Migrator::refresh(&pool).await?;
            info!("database reset");
        }
    }
    Ok(())
}

async fn run_seed() -> Result<()> {
    let pool = setup_pool().await?;
    let report = crm::seed::seed_demo(&pool, Utc::now()).await?;
    info!(templates = report.templates, leads = report.leads, "seed finished");
    Ok(())
}

async fn sweep_emails(config: &AppConfig) -> Result<()> {
    let pool = setup_pool().await?;
    let mailer = Mailer::new(config.email.clone())?;
    let report = crm::email::process_scheduled(&pool, &mailer, Utc::now()).await?;
    info!(
        due = report.due,
        sent = report.sent,
        failed = report.failed,
        cancelled = report.cancelled,
        errored = report.errored,
        "email sweep finished"
    );
    Ok(())
}

async fn run_reminders() -> Result<()> {
    let pool = setup_pool().await?;
    let run = crm::tasks::generate_reminders(&pool, Utc::now()).await?;
    info!(checked = run.checked, created = run.created.len(), "reminders generated");
    Ok(())
}
