//! # CivicTask Admin
//!
//! Operator CLI for the CivicTask database: schema migrations, category
//! seeding, moderation, read-only listings, and the operations that need the
//! configured collaborators (media storage, SMS, webhook and session
//! verification). Output is JSON on stdout, logs go to stderr.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p civictask-admin -- migrate
//! cargo run -p civictask-admin -- user block 6f1c...
//! cargo run -p civictask-admin -- tasks --page 2 --per-page 50
//! cargo run -p civictask-admin -- create-task --owner 6f1c... task.json --notify-within-km 10
//! ```

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::json;
use sqlx::PgPool;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use civictask_shared::auth::identity::authenticate;
use civictask_shared::auth::jwt::JwtVerifier;
use civictask_shared::auth::webhook::{ingest_user_event, IngestOutcome, SvixVerifier, WebhookHeaders};
use civictask_shared::config::{AppConfig, LogFormat};
use civictask_shared::db::migrations::{ensure_database_exists, get_migration_status, run_migrations};
use civictask_shared::db::pagination::Pagination;
use civictask_shared::db::pool::{close_pool, create_pool};
use civictask_shared::services::categories::{seed_categories, DEFAULT_CATEGORIES};
use civictask_shared::notifications::TwilioSms;
use civictask_shared::services::moderation::ModerationAction;
use civictask_shared::services::nearby::notify_nearby_users;
use civictask_shared::services::skills::fetch_skills;
use civictask_shared::services::tasks::{
    apply_action_to_task, create_task_in_transaction, fetch_task_by_id, list_tasks_for_admin,
    CreateTaskInput,
};
use civictask_shared::services::users::{apply_action_to_user, fetch_users_for_admin};

#[derive(Parser)]
#[command(name = "civictask-admin")]
#[command(about = "Administer the CivicTask database")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database if needed and apply pending migrations
    Migrate,
    /// Show applied and available migrations
    Status,
    /// Insert the default categories, skipping existing names
    SeedCategories,
    /// Block or unblock a user
    User {
        /// block | unblock
        action: ModerationAction,
        id: Uuid,
    },
    /// Block or unblock a task
    Task {
        /// block | unblock
        action: ModerationAction,
        id: Uuid,
    },
    /// List users, newest first
    Users(PageArgs),
    /// List tasks, including blocked ones
    Tasks(PageArgs),
    /// List distinct required skills
    Skills,
    /// Create a task from a JSON file, uploading its data-URI media
    CreateTask {
        #[arg(long)]
        owner: Uuid,

        input: PathBuf,

        /// Text users living within this many kilometres afterwards
        #[arg(long)]
        notify_within_km: Option<f64>,
    },
    /// Text users living near a task
    NotifyNearby {
        id: Uuid,

        #[arg(long, default_value_t = 10.0)]
        distance_km: f64,
    },
    /// Verify and apply a saved user-event delivery
    IngestEvent {
        #[arg(long)]
        svix_id: String,

        #[arg(long)]
        svix_timestamp: String,

        #[arg(long)]
        svix_signature: String,

        body: PathBuf,
    },
    /// Resolve the user behind a session token
    Whoami { token: String },
}

#[derive(clap::Args)]
struct PageArgs {
    #[arg(long, default_value_t = 1)]
    page: i64,

    #[arg(long, default_value_t = 25)]
    per_page: i64,
}

impl PageArgs {
    fn pagination(&self) -> Pagination {
        Pagination::new(self.page, self.per_page)
    }
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "civictask_admin=info,civictask_shared=info".into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
}

fn sms_sender(config: &AppConfig) -> anyhow::Result<TwilioSms> {
    config
        .sms_sender()
        .context("SMS is not configured; set the TWILIO_* variables")
}

fn webhook_verifier(config: &AppConfig) -> anyhow::Result<SvixVerifier> {
    config
        .webhook_verifier()?
        .context("CLERK_WEBHOOK_SECRET is not set")
}

fn identity_verifier(config: &AppConfig) -> anyhow::Result<JwtVerifier> {
    config
        .identity_verifier()?
        .context("Neither CLERK_JWT_KEY nor SESSION_JWT_SECRET is set")
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::from_env().context("Failed to load configuration")?;
    init_tracing(config.log_format);

    tracing::info!("CivicTask Admin v{}", env!("CARGO_PKG_VERSION"));

    if matches!(cli.command, Commands::Migrate) {
        ensure_database_exists(&config.database.url)
            .await
            .context("Failed to create database")?;
    }

    let pool = create_pool(config.database.clone())
        .await
        .context("Failed to connect to database")?;

    let result = run(cli.command, &config, &pool).await;
    close_pool(pool).await;
    result
}

async fn run(command: Commands, config: &AppConfig, pool: &PgPool) -> anyhow::Result<()> {
    match command {
        Commands::Migrate => {
            run_migrations(pool).await?;
            let status = get_migration_status(pool).await?;
            print_json(&json!({
                "applied": status.applied_migrations,
                "latest_version": status.latest_version,
            }))
        }
        Commands::Status => {
            let status = get_migration_status(pool).await?;
            print_json(&json!({
                "applied": status.applied_migrations,
                "available": status.available_migrations,
                "latest_version": status.latest_version,
                "up_to_date": status.is_up_to_date,
            }))
        }
        Commands::SeedCategories => {
            let mut conn = pool.acquire().await?;
            let inserted = seed_categories(&mut conn, &DEFAULT_CATEGORIES).await?;
            tracing::info!(inserted = inserted.len(), "Categories seeded");
            print_json(&inserted)
        }
        Commands::User { action, id } => {
            let mut conn = pool.acquire().await?;
            let user = apply_action_to_user(&mut conn, id, action).await?;
            print_json(&user)
        }
        Commands::Task { action, id } => {
            let mut conn = pool.acquire().await?;
            let task = apply_action_to_task(&mut conn, id, action).await?;
            print_json(&task)
        }
        Commands::Users(args) => {
            let mut conn = pool.acquire().await?;
            print_json(&fetch_users_for_admin(&mut conn, args.pagination()).await?)
        }
        Commands::Tasks(args) => {
            let mut conn = pool.acquire().await?;
            print_json(&list_tasks_for_admin(&mut conn, args.pagination()).await?)
        }
        Commands::Skills => {
            let mut conn = pool.acquire().await?;
            print_json(&fetch_skills(&mut conn).await?)
        }
        Commands::CreateTask {
            owner,
            input,
            notify_within_km,
        } => {
            // Fail on missing SMS settings before anything is written
            let sms = notify_within_km.map(|_| sms_sender(config)).transpose()?;

            let raw = tokio::fs::read_to_string(&input)
                .await
                .with_context(|| format!("Failed to read {}", input.display()))?;
            let task_input: CreateTaskInput =
                serde_json::from_str(&raw).context("Invalid task description")?;

            let task = create_task_in_transaction(pool, config.object_storage(), owner, task_input).await?;

            if let (Some(sms), Some(distance_km)) = (sms, notify_within_km) {
                let mut conn = pool.acquire().await?;
                notify_nearby_users(&mut conn, &sms, &task, distance_km).await?;
            }
            print_json(&task)
        }
        Commands::NotifyNearby { id, distance_km } => {
            let sms = sms_sender(config)?;
            let mut conn = pool.acquire().await?;
            let task = fetch_task_by_id(&mut conn, id, &[]).await?;
            let sent = notify_nearby_users(&mut conn, &sms, &task, distance_km).await?;
            print_json(&json!({ "task_id": id, "sent": sent }))
        }
        Commands::IngestEvent {
            svix_id,
            svix_timestamp,
            svix_signature,
            body,
        } => {
            let verifier = webhook_verifier(config)?;
            let payload = tokio::fs::read(&body)
                .await
                .with_context(|| format!("Failed to read {}", body.display()))?;
            let headers = WebhookHeaders {
                id: svix_id,
                timestamp: svix_timestamp,
                signature: svix_signature,
            };

            let mut conn = pool.acquire().await?;
            match ingest_user_event(&mut conn, &verifier, &headers, &payload).await? {
                IngestOutcome::Created(user) => print_json(&json!({ "outcome": "created", "user": user })),
                IngestOutcome::Ignored(event_type) => {
                    print_json(&json!({ "outcome": "ignored", "type": event_type }))
                }
            }
        }
        Commands::Whoami { token } => {
            let verifier = identity_verifier(config)?;
            let mut conn = pool.acquire().await?;
            print_json(&authenticate(&mut conn, &verifier, &token).await?)
        }
    }
}
