use anyhow::Result;
use clap::{Parser, Subcommand};
use std::fs;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

use catchlens::admission::{QuotaConfig, QuotaEvaluator};
use catchlens::gateway::{Gateway, GatewayConfig};
use catchlens::storage::keys::{KeyStatus, NewProviderKey};
use catchlens::storage::{
    init_db, KeyPool, SqliteKeyPool, SqliteSubscriptionStore, SqliteUsageLedger,
};
use catchlens::utils::logger;
use catchlens::vision::http::VisionConfig;
use catchlens::vision::HttpVisionClient;
use catchlens::{init_env, web, AppContext, IP_REQUESTS_PER_MINUTE, LOG_DIR, SQLITE_PATH};

#[derive(Parser)]
#[command(
    name = "catchlens",
    about = "Admission-controlled gateway for AI image analysis"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the gateway server
    Serve {
        #[arg(long, default_value_t = 7200)]
        port: u16,
    },
    /// Manage the provider credential pool
    Keys {
        #[command(subcommand)]
        action: KeysAction,
    },
}

#[derive(Subcommand)]
enum KeysAction {
    /// Add a credential to the pool
    Add {
        /// gemini, openai or anthropic
        #[arg(long)]
        provider: String,
        /// system (shared pool) or user
        #[arg(long, default_value = "system")]
        scope: String,
        /// Owning user id, required for user-scoped keys
        #[arg(long)]
        owner: Option<String>,
        #[arg(long)]
        secret: String,
        #[arg(long, default_value_t = 1000)]
        daily_limit: i64,
    },
    /// List credentials and their usage
    List,
    /// Take a credential out of rotation
    Disable { id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_env();
    let cli = Cli::parse();

    fs::create_dir_all("./gateway_data")?;

    match cli.command.unwrap_or(Command::Serve { port: 7200 }) {
        Command::Serve { port } => serve(port).await,
        Command::Keys { action } => keys(action).await,
    }
}

async fn serve(port: u16) -> Result<()> {
    let _guard = logger::init(LOG_DIR.clone())?;

    info!("Starting analysis gateway...");

    info!("Initializing Storage...");
    let db = init_db(&SQLITE_PATH).await?;
    let key_pool = Arc::new(SqliteKeyPool::new(db.clone()).await?);
    let ledger = Arc::new(SqliteUsageLedger::new(db.clone()).await?);
    let subscriptions = Arc::new(SqliteSubscriptionStore::new(db).await?);

    info!("Initializing Quota Evaluator...");
    let evaluator = QuotaEvaluator::new(ledger.clone(), subscriptions, QuotaConfig::from_env());

    info!("Initializing Vision Client...");
    let vision = Arc::new(HttpVisionClient::new(VisionConfig::from_env())?);

    let gateway = Arc::new(Gateway::new(
        evaluator,
        key_pool,
        ledger,
        vision,
        GatewayConfig::default(),
    ));
    let ctx = Arc::new(AppContext::new(gateway, *IP_REQUESTS_PER_MINUTE));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    match web::start_server(ctx, addr).await {
        Ok(_) => info!("Server stopped gracefully"),
        Err(e) => {
            tracing::error!("Server error: {}", e);
            return Err(e);
        }
    }

    info!("Shutting down...");
    Ok(())
}

async fn keys(action: KeysAction) -> Result<()> {
    let db = init_db(&SQLITE_PATH).await?;
    let pool = SqliteKeyPool::new(db).await?;

    match action {
        KeysAction::Add {
            provider,
            scope,
            owner,
            secret,
            daily_limit,
        } => {
            let key = pool
                .create(NewProviderKey {
                    provider: provider.parse()?,
                    scope: scope.parse()?,
                    owner_id: owner,
                    secret,
                    daily_limit,
                })
                .await?;
            println!("Added key {} ({}, {})", key.id, key.provider, key.owner_scope);
        }
        KeysAction::List => {
            for key in pool.list().await? {
                let last_used = key
                    .last_used_at
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "never".to_string());
                println!(
                    "{}  {:9} {:6} {:8} {:>6}/{:<6} last used: {}",
                    key.id,
                    key.provider,
                    key.owner_scope,
                    key.status,
                    key.usage_count,
                    key.daily_limit,
                    last_used
                );
            }
        }
        KeysAction::Disable { id } => {
            pool.update_status(&id, KeyStatus::Inactive).await?;
            println!("Key {} disabled", id);
        }
    }
    Ok(())
}
