use std::sync::Arc;

use clap::Parser;
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

use agrichat_core::supervisor::{create_responder, SupervisorClient};
use agrichat_core::{AgriChatConfig, CacheClient, SessionArchiver};
use agrichat_server::http::{start_http_server, AppState};
use agrichat_server::subsystems::sessions::SessionService;
use agrichat_server::subsystems::storage::StorageService;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "agrichat.toml")]
    config: String,

    #[arg(long)]
    health: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (dev convenience — production uses real env vars)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Init logging
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    // Load config
    let config = match AgriChatConfig::load(Some(&args.config)) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // Connect to DB
    let pool = match agrichat_core::db::create_pool(&config.database).await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to connect to database: {}", e);
            std::process::exit(1);
        }
    };

    if args.health {
        match agrichat_core::db::health_check(&pool).await {
            Ok(v) => println!("✅ PostgreSQL connected: {}", v),
            Err(e) => {
                println!("❌ PostgreSQL connection failed: {}", e);
                std::process::exit(1);
            }
        }

        match CacheClient::connect(&config.cache, &config.session).await {
            Ok(cache) => match cache.ping().await {
                Ok(()) => println!("✅ Cache connected: {}", config.cache.url()),
                Err(e) => {
                    println!("❌ Cache ping failed: {}", e);
                    std::process::exit(1);
                }
            },
            Err(e) => {
                println!("❌ Cache connection failed: {}", e);
                std::process::exit(1);
            }
        }

        println!("✅ AgriChat health check passed");
        return Ok(());
    }

    if let Err(e) = agrichat_core::db::apply_schema(&pool).await {
        eprintln!("Failed to apply schema: {}", e);
        std::process::exit(1);
    }

    let cache = match CacheClient::connect(&config.cache, &config.session).await {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to connect to cache: {}", e);
            std::process::exit(1);
        }
    };

    // Cloud archival is optional — the service degrades to store-only archiving.
    let archiver = match SessionArchiver::new(&config.archive) {
        Ok(a) => Some(a),
        Err(e) => {
            tracing::warn!("Cloud archival disabled: {}", e);
            None
        }
    };

    // Supervisor is optional too — without an API key the canned responder runs.
    let supervisor = SupervisorClient::new(&config.supervisor).ok();
    let responder = create_responder(&config.supervisor);
    tracing::info!(responder = responder.name(), "Chat responder selected");

    let sessions = SessionService::new(pool.clone(), cache.clone(), archiver.clone());
    let storage = StorageService::new(pool.clone(), archiver);

    let state = Arc::new(AppState {
        pool,
        cache,
        sessions,
        storage,
        responder,
        supervisor,
    });

    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to listen for Ctrl+C");
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    start_http_server(state, &config, tx.subscribe()).await?;

    Ok(())
}
