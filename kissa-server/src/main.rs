use std::sync::Arc;

use clap::Parser;
use kissa_core::KissaConfig;
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

use kissa_server::http::{self, HttpState};
use kissa_server::subsystems::archive::ConversationArchive;
use kissa_server::subsystems::backends;
use kissa_server::subsystems::ledger::TurnLedger;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "kissa.toml")]
    config: String,

    #[arg(long)]
    health: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (dev convenience; production uses real env vars)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Load config
    let config = match KissaConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // Init logging; RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.service.log_level));
    fmt().with_env_filter(filter).init();

    // Connect to DB
    let pool = match kissa_core::db::create_pool(&config.database).await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to open database {}: {}", config.database.url, e);
            std::process::exit(1);
        }
    };

    if let Err(e) = kissa_core::db::init_schema(&pool).await {
        eprintln!("Failed to initialise schema: {}", e);
        std::process::exit(1);
    }

    if args.health {
        match kissa_core::db::health_check(&pool).await {
            Ok(v) => println!("✅ SQLite connected: {}", v),
            Err(e) => {
                println!("❌ SQLite check failed: {}", e);
                std::process::exit(1);
            }
        }

        println!("✅ Kissa DB health check passed");
        return Ok(());
    }

    let engine = backends::create_engine_from_config(&config)?;
    let exporter = backends::create_exporter_from_config(&config)?;
    let archive = ConversationArchive::new(pool);
    let ledger = Arc::new(TurnLedger::new(
        engine,
        archive.clone(),
        exporter,
        config.conversation.turn_limit,
    ));

    tracing::info!(
        model = %config.engine.model,
        turn_limit = config.conversation.turn_limit,
        "Turn ledger ready"
    );

    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to listen for Ctrl+C");
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    if !config.http.enabled {
        tracing::warn!("HTTP server disabled by config; nothing to serve");
        return Ok(());
    }

    let state = HttpState::new(ledger.clone(), archive, config)?;
    http::start_http_server(state, tx.subscribe()).await?;

    let abandoned = ledger.active_sessions().await;
    if abandoned > 0 {
        tracing::warn!(sessions = abandoned, "Exiting with conversations still in progress");
    }

    Ok(())
}
