use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{reload, EnvFilter};

use dirsync_common::config::resolve_log_level;
use dirsync_common::{Config, DEFAULT_CONFIG_PATH};
use dirsync_engine::{LdapSourceClient, LdapTargetWriter, SpecStore, SyncEngine};
use dirsync_store::SearchStore;

mod rest;

use rest::{router, AppState};

#[derive(Parser)]
#[command(name = "dirsyncd", about = "LDAP directory synchronization engine")]
struct Args {
    /// Path to the YAML configuration file.
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// Log level (debug|info|warn|error). Overrides LOG_LEVEL; default "info".
    #[arg(long)]
    loglevel: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let level = resolve_log_level(args.loglevel.as_deref());

    let filter = EnvFilter::try_new(&level).unwrap_or_else(|_| EnvFilter::new("info"));
    let (filter, reload_handle) = reload::Layer::new(filter);
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Bootstrap failures are fatal: bad config file, unreadable password
    // file, or an unreachable database exit non-zero.
    let config = Config::load(&args.config)?;
    config.log_redacted();

    let store: Option<Arc<dyn SpecStore>> = if config.database.enabled {
        let password = config.database_password()?;
        let store = SearchStore::connect(&config.database, &password).await?;
        store.migrate().await?;
        Some(Arc::new(store))
    } else {
        None
    };

    let source = Arc::new(LdapSourceClient::new(config.source.clone()));
    let writer = Arc::new(LdapTargetWriter::new(config.target.clone()));
    let engine = SyncEngine::build(
        config.hooks.clone(),
        config.hook_retry.clone(),
        config.source.base_dn.clone(),
        source,
        writer,
        store,
    );

    let loaded = engine.registry.load_persisted().await?;
    if loaded > 0 {
        info!(count = loaded, "Started persisted searches");
    }

    let state = Arc::new(AppState {
        engine,
        loglevel: RwLock::new(level),
        reload: reload_handle,
    });

    let addr = format!("0.0.0.0:{}", config.port);
    info!(addr = %addr, "REST listener starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router(Arc::clone(&state)))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    state.engine.registry.shutdown();
    Ok(())
}
