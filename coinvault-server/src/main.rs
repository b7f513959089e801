//! coinvault server
//!
//! Runs the custody core of one EVM chain: deposit scanning, confirmation,
//! collection sweeps and withdrawal broadcasting, each on its own period.

mod config;
mod shutdown;

use clap::Parser;
use coinvault_core::chain::{ChainReader, EvmChainReader, address_key};
use coinvault_core::config::{AssetConfig, AssetKind};
use coinvault_core::events::{DepositEventSender, deposit_event_channel};
use coinvault_core::framework::DatabaseProcessor;
use coinvault_core::ledger::{Ledger, PgLedger};
use coinvault_core::processors::{
    Broadcaster, CollectionFlow, ConfirmationEngine, DepositEventPublisher, DepositScanner,
    NativeScan, PartnerRoute, PeriodicTask, ScanContext, TaskRunner, TokenScan, WithdrawalFlow,
};
use coinvault_core::signer::{HdSigner, Signer};
use config::{ConfigLoader, get_database_url, get_seed};
use sqlx::postgres::PgPoolOptions;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// coinvault - custodial EVM wallet reconciliation core
#[derive(Parser, Debug)]
#[command(name = "coinvault-server")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "./coinvault.toml")]
    config: PathBuf,

    /// Run database migrations on startup
    #[arg(long, default_value = "false")]
    migrate: bool,
}

/// Shared collaborators every per-asset task is built from.
struct Wiring {
    chain_id: u64,
    ledger: Arc<dyn Ledger>,
    chain: Arc<dyn ChainReader>,
    signer: Arc<dyn Signer>,
    events: DepositEventSender,
    collection_path: String,
    partner: Option<PartnerRoute>,
}

impl Wiring {
    fn broadcaster(&self, asset: &Arc<AssetConfig>) -> Broadcaster {
        Broadcaster::new(
            asset.clone(),
            self.chain_id,
            self.ledger.clone(),
            self.chain.clone(),
            self.signer.clone(),
        )
    }

    /// Every periodic task of `asset` with its period.
    fn tasks(&self, asset: AssetConfig) -> anyhow::Result<Vec<(Arc<dyn PeriodicTask>, Duration)>> {
        let asset = Arc::new(asset);
        let schedule = asset.schedule;
        let ctx = ScanContext::new(
            asset.clone(),
            i64::try_from(self.chain_id)?,
            self.ledger.clone(),
            self.chain.clone(),
            self.events.clone(),
        );
        let scanner: Arc<dyn PeriodicTask> = match &asset.kind {
            AssetKind::Native => Arc::new(DepositScanner::new(NativeScan, ctx)),
            AssetKind::Token { .. } => {
                Arc::new(DepositScanner::new(TokenScan::for_asset(&asset)?, ctx))
            }
        };
        let confirmation: Arc<dyn PeriodicTask> = Arc::new(ConfirmationEngine::new(
            asset.clone(),
            self.ledger.clone(),
            self.chain.clone(),
            self.events.clone(),
        ));

        let mut tasks: Vec<(Arc<dyn PeriodicTask>, Duration)> = vec![
            (scanner, schedule.deposit_scan),
            (confirmation, schedule.confirmation),
        ];
        if let Some(collect) = asset.collect {
            let flow: Arc<dyn PeriodicTask> = Arc::new(CollectionFlow::new(
                self.broadcaster(&asset),
                self.collection_path.clone(),
                collect.gas_premium,
            ));
            tasks.push((flow, schedule.collection));
        }
        if let Some(withdrawal) = asset.withdrawal {
            let flow: Arc<dyn PeriodicTask> = Arc::new(WithdrawalFlow::new(
                self.broadcaster(&asset),
                self.collection_path.clone(),
                withdrawal.gas_price,
                self.partner.clone(),
            ));
            tasks.push((flow, schedule.withdrawal));
        }
        Ok(tasks)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let args = Args::parse();

    tracing::info!("Starting coinvault-server v{}", env!("CARGO_PKG_VERSION"));

    let loaded_config = ConfigLoader::new(&args.config).load().map_err(|e| {
        tracing::error!("Failed to load configuration: {}", e);
        e
    })?;
    tracing::info!(
        assets = loaded_config.assets.len(),
        chain_id = loaded_config.chain.chain_id,
        "Configuration loaded from {:?}",
        args.config
    );

    let database_url = get_database_url().map_err(|e| {
        tracing::error!("DATABASE_URL environment variable not set");
        e
    })?;

    tracing::info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .map_err(|e| {
            tracing::error!("Failed to connect to database: {}", e);
            e
        })?;
    tracing::info!("Database connection established");

    if args.migrate {
        tracing::info!("Running database migrations...");
        sqlx::migrate!("../migrations")
            .run(&db_pool)
            .await
            .map_err(|e| {
                tracing::error!("Failed to run migrations: {}", e);
                e
            })?;
        tracing::info!("Migrations completed successfully");
    }

    let signer = HdSigner::from_seed(&get_seed()?)?;
    let collection_address = signer.address(&loaded_config.collection_path)?;
    tracing::info!(address = %address_key(&collection_address), "Collection address derived");

    let chain = EvmChainReader::new(
        &loaded_config.chain.rpc_url,
        loaded_config.chain.request_timeout,
    )?;
    let ledger = PgLedger::new(
        DatabaseProcessor::new(db_pool.clone()),
        i64::try_from(loaded_config.chain.chain_id)?,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (events_tx, events_rx) = deposit_event_channel();

    let wiring = Wiring {
        chain_id: loaded_config.chain.chain_id,
        ledger: Arc::new(ledger),
        chain: Arc::new(chain),
        signer: Arc::new(signer),
        events: events_tx,
        collection_path: loaded_config.collection_path,
        partner: loaded_config
            .partner
            .as_ref()
            .map(PartnerRoute::from_config)
            .transpose()?,
    };

    let mut handles: Vec<JoinHandle<()>> = Vec::new();
    let publisher = DepositEventPublisher::new(
        wiring.ledger.clone(),
        events_rx,
        shutdown_rx.clone(),
        loaded_config.webhook_url,
    )?;
    handles.push(tokio::spawn(publisher.run()));

    for asset in loaded_config.assets {
        for (task, period) in wiring.tasks(asset)? {
            let runner = TaskRunner::new(task, period, shutdown_rx.clone());
            handles.push(tokio::spawn(runner.run()));
        }
    }
    tracing::info!(tasks = handles.len(), "All task loops started");
    drop(wiring);

    shutdown::broadcast_shutdown(shutdown_tx).await?;

    for handle in handles {
        if let Err(e) = handle.await {
            tracing::error!("Task loop ended abnormally: {}", e);
        }
    }

    tracing::info!("Closing database connections...");
    db_pool.close().await;
    tracing::info!("Server shutdown complete");

    Ok(())
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
