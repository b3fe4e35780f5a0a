// src/main.rs
use anyhow::Context;
use log::info;
use std::sync::Arc;
use stop_limit_liquidator::{
    config::Config,
    execution::{HttpTradeExecutor, TradeExecutor, TransactionTracker},
    gas::GasPriceService,
    liquidator::Liquidator,
    oracle::{client::JsonRpcOracleClient, OraclePriceService},
    orders::{feed::HttpBookSource, matcher::HttpMatchingService, store::SqliteOrderStore, OrderCache},
    registry,
};

fn setup_logging() -> Result<(), fern::InitError> {
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}][{}] {}",
                record.level(),
                record.target(),
                message
            ))
        })
        .level(log::LevelFilter::Info)
        .level_for("hyper", log::LevelFilter::Warn)
        .level_for("reqwest", log::LevelFilter::Warn)
        .level_for("tungstenite", log::LevelFilter::Warn)
        .level_for("tokio_tungstenite", log::LevelFilter::Warn)
        .chain(std::io::stdout())
        .apply()?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    setup_logging().context("failed to initialize logging")?;

    let config = Arc::new(Config::from_env());
    config.validate().context("invalid configuration")?;

    let network = Arc::new(registry::load_network(
        config.chain_id,
        config.networks_path.as_deref(),
    )?);
    info!(
        "Liquidating stop-limit orders on chain {} ({} tokens, {} oracles)",
        network.chain_id,
        network.tokens.len(),
        network.oracles.len()
    );

    let store = Arc::new(SqliteOrderStore::open(&config.db_path)?);
    let book_source = Arc::new(HttpBookSource::new(&config));
    let matching = Arc::new(HttpMatchingService::new(&config));
    let oracle_client = Arc::new(JsonRpcOracleClient::new(&config));

    let gas_service = Arc::new(GasPriceService::new(config.clone()));
    let oracle_service = Arc::new(OraclePriceService::new(
        config.clone(),
        network.oracles.clone(),
        oracle_client,
    ));
    let order_cache = Arc::new(OrderCache::new(
        config.clone(),
        network.clone(),
        store,
        book_source,
        matching,
    ));
    let executor: Arc<dyn TradeExecutor> = Arc::new(HttpTradeExecutor::new(&config));
    let tracker = Arc::new(TransactionTracker::new(executor.clone(), &config));

    let liquidator = Liquidator::new(
        config,
        network,
        gas_service,
        oracle_service,
        order_cache,
        executor,
        tracker,
    );

    liquidator.start().await;
    info!("Press CTRL-C to exit.");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    liquidator.stop().await;

    Ok(())
}
