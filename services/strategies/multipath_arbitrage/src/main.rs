//! Multi-path arbitrage engine entry point

use anyhow::{bail, Context, Result};
use clap::Parser;
use ethers::core::rand::thread_rng;
use ethers::signers::LocalWallet;
use mev::{FlashbotsClient, FlashbotsConfig};
use multipath_arbitrage::{
    log_profit, log_success, ArbitrageConfig, ArbitrageEngine, EngineContext, FileMarketData,
    RpcGasOracle, RpcWallet,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path (TOML, or JSON by extension)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Pool snapshot file, overrides `network.snapshot_path`
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Private relay endpoint
    #[arg(long)]
    relay_url: Option<String>,

    /// JSON-RPC endpoint for gas, balances and block height
    #[arg(long)]
    rpc_url: Option<String>,

    /// Hex private key signing bundle transactions; falls back to ARBITRAGE_SIGNING_KEY
    #[arg(long)]
    signing_key: Option<String>,

    /// Print the best opportunities as JSON and exit without executing
    #[arg(long)]
    discover: bool,

    /// Maximum opportunities printed by --discover
    #[arg(long, default_value_t = 10)]
    max_results: usize,

    /// Run one discovery cycle, wait for its bundles, then exit
    #[arg(long)]
    once: bool,

    /// Simulate bundles but never submit them
    #[arg(long)]
    dry_run: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "multipath_arbitrage=info,mev=info,warn".into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn load_config(args: &Args) -> Result<ArbitrageConfig> {
    let mut config = match &args.config {
        Some(path) => ArbitrageConfig::from_file(path)?,
        None => ArbitrageConfig::default(),
    };
    config.apply_env_overrides();

    if let Some(url) = &args.relay_url {
        config.network.relay_url = url.clone();
    }
    if let Some(url) = &args.rpc_url {
        config.network.rpc_url = url.clone();
    }
    if let Some(path) = &args.snapshot {
        config.network.snapshot_path = Some(path.display().to_string());
    }
    if args.dry_run {
        config.execution.dry_run = true;
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn ephemeral_key() -> String {
    hex::encode(LocalWallet::new(&mut thread_rng()).signer().to_bytes())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.json_logs);

    info!("🚀 Starting Multi-Path Arbitrage Engine");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args)?;
    let Some(snapshot_path) = config.network.snapshot_path.clone() else {
        bail!("No pool snapshot configured (--snapshot or network.snapshot_path)");
    };

    let signing_key = match args
        .signing_key
        .clone()
        .or_else(|| std::env::var("ARBITRAGE_SIGNING_KEY").ok())
    {
        Some(key) => key,
        None if args.discover => ephemeral_key(),
        None => bail!("A signing key is required (--signing-key or ARBITRAGE_SIGNING_KEY)"),
    };
    // Relay reputation is tied to this key, not to the funds
    let auth_key = std::env::var("ARBITRAGE_AUTH_KEY").unwrap_or_else(|_| ephemeral_key());

    let timeout = Duration::from_millis(config.network.request_timeout_ms);
    let relay = FlashbotsClient::new(
        FlashbotsConfig {
            relay_url: config.network.relay_url.clone(),
            rpc_url: config.network.rpc_url.clone(),
            chain_id: config.network.chain_id,
            request_timeout: timeout,
        },
        &signing_key,
        &auth_key,
    )
    .context("Failed to create relay client")?;
    let searcher = relay.searcher_address();
    info!("🌐 Relay {} as {:?}", config.network.relay_url, searcher);

    let market = FileMarketData::load(&snapshot_path)?;
    let network = RpcGasOracle::new(&config)?;
    let wallet = RpcWallet::new(&config.network.rpc_url, searcher, timeout)?;

    let context = EngineContext::new(
        config,
        Arc::new(market),
        Arc::new(relay),
        Arc::new(network),
        Arc::new(wallet),
    )?;
    let mut engine = ArbitrageEngine::new(context);

    if args.discover {
        let opportunities = engine.discover_opportunities(args.max_results).await?;
        println!("{}", serde_json::to_string_pretty(&opportunities)?);
        return Ok(());
    }

    let mut results = engine.subscribe_results();
    let reporter = tokio::spawn(async move {
        while let Some(result) = results.recv().await {
            if result.success {
                log_profit!(
                    "{} realized {} in {}ms",
                    result.opportunity_id,
                    result.realized_profit.round_dp(4),
                    result.execution_time_ms
                );
            } else {
                info!(
                    "{} ended {:?}: {}",
                    result.opportunity_id,
                    result.final_state,
                    result.failure_detail.as_deref().unwrap_or("no detail")
                );
            }
        }
    });

    let engine = Arc::new(engine);
    if args.once {
        let executed = engine.run_once().await?;
        log_success!("Cycle finished with {} executions", executed.len());
    } else {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
                // Dropping the sender would stop the engine
                std::future::pending::<()>().await;
            }
            info!("Shutdown signal received");
            let _ = shutdown_tx.send(true);
        });
        Arc::clone(&engine).run(shutdown_rx).await?;
    }

    println!(
        "{}",
        serde_json::to_string_pretty(&engine.get_performance_metrics())?
    );
    drop(engine);
    let _ = reporter.await;
    Ok(())
}
