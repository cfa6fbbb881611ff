use clap::Parser;
use spotbot::api::{self, BinanceClient, Credentials, ExchangeGateway, SimulatedExchange};
use spotbot::config::{Options, OptionsHandle};
use spotbot::execution::{Engine, PositionLedger, TradeHooks, TradingContext};
use spotbot::persistence::{JsonFileStore, LedgerStore, RedisStore};
use spotbot::Result;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "spotbot", about = "Momentum spot trading bot")]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Trade against a simulated book fed with live prices
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let mut options = Options::read(&args.config)?;
    if args.dry_run {
        options.system.dry_run = true;
    }
    options.validate()?;

    setup_logging(&options)?;

    tracing::info!("🚀 SpotBot starting");
    log_configuration(&options);

    let store = create_store(&options).await?;
    let ledger = Arc::new(PositionLedger::restore(store).await?);
    let gateway = create_gateway(&options)?;
    check_exchange(gateway.as_ref()).await?;

    let handle = OptionsHandle::new(options.clone());
    let ctx = TradingContext::new(gateway, handle.clone(), ledger.clone()).with_hooks(logging_hooks());

    let shutdown = CancellationToken::new();
    let mut engine_task = tokio::spawn(Engine::new(ctx).run(shutdown.clone()));
    spawn_config_reload(handle, args.config.clone(), shutdown.clone());

    tracing::info!("\nPress Ctrl+C to stop...\n");

    // Wait for Ctrl+C or an engine failure
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("\n⚠️  Received Ctrl+C, shutting down...");
        }
        result = &mut engine_task => {
            tracing::error!("Engine exited: {:?}", result);
        }
    }

    shutdown.cancel();

    let grace = Duration::from_secs(options.system.shutdown_grace_secs);
    if !engine_task.is_finished() {
        match tokio::time::timeout(grace, &mut engine_task).await {
            Ok(_) => tracing::info!("Trading loops drained"),
            Err(_) => {
                tracing::warn!("Trading loops still busy after {:?}, aborting", grace);
                engine_task.abort();
            }
        }
    }

    if let Err(e) = ledger.persist().await {
        tracing::error!("Final ledger save failed: {}", e);
    }

    tracing::info!("👋 SpotBot stopped ({} open positions)", ledger.len());
    Ok(())
}

// ============================================================================
// Initialization Functions
// ============================================================================

fn setup_logging(options: &Options) -> Result<()> {
    let filter = if options.system.debug {
        "spotbot=debug"
    } else {
        "spotbot=info"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));

    match &options.system.log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(env_filter).init();
        }
    }
    Ok(())
}

fn log_configuration(options: &Options) {
    let buy = &options.buy;
    let sell = &options.sell;

    tracing::info!("\n📊 Configuration:");
    tracing::info!("  Mode: {}", if options.system.dry_run { "dry run" } else { "live" });
    tracing::info!("  Main coin: {}", buy.main_coin);
    tracing::info!("  Money per order: {}", buy.money_per_order);
    tracing::info!("  Max positions: {}", buy.max_buy);
    tracing::info!(
        "  Buy trigger: up {:?}% / down {:?}% every {}s",
        buy.price_up_change,
        buy.price_down_change,
        buy.interval_secs
    );
    tracing::info!(
        "  Take profit: {}  Stop loss: {:?} (after {}s)  Force stop: {:?}",
        sell.take_profit,
        sell.stop_loss,
        sell.stop_loss_duration_secs,
        sell.force_stop_loss
    );
    if sell.enable_trailing_take_profit {
        tracing::info!(
            "  Trailing: +{} take profit, {} stop distance",
            sell.trailing_take_profit,
            sell.trailing_stop_loss
        );
    }
    if !buy.white_list.is_empty() {
        tracing::info!("  Whitelist: {}", buy.white_list.join(", "));
    }
    if !buy.black_list.is_empty() {
        tracing::info!("  Blacklist: {}", buy.black_list.join(", "));
    }
}

async fn create_store(options: &Options) -> Result<Arc<dyn LedgerStore>> {
    match &options.system.redis_url {
        Some(url) => {
            let store = RedisStore::new(url).await?;
            tracing::info!("Ledger persistence: Redis at {}", url);
            Ok(Arc::new(store))
        }
        None => {
            tracing::info!("Ledger persistence: {}", options.buy.bought_file);
            Ok(Arc::new(JsonFileStore::new(&options.buy.bought_file)))
        }
    }
}

fn create_gateway(options: &Options) -> Result<Arc<dyn ExchangeGateway>> {
    let system = &options.system;
    let client = BinanceClient::new(
        Credentials {
            api_key: system.access_key.clone(),
            secret_key: system.secret_key.clone(),
        },
        system.proxy_url.as_deref(),
        system.requests_per_minute,
    )?
    .with_base_url(&system.base_url);

    if system.dry_run {
        tracing::info!("🧪 Dry run: orders fill against a simulated book");
        return Ok(Arc::new(SimulatedExchange::with_upstream(Arc::new(client))));
    }
    Ok(Arc::new(client))
}

async fn check_exchange(gateway: &dyn ExchangeGateway) -> Result<()> {
    let symbols = api::check_connection(gateway).await?;
    if symbols == 0 {
        tracing::warn!("⚠️  Exchange reachable but returned no prices");
    } else {
        tracing::info!("✅ Exchange connection OK ({} symbols)", symbols);
    }
    Ok(())
}

/// Re-read buy and sell options from the config file on SIGHUP
#[cfg(unix)]
fn spawn_config_reload(handle: OptionsHandle, path: PathBuf, shutdown: CancellationToken) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(hangup) => hangup,
        Err(e) => {
            tracing::warn!("Config reload on SIGHUP unavailable: {}", e);
            return;
        }
    };

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                received = hangup.recv() => {
                    if received.is_none() {
                        break;
                    }
                }
            }

            match handle.reload(&path) {
                Ok(options) => {
                    tracing::info!("🔁 Configuration reloaded from {}", path.display());
                    log_configuration(&options);
                }
                Err(e) => tracing::warn!("Config reload failed, keeping current options: {}", e),
            }
        }
    });
}

#[cfg(not(unix))]
fn spawn_config_reload(_handle: OptionsHandle, _path: PathBuf, _shutdown: CancellationToken) {}

fn logging_hooks() -> TradeHooks {
    TradeHooks::new()
        .on_buy_confirmed(|fill| {
            tracing::info!(
                "📥 Fill {} #{} qty={} quote={:.8}",
                fill.symbol,
                fill.order_id,
                fill.executed_quantity,
                fill.cumulative_quote_quantity
            );
        })
        .on_sell_confirmed(|bill| {
            tracing::info!(
                "📤 Closed {} #{} at {} ({:+.2}%)",
                bill.position.symbol,
                bill.position.order_id,
                bill.price,
                bill.price_change
            );
        })
        .on_trailing_adjustment(|position| {
            tracing::debug!(
                "Trailing hook {} take_profit={:.4}",
                position.symbol,
                position.take_profit
            );
        })
}
