use spotbot::api::SimulatedExchange;
use spotbot::config::{Options, OptionsHandle};
use spotbot::execution::{
    BuyExecutor, CooldownCache, Engine, PositionLedger, PriceWatcher, SellEvaluator, SellExecutor,
    SellOutcome, TradingContext,
};
use spotbot::models::{OrderSide, Position, SellReason};
use spotbot::persistence::{JsonFileStore, LedgerStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_test::assert_ok;
use tokio_util::sync::CancellationToken;

fn create_test_options() -> Options {
    let mut options = Options::default();
    options.buy.price_up_change = Some(0.5);
    options.buy.money_per_order = 11.0;
    options.buy.max_buy = 2;
    options.buy.same_coin_block_secs = 60;
    options.sell.take_profit = 0.02;
    options.sell.force_stop_loss = Some(-0.05);
    options.system.dry_run = true;
    options
}

fn create_test_context(exchange: &SimulatedExchange, options: Options, ledger: Arc<PositionLedger>) -> TradingContext {
    TradingContext::new(Arc::new(exchange.clone()), OptionsHandle::new(options), ledger)
        .with_cooldown(Arc::new(CooldownCache::default()))
}

fn create_test_position(symbol: &str, order_id: i64) -> Position {
    Position {
        symbol: symbol.to_string(),
        order_id,
        opened_at: chrono::Utc::now(),
        executed_quantity: 1.0,
        cumulative_quote_quantity: 100.0,
        take_profit: 0.02,
        stop_loss: None,
        force_stop_loss: Some(-0.05),
        volume: 1.0,
        lot_precision: 2,
    }
}

async fn wait_until(what: &str, mut check: impl FnMut() -> bool) {
    let waited = tokio::time::timeout(Duration::from_secs(10), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {}", what);
}

#[tokio::test]
async fn test_take_profit_closes_position_and_blocks_reentry() {
    let exchange = SimulatedExchange::new();
    exchange.set_price("ABCUSDT", 102.0);

    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn LedgerStore> = Arc::new(JsonFileStore::new(dir.path().join("trade.json")));
    let ledger = Arc::new(PositionLedger::new(Some(store.clone())));
    ledger.insert(create_test_position("ABCUSDT", 42)).unwrap();

    let ctx = create_test_context(&exchange, create_test_options(), ledger.clone());
    let (tx, mut rx) = mpsc::channel(4);
    let shutdown = CancellationToken::new();

    assert!(SellEvaluator::new(ctx.clone()).tick(&tx, &shutdown).await);
    let bill = rx.recv().await.unwrap();
    assert_eq!(bill.reason, SellReason::TakeProfit);
    assert!((bill.price_change - 2.0).abs() < 1e-9);

    let before = chrono::Utc::now();
    let outcome = assert_ok!(SellExecutor::new(ctx.clone()).execute(&bill).await);
    assert_eq!(outcome, SellOutcome::Sold);

    assert!(ledger.is_empty());
    let expires = ctx.cooldown.expires_at("ABCUSDT").unwrap();
    let expected = before + chrono::Duration::seconds(60);
    assert!((expires - expected).num_seconds().abs() <= 1);

    let orders = exchange.orders();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].side, OrderSide::Sell);

    // The sale reached the store
    assert!(store.load().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_forced_stop_loss_pipeline() {
    let exchange = SimulatedExchange::new();
    exchange.set_price("ABCUSDT", 94.0);

    let ledger = Arc::new(PositionLedger::new(None));
    ledger.insert(create_test_position("ABCUSDT", 1)).unwrap();
    let ctx = create_test_context(&exchange, create_test_options(), ledger.clone());

    let (tx, mut rx) = mpsc::channel(4);
    assert!(SellEvaluator::new(ctx.clone()).tick(&tx, &CancellationToken::new()).await);

    let bill = rx.recv().await.unwrap();
    assert_eq!(bill.reason, SellReason::ForceStopLoss);
    assert!((bill.price_change + 6.0).abs() < 1e-9);

    assert_ok!(SellExecutor::new(ctx).execute(&bill).await);
    assert!(ledger.is_empty());
}

#[tokio::test]
async fn test_watcher_to_buyer_respects_cap() {
    let exchange = SimulatedExchange::new();
    for symbol in ["AUSDT", "BUSDT", "CUSDT"] {
        exchange.set_price(symbol, 10.0);
    }

    let ledger = Arc::new(PositionLedger::new(None));
    let ctx = create_test_context(&exchange, create_test_options(), ledger.clone());
    let mut watcher = PriceWatcher::new(ctx.clone());
    let buyer = BuyExecutor::new(ctx);

    assert!(watcher.tick().await.is_empty());

    exchange.set_price("AUSDT", 10.2);
    exchange.set_price("BUSDT", 10.5);
    exchange.set_price("CUSDT", 10.1);
    let batch = watcher.tick().await;

    let symbols: Vec<&str> = batch.iter().map(|c| c.symbol.as_str()).collect();
    assert_eq!(symbols, vec!["BUSDT", "AUSDT", "CUSDT"]);

    assert_eq!(buyer.process_batch(batch).await, 2);
    assert_eq!(ledger.len(), 2);
    assert!(ledger.contains("BUSDT"));
    assert!(ledger.contains("AUSDT"));
    assert!(!ledger.contains("CUSDT"));
}

#[tokio::test]
async fn test_engine_round_trip() {
    let _ = tracing_subscriber::fmt::try_init();

    let exchange = SimulatedExchange::new();
    exchange.set_price("ABCUSDT", 100.0);

    let ledger = Arc::new(PositionLedger::new(None));
    let ctx = create_test_context(&exchange, create_test_options(), ledger.clone());
    let cooldown = ctx.cooldown.clone();

    let shutdown = CancellationToken::new();
    let engine = tokio::spawn(Engine::new(ctx).run(shutdown.clone()));

    // Let the watcher take its baseline, then move the price
    tokio::time::sleep(Duration::from_millis(300)).await;
    exchange.set_price("ABCUSDT", 101.0);
    wait_until("the buy", || ledger.contains("ABCUSDT")).await;

    let position = ledger.get("ABCUSDT").unwrap();
    assert_eq!(position.executed_quantity, 0.1);

    exchange.set_price("ABCUSDT", 104.0);
    wait_until("the sell", || ledger.is_empty()).await;
    assert!(cooldown.is_blocked("ABCUSDT"));

    shutdown.cancel();
    let stopped = tokio::time::timeout(Duration::from_secs(5), engine).await;
    assert!(stopped.is_ok(), "engine did not stop after shutdown");

    let sides: Vec<OrderSide> = exchange.orders().iter().map(|o| o.side).collect();
    assert_eq!(sides, vec![OrderSide::Buy, OrderSide::Sell]);
}

#[test]
fn test_ledger_restores_from_file() {
    tokio_test::block_on(async {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn LedgerStore> = Arc::new(JsonFileStore::new(dir.path().join("trade.json")));

        let ledger = PositionLedger::new(Some(store.clone()));
        ledger.insert(create_test_position("ABCUSDT", 1)).unwrap();
        ledger.insert(create_test_position("XYZUSDT", 2)).unwrap();
        assert_ok!(ledger.persist().await);

        let restored = assert_ok!(PositionLedger::restore(store).await);
        assert_eq!(restored.len(), 2);
        assert_eq!(restored.get("XYZUSDT").unwrap().order_id, 2);
    });
}
