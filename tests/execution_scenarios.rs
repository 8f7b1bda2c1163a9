mod common;

use common::*;
use std::sync::Arc;
use swingbot::api::PaperBroker;
use swingbot::backtest::ReplayFeed;
use swingbot::db::{MemoryStore, SignalStore};
use swingbot::execution::{ExecutionOutcome, TradeExecutor};
use swingbot::indicators::BandConfig;
use swingbot::ingest::CandleLoader;
use swingbot::notify::{messages, Outbox};
use swingbot::strategy::SignalProcessor;
use swingbot::{NewSignal, SignalKind, TradeKind};

async fn store_with_buy() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store
        .insert_candles(TICKER, &[row(0, 100.0, 100.0, 96.0), row(1, 95.0, 96.0, 92.0)])
        .await
        .unwrap();
    store
        .insert_signal(&NewSignal::new(TICKER, SignalKind::Buy, day(1), None))
        .await
        .unwrap();
    store
}

#[tokio::test]
async fn test_insufficient_cash_places_no_order() {
    let store = store_with_buy().await;
    let broker = Arc::new(PaperBroker::new(1_000.0, 0.0));
    broker.set_price(TICKER, 95.0);
    let (recorder, notifications) = recording();

    let executor = TradeExecutor::new(
        store.clone(),
        broker.clone(),
        notifications,
        position_manager(0.0),
        2,
    );
    let report = executor.run_cycle(&instruments()).await.unwrap();

    match report.outcome(TICKER) {
        Some(ExecutionOutcome::Skipped { reason }) => {
            assert!(reason.contains("insufficient cash"), "{}", reason)
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(broker.order_count(), 0);
    assert!(store.position(TICKER).await.unwrap().is_none());
    assert!(store.trade_history(None).await.unwrap().is_empty());

    let sent = recorder.messages();
    assert!(sent.iter().any(|m| m.contains("insufficient cash")));
    assert!(sent.last().unwrap().contains("Trading cycle finished"));
}

#[tokio::test]
async fn test_executed_signal_is_not_traded_twice() {
    let store = store_with_buy().await;
    let broker = Arc::new(PaperBroker::new(100_000.0, 0.0));
    broker.set_price(TICKER, 95.0);
    let (recorder, notifications) = recording();

    let executor = TradeExecutor::new(
        store.clone(),
        broker.clone(),
        notifications,
        position_manager(0.0),
        2,
    );

    let first = executor.run_cycle(&instruments()).await.unwrap();
    assert!(matches!(
        first.outcome(TICKER),
        Some(ExecutionOutcome::Executed {
            kind: TradeKind::Buy,
            ..
        })
    ));
    let second = executor.run_cycle(&instruments()).await.unwrap();
    assert!(matches!(
        second.outcome(TICKER),
        Some(ExecutionOutcome::Skipped { .. })
    ));

    assert_eq!(broker.order_count(), 1);
    let position = store.position(TICKER).await.unwrap().unwrap();
    assert_eq!(position.quantity, 100);
    assert_eq!(position.average_price, Some(95.0));
    assert_eq!(store.trade_history(Some(TICKER)).await.unwrap().len(), 1);

    let fills: Vec<String> = recorder
        .messages()
        .into_iter()
        .filter(|m| m.contains("💹"))
        .collect();
    assert_eq!(fills.len(), 1);
    assert!(fills[0].contains("Quantity: 100"));
}

#[tokio::test]
async fn test_load_signal_and_notify_pipeline() {
    let mut closes: Vec<f64> = (0..24).map(|i| 100.0 + (i % 2) as f64).collect();
    closes.push(90.0);
    let history: Vec<swingbot::Candle> = closes
        .iter()
        .enumerate()
        .map(|(i, &c)| candle(day(i as i64), c))
        .collect();
    let today = day(24);

    let store = Arc::new(MemoryStore::new());
    let loader = CandleLoader::new(
        store.clone(),
        Arc::new(ReplayFeed::new(&history)),
        BandConfig::default(),
        365,
    );
    let loaded = loader.load_all(&instruments(), today).await.unwrap();
    assert_eq!(loaded.total(), 25);

    let processor = SignalProcessor::new(store.clone(), 5);
    let mut ctx = processor.recover().await.unwrap();
    let summary = processor
        .run_cycle(&mut ctx, &instruments(), today)
        .await
        .unwrap();
    assert_eq!(summary.count(SignalKind::Attention), 1);

    let (recorder, notifications) = recording();
    let outbox = Outbox::new(store.clone(), notifications.clone());
    assert_eq!(outbox.dispatch().await.unwrap().sent, 1);
    notifications
        .send(&messages::cycle_summary(&summary, today))
        .await;

    let sent = recorder.messages();
    assert_eq!(sent.len(), 2);
    assert!(sent[0].contains("ATTENTION SBER"));
    assert!(sent[0].contains("Close: 90.00"));
    assert!(sent[1].contains("ATTENTION: SBER"));

    // delivered signals are not resent
    assert_eq!(outbox.dispatch().await.unwrap().sent, 0);
    assert!(store.unsent_signals().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_store_outage_aborts_execution_cycle() {
    let store = store_with_buy().await;
    store.set_offline(true);
    let broker = Arc::new(PaperBroker::new(100_000.0, 0.0));

    let executor = TradeExecutor::new(
        store,
        broker.clone(),
        swingbot::notify::Notifications::disabled(),
        position_manager(0.0),
        2,
    );
    let err = executor.run_cycle(&instruments()).await.unwrap_err();
    assert!(err.is_unrecoverable());
    assert_eq!(broker.order_count(), 0);
}
