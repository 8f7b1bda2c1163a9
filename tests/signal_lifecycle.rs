mod common;

use common::*;
use std::sync::Arc;
use swingbot::api::{Broker, PaperBroker};
use swingbot::db::{MemoryStore, SignalStore};
use swingbot::execution::TradeExecutor;
use swingbot::indicators::BandConfig;
use swingbot::notify::Notifications;
use swingbot::strategy::{SignalProcessor, SignalState};
use swingbot::{OrderSide, Position, SignalKind};

async fn store_with(records: &[swingbot::CandleRecord]) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.insert_candles(TICKER, records).await.unwrap();
    store
}

/// Close 100 dips through the lower band on day 1, BUY at 95 on day 3,
/// ACCUMULATE at 90 on day 4, SELL at 110 on day 5
fn lifecycle_rows() -> Vec<swingbot::CandleRecord> {
    vec![
        row(0, 106.0, 104.0, 99.0),
        row(1, 100.0, 104.0, 101.0),
        row(2, 101.0, 103.0, 99.0),
        row(3, 95.0, 96.0, 92.0),
        row(4, 90.0, 97.0, 91.0),
        row(5, 110.0, 100.0, 94.0),
    ]
}

#[tokio::test]
async fn test_attention_on_lower_band_break_after_downcross() {
    let config = BandConfig::default();
    let mut closes: Vec<f64> = (0..24).map(|i| 100.0 + (i % 2) as f64).collect();
    closes.push(90.0);
    let store = store_with(&rows_from_closes(&closes, &config)).await;
    let processor = SignalProcessor::new(store.clone(), 5);

    let mut ctx = processor.recover().await.unwrap();
    let summary = processor
        .run_cycle(&mut ctx, &instruments(), day(24))
        .await
        .unwrap();

    assert_eq!(summary.emitted.len(), 1);
    assert_eq!(summary.emitted[0].kind, SignalKind::Attention);
    assert_eq!(summary.emitted[0].date, day(24));
    assert!(matches!(
        ctx.state(TICKER),
        SignalState::Attention { close, .. } if close == 90.0
    ));

    // a second run of the same day (fresh process) logs nothing new
    let mut ctx = processor.recover().await.unwrap();
    let summary = processor
        .run_cycle(&mut ctx, &instruments(), day(24))
        .await
        .unwrap();
    assert!(summary.emitted.is_empty());
    assert_eq!(store.all_signals().unwrap().len(), 1);
}

#[tokio::test]
async fn test_full_lifecycle_with_fills() {
    let rows = lifecycle_rows();
    let store = store_with(&rows[..1]).await;
    let processor = SignalProcessor::new(store.clone(), 5);
    let broker = Arc::new(PaperBroker::new(100_000.0, 0.0005));
    let executor = TradeExecutor::new(
        store.clone(),
        broker.clone(),
        Notifications::disabled(),
        position_manager(0.0005),
        2,
    );

    // each day is a separate process: new row, recover, signal cycle, execution cycle
    for (n, record) in rows.iter().enumerate().skip(1) {
        let n = n as i64;
        store.insert_candles(TICKER, std::slice::from_ref(record)).await.unwrap();

        let mut ctx = processor.recover().await.unwrap();
        processor
            .run_cycle(&mut ctx, &instruments(), day(n))
            .await
            .unwrap();

        broker.set_price(TICKER, record.candle.close);
        executor.run_cycle(&instruments()).await.unwrap();

        match n {
            3 => {
                let position = store.position(TICKER).await.unwrap().unwrap();
                assert_eq!(position.quantity, 100);
                assert_eq!(position.average_price, Some(95.0));
            }
            4 => {
                let position = store.position(TICKER).await.unwrap().unwrap();
                assert_eq!(position.quantity, 200);
                assert!((position.average_price.unwrap() - 92.5).abs() < 1e-9);
            }
            _ => {}
        }
    }

    let signals = store.all_signals().unwrap();
    let kinds: Vec<SignalKind> = signals.iter().map(|s| s.kind).collect();
    assert_eq!(
        kinds,
        vec![
            SignalKind::Attention,
            SignalKind::Buy,
            SignalKind::Accumulate,
            SignalKind::Sell
        ]
    );

    let attention = &signals[0];
    let buy = &signals[1];
    assert_eq!(attention.date, day(1));
    assert_eq!(buy.date, day(3));
    assert_eq!(buy.parent_id, Some(attention.id));
    assert!(attention.date <= buy.date);

    // SELL clears the position and the lineage
    let position = store.position(TICKER).await.unwrap();
    assert!(position.as_ref().map_or(true, |p: &Position| !p.is_open()));
    if let Some(p) = position {
        assert_eq!(p.quantity, 0);
        assert_eq!(p.average_price, None);
    }
    assert!(signals
        .iter()
        .filter(|s| s.kind != SignalKind::Sell)
        .all(|s| !s.is_active));

    let trades = store.trade_history(Some(TICKER)).await.unwrap();
    let sell = trades.last().unwrap();
    let expected = (110.0 - 92.5) * 200.0 * (1.0 - 0.0005);
    assert!((sell.profit.unwrap() - expected).abs() < 1e-6);
    assert_eq!(broker.holding(TICKER), 0);
}

#[tokio::test]
async fn test_deactivated_attention_does_not_refire() {
    let store = store_with(&lifecycle_rows()).await;
    let processor = SignalProcessor::new(store.clone(), 5);
    let broker = Arc::new(PaperBroker::new(100_000.0, 0.0));
    broker.set_price(TICKER, 95.0);
    let executor = TradeExecutor::new(
        store.clone(),
        broker.clone(),
        Notifications::disabled(),
        position_manager(0.0),
        2,
    );

    for n in 1..=3 {
        let mut ctx = processor.recover().await.unwrap();
        processor.run_cycle(&mut ctx, &instruments(), day(n)).await.unwrap();
    }
    // fill the BUY as if it had executed on its own day
    let buy = store
        .latest_active(TICKER, SignalKind::Buy)
        .await
        .unwrap()
        .unwrap();
    let fill = broker
        .place_market_order(TICKER, 100, OrderSide::Buy)
        .await
        .unwrap();
    store
        .record_fill(&position_manager(0.0).open(TICKER, fill, Some(buy.id), chrono::Utc::now()))
        .await
        .unwrap();

    for n in 4..=5 {
        let mut ctx = processor.recover().await.unwrap();
        processor.run_cycle(&mut ctx, &instruments(), day(n)).await.unwrap();
    }
    broker.set_price(TICKER, 110.0);
    executor.run_cycle(&instruments()).await.unwrap();
    let before = store.all_signals().unwrap().len();

    // the closed lineage stays quiet on a rerun
    let mut ctx = processor.recover().await.unwrap();
    let summary = processor
        .run_cycle(&mut ctx, &instruments(), day(5))
        .await
        .unwrap();
    assert!(summary.emitted.is_empty());
    assert_eq!(store.all_signals().unwrap().len(), before);
    assert_eq!(ctx.state(TICKER), SignalState::None);
}

#[tokio::test]
async fn test_recovery_mid_position_is_in_market() {
    let store = store_with(&lifecycle_rows()).await;
    let processor = SignalProcessor::new(store.clone(), 5);

    for n in 1..=3 {
        let mut ctx = processor.recover().await.unwrap();
        processor.run_cycle(&mut ctx, &instruments(), day(n)).await.unwrap();
    }
    let attention = store.active_attentions().await.unwrap().remove(0);

    // BUY logged but never filled: the ATTENTION is spent and nothing is held
    let ctx = processor.recover().await.unwrap();
    assert_eq!(ctx.state(TICKER), SignalState::None);

    let buy = store
        .latest_active(TICKER, SignalKind::Buy)
        .await
        .unwrap()
        .unwrap();
    store
        .record_fill(&position_manager(0.0).open(
            TICKER,
            swingbot::Fill {
                price: 95.0,
                quantity: 100,
            },
            Some(buy.id),
            chrono::Utc::now(),
        ))
        .await
        .unwrap();

    let ctx = processor.recover().await.unwrap();
    assert_eq!(
        ctx.state(TICKER),
        SignalState::InMarket {
            lineage: Some(attention.id)
        }
    );
}

#[tokio::test]
async fn test_accumulate_fires_once_per_day() {
    let store = store_with(&lifecycle_rows()[..5]).await;
    let processor = SignalProcessor::new(store.clone(), 5);
    store
        .record_fill(&position_manager(0.0).open(
            TICKER,
            swingbot::Fill {
                price: 95.0,
                quantity: 100,
            },
            None,
            chrono::Utc::now(),
        ))
        .await
        .unwrap();

    for _ in 0..3 {
        let mut ctx = processor.recover().await.unwrap();
        processor.run_cycle(&mut ctx, &instruments(), day(4)).await.unwrap();
    }

    let accumulations = store
        .all_signals()
        .unwrap()
        .into_iter()
        .filter(|s| s.kind == SignalKind::Accumulate)
        .count();
    assert_eq!(accumulations, 1);
}
