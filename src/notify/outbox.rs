use super::{messages, Notifications};
use crate::db::SignalStore;
use crate::Result;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub sent: usize,
    pub failed: usize,
}

/// Delivers logged signals the operator has not seen yet
///
/// A signal is marked only after its message went out, so failures are
/// picked up again on the next run.
pub struct Outbox {
    store: Arc<dyn SignalStore>,
    notifications: Notifications,
}

impl Outbox {
    pub fn new(store: Arc<dyn SignalStore>, notifications: Notifications) -> Self {
        Self {
            store,
            notifications,
        }
    }

    pub async fn dispatch(&self) -> Result<DispatchReport> {
        let mut report = DispatchReport::default();
        if !self.notifications.is_enabled() {
            tracing::info!("📭 Notifications disabled, outbox left queued");
            return Ok(report);
        }

        let pending = self.store.unsent_signals().await?;
        if pending.is_empty() {
            tracing::info!("📭 No unsent signals");
            return Ok(report);
        }

        tracing::info!("📨 Sending {} queued signals", pending.len());
        for signal in &pending {
            let close = self
                .store
                .row_on(&signal.instrument, signal.date)
                .await?
                .map(|row| row.close);

            if self.notifications.send(&messages::signal(signal, close)).await {
                self.store.mark_sent(signal.id).await?;
                report.sent += 1;
            } else {
                tracing::warn!("⚠️  Signal {} left queued", signal.id);
                report.failed += 1;
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::models::{NewSignal, SignalKind};
    use crate::notify::Notifier;
    use crate::throttle::Throttle;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Flaky {
        down: AtomicBool,
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Notifier for Flaky {
        async fn send_message(&self, text: &str) -> crate::Result<()> {
            if self.down.load(Ordering::SeqCst) {
                return Err(crate::Error::Invalid("down".to_string()));
            }
            self.sent.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_failed_sends_stay_queued() {
        let store = Arc::new(MemoryStore::new());
        let date = NaiveDate::from_ymd_opt(2025, 1, 15).unwrap();
        for ticker in ["SBER", "GAZP"] {
            store
                .insert_signal(&NewSignal::new(ticker, SignalKind::Attention, date, None))
                .await
                .unwrap();
        }

        let channel = Arc::new(Flaky::default());
        channel.down.store(true, Ordering::SeqCst);
        let outbox = Outbox::new(
            store.clone(),
            Notifications::new(channel.clone(), None, Throttle::disabled()),
        );

        let report = outbox.dispatch().await.unwrap();
        assert_eq!(report, DispatchReport { sent: 0, failed: 2 });

        channel.down.store(false, Ordering::SeqCst);
        let report = outbox.dispatch().await.unwrap();
        assert_eq!(report.sent, 2);

        // id order
        let sent = channel.sent.lock().unwrap().clone();
        assert!(sent[0].contains("SBER"));
        assert!(sent[1].contains("GAZP"));

        assert_eq!(outbox.dispatch().await.unwrap().sent, 0);
    }
}
