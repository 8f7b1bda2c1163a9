// Operator notifications: channel trait, message splitting, outbox
pub mod messages;
pub mod outbox;
pub mod telegram;

pub use outbox::{DispatchReport, Outbox};
pub use telegram::TelegramClient;

use crate::throttle::Throttle;
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Channel message limit in UTF-16 code units
pub const MAX_MESSAGE_UNITS: usize = 4096;

/// A messaging channel
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_message(&self, text: &str) -> Result<()>;
}

/// Operator-facing sender: prefix, splitting and throttling on top of a [`Notifier`]
///
/// Delivery failures are logged and reported as `false`, never as errors.
#[derive(Clone, Default)]
pub struct Notifications {
    notifier: Option<Arc<dyn Notifier>>,
    prefix: Option<String>,
    throttle: Throttle,
}

impl Notifications {
    pub fn new(notifier: Arc<dyn Notifier>, prefix: Option<String>, throttle: Throttle) -> Self {
        Self {
            notifier: Some(notifier),
            prefix: prefix.filter(|p| !p.trim().is_empty()),
            throttle,
        }
    }

    /// Drops every message (no channel configured)
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.notifier.is_some()
    }

    /// Send `text` as one or more ordered parts. Returns true when all parts went out.
    pub async fn send(&self, text: &str) -> bool {
        let Some(notifier) = &self.notifier else {
            tracing::debug!("Notifications disabled, dropping message");
            return false;
        };

        let text = match &self.prefix {
            Some(prefix) => format!("{}\n{}", prefix, text),
            None => text.to_string(),
        };

        let parts = split_message(&text, MAX_MESSAGE_UNITS);
        let total = parts.len();
        for (i, part) in parts.iter().enumerate() {
            self.throttle.wait().await;
            if let Err(e) = notifier.send_message(part).await {
                tracing::warn!("⚠️  Failed to send message part {}/{}: {}", i + 1, total, e);
                return false;
            }
        }
        true
    }
}

fn utf16_len(s: &str) -> usize {
    s.encode_utf16().count()
}

/// Split text into parts of at most `limit` UTF-16 units
///
/// Breaks on line boundaries where possible; a single overlong line is cut
/// at character boundaries.
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    if limit == 0 || utf16_len(text) <= limit {
        return vec![text.to_string()];
    }

    let mut parts = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    let mut flush = |current: &mut String, current_len: &mut usize| {
        // only the separator at the break goes; blank lines before it stay
        let part = current.strip_suffix('\n').unwrap_or(current.as_str());
        if !part.is_empty() {
            parts.push(part.to_string());
        }
        current.clear();
        *current_len = 0;
    };

    for line in text.split_inclusive('\n') {
        let line_len = utf16_len(line);
        if current_len + line_len <= limit {
            current.push_str(line);
            current_len += line_len;
            continue;
        }

        flush(&mut current, &mut current_len);
        if line_len <= limit {
            current.push_str(line);
            current_len = line_len;
            continue;
        }

        for ch in line.chars() {
            let ch_len = ch.len_utf16();
            if current_len + ch_len > limit {
                flush(&mut current, &mut current_len);
            }
            current.push(ch);
            current_len += ch_len;
        }
    }
    flush(&mut current, &mut current_len);

    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Capture {
        sent: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl Notifier for Capture {
        async fn send_message(&self, text: &str) -> Result<()> {
            if self.fail {
                return Err(crate::Error::Invalid("channel down".to_string()));
            }
            self.sent.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    #[test]
    fn test_short_message_is_single_part() {
        assert_eq!(split_message("hello", 4096), vec!["hello".to_string()]);
    }

    #[test]
    fn test_split_prefers_line_boundaries() {
        let text = "aaaa\nbbbb\ncccc";
        let parts = split_message(text, 10);
        assert_eq!(parts, vec!["aaaa\nbbbb", "cccc"]);
    }

    #[test]
    fn test_split_counts_utf16_units() {
        // each emoji is two UTF-16 units
        let text = "😀".repeat(5);
        let parts = split_message(&text, 4);
        assert_eq!(parts.len(), 3);
        assert!(parts.iter().all(|p| utf16_len(p) <= 4));
        assert_eq!(parts.concat(), text);
    }

    #[test]
    fn test_split_preserves_order_and_content() {
        let lines: Vec<String> = (0..500).map(|i| format!("signal line {:03}", i)).collect();
        let text = lines.join("\n");
        let parts = split_message(&text, MAX_MESSAGE_UNITS);
        assert!(parts.len() > 1);
        assert!(parts.iter().all(|p| utf16_len(p) <= MAX_MESSAGE_UNITS));
        assert_eq!(parts.join("\n"), text);
    }

    #[test]
    fn test_split_keeps_blank_lines_at_break() {
        let text = "aaaa\n\n\nbbbb";
        let parts = split_message(text, 6);
        assert_eq!(parts, vec!["aaaa\n", "\nbbbb"]);
        assert_eq!(parts.join("\n"), text);
    }

    #[tokio::test]
    async fn test_prefix_is_applied() {
        let capture = Arc::new(Capture::default());
        let notifications =
            Notifications::new(capture.clone(), Some("SANDBOX".to_string()), Throttle::disabled());
        assert!(notifications.send("BUY SBER").await);
        assert_eq!(capture.sent.lock().unwrap()[0], "SANDBOX\nBUY SBER");
    }

    #[tokio::test]
    async fn test_failure_is_reported_not_raised() {
        let capture = Arc::new(Capture {
            fail: true,
            ..Capture::default()
        });
        let notifications = Notifications::new(capture, None, Throttle::disabled());
        assert!(!notifications.send("x").await);
        assert!(!Notifications::disabled().send("x").await);
    }
}
