//! Central log fan-out (§4.8 "Log streaming multiplexes a central
//! broadcaster").

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub target: String,
    pub message: String,
}

/// Generous per-subscriber buffer (§4.8): a slow `StreamLogs` consumer lags
/// rather than backpressuring the producer.
const SUBSCRIBER_BUFFER: usize = 1024;

/// Fans log entries out to every `StreamLogs` subscriber, dropping entries
/// below each subscriber's `minLevel` at the fan-out rather than at the
/// source (so every subscriber can pick its own level independently).
pub struct LogBroadcaster {
    tx: broadcast::Sender<LogEntry>,
}

impl LogBroadcaster {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(SUBSCRIBER_BUFFER);
        Self { tx }
    }

    pub fn publish(&self, entry: LogEntry) {
        let _ = self.tx.send(entry);
    }

    /// `StreamLogs([client], minLevel)`. Client-level filtering isn't
    /// specified for logs (§4.8 only names `minLevel`), so this returns the
    /// whole stream above `min_level` regardless of caller.
    pub fn subscribe(&self, min_level: LogLevel) -> mpsc::Receiver<LogEntry> {
        let mut rx = self.tx.subscribe();
        let (out_tx, out_rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(entry) => {
                        if entry.level < min_level {
                            continue;
                        }
                        if out_tx.send(entry).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        out_rx
    }
}

impl Default for LogBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(level: LogLevel, message: &str) -> LogEntry {
        LogEntry {
            timestamp: Utc::now(),
            level,
            target: "test".into(),
            message: message.into(),
        }
    }

    #[tokio::test]
    async fn subscriber_receives_entries_at_or_above_min_level() {
        let broadcaster = LogBroadcaster::new();
        let mut rx = broadcaster.subscribe(LogLevel::Warn);
        broadcaster.publish(entry(LogLevel::Info, "dropped"));
        broadcaster.publish(entry(LogLevel::Error, "kept"));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.message, "kept");
    }

    #[tokio::test]
    async fn level_ordering_treats_error_as_most_severe() {
        assert!(LogLevel::Error > LogLevel::Warn);
        assert!(LogLevel::Trace < LogLevel::Debug);
    }
}
