//! Notification stream
//!
//! Loaders report progress as one-way [`NotifyEvent`]s over an unbounded
//! channel handed in at construction. Events carry no return channel and are
//! never required for correctness: a dropped receiver is silently ignored.

use std::path::{Path, PathBuf};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// One observation emitted while a job is processed.
#[derive(Debug, Clone)]
pub struct NotifyEvent {
    pub target_table: String,
    pub source_path: PathBuf,
    pub message: String,
}

/// Sending side of the notification stream.
#[derive(Clone, Default)]
pub struct NotifySink {
    tx: Option<UnboundedSender<NotifyEvent>>,
}

impl NotifySink {
    /// A connected sink plus the receiving end for the consumer.
    pub fn channel() -> (NotifySink, UnboundedReceiver<NotifyEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (NotifySink { tx: Some(tx) }, rx)
    }

    /// A sink that drops every event.
    pub fn disabled() -> NotifySink {
        NotifySink { tx: None }
    }

    pub fn send(&self, target_table: &str, source_path: &Path, message: impl Into<String>) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(NotifyEvent {
                target_table: target_table.to_string(),
                source_path: source_path.to_path_buf(),
                message: message.into(),
            });
        }
    }
}

/// A sink bound to one job's target table and source path.
#[derive(Clone)]
pub struct JobNotifier {
    sink: NotifySink,
    target_table: String,
    source_path: PathBuf,
}

impl JobNotifier {
    pub fn new(sink: NotifySink, target_table: impl Into<String>, source_path: &Path) -> Self {
        Self {
            sink,
            target_table: target_table.into(),
            source_path: source_path.to_path_buf(),
        }
    }

    /// The same stream, rebound to another table (per-worksheet loads).
    pub fn for_table(&self, target_table: impl Into<String>) -> JobNotifier {
        JobNotifier {
            sink: self.sink.clone(),
            target_table: target_table.into(),
            source_path: self.source_path.clone(),
        }
    }

    pub fn send(&self, message: impl Into<String>) {
        self.sink
            .send(&self.target_table, &self.source_path, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_arrive_in_order() {
        let (sink, mut rx) = NotifySink::channel();
        let notifier = JobNotifier::new(sink, "raw.trades", Path::new("trades.csv"));
        notifier.send("first");
        notifier.send("second");

        let a = rx.recv().await.unwrap();
        let b = rx.recv().await.unwrap();
        assert_eq!(a.message, "first");
        assert_eq!(b.message, "second");
        assert_eq!(a.target_table, "raw.trades");
        assert_eq!(a.source_path, Path::new("trades.csv"));
    }

    #[test]
    fn test_disabled_sink_never_errors() {
        let sink = NotifySink::disabled();
        sink.send("t", Path::new("x.csv"), "dropped");
    }

    #[tokio::test]
    async fn test_dropped_receiver_is_ignored() {
        let (sink, rx) = NotifySink::channel();
        drop(rx);
        sink.send("t", Path::new("x.csv"), "no panic");
    }
}
