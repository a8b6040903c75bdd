use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::broadcast;

/// Severity of an external alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    /// Informational.
    Info,
    /// Needs operator attention.
    Warning,
    /// Something failed.
    Error,
}

/// One published alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Sequence number, starting at 1.
    pub seq: u64,
    /// Severity.
    pub severity: AlertSeverity,
    /// Human-readable message.
    pub message: String,
    /// Time the alert was raised, epoch ms.
    pub timestamp: i64,
}

struct History {
    alerts: VecDeque<Alert>,
    next_seq: u64,
}

/// The outward-facing log channel. Every alert is also written to the
/// internal `tracing` log.
pub struct AlertLog {
    sender: broadcast::Sender<Alert>,
    history: Mutex<History>,
    capacity: usize,
}

impl AlertLog {
    /// Creates a log keeping at most `capacity` alerts.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            history: Mutex::new(History {
                alerts: VecDeque::with_capacity(capacity),
                next_seq: 1,
            }),
            capacity,
        }
    }

    /// Logs the alert, records it in the history and fans it out to subscribers.
    pub fn publish(&self, severity: AlertSeverity, message: impl Into<String>, timestamp: i64) -> Alert {
        let message = message.into();
        match severity {
            AlertSeverity::Info => tracing::info!(external = true, "{}", message),
            AlertSeverity::Warning => tracing::warn!(external = true, "{}", message),
            AlertSeverity::Error => tracing::error!(external = true, "{}", message),
        }

        let alert = {
            let mut history = self.history.lock();
            let alert = Alert {
                seq: history.next_seq,
                severity,
                message,
                timestamp,
            };
            history.next_seq += 1;
            if history.alerts.len() == self.capacity {
                history.alerts.pop_front();
            }
            history.alerts.push_back(alert.clone());
            alert
        };

        // No subscribers is not an error.
        let _ = self.sender.send(alert.clone());
        alert
    }

    /// Publishes a warning.
    pub fn warning(&self, message: impl Into<String>, timestamp: i64) -> Alert {
        self.publish(AlertSeverity::Warning, message, timestamp)
    }

    /// Receives every alert published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<Alert> {
        self.sender.subscribe()
    }

    /// Most recent alerts, oldest first.
    pub fn recent(&self) -> Vec<Alert> {
        self.history.lock().alerts.iter().cloned().collect()
    }
}

impl Default for AlertLog {
    fn default() -> Self {
        Self::new(256)
    }
}
