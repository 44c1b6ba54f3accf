//! Counters for one connection handler

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Lifecycle and traffic counters, updated lock-free from any thread.
#[derive(Debug, Default)]
pub struct ConnectionMetrics {
    // Lifecycle
    pub connect_attempts: AtomicU64,
    pub connections_opened: AtomicU64,
    pub unsolicited_closes: AtomicU64,
    pub auto_reconnects: AtomicU64,
    pub rejected_transitions: AtomicU64,

    // Traffic
    pub messages_received: AtomicU64,
    pub messages_sent: AtomicU64,
    pub send_failures: AtomicU64,
    pub transport_errors: AtomicU64,
    pub stale_events: AtomicU64,
}

impl ConnectionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_connect_attempt(&self) {
        self.connect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_opened(&self) {
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
    }

    /// A close or failure the handler did not ask for.
    pub fn record_unsolicited_close(&self) {
        self.unsolicited_closes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_auto_reconnect(&self) {
        self.auto_reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected_transition(&self) {
        self.rejected_transitions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_message_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_send_failure(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transport_error(&self) {
        self.transport_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// A callback from a superseded connect attempt.
    pub fn record_stale_event(&self) {
        self.stale_events.fetch_add(1, Ordering::Relaxed);
    }

    /// Export counters keyed by name.
    pub fn export(&self) -> BTreeMap<String, u64> {
        let mut m = BTreeMap::new();
        m.insert("connect_attempts".to_string(), self.connect_attempts.load(Ordering::Relaxed));
        m.insert("connections_opened".to_string(), self.connections_opened.load(Ordering::Relaxed));
        m.insert("unsolicited_closes".to_string(), self.unsolicited_closes.load(Ordering::Relaxed));
        m.insert("auto_reconnects".to_string(), self.auto_reconnects.load(Ordering::Relaxed));
        m.insert("rejected_transitions".to_string(), self.rejected_transitions.load(Ordering::Relaxed));
        m.insert("messages_received".to_string(), self.messages_received.load(Ordering::Relaxed));
        m.insert("messages_sent".to_string(), self.messages_sent.load(Ordering::Relaxed));
        m.insert("send_failures".to_string(), self.send_failures.load(Ordering::Relaxed));
        m.insert("transport_errors".to_string(), self.transport_errors.load(Ordering::Relaxed));
        m.insert("stale_events".to_string(), self.stale_events.load(Ordering::Relaxed));
        m
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_export() {
        let metrics = ConnectionMetrics::new();
        metrics.record_connect_attempt();
        metrics.record_connect_attempt();
        metrics.record_message_received();

        let exported = metrics.export();
        assert_eq!(exported["connect_attempts"], 2);
        assert_eq!(exported["messages_received"], 1);
        assert_eq!(exported["auto_reconnects"], 0);
        assert_eq!(exported.len(), 10);
    }
}
