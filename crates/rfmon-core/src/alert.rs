//! Alert Publisher
//!
//! Stateless-for-producers forwarding of alerts to the external sink.
//! Producers never track delivery: duplicate suppression on
//! (kind, related event id) lives here, so a condition that several stages
//! notice still reaches the sink exactly once. Delivery to the sink is
//! at-least-once and must be non-blocking from the publisher's view —
//! sinks buffer or fire-and-forget.

use std::collections::HashSet;

use tracing::info;

use crate::types::{Alert, AlertKind};

/// Downstream alert consumer (dashboard, log, notification layer).
///
/// Implementations must not block the caller.
pub trait AlertSink: Send {
    fn publish(&mut self, alert: &Alert);
}

/// Sink that forwards alerts to the `tracing` log.
#[derive(Debug, Default)]
pub struct LogSink;

impl AlertSink for LogSink {
    fn publish(&mut self, alert: &Alert) {
        info!(
            severity = %alert.severity,
            kind = %alert.kind,
            event = ?alert.related_event_id,
            t = alert.timestamp,
            "{}",
            alert.details
        );
    }
}

/// Sink that collects alerts into a vector. Test and demo use.
#[derive(Debug, Default)]
pub struct VecSink {
    pub alerts: Vec<Alert>,
}

impl AlertSink for VecSink {
    fn publish(&mut self, alert: &Alert) {
        self.alerts.push(alert.clone());
    }
}

/// Deduplicating forwarder in front of an [`AlertSink`].
pub struct AlertPublisher {
    sink: Box<dyn AlertSink>,
    seen: HashSet<(AlertKind, Option<u64>)>,
    published: u64,
    suppressed: u64,
}

impl std::fmt::Debug for AlertPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertPublisher")
            .field("published", &self.published)
            .field("suppressed", &self.suppressed)
            .finish()
    }
}

impl AlertPublisher {
    pub fn new(sink: Box<dyn AlertSink>) -> Self {
        Self {
            sink,
            seen: HashSet::new(),
            published: 0,
            suppressed: 0,
        }
    }

    /// Forward an alert unless the same (kind, event) was already
    /// published.
    pub fn publish(&mut self, alert: &Alert) {
        let key = (alert.kind, alert.related_event_id);
        if self.seen.insert(key) {
            self.sink.publish(alert);
            self.published += 1;
        } else {
            self.suppressed += 1;
        }
    }

    /// Forget a previously published condition so it may alert again.
    /// Used for persistent conditions that recover (e.g. RF coverage).
    pub fn clear(&mut self, kind: AlertKind, related_event_id: Option<u64>) {
        self.seen.remove(&(kind, related_event_id));
    }

    pub fn published(&self) -> u64 {
        self.published
    }

    pub fn suppressed(&self) -> u64 {
        self.suppressed
    }
}
