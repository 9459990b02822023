//! Telemetry Correlator
//!
//! Matches classified signal events against vehicle actions. An RF
//! transmission that looks like a vehicle-control signature (non-UNKNOWN
//! modulation) with no compatible vehicle action inside ±window of its
//! timestamp is suspicious, e.g. a spoofed unlock attempt, and raises an
//! UNCORRELATED_RF warning.
//!
//! The verdict is deferred: the normal causal order is fob transmits,
//! *then* the bus reports the action, so an event with no explanation yet
//! is held pending until either a matching action arrives or the window
//! elapses past its timestamp. Matching tolerates clock skew within the
//! window but is exact on action-type compatibility.
//!
//! Telemetry gaps are treated as "no corroborating action", never as an
//! error: a vehicle that reports nothing simply fails to explain RF
//! activity.

use std::collections::{HashMap, VecDeque};

use tracing::debug;

use crate::config::MonitorConfig;
use crate::types::{ActionType, Alert, AlertKind, ModulationClass, Severity, SignalEvent, VehicleActionEvent};

/// A classified event awaiting an explanation or window expiry.
#[derive(Debug, Clone)]
struct PendingEvent {
    id: u64,
    timestamp: f64,
    frequency: f64,
    class: ModulationClass,
}

/// Windowed correlation of signal events with vehicle actions.
#[derive(Debug)]
pub struct TelemetryCorrelator {
    window_s: f64,
    compat: HashMap<ModulationClass, Vec<ActionType>>,
    /// Recent actions, time-ordered, bounded by the window.
    actions: VecDeque<VehicleActionEvent>,
    /// Unexplained classified events, time-ordered, awaiting the window.
    pending: VecDeque<PendingEvent>,
}

impl TelemetryCorrelator {
    pub fn new(config: &MonitorConfig) -> Self {
        Self {
            window_s: config.correlation_window_s,
            compat: config.action_map.clone(),
            actions: VecDeque::new(),
            pending: VecDeque::new(),
        }
    }

    /// Record a vehicle action. A late-arriving report also resolves
    /// events already under suspicion.
    pub fn push_action(&mut self, action: VehicleActionEvent) {
        let window_s = self.window_s;
        let compat = &self.compat;
        self.pending.retain(|p| {
            let explained = (action.timestamp - p.timestamp).abs() <= window_s
                && compat
                    .get(&p.class)
                    .map(Vec::as_slice)
                    .unwrap_or(&[])
                    .contains(&action.action_type);
            if explained {
                debug!(event_id = p.id, "pending RF event explained by vehicle action");
            }
            !explained
        });
        self.actions.push_back(action);
        // The action stream advances the clock even when no RF arrives
        // (degraded telemetry-only operation); the window stays bounded.
        self.prune(action.timestamp);
    }

    /// Number of actions currently retained.
    pub fn window_len(&self) -> usize {
        self.actions.len()
    }

    /// Number of events awaiting a verdict.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Check one signal event against the action window.
    ///
    /// An unexplained classified event goes pending rather than alerting
    /// outright. Returns the alerts for earlier pending events whose
    /// window has now fully elapsed.
    pub fn process(&mut self, event: &SignalEvent) -> Vec<Alert> {
        let alerts = self.expire(event.timestamp);

        // Unclassified energy carries no control signature; the replay
        // detector owns that evidence.
        if event.modulation_class == ModulationClass::Unknown {
            return alerts;
        }

        self.prune(event.timestamp);

        let compatible = self
            .compat
            .get(&event.modulation_class)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        let matched = self.actions.iter().any(|a| {
            (a.timestamp - event.timestamp).abs() <= self.window_s
                && compatible.contains(&a.action_type)
        });

        if matched {
            debug!(event_id = event.id, "RF event explained by vehicle action");
        } else {
            self.pending.push_back(PendingEvent {
                id: event.id,
                timestamp: event.timestamp,
                frequency: event.frequency,
                class: event.modulation_class,
            });
        }
        alerts
    }

    /// Decide pending events whose window has elapsed by `now` (capture
    /// clock). Anything still unexplained is uncorrelated for good.
    pub fn expire(&mut self, now: f64) -> Vec<Alert> {
        let mut alerts = Vec::new();
        while let Some(p) = self.pending.front() {
            if now - p.timestamp <= self.window_s {
                break;
            }
            alerts.push(self.uncorrelated(p));
            self.pending.pop_front();
        }
        alerts
    }

    /// Decide everything still pending. For stream end, when no further
    /// action can arrive.
    pub fn flush(&mut self) -> Vec<Alert> {
        let pending: Vec<PendingEvent> = self.pending.drain(..).collect();
        pending.iter().map(|p| self.uncorrelated(p)).collect()
    }

    fn uncorrelated(&self, p: &PendingEvent) -> Alert {
        Alert {
            severity: Severity::Warning,
            kind: AlertKind::UncorrelatedRf,
            related_event_id: Some(p.id),
            timestamp: p.timestamp,
            details: format!(
                "{} transmission at {:.3} MHz with no matching vehicle action within {:.1} s",
                p.class,
                p.frequency / 1e6,
                self.window_s
            ),
        }
    }

    /// Drop actions too old to ever match again.
    fn prune(&mut self, now: f64) {
        while let Some(front) = self.actions.front() {
            if now - front.timestamp > self.window_s {
                self.actions.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn correlator() -> TelemetryCorrelator {
        TelemetryCorrelator::new(&MonitorConfig {
            correlation_window_s: 2.0,
            ..Default::default()
        })
    }

    fn ook_event(id: u64, t: f64) -> SignalEvent {
        SignalEvent {
            id,
            timestamp: t,
            frequency: 433.92e6,
            bandwidth: 10_000.0,
            modulation_class: ModulationClass::Ook,
            decoded_bits: Some(vec![true, false, true, true]),
            power_db: -50.0,
        }
    }

    fn unlock(t: f64) -> VehicleActionEvent {
        VehicleActionEvent {
            timestamp: t,
            action_type: ActionType::Unlock,
        }
    }

    #[test]
    fn test_action_before_event_suppresses_alert() {
        let mut corr = correlator();
        corr.push_action(unlock(10.5));
        assert!(corr.process(&ook_event(0, 11.0)).is_empty());
        assert_eq!(corr.pending_len(), 0);
        assert!(corr.flush().is_empty());
    }

    #[test]
    fn test_late_action_still_explains_event() {
        // Causal order: fob transmits, then the bus reports the unlock.
        let mut corr = correlator();
        assert!(corr.process(&ook_event(0, 10.0)).is_empty());
        assert_eq!(corr.pending_len(), 1);
        corr.push_action(unlock(10.8));
        assert_eq!(corr.pending_len(), 0);
        assert!(corr.expire(100.0).is_empty());
    }

    #[test]
    fn test_unmatched_event_alerts_after_window() {
        let mut corr = correlator();
        assert!(corr.process(&ook_event(0, 10.0)).is_empty());
        // Verdict deferred while a matching action may still arrive.
        assert!(corr.expire(11.0).is_empty());
        let alerts = corr.expire(12.5);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::UncorrelatedRf);
        assert_eq!(alerts[0].severity, Severity::Warning);
        assert_eq!(alerts[0].related_event_id, Some(0));
    }

    #[test]
    fn test_action_outside_window_does_not_explain() {
        let mut corr = correlator();
        corr.push_action(unlock(5.0));
        assert!(corr.process(&ook_event(0, 10.0)).is_empty());
        assert_eq!(corr.flush().len(), 1);
    }

    #[test]
    fn test_incompatible_action_does_not_explain() {
        // OOK maps to unlock/lock/trunk; a tire-pressure query nearby is
        // not an explanation.
        let mut corr = correlator();
        assert!(corr.process(&ook_event(0, 10.0)).is_empty());
        corr.push_action(VehicleActionEvent {
            timestamp: 10.0,
            action_type: ActionType::TirePressureQuery,
        });
        assert_eq!(corr.pending_len(), 1);
        assert_eq!(corr.flush().len(), 1);
    }

    #[test]
    fn test_unknown_modulation_never_alerts() {
        let mut corr = correlator();
        let mut ev = ook_event(0, 10.0);
        ev.modulation_class = ModulationClass::Unknown;
        ev.decoded_bits = None;
        assert!(corr.process(&ev).is_empty());
        assert_eq!(corr.pending_len(), 0);
        assert!(corr.flush().is_empty());
    }

    #[test]
    fn test_window_is_bounded() {
        let mut corr = correlator();
        for i in 0..100 {
            corr.push_action(VehicleActionEvent {
                timestamp: i as f64 * 0.1,
                action_type: ActionType::Lock,
            });
        }
        assert!(corr.window_len() <= 21);
    }

    #[test]
    fn test_action_window_bounded_without_rf() {
        // Degraded telemetry-only operation: actions keep flowing with no
        // classified RF to trigger pruning from the event side.
        let mut corr = correlator();
        for i in 0..10_000 {
            corr.push_action(VehicleActionEvent {
                timestamp: i as f64,
                action_type: ActionType::Lock,
            });
        }
        assert!(corr.window_len() <= 3, "window holds {}", corr.window_len());
    }

    #[test]
    fn test_no_telemetry_is_not_an_error() {
        let mut corr = correlator();
        // Empty window: suspicious but handled, never a failure.
        assert!(corr.process(&ook_event(0, 1.0)).is_empty());
        assert_eq!(corr.flush().len(), 1);
    }
}
