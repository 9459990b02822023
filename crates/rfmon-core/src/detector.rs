//! Replay & Anomaly Detector
//!
//! Stateful engine tracking inferred transmitters across time. Each signal
//! event is fingerprinted by (frequency bucket, modulation class, leading
//! bits); per-fingerprint profiles run a small state machine:
//!
//! ```text
//!            first sighting           novel code
//!   (none) ──────────────► UNKNOWN ──────────────► TRACKED ◄─┐
//!                             │                       │       │ novel code
//!                             │ code repeat           │ code  │
//!                             ▼                       ▼ repeat│
//!                          SUSPECT ◄──────────────────────────┘
//! ```
//!
//! Rolling-code systems never legitimately repeat a code, so any exact
//! repeat of a prior history entry is evidence of capture-and-replay and
//! raises a CRITICAL alert. The detector also tracks per-band burst rates
//! for jamming episodes (one WARNING per episode, not per window) and
//! flags transmitters re-keying faster than a human plausibly could.
//!
//! Profiles unseen past the inactivity timeout are evicted lazily on the
//! next pass; eviction never blocks ingestion.

use std::collections::{HashMap, VecDeque};

use tracing::{debug, info};

use crate::config::MonitorConfig;
use crate::types::{Alert, AlertKind, ModulationClass, Severity, SignalEvent};

/// Number of leading decoded bits folded into the fingerprint. Fob
/// preambles and device ids live in the first byte; the rolling payload
/// must stay out of the fingerprint or a replay would land in a fresh
/// profile.
const FINGERPRINT_LEAD_BITS: usize = 8;

/// Derived identifier grouping events believed to share a physical
/// transmitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    /// Frequency quantized to the configured bucket width.
    pub freq_bucket: i64,
    pub class: ModulationClass,
    /// Leading bits as (count, packed value), when a decode exists.
    pub lead: Option<(u8, u8)>,
}

/// Tracking state of one transmitter profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    /// Newly sighted, nothing known yet.
    Unknown,
    /// Behaving like a normal rolling-code transmitter.
    Tracked,
    /// Replayed a code at least once.
    Suspect,
}

/// Per-transmitter history, mutated only by the detector.
#[derive(Debug, Clone)]
pub struct TransmitterProfile {
    pub fingerprint: Fingerprint,
    pub state: TrackState,
    pub last_seen_code: Option<Vec<bool>>,
    /// Observed codes, most-recent-last, bounded FIFO.
    pub code_history: VecDeque<Vec<bool>>,
    pub first_seen: f64,
    pub last_seen: f64,
}

/// Per-band burst bookkeeping for jamming detection.
#[derive(Debug, Clone, Default)]
struct BandActivity {
    /// (timestamp, had clean demod) for bursts inside the rate window.
    bursts: VecDeque<(f64, bool)>,
    in_episode: bool,
    /// Start of the current below-threshold stretch during an episode.
    below_since: Option<f64>,
    /// Time of the last burst on this band.
    last_seen: f64,
}

/// Replay, unknown-transmitter, jamming and timing anomaly detection.
#[derive(Debug)]
pub struct ReplayAnomalyDetector {
    history_cap: usize,
    inactivity_timeout_s: f64,
    bucket_hz: f64,
    min_intertx_gap_s: f64,
    jamming_rate_threshold: f64,
    jamming_window_s: f64,
    jamming_cooldown_s: f64,
    profiles: HashMap<Fingerprint, TransmitterProfile>,
    bands: HashMap<i64, BandActivity>,
}

impl ReplayAnomalyDetector {
    pub fn new(config: &MonitorConfig) -> Self {
        Self {
            history_cap: config.code_history_len,
            inactivity_timeout_s: config.inactivity_timeout_s,
            bucket_hz: config.fingerprint_bucket_hz,
            min_intertx_gap_s: config.min_intertx_gap_s,
            jamming_rate_threshold: config.jamming_rate_threshold,
            jamming_window_s: config.jamming_window_s,
            jamming_cooldown_s: config.jamming_cooldown_s,
            profiles: HashMap::new(),
            bands: HashMap::new(),
        }
    }

    /// Process one signal event, returning any alerts it raised.
    pub fn process(&mut self, event: &SignalEvent) -> Vec<Alert> {
        let now = event.timestamp;
        self.sweep(now);

        let mut alerts = Vec::new();
        if let Some(alert) = self.update_band(event) {
            alerts.push(alert);
        }

        let fp = self.fingerprint(event);
        match self.profiles.get_mut(&fp) {
            None => {
                let mut profile = TransmitterProfile {
                    fingerprint: fp,
                    state: TrackState::Unknown,
                    last_seen_code: event.decoded_bits.clone(),
                    code_history: VecDeque::new(),
                    first_seen: now,
                    last_seen: now,
                };
                if let Some(bits) = &event.decoded_bits {
                    profile.code_history.push_back(bits.clone());
                }
                self.profiles.insert(fp, profile);
                info!(?fp, "new transmitter sighted");
                alerts.push(Alert {
                    severity: Severity::Info,
                    kind: AlertKind::UnknownTransmitter,
                    related_event_id: Some(event.id),
                    timestamp: now,
                    details: format!(
                        "first sighting of transmitter at {:.3} MHz ({})",
                        event.frequency / 1e6,
                        event.modulation_class
                    ),
                });
            }
            Some(profile) => {
                let gap = now - profile.last_seen;
                if event.decoded_bits.is_some() && gap >= 0.0 && gap < self.min_intertx_gap_s {
                    alerts.push(Alert {
                        severity: Severity::Warning,
                        kind: AlertKind::TimingAnomaly,
                        related_event_id: Some(event.id),
                        timestamp: now,
                        details: format!(
                            "re-transmission after {:.0} ms (minimum plausible {:.0} ms)",
                            gap * 1e3,
                            self.min_intertx_gap_s * 1e3
                        ),
                    });
                }

                if let Some(bits) = &event.decoded_bits {
                    if profile.code_history.contains(bits) {
                        profile.state = TrackState::Suspect;
                        info!(?fp, "code repeat detected");
                        alerts.push(Alert {
                            severity: Severity::Critical,
                            kind: AlertKind::Replay,
                            related_event_id: Some(event.id),
                            timestamp: now,
                            details: format!(
                                "rolling code repeated after {:.1} s on {:.3} MHz",
                                now - profile.last_seen,
                                event.frequency / 1e6
                            ),
                        });
                    } else {
                        if profile.code_history.len() == self.history_cap {
                            profile.code_history.pop_front();
                        }
                        profile.code_history.push_back(bits.clone());
                        profile.state = TrackState::Tracked;
                    }
                    profile.last_seen_code = Some(bits.clone());
                }
                profile.last_seen = now;
            }
        }
        alerts
    }

    /// Evict profiles unseen past the inactivity timeout. Called on every
    /// pass; cheap relative to ingestion.
    pub fn sweep(&mut self, now: f64) {
        let timeout = self.inactivity_timeout_s;
        let before = self.profiles.len();
        self.profiles.retain(|_, p| now - p.last_seen <= timeout);
        let evicted = before - self.profiles.len();
        if evicted > 0 {
            debug!(evicted, "evicted inactive transmitter profiles");
        }
        self.bands.retain(|_, b| now - b.last_seen <= timeout);
    }

    /// Number of frequency bands with tracked activity.
    pub fn band_count(&self) -> usize {
        self.bands.len()
    }

    /// Number of live transmitter profiles.
    pub fn profile_count(&self) -> usize {
        self.profiles.len()
    }

    /// Snapshot copy of a profile, for the alert/inspection path.
    pub fn profile(&self, fp: &Fingerprint) -> Option<TransmitterProfile> {
        self.profiles.get(fp).cloned()
    }

    /// Fingerprint for an event: frequency bucket, modulation class, up to
    /// eight leading decoded bits.
    pub fn fingerprint(&self, event: &SignalEvent) -> Fingerprint {
        let lead = event.decoded_bits.as_ref().map(|bits| {
            let n = bits.len().min(FINGERPRINT_LEAD_BITS);
            let mut packed = 0u8;
            for &bit in bits.iter().take(n) {
                packed = (packed << 1) | bit as u8;
            }
            (n as u8, packed)
        });
        Fingerprint {
            freq_bucket: (event.frequency / self.bucket_hz).round() as i64,
            class: event.modulation_class,
            lead,
        }
    }

    /// Update per-band burst bookkeeping; returns a JAMMING alert when a
    /// new episode opens.
    fn update_band(&mut self, event: &SignalEvent) -> Option<Alert> {
        let now = event.timestamp;
        let bucket = (event.frequency / self.bucket_hz).round() as i64;
        let band = self.bands.entry(bucket).or_default();

        // Total silence is a de facto cooldown: without this, an episode
        // could only close via fresh traffic on the band, and a jammer
        // returning after a long pause would never re-alert.
        if band.in_episode && now - band.last_seen >= self.jamming_cooldown_s {
            band.in_episode = false;
            band.below_since = None;
            debug!(bucket, "jamming episode closed by silence");
        }
        band.last_seen = now;

        band.bursts.push_back((now, event.decoded_bits.is_some()));
        while let Some(&(t, _)) = band.bursts.front() {
            if now - t > self.jamming_window_s {
                band.bursts.pop_front();
            } else {
                break;
            }
        }

        let rate = band.bursts.len() as f64 / self.jamming_window_s;
        let any_clean = band.bursts.iter().any(|&(_, clean)| clean);
        let over = rate > self.jamming_rate_threshold && !any_clean;

        if over {
            band.below_since = None;
            if !band.in_episode {
                band.in_episode = true;
                info!(bucket, rate, "jamming episode opened");
                return Some(Alert {
                    severity: Severity::Warning,
                    kind: AlertKind::Jamming,
                    related_event_id: Some(event.id),
                    timestamp: now,
                    details: format!(
                        "{:.0} undecodable bursts/s near {:.3} MHz",
                        rate,
                        event.frequency / 1e6
                    ),
                });
            }
        } else if band.in_episode {
            let since = *band.below_since.get_or_insert(now);
            if now - since >= self.jamming_cooldown_s {
                band.in_episode = false;
                band.below_since = None;
                debug!(bucket, "jamming episode closed");
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> MonitorConfig {
        MonitorConfig {
            code_history_len: 4,
            inactivity_timeout_s: 100.0,
            min_intertx_gap_s: 0.1,
            jamming_rate_threshold: 10.0,
            jamming_window_s: 1.0,
            jamming_cooldown_s: 2.0,
            ..Default::default()
        }
    }

    fn event(id: u64, t: f64, bits: Option<Vec<bool>>) -> SignalEvent {
        SignalEvent {
            id,
            timestamp: t,
            frequency: 433.92e6,
            bandwidth: 10_000.0,
            modulation_class: if bits.is_some() {
                ModulationClass::Ook
            } else {
                ModulationClass::Unknown
            },
            decoded_bits: bits,
            power_db: -50.0,
        }
    }

    fn kinds(alerts: &[Alert]) -> Vec<AlertKind> {
        alerts.iter().map(|a| a.kind).collect()
    }

    #[test]
    fn test_first_sighting_alerts_once() {
        let mut det = ReplayAnomalyDetector::new(&test_config());
        let alerts = det.process(&event(0, 0.0, Some(vec![true, false, true, true])));
        assert_eq!(kinds(&alerts), vec![AlertKind::UnknownTransmitter]);
        assert_eq!(alerts[0].severity, Severity::Info);

        // Same transmitter again with a novel code: no re-alert.
        let alerts = det.process(&event(1, 1.0, Some(vec![true, false, true, false])));
        assert!(alerts.is_empty(), "got {:?}", kinds(&alerts));
    }

    #[test]
    fn test_replay_raises_critical() {
        // Scenario: [1,0,1,1] at t=0, identical code at t=5.0.
        let mut det = ReplayAnomalyDetector::new(&test_config());
        let code = vec![true, false, true, true];
        det.process(&event(0, 0.0, Some(code.clone())));
        let alerts = det.process(&event(1, 5.0, Some(code)));
        assert_eq!(kinds(&alerts), vec![AlertKind::Replay]);
        assert_eq!(alerts[0].severity, Severity::Critical);
        assert_eq!(alerts[0].related_event_id, Some(1));

        let fp = det.fingerprint(&event(1, 5.0, Some(vec![true, false, true, true])));
        assert_eq!(det.profile(&fp).unwrap().state, TrackState::Suspect);
    }

    #[test]
    fn test_replay_regardless_of_elapsed_time() {
        let mut det = ReplayAnomalyDetector::new(&test_config());
        let code = vec![true, false, true, true];
        det.process(&event(0, 0.0, Some(code.clone())));
        // Well within the inactivity timeout but a long gap.
        let alerts = det.process(&event(1, 90.0, Some(code)));
        assert_eq!(kinds(&alerts), vec![AlertKind::Replay]);
    }

    #[test]
    fn test_code_history_fifo_bound() {
        // Codes share the leading byte so they land in one profile; the
        // suffix varies. Capacity 4: the 5th novel code evicts the 1st.
        let mut det = ReplayAnomalyDetector::new(&test_config());
        let make = |suffix: u8| -> Vec<bool> {
            let mut bits = vec![true, false, true, true, false, false, true, false];
            for k in (0..4).rev() {
                bits.push((suffix >> k) & 1 == 1);
            }
            bits
        };
        for (i, s) in [0u8, 1, 2, 3, 4].iter().enumerate() {
            det.process(&event(i as u64, i as f64, Some(make(*s))));
        }
        let fp = det.fingerprint(&event(9, 9.0, Some(make(0))));
        let profile = det.profile(&fp).unwrap();
        assert_eq!(profile.code_history.len(), 4);
        // Oldest (suffix 0) evicted: replaying it is no longer caught...
        assert!(!profile.code_history.contains(&make(0)));
        // ...but the newest is.
        assert!(profile.code_history.contains(&make(4)));
    }

    #[test]
    fn test_timing_anomaly_on_fast_rekey() {
        let mut det = ReplayAnomalyDetector::new(&test_config());
        det.process(&event(0, 0.0, Some(vec![true, false, true, true])));
        // 20 ms later, faster than any human press.
        let alerts = det.process(&event(1, 0.02, Some(vec![true, false, true, false])));
        assert!(kinds(&alerts).contains(&AlertKind::TimingAnomaly));

        // A human-paced repeat does not alert.
        let alerts = det.process(&event(2, 1.5, Some(vec![true, false, false, true])));
        assert!(!kinds(&alerts).contains(&AlertKind::TimingAnomaly));
    }

    #[test]
    fn test_jamming_one_alert_per_episode() {
        // 3 windows of bursts above threshold with zero clean demods:
        // exactly one JAMMING alert for the whole episode.
        let mut det = ReplayAnomalyDetector::new(&test_config());
        let mut jamming_alerts = 0;
        let mut id = 0;
        for window in 0..3 {
            for i in 0..15 {
                let t = window as f64 + i as f64 / 15.0;
                let alerts = det.process(&event(id, t, None));
                id += 1;
                jamming_alerts += kinds(&alerts)
                    .iter()
                    .filter(|&&k| k == AlertKind::Jamming)
                    .count();
            }
        }
        assert_eq!(jamming_alerts, 1);
    }

    #[test]
    fn test_jamming_new_episode_after_cooldown() {
        fn drive(
            det: &mut ReplayAnomalyDetector,
            t0: f64,
            id: &mut u64,
            jamming: &mut Vec<f64>,
        ) {
            for i in 0..30 {
                let t = t0 + i as f64 / 30.0;
                for a in det.process(&event(*id, t, None)) {
                    if a.kind == AlertKind::Jamming {
                        jamming.push(t);
                    }
                }
                *id += 1;
            }
        }

        let mut det = ReplayAnomalyDetector::new(&test_config());
        let mut jamming = Vec::new();
        let mut id = 0u64;
        drive(&mut det, 0.0, &mut id, &mut jamming);
        // Quiet stretch longer than the 2 s cooldown, via sparse clean traffic.
        det.process(&event(id, 5.0, Some(vec![true, true, false, true])));
        id += 1;
        det.process(&event(id, 8.0, Some(vec![true, true, false, false])));
        id += 1;
        drive(&mut det, 10.0, &mut id, &mut jamming);
        assert_eq!(jamming.len(), 2, "each episode alerts exactly once");
    }

    #[test]
    fn test_jamming_realerts_after_silent_gap() {
        // Episode, then nothing at all on the band for far longer than
        // the cooldown: the silence ends the episode, and a returning
        // jammer alerts again.
        let mut det = ReplayAnomalyDetector::new(&test_config());
        let mut jamming = 0;
        let mut id = 0u64;
        for t0 in [0.0, 50.0] {
            for i in 0..30 {
                for a in det.process(&event(id, t0 + i as f64 / 30.0, None)) {
                    if a.kind == AlertKind::Jamming {
                        jamming += 1;
                    }
                }
                id += 1;
            }
        }
        assert_eq!(jamming, 2, "each burst storm is its own episode");
    }

    #[test]
    fn test_stale_band_state_evicted() {
        let mut det = ReplayAnomalyDetector::new(&test_config());
        det.process(&event(0, 0.0, None));
        assert_eq!(det.band_count(), 1);
        // Activity on another band far past the inactivity timeout drops
        // the idle band's bookkeeping along with stale profiles.
        let mut ev = event(1, 500.0, None);
        ev.frequency = 315.0e6;
        det.process(&ev);
        assert_eq!(det.band_count(), 1);
    }

    #[test]
    fn test_inactive_profile_evicted() {
        let mut det = ReplayAnomalyDetector::new(&test_config());
        det.process(&event(0, 0.0, Some(vec![true, false, true, true])));
        assert_eq!(det.profile_count(), 1);
        // Next pass far beyond the 100 s inactivity timeout evicts it, and
        // the transmitter counts as new again.
        let alerts = det.process(&event(1, 500.0, Some(vec![true, false, true, true])));
        assert_eq!(kinds(&alerts), vec![AlertKind::UnknownTransmitter]);
        assert_eq!(det.profile_count(), 1);
    }

    #[test]
    fn test_undecodable_events_do_not_share_fob_profiles() {
        let mut det = ReplayAnomalyDetector::new(&test_config());
        det.process(&event(0, 0.0, Some(vec![true, false, true, true])));
        det.process(&event(1, 1.0, None));
        assert_eq!(det.profile_count(), 2);
    }
}
