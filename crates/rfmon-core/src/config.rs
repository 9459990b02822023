//! Monitor configuration
//!
//! All tuning knobs for the pipeline, consumed once at startup. Invalid
//! values are fatal: `validate()` must pass before the pipeline starts
//! (a pipeline running with a nonsense threshold silently detects nothing,
//! which is worse than refusing to start).
//!
//! Defaults are tuned for 433.92 MHz key-fob monitoring at 250 kS/s; the
//! same settings work for the 315 MHz band common on North American
//! vehicles.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::{ActionType, ModulationClass, MonitorError, MonitorResult};

/// Full pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Sample rate in Hz.
    pub sample_rate: f64,
    /// Center frequency the radio is tuned to, in Hz.
    pub center_frequency: f64,
    /// FFT size (frame length). Larger = finer frequency resolution,
    /// higher detection latency.
    pub fft_size: usize,
    /// EMA weight for noise floor updates, in (0, 1]. Smaller = longer
    /// memory.
    pub noise_decay: f64,
    /// Burst detection threshold above the noise floor, in dB.
    pub threshold_db: f64,
    /// A band must stay above threshold this long before a burst opens.
    pub min_duration_ms: f64,
    /// A burst closes after the band stays below threshold this long
    /// (hysteresis against short dropouts).
    pub hold_time_ms: f64,
    /// Per-transmitter rolling-code history retention (FIFO bound).
    pub code_history_len: usize,
    /// Transmitter profiles unseen for this long are evicted, in seconds.
    pub inactivity_timeout_s: f64,
    /// Telemetry correlation window, in seconds (± around the RF event).
    pub correlation_window_s: f64,
    /// Burst rate (bursts/sec) above which a band with no clean
    /// demodulations counts as jammed.
    pub jamming_rate_threshold: f64,
    /// Sliding window over which the jamming burst rate is measured, in
    /// seconds.
    pub jamming_window_s: f64,
    /// A jamming episode ends once the rate stays below threshold this
    /// long, in seconds.
    pub jamming_cooldown_s: f64,
    /// Minimum plausible gap between two transmissions of one transmitter,
    /// in seconds. Faster repeats raise TIMING_ANOMALY.
    pub min_intertx_gap_s: f64,
    /// Frequency bucket width for transmitter fingerprinting, in Hz.
    pub fingerprint_bucket_hz: f64,
    /// Spectral segments closer than this many bins are treated as one
    /// band. Bridges the tone spacing of FSK transmissions, whose spectrum
    /// would otherwise split into two bursts.
    pub band_merge_gap_bins: usize,
    /// Capacity of each inter-stage queue (overflow drops oldest).
    pub queue_capacity: usize,
    /// Capture stall timeout: no data for this long counts as hardware
    /// failure, in seconds.
    pub stall_timeout_s: f64,
    /// Which vehicle actions plausibly explain each modulation class.
    pub action_map: HashMap<ModulationClass, Vec<ActionType>>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        let mut action_map = HashMap::new();
        action_map.insert(
            ModulationClass::Ook,
            vec![ActionType::Unlock, ActionType::Lock, ActionType::TrunkRelease],
        );
        action_map.insert(
            ModulationClass::Ask,
            vec![ActionType::Unlock, ActionType::Lock, ActionType::TrunkRelease],
        );
        action_map.insert(
            ModulationClass::Fsk,
            vec![ActionType::RemoteStart, ActionType::TirePressureQuery],
        );

        Self {
            sample_rate: 250_000.0,
            center_frequency: 433.92e6,
            fft_size: 1024,
            noise_decay: 0.05,
            threshold_db: 10.0,
            min_duration_ms: 5.0,
            hold_time_ms: 10.0,
            code_history_len: 16,
            inactivity_timeout_s: 300.0,
            correlation_window_s: 2.0,
            jamming_rate_threshold: 20.0,
            jamming_window_s: 1.0,
            jamming_cooldown_s: 5.0,
            min_intertx_gap_s: 0.1,
            fingerprint_bucket_hz: 25_000.0,
            band_merge_gap_bins: 16,
            queue_capacity: 32,
            stall_timeout_s: 2.0,
            action_map,
        }
    }
}

impl MonitorConfig {
    /// Validate the configuration. Errors here are fatal at startup.
    pub fn validate(&self) -> MonitorResult<()> {
        if !(self.sample_rate > 0.0) {
            return Err(MonitorError::InvalidSampleRate(self.sample_rate));
        }
        if self.fft_size < 16 || !self.fft_size.is_power_of_two() {
            return Err(MonitorError::InvalidFftSize(self.fft_size));
        }
        if !(self.noise_decay > 0.0 && self.noise_decay <= 1.0) {
            return Err(MonitorError::InvalidNoiseDecay(self.noise_decay));
        }
        if !(self.threshold_db > 0.0) {
            return Err(MonitorError::InvalidThreshold(self.threshold_db));
        }
        for (name, value) in [
            ("min_duration_ms", self.min_duration_ms),
            ("hold_time_ms", self.hold_time_ms),
        ] {
            if !(value >= 0.0) {
                return Err(MonitorError::InvalidDuration { name, value });
            }
        }
        for (name, value) in [
            ("inactivity_timeout_s", self.inactivity_timeout_s),
            ("correlation_window_s", self.correlation_window_s),
            ("jamming_rate_threshold", self.jamming_rate_threshold),
            ("jamming_window_s", self.jamming_window_s),
            ("jamming_cooldown_s", self.jamming_cooldown_s),
            ("min_intertx_gap_s", self.min_intertx_gap_s),
            ("fingerprint_bucket_hz", self.fingerprint_bucket_hz),
            ("stall_timeout_s", self.stall_timeout_s),
        ] {
            if !(value > 0.0) {
                return Err(MonitorError::InvalidWindow { name, value });
            }
        }
        for (name, value) in [
            ("code_history_len", self.code_history_len),
            ("queue_capacity", self.queue_capacity),
        ] {
            if value == 0 {
                return Err(MonitorError::InvalidCapacity { name, value });
            }
        }
        Ok(())
    }

    /// Actions compatible with a modulation class. Unmapped classes get an
    /// empty slice (nothing explains them, so everything is suspicious).
    pub fn compatible_actions(&self, class: ModulationClass) -> &[ActionType] {
        self.action_map.get(&class).map(Vec::as_slice).unwrap_or(&[])
    }
}
