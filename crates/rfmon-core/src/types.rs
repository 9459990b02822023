//! Core types for the RF monitoring pipeline
//!
//! This module defines the records that flow between pipeline stages:
//!
//! ```text
//! SampleBlock ─► SpectralFrame ─► Burst ─► SignalEvent ─► Alert
//!                (transient)     (scoped)  (immutable)
//! ```
//!
//! All timestamps are seconds on the capture clock (`f64`). Mapping to wall
//! time is the embedder's concern; the pipeline only ever compares intervals.

use num_complex::Complex64;
use serde::{Deserialize, Serialize};

/// Type alias for complex numbers using f64 precision
pub type Complex = Complex64;

/// A single I/Q sample point
pub type IQSample = Complex64;

/// A buffer of I/Q samples
pub type IQBuffer = Vec<IQSample>;

/// Result type for pipeline operations
pub type MonitorResult<T> = Result<T, MonitorError>;

/// Errors that can occur in the monitoring pipeline.
///
/// Only configuration problems are fatal. Everything else — undecodable
/// bursts, queue overflow, source dropouts — is handled locally and never
/// propagated as an error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MonitorError {
    #[error("invalid sample rate: {0} Hz. Must be positive")]
    InvalidSampleRate(f64),

    #[error("invalid FFT size: {0}. Must be a power of two >= 16")]
    InvalidFftSize(usize),

    #[error("invalid noise decay: {0}. Must be in (0, 1]")]
    InvalidNoiseDecay(f64),

    #[error("invalid burst threshold: {0} dB. Must be positive")]
    InvalidThreshold(f64),

    #[error("invalid duration parameter {name}: {value} ms")]
    InvalidDuration { name: &'static str, value: f64 },

    #[error("invalid window parameter {name}: {value}")]
    InvalidWindow { name: &'static str, value: f64 },

    #[error("invalid capacity parameter {name}: {value}. Must be nonzero")]
    InvalidCapacity { name: &'static str, value: usize },

    #[error("sample source disconnected")]
    SourceDisconnected,
}

/// A timestamped block of complex baseband samples from the sample source.
///
/// Immutable once produced; owned by the spectral analyzer for the duration
/// of one analysis pass.
#[derive(Debug, Clone)]
pub struct SampleBlock {
    /// Capture time of the first sample, in seconds.
    pub start_timestamp: f64,
    /// Sample rate in Hz.
    pub sample_rate: f64,
    /// Center frequency the radio was tuned to, in Hz.
    pub center_frequency: f64,
    /// Complex baseband samples.
    pub samples: IQBuffer,
}

impl SampleBlock {
    /// Duration of this block in seconds.
    pub fn duration(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate
    }
}

/// One (frequency, power) point of a power spectrum.
#[derive(Debug, Clone, Copy)]
pub struct FrequencyBin {
    /// Absolute frequency in Hz.
    pub frequency: f64,
    /// Power in dB (relative full scale).
    pub power_db: f64,
}

/// A power-spectrum frame produced at fixed cadence by the spectral analyzer.
///
/// Transient: consumed by burst detection, not retained.
#[derive(Debug, Clone)]
pub struct SpectralFrame {
    /// Capture time of the first sample in the frame, in seconds.
    pub timestamp: f64,
    /// Bins ordered by ascending frequency.
    pub bins: Vec<FrequencyBin>,
}

/// A contiguous time/frequency region of elevated RF energy — a candidate
/// transmission.
///
/// Created when a band stays above the noise floor for the configured
/// minimum duration, destroyed after one demodulation attempt.
#[derive(Debug, Clone)]
pub struct Burst {
    /// Time the band first exceeded the detection threshold, in seconds.
    pub start_time: f64,
    /// Time the burst was closed (last-above time plus hold time), in seconds.
    pub end_time: f64,
    /// Center frequency of the occupied band, in Hz.
    pub center_frequency: f64,
    /// Occupied bandwidth in Hz.
    pub bandwidth: f64,
    /// Peak observed power in dB.
    pub peak_power_db: f64,
    /// Raw time-domain samples spanning the burst, scoped to demodulation.
    pub raw_samples: IQBuffer,
}

/// Modulation family of a classified burst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModulationClass {
    /// Frequency-shift keying (remote start, TPMS).
    Fsk,
    /// On-off keying (most 315/433 MHz key fobs).
    Ook,
    /// Amplitude-shift keying with nonzero low level.
    Ask,
    /// No template matched confidently. Not an error — the event still
    /// carries frequency/power evidence for anomaly detection.
    Unknown,
}

impl std::fmt::Display for ModulationClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModulationClass::Fsk => write!(f, "FSK"),
            ModulationClass::Ook => write!(f, "OOK"),
            ModulationClass::Ask => write!(f, "ASK"),
            ModulationClass::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Canonical record of one observed transmission.
///
/// Immutable once built; shared read-only by the detector and correlator.
#[derive(Debug, Clone, Serialize)]
pub struct SignalEvent {
    /// Unique, monotonically increasing id.
    pub id: u64,
    /// Burst start time, in seconds.
    pub timestamp: f64,
    /// Center frequency in Hz.
    pub frequency: f64,
    /// Occupied bandwidth in Hz.
    pub bandwidth: f64,
    /// Classified modulation family.
    pub modulation_class: ModulationClass,
    /// Decoded bit sequence, when a template decoded one. May be shorter
    /// than the transmitter sent — partial decodes are kept, not discarded.
    pub decoded_bits: Option<Vec<bool>>,
    /// Peak power in dB.
    pub power_db: f64,
}

/// Vehicle-originated action reported over the telemetry bus.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VehicleActionEvent {
    /// Time of the action, in seconds (same clock as capture).
    pub timestamp: f64,
    /// What the vehicle reported.
    pub action_type: ActionType,
}

/// Vehicle actions that plausibly coincide with RF transmissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionType {
    Unlock,
    Lock,
    RemoteStart,
    TrunkRelease,
    TirePressureQuery,
}

/// Alert severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "INFO"),
            Severity::Warning => write!(f, "WARNING"),
            Severity::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// What triggered an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlertKind {
    /// A previously observed rolling code was transmitted again.
    Replay,
    /// First sighting of a transmitter fingerprint.
    UnknownTransmitter,
    /// Sustained burst rate with no clean demodulations on a band.
    Jamming,
    /// A decodable transmission with no corroborating vehicle action.
    UncorrelatedRf,
    /// A transmitter re-keyed faster than a human plausibly could.
    TimingAnomaly,
    /// The sample source is down; RF coverage is lost (degraded mode).
    RfCoverageLost,
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertKind::Replay => write!(f, "REPLAY"),
            AlertKind::UnknownTransmitter => write!(f, "UNKNOWN_TRANSMITTER"),
            AlertKind::Jamming => write!(f, "JAMMING"),
            AlertKind::UncorrelatedRf => write!(f, "UNCORRELATED_RF"),
            AlertKind::TimingAnomaly => write!(f, "TIMING_ANOMALY"),
            AlertKind::RfCoverageLost => write!(f, "RF_COVERAGE_LOST"),
        }
    }
}

/// Structured alert, write-once, published at most once per triggering
/// condition (duplicate suppression lives in the publisher).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub severity: Severity,
    pub kind: AlertKind,
    /// Signal event that triggered the alert, when one exists.
    pub related_event_id: Option<u64>,
    /// Time of the triggering condition, in seconds.
    pub timestamp: f64,
    /// Human-readable context.
    pub details: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_duration() {
        let block = SampleBlock {
            start_timestamp: 0.0,
            sample_rate: 1000.0,
            center_frequency: 433.92e6,
            samples: vec![Complex64::new(0.0, 0.0); 500],
        };
        assert!((block.duration() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_display_formats() {
        assert_eq!(ModulationClass::Ook.to_string(), "OOK");
        assert_eq!(Severity::Critical.to_string(), "CRITICAL");
        assert_eq!(AlertKind::UncorrelatedRf.to_string(), "UNCORRELATED_RF");
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Info < Severity::Warning);
        assert!(Severity::Warning < Severity::Critical);
    }
}
