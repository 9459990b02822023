//! # RF Monitor Core
//!
//! Real-time RF monitoring pipeline for automotive security. Listens to
//! the spectrum used by vehicle subsystems (key fobs, TPMS, remote-start
//! transmitters), extracts structured signal events, and correlates them
//! against vehicle telemetry to flag unauthorized or replayed
//! transmissions.
//!
//! ## Signal Flow
//!
//! ```text
//! SampleBlock ─► Spectral Analyzer ─► Burst Demodulator ─► Event Builder
//!                                                               │
//!                              ┌────────────────────────────────┤
//!                              ▼                                ▼
//!                     Replay & Anomaly Detector      Telemetry Correlator
//!                              │                                │
//!                              └────────► Alert Publisher ◄─────┘
//! ```
//!
//! The detector and correlator both consume signal events but keep
//! independent state. Demodulating or decrypting proprietary rolling-code
//! algorithms is out of scope: the core detects code reuse and anomalous
//! timing/power patterns, never recovers keys.
//!
//! ## Example
//!
//! ```rust,no_run
//! use rfmon_core::config::MonitorConfig;
//! use rfmon_core::alert::LogSink;
//! use rfmon_core::pipeline::{Pipeline, SampleSource, SourceEvent};
//!
//! struct MyRadio;
//! impl SampleSource for MyRadio {
//!     fn next_block(&mut self) -> SourceEvent {
//!         SourceEvent::NoData // real adapters read from hardware here
//!     }
//! }
//!
//! let config = MonitorConfig::default();
//! let pipeline = Pipeline::spawn(config, Box::new(MyRadio), Box::new(LogSink)).unwrap();
//! // ... feed vehicle actions via pipeline.push_action(...) ...
//! pipeline.shutdown();
//! ```

pub mod alert;
pub mod config;
pub mod correlator;
pub mod demod;
pub mod detector;
pub mod event;
pub mod fft;
pub mod pipeline;
pub mod queue;
pub mod spectral;
pub mod types;

pub use alert::{AlertPublisher, AlertSink, LogSink, VecSink};
pub use config::MonitorConfig;
pub use correlator::TelemetryCorrelator;
pub use demod::{BurstDemodulator, DemodResult, ModulationTemplate};
pub use detector::{ReplayAnomalyDetector, TrackState, TransmitterProfile};
pub use event::SignalEventBuilder;
pub use pipeline::{Pipeline, SampleSource, SourceEvent};
pub use spectral::SpectralAnalyzer;
pub use types::{
    ActionType, Alert, AlertKind, Burst, ModulationClass, MonitorError, MonitorResult,
    SampleBlock, Severity, SignalEvent, SpectralFrame, VehicleActionEvent,
};
