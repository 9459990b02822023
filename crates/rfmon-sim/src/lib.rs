//! # RF Monitor Simulator
//!
//! Pure-software stand-in for the radio and the vehicle bus: scripted RF
//! bursts (OOK key fobs, FSK remote start, unmodulated jammers) over AWGN,
//! plus scripted vehicle action events. No hardware needed — perfect for
//! testing, demos, and development.
//!
//! ## Example
//!
//! ```rust
//! use rfmon_sim::{ScenarioSource, ScriptedBurst, SimModulation};
//! use rfmon_core::pipeline::{SampleSource, SourceEvent};
//!
//! let mut source = ScenarioSource::new(250_000.0, 433.92e6)
//!     .end_at(0.5)
//!     .with_burst(ScriptedBurst {
//!         start_s: 0.2,
//!         offset_hz: 20_000.0,
//!         amplitude: 0.3,
//!         modulation: SimModulation::Ook {
//!             bits: vec![true, false, true, true],
//!             symbol_s: 0.001,
//!         },
//!     });
//!
//! let mut blocks = 0;
//! while let SourceEvent::Block(_) = source.next_block() {
//!     blocks += 1;
//! }
//! assert!(blocks > 0);
//! ```

pub mod source;
pub mod telemetry;

pub use source::{ScenarioSource, ScriptedBurst, SimModulation};
pub use telemetry::TelemetryScript;
