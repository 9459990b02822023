//! Scripted sample source
//!
//! Generates complex baseband blocks containing AWGN plus a script of
//! timed bursts. Waveforms are phase-continuous (an FSK transmitter never
//! jumps phase at a symbol edge), and the noise generator is seeded so a
//! scenario replays identically run after run.

use num_complex::Complex64;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use std::f64::consts::PI;

use rfmon_core::pipeline::{SampleSource, SourceEvent};
use rfmon_core::types::SampleBlock;

/// Modulation of a scripted burst.
#[derive(Debug, Clone)]
pub enum SimModulation {
    /// On-off keyed bits, one per `symbol_s` seconds.
    Ook { bits: Vec<bool>, symbol_s: f64 },
    /// Binary FSK at ±deviation around the burst offset.
    Fsk {
        bits: Vec<bool>,
        symbol_s: f64,
        deviation_hz: f64,
    },
    /// Unmodulated carrier (jammer / interference).
    Carrier { duration_s: f64 },
}

impl SimModulation {
    fn duration(&self) -> f64 {
        match self {
            SimModulation::Ook { bits, symbol_s } => bits.len() as f64 * symbol_s,
            SimModulation::Fsk { bits, symbol_s, .. } => bits.len() as f64 * symbol_s,
            SimModulation::Carrier { duration_s } => *duration_s,
        }
    }
}

/// One transmission in the scenario script.
#[derive(Debug, Clone)]
pub struct ScriptedBurst {
    /// Transmission start, in seconds.
    pub start_s: f64,
    /// Frequency offset from the tuned center, in Hz.
    pub offset_hz: f64,
    /// Carrier amplitude (noise is generated at `noise_amplitude`).
    pub amplitude: f64,
    pub modulation: SimModulation,
}

impl ScriptedBurst {
    fn active_at(&self, t: f64) -> bool {
        t >= self.start_s && t < self.start_s + self.modulation.duration()
    }

    /// Instantaneous (frequency, amplitude) at scenario time `t`.
    fn waveform_at(&self, t: f64) -> (f64, f64) {
        let rel = t - self.start_s;
        match &self.modulation {
            SimModulation::Ook { bits, symbol_s } => {
                let idx = ((rel / symbol_s) as usize).min(bits.len() - 1);
                let amp = if bits[idx] { self.amplitude } else { 0.0 };
                (self.offset_hz, amp)
            }
            SimModulation::Fsk {
                bits,
                symbol_s,
                deviation_hz,
            } => {
                let idx = ((rel / symbol_s) as usize).min(bits.len() - 1);
                let f = self.offset_hz + if bits[idx] { *deviation_hz } else { -deviation_hz };
                (f, self.amplitude)
            }
            SimModulation::Carrier { .. } => (self.offset_hz, self.amplitude),
        }
    }
}

/// Deterministic software sample source over a burst script.
#[derive(Debug)]
pub struct ScenarioSource {
    sample_rate: f64,
    center_frequency: f64,
    block_len: usize,
    noise_amplitude: f64,
    end_s: f64,
    /// Report a hardware disconnect once this time is reached.
    disconnect_at: Option<f64>,
    bursts: Vec<ScriptedBurst>,
    /// Phase accumulator per scripted burst (phase continuity).
    phases: Vec<f64>,
    t: f64,
    rng: StdRng,
}

impl ScenarioSource {
    pub fn new(sample_rate: f64, center_frequency: f64) -> Self {
        Self {
            sample_rate,
            center_frequency,
            block_len: 4096,
            noise_amplitude: 1e-3,
            end_s: 1.0,
            disconnect_at: None,
            bursts: Vec::new(),
            phases: Vec::new(),
            t: 0.0,
            rng: StdRng::seed_from_u64(0x5f_f0b5),
        }
    }

    /// Scenario length; the source reports end-of-stream afterwards.
    pub fn end_at(mut self, end_s: f64) -> Self {
        self.end_s = end_s;
        self
    }

    pub fn with_block_len(mut self, block_len: usize) -> Self {
        self.block_len = block_len;
        self
    }

    pub fn with_noise_amplitude(mut self, amplitude: f64) -> Self {
        self.noise_amplitude = amplitude;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Simulate the radio going away at `t_s` (degraded-mode testing).
    pub fn disconnect_at(mut self, t_s: f64) -> Self {
        self.disconnect_at = Some(t_s);
        self
    }

    pub fn with_burst(mut self, burst: ScriptedBurst) -> Self {
        self.bursts.push(burst);
        self.phases.push(0.0);
        self
    }
}

impl SampleSource for ScenarioSource {
    fn next_block(&mut self) -> SourceEvent {
        if let Some(cut) = self.disconnect_at {
            if self.t >= cut {
                return SourceEvent::Disconnected;
            }
        }
        if self.t >= self.end_s {
            return SourceEvent::EndOfStream;
        }

        let normal = Normal::new(0.0, self.noise_amplitude).expect("valid noise sigma");
        let dt = 1.0 / self.sample_rate;
        let mut samples = Vec::with_capacity(self.block_len);
        for i in 0..self.block_len {
            let t = self.t + i as f64 * dt;
            let mut s = Complex64::new(
                normal.sample(&mut self.rng),
                normal.sample(&mut self.rng),
            );
            for (burst, phase) in self.bursts.iter().zip(self.phases.iter_mut()) {
                if burst.active_at(t) {
                    let (f, amp) = burst.waveform_at(t);
                    *phase += 2.0 * PI * f * dt;
                    s += Complex64::from_polar(amp, *phase);
                }
            }
            samples.push(s);
        }

        let block = SampleBlock {
            start_timestamp: self.t,
            sample_rate: self.sample_rate,
            center_frequency: self.center_frequency,
            samples,
        };
        self.t += self.block_len as f64 * dt;
        SourceEvent::Block(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(source: &mut ScenarioSource) -> Vec<SampleBlock> {
        let mut blocks = Vec::new();
        loop {
            match source.next_block() {
                SourceEvent::Block(b) => blocks.push(b),
                _ => return blocks,
            }
        }
    }

    #[test]
    fn test_stream_covers_scenario_and_ends() {
        let mut source = ScenarioSource::new(100_000.0, 433.92e6).end_at(0.5);
        let blocks = drain(&mut source);
        let total: usize = blocks.iter().map(|b| b.samples.len()).sum();
        assert!(total as f64 / 100_000.0 >= 0.5);
        assert!(matches!(source.next_block(), SourceEvent::EndOfStream));
    }

    #[test]
    fn test_burst_raises_power() {
        let mut source = ScenarioSource::new(100_000.0, 433.92e6)
            .end_at(0.4)
            .with_burst(ScriptedBurst {
                start_s: 0.2,
                offset_hz: 10_000.0,
                amplitude: 0.3,
                modulation: SimModulation::Carrier { duration_s: 0.1 },
            });
        let blocks = drain(&mut source);
        let power_of = |b: &SampleBlock| -> f64 {
            b.samples.iter().map(|s| s.norm_sqr()).sum::<f64>() / b.samples.len() as f64
        };
        let quiet = power_of(&blocks[0]);
        let loud = blocks
            .iter()
            .filter(|b| b.start_timestamp >= 0.2 && b.start_timestamp < 0.25)
            .map(|b| power_of(b))
            .fold(0.0f64, f64::max);
        assert!(loud > 100.0 * quiet, "burst should dominate the noise");
    }

    #[test]
    fn test_deterministic_with_same_seed() {
        let mut a = ScenarioSource::new(100_000.0, 433.92e6).with_seed(42).end_at(0.1);
        let mut b = ScenarioSource::new(100_000.0, 433.92e6).with_seed(42).end_at(0.1);
        let (ba, bb) = (drain(&mut a), drain(&mut b));
        assert_eq!(ba.len(), bb.len());
        assert_eq!(ba[0].samples[..16], bb[0].samples[..16]);
    }

    #[test]
    fn test_disconnect_reported() {
        let mut source = ScenarioSource::new(100_000.0, 433.92e6)
            .end_at(1.0)
            .disconnect_at(0.2);
        let blocks = drain(&mut source);
        assert!(matches!(source.next_block(), SourceEvent::Disconnected));
        assert!(blocks.last().unwrap().start_timestamp < 0.2);
    }
}
