//! Spectral Analyzer — frame-based burst detection
//!
//! Converts sample blocks into windowed power-spectrum frames at fixed
//! cadence, tracks a per-bin noise floor with an exponential moving
//! average, and opens/closes bursts with time hysteresis:
//!
//! - a band must stay above `noise_floor + threshold_db` for at least
//!   `min_duration_ms` to produce a burst;
//! - an active burst closes only after the band stays below threshold for
//!   `hold_time_ms` (short dropouts do not split a transmission).
//!
//! Concurrent bursts on disjoint bands are tracked independently;
//! overlapping bands merge into one burst keyed by the widest span. The
//! noise floor resets when the sample rate or tuning changes mid-stream,
//! since stale estimates would bias detection.
//!
//! ## Example
//!
//! ```rust
//! use rfmon_core::config::MonitorConfig;
//! use rfmon_core::spectral::SpectralAnalyzer;
//! use rfmon_core::types::SampleBlock;
//! use num_complex::Complex64;
//!
//! let cfg = MonitorConfig::default();
//! let mut analyzer = SpectralAnalyzer::new(&cfg);
//! let block = SampleBlock {
//!     start_timestamp: 0.0,
//!     sample_rate: cfg.sample_rate,
//!     center_frequency: cfg.center_frequency,
//!     samples: vec![Complex64::new(1e-4, 0.0); 4096],
//! };
//! let bursts = analyzer.process_block(&block);
//! assert!(bursts.is_empty()); // quiet input, nothing above the floor
//! ```

use tracing::{debug, warn};

use crate::config::MonitorConfig;
use crate::fft::{db_to_linear, power_db, SpectrumFft};
use crate::types::{Burst, FrequencyBin, IQBuffer, SampleBlock, SpectralFrame};

/// Upper bound on raw samples retained per burst. A key-fob press is a few
/// tens of milliseconds; anything past this is a carrier or jammer and the
/// demodulator does not need more evidence.
const MAX_BURST_SAMPLES: usize = 1 << 20;

/// A band currently above (or recently above) the detection threshold.
#[derive(Debug, Clone)]
struct ActiveBand {
    bin_lo: usize,
    bin_hi: usize,
    /// Time the band first exceeded threshold.
    start_time: f64,
    /// End of the most recent above-threshold frame.
    last_above: f64,
    /// Start of the current below-threshold stretch, if any.
    below_since: Option<f64>,
    /// Peak linear bin power observed.
    peak_power: f64,
    samples: IQBuffer,
}

impl ActiveBand {
    fn overlaps(&self, lo: usize, hi: usize) -> bool {
        self.bin_lo <= hi && lo <= self.bin_hi
    }
}

/// Frame-cadence spectral analyzer with noise-floor tracking and
/// hysteresis burst detection.
#[derive(Debug)]
pub struct SpectralAnalyzer {
    fft: SpectrumFft,
    noise_decay: f64,
    /// Linear power ratio corresponding to `threshold_db`.
    threshold_ratio: f64,
    min_duration_s: f64,
    hold_time_s: f64,
    merge_gap_bins: usize,
    /// Sample rate the noise floor was estimated at.
    sample_rate: f64,
    center_frequency: f64,
    /// Per-bin EMA noise floor (linear power). None until the first frame.
    noise_floor: Option<Vec<f64>>,
    /// Carry-over samples not yet forming a full frame.
    pending: IQBuffer,
    /// Timestamp of `pending[0]`.
    pending_time: f64,
    active: Vec<ActiveBand>,
    /// Most recent frame, for observability.
    last_frame: Option<SpectralFrame>,
}

impl SpectralAnalyzer {
    pub fn new(config: &MonitorConfig) -> Self {
        Self {
            fft: SpectrumFft::new(config.fft_size),
            noise_decay: config.noise_decay,
            threshold_ratio: db_to_linear(config.threshold_db),
            min_duration_s: config.min_duration_ms / 1000.0,
            hold_time_s: config.hold_time_ms / 1000.0,
            merge_gap_bins: config.band_merge_gap_bins,
            sample_rate: config.sample_rate,
            center_frequency: config.center_frequency,
            noise_floor: None,
            pending: Vec::new(),
            pending_time: 0.0,
            active: Vec::new(),
            last_frame: None,
        }
    }

    /// Duration of one analysis frame in seconds.
    pub fn frame_duration(&self) -> f64 {
        self.fft.size() as f64 / self.sample_rate
    }

    /// The most recent spectral frame, if any frame has been produced.
    pub fn last_frame(&self) -> Option<&SpectralFrame> {
        self.last_frame.as_ref()
    }

    /// Feed one sample block. Returns the bursts that closed during this
    /// pass (zero or more).
    pub fn process_block(&mut self, block: &SampleBlock) -> Vec<Burst> {
        if block.sample_rate != self.sample_rate
            || block.center_frequency != self.center_frequency
        {
            warn!(
                old_rate = self.sample_rate,
                new_rate = block.sample_rate,
                "stream parameters changed, resetting noise floor"
            );
            self.sample_rate = block.sample_rate;
            self.center_frequency = block.center_frequency;
            self.noise_floor = None;
            self.active.clear();
            self.pending.clear();
        }

        if self.pending.is_empty() {
            self.pending_time = block.start_timestamp;
        }
        self.pending.extend_from_slice(&block.samples);

        let size = self.fft.size();
        let mut closed = Vec::new();
        while self.pending.len() >= size {
            let chunk: IQBuffer = self.pending.drain(..size).collect();
            let t = self.pending_time;
            self.pending_time += self.frame_duration();
            self.process_frame(t, &chunk, &mut closed);
        }
        closed
    }

    /// Discard all in-progress state (noise floor kept).
    pub fn reset(&mut self) {
        self.active.clear();
        self.pending.clear();
    }

    fn process_frame(&mut self, t: f64, chunk: &[crate::types::IQSample], closed: &mut Vec<Burst>) {
        let power = self.fft.power_spectrum(chunk);
        let size = power.len();
        let frame_end = t + self.frame_duration();
        let med = median(&power);

        let floor = match &mut self.noise_floor {
            Some(f) => f,
            None => {
                // Seed every bin from the frame median; detection starts
                // next frame. Individual bin powers on white noise scatter
                // over an order of magnitude, and a bin seeded from one
                // low draw would flag plain noise forever.
                self.noise_floor = Some(vec![med; size]);
                self.record_frame(t, &power);
                return;
            }
        };

        // Per-bin detection mask against floor + threshold.
        let mut mask = vec![false; size];
        for k in 0..size {
            mask[k] = power[k] > floor[k] * self.threshold_ratio;
        }

        // EMA floor update, skipping bins occupied by signal so a long
        // transmission does not raise its own detection threshold. The
        // frame median bounds every bin from below: a collapsed floor
        // would mask its own bin permanently and never update again.
        for k in 0..size {
            if !mask[k] {
                floor[k] = (1.0 - self.noise_decay) * floor[k] + self.noise_decay * power[k];
            }
            floor[k] = floor[k].max(0.5 * med);
        }

        // Contiguous above-threshold segments.
        let mut segments: Vec<(usize, usize)> = Vec::new();
        let mut run_start: Option<usize> = None;
        for k in 0..size {
            match (mask[k], run_start) {
                (true, None) => run_start = Some(k),
                (false, Some(s)) => {
                    segments.push((s, k - 1));
                    run_start = None;
                }
                _ => {}
            }
        }
        if let Some(s) = run_start {
            segments.push((s, size - 1));
        }
        // Single-bin spikes are noise excursions, not transmissions; a
        // real signal spans several bins after windowing.
        segments.retain(|&(lo, hi)| hi > lo);

        // Bridge small spectral gaps so a two-tone FSK transmission stays
        // one band instead of splitting into two bursts.
        let mut merged: Vec<(usize, usize)> = Vec::with_capacity(segments.len());
        for (lo, hi) in segments {
            match merged.last_mut() {
                Some((_, prev_hi)) if lo.saturating_sub(*prev_hi) <= self.merge_gap_bins + 1 => {
                    *prev_hi = hi;
                }
                _ => merged.push((lo, hi)),
            }
        }
        let segments = merged;

        // Match segments against active bands. A segment touching several
        // active bands merges them; a segment touching none starts a new
        // candidate.
        let mut touched = vec![false; self.active.len()];
        for &(lo, hi) in &segments {
            let overlapping: Vec<usize> = self
                .active
                .iter()
                .enumerate()
                .filter(|(_, a)| a.overlaps(lo, hi))
                .map(|(i, _)| i)
                .collect();

            let seg_peak = power[lo..=hi].iter().cloned().fold(0.0f64, f64::max);

            match overlapping.split_first() {
                None => {
                    self.active.push(ActiveBand {
                        bin_lo: lo,
                        bin_hi: hi,
                        start_time: t,
                        last_above: frame_end,
                        below_since: None,
                        peak_power: seg_peak,
                        samples: Vec::new(),
                    });
                    touched.push(true);
                }
                Some((&first, rest)) => {
                    // Merge trailing bands into the first, widest span wins.
                    for &i in rest.iter().rev() {
                        let merged = self.active.remove(i);
                        touched.remove(i);
                        let a = &mut self.active[first];
                        a.bin_lo = a.bin_lo.min(merged.bin_lo);
                        a.bin_hi = a.bin_hi.max(merged.bin_hi);
                        a.start_time = a.start_time.min(merged.start_time);
                        a.peak_power = a.peak_power.max(merged.peak_power);
                        if merged.samples.len() > a.samples.len() {
                            a.samples = merged.samples;
                        }
                    }
                    let a = &mut self.active[first];
                    a.bin_lo = a.bin_lo.min(lo);
                    a.bin_hi = a.bin_hi.max(hi);
                    a.last_above = frame_end;
                    a.below_since = None;
                    a.peak_power = a.peak_power.max(seg_peak);
                    touched[first] = true;
                }
            }
        }

        // Append this frame's raw samples to every live band and close the
        // ones that have been quiet past the hold time.
        let hold = self.hold_time_s;
        let min_dur = self.min_duration_s;
        let mut i = 0;
        while i < self.active.len() {
            let a = &mut self.active[i];
            if a.samples.len() < MAX_BURST_SAMPLES {
                a.samples.extend_from_slice(chunk);
            }
            if !touched.get(i).copied().unwrap_or(false) && a.below_since.is_none() {
                a.below_since = Some(t);
            }
            let expired = match a.below_since {
                Some(since) => frame_end - since >= hold,
                None => false,
            };
            if expired {
                let a = self.active.remove(i);
                touched.remove(i);
                let above_span = a.last_above - a.start_time;
                if above_span >= min_dur {
                    closed.push(self.finish_burst(a));
                } else {
                    debug!(span_ms = above_span * 1e3, "discarding sub-minimum burst");
                }
            } else {
                i += 1;
            }
        }

        self.record_frame(t, &power);
    }

    fn finish_burst(&self, a: ActiveBand) -> Burst {
        let bin_width = self.sample_rate / self.fft.size() as f64;
        let center_bin = (a.bin_lo + a.bin_hi) as f64 / 2.0;
        let offset = (center_bin - self.fft.size() as f64 / 2.0) * bin_width;
        Burst {
            start_time: a.start_time,
            end_time: a.below_since.unwrap_or(a.last_above) + self.hold_time_s,
            center_frequency: self.center_frequency + offset,
            bandwidth: (a.bin_hi - a.bin_lo + 1) as f64 * bin_width,
            peak_power_db: power_db(a.peak_power),
            raw_samples: a.samples,
        }
    }

    fn record_frame(&mut self, t: f64, power: &[f64]) {
        let bins = power
            .iter()
            .enumerate()
            .map(|(k, &p)| FrequencyBin {
                frequency: self.center_frequency + self.fft.bin_offset_hz(k, self.sample_rate),
                power_db: power_db(p),
            })
            .collect();
        self.last_frame = Some(SpectralFrame { timestamp: t, bins });
    }
}

/// Median bin power of one frame.
fn median(power: &[f64]) -> f64 {
    let mut sorted = power.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    sorted[sorted.len() / 2]
}
