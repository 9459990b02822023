//! Burst Demodulator — modulation classification and bit extraction
//!
//! Attempts to classify a burst against a set of modulation templates and,
//! where a template matches, extract a bit sequence by symbol-rate
//! synchronized sampling. Built-in templates cover the two families that
//! dominate automotive short-range RF:
//!
//! - **OOK/ASK** (key fobs): bimodal amplitude envelope. Reported as OOK
//!   when the low level is essentially off, ASK when it is merely reduced.
//! - **FSK** (remote start, TPMS): bimodal instantaneous frequency from a
//!   quadrature discriminator.
//!
//! Nothing here is fatal. A burst that matches no template still yields a
//! result with `ModulationClass::Unknown` and no bits, preserving its
//! frequency/power evidence for the anomaly detector. Partial decodes are
//! marked (`truncated`) but kept — downstream treats them as
//! lower-confidence evidence, not failure.
//!
//! Vendor-specific protocol templates can be plugged in via
//! [`ModulationTemplate`] and [`BurstDemodulator::with_templates`].

use num_complex::Complex64;
use std::f64::consts::PI;

use crate::types::{Burst, ModulationClass};

/// Outcome of one demodulation attempt. Never an error.
#[derive(Debug, Clone)]
pub struct DemodResult {
    pub class: ModulationClass,
    /// Extracted bits, when the template decoded any.
    pub bits: Option<Vec<bool>>,
    /// Template confidence in [0, 1]. Zero for Unknown.
    pub confidence: f64,
    /// Estimated symbol rate in baud, when bits were extracted.
    pub symbol_rate: Option<f64>,
    /// True when the decode looks garbled or cut short.
    pub truncated: bool,
}

impl DemodResult {
    /// The no-match result: UNKNOWN, no bits.
    pub fn unknown() -> Self {
        Self {
            class: ModulationClass::Unknown,
            bits: None,
            confidence: 0.0,
            symbol_rate: None,
            truncated: false,
        }
    }
}

/// A pluggable modulation template.
///
/// `try_demodulate` returns `None` when the burst does not look like this
/// modulation at all, and a scored [`DemodResult`] otherwise. The
/// demodulator keeps the highest-confidence match.
pub trait ModulationTemplate: Send {
    fn name(&self) -> &'static str;
    fn try_demodulate(&self, samples: &[Complex64], sample_rate: f64) -> Option<DemodResult>;
}

/// Burst demodulator over an extensible template set.
pub struct BurstDemodulator {
    sample_rate: f64,
    templates: Vec<Box<dyn ModulationTemplate>>,
    /// Matches below this confidence fall through to UNKNOWN.
    min_confidence: f64,
}

impl std::fmt::Debug for BurstDemodulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BurstDemodulator")
            .field("sample_rate", &self.sample_rate)
            .field("templates", &self.templates.len())
            .finish()
    }
}

impl BurstDemodulator {
    /// Create with the built-in OOK/ASK and FSK templates.
    pub fn new(sample_rate: f64) -> Self {
        Self::with_templates(
            sample_rate,
            vec![Box::new(OokTemplate::default()), Box::new(FskTemplate::default())],
        )
    }

    /// Create with a caller-supplied template set.
    pub fn with_templates(sample_rate: f64, templates: Vec<Box<dyn ModulationTemplate>>) -> Self {
        Self {
            sample_rate,
            templates,
            min_confidence: 0.5,
        }
    }

    /// Attempt to classify and decode a burst. Always returns a result.
    pub fn demodulate(&self, burst: &Burst) -> DemodResult {
        let mut best = DemodResult::unknown();
        for template in &self.templates {
            if let Some(result) = template.try_demodulate(&burst.raw_samples, self.sample_rate) {
                if result.confidence > best.confidence {
                    best = result;
                }
            }
        }
        if best.confidence >= self.min_confidence {
            best
        } else {
            DemodResult::unknown()
        }
    }
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Instantaneous amplitude |z[n]|.
fn envelope(samples: &[Complex64]) -> Vec<f64> {
    samples.iter().map(|s| s.norm()).collect()
}

/// Instantaneous frequency via quadrature discriminator:
/// f[n] = arg(x[n] * conj(x[n-1])) * fs / 2π.
fn instantaneous_frequency(samples: &[Complex64], sample_rate: f64) -> Vec<f64> {
    let gain = sample_rate / (2.0 * PI);
    let mut out = Vec::with_capacity(samples.len());
    let mut prev = Complex64::new(1.0, 0.0);
    for &s in samples {
        out.push((s * prev.conj()).arg() * gain);
        prev = s;
    }
    if out.len() > 1 {
        out[0] = out[1]; // first sample has no predecessor
    }
    out
}

/// Index range [first, last] where the envelope exceeds half its peak.
/// Burst buffers include noise tails before and after the actual
/// transmission; decoding happens only inside this extent.
fn payload_extent(env: &[f64]) -> Option<(usize, usize)> {
    let peak = env.iter().cloned().fold(0.0f64, f64::max);
    if peak <= 0.0 {
        return None;
    }
    let gate = peak * 0.5;
    let first = env.iter().position(|&e| e > gate)?;
    let last = env.iter().rposition(|&e| e > gate)?;
    if last - first < 8 {
        return None;
    }
    Some((first, last))
}

/// Decode a boolean level sequence into bits by run-length analysis.
///
/// The shortest plausible run estimates the symbol period; each run then
/// contributes `round(len / period)` bits of its level. Returns the bits,
/// the symbol period in samples, and whether any run looked garbled
/// (non-integral length).
fn bits_from_levels(levels: &[bool]) -> Option<(Vec<bool>, f64, bool)> {
    // Collect run lengths
    let mut runs: Vec<(bool, usize)> = Vec::new();
    for &level in levels {
        match runs.last_mut() {
            Some((l, n)) if *l == level => *n += 1,
            _ => runs.push((level, 1)),
        }
    }
    if runs.len() < 2 {
        return None;
    }

    // Symbol period: shortest run that is not an obvious glitch. Runs of
    // one or two samples at typical oversampling are noise spikes.
    let period = runs
        .iter()
        .map(|&(_, n)| n)
        .filter(|&n| n >= 3)
        .min()? as f64;

    let mut bits = Vec::new();
    let mut truncated = false;
    for &(level, n) in &runs {
        let count = (n as f64 / period).round() as usize;
        if count == 0 {
            truncated = true; // glitch shorter than half a symbol
            continue;
        }
        let frac = (n as f64 / period - count as f64).abs();
        if frac > 0.3 {
            truncated = true;
        }
        bits.extend(std::iter::repeat(level).take(count));
    }
    if bits.is_empty() {
        return None;
    }
    Some((bits, period, truncated))
}

// ---------------------------------------------------------------------------
// OOK / ASK template
// ---------------------------------------------------------------------------

/// Envelope-based template for on-off and amplitude-shift keying.
#[derive(Debug, Clone)]
pub struct OokTemplate {
    /// Required normalized depth (hi−lo)/(hi+lo) of the envelope.
    pub min_depth: f64,
    /// Low level below this fraction of the high level counts as "off"
    /// (OOK); above it the burst is reported as ASK.
    pub off_fraction: f64,
}

impl Default for OokTemplate {
    fn default() -> Self {
        Self {
            min_depth: 0.5,
            off_fraction: 0.15,
        }
    }
}

impl ModulationTemplate for OokTemplate {
    fn name(&self) -> &'static str {
        "ook"
    }

    fn try_demodulate(&self, samples: &[Complex64], sample_rate: f64) -> Option<DemodResult> {
        let env = envelope(samples);
        let (first, last) = payload_extent(&env)?;
        let payload = &env[first..=last];

        // High/low levels from the top and bottom quartiles.
        let mut sorted = payload.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let q = sorted.len() / 4;
        let lo: f64 = sorted[..q.max(1)].iter().sum::<f64>() / q.max(1) as f64;
        let hi: f64 = sorted[sorted.len() - q.max(1)..].iter().sum::<f64>() / q.max(1) as f64;
        if hi <= 0.0 {
            return None;
        }

        let depth = (hi - lo) / (hi + lo);
        if depth < self.min_depth {
            return None; // flat envelope, not amplitude keyed
        }

        // Keyed signals are bimodal: almost no time is spent between the
        // two levels. A noise envelope fills the middle band and fails here.
        let band_lo = lo + 0.25 * (hi - lo);
        let band_hi = hi - 0.25 * (hi - lo);
        let mid_count = payload.iter().filter(|&&e| e > band_lo && e < band_hi).count();
        let mid_fraction = mid_count as f64 / payload.len() as f64;
        if mid_fraction > 0.2 {
            return None;
        }

        let class = if lo < self.off_fraction * hi {
            ModulationClass::Ook
        } else {
            ModulationClass::Ask
        };

        let threshold = (hi + lo) / 2.0;
        let levels: Vec<bool> = payload.iter().map(|&e| e > threshold).collect();
        match bits_from_levels(&levels) {
            Some((bits, period, truncated)) => Some(DemodResult {
                class,
                bits: Some(bits),
                confidence: depth.min(1.0),
                symbol_rate: Some(sample_rate / period),
                truncated,
            }),
            // Keyed envelope but undecodable timing: keep the class, mark
            // the decode as garbled.
            None => Some(DemodResult {
                class,
                bits: None,
                confidence: 0.6 * depth.min(1.0),
                symbol_rate: None,
                truncated: true,
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// FSK template
// ---------------------------------------------------------------------------

/// Discriminator-based template for binary frequency-shift keying.
#[derive(Debug, Clone)]
pub struct FskTemplate {
    /// Envelope depth above this disqualifies FSK (amplitude keyed).
    pub max_envelope_depth: f64,
    /// Required cluster separation, in multiples of in-cluster spread.
    pub min_separation_sigma: f64,
}

impl Default for FskTemplate {
    fn default() -> Self {
        Self {
            max_envelope_depth: 0.3,
            min_separation_sigma: 2.0,
        }
    }
}

impl ModulationTemplate for FskTemplate {
    fn name(&self) -> &'static str {
        "fsk"
    }

    fn try_demodulate(&self, samples: &[Complex64], sample_rate: f64) -> Option<DemodResult> {
        let env = envelope(samples);
        let (first, last) = payload_extent(&env)?;

        // FSK carries constant power; a deeply keyed envelope is not ours.
        let payload_env = &env[first..=last];
        let mut sorted = payload_env.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let q = sorted.len() / 4;
        let lo: f64 = sorted[..q.max(1)].iter().sum::<f64>() / q.max(1) as f64;
        let hi: f64 = sorted[sorted.len() - q.max(1)..].iter().sum::<f64>() / q.max(1) as f64;
        if hi > 0.0 && (hi - lo) / (hi + lo) > self.max_envelope_depth {
            return None;
        }

        let freq = instantaneous_frequency(&samples[first..=last], sample_rate);
        let mean = freq.iter().sum::<f64>() / freq.len() as f64;

        // Split around the mean into mark/space clusters.
        let (mut hi_sum, mut hi_n, mut lo_sum, mut lo_n) = (0.0, 0usize, 0.0, 0usize);
        for &f in &freq {
            if f > mean {
                hi_sum += f;
                hi_n += 1;
            } else {
                lo_sum += f;
                lo_n += 1;
            }
        }
        if hi_n < 4 || lo_n < 4 {
            return None;
        }
        let mark = hi_sum / hi_n as f64;
        let space = lo_sum / lo_n as f64;

        // In-cluster spread
        let mut var = 0.0;
        for &f in &freq {
            let c = if f > mean { mark } else { space };
            var += (f - c) * (f - c);
        }
        let sigma = (var / freq.len() as f64).sqrt().max(1e-9);
        let separation = (mark - space) / sigma;
        if separation < self.min_separation_sigma {
            return None;
        }

        // True binary FSK is bimodal: almost no samples sit between the
        // mark and space clusters. Phase-noise jitter on a plain carrier
        // fills the middle and fails here.
        let band_lo = space + 0.25 * (mark - space);
        let band_hi = mark - 0.25 * (mark - space);
        let mid_count = freq.iter().filter(|&&f| f > band_lo && f < band_hi).count();
        if mid_count as f64 / freq.len() as f64 > 0.25 {
            return None;
        }
        let confidence = (separation / (2.0 * self.min_separation_sigma)).min(1.0);

        let levels: Vec<bool> = freq.iter().map(|&f| f > mean).collect();
        match bits_from_levels(&levels) {
            Some((bits, period, truncated)) => Some(DemodResult {
                class: ModulationClass::Fsk,
                bits: Some(bits),
                confidence,
                symbol_rate: Some(sample_rate / period),
                truncated,
            }),
            None => Some(DemodResult {
                class: ModulationClass::Fsk,
                bits: None,
                confidence: 0.6 * confidence,
                symbol_rate: None,
                truncated: true,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};

    const FS: f64 = 100_000.0;

    fn noise(n: usize, amp: f64, rng: &mut StdRng) -> Vec<Complex64> {
        let normal = Normal::new(0.0, amp).unwrap();
        (0..n)
            .map(|_| Complex64::new(normal.sample(rng), normal.sample(rng)))
            .collect()
    }

    /// OOK burst: `bits` at `symbol_s` seconds per symbol, with noise tails.
    fn ook_burst(bits: &[bool], symbol_s: f64, seed: u64) -> Vec<Complex64> {
        let mut rng = StdRng::seed_from_u64(seed);
        let sym_n = (symbol_s * FS) as usize;
        let mut out = noise(500, 1e-3, &mut rng);
        for (i, &bit) in bits.iter().enumerate() {
            for k in 0..sym_n {
                let t = (i * sym_n + k) as f64 / FS;
                let amp = if bit { 0.5 } else { 0.0 };
                let mut s = Complex64::from_polar(amp, 2.0 * PI * 5000.0 * t);
                s += noise(1, 1e-3, &mut rng)[0];
                out.push(s);
            }
        }
        out.extend(noise(500, 1e-3, &mut rng));
        out
    }

    /// FSK burst: ±deviation around a 2 kHz offset.
    fn fsk_burst(bits: &[bool], symbol_s: f64, deviation: f64, seed: u64) -> Vec<Complex64> {
        let mut rng = StdRng::seed_from_u64(seed);
        let sym_n = (symbol_s * FS) as usize;
        let mut out = noise(500, 1e-3, &mut rng);
        let mut phase = 0.0f64;
        for &bit in bits {
            let f = 2000.0 + if bit { deviation } else { -deviation };
            for _ in 0..sym_n {
                phase += 2.0 * PI * f / FS;
                let mut s = Complex64::from_polar(0.5, phase);
                s += noise(1, 1e-3, &mut rng)[0];
                out.push(s);
            }
        }
        out.extend(noise(500, 1e-3, &mut rng));
        out
    }

    fn burst_of(samples: Vec<Complex64>) -> Burst {
        Burst {
            start_time: 0.0,
            end_time: samples.len() as f64 / FS,
            center_frequency: 433.92e6,
            bandwidth: 20_000.0,
            peak_power_db: -20.0,
            raw_samples: samples,
        }
    }

    #[test]
    fn test_ook_decode_recovers_bits() {
        let bits = vec![true, false, true, true, false, false, true, false, true, true];
        let demod = BurstDemodulator::new(FS);
        let result = demod.demodulate(&burst_of(ook_burst(&bits, 0.001, 11)));
        assert_eq!(result.class, ModulationClass::Ook);
        assert_eq!(result.bits, Some(bits));
        assert!(result.confidence > 0.5);
        let rate = result.symbol_rate.unwrap();
        assert!((rate - 1000.0).abs() < 150.0, "symbol rate {} not near 1000", rate);
    }

    #[test]
    fn test_fsk_decode_recovers_bits() {
        let bits = vec![true, true, false, true, false, false, true, true, false, true];
        let demod = BurstDemodulator::new(FS);
        let result = demod.demodulate(&burst_of(fsk_burst(&bits, 0.001, 10_000.0, 12)));
        assert_eq!(result.class, ModulationClass::Fsk);
        assert_eq!(result.bits, Some(bits));
        assert!(result.confidence > 0.5);
    }

    #[test]
    fn test_noise_classifies_unknown() {
        let mut rng = StdRng::seed_from_u64(13);
        let demod = BurstDemodulator::new(FS);
        let result = demod.demodulate(&burst_of(noise(4000, 0.1, &mut rng)));
        assert_eq!(result.class, ModulationClass::Unknown);
        assert!(result.bits.is_none());
    }

    #[test]
    fn test_fsk_not_claimed_by_ook() {
        // Constant-envelope FSK must not look amplitude-keyed.
        let bits = vec![true, false, true, false, true, true, false, true];
        let burst = burst_of(fsk_burst(&bits, 0.001, 10_000.0, 14));
        let ook = OokTemplate::default();
        assert!(ook.try_demodulate(&burst.raw_samples, FS).is_none());
    }

    #[test]
    fn test_bits_from_levels_runs() {
        // 3 symbols high, 1 low, 2 high at 10 samples/symbol
        let mut levels = vec![true; 30];
        levels.extend(vec![false; 10]);
        levels.extend(vec![true; 20]);
        let (bits, period, truncated) = bits_from_levels(&levels).unwrap();
        assert_eq!(bits, vec![true, true, true, false, true, true]);
        assert!((period - 10.0).abs() < 1e-9);
        assert!(!truncated);
    }

    #[test]
    fn test_empty_burst_is_unknown() {
        let demod = BurstDemodulator::new(FS);
        let result = demod.demodulate(&burst_of(Vec::new()));
        assert_eq!(result.class, ModulationClass::Unknown);
    }
}
