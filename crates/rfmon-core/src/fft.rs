//! Windowed FFT for spectral monitoring
//!
//! Thin wrapper around `rustfft` providing the one operation the spectral
//! analyzer needs: a Hann-windowed forward transform returning linear power
//! per bin, with bins reordered so index 0 is the lowest frequency
//! (−fs/2) and the last index the highest (+fs/2 − fs/N).
//!
//! ## Example
//!
//! ```rust
//! use rfmon_core::fft::SpectrumFft;
//! use num_complex::Complex64;
//!
//! let mut fft = SpectrumFft::new(64);
//! let tone: Vec<Complex64> = (0..64)
//!     .map(|i| Complex64::from_polar(1.0, 2.0 * std::f64::consts::PI * 8.0 * i as f64 / 64.0))
//!     .collect();
//! let power = fft.power_spectrum(&tone);
//! assert_eq!(power.len(), 64);
//! ```

use std::f64::consts::PI;
use std::fmt;
use std::sync::Arc;

use rustfft::{Fft, FftPlanner};

use crate::types::IQSample;

/// Forward FFT with Hann window, producing a frequency-ordered power
/// spectrum.
pub struct SpectrumFft {
    size: usize,
    fft: Arc<dyn Fft<f64>>,
    scratch: Vec<IQSample>,
    window: Vec<f64>,
    /// Normalization: 1 / (N * sum(w^2)/N) so a full-scale tone reads near
    /// 0 dB regardless of FFT size.
    norm: f64,
}

impl fmt::Debug for SpectrumFft {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpectrumFft").field("size", &self.size).finish()
    }
}

impl SpectrumFft {
    /// Create a processor for the given FFT size.
    pub fn new(size: usize) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(size);
        let scratch = vec![IQSample::new(0.0, 0.0); fft.get_inplace_scratch_len()];

        let window: Vec<f64> = (0..size)
            .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f64 / size as f64).cos())
            .collect();
        let window_power: f64 = window.iter().map(|w| w * w).sum::<f64>() / size as f64;
        let norm = 1.0 / (size as f64 * size as f64 * window_power);

        Self {
            size,
            fft,
            scratch,
            window,
            norm,
        }
    }

    /// FFT size.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Compute the windowed power spectrum of exactly `size` samples.
    ///
    /// Output is linear power, shifted so bin 0 corresponds to −fs/2.
    ///
    /// # Panics
    ///
    /// Panics if `input.len() != size`.
    pub fn power_spectrum(&mut self, input: &[IQSample]) -> Vec<f64> {
        assert_eq!(input.len(), self.size, "input length must equal FFT size");

        let mut buf: Vec<IQSample> = input
            .iter()
            .zip(self.window.iter())
            .map(|(s, w)| s * w)
            .collect();
        self.fft.process_with_scratch(&mut buf, &mut self.scratch);

        // fftshift: negative frequencies first
        let half = self.size / 2;
        let mut power = vec![0.0; self.size];
        for (k, s) in buf.iter().enumerate() {
            let shifted = (k + half) % self.size;
            power[shifted] = s.norm_sqr() * self.norm;
        }
        power
    }

    /// Baseband frequency offset of a (shifted) bin index, in Hz.
    pub fn bin_offset_hz(&self, bin: usize, sample_rate: f64) -> f64 {
        let half = self.size as f64 / 2.0;
        (bin as f64 - half) * sample_rate / self.size as f64
    }
}

/// Convert linear power to dB with a floor to avoid -inf.
pub fn power_db(linear: f64) -> f64 {
    if linear > 1e-30 {
        10.0 * linear.log10()
    } else {
        -300.0
    }
}

/// Convert a dB value to linear power.
pub fn db_to_linear(db: f64) -> f64 {
    10f64.powf(db / 10.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_complex::Complex64;

    fn tone(size: usize, cycles: f64, amplitude: f64) -> Vec<Complex64> {
        (0..size)
            .map(|i| {
                Complex64::from_polar(amplitude, 2.0 * PI * cycles * i as f64 / size as f64)
            })
            .collect()
    }

    #[test]
    fn test_tone_peaks_at_expected_bin() {
        let size = 128;
        let mut fft = SpectrumFft::new(size);
        // +16 cycles per frame => bin size/2 + 16 after fftshift
        let power = fft.power_spectrum(&tone(size, 16.0, 1.0));
        let peak = power
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(peak, size / 2 + 16);
    }

    #[test]
    fn test_full_scale_tone_near_zero_db() {
        let size = 256;
        let mut fft = SpectrumFft::new(size);
        let power = fft.power_spectrum(&tone(size, 32.0, 1.0));
        let peak = power.iter().cloned().fold(0.0f64, f64::max);
        // Hann mainlobe splits energy; peak should land within a few dB of 0
        assert!(power_db(peak) > -8.0 && power_db(peak) < 1.0);
    }

    #[test]
    fn test_negative_frequency_bin() {
        let size = 128;
        let mut fft = SpectrumFft::new(size);
        // -16 cycles per frame => bin size/2 - 16
        let power = fft.power_spectrum(&tone(size, -16.0, 1.0));
        let peak = power
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(peak, size / 2 - 16);
    }

    #[test]
    fn test_bin_offset_mapping() {
        let fft = SpectrumFft::new(64);
        assert!((fft.bin_offset_hz(32, 64_000.0) - 0.0).abs() < 1e-9);
        assert!((fft.bin_offset_hz(0, 64_000.0) + 32_000.0).abs() < 1e-9);
        assert!((fft.bin_offset_hz(33, 64_000.0) - 1000.0).abs() < 1e-9);
    }

    #[test]
    fn test_db_roundtrip() {
        assert!((power_db(db_to_linear(-37.5)) + 37.5).abs() < 1e-9);
    }
}
