//! Windowed FFT peak estimation.
//!
//! Pixel values ride on the instantaneous tone frequency, so the pixel
//! extractor asks one question over and over: what is the dominant frequency
//! of this short window of raw audio? Answered here with a Hann-windowed,
//! zero-padded forward FFT and quadratic interpolation between bins.
//!
//! <https://ccrma.stanford.edu/~jos/sasp/Quadratic_Interpolation_Spectral_Peaks.html>

use std::sync::Arc;

use num_complex::Complex;
use rustfft::FftPlanner;

use crate::{
    dsp::fir::hann_window,
    frequency_to_pixel,
};

/// Cached Hann windows, most recently used first.
const WINDOW_CACHE_CAPACITY: usize = 8;

pub struct SpectralPeak {
    fft: Arc<dyn rustfft::Fft<f32>>,
    fft_size: usize,
    sample_rate: f32,
    buffer: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    windows: Vec<(usize, Vec<f32>)>,
}

impl SpectralPeak {
    pub fn new(fft_size: usize, sample_rate: f32) -> Self {
        assert!(fft_size > 0 && fft_size & 1 == 0, "fft size must be even");

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(fft_size);
        let scratch = vec![Complex::default(); fft.get_inplace_scratch_len()];

        Self {
            fft,
            fft_size,
            sample_rate,
            buffer: vec![Complex::default(); fft_size],
            scratch,
            windows: Vec::new(),
        }
    }

    #[inline]
    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Dominant frequency of `samples` in Hz.
    ///
    /// The window is Hann-weighted and zero-padded to the FFT size. The
    /// argmax power bin is refined by quadratic interpolation of the linear
    /// magnitudes of its neighborhood; the correction is clamped to half a
    /// bin, and skipped entirely at the spectrum edges or when the parabola
    /// degenerates.
    pub fn frequency(&mut self, samples: &[f32]) -> f32 {
        let n = samples.len().min(self.fft_size);

        self.ensure_window(n);
        let window = &self.windows[0].1;
        for i in 0..n {
            self.buffer[i] = Complex::new(samples[i] * window[i], 0.0);
        }
        self.buffer[n..].fill(Complex::default());

        self.fft
            .process_with_scratch(&mut self.buffer, &mut self.scratch);

        // real input: only the non-negative half of the spectrum is distinct
        let half = self.fft_size / 2;
        let mut peak_bin = 1;
        let mut peak_power = 0.0;
        for k in 1..=half {
            let power = self.buffer[k].norm_sqr();
            if power > peak_power {
                peak_power = power;
                peak_bin = k;
            }
        }

        let mut bin = peak_bin as f32;
        if peak_bin > 1 && peak_bin < half {
            let left = self.buffer[peak_bin - 1].norm();
            let mid = self.buffer[peak_bin].norm();
            let right = self.buffer[peak_bin + 1].norm();
            let denominator = left - 2.0 * mid + right;
            if denominator.abs() > f32::EPSILON {
                let delta = (0.5 * (left - right) / denominator).clamp(-0.5, 0.5);
                bin += delta;
            }
        }

        bin * self.sample_rate / self.fft_size as f32
    }

    /// Dominant frequency mapped to a pixel value.
    #[inline]
    pub fn pixel(&mut self, samples: &[f32]) -> u8 {
        frequency_to_pixel(self.frequency(samples))
    }

    /// Move the Hann window for length `n` to the front of the LRU cache,
    /// computing it on a miss.
    fn ensure_window(&mut self, n: usize) {
        if let Some(hit) = self.windows.iter().position(|(len, _)| *len == n) {
            let entry = self.windows.remove(hit);
            self.windows.insert(0, entry);
        }
        else {
            if self.windows.len() == WINDOW_CACHE_CAPACITY {
                self.windows.pop();
            }
            self.windows.insert(0, (n, hann_window(n)));
        }
    }
}

impl std::fmt::Debug for SpectralPeak {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectralPeak")
            .field("fft_size", &self.fft_size)
            .field("sample_rate", &self.sample_rate)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(frequency: f32, sample_rate: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (std::f32::consts::TAU * frequency * i as f32 / sample_rate).sin())
            .collect()
    }

    #[test]
    fn estimates_an_off_bin_tone_within_a_hertz() {
        let sample_rate = 48000.0;
        let mut peak = SpectralPeak::new(4096, sample_rate);
        // 11.7 Hz per bin; 1906 Hz lands between bins
        let samples = tone(1906.0, sample_rate, 2880);
        let estimate = peak.frequency(&samples);
        assert!((estimate - 1906.0).abs() < 1.5, "estimate {estimate}");
    }

    #[test]
    fn short_pixel_windows_still_resolve_the_band() {
        let sample_rate = 48000.0;
        let mut peak = SpectralPeak::new(4096, sample_rate);
        for frequency in [1500.0, 1700.0, 1900.0, 2100.0, 2300.0] {
            let samples = tone(frequency, sample_rate, 44);
            let estimate = peak.frequency(&samples);
            assert!(
                (estimate - frequency).abs() < 40.0,
                "{frequency} Hz estimated as {estimate}"
            );
        }
    }

    #[test]
    fn interpolation_never_leaves_the_peak_bin() {
        let sample_rate = 48000.0;
        let fft_size = 4096;
        let mut peak = SpectralPeak::new(fft_size, sample_rate);
        let bin_width = sample_rate / fft_size as f32;
        for step in 0..8 {
            let frequency = 1500.0 + step as f32 * 13.7;
            let estimate = peak.frequency(&tone(frequency, sample_rate, 1440));
            let nearest_bin = (frequency / bin_width).round();
            assert!((estimate / bin_width - nearest_bin).abs() <= 1.0);
        }
    }

    #[test]
    fn window_cache_is_bounded() {
        let mut peak = SpectralPeak::new(4096, 48000.0);
        for n in 1..(3 * WINDOW_CACHE_CAPACITY) {
            peak.ensure_window(16 * n);
        }
        assert!(peak.windows.len() <= WINDOW_CACHE_CAPACITY);
    }
}
