//! FIR filtering and window design.
//!
//! <https://en.wikipedia.org/wiki/Kaiser_window>
//! <https://en.wikipedia.org/wiki/Finite_impulse_response>

use std::ops::{
    Add,
    Mul,
};

use num_traits::Zero;

use crate::dsp::Scanner;

/// Zeroth-order modified Bessel function of the first kind.
///
/// Power-series evaluation; converges quickly for the argument range used by
/// Kaiser windows (|x| < 20 or so).
fn bessel_i0(x: f64) -> f64 {
    let half = x / 2.0;
    let mut sum = 1.0;
    let mut term = 1.0;
    let mut k = 1.0;
    loop {
        term *= (half / k) * (half / k);
        sum += term;
        if term < sum * 1e-12 {
            break;
        }
        k += 1.0;
    }
    sum
}

/// Kaiser window of shape parameter `alpha` and length `len`.
pub fn kaiser_window(alpha: f64, len: usize) -> Vec<f32> {
    assert!(len > 0);
    let denominator = bessel_i0(std::f64::consts::PI * alpha);
    let m = (len - 1) as f64;
    (0..len)
        .map(|n| {
            let t = if m == 0.0 { 0.0 } else { 2.0 * n as f64 / m - 1.0 };
            let argument = std::f64::consts::PI * alpha * (1.0 - t * t).max(0.0).sqrt();
            (bessel_i0(argument) / denominator) as f32
        })
        .collect()
}

/// Hann window of length `len`.
pub fn hann_window(len: usize) -> Vec<f32> {
    assert!(len > 0);
    let m = (len - 1).max(1) as f32;
    (0..len)
        .map(|n| (std::f32::consts::PI * n as f32 / m).sin().powi(2))
        .collect()
}

#[inline]
fn sinc(x: f64) -> f64 {
    if x == 0.0 {
        1.0
    }
    else {
        let px = std::f64::consts::PI * x;
        px.sin() / px
    }
}

/// Kaiser-windowed sinc low-pass taps, unity DC gain.
pub fn low_pass(sample_rate: f32, cutoff: f32, len: usize, alpha: f64) -> Vec<f32> {
    assert!(len > 0);
    let window = kaiser_window(alpha, len);
    let center = (len - 1) as f64 / 2.0;

    let mut taps: Vec<f32> = (0..len)
        .map(|n| {
            let x = n as f64 - center;
            (sinc(2.0 * cutoff as f64 * x / sample_rate as f64) * window[n] as f64) as f32
        })
        .collect();

    let gain: f32 = taps.iter().sum();
    for tap in &mut taps {
        *tap /= gain;
    }
    taps
}

/// FIR filter over a circular buffer of the last `taps.len()` samples.
///
/// Works for real and complex samples; the taps are always real.
#[derive(Clone, Debug)]
pub struct FirFilter<S> {
    taps: Vec<f32>,
    buffer: Vec<S>,
    pos: usize,
}

impl<S> FirFilter<S>
where
    S: Zero + Copy,
{
    pub fn new(taps: Vec<f32>) -> Self {
        assert!(!taps.is_empty());
        let buffer = vec![S::zero(); taps.len()];
        Self {
            taps,
            buffer,
            pos: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.taps.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Group delay in samples for the linear-phase (symmetric) taps used here.
    #[inline]
    pub fn group_delay(&self) -> usize {
        (self.taps.len() - 1) / 2
    }

    pub fn reset(&mut self) {
        self.buffer.fill(S::zero());
        self.pos = 0;
    }
}

impl<S> Scanner<S> for FirFilter<S>
where
    S: Zero + Copy + Mul<f32, Output = S> + Add<S, Output = S>,
{
    type Output = S;

    fn scan(&mut self, sample: S) -> S {
        let n = self.buffer.len();
        self.buffer[self.pos] = sample;

        let mut output = S::zero();
        let mut index = self.pos;
        for &tap in &self.taps {
            output = output + self.buffer[index] * tap;
            index = if index == 0 { n - 1 } else { index - 1 };
        }

        self.pos += 1;
        if self.pos == n {
            self.pos = 0;
        }

        output
    }
}

#[cfg(test)]
mod tests {
    use num_complex::Complex;

    use super::*;

    #[test]
    fn bessel_i0_reference_values() {
        // Abramowitz & Stegun 9.8
        assert!((bessel_i0(0.0) - 1.0).abs() < 1e-12);
        assert!((bessel_i0(1.0) - 1.2660658).abs() < 1e-6);
        assert!((bessel_i0(2.0) - 2.2795853).abs() < 1e-6);
    }

    #[test]
    fn kaiser_window_is_symmetric_and_peaks_in_the_middle() {
        let window = kaiser_window(3.0, 21);
        for i in 0..21 {
            assert!((window[i] - window[20 - i]).abs() < 1e-6);
        }
        assert!((window[10] - 1.0).abs() < 1e-6);
        assert!(window[0] < 0.1);
    }

    #[test]
    fn hann_window_endpoints_are_zero() {
        let window = hann_window(64);
        assert!(window[0].abs() < 1e-6);
        assert!(window[63].abs() < 1e-6);
        assert!((window[31] - window[32]).abs() < 1e-3);
    }

    #[test]
    fn low_pass_has_unity_dc_gain() {
        let taps = low_pass(48000.0, 900.0, 97, 3.0);
        let gain: f32 = taps.iter().sum();
        assert!((gain - 1.0).abs() < 1e-5);
    }

    #[test]
    fn low_pass_attenuates_out_of_band_tone() {
        let sample_rate = 48000.0;
        let taps = low_pass(sample_rate, 900.0, 97, 3.0);
        let mut filter = FirFilter::<f32>::new(taps);

        let respond = |filter: &mut FirFilter<f32>, frequency: f32| -> f32 {
            let mut peak = 0.0f32;
            for i in 0..4800 {
                let t = i as f32 / sample_rate;
                let y = filter.scan((std::f32::consts::TAU * frequency * t).sin());
                if i > 200 {
                    peak = peak.max(y.abs());
                }
            }
            peak
        };

        let in_band = respond(&mut filter, 300.0);
        filter.reset();
        let out_of_band = respond(&mut filter, 6000.0);
        assert!(in_band > 0.9, "in band peak {in_band}");
        assert!(out_of_band < 0.05, "out of band peak {out_of_band}");
    }

    #[test]
    fn fir_matches_naive_convolution() {
        let taps = vec![0.25, 0.5, 0.125, 0.125];
        let mut filter = FirFilter::<f32>::new(taps.clone());
        let input: Vec<f32> = (0..16).map(|i| (i as f32 * 0.7).sin()).collect();

        for (i, &x) in input.iter().enumerate() {
            let got = filter.scan(x);
            let mut expected = 0.0;
            for (k, &tap) in taps.iter().enumerate() {
                if i >= k {
                    expected += tap * input[i - k];
                }
            }
            assert!((got - expected).abs() < 1e-6, "at {i}");
        }
    }

    #[test]
    fn fir_accepts_complex_samples() {
        let mut filter = FirFilter::<Complex<f32>>::new(vec![0.5, 0.5]);
        let a = filter.scan(Complex::new(1.0, -1.0));
        let b = filter.scan(Complex::new(3.0, 1.0));
        assert!((a - Complex::new(0.5, -0.5)).norm() < 1e-6);
        assert!((b - Complex::new(2.0, 0.0)).norm() < 1e-6);
    }
}
