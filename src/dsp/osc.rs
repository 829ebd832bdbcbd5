//! Numerically controlled oscillator.

use std::f32::consts::TAU;

use num_complex::Complex;

/// Complex phasor advanced by a fixed rotation per step.
///
/// The state is renormalized to unit magnitude after every step so the
/// repeated multiplications cannot drift.
#[derive(Clone, Copy, Debug)]
pub struct Phasor {
    state: Complex<f32>,
    delta: Complex<f32>,
}

impl Phasor {
    /// A phasor rotating at `frequency` Hz. Negative frequencies rotate
    /// clockwise, which is what a down-converting mixer wants.
    pub fn new(frequency: f32, sample_rate: f32) -> Self {
        Self {
            state: Complex::new(1.0, 0.0),
            delta: Complex::from_polar(1.0, TAU * frequency / sample_rate),
        }
    }

    /// Current state, then advance one step.
    #[inline]
    pub fn next(&mut self) -> Complex<f32> {
        let output = self.state;
        self.state *= self.delta;
        self.state /= self.state.norm();
        output
    }

    pub fn reset(&mut self) {
        self.state = Complex::new(1.0, 0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phasor_stays_on_the_unit_circle() {
        let mut phasor = Phasor::new(1700.0, 48000.0);
        for _ in 0..200_000 {
            phasor.next();
        }
        assert!((phasor.next().norm() - 1.0).abs() < 1e-4);
    }

    #[test]
    fn phasor_advances_by_the_expected_angle() {
        let sample_rate = 48000.0;
        let frequency = 1200.0;
        let mut phasor = Phasor::new(frequency, sample_rate);
        let a = phasor.next();
        let b = phasor.next();
        let step = (a.conj() * b).arg();
        assert!((step - TAU * frequency / sample_rate).abs() < 1e-5);
    }

    #[test]
    fn negative_frequency_rotates_clockwise() {
        let mut phasor = Phasor::new(-1000.0, 48000.0);
        let a = phasor.next();
        let b = phasor.next();
        assert!((a.conj() * b).arg() < 0.0);
    }
}
