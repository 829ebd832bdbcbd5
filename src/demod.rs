//! FM demodulation and sync-pulse detection.
//!
//! The incoming audio is mixed to complex baseband around the band center,
//! low-pass filtered, and discriminated by phase difference, yielding one
//! normalized frequency value per input sample. A smoothed copy of that
//! stream drives a Schmitt trigger that times 1200 Hz dips and classifies
//! them into the three sync-pulse width classes.
//!
//! <https://wirelesspi.com/frequency-modulation-fm-and-demodulation-using-dsp-techniques/>

use num_complex::Complex;

use crate::{
    dsp::{
        fir::{
            low_pass,
            FirFilter,
        },
        osc::Phasor,
        DelayLine,
        MovingAverage,
        SchmittTrigger,
        Scanner,
    },
    normalize_frequency,
    BAND_CENTER,
    SCAN_BANDWIDTH,
    SYNC_TONE,
};

/// Baseband low-pass cutoff: the scan band spans 1000..2800 Hz, so ±900 Hz
/// around the center covers it.
const LOWPASS_CUTOFF: f32 = 900.0;
const LOWPASS_KAISER_ALPHA: f64 = 3.0;

/// Schmitt thresholds sit between the sync tone and the porch tone,
/// symmetric around their midpoint so the timed run length is unbiased.
const TRIGGER_LOW_HZ: f32 = 1300.0;
const TRIGGER_HIGH_HZ: f32 = 1400.0;

/// Reject pulses whose mid-pulse frequency strays more than this from the
/// sync tone.
const SYNC_OFFSET_TOLERANCE_HZ: f32 = 50.0;

/// Sync pulse width classes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PulseWidth {
    FiveMs,
    NineMs,
    TwentyMs,
}

impl PulseWidth {
    /// Nominal duration in seconds.
    #[inline]
    pub fn duration(self) -> f32 {
        match self {
            PulseWidth::FiveMs => 5e-3,
            PulseWidth::NineMs => 9e-3,
            PulseWidth::TwentyMs => 20e-3,
        }
    }

    /// Classify a measured duration. The class boundaries are the midpoints
    /// between nominal widths; durations outside [2.5 ms, 25 ms] are not
    /// sync pulses.
    pub fn classify(duration: f32) -> Option<Self> {
        if !(2.5e-3..=25e-3).contains(&duration) {
            None
        }
        else if duration < 7e-3 {
            Some(PulseWidth::FiveMs)
        }
        else if duration < 14.5e-3 {
            Some(PulseWidth::NineMs)
        }
        else {
            Some(PulseWidth::TwentyMs)
        }
    }
}

/// A detected sync pulse.
#[derive(Clone, Copy, Debug)]
pub struct SyncPulse {
    pub width: PulseWidth,
    /// Logical sample index of the start of the pulse.
    pub index: u64,
    /// Mid-pulse deviation from the sync tone, in normalized frequency.
    pub frequency_offset: f32,
}

#[derive(Debug)]
pub struct Demodulator {
    sample_rate: f32,
    oscillator: Phasor,
    lowpass: FirFilter<Complex<f32>>,
    previous: Complex<f32>,
    scale: f32,
    smoother: MovingAverage,
    delay: DelayLine,
    trigger: SchmittTrigger,
    run: u64,
    position: u64,
    filter_delay: u64,
    min_run: u64,
    max_run: u64,
    sync_target: f32,
    offset_tolerance: f32,
}

impl Demodulator {
    pub fn new(sample_rate: f32) -> Self {
        let fir_len = ((0.002 * sample_rate).round() as usize) | 1;
        let avg_len = ((0.0025 * sample_rate).round() as usize) | 1;

        let lowpass = FirFilter::new(low_pass(
            sample_rate,
            LOWPASS_CUTOFF,
            fir_len,
            LOWPASS_KAISER_ALPHA,
        ));

        // The trigger thresholds sit two thirds of the way from porch to
        // sync, so a porch-flanked edge crosses two thirds into the
        // smoothing window. Together with the FIR group delay this places
        // reported indices on the true pulse start.
        let filter_delay = (lowpass.group_delay() + 2 * avg_len / 3) as u64;

        Self {
            sample_rate,
            oscillator: Phasor::new(-BAND_CENTER, sample_rate),
            lowpass,
            previous: Complex::new(0.0, 0.0),
            scale: sample_rate / (std::f32::consts::PI * SCAN_BANDWIDTH),
            smoother: MovingAverage::new(avg_len),
            delay: DelayLine::new(avg_len),
            trigger: SchmittTrigger::new(
                normalize_frequency(TRIGGER_LOW_HZ),
                normalize_frequency(TRIGGER_HIGH_HZ),
                true,
            ),
            run: 0,
            position: 0,
            filter_delay,
            min_run: (0.0025 * sample_rate).round() as u64,
            max_run: (0.025 * sample_rate).round() as u64,
            sync_target: normalize_frequency(SYNC_TONE),
            offset_tolerance: SYNC_OFFSET_TOLERANCE_HZ / (SCAN_BANDWIDTH / 2.0),
        }
    }

    #[inline]
    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    /// Delay between a feature in the input and its appearance in the
    /// smoothed trigger path, in samples.
    #[inline]
    pub fn filter_delay(&self) -> u64 {
        self.filter_delay
    }

    /// Logical index of the next input sample.
    #[inline]
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Demodulate one chunk. Appends one normalized frequency per input
    /// sample to `frequencies` and any completed sync pulses to `pulses`.
    pub fn process(
        &mut self,
        chunk: &[f32],
        frequencies: &mut Vec<f32>,
        pulses: &mut Vec<SyncPulse>,
    ) {
        frequencies.reserve(chunk.len());

        for &sample in chunk {
            let baseband = self.lowpass.scan(self.oscillator.next() * sample);
            let rotation = self.previous.conj() * baseband;
            self.previous = baseband;
            let frequency = rotation.arg() * self.scale;
            frequencies.push(frequency);

            let smoothed = self.smoother.scan(frequency);
            let delayed = self.delay.scan(smoothed);

            if !self.trigger.scan(smoothed) {
                self.run += 1;
            }
            else if self.run > 0 {
                let run = std::mem::take(&mut self.run);
                if let Some(pulse) = self.accept_pulse(run, delayed) {
                    pulses.push(pulse);
                }
            }

            self.position += 1;
        }
    }

    fn accept_pulse(&self, run: u64, delayed: f32) -> Option<SyncPulse> {
        if run < self.min_run || run > self.max_run {
            tracing::debug!(run, "pulse length out of range");
            return None;
        }

        let offset = delayed - self.sync_target;
        if offset.abs() > self.offset_tolerance {
            tracing::debug!(offset, "pulse off the sync tone");
            return None;
        }

        let width = PulseWidth::classify(run as f32 / self.sample_rate)?;
        let index = (self.position - run).saturating_sub(self.filter_delay);

        Some(SyncPulse {
            width,
            index,
            frequency_offset: offset,
        })
    }

    pub fn reset(&mut self) {
        self.oscillator.reset();
        self.lowpass.reset();
        self.previous = Complex::new(0.0, 0.0);
        self.smoother.reset();
        self.delay.reset();
        self.trigger.reset(true);
        self.run = 0;
        self.position = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PORCH_TONE;

    const SAMPLE_RATE: f32 = 48000.0;

    struct ToneWriter {
        samples: Vec<f32>,
        phase: f32,
    }

    impl ToneWriter {
        fn new() -> Self {
            Self {
                samples: Vec::new(),
                phase: 0.0,
            }
        }

        fn tone(&mut self, frequency: f32, duration: f32) {
            let count = (duration * SAMPLE_RATE).round() as usize;
            let step = std::f32::consts::TAU * frequency / SAMPLE_RATE;
            for _ in 0..count {
                self.samples.push(self.phase.sin());
                self.phase = (self.phase + step) % std::f32::consts::TAU;
            }
        }
    }

    #[test]
    fn classification_boundaries() {
        assert_eq!(PulseWidth::classify(2e-3), None);
        assert_eq!(PulseWidth::classify(2.5e-3), Some(PulseWidth::FiveMs));
        assert_eq!(PulseWidth::classify(5e-3), Some(PulseWidth::FiveMs));
        assert_eq!(PulseWidth::classify(6.9e-3), Some(PulseWidth::FiveMs));
        assert_eq!(PulseWidth::classify(7e-3), Some(PulseWidth::NineMs));
        assert_eq!(PulseWidth::classify(14.4e-3), Some(PulseWidth::NineMs));
        assert_eq!(PulseWidth::classify(14.5e-3), Some(PulseWidth::TwentyMs));
        assert_eq!(PulseWidth::classify(25e-3), Some(PulseWidth::TwentyMs));
        assert_eq!(PulseWidth::classify(26e-3), None);
    }

    #[test]
    fn demodulates_scan_band_tones_to_normalized_frequency() {
        let mut writer = ToneWriter::new();
        writer.tone(1900.0, 0.05);
        writer.tone(2300.0, 0.05);

        let mut demod = Demodulator::new(SAMPLE_RATE);
        let mut frequencies = Vec::new();
        let mut pulses = Vec::new();
        demod.process(&writer.samples, &mut frequencies, &mut pulses);

        // settled regions, away from the transitions
        let center: f32 =
            frequencies[1000..2000].iter().sum::<f32>() / 1000.0;
        let white: f32 =
            frequencies[3500..4500].iter().sum::<f32>() / 1000.0;
        assert!(center.abs() < 0.02, "center read {center}");
        assert!((white - 1.0).abs() < 0.02, "white read {white}");
        assert!(pulses.is_empty());
    }

    #[test]
    fn detects_and_classifies_the_three_pulse_widths() {
        let mut writer = ToneWriter::new();
        writer.tone(PORCH_TONE, 0.1);
        let first = writer.samples.len() as u64;
        writer.tone(1200.0, 5e-3);
        writer.tone(PORCH_TONE, 0.05);
        let second = writer.samples.len() as u64;
        writer.tone(1200.0, 9e-3);
        writer.tone(PORCH_TONE, 0.05);
        let third = writer.samples.len() as u64;
        writer.tone(1200.0, 20e-3);
        writer.tone(PORCH_TONE, 0.1);

        let mut demod = Demodulator::new(SAMPLE_RATE);
        let mut frequencies = Vec::new();
        let mut pulses = Vec::new();
        demod.process(&writer.samples, &mut frequencies, &mut pulses);

        assert_eq!(pulses.len(), 3, "pulses: {pulses:?}");
        assert_eq!(pulses[0].width, PulseWidth::FiveMs);
        assert_eq!(pulses[1].width, PulseWidth::NineMs);
        assert_eq!(pulses[2].width, PulseWidth::TwentyMs);

        for (pulse, expected) in pulses.iter().zip([first, second, third]) {
            let error = pulse.index as i64 - expected as i64;
            assert!(error.abs() <= 2, "start error {error} samples");
            assert!(pulse.frequency_offset.abs() < 0.05);
        }
    }

    #[test]
    fn rejects_pulses_off_the_sync_tone() {
        let mut writer = ToneWriter::new();
        writer.tone(PORCH_TONE, 0.1);
        // a dip that crosses the trigger but misses 1200 Hz by 80 Hz
        writer.tone(1280.0, 9e-3);
        writer.tone(PORCH_TONE, 0.1);

        let mut demod = Demodulator::new(SAMPLE_RATE);
        let mut frequencies = Vec::new();
        let mut pulses = Vec::new();
        demod.process(&writer.samples, &mut frequencies, &mut pulses);
        assert!(pulses.is_empty(), "pulses: {pulses:?}");
    }

    #[test]
    fn reset_restores_initial_position() {
        let mut demod = Demodulator::new(SAMPLE_RATE);
        let mut frequencies = Vec::new();
        let mut pulses = Vec::new();
        demod.process(&[0.1; 480], &mut frequencies, &mut pulses);
        assert_eq!(demod.position(), 480);
        demod.reset();
        assert_eq!(demod.position(), 0);
    }
}
