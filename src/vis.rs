//! VIS header decoding.
//!
//! A calibration header frames the mode announcement: 300 ms of 1900 Hz
//! leader, a 10 ms 1200 Hz break, another 300 ms leader, then ten 30 ms bits
//! at 1200/1100/1300 Hz. The demodulator reports the break as a nine
//! millisecond class pulse, which queues a candidate here; once enough audio
//! has accumulated past the break the candidate is evaluated against the raw
//! samples.
//!
//! <http://www.barberdsp.com/downloads/Dayton%20Paper.pdf>

use crate::{
    decoder::SampleRing,
    denormalize_frequency,
    modes::{
        self,
        Mode,
        VisCode,
    },
    peak::SpectralPeak,
    LEADER_BREAK_TIME,
    LEADER_TIME,
    LEADER_TONE,
    SCAN_BANDWIDTH,
    SYNC_TONE,
    VIS_BIT_TIME,
    VIS_HIGH_TONE,
    VIS_LOW_TONE,
};

/// Leader average window preceding the break.
const LEADER_CHECK_TIME: f32 = 0.060;

/// Frequency tolerance for the leader and every VIS bit.
const TONE_TOLERANCE: f32 = 100.0;

/// Samples of transition skipped on each side of a bit window. The Hann
/// weighting in the peak estimator already de-emphasizes the window edges,
/// so only the immediate switching transient needs to go.
const BIT_MARGIN_SAMPLES: usize = 5;

/// Slack allowed after the nominal end of the VIS before a candidate is
/// considered evaluable.
const WINDOW_SLACK_TIME: f32 = 0.060;

/// A queued 9/20 ms pulse that may turn out to be a leader break.
#[derive(Clone, Copy, Debug)]
pub struct VisCandidate {
    /// Logical sample index of the start of the break pulse.
    pub break_index: u64,
    /// Normalized deviation of the break from the sync tone; used to
    /// compensate a mistuned transmitter.
    pub frequency_offset: f32,
}

#[derive(Clone, Copy, Debug, thiserror::Error)]
pub enum VisError {
    #[error("pre-break leader tone missing")]
    Leader,
    #[error("start or stop bit off the sync tone")]
    Framing,
    #[error("data bit {bit} at {frequency} Hz matches neither vis tone")]
    BitFrequency { bit: usize, frequency: f32 },
    #[error("parity error not recoverable by a single bit flip")]
    Parity,
    #[error("vis code {0:?} not in the registry")]
    UnknownMode(VisCode),
    #[error("candidate audio no longer buffered")]
    Window,
}

/// Samples needed past the break before a candidate can be evaluated:
/// post-break leader, the VIS itself, and some slack.
pub fn required_span(sample_rate: f32) -> u64 {
    ((LEADER_TIME + 10.0 * VIS_BIT_TIME + WINDOW_SLACK_TIME) * sample_rate) as u64
}

/// Logical index of the first image data sample for a header whose break
/// started at `break_index`.
pub fn image_start(break_index: u64, sample_rate: f32) -> u64 {
    break_index + ((LEADER_BREAK_TIME + LEADER_TIME + 10.0 * VIS_BIT_TIME) * sample_rate) as u64
}

/// Evaluate a candidate against the buffered raw audio.
///
/// Returns the registered mode the VIS resolves to. All failures are
/// recoverable: the caller drops the candidate and keeps listening.
pub fn evaluate(
    candidate: &VisCandidate,
    ring: &SampleRing,
    peak: &mut SpectralPeak,
    sample_rate: f32,
) -> Result<&'static Mode, VisError> {
    let tune_offset = candidate.frequency_offset * SCAN_BANDWIDTH / 2.0;

    // average the demodulated stream over the 60 ms before the break to
    // confirm the leader tone
    let leader_len = (LEADER_CHECK_TIME * sample_rate) as usize;
    let leader_start = candidate.break_index as i64 - leader_len as i64;
    let window = ring
        .frequency_slice(leader_start, leader_len)
        .ok_or(VisError::Window)?;
    let mean = window.iter().sum::<f32>() / leader_len as f32;
    let leader = denormalize_frequency(mean) - tune_offset;
    if (leader - LEADER_TONE).abs() > TONE_TOLERANCE {
        tracing::debug!(leader, "leader tone check failed");
        return Err(VisError::Leader);
    }

    // ten 30 ms bits after break and post-break leader
    let bits_start = candidate.break_index as f64
        + ((LEADER_TIME + LEADER_BREAK_TIME) * sample_rate) as f64;
    let bit_len = (VIS_BIT_TIME * sample_rate) as f64;

    let mut code: u8 = 0;
    let mut parity_bit = false;
    for bit in 0..10 {
        let start = (bits_start + bit as f64 * bit_len) as i64 + BIT_MARGIN_SAMPLES as i64;
        let len = bit_len as usize - 2 * BIT_MARGIN_SAMPLES;
        let window = ring.raw_slice(start, len).ok_or(VisError::Window)?;
        let frequency = peak.frequency(window) - tune_offset;

        if bit == 0 || bit == 9 {
            if (frequency - SYNC_TONE).abs() > TONE_TOLERANCE {
                tracing::debug!(bit, frequency, "start/stop bit check failed");
                return Err(VisError::Framing);
            }
        }
        else {
            let value = if (frequency - VIS_HIGH_TONE).abs() <= TONE_TOLERANCE {
                true
            }
            else if (frequency - VIS_LOW_TONE).abs() <= TONE_TOLERANCE {
                false
            }
            else {
                return Err(VisError::BitFrequency { bit, frequency });
            };

            if bit == 8 {
                parity_bit = value;
            }
            else if value {
                // data bits are sent least significant first
                code |= 1 << (bit - 1);
            }
        }
    }

    let vis_code = VisCode::new(code).expect("7 data bits");
    if vis_code.parity() == parity_bit {
        return modes::by_vis(vis_code).ok_or(VisError::UnknownMode(vis_code));
    }

    // parity failed: try flipping each data bit in turn, accept the first
    // result the registry knows
    for bit in 0..7 {
        let flipped = VisCode::new(code ^ (1 << bit)).expect("7 data bits");
        if let Some(mode) = modes::by_vis(flipped) {
            tracing::debug!(?vis_code, ?flipped, "vis recovered by single bit flip");
            return Ok(mode);
        }
    }

    Err(VisError::Parity)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RATE: f32 = 48000.0;

    struct HeaderWriter {
        samples: Vec<f32>,
        phase: f32,
    }

    impl HeaderWriter {
        fn new() -> Self {
            Self {
                samples: vec![0.0; 2400],
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

        /// Calibration header for `code`; returns the break index.
        fn header(&mut self, code: u8) -> u64 {
            self.tone(LEADER_TONE, LEADER_TIME);
            let break_index = self.samples.len() as u64;
            self.tone(SYNC_TONE, LEADER_BREAK_TIME);
            self.tone(LEADER_TONE, LEADER_TIME);
            self.tone(SYNC_TONE, VIS_BIT_TIME);
            let mut ones = 0;
            for bit in 0..7 {
                if code >> bit & 1 != 0 {
                    ones += 1;
                    self.tone(VIS_HIGH_TONE, VIS_BIT_TIME);
                }
                else {
                    self.tone(VIS_LOW_TONE, VIS_BIT_TIME);
                }
            }
            self.tone(
                if ones % 2 != 0 { VIS_HIGH_TONE } else { VIS_LOW_TONE },
                VIS_BIT_TIME,
            );
            self.tone(SYNC_TONE, VIS_BIT_TIME);
            self.tone(1500.0, 0.1);
            break_index
        }

        /// Run the real demodulator so the ring carries a faithful
        /// frequency stream alongside the raw samples.
        fn into_ring(self) -> SampleRing {
            let mut demod = crate::demod::Demodulator::new(SAMPLE_RATE);
            let mut frequencies = Vec::new();
            let mut pulses = Vec::new();
            demod.process(&self.samples, &mut frequencies, &mut pulses);
            let mut ring = SampleRing::new(self.samples.len() * 2);
            ring.extend(&self.samples, &frequencies);
            ring
        }
    }

    fn candidate(break_index: u64) -> VisCandidate {
        VisCandidate {
            break_index,
            frequency_offset: 0.0,
        }
    }

    #[test]
    fn decodes_a_clean_martin_header() {
        let mut writer = HeaderWriter::new();
        let break_index = writer.header(0x2c);
        let ring = writer.into_ring();
        let mut peak = SpectralPeak::new(4096, SAMPLE_RATE);

        let mode = evaluate(&candidate(break_index), &ring, &mut peak, SAMPLE_RATE)
            .expect("clean header");
        assert_eq!(mode.short_name, "M1");
    }

    #[test]
    fn corrupted_data_bit_is_recovered_by_parity() {
        // Scottie S1 with data bit 3 knocked out: 0x3c becomes 0x34, parity
        // no longer matches, and the single-flip search restores 0x3c.
        let mut writer = HeaderWriter::new();
        let break_index = writer.samples.len() as u64 + (LEADER_TIME * SAMPLE_RATE) as u64;
        writer.tone(LEADER_TONE, LEADER_TIME);
        writer.tone(SYNC_TONE, LEADER_BREAK_TIME);
        writer.tone(LEADER_TONE, LEADER_TIME);
        writer.tone(SYNC_TONE, VIS_BIT_TIME);
        let sent = 0x34u8;
        let correct_ones = 0x3cu8.count_ones();
        for bit in 0..7 {
            if sent >> bit & 1 != 0 {
                writer.tone(VIS_HIGH_TONE, VIS_BIT_TIME);
            }
            else {
                writer.tone(VIS_LOW_TONE, VIS_BIT_TIME);
            }
        }
        // parity computed by the transmitter for the uncorrupted code
        writer.tone(
            if correct_ones % 2 != 0 { VIS_HIGH_TONE } else { VIS_LOW_TONE },
            VIS_BIT_TIME,
        );
        writer.tone(SYNC_TONE, VIS_BIT_TIME);
        writer.tone(1500.0, 0.1);

        let ring = writer.into_ring();
        let mut peak = SpectralPeak::new(4096, SAMPLE_RATE);
        let mode = evaluate(&candidate(break_index), &ring, &mut peak, SAMPLE_RATE)
            .expect("recovered header");
        assert_eq!(mode.short_name, "S1");
    }

    #[test]
    fn missing_leader_is_rejected() {
        let mut writer = HeaderWriter::new();
        writer.tone(1500.0, LEADER_TIME);
        let break_index = writer.samples.len() as u64;
        writer.tone(SYNC_TONE, LEADER_BREAK_TIME);
        writer.tone(LEADER_TONE, LEADER_TIME);
        for _ in 0..10 {
            writer.tone(VIS_LOW_TONE, VIS_BIT_TIME);
        }
        writer.tone(1500.0, 0.1);

        let ring = writer.into_ring();
        let mut peak = SpectralPeak::new(4096, SAMPLE_RATE);
        let result = evaluate(&candidate(break_index), &ring, &mut peak, SAMPLE_RATE);
        assert!(matches!(result, Err(VisError::Leader)));
    }

    #[test]
    fn unknown_code_with_valid_parity_is_rejected() {
        // 0x03 has two set bits (even parity holds) but no registered mode
        let mut writer = HeaderWriter::new();
        let break_index = writer.header(0x03);
        let ring = writer.into_ring();
        let mut peak = SpectralPeak::new(4096, SAMPLE_RATE);
        let result = evaluate(&candidate(break_index), &ring, &mut peak, SAMPLE_RATE);
        assert!(matches!(result, Err(VisError::UnknownMode(_))));
    }

    #[test]
    fn image_start_is_break_plus_leader_and_vis() {
        let start = image_start(1000, SAMPLE_RATE);
        let expected = 1000 + ((0.010 + 0.300 + 0.300) * SAMPLE_RATE) as u64;
        assert_eq!(start, expected);
    }
}
