//! Per-line pixel extraction.
//!
//! A line decode is anchored on its sync edge. Each transmission channel is
//! swept pixel by pixel; every pixel gets a short window of raw audio
//! centered on its nominal position, and the FFT peak of that window becomes
//! the pixel value. Windows that fall outside the buffered audio are skipped
//! and leave the pixel at its default.

use crate::{
    decoder::SampleRing,
    modes::{
        LineLayout,
        Mode,
    },
    peak::SpectralPeak,
    raster::ChannelBuffer,
};

/// Decode the channels anchored at `anchor` (logical sample index of the
/// line's sync edge) into `buffer`, filling image line `line` (and `line + 1`
/// for PD pairs). Returns the number of image lines completed.
pub fn decode_line(
    mode: &Mode,
    line: usize,
    anchor: u64,
    ring: &SampleRing,
    peak: &mut SpectralPeak,
    buffer: &mut ChannelBuffer,
    sample_rate: f32,
) -> usize {
    match mode.layout {
        LineLayout::Pd => decode_pd_pair(mode, line, anchor, ring, peak, buffer, sample_rate),
        _ => {
            for channel in 0..mode.channel_count {
                let plane = mode.channel_order[channel];
                decode_channel(mode, line, channel, anchor, ring, peak, sample_rate, |x, v| {
                    buffer.set_pixel(plane, line, x, v);
                });
            }
            1
        }
    }
}

/// PD channel layout: Y of the even line, V, U, Y of the odd line. The
/// chroma channels are shared by both lines of the pair. On a buffer ending
/// mid-pair only the lines whose channels lie fully inside the buffer are
/// counted.
fn decode_pd_pair(
    mode: &Mode,
    line: usize,
    anchor: u64,
    ring: &SampleRing,
    peak: &mut SpectralPeak,
    buffer: &mut ChannelBuffer,
    sample_rate: f32,
) -> usize {
    let covered = |channel: usize| -> bool {
        let start = anchor as i64 + (mode.channel_offset(line, channel) * sample_rate).floor() as i64;
        let len = (mode.scan_time(line, channel) * sample_rate).round() as i64;
        start >= ring.start() as i64 && (start + len) as u64 <= ring.end()
    };

    let even_complete = (0..3).all(covered);
    let odd_complete = even_complete && covered(3);
    if !even_complete {
        return 0;
    }

    for channel in 0..mode.channel_count {
        if channel == 3 && !odd_complete {
            break;
        }
        decode_channel(mode, line, channel, anchor, ring, peak, sample_rate, |x, v| {
            match channel {
                0 => buffer.set_pixel(0, line, x, v),
                1 | 2 => {
                    buffer.set_pixel(channel, line, x, v);
                    buffer.set_pixel(channel, line + 1, x, v);
                }
                _ => buffer.set_pixel(0, line + 1, x, v),
            }
        });
    }

    if odd_complete {
        2
    }
    else {
        1
    }
}

#[allow(clippy::too_many_arguments)]
fn decode_channel(
    mode: &Mode,
    line: usize,
    channel: usize,
    anchor: u64,
    ring: &SampleRing,
    peak: &mut SpectralPeak,
    sample_rate: f32,
    mut write: impl FnMut(usize, u8),
) {
    let rate = sample_rate as f64;
    let channel_start =
        anchor as i64 + (mode.channel_offset(line, channel) as f64 * rate).floor() as i64;
    let pixel_time = mode.scan_time(line, channel) as f64 / mode.width as f64;

    let half_window = pixel_time * mode.window_factor as f64 / 2.0;
    let window_len = ((2.0 * half_window * rate).round() as usize).max(1);

    for x in 0..mode.width {
        let center = channel_start + (x as f64 * pixel_time * rate).round() as i64;
        let from = center - (window_len / 2) as i64;
        let Some(window) = ring.raw_slice(from, window_len)
        else {
            continue;
        };
        write(x, peak.pixel(window));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pixel_to_frequency;

    const SAMPLE_RATE: f32 = 48000.0;

    fn tone_ring(frequency: f32, seconds: f32) -> SampleRing {
        let count = (seconds * SAMPLE_RATE) as usize;
        let samples: Vec<f32> = (0..count)
            .map(|i| (std::f32::consts::TAU * frequency * i as f32 / SAMPLE_RATE).sin())
            .collect();
        let mut ring = SampleRing::new(count * 2);
        let silence = vec![0.0; count];
        ring.extend(&samples, &silence);
        ring
    }

    #[test]
    fn constant_tone_decodes_to_a_flat_line() {
        let mode = Mode::R24BW;
        let value = 200u8;
        let ring = tone_ring(pixel_to_frequency(value), 0.2);
        let mut peak = SpectralPeak::new(4096, SAMPLE_RATE);
        let mut buffer = ChannelBuffer::new(mode);

        let lines = decode_line(&mode, 0, 0, &ring, &mut peak, &mut buffer, SAMPLE_RATE);
        assert_eq!(lines, 1);
        for x in 2..mode.width - 2 {
            let pixel = buffer.pixel(0, 0, x);
            assert!(
                (pixel as i32 - value as i32).abs() <= 12,
                "pixel {x} read {pixel}"
            );
        }
    }

    #[test]
    fn windows_outside_the_ring_leave_pixels_at_zero() {
        let mode = Mode::R24BW;
        let ring = tone_ring(2300.0, 0.05);
        let mut peak = SpectralPeak::new(4096, SAMPLE_RATE);
        let mut buffer = ChannelBuffer::new(mode);

        // scan extends to 100 ms but the ring only holds 50 ms
        decode_line(&mode, 0, 0, &ring, &mut peak, &mut buffer, SAMPLE_RATE);
        assert_eq!(buffer.pixel(0, 0, mode.width - 1), 0);
        assert!(buffer.pixel(0, 0, 30) > 240);
    }

    #[test]
    fn pd_pair_on_truncated_audio_yields_only_the_even_line() {
        let mode = Mode::PD50;
        // enough for sync + three channels, not the fourth
        let ring = tone_ring(1900.0, 0.3);
        let mut peak = SpectralPeak::new(4096, SAMPLE_RATE);
        let mut buffer = ChannelBuffer::new(mode);

        let lines = decode_line(&mode, 0, 0, &ring, &mut peak, &mut buffer, SAMPLE_RATE);
        assert_eq!(lines, 1);

        let full = tone_ring(1900.0, 0.5);
        let lines = decode_line(&mode, 0, 0, &full, &mut peak, &mut buffer, SAMPLE_RATE);
        assert_eq!(lines, 2);
    }
}
