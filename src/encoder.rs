//! SSTV encoder.
//!
//! Phase-continuous tone synthesis: one phase accumulator survives the whole
//! transmission, and tone boundaries carry a fractional-sample remainder so
//! line timing never drifts no matter how many pixels are emitted.

use image::{
    imageops,
    RgbImage,
};

use crate::{
    modes::{
        self,
        ColorFormat,
        LineLayout,
        Mode,
        VisCode,
    },
    pixel_to_frequency,
    raster::rgb_to_ycrcb,
    LEADER_BREAK_TIME,
    LEADER_TIME,
    LEADER_TONE,
    PORCH_TONE,
    SYNC_TONE,
    VIS_BIT_TIME,
    VIS_HIGH_TONE,
    VIS_LOW_TONE,
};

/// Robot separator structure: a separator tone then a short porch before
/// each chroma channel. The tones differ between the V and U channels.
const ROBOT_SEPARATOR_TIME: f32 = 4.5e-3;
const ROBOT_SEPARATOR_PORCH_TIME: f32 = 1.5e-3;

const VOX_TONE_TIME: f32 = 0.1;

#[derive(Clone, Copy, Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("vis code {0:?} not in the registry")]
    UnknownMode(VisCode),
    #[error("rgb buffer holds {got} bytes, expected {expected}")]
    BufferSize { expected: usize, got: usize },
}

#[derive(Clone, Copy, Debug)]
pub struct EncoderConfig {
    pub sample_rate: f32,
    pub add_calibration_header: bool,
    pub add_vox_tones: bool,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000.0,
            add_calibration_header: true,
            add_vox_tones: false,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SstvEncoder {
    mode: Mode,
    config: EncoderConfig,
}

impl SstvEncoder {
    pub fn new(mode: Mode, config: EncoderConfig) -> Self {
        Self { mode, config }
    }

    pub fn from_vis(vis_code: VisCode, config: EncoderConfig) -> Result<Self, EncodeError> {
        let mode = modes::by_vis(vis_code).ok_or(EncodeError::UnknownMode(vis_code))?;
        Ok(Self::new(*mode, config))
    }

    #[inline]
    pub fn mode(&self) -> &Mode {
        &self.mode
    }

    /// Total transmission time in seconds for the current configuration.
    pub fn transmission_seconds(&self) -> f64 {
        let mut seconds = 0.0f64;
        if self.config.add_vox_tones {
            seconds += 3.0 * VOX_TONE_TIME as f64;
        }
        if self.config.add_calibration_header {
            seconds += (2.0 * LEADER_TIME + LEADER_BREAK_TIME) as f64 + 10.0 * VIS_BIT_TIME as f64;
        }
        if self.mode.has_start_sync {
            seconds += 9e-3;
        }
        let pairs = self.mode.height / self.mode.lines_per_sync();
        seconds + pairs as f64 * self.mode.line_time as f64
    }

    /// Encode a packed RGB image. Images that do not match the mode's
    /// canonical dimensions are resized with nearest-neighbour sampling.
    pub fn encode_rgb(
        &self,
        rgb: &[u8],
        width: usize,
        height: usize,
    ) -> Result<Vec<f32>, EncodeError> {
        let expected = width * height * 3;
        if rgb.len() != expected {
            return Err(EncodeError::BufferSize {
                expected,
                got: rgb.len(),
            });
        }

        if width == self.mode.width && height == self.mode.height {
            return Ok(self.encode_planes(&self.planes_from_rgb(rgb)));
        }

        let image = RgbImage::from_raw(width as u32, height as u32, rgb.to_vec())
            .expect("length checked above");
        Ok(self.encode_image(&image))
    }

    /// Encode an [`RgbImage`], resizing to the mode's canonical dimensions
    /// if necessary.
    pub fn encode_image(&self, image: &RgbImage) -> Vec<f32> {
        let canonical_size =
            (image.width(), image.height()) == (self.mode.width as u32, self.mode.height as u32);
        if canonical_size {
            self.encode_planes(&self.planes_from_rgb(image.as_raw()))
        }
        else {
            let resized = imageops::resize(
                image,
                self.mode.width as u32,
                self.mode.height as u32,
                imageops::FilterType::Nearest,
            );
            self.encode_planes(&self.planes_from_rgb(resized.as_raw()))
        }
    }

    /// Storage planes in the layout the decoder fills: RGB order for the
    /// RGB/GBR formats, Y/V/U for color difference formats, a lone Y plane
    /// for grayscale. PD chroma is averaged over each line pair.
    fn planes_from_rgb(&self, rgb: &[u8]) -> Vec<Vec<u8>> {
        let mode = &self.mode;
        let width = mode.width;
        let height = mode.height;
        let pixels = width * height;

        match mode.color_format {
            ColorFormat::Rgb | ColorFormat::Gbr => {
                let mut planes = vec![vec![0u8; pixels]; 3];
                for i in 0..pixels {
                    planes[0][i] = rgb[3 * i];
                    planes[1][i] = rgb[3 * i + 1];
                    planes[2][i] = rgb[3 * i + 2];
                }
                planes
            }
            ColorFormat::Gray => {
                let mut planes = vec![vec![0u8; pixels]];
                for i in 0..pixels {
                    let (y, _, _) = rgb_to_ycrcb(rgb[3 * i], rgb[3 * i + 1], rgb[3 * i + 2]);
                    planes[0][i] = y;
                }
                planes
            }
            ColorFormat::YCrCb => {
                let mut y_plane = vec![0u8; pixels];
                let mut v_plane = vec![0u8; pixels];
                let mut u_plane = vec![0u8; pixels];
                for i in 0..pixels {
                    let (y, v, u) = rgb_to_ycrcb(rgb[3 * i], rgb[3 * i + 1], rgb[3 * i + 2]);
                    y_plane[i] = y;
                    v_plane[i] = v;
                    u_plane[i] = u;
                }

                match mode.plane_count() {
                    2 => {
                        // 4:2:0 over sync-locked pairs: V rides even lines,
                        // U rides odd lines
                        let mut chroma = vec![0u8; pixels];
                        for line in 0..height {
                            let source = if line % 2 == 0 { &v_plane } else { &u_plane };
                            chroma[line * width..(line + 1) * width]
                                .copy_from_slice(&source[line * width..(line + 1) * width]);
                        }
                        vec![y_plane, chroma]
                    }
                    _ => {
                        if mode.layout == LineLayout::Pd {
                            average_line_pairs(&mut v_plane, width, height);
                            average_line_pairs(&mut u_plane, width, height);
                        }
                        vec![y_plane, v_plane, u_plane]
                    }
                }
            }
        }
    }

    fn encode_planes(&self, planes: &[Vec<u8>]) -> Vec<f32> {
        let mode = &self.mode;
        let mut generator = ToneGenerator::new(
            self.config.sample_rate,
            (self.transmission_seconds() * self.config.sample_rate as f64).ceil() as usize + 16,
        );

        if self.config.add_vox_tones {
            generator.tone(LEADER_TONE, VOX_TONE_TIME);
            generator.silence(VOX_TONE_TIME);
            generator.tone(LEADER_TONE, VOX_TONE_TIME);
        }

        if self.config.add_calibration_header {
            generator.tone(LEADER_TONE, LEADER_TIME);
            generator.tone(SYNC_TONE, LEADER_BREAK_TIME);
            generator.tone(LEADER_TONE, LEADER_TIME);
            generator.tone(SYNC_TONE, VIS_BIT_TIME);
            for bit in 0..7 {
                let tone = if mode.vis_code.get_bit(bit) {
                    VIS_HIGH_TONE
                }
                else {
                    VIS_LOW_TONE
                };
                generator.tone(tone, VIS_BIT_TIME);
            }
            generator.tone(
                if mode.vis_code.parity() {
                    VIS_HIGH_TONE
                }
                else {
                    VIS_LOW_TONE
                },
                VIS_BIT_TIME,
            );
            generator.tone(SYNC_TONE, VIS_BIT_TIME);
        }

        if mode.has_start_sync {
            generator.tone(SYNC_TONE, 9e-3);
        }

        let mut line = 0;
        while line < mode.height {
            self.encode_line(planes, line, &mut generator);
            line += mode.lines_per_sync();
        }

        generator.into_samples()
    }

    fn encode_line(&self, planes: &[Vec<u8>], line: usize, generator: &mut ToneGenerator) {
        let mode = &self.mode;

        if mode.layout != LineLayout::Scottie {
            generator.tone(SYNC_TONE, mode.sync_pulse);
            generator.tone(PORCH_TONE, mode.sync_porch);
        }

        for channel in 0..mode.channel_count {
            match mode.layout {
                LineLayout::Scottie => {
                    if channel == mode.sync_channel {
                        generator.tone(SYNC_TONE, mode.sync_pulse);
                        generator.tone(PORCH_TONE, mode.sync_porch);
                    }
                    if mode.separator_pulses[channel] > 0.0 {
                        generator.tone(PORCH_TONE, mode.separator_pulses[channel]);
                    }
                    self.pixel_sweep(planes, line, channel, generator);
                }
                LineLayout::Robot => {
                    if channel > 0 {
                        let (separator, porch) = robot_separator_tones(mode, line, channel);
                        generator.tone(separator, ROBOT_SEPARATOR_TIME);
                        generator.tone(porch, ROBOT_SEPARATOR_PORCH_TIME);
                    }
                    self.pixel_sweep(planes, line, channel, generator);
                }
                LineLayout::Pd => {
                    self.pixel_sweep(planes, line, channel, generator);
                }
                LineLayout::Sweep => {
                    self.pixel_sweep(planes, line, channel, generator);
                    if mode.separator_pulses[channel] > 0.0 {
                        generator.tone(PORCH_TONE, mode.separator_pulses[channel]);
                    }
                }
            }
        }
    }

    fn pixel_sweep(
        &self,
        planes: &[Vec<u8>],
        line: usize,
        channel: usize,
        generator: &mut ToneGenerator,
    ) {
        let mode = &self.mode;
        let (plane, source_line) = match mode.layout {
            LineLayout::Pd => {
                match channel {
                    0 => (0, line),
                    1 | 2 => (channel, line),
                    _ => (0, line + 1),
                }
            }
            _ => (mode.channel_order[channel], line),
        };

        let pixel_time = mode.scan_time(source_line, channel) / mode.width as f32;
        let row = &planes[plane][source_line * mode.width..(source_line + 1) * mode.width];
        for &value in row {
            generator.tone(pixel_to_frequency(value), pixel_time);
        }
    }
}

fn robot_separator_tones(mode: &Mode, line: usize, channel: usize) -> (f32, f32) {
    if mode.channel_count == 2 {
        // Robot 36: the separator tone announces the pair parity
        if line % 2 == 0 {
            (1500.0, 1900.0)
        }
        else {
            (2300.0, 1900.0)
        }
    }
    else if channel == 1 {
        (1500.0, 1900.0)
    }
    else {
        (2300.0, 1500.0)
    }
}

/// Average each chroma line pair in place, writing the mean to both lines.
fn average_line_pairs(plane: &mut [u8], width: usize, height: usize) {
    for pair in (0..height.saturating_sub(1)).step_by(2) {
        for x in 0..width {
            let a = plane[pair * width + x] as u16;
            let b = plane[(pair + 1) * width + x] as u16;
            let mean = ((a + b) / 2) as u8;
            plane[pair * width + x] = mean;
            plane[(pair + 1) * width + x] = mean;
        }
    }
}

/// Writes sine samples tone by tone, carrying both the oscillator phase and
/// the fractional-sample duration remainder across tone boundaries.
#[derive(Clone, Debug)]
struct ToneGenerator {
    samples: Vec<f32>,
    sample_rate: f64,
    phase: f32,
    time_error: f64,
}

impl ToneGenerator {
    fn new(sample_rate: f32, capacity: usize) -> Self {
        Self {
            samples: Vec::with_capacity(capacity),
            sample_rate: sample_rate as f64,
            phase: 0.0,
            time_error: 0.0,
        }
    }

    fn tone(&mut self, frequency: f32, duration: f32) {
        let exact = duration as f64 * self.sample_rate + self.time_error;
        let count = exact.round().max(0.0) as usize;
        self.time_error = exact - count as f64;

        let step = std::f32::consts::TAU * frequency / self.sample_rate as f32;
        for _ in 0..count {
            self.samples.push(self.phase.sin());
            self.phase += step;
            if self.phase > std::f32::consts::TAU {
                self.phase -= std::f32::consts::TAU;
            }
        }
    }

    fn silence(&mut self, duration: f32) {
        let exact = duration as f64 * self.sample_rate + self.time_error;
        let count = exact.round().max(0.0) as usize;
        self.time_error = exact - count as f64;
        self.samples.extend(std::iter::repeat(0.0).take(count));
    }

    fn into_samples(self) -> Vec<f32> {
        self.samples
    }
}
