//! Planar channel storage and RGB conversion.

use image::RgbImage;

use crate::modes::{
    ColorFormat,
    Mode,
};

/// Extra lines kept beyond the nominal image height so over-length
/// transmissions keep decoding instead of truncating.
pub const LINE_SLACK: usize = 128;

/// Full-range BT.601, as used by Robot and PD modes.
pub fn ycrcb_to_rgb(y: u8, v: u8, u: u8) -> [u8; 3] {
    let y = y as f32;
    let u = u as f32 - 128.0;
    let v = v as f32 - 128.0;
    let r = y + 1.402 * v;
    let g = y - 0.344136 * u - 0.714136 * v;
    let b = y + 1.772 * u;
    [
        r.round().clamp(0.0, 255.0) as u8,
        g.round().clamp(0.0, 255.0) as u8,
        b.round().clamp(0.0, 255.0) as u8,
    ]
}

/// Inverse of [`ycrcb_to_rgb`]: (Y, Cr, Cb) with the chroma offsets at 128.
pub fn rgb_to_ycrcb(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let r = r as f32;
    let g = g as f32;
    let b = b as f32;
    let y = 0.299 * r + 0.587 * g + 0.114 * b;
    let v = 128.0 + (r - y) / 1.402;
    let u = 128.0 + (b - y) / 1.772;
    (
        y.round().clamp(0.0, 255.0) as u8,
        v.round().clamp(0.0, 255.0) as u8,
        u.round().clamp(0.0, 255.0) as u8,
    )
}

/// Per-channel planar pixel storage for one image in flight.
///
/// Owns `lines_decoded`; every stage that fills pixels advances it through
/// [`ChannelBuffer::advance_line`], which keeps line events strictly
/// ordered.
#[derive(Clone, Debug)]
pub struct ChannelBuffer {
    mode: Mode,
    planes: Vec<Vec<u8>>,
    lines_decoded: usize,
}

impl ChannelBuffer {
    pub fn new(mode: Mode) -> Self {
        let plane_len = mode.width * (mode.height + LINE_SLACK);
        Self {
            mode,
            planes: vec![vec![0; plane_len]; mode.plane_count()],
            lines_decoded: 0,
        }
    }

    #[inline]
    pub fn mode(&self) -> &Mode {
        &self.mode
    }

    #[inline]
    pub fn lines_decoded(&self) -> usize {
        self.lines_decoded
    }

    /// Total line capacity including the slack region.
    #[inline]
    pub fn capacity_lines(&self) -> usize {
        self.mode.height + LINE_SLACK
    }

    #[inline]
    pub fn set_pixel(&mut self, plane: usize, line: usize, x: usize, value: u8) {
        debug_assert!(line < self.capacity_lines());
        self.planes[plane][line * self.mode.width + x] = value;
    }

    #[inline]
    pub fn pixel(&self, plane: usize, line: usize, x: usize) -> u8 {
        self.planes[plane][line * self.mode.width + x]
    }

    /// Mark one more line as filled; returns the new count.
    #[inline]
    pub fn advance_line(&mut self) -> usize {
        self.lines_decoded += 1;
        self.lines_decoded
    }

    /// Convert one stored line to packed RGB. `out` must hold `width * 3`
    /// bytes.
    pub fn line_to_rgb(&self, line: usize, out: &mut [u8]) {
        let width = self.mode.width;
        assert_eq!(out.len(), width * 3);

        match self.mode.color_format {
            ColorFormat::Rgb | ColorFormat::Gbr => {
                for x in 0..width {
                    out[3 * x] = self.pixel(0, line, x);
                    out[3 * x + 1] = self.pixel(1, line, x);
                    out[3 * x + 2] = self.pixel(2, line, x);
                }
            }
            ColorFormat::Gray => {
                for x in 0..width {
                    let y = self.pixel(0, line, x);
                    out[3 * x] = y;
                    out[3 * x + 1] = y;
                    out[3 * x + 2] = y;
                }
            }
            ColorFormat::YCrCb => {
                if self.planes.len() == 2 {
                    // 4:2:0 pair: V rides the even line, U the odd line.
                    // A half-decoded pair falls back to neutral chroma.
                    let pair = line & !1;
                    for x in 0..width {
                        let y = self.pixel(0, line, x);
                        let v = if pair < self.lines_decoded || pair == line {
                            self.pixel(1, pair, x)
                        }
                        else {
                            128
                        };
                        let u = if pair + 1 < self.lines_decoded || pair + 1 == line {
                            self.pixel(1, pair + 1, x)
                        }
                        else {
                            128
                        };
                        out[3 * x..3 * x + 3].copy_from_slice(&ycrcb_to_rgb(y, v, u));
                    }
                }
                else {
                    for x in 0..width {
                        let y = self.pixel(0, line, x);
                        let v = self.pixel(1, line, x);
                        let u = self.pixel(2, line, x);
                        out[3 * x..3 * x + 3].copy_from_slice(&ycrcb_to_rgb(y, v, u));
                    }
                }
            }
        }
    }

    /// Convert every line of the canonical image area to packed RGB. Lines
    /// that were never decoded stay black.
    pub fn to_rgb(&self) -> Vec<u8> {
        let width = self.mode.width;
        let height = self.mode.height;
        let mut rgb = vec![0; width * height * 3];
        let filled = self.lines_decoded.min(height);
        for line in 0..filled {
            self.line_to_rgb(line, &mut rgb[line * width * 3..(line + 1) * width * 3]);
        }
        rgb
    }

    /// Snapshot of the current decode state.
    pub fn to_decoded_image(&self) -> DecodedImage {
        DecodedImage {
            mode: self.mode,
            lines_decoded: self.lines_decoded,
            rgb: self.to_rgb(),
        }
    }

    /// Zero the line counter and the plane contents; keeps the allocation.
    pub fn reset(&mut self) {
        for plane in &mut self.planes {
            plane.fill(0);
        }
        self.lines_decoded = 0;
    }

    /// Release the plane storage.
    pub fn clear(&mut self) {
        self.planes.clear();
        self.lines_decoded = 0;
    }
}

/// A finished (or flushed) decode result.
#[derive(Clone, Debug)]
pub struct DecodedImage {
    pub mode: Mode,
    pub lines_decoded: usize,
    /// Packed RGB, `width * height * 3` bytes at the mode's canonical size.
    pub rgb: Vec<u8>,
}

impl DecodedImage {
    #[inline]
    pub fn width(&self) -> usize {
        self.mode.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.mode.height
    }

    pub fn to_rgb_image(&self) -> RgbImage {
        RgbImage::from_raw(
            self.mode.width as u32,
            self.mode.height as u32,
            self.rgb.clone(),
        )
        .expect("rgb buffer matches mode dimensions")
    }
}

/// Rotate each line `y` by `round(y * pixels_per_line)` columns, wrapping
/// around instead of leaving black edges.
pub fn slant_shift(rgb: &mut [u8], width: usize, height: usize, pixels_per_line: f32) {
    assert_eq!(rgb.len(), width * height * 3);
    let mut row = vec![0u8; width * 3];
    for y in 0..height {
        let shift = (y as f32 * pixels_per_line).round() as i64;
        let shift = shift.rem_euclid(width as i64) as usize;
        if shift == 0 {
            continue;
        }
        let line = &mut rgb[y * width * 3..(y + 1) * width * 3];
        row.copy_from_slice(line);
        for x in 0..width {
            let source = (x + shift) % width;
            line[3 * x..3 * x + 3].copy_from_slice(&row[3 * source..3 * source + 3]);
        }
    }
}
