//! Mode records and the VIS registry.
//!
//! Timings adapted from [here][1]. [Vis codes][2]
//!
//! Every record is internally consistent: `line_time` equals the exact sum of
//! sync, porch, scans and separators, so scheduling arithmetic derived from
//! either agrees to the sample. Published tables occasionally disagree with
//! their own component sums by a fraction of a millisecond (Scottie S1 being
//! the usual offender); the component values win here.
//!
//! [1]: https://github.com/windytan/slowrx/blob/master/modespec.c
//! [2]: https://web.archive.org/web/20050306193820/http://www.tima.com/~djones/vis.txt

use std::{
    collections::HashMap,
    sync::OnceLock,
};

use crate::demod::PulseWidth;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColorFormat {
    /// Red, green, blue planes transmitted in record order.
    Rgb,
    /// Green, blue, red transmission order, stored as RGB planes.
    Gbr,
    /// Luminance plus color difference channels, BT.601 full range.
    YCrCb,
    /// Luminance only.
    Gray,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChromaSubsampling {
    /// 4:4:4 — chroma at full resolution (or no chroma at all).
    Cs444,
    /// 4:2:2 — chroma channels at half the luminance scan time.
    Cs422,
    /// 4:2:0 — one chroma line shared by a pair of luminance lines.
    Cs420,
}

/// Structural family driving the per-channel timing functions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineLayout {
    /// Line-start sync, porch, then each channel followed by its separator.
    /// Martin, Wraase and Pasokon.
    Sweep,
    /// Mid-line sync: the channels before `sync_channel` trail the previous
    /// sync pulse and sit at negative offsets from this line's sync edge.
    Scottie,
    /// Line-start sync with separator-plus-porch gaps before each chroma
    /// channel. Robot color modes.
    Robot,
    /// Line-start long sync, then four gapless channels covering a pair of
    /// image lines: Y of the even line, V, U, Y of the odd line.
    Pd,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct VisCode(u8);

impl VisCode {
    #[inline]
    pub const fn new(value: u8) -> Option<Self> {
        if value & 0x80 == 0 {
            Some(Self(value))
        }
        else {
            None
        }
    }

    #[inline]
    pub const fn new_unchecked(value: u8) -> Self {
        Self(value)
    }

    #[inline]
    pub fn get(&self) -> u8 {
        self.0
    }

    #[inline]
    pub fn get_bit(&self, bit: u8) -> bool {
        assert!(bit < 7);
        (self.0 >> bit) & 1 != 0
    }

    /// Even parity over the seven data bits.
    #[inline]
    pub fn parity(&self) -> bool {
        self.0.count_ones() & 1 != 0
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Mode {
    pub vis_code: VisCode,
    pub name: &'static str,
    pub short_name: &'static str,
    pub color_format: ColorFormat,
    pub chroma: ChromaSubsampling,
    pub layout: LineLayout,
    pub width: usize,
    pub height: usize,
    /// Line-boundary sync pulse duration in seconds.
    pub sync_pulse: f32,
    /// Porch following the sync pulse, seconds.
    pub sync_porch: f32,
    /// Channels per transmitted line (per line pair for PD).
    pub channel_count: usize,
    /// Transmission order → storage plane.
    pub channel_order: [usize; 4],
    /// Per-channel scan durations, seconds, transmission order.
    pub scan_times: [f32; 4],
    /// Per-channel separator durations, seconds. `Sweep` separators trail
    /// their channel; `Scottie` and `Robot` separators precede it.
    pub separator_pulses: [f32; 4],
    /// Total duration of one transmitted line (line pair for PD), seconds.
    pub line_time: f32,
    /// Whether a lone 9 ms sync precedes line 0.
    pub has_start_sync: bool,
    /// For mid-line sync layouts: the transmission channel the sync pulse
    /// precedes. Zero for line-start sync.
    pub sync_channel: usize,
    /// Multiplier for the pixel sampling window width.
    pub window_factor: f32,
}

impl Mode {
    /// N7CXI, 2000
    pub const M1: Self = Self {
        vis_code: VisCode(0x2c),
        name: "Martin M1",
        short_name: "M1",
        color_format: ColorFormat::Gbr,
        chroma: ChromaSubsampling::Cs444,
        layout: LineLayout::Sweep,
        width: 320,
        height: 256,
        sync_pulse: 4.862e-3,
        sync_porch: 0.572e-3,
        channel_count: 3,
        channel_order: [1, 2, 0, 0],
        scan_times: [146.432e-3, 146.432e-3, 146.432e-3, 0.0],
        separator_pulses: [0.572e-3, 0.572e-3, 0.572e-3, 0.0],
        line_time: 446.446e-3,
        has_start_sync: false,
        sync_channel: 0,
        window_factor: 2.0,
    };

    /// N7CXI, 2000
    pub const M2: Self = Self {
        vis_code: VisCode(0x28),
        name: "Martin M2",
        short_name: "M2",
        color_format: ColorFormat::Gbr,
        chroma: ChromaSubsampling::Cs444,
        layout: LineLayout::Sweep,
        width: 320,
        height: 256,
        sync_pulse: 4.862e-3,
        sync_porch: 0.572e-3,
        channel_count: 3,
        channel_order: [1, 2, 0, 0],
        scan_times: [73.216e-3, 73.216e-3, 73.216e-3, 0.0],
        separator_pulses: [0.572e-3, 0.572e-3, 0.572e-3, 0.0],
        line_time: 226.798e-3,
        has_start_sync: false,
        sync_channel: 0,
        window_factor: 2.0,
    };

    /// N7CXI, 2000
    pub const S1: Self = Self {
        vis_code: VisCode(0x3c),
        name: "Scottie S1",
        short_name: "S1",
        color_format: ColorFormat::Gbr,
        chroma: ChromaSubsampling::Cs444,
        layout: LineLayout::Scottie,
        width: 320,
        height: 256,
        sync_pulse: 9e-3,
        sync_porch: 1.5e-3,
        channel_count: 3,
        channel_order: [1, 2, 0, 0],
        scan_times: [138.24e-3, 138.24e-3, 138.24e-3, 0.0],
        separator_pulses: [1.5e-3, 1.5e-3, 0.0, 0.0],
        line_time: 428.22e-3,
        has_start_sync: true,
        sync_channel: 2,
        window_factor: 2.0,
    };

    /// N7CXI, 2000
    pub const S2: Self = Self {
        vis_code: VisCode(0x38),
        name: "Scottie S2",
        short_name: "S2",
        color_format: ColorFormat::Gbr,
        chroma: ChromaSubsampling::Cs444,
        layout: LineLayout::Scottie,
        width: 320,
        height: 256,
        sync_pulse: 9e-3,
        sync_porch: 1.5e-3,
        channel_count: 3,
        channel_order: [1, 2, 0, 0],
        scan_times: [88.064e-3, 88.064e-3, 88.064e-3, 0.0],
        separator_pulses: [1.5e-3, 1.5e-3, 0.0, 0.0],
        line_time: 277.692e-3,
        has_start_sync: true,
        sync_channel: 2,
        window_factor: 2.0,
    };

    /// N7CXI, 2000
    pub const SDX: Self = Self {
        vis_code: VisCode(0x4c),
        name: "Scottie DX",
        short_name: "SDX",
        color_format: ColorFormat::Gbr,
        chroma: ChromaSubsampling::Cs444,
        layout: LineLayout::Scottie,
        width: 320,
        height: 256,
        sync_pulse: 9e-3,
        sync_porch: 1.5e-3,
        channel_count: 3,
        channel_order: [1, 2, 0, 0],
        scan_times: [345.6e-3, 345.6e-3, 345.6e-3, 0.0],
        separator_pulses: [1.5e-3, 1.5e-3, 0.0, 0.0],
        line_time: 1050.3e-3,
        has_start_sync: true,
        sync_channel: 2,
        window_factor: 2.0,
    };

    /// N7CXI, 2000
    pub const R36: Self = Self {
        vis_code: VisCode(0x08),
        name: "Robot 36",
        short_name: "R36",
        color_format: ColorFormat::YCrCb,
        chroma: ChromaSubsampling::Cs420,
        layout: LineLayout::Robot,
        width: 320,
        height: 240,
        sync_pulse: 9e-3,
        sync_porch: 3e-3,
        channel_count: 2,
        channel_order: [0, 1, 0, 0],
        scan_times: [88e-3, 44e-3, 0.0, 0.0],
        separator_pulses: [0.0, 6e-3, 0.0, 0.0],
        line_time: 150e-3,
        has_start_sync: false,
        sync_channel: 0,
        window_factor: 2.0,
    };

    /// N7CXI, 2000
    pub const R72: Self = Self {
        vis_code: VisCode(0x0c),
        name: "Robot 72",
        short_name: "R72",
        color_format: ColorFormat::YCrCb,
        chroma: ChromaSubsampling::Cs422,
        layout: LineLayout::Robot,
        width: 320,
        height: 240,
        sync_pulse: 9e-3,
        sync_porch: 3e-3,
        channel_count: 3,
        channel_order: [0, 1, 2, 0],
        scan_times: [138e-3, 69e-3, 69e-3, 0.0],
        separator_pulses: [0.0, 6e-3, 6e-3, 0.0],
        line_time: 300e-3,
        has_start_sync: false,
        sync_channel: 0,
        window_factor: 2.0,
    };

    /// N7CXI, 2000
    pub const R24BW: Self = Self {
        vis_code: VisCode(0x0a),
        name: "Robot 24 B/W",
        short_name: "R24BW",
        color_format: ColorFormat::Gray,
        chroma: ChromaSubsampling::Cs444,
        layout: LineLayout::Sweep,
        width: 320,
        height: 240,
        sync_pulse: 7e-3,
        sync_porch: 0.0,
        channel_count: 1,
        channel_order: [0, 0, 0, 0],
        scan_times: [93e-3, 0.0, 0.0, 0.0],
        separator_pulses: [0.0, 0.0, 0.0, 0.0],
        line_time: 100e-3,
        has_start_sync: false,
        sync_channel: 0,
        window_factor: 2.0,
    };

    /// N7CXI, 2000
    pub const W2180: Self = Self {
        vis_code: VisCode(0x37),
        name: "Wraase SC-2 180",
        short_name: "W2180",
        color_format: ColorFormat::Rgb,
        chroma: ChromaSubsampling::Cs444,
        layout: LineLayout::Sweep,
        width: 320,
        height: 256,
        sync_pulse: 5.5225e-3,
        sync_porch: 0.5e-3,
        channel_count: 3,
        channel_order: [0, 1, 2, 0],
        scan_times: [235e-3, 235e-3, 235e-3, 0.0],
        separator_pulses: [0.0, 0.0, 0.0, 0.0],
        line_time: 711.0225e-3,
        has_start_sync: false,
        sync_channel: 0,
        window_factor: 2.0,
    };

    /// N7CXI, 2000
    pub const P3: Self = Self {
        vis_code: VisCode(0x71),
        name: "Pasokon P3",
        short_name: "P3",
        color_format: ColorFormat::Rgb,
        chroma: ChromaSubsampling::Cs444,
        layout: LineLayout::Sweep,
        width: 640,
        height: 496,
        sync_pulse: 5.208333e-3,
        sync_porch: 1.041667e-3,
        channel_count: 3,
        channel_order: [0, 1, 2, 0],
        scan_times: [133.333333e-3, 133.333333e-3, 133.333333e-3, 0.0],
        separator_pulses: [1.041667e-3, 1.041667e-3, 1.041667e-3, 0.0],
        line_time: 409.375e-3,
        has_start_sync: false,
        sync_channel: 0,
        window_factor: 2.0,
    };

    /// N7CXI, 2000
    pub const P5: Self = Self {
        vis_code: VisCode(0x72),
        name: "Pasokon P5",
        short_name: "P5",
        color_format: ColorFormat::Rgb,
        chroma: ChromaSubsampling::Cs444,
        layout: LineLayout::Sweep,
        width: 640,
        height: 496,
        sync_pulse: 7.8125e-3,
        sync_porch: 1.5625e-3,
        channel_count: 3,
        channel_order: [0, 1, 2, 0],
        scan_times: [200e-3, 200e-3, 200e-3, 0.0],
        separator_pulses: [1.5625e-3, 1.5625e-3, 1.5625e-3, 0.0],
        line_time: 614.0625e-3,
        has_start_sync: false,
        sync_channel: 0,
        window_factor: 2.0,
    };

    /// N7CXI, 2000
    pub const P7: Self = Self {
        vis_code: VisCode(0x73),
        name: "Pasokon P7",
        short_name: "P7",
        color_format: ColorFormat::Rgb,
        chroma: ChromaSubsampling::Cs444,
        layout: LineLayout::Sweep,
        width: 640,
        height: 496,
        sync_pulse: 10.416667e-3,
        sync_porch: 2.083333e-3,
        channel_count: 3,
        channel_order: [0, 1, 2, 0],
        scan_times: [266.666667e-3, 266.666667e-3, 266.666667e-3, 0.0],
        separator_pulses: [2.083333e-3, 2.083333e-3, 2.083333e-3, 0.0],
        line_time: 818.75e-3,
        has_start_sync: false,
        sync_channel: 0,
        window_factor: 2.0,
    };

    /// N7CXI, 2000
    pub const PD50: Self = Self {
        vis_code: VisCode(0x5d),
        name: "PD-50",
        short_name: "PD50",
        color_format: ColorFormat::YCrCb,
        chroma: ChromaSubsampling::Cs420,
        layout: LineLayout::Pd,
        width: 320,
        height: 256,
        sync_pulse: 20e-3,
        sync_porch: 2.08e-3,
        channel_count: 4,
        channel_order: [0, 1, 2, 0],
        scan_times: [91.52e-3, 91.52e-3, 91.52e-3, 91.52e-3],
        separator_pulses: [0.0, 0.0, 0.0, 0.0],
        line_time: 388.16e-3,
        has_start_sync: false,
        sync_channel: 0,
        window_factor: 2.0,
    };

    /// N7CXI, 2000
    pub const PD90: Self = Self {
        vis_code: VisCode(0x63),
        name: "PD-90",
        short_name: "PD90",
        color_format: ColorFormat::YCrCb,
        chroma: ChromaSubsampling::Cs420,
        layout: LineLayout::Pd,
        width: 320,
        height: 256,
        sync_pulse: 20e-3,
        sync_porch: 2.08e-3,
        channel_count: 4,
        channel_order: [0, 1, 2, 0],
        scan_times: [170.24e-3, 170.24e-3, 170.24e-3, 170.24e-3],
        separator_pulses: [0.0, 0.0, 0.0, 0.0],
        line_time: 703.04e-3,
        has_start_sync: false,
        sync_channel: 0,
        window_factor: 2.0,
    };

    /// N7CXI, 2000
    pub const PD120: Self = Self {
        vis_code: VisCode(0x5f),
        name: "PD-120",
        short_name: "PD120",
        color_format: ColorFormat::YCrCb,
        chroma: ChromaSubsampling::Cs420,
        layout: LineLayout::Pd,
        width: 640,
        height: 496,
        sync_pulse: 20e-3,
        sync_porch: 2.08e-3,
        channel_count: 4,
        channel_order: [0, 1, 2, 0],
        scan_times: [121.6e-3, 121.6e-3, 121.6e-3, 121.6e-3],
        separator_pulses: [0.0, 0.0, 0.0, 0.0],
        line_time: 508.48e-3,
        has_start_sync: false,
        sync_channel: 0,
        window_factor: 2.0,
    };

    /// N7CXI, 2000
    pub const PD160: Self = Self {
        vis_code: VisCode(0x62),
        name: "PD-160",
        short_name: "PD160",
        color_format: ColorFormat::YCrCb,
        chroma: ChromaSubsampling::Cs420,
        layout: LineLayout::Pd,
        width: 512,
        height: 400,
        sync_pulse: 20e-3,
        sync_porch: 2.08e-3,
        channel_count: 4,
        channel_order: [0, 1, 2, 0],
        scan_times: [195.584e-3, 195.584e-3, 195.584e-3, 195.584e-3],
        separator_pulses: [0.0, 0.0, 0.0, 0.0],
        line_time: 804.416e-3,
        has_start_sync: false,
        sync_channel: 0,
        window_factor: 2.0,
    };

    /// N7CXI, 2000
    pub const PD180: Self = Self {
        vis_code: VisCode(0x60),
        name: "PD-180",
        short_name: "PD180",
        color_format: ColorFormat::YCrCb,
        chroma: ChromaSubsampling::Cs420,
        layout: LineLayout::Pd,
        width: 640,
        height: 496,
        sync_pulse: 20e-3,
        sync_porch: 2.08e-3,
        channel_count: 4,
        channel_order: [0, 1, 2, 0],
        scan_times: [183.04e-3, 183.04e-3, 183.04e-3, 183.04e-3],
        separator_pulses: [0.0, 0.0, 0.0, 0.0],
        line_time: 754.24e-3,
        has_start_sync: false,
        sync_channel: 0,
        window_factor: 2.0,
    };

    /// N7CXI, 2000
    pub const PD240: Self = Self {
        vis_code: VisCode(0x61),
        name: "PD-240",
        short_name: "PD240",
        color_format: ColorFormat::YCrCb,
        chroma: ChromaSubsampling::Cs420,
        layout: LineLayout::Pd,
        width: 640,
        height: 496,
        sync_pulse: 20e-3,
        sync_porch: 2.08e-3,
        channel_count: 4,
        channel_order: [0, 1, 2, 0],
        scan_times: [244.48e-3, 244.48e-3, 244.48e-3, 244.48e-3],
        separator_pulses: [0.0, 0.0, 0.0, 0.0],
        line_time: 1000e-3,
        has_start_sync: false,
        sync_channel: 0,
        window_factor: 2.0,
    };

    /// N7CXI, 2000
    pub const PD290: Self = Self {
        vis_code: VisCode(0x5e),
        name: "PD-290",
        short_name: "PD290",
        color_format: ColorFormat::YCrCb,
        chroma: ChromaSubsampling::Cs420,
        layout: LineLayout::Pd,
        width: 800,
        height: 616,
        sync_pulse: 20e-3,
        sync_porch: 2.08e-3,
        channel_count: 4,
        channel_order: [0, 1, 2, 0],
        scan_times: [228.8e-3, 228.8e-3, 228.8e-3, 228.8e-3],
        separator_pulses: [0.0, 0.0, 0.0, 0.0],
        line_time: 937.28e-3,
        has_start_sync: false,
        sync_channel: 0,
        window_factor: 2.0,
    };

    /// Offset in seconds of transmission channel `channel` from the line's
    /// sync edge. Negative for the Scottie channels that precede their sync
    /// pulse. `line` is reserved for modes with line-parity timing; none of
    /// the registered modes use it yet.
    pub fn channel_offset(&self, _line: usize, channel: usize) -> f32 {
        debug_assert!(channel < self.channel_count);
        match self.layout {
            LineLayout::Sweep => {
                let mut offset = self.sync_pulse + self.sync_porch;
                for k in 0..channel {
                    offset += self.scan_times[k] + self.separator_pulses[k];
                }
                offset
            }
            LineLayout::Scottie => {
                if channel >= self.sync_channel {
                    let mut offset = self.sync_pulse + self.sync_porch;
                    for k in self.sync_channel..channel {
                        offset += self.scan_times[k] + self.separator_pulses[k];
                    }
                    offset
                }
                else {
                    let mut offset = 0.0;
                    for k in channel..self.sync_channel {
                        offset -= self.scan_times[k];
                        if k > channel {
                            offset -= self.separator_pulses[k];
                        }
                    }
                    offset
                }
            }
            LineLayout::Robot => {
                let mut offset = self.sync_pulse + self.sync_porch;
                for k in 0..channel {
                    offset += self.scan_times[k];
                }
                for k in 1..=channel {
                    offset += self.separator_pulses[k];
                }
                offset
            }
            LineLayout::Pd => {
                let mut offset = self.sync_pulse + self.sync_porch;
                for k in 0..channel {
                    offset += self.scan_times[k];
                }
                offset
            }
        }
    }

    /// Scan duration in seconds of transmission channel `channel`.
    #[inline]
    pub fn scan_time(&self, _line: usize, channel: usize) -> f32 {
        debug_assert!(channel < self.channel_count);
        self.scan_times[channel]
    }

    /// Image lines covered by one sync pulse.
    #[inline]
    pub fn lines_per_sync(&self) -> usize {
        match self.layout {
            LineLayout::Pd => 2,
            _ => 1,
        }
    }

    /// Storage planes. PD transmits four channels but the two Y channels
    /// share one plane.
    #[inline]
    pub fn plane_count(&self) -> usize {
        match self.layout {
            LineLayout::Pd => 3,
            _ => self.channel_count,
        }
    }

    /// Width class this mode's line sync pulse falls into.
    #[inline]
    pub fn sync_width(&self) -> PulseWidth {
        PulseWidth::classify(self.sync_pulse).expect("mode sync pulse out of class range")
    }

    /// Offset in seconds from the start of image data to the anchor of the
    /// first line. Nonzero only for layouts whose first channels precede the
    /// first sync edge.
    pub fn first_anchor_offset(&self) -> f32 {
        match self.layout {
            LineLayout::Scottie => {
                let mut offset = self.sync_pulse;
                for k in 0..self.sync_channel {
                    offset += self.separator_pulses[k] + self.scan_times[k];
                }
                offset
            }
            _ => 0.0,
        }
    }

    /// Earliest channel offset relative to the anchor, in seconds.
    pub fn min_channel_offset(&self) -> f32 {
        (0..self.channel_count)
            .map(|c| self.channel_offset(0, c))
            .fold(0.0f32, f32::min)
    }

    /// Latest sample of line data relative to the anchor, in seconds.
    pub fn channel_extent(&self) -> f32 {
        (0..self.channel_count)
            .map(|c| self.channel_offset(0, c) + self.scan_time(0, c))
            .fold(0.0f32, f32::max)
    }

    /// Sync + porch + scans + separators, for checking against `line_time`.
    pub fn component_sum(&self) -> f32 {
        let mut sum = self.sync_pulse + self.sync_porch;
        for c in 0..self.channel_count {
            sum += self.scan_times[c] + self.separator_pulses[c];
        }
        sum
    }
}

static MODES: &[Mode] = &[
    Mode::M1,
    Mode::M2,
    Mode::S1,
    Mode::S2,
    Mode::SDX,
    Mode::R36,
    Mode::R72,
    Mode::R24BW,
    Mode::W2180,
    Mode::P3,
    Mode::P5,
    Mode::P7,
    Mode::PD50,
    Mode::PD90,
    Mode::PD120,
    Mode::PD160,
    Mode::PD180,
    Mode::PD240,
    Mode::PD290,
];

/// All registered modes.
#[inline]
pub fn all() -> &'static [Mode] {
    MODES
}

/// Look a mode up by its VIS code.
pub fn by_vis(vis_code: VisCode) -> Option<&'static Mode> {
    static MAP: OnceLock<HashMap<VisCode, &'static Mode>> = OnceLock::new();
    let map = MAP.get_or_init(|| MODES.iter().map(|mode| (mode.vis_code, mode)).collect());
    map.get(&vis_code).copied()
}

/// Modes whose line sync falls into the given width class.
pub fn by_sync_width(width: PulseWidth) -> impl Iterator<Item = &'static Mode> {
    MODES.iter().filter(move |mode| mode.sync_width() == width)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correct_vis_codes() {
        assert_eq!(Mode::R36.vis_code, VisCode(0x08));
        assert_eq!(Mode::R24BW.vis_code, VisCode(0x0a));
        assert_eq!(Mode::R72.vis_code, VisCode(0x0c));
        assert_eq!(Mode::M2.vis_code, VisCode(0x28));
        assert_eq!(Mode::M1.vis_code, VisCode(0x2c));
        assert_eq!(Mode::W2180.vis_code, VisCode(0x37));
        assert_eq!(Mode::S2.vis_code, VisCode(0x38));
        assert_eq!(Mode::S1.vis_code, VisCode(0x3c));
        assert_eq!(Mode::SDX.vis_code, VisCode(0x4c));
        assert_eq!(Mode::PD50.vis_code, VisCode(0x5d));
        assert_eq!(Mode::PD290.vis_code, VisCode(0x5e));
        assert_eq!(Mode::PD120.vis_code, VisCode(0x5f));
        assert_eq!(Mode::PD180.vis_code, VisCode(0x60));
        assert_eq!(Mode::PD240.vis_code, VisCode(0x61));
        assert_eq!(Mode::PD160.vis_code, VisCode(0x62));
        assert_eq!(Mode::PD90.vis_code, VisCode(0x63));
        assert_eq!(Mode::P3.vis_code, VisCode(0x71));
        assert_eq!(Mode::P5.vis_code, VisCode(0x72));
        assert_eq!(Mode::P7.vis_code, VisCode(0x73));
    }

    #[test]
    fn vis_parity_is_even_parity_over_data_bits() {
        // 0x2c has three set bits, 0x3c has four
        assert!(VisCode(0x2c).parity());
        assert!(!VisCode(0x3c).parity());
        assert!(!VisCode(0x00).parity());
    }

    #[test]
    fn line_time_matches_component_sum_within_one_sample() {
        let sample_rate = 48000.0;
        for mode in all() {
            let difference = (mode.line_time - mode.component_sum()).abs() * sample_rate;
            assert!(
                difference <= 1.0,
                "{}: line time off by {difference} samples",
                mode.name
            );
        }
    }

    #[test]
    fn channel_order_is_a_permutation_of_planes() {
        for mode in all() {
            let planes = mode.plane_count();
            let mut seen = [false; 4];
            for c in 0..mode.channel_count {
                let plane = mode.channel_order[c];
                assert!(plane < planes, "{}: plane {plane}", mode.name);
                // PD maps both Y channels onto plane 0
                if mode.layout != LineLayout::Pd {
                    assert!(!seen[plane], "{}: duplicate plane {plane}", mode.name);
                }
                seen[plane] = true;
            }
            for (plane, seen) in seen.iter().enumerate().take(planes) {
                assert!(*seen, "{}: unused plane {plane}", mode.name);
            }
        }
    }

    #[test]
    fn sweep_offsets_are_increasing_and_inside_the_line() {
        for mode in all().iter().filter(|m| m.layout != LineLayout::Scottie) {
            let mut previous = 0.0;
            for c in 0..mode.channel_count {
                let offset = mode.channel_offset(0, c);
                assert!(offset > previous, "{} channel {c}", mode.name);
                previous = offset;
            }
            assert!(mode.channel_extent() <= mode.line_time + 1e-6, "{}", mode.name);
        }
    }

    #[test]
    fn scottie_trailing_channels_precede_the_sync_edge() {
        let mode = Mode::S1;
        // green ends one separator-plus-scan before blue, blue ends at the sync
        assert!((mode.channel_offset(0, 1) + 138.24e-3).abs() < 1e-6);
        assert!((mode.channel_offset(0, 0) + 2.0 * 138.24e-3 + 1.5e-3).abs() < 1e-6);
        // red follows the sync and porch
        assert!((mode.channel_offset(0, 2) - 10.5e-3).abs() < 1e-6);
        assert!(mode.min_channel_offset() < 0.0);
    }

    #[test]
    fn robot_chroma_sits_after_separator_and_porch() {
        let mode = Mode::R36;
        assert!((mode.channel_offset(0, 0) - 12e-3).abs() < 1e-6);
        assert!((mode.channel_offset(0, 1) - 106e-3).abs() < 1e-6);

        let mode = Mode::R72;
        assert!((mode.channel_offset(0, 1) - 156e-3).abs() < 1e-6);
        assert!((mode.channel_offset(0, 2) - 231e-3).abs() < 1e-6);
    }

    #[test]
    fn pd_channels_are_gapless() {
        let mode = Mode::PD90;
        for c in 1..4 {
            let gap = mode.channel_offset(0, c)
                - mode.channel_offset(0, c - 1)
                - mode.scan_time(0, c - 1);
            assert!(gap.abs() < 1e-6);
        }
        assert_eq!(mode.lines_per_sync(), 2);
        assert_eq!(mode.plane_count(), 3);
    }

    #[test]
    fn every_sync_width_class_is_populated() {
        assert!(by_sync_width(PulseWidth::FiveMs).count() >= 3);
        assert!(by_sync_width(PulseWidth::NineMs).count() >= 5);
        assert!(by_sync_width(PulseWidth::TwentyMs).count() == 7);
    }

    #[test]
    fn registry_lookup_round_trips() {
        for mode in all() {
            let found = by_vis(mode.vis_code).expect(mode.name);
            assert_eq!(found.name, mode.name);
        }
        assert!(by_vis(VisCode::new(0x30).unwrap()).is_none());
    }
}
