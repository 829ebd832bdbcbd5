//! Decoder-side event surface.
//!
//! The controller publishes a closed set of tagged events through an
//! internal queue; callers drain the queue between `process` calls. Within
//! one `process` call events are queued in causal order: mode detection
//! precedes the first line, lines carry increasing indices, image completion
//! follows the last line of its image.

use crate::{
    decoder::DecodeError,
    modes::{
        Mode,
        VisCode,
    },
    raster::DecodedImage,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecoderState {
    /// No transmission recognized yet; accumulating audio.
    Searching,
    /// At least one VIS candidate is queued and awaiting evaluation.
    DecodingVis,
    /// A mode is latched and lines are being decoded.
    DecodingImage,
    /// Terminal until `reset`.
    Cancelled,
}

/// How the current mode was latched.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DetectionMethod {
    Vis,
    Timing,
}

#[derive(Clone, Debug)]
pub struct LineEvent {
    pub line: usize,
    /// Packed RGB for this line, `width * 3` bytes.
    pub rgb: Vec<u8>,
    pub width: usize,
    pub height: usize,
    pub mode_name: &'static str,
    pub lines_decoded: usize,
    /// Set when the line was extrapolated without any sync or VIS evidence
    /// backing the latched mode.
    pub is_noise: bool,
}

#[derive(Clone, Debug)]
pub enum DecoderEvent {
    Searching {
        buffer_seconds: f32,
    },
    ModeDetected {
        mode: Mode,
        vis_code: VisCode,
        method: DetectionMethod,
    },
    Line(LineEvent),
    ImageComplete(DecodedImage),
    Reset,
    StateChange(DecoderState),
    Error(DecodeError),
}
