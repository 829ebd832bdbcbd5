//! Streaming controller and batch decoder.
//!
//! The controller owns the whole receive pipeline: it feeds chunks to the
//! demodulator, keeps a bounded window of raw samples and demodulated
//! frequencies, reacts to sync pulses and VIS candidates, and schedules line
//! decodes either on observed sync edges or, when pulses go missing, on pure
//! timing. Everything is synchronous; callers drain the event queue between
//! `process` calls.

use std::collections::VecDeque;

use crate::{
    demod::{
        Demodulator,
        PulseWidth,
        SyncPulse,
    },
    event::{
        DecoderEvent,
        DecoderState,
        DetectionMethod,
        LineEvent,
    },
    line,
    modes::{
        self,
        Mode,
        VisCode,
    },
    peak::SpectralPeak,
    raster::{
        slant_shift,
        ChannelBuffer,
        DecodedImage,
    },
    sync::SyncHistory,
    vis::{
        self,
        VisCandidate,
    },
};

/// How far an observed sync edge may sit from its predicted position and
/// still resynchronize the line anchor.
const RESYNC_TOLERANCE_TIME: f32 = 2e-3;

/// Extra audio required beyond a line's extent before it is decoded, so a
/// late-detected sync pulse can still correct the anchor first.
const DECODE_MARGIN_TIME: f32 = 0.03;

/// Per-line interval deviations beyond this are ignored by the drift
/// tracker.
const DRIFT_GATE_TIME: f32 = 1e-3;

const DRIFT_EMA_ALPHA: f64 = 0.1;

/// Below this many pixels of column drift per line, slant correction is not
/// worth applying.
const SLANT_MIN_PIXELS_PER_LINE: f32 = 0.1;

#[derive(Clone, Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("vis code {vis_code:?} not in the registry")]
    UnknownMode { vis_code: VisCode },
    #[error("audio ended after {lines_decoded} lines")]
    EarlyAudioExhaustion { lines_decoded: usize },
}

#[derive(Clone, Copy, Debug)]
pub struct DecoderConfig {
    pub sample_rate: f32,
    /// Bounded window of buffered audio, seconds.
    pub max_buffer_seconds: f32,
    pub fft_size: usize,
    /// Skip detection and decode as this mode from the start.
    pub force_mode: Option<VisCode>,
    /// Emit extrapolated preview lines even without any sync evidence.
    pub output_noise: bool,
    /// Let a fresh VIS header complete the current image and start a new
    /// one.
    pub allow_vis_interrupt: bool,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000.0,
            max_buffer_seconds: 10.0,
            fft_size: 4096,
            force_mode: None,
            output_noise: false,
            allow_vis_interrupt: true,
        }
    }
}

/// Bounded window over the raw sample stream and its demodulated frequency
/// stream, addressed by monotonic logical sample indices.
///
/// When the window overflows, the oldest half of the capacity is dropped and
/// the window start advances; indices held elsewhere never need adjusting,
/// they simply fall off the left edge.
#[derive(Clone, Debug)]
pub struct SampleRing {
    raw: Vec<f32>,
    frequency: Vec<f32>,
    start: u64,
    capacity: usize,
}

impl SampleRing {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0);
        Self {
            raw: Vec::new(),
            frequency: Vec::new(),
            start: 0,
            capacity,
        }
    }

    /// Logical index of the oldest buffered sample.
    #[inline]
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Logical index one past the newest buffered sample.
    #[inline]
    pub fn end(&self) -> u64 {
        self.start + self.raw.len() as u64
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    pub fn extend(&mut self, raw: &[f32], frequency: &[f32]) {
        debug_assert_eq!(raw.len(), frequency.len());
        self.raw.extend_from_slice(raw);
        self.frequency.extend_from_slice(frequency);

        if self.raw.len() > self.capacity {
            let excess = self.raw.len() - self.capacity / 2;
            self.raw.drain(..excess);
            self.frequency.drain(..excess);
            self.start += excess as u64;
            tracing::debug!(dropped = excess, start = self.start, "ring buffer shifted");
        }
    }

    /// Raw samples `[start, start + len)` if fully buffered.
    pub fn raw_slice(&self, start: i64, len: usize) -> Option<&[f32]> {
        self.slice(&self.raw, start, len)
    }

    /// Demodulated normalized frequencies for the same index range.
    pub fn frequency_slice(&self, start: i64, len: usize) -> Option<&[f32]> {
        self.slice(&self.frequency, start, len)
    }

    fn slice<'a>(&self, data: &'a [f32], start: i64, len: usize) -> Option<&'a [f32]> {
        if start < self.start as i64 {
            return None;
        }
        let offset = (start as u64 - self.start) as usize;
        data.get(offset..offset + len)
    }

    pub fn clear(&mut self) {
        self.raw.clear();
        self.frequency.clear();
        self.start = 0;
    }
}

pub struct StreamingDecoder {
    config: DecoderConfig,
    sample_rate: f32,
    demod: Demodulator,
    peak: SpectralPeak,
    ring: SampleRing,
    history: SyncHistory,
    candidates: Vec<VisCandidate>,
    events: VecDeque<DecoderEvent>,
    state: DecoderState,
    mode: Option<Mode>,
    method: Option<DetectionMethod>,
    buffer: Option<ChannelBuffer>,
    /// Predicted sync edge of the next undecoded line, logical samples.
    anchor: Option<f64>,
    /// Nominal samples per sync interval for the latched mode.
    expected_interval: f64,
    /// Expected interval corrected by the drift estimate.
    current_interval: f64,
    /// EMA of the per-interval deviation from nominal, samples.
    drift_per_line: f64,
    /// Mid-pulse deviation of the most recent accepted sync, normalized.
    last_freq_offset: f32,
    /// True once sync or VIS evidence backs the latched mode.
    locked: bool,
    /// Blocks decoding after image completion until a fresh VIS.
    image_completed: bool,
    /// Backfill lines buffered before the first recognized sync. Streaming
    /// only; batch decoding starts at the first VIS.
    extrapolate_backward: bool,
    freq_scratch: Vec<f32>,
    pulse_scratch: Vec<SyncPulse>,
}

impl StreamingDecoder {
    pub fn new(config: DecoderConfig) -> Result<Self, DecodeError> {
        let forced = config
            .force_mode
            .map(|vis_code| {
                modes::by_vis(vis_code)
                    .copied()
                    .ok_or(DecodeError::UnknownMode { vis_code })
            })
            .transpose()?;

        let capacity = (config.max_buffer_seconds * config.sample_rate) as usize;
        let mut decoder = Self {
            config,
            sample_rate: config.sample_rate,
            demod: Demodulator::new(config.sample_rate),
            peak: SpectralPeak::new(config.fft_size, config.sample_rate),
            ring: SampleRing::new(capacity),
            history: SyncHistory::new(),
            candidates: Vec::new(),
            events: VecDeque::new(),
            state: DecoderState::Searching,
            mode: None,
            method: None,
            buffer: None,
            anchor: None,
            expected_interval: 0.0,
            current_interval: 0.0,
            drift_per_line: 0.0,
            last_freq_offset: 0.0,
            locked: false,
            image_completed: false,
            extrapolate_backward: true,
            freq_scratch: Vec::new(),
            pulse_scratch: Vec::new(),
        };

        if let Some(mode) = forced {
            decoder.install_mode(mode);
        }

        Ok(decoder)
    }

    #[inline]
    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    #[inline]
    pub fn state(&self) -> DecoderState {
        self.state
    }

    #[inline]
    pub fn mode(&self) -> Option<&Mode> {
        self.mode.as_ref()
    }

    #[inline]
    pub fn lines_decoded(&self) -> usize {
        self.buffer.as_ref().map_or(0, ChannelBuffer::lines_decoded)
    }

    /// Current drift estimate in samples per sync interval.
    #[inline]
    pub fn drift_per_line(&self) -> f64 {
        self.drift_per_line
    }

    /// Normalized frequency deviation of the last accepted sync pulse; a
    /// tuning indicator for the caller.
    #[inline]
    pub fn frequency_offset(&self) -> f32 {
        self.last_freq_offset
    }

    /// Pop the oldest queued event.
    pub fn next_event(&mut self) -> Option<DecoderEvent> {
        self.events.pop_front()
    }

    /// Drain every queued event.
    pub fn take_events(&mut self) -> Vec<DecoderEvent> {
        self.events.drain(..).collect()
    }

    /// Snapshot of the image decoded so far, without slant correction.
    pub fn partial_image(&self) -> Option<DecodedImage> {
        self.buffer.as_ref().map(ChannelBuffer::to_decoded_image)
    }

    /// Feed one chunk of audio. Returns `false` once cancelled.
    pub fn process(&mut self, samples: &[f32]) -> bool {
        if self.state == DecoderState::Cancelled {
            return false;
        }

        self.freq_scratch.clear();
        self.pulse_scratch.clear();
        self.demod
            .process(samples, &mut self.freq_scratch, &mut self.pulse_scratch);
        self.ring.extend(samples, &self.freq_scratch);

        // entries that predate the window are gone for good
        self.history.prune(self.ring.start());
        let leader_margin = (0.06 * self.sample_rate) as u64;
        let ring_start = self.ring.start();
        self.candidates
            .retain(|c| c.break_index >= ring_start + leader_margin);

        let pulses = std::mem::take(&mut self.pulse_scratch);
        for pulse in &pulses {
            self.handle_sync(pulse);
        }
        self.pulse_scratch = pulses;

        self.evaluate_candidates();
        self.pump_lines(false);
        self.update_state();
        true
    }

    /// Decode whatever remains in the buffer (accepting a partial final
    /// line) and emit the image, if any.
    pub fn flush(&mut self) -> Option<DecodedImage> {
        if self.state == DecoderState::Cancelled || self.image_completed {
            return None;
        }

        self.pump_lines(true);

        if let (Some(mode), Some(buffer)) = (&self.mode, &self.buffer) {
            let lines_decoded = buffer.lines_decoded();
            if lines_decoded > 0 && lines_decoded < mode.height {
                self.events
                    .push_back(DecoderEvent::Error(DecodeError::EarlyAudioExhaustion {
                        lines_decoded,
                    }));
            }
        }

        let image = self.finish_image();
        self.update_state();
        image
    }

    /// Stop decoding. The controller is inert until `reset`.
    pub fn cancel(&mut self) {
        if self.state != DecoderState::Cancelled {
            self.state = DecoderState::Cancelled;
            self.events
                .push_back(DecoderEvent::StateChange(DecoderState::Cancelled));
        }
    }

    /// Back to the state of a freshly constructed instance (a forced mode is
    /// re-applied).
    pub fn reset(&mut self) {
        self.demod.reset();
        self.ring.clear();
        self.history.clear();
        self.candidates.clear();
        self.events.clear();
        self.state = DecoderState::Searching;
        self.mode = None;
        self.method = None;
        self.buffer = None;
        self.anchor = None;
        self.expected_interval = 0.0;
        self.current_interval = 0.0;
        self.drift_per_line = 0.0;
        self.last_freq_offset = 0.0;
        self.locked = false;
        self.image_completed = false;

        if let Some(vis_code) = self.config.force_mode {
            let mode = *modes::by_vis(vis_code).expect("validated at construction");
            self.install_mode(mode);
        }

        self.events.push_back(DecoderEvent::Reset);
    }

    /// Install a mode without claiming any signal evidence for it.
    fn install_mode(&mut self, mode: Mode) {
        self.buffer = Some(ChannelBuffer::new(mode));
        self.expected_interval = mode.line_time as f64 * self.sample_rate as f64;
        self.current_interval = self.expected_interval;
        self.drift_per_line = 0.0;
        self.anchor = None;
        self.image_completed = false;
        self.mode = Some(mode);
    }

    fn latch_mode(&mut self, mode: Mode, method: DetectionMethod) {
        tracing::debug!(mode = %mode.name, ?method, "mode latched");
        self.install_mode(mode);
        self.method = Some(method);
        self.locked = true;
        self.events.push_back(DecoderEvent::ModeDetected {
            mode,
            vis_code: mode.vis_code,
            method,
        });
    }

    fn handle_sync(&mut self, pulse: &SyncPulse) {
        self.history.record(pulse);
        self.last_freq_offset = pulse.frequency_offset;

        // a 9 or 20 ms pulse may be the leader break of a header
        if matches!(pulse.width, PulseWidth::NineMs | PulseWidth::TwentyMs) {
            self.candidates.push(VisCandidate {
                break_index: pulse.index,
                frequency_offset: pulse.frequency_offset,
            });
        }

        match self.mode {
            None => {
                if let Some((mode, mean)) = self.history.infer_mode(pulse.width, self.sample_rate)
                {
                    let mode = *mode;
                    tracing::debug!(mode = %mode.name, mean, "sync timing matched");
                    self.latch_mode(mode, DetectionMethod::Timing);
                    if let Some(earliest) = self.history.of(pulse.width).earliest() {
                        self.anchor = Some(self.extrapolated_anchor(&mode, earliest as f64));
                    }
                }
            }
            Some(mode) => {
                if pulse.width != mode.sync_width() {
                    return;
                }
                match self.anchor {
                    None => {
                        self.anchor = Some(self.extrapolated_anchor(&mode, pulse.index as f64));
                        self.locked = true;
                    }
                    Some(anchor) => {
                        let delta = pulse.index as f64 - anchor;
                        let intervals = (delta / self.current_interval).round();
                        let error = delta - intervals * self.current_interval;
                        if error.abs() <= (RESYNC_TOLERANCE_TIME * self.sample_rate) as f64 {
                            if intervals >= 0.0 {
                                self.anchor = Some(anchor + error);
                            }
                            self.locked = true;
                            self.update_drift(pulse.width);
                        }
                    }
                }
            }
        }
    }

    /// Walk the anchor backward one interval at a time while the buffered
    /// audio still covers a full line there.
    fn extrapolated_anchor(&self, mode: &Mode, anchor: f64) -> f64 {
        if !self.extrapolate_backward {
            return anchor;
        }
        let min_offset =
            (mode.min_channel_offset() as f64 * self.sample_rate as f64).floor();
        let floor = self.ring.start() as f64 - min_offset;
        let mut anchor = anchor;
        while anchor - self.current_interval >= floor {
            anchor -= self.current_interval;
        }
        anchor
    }

    fn update_drift(&mut self, width: PulseWidth) {
        let Some(interval) = self.history.of(width).latest_interval()
        else {
            return;
        };
        let intervals = (interval / self.expected_interval).round();
        if intervals < 1.0 {
            return;
        }
        let deviation = interval / intervals - self.expected_interval;
        if deviation.abs() > (DRIFT_GATE_TIME * self.sample_rate) as f64 {
            return;
        }
        self.drift_per_line += DRIFT_EMA_ALPHA * (deviation - self.drift_per_line);
        self.current_interval = self.expected_interval + self.drift_per_line;
    }

    fn evaluate_candidates(&mut self) {
        let span = vis::required_span(self.sample_rate);
        let mut i = 0;
        while i < self.candidates.len() {
            if self.ring.end() < self.candidates[i].break_index + span {
                i += 1;
                continue;
            }
            let candidate = self.candidates.remove(i);
            match vis::evaluate(&candidate, &self.ring, &mut self.peak, self.sample_rate) {
                Ok(mode) => {
                    let mode = *mode;
                    self.handle_vis(mode, &candidate);
                }
                Err(error) => {
                    tracing::debug!(%error, break_index = candidate.break_index, "vis candidate dropped");
                }
            }
        }
    }

    fn handle_vis(&mut self, new_mode: Mode, candidate: &VisCandidate) {
        if let Some(current) = self.mode {
            let lines_decoded = self.lines_decoded();

            match self.method {
                // a forced mode is never overridden
                None => return,
                Some(DetectionMethod::Timing) => {
                    let early = lines_decoded < current.height / 10;
                    let same_class = new_mode.sync_width() == current.sync_width();
                    if !(early || same_class) {
                        tracing::debug!(
                            current = %current.name,
                            new = %new_mode.name,
                            "vis ignored: timing lock too far along"
                        );
                        return;
                    }
                }
                Some(DetectionMethod::Vis) => {
                    if !self.config.allow_vis_interrupt
                        && lines_decoded > 0
                        && !self.image_completed
                    {
                        tracing::debug!(new = %new_mode.name, "vis interrupt disabled");
                        return;
                    }
                }
            }

            if lines_decoded > 0 && !self.image_completed {
                self.finish_image();
            }
            self.events.push_back(DecoderEvent::Reset);
            self.history.clear();
        }

        self.latch_mode(new_mode, DetectionMethod::Vis);
        let image_start = vis::image_start(candidate.break_index, self.sample_rate);
        self.anchor = Some(
            image_start as f64
                + new_mode.first_anchor_offset() as f64 * self.sample_rate as f64,
        );
        let break_index = candidate.break_index;
        self.candidates.retain(|c| c.break_index > break_index);
    }

    fn pump_lines(&mut self, flushing: bool) {
        let Some(mode) = self.mode else {
            return;
        };
        if self.image_completed || self.buffer.is_none() {
            return;
        }

        let rate = self.sample_rate as f64;
        let extent = (mode.channel_extent() as f64 * rate).ceil();
        let min_offset = (mode.min_channel_offset() as f64 * rate).floor();
        let margin = if flushing {
            0.0
        }
        else {
            DECODE_MARGIN_TIME as f64 * rate
        };

        if self.anchor.is_none() {
            // noise preview: nothing recognized, extrapolate from the window
            // start anyway
            if !self.config.output_noise {
                return;
            }
            self.anchor = Some(self.ring.start() as f64 - min_offset);
        }

        let mut complete = false;
        loop {
            let buffer = self.buffer.as_mut().expect("checked above");
            if buffer.lines_decoded() + mode.lines_per_sync() > buffer.capacity_lines() {
                tracing::warn!("line capacity exhausted, completing image");
                complete = true;
                break;
            }

            let anchor = self.anchor.expect("set above");
            if anchor + extent < self.ring.start() as f64 {
                // the window moved past this line entirely
                tracing::warn!(anchor, "line lost to a buffer shift");
                self.anchor = Some(anchor + self.current_interval);
                continue;
            }

            let enough = if flushing {
                self.ring.end() as f64 >= anchor + self.current_interval / 2.0
            }
            else {
                self.ring.end() as f64 >= anchor + extent + margin
            };
            if !enough {
                break;
            }

            let line_index = buffer.lines_decoded();
            let decoded = line::decode_line(
                &mode,
                line_index,
                anchor.max(0.0).round() as u64,
                &self.ring,
                &mut self.peak,
                buffer,
                self.sample_rate,
            );
            if decoded == 0 {
                break;
            }

            for _ in 0..decoded {
                let line = buffer.lines_decoded();
                buffer.advance_line();
                let mut rgb = vec![0; mode.width * 3];
                buffer.line_to_rgb(line, &mut rgb);
                self.events.push_back(DecoderEvent::Line(LineEvent {
                    line,
                    rgb,
                    width: mode.width,
                    height: mode.height,
                    mode_name: mode.name,
                    lines_decoded: line + 1,
                    is_noise: !self.locked,
                }));
            }

            self.anchor = Some(anchor + self.current_interval);
        }

        if complete {
            self.finish_image();
        }
    }

    /// Emit the current image (slant-corrected) and block further decoding
    /// until a fresh VIS.
    fn finish_image(&mut self) -> Option<DecodedImage> {
        let mode = self.mode?;
        let buffer = self.buffer.as_ref()?;
        if buffer.lines_decoded() == 0 {
            return None;
        }

        let mut image = buffer.to_decoded_image();
        if self.expected_interval > 0.0 {
            let pixels_per_line =
                (self.drift_per_line / self.expected_interval * mode.width as f64) as f32;
            if pixels_per_line.abs() >= SLANT_MIN_PIXELS_PER_LINE {
                tracing::debug!(pixels_per_line, "applying slant correction");
                slant_shift(&mut image.rgb, mode.width, mode.height, pixels_per_line);
            }
        }

        self.events
            .push_back(DecoderEvent::ImageComplete(image.clone()));
        self.image_completed = true;
        Some(image)
    }

    fn update_state(&mut self) {
        if self.state == DecoderState::Cancelled {
            return;
        }
        let next = if self.mode.is_some() {
            DecoderState::DecodingImage
        }
        else if !self.candidates.is_empty() {
            DecoderState::DecodingVis
        }
        else {
            DecoderState::Searching
        };
        if next != self.state {
            self.state = next;
            self.events.push_back(DecoderEvent::StateChange(next));
        }
        if next == DecoderState::Searching {
            self.events.push_back(DecoderEvent::Searching {
                buffer_seconds: self.ring.len() as f32 / self.sample_rate,
            });
        }
    }
}

impl std::fmt::Debug for StreamingDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingDecoder")
            .field("state", &self.state)
            .field("mode", &self.mode.map(|m| m.name))
            .field("lines_decoded", &self.lines_decoded())
            .finish_non_exhaustive()
    }
}

/// One-shot decoder over a complete sample buffer.
///
/// The same engine as [`StreamingDecoder`], fed once and flushed. Returns
/// the first completed image; `None` means no transmission was recognized.
#[derive(Debug)]
pub struct BatchDecoder {
    samples: Vec<f32>,
    decoder: StreamingDecoder,
}

impl BatchDecoder {
    pub fn new(samples: Vec<f32>, sample_rate: f32) -> Result<Self, DecodeError> {
        Self::with_config(
            samples,
            DecoderConfig {
                sample_rate,
                ..Default::default()
            },
        )
    }

    pub fn with_config(samples: Vec<f32>, config: DecoderConfig) -> Result<Self, DecodeError> {
        let mut decoder = StreamingDecoder::new(config)?;
        decoder.extrapolate_backward = false;
        Ok(Self { samples, decoder })
    }

    pub fn decode(&mut self) -> Option<DecodedImage> {
        self.decode_with(|_| {})
    }

    /// Decode, forwarding every event to `on_event` as it is produced.
    pub fn decode_with(
        &mut self,
        mut on_event: impl FnMut(&DecoderEvent),
    ) -> Option<DecodedImage> {
        let mut first = None;

        for chunk in self.samples.chunks(8192) {
            if !self.decoder.process(chunk) {
                break;
            }
            while let Some(event) = self.decoder.next_event() {
                on_event(&event);
                if let DecoderEvent::ImageComplete(image) = event {
                    first.get_or_insert(image);
                }
            }
        }

        let flushed = self.decoder.flush();
        while let Some(event) = self.decoder.next_event() {
            on_event(&event);
        }
        first.or(flushed)
    }
}
