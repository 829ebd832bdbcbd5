//! Sync-pulse history and timing-based mode inference.
//!
//! Three independent rings, one per pulse width class, each remembering the
//! last few sync positions and their frequency offsets. When the recent
//! inter-pulse intervals are stable, their mean is matched against the line
//! times of the modes in the same width class.

use std::collections::VecDeque;

use crate::{
    demod::{
        PulseWidth,
        SyncPulse,
    },
    modes::{
        self,
        Mode,
    },
};

/// Sync positions remembered per width class.
pub const HISTORY_DEPTH: usize = 5;

/// Interval jitter gate and mode-match tolerance, seconds.
const INTERVAL_TOLERANCE: f32 = 1e-3;

#[derive(Clone, Debug, Default)]
pub struct WidthHistory {
    indices: VecDeque<u64>,
    offsets: VecDeque<f32>,
}

impl WidthHistory {
    fn push(&mut self, index: u64, offset: f32) {
        if self.indices.len() == HISTORY_DEPTH {
            self.indices.pop_front();
            self.offsets.pop_front();
        }
        self.indices.push_back(index);
        self.offsets.push_back(offset);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    #[inline]
    pub fn latest(&self) -> Option<u64> {
        self.indices.back().copied()
    }

    #[inline]
    pub fn earliest(&self) -> Option<u64> {
        self.indices.front().copied()
    }

    #[inline]
    pub fn latest_offset(&self) -> Option<f32> {
        self.offsets.back().copied()
    }

    /// Most recent inter-pulse interval in samples.
    pub fn latest_interval(&self) -> Option<f64> {
        let n = self.indices.len();
        if n < 2 {
            None
        }
        else {
            Some((self.indices[n - 1] - self.indices[n - 2]) as f64)
        }
    }

    fn intervals(&self) -> impl Iterator<Item = f64> + '_ {
        self.indices
            .iter()
            .zip(self.indices.iter().skip(1))
            .map(|(a, b)| (b - a) as f64)
    }

    /// Mean and standard deviation of the recorded intervals, in samples.
    pub fn interval_stats(&self) -> Option<(f64, f64)> {
        let count = self.indices.len().checked_sub(1)?;
        if count == 0 {
            return None;
        }
        let mean = self.intervals().sum::<f64>() / count as f64;
        let variance =
            self.intervals().map(|i| (i - mean) * (i - mean)).sum::<f64>() / count as f64;
        Some((mean, variance.sqrt()))
    }

    /// Drop entries that predate `min_index` (the ring buffer moved on).
    pub fn prune(&mut self, min_index: u64) {
        while let Some(&front) = self.indices.front() {
            if front >= min_index {
                break;
            }
            self.indices.pop_front();
            self.offsets.pop_front();
        }
    }

    pub fn clear(&mut self) {
        self.indices.clear();
        self.offsets.clear();
    }
}

#[derive(Clone, Debug, Default)]
pub struct SyncHistory {
    five: WidthHistory,
    nine: WidthHistory,
    twenty: WidthHistory,
}

impl SyncHistory {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn of(&self, width: PulseWidth) -> &WidthHistory {
        match width {
            PulseWidth::FiveMs => &self.five,
            PulseWidth::NineMs => &self.nine,
            PulseWidth::TwentyMs => &self.twenty,
        }
    }

    fn of_mut(&mut self, width: PulseWidth) -> &mut WidthHistory {
        match width {
            PulseWidth::FiveMs => &mut self.five,
            PulseWidth::NineMs => &mut self.nine,
            PulseWidth::TwentyMs => &mut self.twenty,
        }
    }

    pub fn record(&mut self, pulse: &SyncPulse) {
        self.of_mut(pulse.width)
            .push(pulse.index, pulse.frequency_offset);
    }

    pub fn prune(&mut self, min_index: u64) {
        self.five.prune(min_index);
        self.nine.prune(min_index);
        self.twenty.prune(min_index);
    }

    pub fn clear(&mut self) {
        self.five.clear();
        self.nine.clear();
        self.twenty.clear();
    }

    /// Infer the mode from the interval statistics of one width class.
    ///
    /// Returns the registered mode whose line time is closest to the mean
    /// interval, provided the intervals are stable (standard deviation under
    /// a millisecond) and the best match is within a millisecond.
    pub fn infer_mode(
        &self,
        width: PulseWidth,
        sample_rate: f32,
    ) -> Option<(&'static Mode, f64)> {
        // a lone interval has no meaningful deviation
        if self.of(width).len() < 3 {
            return None;
        }
        let (mean, deviation) = self.of(width).interval_stats()?;
        let tolerance = (INTERVAL_TOLERANCE * sample_rate) as f64;
        if deviation > tolerance {
            tracing::debug!(mean, deviation, "sync intervals too jittery");
            return None;
        }

        let mut best: Option<(&'static Mode, f64)> = None;
        for mode in modes::by_sync_width(width) {
            let distance = (mean - mode.line_time as f64 * sample_rate as f64).abs();
            if distance <= tolerance && best.map_or(true, |(_, d)| distance < d) {
                best = Some((mode, distance));
            }
        }

        best.map(|(mode, _)| (mode, mean))
    }
}
