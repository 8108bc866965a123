//! Dark-offset compensation.

use crate::{AS7331Error, RawSample, Result};

/// Fewest valid samples a dark offset may be averaged from.
pub const MIN_DARK_SAMPLES: u8 = 3;

/// How the dark offset is acquired.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DarkCalibrationConfig {
    /// Valid samples to average.
    pub samples: u8,
    /// Upper bound on status polls, ready or not.
    pub max_attempts: u8,
    /// Shortest wait between two attempts, stretched to the conversion period.
    pub poll_interval_ms: u32,
}

impl Default for DarkCalibrationConfig {
    fn default() -> Self {
        Self {
            samples: 8,
            max_attempts: 16,
            poll_interval_ms: 10,
        }
    }
}

impl DarkCalibrationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.samples < MIN_DARK_SAMPLES || self.max_attempts < self.samples {
            return Err(AS7331Error::InvalidSampleCount);
        }

        Ok(())
    }
}

/// Per-channel baseline counts and whether they may be applied.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum DarkOffset {
    /// Never measured in this enable cycle.
    #[default]
    Uncalibrated,
    /// Measured with the current gain/time.
    Valid(RawSample),
    /// Measured with a gain/time that is no longer active.
    Stale(RawSample),
}

impl DarkOffset {
    /// The offset to subtract, only if it is valid.
    pub fn valid(&self) -> Option<RawSample> {
        match self {
            DarkOffset::Valid(offset) => Some(*offset),
            _ => None,
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, DarkOffset::Valid(_))
    }

    /// Marks a valid offset stale after the gain or time changed.
    pub fn invalidate(&mut self) {
        if let DarkOffset::Valid(offset) = *self {
            *self = DarkOffset::Stale(offset);
        }
    }

    /// Removes the offset from `raw` if it is valid, passes `raw` through
    /// otherwise.
    pub fn correct(&self, raw: RawSample) -> RawSample {
        match self.valid() {
            Some(offset) => apply_offset(raw, offset),
            None => raw,
        }
    }
}

/// Subtracts the offset per channel, saturating at zero.
pub fn apply_offset(raw: RawSample, offset: RawSample) -> RawSample {
    RawSample {
        a: raw.a.saturating_sub(offset.a),
        b: raw.b.saturating_sub(offset.b),
        c: raw.c.saturating_sub(offset.c),
    }
}

/// Running sums of the samples taken during a calibration.
#[derive(Copy, Clone, Debug, Default)]
pub(crate) struct DarkAccumulator {
    sums: [u32; 3],
    count: u32,
}

impl DarkAccumulator {
    pub(crate) fn push(&mut self, sample: RawSample) {
        self.sums[0] += u32::from(sample.a);
        self.sums[1] += u32::from(sample.b);
        self.sums[2] += u32::from(sample.c);
        self.count += 1;
    }

    pub(crate) fn count(&self) -> u32 {
        self.count
    }

    /// Truncated per-channel mean, `InsufficientSamples` below the minimum.
    pub(crate) fn mean(&self) -> Result<RawSample> {
        if self.count < u32::from(MIN_DARK_SAMPLES) {
            return Err(AS7331Error::InsufficientSamples);
        }

        // The mean of u16 values always fits a u16
        Ok(RawSample {
            a: (self.sums[0] / self.count) as u16,
            b: (self.sums[1] / self.count) as u16,
            c: (self.sums[2] / self.count) as u16,
        })
    }
}
