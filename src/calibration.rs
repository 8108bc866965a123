//! Conversion of counts into irradiance and the UV index.

use crate::config::{Gain, IntegrationTime, Setting};
use crate::{AS7331Error, Result};

/// Table units (µW/cm² per count) to W/m².
pub const UNIT_CONVERSION: f32 = 0.01;

/// Erythemal weight of channel A.
pub const UVA_WEIGHT: f32 = 0.0025;
/// Erythemal weight of channel B.
pub const UVB_WEIGHT: f32 = 0.0100;
/// Erythemal irradiance in W/m² that makes up one UV index unit.
pub const UV_INDEX_NORMALIZATION: f32 = 0.025;

const GAINS: usize = Gain::MAX_CODE as usize + 1;
const TIMES: usize = IntegrationTime::MAX_CODE as usize + 1;

/// Scale factors of one channel, `[gain code][time code]`.
pub type ChannelTable = [[f32; TIMES]; GAINS];

/// The three channels of the sensor.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Channel {
    A = 0,
    B = 1,
    C = 2,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::A, Channel::B, Channel::C];
}

#[rustfmt::skip]
const LSB_A: ChannelTable = [
    [47.104, 23.552, 11.776, 5.888, 2.944, 1.472, 0.736, 0.368],
    [23.552, 11.776, 5.888, 2.944, 1.472, 0.736, 0.368, 0.184],
    [11.776, 5.888, 2.944, 1.472, 0.736, 0.368, 0.184, 0.092],
    [5.888, 2.944, 1.472, 0.736, 0.368, 0.184, 0.092, 0.046],
    [2.944, 1.472, 0.736, 0.368, 0.184, 0.092, 0.046, 0.023],
    [1.472, 0.736, 0.368, 0.184, 0.092, 0.046, 0.023, 0.0115],
    [0.736, 0.368, 0.184, 0.092, 0.046, 0.023, 0.0115, 0.00575],
    [0.368, 0.184, 0.092, 0.046, 0.023, 0.0115, 0.00575, 0.002875],
    [0.184, 0.092, 0.046, 0.023, 0.0115, 0.00575, 0.002875, 0.0014375],
    [0.092, 0.046, 0.023, 0.0115, 0.00575, 0.002875, 0.0014375, 0.00071875],
    [0.046, 0.023, 0.0115, 0.00575, 0.002875, 0.0014375, 0.00071875, 0.000359375],
    [0.023, 0.0115, 0.00575, 0.002875, 0.0014375, 0.00071875, 0.000359375, 0.0001796875],
];

#[rustfmt::skip]
const LSB_B: ChannelTable = [
    [53.248, 26.624, 13.312, 6.656, 3.328, 1.664, 0.832, 0.416],
    [26.624, 13.312, 6.656, 3.328, 1.664, 0.832, 0.416, 0.208],
    [13.312, 6.656, 3.328, 1.664, 0.832, 0.416, 0.208, 0.104],
    [6.656, 3.328, 1.664, 0.832, 0.416, 0.208, 0.104, 0.052],
    [3.328, 1.664, 0.832, 0.416, 0.208, 0.104, 0.052, 0.026],
    [1.664, 0.832, 0.416, 0.208, 0.104, 0.052, 0.026, 0.013],
    [0.832, 0.416, 0.208, 0.104, 0.052, 0.026, 0.013, 0.0065],
    [0.416, 0.208, 0.104, 0.052, 0.026, 0.013, 0.0065, 0.00325],
    [0.208, 0.104, 0.052, 0.026, 0.013, 0.0065, 0.00325, 0.001625],
    [0.104, 0.052, 0.026, 0.013, 0.0065, 0.00325, 0.001625, 0.0008125],
    [0.052, 0.026, 0.013, 0.0065, 0.00325, 0.001625, 0.0008125, 0.00040625],
    [0.026, 0.013, 0.0065, 0.00325, 0.001625, 0.0008125, 0.00040625, 0.000203125],
];

#[rustfmt::skip]
const LSB_C: ChannelTable = [
    [61.44, 30.72, 15.36, 7.68, 3.84, 1.92, 0.96, 0.48],
    [30.72, 15.36, 7.68, 3.84, 1.92, 0.96, 0.48, 0.24],
    [15.36, 7.68, 3.84, 1.92, 0.96, 0.48, 0.24, 0.12],
    [7.68, 3.84, 1.92, 0.96, 0.48, 0.24, 0.12, 0.06],
    [3.84, 1.92, 0.96, 0.48, 0.24, 0.12, 0.06, 0.03],
    [1.92, 0.96, 0.48, 0.24, 0.12, 0.06, 0.03, 0.015],
    [0.96, 0.48, 0.24, 0.12, 0.06, 0.03, 0.015, 0.0075],
    [0.48, 0.24, 0.12, 0.06, 0.03, 0.015, 0.0075, 0.00375],
    [0.24, 0.12, 0.06, 0.03, 0.015, 0.0075, 0.00375, 0.001875],
    [0.12, 0.06, 0.03, 0.015, 0.0075, 0.00375, 0.001875, 0.0009375],
    [0.06, 0.03, 0.015, 0.0075, 0.00375, 0.001875, 0.0009375, 0.00046875],
    [0.03, 0.015, 0.0075, 0.00375, 0.001875, 0.0009375, 0.00046875, 0.000234375],
];

/// Per-channel, per-(gain, time) scale factors in µW/cm² per count.
///
/// A usable table is monotonic: with the time fixed, a higher gain code never
/// yields a larger factor, and with the gain fixed every step up in time code
/// halves the factor.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CalibrationTable {
    lsb: [ChannelTable; 3],
}

impl CalibrationTable {
    /// Built-in table of the sensor.
    pub const DEFAULT: Self = Self {
        lsb: [LSB_A, LSB_B, LSB_C],
    };

    /// Creates a table from per-channel factors, rejecting tables that break
    /// the monotonicity rules.
    pub fn new(a: ChannelTable, b: ChannelTable, c: ChannelTable) -> Result<Self> {
        let table = Self { lsb: [a, b, c] };
        table.validate()?;

        Ok(table)
    }

    /// Checks positivity and monotonicity of every channel.
    pub fn validate(&self) -> Result<()> {
        for channel in self.lsb.iter() {
            for (g, row) in channel.iter().enumerate() {
                for (t, &factor) in row.iter().enumerate() {
                    if !factor.is_finite() || factor <= 0.0 {
                        return Err(AS7331Error::InvalidCalibrationTable);
                    }

                    if g + 1 < GAINS && channel[g + 1][t] > factor {
                        return Err(AS7331Error::InvalidCalibrationTable);
                    }

                    // Halving within 1 %, the published tables are rounded
                    if t + 1 < TIMES {
                        let ratio = row[t + 1] / factor;
                        if (ratio - 0.5).abs() > 0.005 {
                            return Err(AS7331Error::InvalidCalibrationTable);
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// The factor for one channel at the given setting.
    pub fn scale(&self, channel: Channel, gain: Gain, time: IntegrationTime) -> f32 {
        self.lsb[channel as usize][gain.code() as usize][time.code() as usize]
    }

    /// Converts a (dark corrected) count into irradiance in W/m².
    pub fn irradiance(
        &self,
        channel: Channel,
        count: u16,
        gain: Gain,
        time: IntegrationTime,
    ) -> f32 {
        count as f32 * self.scale(channel, gain, time) * UNIT_CONVERSION
    }

    /// Irradiance of all three channels for one setting.
    pub fn irradiance_all(&self, counts: [u16; 3], setting: Setting) -> [f32; 3] {
        let mut irradiance = [0.0; 3];
        for channel in Channel::ALL {
            irradiance[channel as usize] = self.irradiance(
                channel,
                counts[channel as usize],
                setting.gain,
                setting.time,
            );
        }
        irradiance
    }
}

impl Default for CalibrationTable {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// UV index from channel A and B irradiance in W/m². Channel C does not
/// contribute. Never negative.
pub fn uv_index(irradiance_a: f32, irradiance_b: f32) -> f32 {
    let erythemal = irradiance_a * UVA_WEIGHT + irradiance_b * UVB_WEIGHT;
    (erythemal / UV_INDEX_NORMALIZATION).max(0.0)
}
