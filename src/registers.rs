//! Register map and bit encodings of the AS7331.
//!
//! The device exposes two register banks behind the same addresses. Which bank
//! answers depends on the `DOS` field of the operational state register (OSR):
//! the configuration bank while in [`DeviceMode::Configure`](crate::DeviceMode),
//! the output bank while armed or measuring.

use crate::config::{Divider, Gain, IntegrationTime, MeasurementMode};
use crate::{AS7331Error, Result};

/// I2C address for the AS7331 sensor (A1 = A0 = 0).
pub const AS7331_ADDR: u8 = 0x74;

/// Registers readable and writable in configuration state.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum ConfigRegister {
    /// Operational state register
    Osr = 0x00,

    /// API generation register (device id and mutation number)
    Agen = 0x02,

    /// Gain and integration time
    Creg1 = 0x06,

    /// Temperature measurement enable and digital divider
    Creg2 = 0x07,

    /// Measurement mode, standby, ready pin and internal clock
    Creg3 = 0x08,

    /// Pause between two measurements in SYND/CONT mode
    Break = 0x09,
}

/// Registers readable in measurement state.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum OutputRegister {
    /// OSR followed by the STATUS byte when read as two bytes
    OsrStatus = 0x00,

    /// Temperature result (12 bit, LSB first)
    Temp = 0x01,

    /// Channel A result (LSB first), the start of the result burst
    MRes1 = 0x02,

    /// Channel B result (LSB first)
    MRes2 = 0x03,

    /// Channel C result (LSB first)
    MRes3 = 0x04,
}

/// Start measurement bit of OSR.
pub const OSR_SS: u8 = 0x80;
/// Power down bit of OSR.
pub const OSR_PD: u8 = 0x40;
/// Software reset bit of OSR.
pub const OSR_SW_RES: u8 = 0x08;
/// `DOS` value selecting configuration state.
pub const DOS_CONFIGURATION: u8 = 0x02;
/// `DOS` value selecting measurement state.
pub const DOS_MEASUREMENT: u8 = 0x03;

/// OSR written to power the device down.
pub const OSR_POWER_DOWN: u8 = OSR_PD | DOS_CONFIGURATION;
/// OSR written to enter configuration state with the power-down bit cleared.
pub const OSR_CONFIGURE: u8 = DOS_CONFIGURATION;
/// OSR written to enter measurement state without starting a conversion.
pub const OSR_ARMED: u8 = DOS_MEASUREMENT;
/// OSR written to start a conversion.
pub const OSR_MEASURE: u8 = OSR_SS | DOS_MEASUREMENT;
/// OSR written to reset the device.
pub const OSR_RESET: u8 = OSR_SW_RES | DOS_CONFIGURATION;

/// Output conversion overflow (temperature/divider path).
pub const STATUS_OUTCONVOF: u8 = 0x80;
/// Result register overflow.
pub const STATUS_MRESOF: u8 = 0x40;
/// Analog overdrive of at least one channel.
pub const STATUS_ADCOF: u8 = 0x20;
/// Previous result was overwritten before it was read.
pub const STATUS_LDATA: u8 = 0x10;
/// New, not yet read, result available.
pub const STATUS_NDATA: u8 = 0x08;
/// A conversion is in progress.
pub const STATUS_NOTREADY: u8 = 0x04;

/// Overflow flags worth reporting to the user.
pub const STATUS_OVERFLOW_MASK: u8 = STATUS_OUTCONVOF | STATUS_MRESOF | STATUS_ADCOF;

/// Device id nibble expected in the upper half of AGEN.
pub const AGEN_DEVICE_ID: u8 = 0x2;

/// CREG2 bit enabling the temperature measurement.
pub const CREG2_EN_TM: u8 = 0x40;
/// CREG2 bit enabling the digital divider.
pub const CREG2_EN_DIV: u8 = 0x08;

/// Default BREAK value: 25 * 8 us = 200 us pause between conversions.
pub const BREAK_DEFAULT: u8 = 0x19;

/// Packing of gain (high nibble) and integration time (low nibble) into CREG1.
pub struct Creg1;

impl Creg1 {
    /// Packs a gain and an integration time into a CREG1 value.
    pub fn pack(gain: Gain, time: IntegrationTime) -> u8 {
        (gain.into_reg_value() << 4) | (time.into_reg_value() & 0x0F)
    }

    /// Decodes a CREG1 value. Time codes above 7 (reserved at 1.024 MHz) are
    /// rejected.
    pub fn unpack(value: u8) -> Result<(Gain, IntegrationTime)> {
        let gain = Gain::from_code(value >> 4).ok_or(AS7331Error::InvalidRegisterValue)?;
        let time =
            IntegrationTime::from_code(value & 0x0F).ok_or(AS7331Error::InvalidRegisterValue)?;

        Ok((gain, time))
    }
}

/// CREG2 value: temperature measurement stays enabled, divider as configured.
pub fn creg2_value(divider: Option<Divider>) -> u8 {
    match divider {
        Some(divider) => CREG2_EN_TM | CREG2_EN_DIV | divider.into_reg_value(),
        None => CREG2_EN_TM,
    }
}

/// CREG3 value: measurement mode in bits 7:6, standby off, push-pull ready
/// pin, 1.024 MHz conversion clock.
pub fn creg3_value(mode: MeasurementMode) -> u8 {
    let mmode = match mode {
        MeasurementMode::Continuous => 0b00,
        MeasurementMode::OneShot => 0b01,
    };

    mmode << 6
}

/// Decodes the 6-byte result burst starting at MRES1. Every result is LSB
/// first.
pub fn decode_results(data: &[u8; 6]) -> crate::RawSample {
    crate::RawSample {
        a: u16::from_le_bytes([data[0], data[1]]),
        b: u16::from_le_bytes([data[2], data[3]]),
        c: u16::from_le_bytes([data[4], data[5]]),
    }
}

/// Converts the 12 bit TEMP register into degrees celsius.
pub fn temperature_celsius(raw: u16) -> f32 {
    (raw & 0x0FFF) as f32 * 0.05 - 66.9
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_creg1_round_trip() {
        let value = Creg1::pack(Gain::X32, IntegrationTime::Ms8);
        assert_eq!(value, 0x63);

        let (gain, time) = Creg1::unpack(value).unwrap();
        assert_eq!(gain.code(), 6);
        assert_eq!(time.code(), 3);
    }

    #[test]
    fn test_creg1_extremes() {
        assert_eq!(Creg1::pack(Gain::X2048, IntegrationTime::Ms1), 0x00);
        assert_eq!(Creg1::pack(Gain::X1, IntegrationTime::Ms128), 0xB7);
        assert_eq!(
            Creg1::unpack(0xB7),
            Ok((Gain::X1, IntegrationTime::Ms128))
        );
    }

    #[test]
    fn test_creg1_rejects_reserved_codes() {
        assert_eq!(Creg1::unpack(0xC0), Err(AS7331Error::InvalidRegisterValue));
        assert_eq!(Creg1::unpack(0x08), Err(AS7331Error::InvalidRegisterValue));
    }

    #[test]
    fn test_osr_encodings() {
        assert_eq!(OSR_POWER_DOWN, 0x42);
        assert_eq!(OSR_CONFIGURE, 0x02);
        assert_eq!(OSR_ARMED, 0x03);
        assert_eq!(OSR_MEASURE, 0x83);
        assert_eq!(OSR_RESET, 0x0A);
    }

    #[test]
    fn test_creg2_and_creg3() {
        assert_eq!(creg2_value(None), 0x40);
        assert_eq!(creg2_value(Some(Divider::Div4)), 0x49);
        assert_eq!(creg3_value(MeasurementMode::Continuous), 0x00);
        assert_eq!(creg3_value(MeasurementMode::OneShot), 0x40);
    }

    #[test]
    fn test_decode_results_is_little_endian() {
        let sample = decode_results(&[0xC8, 0x00, 0xB4, 0x00, 0x34, 0x12]);
        assert_eq!(sample.a, 200);
        assert_eq!(sample.b, 180);
        assert_eq!(sample.c, 0x1234);
    }

    #[test]
    fn test_temperature() {
        // 1738 * 0.05 - 66.9 = 20.0
        let celsius = temperature_celsius(1738);
        assert!((celsius - 20.0).abs() < 0.001);

        // upper nibble is not part of the result
        assert_eq!(temperature_celsius(0xF000 | 1738), celsius);
    }
}
