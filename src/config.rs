//! Configuration surface of the driver.
//!
//! Everything here is consumed once at construction. At runtime only the
//! gain/time [`Setting`] moves (auto-ranging or [`reconfigure`]) and the
//! measurement can be switched on and off.
//!
//! [`reconfigure`]: crate::AS7331::reconfigure

use crate::calibration::CalibrationTable;
use crate::dark::DarkCalibrationConfig;
use crate::range::RangeLimits;
use crate::sink::OutputSet;
use crate::Result;

/// The gain of the AS7331 sensor.
///
/// The register code grows while the amplification shrinks: code 0 is the most
/// sensitive setting.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Gain {
    X2048 = 0,
    X1024 = 1,
    X512 = 2,
    X256 = 3,
    X128 = 4,
    X64 = 5,
    X32 = 6,
    X16 = 7,
    X8 = 8,
    X4 = 9,
    X2 = 10,
    X1 = 11,
}

impl From<Gain> for f32 {
    fn from(gain: Gain) -> Self {
        (2048u16 >> gain.code()) as f32
    }
}

impl Gain {
    /// Highest register code.
    pub const MAX_CODE: u8 = 11;

    /// Maps a register code onto a gain, `None` outside 0..=11.
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => Gain::X2048,
            1 => Gain::X1024,
            2 => Gain::X512,
            3 => Gain::X256,
            4 => Gain::X128,
            5 => Gain::X64,
            6 => Gain::X32,
            7 => Gain::X16,
            8 => Gain::X8,
            9 => Gain::X4,
            10 => Gain::X2,
            11 => Gain::X1,
            _ => return None,
        })
    }

    /// The register code of this gain.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Converts Gain value into the corresponding register value
    pub fn into_reg_value(self) -> u8 {
        self as u8
    }

    /// One step more amplification, `None` at [`Gain::X2048`].
    pub fn more_sensitive(self) -> Option<Self> {
        self.code().checked_sub(1).and_then(Self::from_code)
    }

    /// One step less amplification, `None` at [`Gain::X1`].
    pub fn less_sensitive(self) -> Option<Self> {
        Self::from_code(self.code() + 1)
    }
}

/// The integration time of the AS7331 sensor at the 1.024 MHz conversion
/// clock. Code 0 is the fastest setting.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum IntegrationTime {
    Ms1 = 0,
    Ms2 = 1,
    Ms4 = 2,
    Ms8 = 3,
    Ms16 = 4,
    Ms32 = 5,
    Ms64 = 6,
    Ms128 = 7,
}

impl IntegrationTime {
    /// Highest register code.
    pub const MAX_CODE: u8 = 7;

    /// Maps a register code onto an integration time, `None` outside 0..=7.
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => IntegrationTime::Ms1,
            1 => IntegrationTime::Ms2,
            2 => IntegrationTime::Ms4,
            3 => IntegrationTime::Ms8,
            4 => IntegrationTime::Ms16,
            5 => IntegrationTime::Ms32,
            6 => IntegrationTime::Ms64,
            7 => IntegrationTime::Ms128,
            _ => return None,
        })
    }

    /// The register code of this integration time.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Converts IntegrationTime value into the corresponding register value
    pub fn into_reg_value(self) -> u8 {
        self as u8
    }

    /// Conversion period in milliseconds.
    pub fn period_ms(self) -> u32 {
        1 << self.code()
    }

    /// One step shorter, `None` at [`IntegrationTime::Ms1`].
    pub fn shorter(self) -> Option<Self> {
        self.code().checked_sub(1).and_then(Self::from_code)
    }

    /// One step longer, `None` at [`IntegrationTime::Ms128`].
    pub fn longer(self) -> Option<Self> {
        Self::from_code(self.code() + 1)
    }
}

/// The gain/time pair that selects a calibration table cell.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Setting {
    pub gain: Gain,
    pub time: IntegrationTime,
}

impl Setting {
    pub const fn new(gain: Gain, time: IntegrationTime) -> Self {
        Self { gain, time }
    }
}

/// How conversions are started.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum MeasurementMode {
    /// The device keeps converting after a single start (CONT).
    #[default]
    Continuous,
    /// Every conversion is started by the driver (CMD).
    OneShot,
}

/// Digital divider applied by the device to the results (CREG2 `DIV`).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Divider {
    Div2 = 0,
    Div4 = 1,
    Div8 = 2,
    Div16 = 3,
    Div32 = 4,
    Div64 = 5,
    Div128 = 6,
    Div256 = 7,
}

impl Divider {
    /// Converts Divider value into the corresponding register value
    pub fn into_reg_value(self) -> u8 {
        self as u8
    }

    /// Factor the device divided the counts by.
    pub fn factor(self) -> f32 {
        (2u16 << (self as u8)) as f32
    }
}

/// Fixed presets for the initial gain/time.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum Profile {
    /// Use [`Config::gain`] and [`Config::integration_time`] as given.
    #[default]
    Custom,
    /// Low light: most sensitive gain, longest integration.
    Indoor,
    /// Direct sunlight.
    Outdoor,
    /// Close-range UV lamps.
    UvLamp,
}

impl Profile {
    /// The setting this profile stands for, `None` for [`Profile::Custom`].
    pub fn setting(self) -> Option<Setting> {
        match self {
            Profile::Custom => None,
            Profile::Indoor => Some(Setting::new(Gain::X2048, IntegrationTime::Ms128)),
            Profile::Outdoor => Some(Setting::new(Gain::X32, IntegrationTime::Ms16)),
            Profile::UvLamp => Some(Setting::new(Gain::X256, IntegrationTime::Ms8)),
        }
    }
}

/// Construction-time configuration of the driver.
#[derive(Clone, Debug)]
pub struct Config {
    /// Initial gain, ignored unless the profile is [`Profile::Custom`].
    pub gain: Gain,
    /// Initial integration time, ignored unless the profile is [`Profile::Custom`].
    pub integration_time: IntegrationTime,
    pub mode: MeasurementMode,
    pub profile: Profile,
    /// Optional result divider, `None` leaves it disabled.
    pub divider: Option<Divider>,
    /// Let the range controller move the gain.
    pub auto_gain: bool,
    /// Let the range controller move the integration time.
    pub auto_time: bool,
    /// Measure a dark offset whenever the measurement gets enabled.
    pub dark_calibration: bool,
    /// Start measuring right after construction.
    pub measurement_enabled: bool,
    pub range: RangeLimits,
    pub dark: DarkCalibrationConfig,
    /// Outputs handed to the telemetry sink.
    pub outputs: OutputSet,
    pub calibration: CalibrationTable,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gain: Gain::X64,
            integration_time: IntegrationTime::Ms16,
            mode: MeasurementMode::Continuous,
            profile: Profile::Custom,
            divider: None,
            auto_gain: true,
            auto_time: true,
            dark_calibration: true,
            measurement_enabled: true,
            range: RangeLimits::default(),
            dark: DarkCalibrationConfig::default(),
            outputs: OutputSet::ALL,
            calibration: CalibrationTable::DEFAULT,
        }
    }
}

impl Config {
    pub fn with_setting(mut self, gain: Gain, integration_time: IntegrationTime) -> Self {
        self.gain = gain;
        self.integration_time = integration_time;
        self
    }

    pub fn with_mode(mut self, mode: MeasurementMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_profile(mut self, profile: Profile) -> Self {
        self.profile = profile;
        self
    }

    pub fn with_divider(mut self, divider: Option<Divider>) -> Self {
        self.divider = divider;
        self
    }

    pub fn with_auto_range(mut self, auto_gain: bool, auto_time: bool) -> Self {
        self.auto_gain = auto_gain;
        self.auto_time = auto_time;
        self
    }

    pub fn with_dark_calibration(mut self, enabled: bool) -> Self {
        self.dark_calibration = enabled;
        self
    }

    pub fn with_measurement_enabled(mut self, enabled: bool) -> Self {
        self.measurement_enabled = enabled;
        self
    }

    pub fn with_range(mut self, range: RangeLimits) -> Self {
        self.range = range;
        self
    }

    pub fn with_dark(mut self, dark: DarkCalibrationConfig) -> Self {
        self.dark = dark;
        self
    }

    pub fn with_outputs(mut self, outputs: OutputSet) -> Self {
        self.outputs = outputs;
        self
    }

    pub fn with_calibration(mut self, calibration: CalibrationTable) -> Self {
        self.calibration = calibration;
        self
    }

    /// The setting the device starts with: the profile preset if any,
    /// otherwise the configured gain and integration time.
    pub fn initial_setting(&self) -> Setting {
        self.profile
            .setting()
            .unwrap_or(Setting::new(self.gain, self.integration_time))
    }

    /// Checks the parts of the configuration the type system cannot.
    pub fn validate(&self) -> Result<()> {
        self.range.validate()?;
        self.dark.validate()?;
        self.calibration.validate()?;

        Ok(())
    }

    /// Logs the effective configuration.
    pub fn dump(&self) {
        let setting = self.initial_setting();
        log::info!("AS7331:");
        log::info!("  Profile: {:?}", self.profile);
        log::info!(
            "  Gain code: {} ({}x), integration time code: {} ({} ms)",
            setting.gain.code(),
            f32::from(setting.gain),
            setting.time.code(),
            setting.time.period_ms()
        );
        log::info!("  Mode: {:?}, divider: {:?}", self.mode, self.divider);
        log::info!(
            "  Auto gain: {}, auto time: {} (window {}..{})",
            self.auto_gain,
            self.auto_time,
            self.range.low,
            self.range.high
        );
        log::info!(
            "  Dark calibration: {}, measurement enabled: {}",
            self.dark_calibration,
            self.measurement_enabled
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AS7331Error;

    #[test]
    fn test_gain_codes() {
        for code in 0..=Gain::MAX_CODE {
            assert_eq!(Gain::from_code(code).unwrap().code(), code);
        }
        assert_eq!(Gain::from_code(12), None);
        assert_eq!(f32::from(Gain::X2048), 2048.0);
        assert_eq!(f32::from(Gain::X1), 1.0);
    }

    #[test]
    fn test_gain_steps_clamp() {
        assert_eq!(Gain::X2048.more_sensitive(), None);
        assert_eq!(Gain::X1.less_sensitive(), None);
        assert_eq!(Gain::X128.less_sensitive(), Some(Gain::X64));
        assert_eq!(Gain::X128.more_sensitive(), Some(Gain::X256));
    }

    #[test]
    fn test_integration_time_codes() {
        for code in 0..=IntegrationTime::MAX_CODE {
            let time = IntegrationTime::from_code(code).unwrap();
            assert_eq!(time.code(), code);
            assert_eq!(time.period_ms(), 1 << code);
        }
        assert_eq!(IntegrationTime::from_code(8), None);
        assert_eq!(IntegrationTime::Ms1.shorter(), None);
        assert_eq!(IntegrationTime::Ms128.longer(), None);
        assert_eq!(IntegrationTime::Ms32.longer(), Some(IntegrationTime::Ms64));
    }

    #[test]
    fn test_divider_factor() {
        assert_eq!(Divider::Div2.factor(), 2.0);
        assert_eq!(Divider::Div256.factor(), 256.0);
    }

    #[test]
    fn test_profile_overrides_setting() {
        let config = Config::default().with_setting(Gain::X1, IntegrationTime::Ms1);
        assert_eq!(
            config.initial_setting(),
            Setting::new(Gain::X1, IntegrationTime::Ms1)
        );

        let config = config.with_profile(Profile::Indoor);
        assert_eq!(
            config.initial_setting(),
            Setting::new(Gain::X2048, IntegrationTime::Ms128)
        );

        let config = config.with_profile(Profile::Outdoor);
        assert_eq!(config.initial_setting().gain.code(), 6);
        assert_eq!(config.initial_setting().time.code(), 4);
    }

    #[test]
    fn test_default_config_is_valid() {
        assert_eq!(Config::default().validate(), Ok(()));
    }

    #[test]
    fn test_invalid_range_is_rejected() {
        let config = Config::default().with_range(RangeLimits {
            high: 500,
            low: 800,
        });
        assert_eq!(config.validate(), Err(AS7331Error::InvalidRange));
    }
}
