//! This crate provides a platform agnostic no_std driver for the AS7331 UVA/UVB/UVC sensor.
//! The driver is compatible with the [`embedded-hal`](https://crates.io/crates/embedded-hal) traits.
//!
//! The datasheet of the sensor can be found [here](https://ams-osram.com/products/sensor-solutions/ambient-light-color-spectral-proximity-sensors/ams-as7331-spectral-uv-sensor).
//!
//! ## Supported features
//! * Continuous and one-shot (command) measurement mode
//! * Configurable gain, integration time and result divider, with presets
//! * Automatic gain / integration time adjustment ("auto-ranging")
//! * Dark offset compensation, measured whenever the measurement is enabled
//! * Converting the raw counts into irradiance in W/m² and a UV index
//! * Reading the device id and the chip temperature
//! * Async variants of the bus operations (`async` feature)
//!
//! ## Unsupported features
//! * SYND/SYNDD (externally synchronised) modes
//! * Interrupt / ready pin handling
//!
//! ## Usage
//!
//! The examples run against `embedded-hal-mock`, the expectations list the
//! bus traffic the driver produces.
//!
//! ### Creating a driver instance
//!
//! ```rust
//! use as7331::{Config, DeviceMode, AS7331, AS7331_ADDR};
//! use embedded_hal_mock::delay::MockNoop;
//! use embedded_hal_mock::i2c::{Mock as I2cMock, Transaction};
//!
//! let expectations = [
//!     // software reset, configuration state, device id
//!     Transaction::write(AS7331_ADDR, vec![0x00, 0x0A]),
//!     Transaction::write(AS7331_ADDR, vec![0x00, 0x02]),
//!     Transaction::write_read(AS7331_ADDR, vec![0x02], vec![0x21]),
//!     // CREG1 (gain 64x, 16 ms), CREG2, CREG3, BREAK, then measurement state
//!     Transaction::write(AS7331_ADDR, vec![0x06, 0x54]),
//!     Transaction::write(AS7331_ADDR, vec![0x07, 0x40]),
//!     Transaction::write(AS7331_ADDR, vec![0x08, 0x00]),
//!     Transaction::write(AS7331_ADDR, vec![0x09, 0x19]),
//!     Transaction::write(AS7331_ADDR, vec![0x00, 0x03]),
//! ];
//! let mut delay = MockNoop::new();
//! let mut i2c = I2cMock::new(&expectations);
//!
//! let config = Config::default().with_measurement_enabled(false);
//! let sensor = AS7331::new(config, &mut delay, &mut i2c).unwrap();
//! assert_eq!(sensor.mode(), DeviceMode::Armed);
//!
//! i2c.done();
//! ```
//!
//! ### Polling measurements
//!
//! ```rust
//! use as7331::{Config, Output, AS7331, AS7331_ADDR};
//! use embedded_hal_mock::delay::MockNoop;
//! use embedded_hal_mock::i2c::{Mock as I2cMock, Transaction};
//!
//! # let mut expectations = vec![
//! #     Transaction::write(AS7331_ADDR, vec![0x00, 0x0A]),
//! #     Transaction::write(AS7331_ADDR, vec![0x00, 0x02]),
//! #     Transaction::write_read(AS7331_ADDR, vec![0x02], vec![0x21]),
//! #     Transaction::write(AS7331_ADDR, vec![0x06, 0x54]),
//! #     Transaction::write(AS7331_ADDR, vec![0x07, 0x40]),
//! #     Transaction::write(AS7331_ADDR, vec![0x08, 0x00]),
//! #     Transaction::write(AS7331_ADDR, vec![0x09, 0x19]),
//! #     Transaction::write(AS7331_ADDR, vec![0x00, 0x03]),
//! #     Transaction::write(AS7331_ADDR, vec![0x00, 0x83]),
//! # ];
//! // STATUS with NDATA set, then the three results LSB first
//! expectations.push(Transaction::write_read(AS7331_ADDR, vec![0x00], vec![0x83, 0x08]));
//! expectations.push(Transaction::write_read(
//!     AS7331_ADDR,
//!     vec![0x02],
//!     vec![0x20, 0x4E, 0x10, 0x27, 0x88, 0x13],
//! ));
//! let mut delay = MockNoop::new();
//! let mut i2c = I2cMock::new(&expectations);
//!
//! let config = Config::default()
//!     .with_dark_calibration(false)
//!     .with_auto_range(false, false);
//! let mut sensor = AS7331::new(config, &mut delay, &mut i2c).unwrap();
//! let mut sink = |output: Output, value: f32| println!("{:?}: {}", output, value);
//!
//! // Waits for a fresh conversion, publishes the values and adapts gain and
//! // integration time for the next cycle (if enabled)
//! match sensor.poll(&mut delay, &mut i2c, &mut sink) {
//!     Ok(Some(measurement)) => {
//!         assert_eq!(measurement.raw.a, 20_000);
//!         println!("UV index: {}", measurement.uv_index);
//!     }
//!     Ok(None) => println!("Measurement disabled"),
//!     Err(e) => println!("Cycle skipped: {:?}", e),
//! }
//!
//! i2c.done();
//! ```
//!
//! ### Switching the measurement on and off
//!
//! ```rust
//! use as7331::{Config, DeviceMode, AS7331, AS7331_ADDR};
//! use embedded_hal_mock::delay::MockNoop;
//! use embedded_hal_mock::i2c::{Mock as I2cMock, Transaction};
//!
//! # let expectations = [
//! #     Transaction::write(AS7331_ADDR, vec![0x00, 0x0A]),
//! #     Transaction::write(AS7331_ADDR, vec![0x00, 0x02]),
//! #     Transaction::write_read(AS7331_ADDR, vec![0x02], vec![0x21]),
//! #     Transaction::write(AS7331_ADDR, vec![0x06, 0x54]),
//! #     Transaction::write(AS7331_ADDR, vec![0x07, 0x40]),
//! #     Transaction::write(AS7331_ADDR, vec![0x08, 0x00]),
//! #     Transaction::write(AS7331_ADDR, vec![0x09, 0x19]),
//! #     Transaction::write(AS7331_ADDR, vec![0x00, 0x03]),
//! #     Transaction::write(AS7331_ADDR, vec![0x00, 0x83]),
//! #     Transaction::write(AS7331_ADDR, vec![0x00, 0x42]),
//! #     Transaction::write(AS7331_ADDR, vec![0x00, 0x02]),
//! #     Transaction::write(AS7331_ADDR, vec![0x06, 0x54]),
//! #     Transaction::write(AS7331_ADDR, vec![0x07, 0x40]),
//! #     Transaction::write(AS7331_ADDR, vec![0x08, 0x00]),
//! #     Transaction::write(AS7331_ADDR, vec![0x09, 0x19]),
//! #     Transaction::write(AS7331_ADDR, vec![0x00, 0x03]),
//! #     Transaction::write(AS7331_ADDR, vec![0x00, 0x83]),
//! # ];
//! # let mut delay = MockNoop::new();
//! # let mut i2c = I2cMock::new(&expectations);
//! let config = Config::default().with_dark_calibration(false);
//! let mut sensor = AS7331::new(config, &mut delay, &mut i2c).unwrap();
//!
//! // Powers the sensor down and forgets the dark offset
//! sensor.set_measurement_enabled(false, &mut delay, &mut i2c).unwrap();
//! assert_eq!(sensor.mode(), DeviceMode::PowerDown);
//!
//! // Configures and starts the sensor again (and measures a new dark offset
//! // if dark calibration is enabled)
//! sensor.set_measurement_enabled(true, &mut delay, &mut i2c).unwrap();
//! assert_eq!(sensor.mode(), DeviceMode::Measuring);
//! # i2c.done();
//! ```

#![cfg_attr(not(test), no_std)]

#[cfg(feature = "async")]
mod r#async;
pub mod calibration;
pub mod config;
pub mod dark;
pub mod range;
pub mod registers;
pub mod sink;

pub use calibration::{uv_index, CalibrationTable, Channel};
pub use config::{Config, Divider, Gain, IntegrationTime, MeasurementMode, Profile, Setting};
pub use dark::{apply_offset, DarkCalibrationConfig, DarkOffset};
pub use range::{RangeController, RangeLimits};
pub use registers::AS7331_ADDR;
pub use sink::{NoSink, Output, OutputSet, TelemetrySink};

use dark::{DarkAccumulator, MIN_DARK_SAMPLES};
use registers::{ConfigRegister, OutputRegister};
use sink::BoundSink;

/// Settling time after switching between configuration and measurement state.
pub const SETTLE_MS: u32 = 3;

/// Settling time after setting the start bit.
pub const TRIGGER_SETTLE_MS: u32 = 2;

/// Interval between two polls of the STATUS register.
pub const READY_POLL_INTERVAL_MS: u32 = 2;

/// Startup time after a software reset
pub(crate) const RESET_STARTUP_MS: u32 = 10;

/// One conversion result, one count per channel.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct RawSample {
    pub a: u16,
    pub b: u16,
    pub c: u16,
}

impl RawSample {
    /// Largest count of the three channels.
    pub fn peak(&self) -> u16 {
        self.a.max(self.b).max(self.c)
    }

    pub fn as_array(&self) -> [u16; 3] {
        [self.a, self.b, self.c]
    }
}

/// Operating mode of the device as last commanded by the driver.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DeviceMode {
    /// Configuration state with the power-down bit set (power-on default).
    PowerDown,
    /// Configuration state, control registers writable.
    Configure,
    /// Measurement state, no conversion started.
    Armed,
    /// Measurement state, start bit set.
    Measuring,
}

/// The result of one successful poll cycle.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Measurement {
    /// Counts as read from the device.
    pub raw: RawSample,
    /// Counts with the dark offset removed (or `raw` if no valid offset).
    pub corrected: RawSample,
    /// Irradiance in W/m² of channel A, B and C.
    pub irradiance: [f32; 3],
    pub uv_index: f32,
    /// Gain and integration time the counts were taken with.
    pub setting: Setting,
}

/// Represents an I2C-connected AS7331 sensor.
#[derive(Clone, Debug)]
pub struct AS7331<I2C, D> {
    /// Marker to satisfy the compiler.
    _delay: core::marker::PhantomData<D>,

    /// I2C Interface for communcating with the sensor.
    _i2c: core::marker::PhantomData<I2C>,

    config: Config,

    /// The active gain and integration time.
    setting: Setting,

    mode: DeviceMode,

    range: RangeController,

    dark: DarkOffset,

    /// Measurement switched on by the user.
    enabled: bool,

    /// A configuration sequence failed, sampling is refused until reset.
    failed: bool,
}

impl<I2C, D> AS7331<I2C, D> {
    fn with_config(config: Config) -> Self {
        let range = RangeController::new(config.range, config.auto_gain, config.auto_time);

        Self {
            _delay: core::marker::PhantomData,
            _i2c: core::marker::PhantomData,
            setting: config.initial_setting(),
            mode: DeviceMode::PowerDown,
            range,
            dark: DarkOffset::Uncalibrated,
            enabled: false,
            failed: false,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The gain and integration time currently programmed.
    pub fn setting(&self) -> Setting {
        self.setting
    }

    pub fn mode(&self) -> DeviceMode {
        self.mode
    }

    pub fn dark_offset(&self) -> DarkOffset {
        self.dark
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// True after a failed configuration sequence, until [`reset`](Self::reset).
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    /// Logs the configuration and the current state.
    pub fn dump_config(&self) {
        self.config.dump();
        log::info!(
            "  Active gain code: {}, integration time code: {}, mode: {:?}",
            self.setting.gain.code(),
            self.setting.time.code(),
            self.mode
        );
        if let Some(offset) = self.dark.valid() {
            log::info!(
                "  Dark offset: A={} B={} C={}",
                offset.a,
                offset.b,
                offset.c
            );
        }
    }

    /// Number of STATUS polls before a cycle times out: twice the conversion
    /// period plus 10 ms of slack.
    pub(crate) fn ready_poll_limit(&self) -> u32 {
        (2 * self.setting.time.period_ms() + 10) / READY_POLL_INTERVAL_MS + 1
    }

    /// Wait between two dark calibration attempts, never shorter than one
    /// conversion period.
    pub(crate) fn dark_poll_interval_ms(&self) -> u32 {
        self.config
            .dark
            .poll_interval_ms
            .max(self.setting.time.period_ms())
    }

    /// Applies dark offset and calibration with the active setting.
    pub(crate) fn evaluate(&self, raw: RawSample) -> Measurement {
        let corrected = self.dark.correct(raw);

        let mut irradiance = self
            .config
            .calibration
            .irradiance_all(corrected.as_array(), self.setting);
        if let Some(divider) = self.config.divider {
            for value in irradiance.iter_mut() {
                *value *= divider.factor();
            }
        }

        let uv_index = calibration::uv_index(irradiance[0], irradiance[1]);

        log::debug!(
            "raw {}/{}/{} corrected {}/{}/{} irradiance {:.6}/{:.6}/{:.6} W/m² UVI {:.2}",
            raw.a,
            raw.b,
            raw.c,
            corrected.a,
            corrected.b,
            corrected.c,
            irradiance[0],
            irradiance[1],
            irradiance[2],
            uv_index
        );

        Measurement {
            raw,
            corrected,
            irradiance,
            uv_index,
            setting: self.setting,
        }
    }

    pub(crate) fn publish_counts<S: TelemetrySink>(&self, sink: &mut S, measurement: &Measurement) {
        let mut sink = BoundSink {
            outputs: self.config.outputs,
            sink,
        };
        for (output, count) in Output::COUNTS.iter().zip(measurement.corrected.as_array()) {
            sink.publish(*output, count as f32);
        }
    }

    pub(crate) fn publish_irradiance<S: TelemetrySink>(
        &self,
        sink: &mut S,
        measurement: &Measurement,
    ) {
        let mut sink = BoundSink {
            outputs: self.config.outputs,
            sink,
        };
        for (output, value) in Output::IRRADIANCE.iter().zip(measurement.irradiance) {
            sink.publish(*output, value);
        }
        sink.publish(Output::UvIndex, measurement.uv_index);
    }

    /// Takes over a new setting; the dark offset no longer matches it.
    pub(crate) fn adopt_setting(&mut self, setting: Setting) {
        log::debug!(
            "Switching to gain code {}, time code {}",
            setting.gain.code(),
            setting.time.code()
        );
        self.setting = setting;
        self.dark.invalidate();
    }

    pub(crate) fn configuration_failed(&mut self, error: AS7331Error) -> AS7331Error {
        log::error!("AS7331 configuration failed: {:?}", error);
        self.failed = true;

        match error {
            AS7331Error::InvalidDevice => AS7331Error::InvalidDevice,
            _ => AS7331Error::ConfigurationFailed,
        }
    }

    /// Prepares the state for a fresh start after a software reset.
    pub(crate) fn clear_state(&mut self) {
        self.mode = DeviceMode::PowerDown;
        self.setting = self.config.initial_setting();
        self.dark = DarkOffset::Uncalibrated;
        self.enabled = false;
        self.failed = false;
    }

    pub(crate) fn require_mode(&self, allowed: &[DeviceMode], error: AS7331Error) -> Result<()> {
        if allowed.contains(&self.mode) {
            Ok(())
        } else {
            Err(error)
        }
    }

    /// Whether the continuous conversion has to be (re)started by the driver.
    pub(crate) fn starts_continuously(&self) -> bool {
        self.config.mode == MeasurementMode::Continuous
    }
}

/// Checks a STATUS byte for new data and reports overflows.
pub(crate) fn has_new_data(status: u8) -> bool {
    if status & registers::STATUS_OVERFLOW_MASK != 0 {
        log::warn!(
            "Sensor overflow (STATUS 0x{:02X}), results are clipped",
            status
        );
    }

    status & registers::STATUS_NDATA != 0
}

impl<I2C, D> AS7331<I2C, D>
where
    D: embedded_hal::blocking::delay::DelayMs<u32>,
    I2C: embedded_hal::blocking::i2c::Write + embedded_hal::blocking::i2c::WriteRead,
{
    /// Creates a connection with an AS7331 sensor via I2C.
    ///
    /// This method will reset the sensor, check its device id and program the
    /// configured gain, integration time and measurement mode. If
    /// `measurement_enabled` is set, the measurement is started and a dark
    /// offset is taken.
    pub fn new(config: Config, delay: &mut D, i2c: &mut I2C) -> Result<Self> {
        config.validate()?;

        let mut sensor = Self::with_config(config);
        sensor.reset(delay, i2c)?;

        Ok(sensor)
    }

    /// Resets the sensor and runs the startup sequence again.
    ///
    /// This is the way out of the failed state after a configuration error.
    pub fn reset(&mut self, delay: &mut D, i2c: &mut I2C) -> Result<()> {
        self.write_register(ConfigRegister::Osr as u8, registers::OSR_RESET, i2c)?;
        delay.delay_ms(RESET_STARTUP_MS);
        self.clear_state();

        self.config.dump();
        if let Err(e) = self.bring_up(delay, i2c) {
            return Err(self.configuration_failed(e));
        }

        if self.config.measurement_enabled {
            self.set_measurement_enabled(true, delay, i2c)?;
        }

        Ok(())
    }

    fn bring_up(&mut self, delay: &mut D, i2c: &mut I2C) -> Result<()> {
        self.enter_configure(delay, i2c)?;

        let (device_id, mutation) = self.read_id(i2c)?;
        if device_id != registers::AGEN_DEVICE_ID {
            return Err(AS7331Error::InvalidDevice);
        }
        log::info!("Found AS7331 (device id 0x{:X}, mutation {})", device_id, mutation);

        self.write_parameters(self.setting, self.config.divider, self.config.mode, i2c)?;
        self.enter_armed(delay, i2c)
    }

    /// Switches the device into configuration state.
    pub fn enter_configure(&mut self, delay: &mut D, i2c: &mut I2C) -> Result<()> {
        self.write_register(ConfigRegister::Osr as u8, registers::OSR_CONFIGURE, i2c)?;
        delay.delay_ms(SETTLE_MS);
        self.mode = DeviceMode::Configure;

        Ok(())
    }

    /// Writes gain, integration time, divider and measurement mode.
    ///
    /// Only valid in configuration state.
    pub fn write_parameters(
        &mut self,
        setting: Setting,
        divider: Option<Divider>,
        mode: MeasurementMode,
        i2c: &mut I2C,
    ) -> Result<()> {
        self.require_mode(&[DeviceMode::Configure], AS7331Error::NotInConfigurationMode)?;

        let creg1 = registers::Creg1::pack(setting.gain, setting.time);
        let creg2 = registers::creg2_value(divider);
        let creg3 = registers::creg3_value(mode);

        self.write_register(ConfigRegister::Creg1 as u8, creg1, i2c)?;
        self.write_register(ConfigRegister::Creg2 as u8, creg2, i2c)?;
        self.write_register(ConfigRegister::Creg3 as u8, creg3, i2c)?;
        self.write_register(ConfigRegister::Break as u8, registers::BREAK_DEFAULT, i2c)?;

        log::info!(
            "Parameters set: gain code {}, time code {} (CREG1=0x{:02X}, CREG2=0x{:02X}, CREG3=0x{:02X})",
            setting.gain.code(),
            setting.time.code(),
            creg1,
            creg2,
            creg3
        );

        Ok(())
    }

    /// Switches the device into measurement state without starting a
    /// conversion.
    pub fn enter_armed(&mut self, delay: &mut D, i2c: &mut I2C) -> Result<()> {
        self.require_mode(
            &[DeviceMode::Configure, DeviceMode::Armed, DeviceMode::Measuring],
            AS7331Error::NotInConfigurationMode,
        )?;

        self.write_register(ConfigRegister::Osr as u8, registers::OSR_ARMED, i2c)?;
        delay.delay_ms(SETTLE_MS);
        self.mode = DeviceMode::Armed;

        Ok(())
    }

    /// Sets the start bit. Needed once in continuous mode and once per
    /// conversion in one-shot mode.
    pub fn trigger(&mut self, delay: &mut D, i2c: &mut I2C) -> Result<()> {
        self.require_mode(
            &[DeviceMode::Armed, DeviceMode::Measuring],
            AS7331Error::NotInMeasurementMode,
        )?;

        self.write_register(ConfigRegister::Osr as u8, registers::OSR_MEASURE, i2c)?;
        delay.delay_ms(TRIGGER_SETTLE_MS);
        self.mode = DeviceMode::Measuring;

        Ok(())
    }

    /// Powers the device down.
    pub fn power_down(&mut self, i2c: &mut I2C) -> Result<()> {
        self.write_register(ConfigRegister::Osr as u8, registers::OSR_POWER_DOWN, i2c)?;
        self.mode = DeviceMode::PowerDown;

        Ok(())
    }

    /// Configure → write parameters → arm, and restart a continuous
    /// measurement if `start` is set. Any failing step puts the driver into
    /// the failed state.
    fn configure_sequence(&mut self, start: bool, delay: &mut D, i2c: &mut I2C) -> Result<()> {
        let result = self
            .enter_configure(delay, i2c)
            .and_then(|_| {
                self.write_parameters(self.setting, self.config.divider, self.config.mode, i2c)
            })
            .and_then(|_| self.enter_armed(delay, i2c))
            .and_then(|_| {
                if start {
                    self.trigger(delay, i2c)
                } else {
                    Ok(())
                }
            });

        result.map_err(|e| self.configuration_failed(e))
    }

    /// Programs a new gain and integration time.
    ///
    /// The dark offset is marked stale. While the device is powered down the
    /// setting is only stored and written on the next enable.
    pub fn reconfigure(&mut self, setting: Setting, delay: &mut D, i2c: &mut I2C) -> Result<()> {
        if self.failed {
            return Err(AS7331Error::DeviceFailed);
        }
        if setting == self.setting {
            return Ok(());
        }

        self.adopt_setting(setting);
        if self.mode == DeviceMode::PowerDown {
            return Ok(());
        }

        let start = self.enabled && self.starts_continuously();
        self.configure_sequence(start, delay, i2c)
    }

    /// Starts or stops the measurement.
    ///
    /// Enabling configures the device if it was powered down, starts the
    /// continuous conversion and measures a new dark offset (if configured).
    /// A failing dark offset measurement only gets logged. Disabling powers
    /// the device down and drops the dark offset.
    pub fn set_measurement_enabled(
        &mut self,
        enabled: bool,
        delay: &mut D,
        i2c: &mut I2C,
    ) -> Result<()> {
        if self.failed {
            return Err(AS7331Error::DeviceFailed);
        }
        if enabled == self.enabled {
            return Ok(());
        }

        if !enabled {
            self.power_down(i2c)?;
            self.dark = DarkOffset::Uncalibrated;
            self.enabled = false;
            log::info!("Measurement disabled, sensor powered down");
            return Ok(());
        }

        if self.mode == DeviceMode::PowerDown {
            self.configure_sequence(false, delay, i2c)?;
        }
        if self.starts_continuously() {
            if let Err(e) = self.trigger(delay, i2c) {
                return Err(self.configuration_failed(e));
            }
        }
        self.enabled = true;
        self.dark = DarkOffset::Uncalibrated;
        log::info!("Measurement enabled in {:?} mode", self.config.mode);

        if self.config.dark_calibration {
            // Sampling continues uncorrected if this fails
            let _ = self.calibrate_dark_offset(self.config.dark.samples, delay, i2c);
        }

        Ok(())
    }

    /// Measures the dark offset as the mean of `samples` conversions.
    ///
    /// Attempts are spaced by the configured poll interval, or by the
    /// conversion period if that is longer. Attempts without new data or with
    /// a failing read are skipped. If fewer than three valid samples come
    /// together the previous offset is kept and `InsufficientSamples` is
    /// returned.
    pub fn calibrate_dark_offset(
        &mut self,
        samples: u8,
        delay: &mut D,
        i2c: &mut I2C,
    ) -> Result<RawSample> {
        if self.failed {
            return Err(AS7331Error::DeviceFailed);
        }
        if samples < MIN_DARK_SAMPLES {
            return Err(AS7331Error::InvalidSampleCount);
        }
        if !self.enabled {
            return Err(AS7331Error::NotInMeasurementMode);
        }

        let max_attempts = self.config.dark.max_attempts.max(samples);
        let interval = self.dark_poll_interval_ms();
        let mut accumulator = DarkAccumulator::default();
        let mut needs_trigger = !self.starts_continuously();

        for _ in 0..max_attempts {
            if accumulator.count() >= u32::from(samples) {
                break;
            }

            if needs_trigger {
                needs_trigger = self.trigger(delay, i2c).is_err();
            }
            if !needs_trigger {
                match self.read_status(i2c) {
                    Ok(status) if has_new_data(status) => {
                        if let Ok(sample) = self.read_raw_sample(i2c) {
                            accumulator.push(sample);
                            needs_trigger = !self.starts_continuously();
                        }
                    }
                    _ => {}
                }
            }

            delay.delay_ms(interval);
        }

        match accumulator.mean() {
            Ok(offset) => {
                self.dark = DarkOffset::Valid(offset);
                log::info!(
                    "Dark offset measured: A={} B={} C={}",
                    offset.a,
                    offset.b,
                    offset.c
                );
                Ok(offset)
            }
            Err(e) => {
                log::warn!(
                    "Dark offset unchanged, only {} valid samples",
                    accumulator.count()
                );
                Err(e)
            }
        }
    }

    /// Runs one measurement cycle.
    ///
    /// Triggers the conversion (one-shot mode), waits for new data, reads all
    /// three channels in one burst, removes the dark offset and publishes the
    /// counts. Then the auto-ranging reacts to the raw counts before
    /// irradiance and UV index (computed with the setting the counts were
    /// taken with) are published.
    ///
    /// Returns `Ok(None)` while the measurement is disabled. Bus errors and
    /// timeouts abort the cycle without publishing anything. If switching to
    /// the new setting fails, the cycle is still published completely before
    /// `ConfigurationFailed` is returned.
    pub fn poll<S: TelemetrySink>(
        &mut self,
        delay: &mut D,
        i2c: &mut I2C,
        sink: &mut S,
    ) -> Result<Option<Measurement>> {
        if self.failed {
            return Err(AS7331Error::DeviceFailed);
        }
        if !self.enabled {
            return Ok(None);
        }

        if !self.starts_continuously() {
            if let Err(e) = self.trigger(delay, i2c) {
                log::warn!("Measurement trigger failed: {:?}", e);
                return Err(e);
            }
        }

        self.wait_for_data(delay, i2c)?;
        let raw = self.read_raw_sample(i2c).map_err(|e| {
            log::warn!("Could not read results: {:?}", e);
            e
        })?;

        let measurement = self.evaluate(raw);
        self.publish_counts(sink, &measurement);

        let ranged = match self.range.step(self.setting, &raw) {
            Some(next) => {
                self.adopt_setting(next);
                let start = self.starts_continuously();
                self.configure_sequence(start, delay, i2c)
            }
            None => Ok(()),
        };

        // The measurement is complete either way, a failed step only affects
        // the next cycle
        self.publish_irradiance(sink, &measurement);
        ranged?;

        Ok(Some(measurement))
    }

    /// Polls STATUS until the NDATA bit is set.
    pub fn wait_for_data(&mut self, delay: &mut D, i2c: &mut I2C) -> Result<()> {
        let polls = self.ready_poll_limit();

        for attempt in 0..polls {
            if attempt > 0 {
                delay.delay_ms(READY_POLL_INTERVAL_MS);
            }

            let status = self.read_status(i2c).map_err(|e| {
                log::warn!("Could not read STATUS: {:?}", e);
                e
            })?;
            if has_new_data(status) {
                return Ok(());
            }
        }

        log::warn!("No new data after {} status polls", polls);
        Err(AS7331Error::DataTimeout)
    }

    /// Reads the STATUS byte (the second byte of a two byte OSR read in
    /// measurement state).
    pub fn read_status(&mut self, i2c: &mut I2C) -> Result<u8> {
        let mut read_data = [0; 2];
        self.read_registers(OutputRegister::OsrStatus as u8, &mut read_data, i2c)?;

        Ok(read_data[1])
    }

    /// Read all 3 result registers in one i2c write-then-read operation
    pub fn read_raw_sample(&mut self, i2c: &mut I2C) -> Result<RawSample> {
        let mut read_data = [0; 6];
        self.read_registers(OutputRegister::MRes1 as u8, &mut read_data, i2c)?;

        log::debug!("Read raw values: {:?}", read_data);

        Ok(registers::decode_results(&read_data))
    }

    /// Reads the device id and the mutation number of the sensor.
    ///
    /// Only available in configuration state.
    pub fn read_id(&mut self, i2c: &mut I2C) -> Result<(u8, u8)> {
        self.require_mode(&[DeviceMode::Configure], AS7331Error::NotInConfigurationMode)?;

        let mut read_data = [0; 1];
        self.read_registers(ConfigRegister::Agen as u8, &mut read_data, i2c)?;

        Ok((read_data[0] >> 4, read_data[0] & 0x0F))
    }

    /// Reads the chip temperature in degrees celsius.
    ///
    /// Only available in measurement state.
    pub fn read_temperature(&mut self, i2c: &mut I2C) -> Result<f32> {
        self.require_mode(
            &[DeviceMode::Armed, DeviceMode::Measuring],
            AS7331Error::NotInMeasurementMode,
        )?;

        let mut read_data = [0; 2];
        self.read_registers(OutputRegister::Temp as u8, &mut read_data, i2c)?;

        Ok(registers::temperature_celsius(u16::from_le_bytes(read_data)))
    }

    /// Writes a new value to a specific register
    pub fn write_register(&mut self, register: u8, data: u8, i2c: &mut I2C) -> Result<()> {
        i2c.write(AS7331_ADDR, &[register, data])
            .map_err(|_| AS7331Error::WriteI2CError)?;

        Ok(())
    }

    /// Reads consecutive registers starting at `register`
    pub fn read_registers(&mut self, register: u8, buffer: &mut [u8], i2c: &mut I2C) -> Result<()> {
        i2c.write_read(AS7331_ADDR, &[register], buffer)
            .map_err(|_| AS7331Error::ReadI2CError)?;

        Ok(())
    }
}

/// Shorthand for all functions returning an error in this module.
type Result<T> = core::result::Result<T, AS7331Error>;

/// Represents any error that may happen during communication.
#[derive(Copy, Clone, Debug, Ord, PartialOrd, Eq, PartialEq)]
pub enum AS7331Error {
    /// An error occurred while reading from the sensor.
    ReadI2CError,
    /// An error occurred while writing to the sensor.
    WriteI2CError,
    /// The sensor did not report new data in time.
    DataTimeout,
    /// A step of the configuration sequence failed, the driver stops sampling until reset.
    ConfigurationFailed,
    /// The driver is in the failed state.
    DeviceFailed,
    /// The operation needs the configuration state.
    NotInConfigurationMode,
    /// The operation needs the measurement state.
    NotInMeasurementMode,
    /// The device id does not belong to an AS7331.
    InvalidDevice,
    /// Too few valid samples for a dark offset.
    InsufficientSamples,
    /// Dark offsets need at least three samples.
    InvalidSampleCount,
    /// A register held a value outside the documented range.
    InvalidRegisterValue,
    /// The calibration table is not monotonic.
    InvalidCalibrationTable,
    /// The auto-ranging window is empty.
    InvalidRange,
}
