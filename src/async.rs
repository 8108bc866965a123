//! Async API
//!
//! This module contains the async API for the AS7331 sensor. It mirrors the
//! blocking API, every operation carries an `_async` suffix.

use crate::dark::{DarkAccumulator, MIN_DARK_SAMPLES};
use crate::registers::{self, ConfigRegister, OutputRegister};
use crate::{
    has_new_data, AS7331Error, Config, DarkOffset, DeviceMode, Divider, Measurement,
    MeasurementMode, RawSample, Result, Setting, TelemetrySink, AS7331, AS7331_ADDR,
    READY_POLL_INTERVAL_MS, RESET_STARTUP_MS, SETTLE_MS, TRIGGER_SETTLE_MS,
};

impl<I2C, D> AS7331<I2C, D>
where
    D: embedded_hal_async::delay::DelayNs,
    I2C: embedded_hal_async::i2c::I2c<embedded_hal_async::i2c::SevenBitAddress>,
{
    /// Creates a connection with an AS7331 sensor via I2C.
    ///
    /// This method will reset the sensor, check its device id and program the
    /// configured gain, integration time and measurement mode.
    pub async fn new_async(config: Config, delay: &mut D, i2c: &mut I2C) -> Result<Self> {
        config.validate()?;

        let mut sensor = Self::with_config(config);
        sensor.reset_async(delay, i2c).await?;

        Ok(sensor)
    }

    /// Resets the sensor and runs the startup sequence again.
    pub async fn reset_async(&mut self, delay: &mut D, i2c: &mut I2C) -> Result<()> {
        self.write_register_async(ConfigRegister::Osr as u8, registers::OSR_RESET, i2c)
            .await?;
        delay.delay_ms(RESET_STARTUP_MS).await;
        self.clear_state();

        self.config.dump();
        if let Err(e) = self.bring_up_async(delay, i2c).await {
            return Err(self.configuration_failed(e));
        }

        if self.config.measurement_enabled {
            self.set_measurement_enabled_async(true, delay, i2c).await?;
        }

        Ok(())
    }

    async fn bring_up_async(&mut self, delay: &mut D, i2c: &mut I2C) -> Result<()> {
        self.enter_configure_async(delay, i2c).await?;

        let (device_id, mutation) = self.read_id_async(i2c).await?;
        if device_id != registers::AGEN_DEVICE_ID {
            return Err(AS7331Error::InvalidDevice);
        }
        log::info!("Found AS7331 (device id 0x{:X}, mutation {})", device_id, mutation);

        self.write_parameters_async(self.setting, self.config.divider, self.config.mode, i2c)
            .await?;
        self.enter_armed_async(delay, i2c).await
    }

    /// Switches the device into configuration state.
    pub async fn enter_configure_async(&mut self, delay: &mut D, i2c: &mut I2C) -> Result<()> {
        self.write_register_async(ConfigRegister::Osr as u8, registers::OSR_CONFIGURE, i2c)
            .await?;
        delay.delay_ms(SETTLE_MS).await;
        self.mode = DeviceMode::Configure;

        Ok(())
    }

    /// Writes gain, integration time, divider and measurement mode.
    pub async fn write_parameters_async(
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

        self.write_register_async(ConfigRegister::Creg1 as u8, creg1, i2c)
            .await?;
        self.write_register_async(ConfigRegister::Creg2 as u8, creg2, i2c)
            .await?;
        self.write_register_async(ConfigRegister::Creg3 as u8, creg3, i2c)
            .await?;
        self.write_register_async(ConfigRegister::Break as u8, registers::BREAK_DEFAULT, i2c)
            .await?;

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
    pub async fn enter_armed_async(&mut self, delay: &mut D, i2c: &mut I2C) -> Result<()> {
        self.require_mode(
            &[DeviceMode::Configure, DeviceMode::Armed, DeviceMode::Measuring],
            AS7331Error::NotInConfigurationMode,
        )?;

        self.write_register_async(ConfigRegister::Osr as u8, registers::OSR_ARMED, i2c)
            .await?;
        delay.delay_ms(SETTLE_MS).await;
        self.mode = DeviceMode::Armed;

        Ok(())
    }

    /// Sets the start bit.
    pub async fn trigger_async(&mut self, delay: &mut D, i2c: &mut I2C) -> Result<()> {
        self.require_mode(
            &[DeviceMode::Armed, DeviceMode::Measuring],
            AS7331Error::NotInMeasurementMode,
        )?;

        self.write_register_async(ConfigRegister::Osr as u8, registers::OSR_MEASURE, i2c)
            .await?;
        delay.delay_ms(TRIGGER_SETTLE_MS).await;
        self.mode = DeviceMode::Measuring;

        Ok(())
    }

    /// Powers the device down.
    pub async fn power_down_async(&mut self, i2c: &mut I2C) -> Result<()> {
        self.write_register_async(ConfigRegister::Osr as u8, registers::OSR_POWER_DOWN, i2c)
            .await?;
        self.mode = DeviceMode::PowerDown;

        Ok(())
    }

    async fn try_configure_sequence_async(
        &mut self,
        start: bool,
        delay: &mut D,
        i2c: &mut I2C,
    ) -> Result<()> {
        self.enter_configure_async(delay, i2c).await?;
        self.write_parameters_async(self.setting, self.config.divider, self.config.mode, i2c)
            .await?;
        self.enter_armed_async(delay, i2c).await?;
        if start {
            self.trigger_async(delay, i2c).await?;
        }

        Ok(())
    }

    async fn configure_sequence_async(
        &mut self,
        start: bool,
        delay: &mut D,
        i2c: &mut I2C,
    ) -> Result<()> {
        match self.try_configure_sequence_async(start, delay, i2c).await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.configuration_failed(e)),
        }
    }

    /// Programs a new gain and integration time.
    pub async fn reconfigure_async(
        &mut self,
        setting: Setting,
        delay: &mut D,
        i2c: &mut I2C,
    ) -> Result<()> {
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
        self.configure_sequence_async(start, delay, i2c).await
    }

    /// Starts or stops the measurement.
    pub async fn set_measurement_enabled_async(
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
            self.power_down_async(i2c).await?;
            self.dark = DarkOffset::Uncalibrated;
            self.enabled = false;
            log::info!("Measurement disabled, sensor powered down");
            return Ok(());
        }

        if self.mode == DeviceMode::PowerDown {
            self.configure_sequence_async(false, delay, i2c).await?;
        }
        if self.starts_continuously() {
            if let Err(e) = self.trigger_async(delay, i2c).await {
                return Err(self.configuration_failed(e));
            }
        }
        self.enabled = true;
        self.dark = DarkOffset::Uncalibrated;
        log::info!("Measurement enabled in {:?} mode", self.config.mode);

        if self.config.dark_calibration {
            // Sampling continues uncorrected if this fails
            let _ = self
                .calibrate_dark_offset_async(self.config.dark.samples, delay, i2c)
                .await;
        }

        Ok(())
    }

    /// Measures the dark offset as the mean of `samples` conversions.
    pub async fn calibrate_dark_offset_async(
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
                needs_trigger = self.trigger_async(delay, i2c).await.is_err();
            }
            if !needs_trigger {
                match self.read_status_async(i2c).await {
                    Ok(status) if has_new_data(status) => {
                        if let Ok(sample) = self.read_raw_sample_async(i2c).await {
                            accumulator.push(sample);
                            needs_trigger = !self.starts_continuously();
                        }
                    }
                    _ => {}
                }
            }

            delay.delay_ms(interval).await;
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

    /// Runs one measurement cycle, see [`AS7331::poll`].
    pub async fn poll_async<S: TelemetrySink>(
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
            if let Err(e) = self.trigger_async(delay, i2c).await {
                log::warn!("Measurement trigger failed: {:?}", e);
                return Err(e);
            }
        }

        self.wait_for_data_async(delay, i2c).await?;
        let raw = match self.read_raw_sample_async(i2c).await {
            Ok(raw) => raw,
            Err(e) => {
                log::warn!("Could not read results: {:?}", e);
                return Err(e);
            }
        };

        let measurement = self.evaluate(raw);
        self.publish_counts(sink, &measurement);

        let ranged = match self.range.step(self.setting, &raw) {
            Some(next) => {
                self.adopt_setting(next);
                let start = self.starts_continuously();
                self.configure_sequence_async(start, delay, i2c).await
            }
            None => Ok(()),
        };

        self.publish_irradiance(sink, &measurement);
        ranged?;

        Ok(Some(measurement))
    }

    /// Polls STATUS until the NDATA bit is set.
    pub async fn wait_for_data_async(&mut self, delay: &mut D, i2c: &mut I2C) -> Result<()> {
        let polls = self.ready_poll_limit();

        for attempt in 0..polls {
            if attempt > 0 {
                delay.delay_ms(READY_POLL_INTERVAL_MS).await;
            }

            let status = match self.read_status_async(i2c).await {
                Ok(status) => status,
                Err(e) => {
                    log::warn!("Could not read STATUS: {:?}", e);
                    return Err(e);
                }
            };
            if has_new_data(status) {
                return Ok(());
            }
        }

        log::warn!("No new data after {} status polls", polls);
        Err(AS7331Error::DataTimeout)
    }

    /// Reads the STATUS byte.
    pub async fn read_status_async(&mut self, i2c: &mut I2C) -> Result<u8> {
        let mut read_data = [0; 2];
        self.read_registers_async(OutputRegister::OsrStatus as u8, &mut read_data, i2c)
            .await?;

        Ok(read_data[1])
    }

    /// Read all 3 result registers in one i2c write-then-read operation
    pub async fn read_raw_sample_async(&mut self, i2c: &mut I2C) -> Result<RawSample> {
        let mut read_data = [0; 6];
        self.read_registers_async(OutputRegister::MRes1 as u8, &mut read_data, i2c)
            .await?;

        log::debug!("Read raw values: {:?}", read_data);

        Ok(registers::decode_results(&read_data))
    }

    /// Reads the device id and the mutation number of the sensor.
    pub async fn read_id_async(&mut self, i2c: &mut I2C) -> Result<(u8, u8)> {
        self.require_mode(&[DeviceMode::Configure], AS7331Error::NotInConfigurationMode)?;

        let mut read_data = [0; 1];
        self.read_registers_async(ConfigRegister::Agen as u8, &mut read_data, i2c)
            .await?;

        Ok((read_data[0] >> 4, read_data[0] & 0x0F))
    }

    /// Reads the chip temperature in degrees celsius.
    pub async fn read_temperature_async(&mut self, i2c: &mut I2C) -> Result<f32> {
        self.require_mode(
            &[DeviceMode::Armed, DeviceMode::Measuring],
            AS7331Error::NotInMeasurementMode,
        )?;

        let mut read_data = [0; 2];
        self.read_registers_async(OutputRegister::Temp as u8, &mut read_data, i2c)
            .await?;

        Ok(registers::temperature_celsius(u16::from_le_bytes(read_data)))
    }

    /// Writes a new value to a specific register
    pub async fn write_register_async(
        &mut self,
        register: u8,
        data: u8,
        i2c: &mut I2C,
    ) -> Result<()> {
        i2c.write(AS7331_ADDR, &[register, data])
            .await
            .map_err(|_| AS7331Error::WriteI2CError)?;

        Ok(())
    }

    /// Reads consecutive registers starting at `register`
    pub async fn read_registers_async(
        &mut self,
        register: u8,
        buffer: &mut [u8],
        i2c: &mut I2C,
    ) -> Result<()> {
        i2c.write_read(AS7331_ADDR, &[register], buffer)
            .await
            .map_err(|_| AS7331Error::ReadI2CError)?;

        Ok(())
    }
}

// async mocking of I2C currently not supported by embedded-hal-mock 0.8
// so the shared state machine is covered by the blocking tests
