// This example demonstrates how to use the AS7331 sensor with a Raspberry Pi.
// It is so far untested, but should be a good reference for any kind of embedded system.

use as7331::{Config, Output, Profile, AS7331};
use embedded_hal::blocking::delay::DelayMs;
use linux_embedded_hal as hal;

fn main() {
    let mut i2c = hal::I2cdev::new("/dev/i2c-1").unwrap();
    let mut delay = hal::Delay;

    // Outdoor preset, auto-ranging and dark offset compensation stay on
    let config = Config::default().with_profile(Profile::Outdoor);

    // Create a new AS7331 instance, this also starts the measurement
    let mut as7331 = AS7331::new(config, &mut delay, &mut i2c).unwrap();
    as7331.dump_config();

    match as7331.read_temperature(&mut i2c) {
        Ok(celsius) => log::info!("Chip temperature: {:.1} °C", celsius),
        Err(e) => log::error!("Error reading temperature: {:?}", e),
    }

    let mut sink = |output: Output, value: f32| log::info!("{:?}: {}", output, value);

    // Measure for 5 minutes
    for _ in 0..300 {
        match as7331.poll(&mut delay, &mut i2c, &mut sink) {
            Ok(Some(measurement)) => log::info!("UV index: {:.2}", measurement.uv_index),
            Ok(None) => log::info!("Measurement disabled"),
            Err(e) => log::error!("Error reading sensor: {:?}", e),
        }
        delay.delay_ms(1000u32);
    }

    // Stop the measurement (sensor will go to power down)
    match as7331.set_measurement_enabled(false, &mut delay, &mut i2c) {
        Ok(_) => log::info!("Measurement stopped"),
        Err(e) => log::error!("Error stopping measurement: {:?}", e),
    }

    // Just some loop so we never return
    loop {
        delay.delay_ms(1000u32);
    }
}
