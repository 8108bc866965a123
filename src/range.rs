//! Auto-ranging of gain and integration time.
//!
//! The controller looks at the peak of a raw sample (before any dark offset
//! is removed, so it sees the real state of the ADC) and moves at most one of
//! the two parameters by one step:
//!
//! * saturating (`peak >= high`): shorten the integration time, once it is
//!   at its fastest reduce the gain;
//! * starving (`peak <= low`): raise the gain, once it is at its maximum
//!   lengthen the integration time.

use crate::config::Setting;
use crate::{AS7331Error, RawSample, Result};

/// Count window the controller tries to keep the peak channel in.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RangeLimits {
    /// Peak at or above which sensitivity is reduced (about 90 % of full scale).
    pub high: u16,
    /// Peak at or below which sensitivity is increased.
    pub low: u16,
}

impl Default for RangeLimits {
    fn default() -> Self {
        Self {
            high: 60_000,
            low: 800,
        }
    }
}

impl RangeLimits {
    pub fn validate(&self) -> Result<()> {
        if self.low >= self.high {
            return Err(AS7331Error::InvalidRange);
        }

        Ok(())
    }
}

/// Decides gain/time steps from raw samples.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RangeController {
    limits: RangeLimits,
    auto_gain: bool,
    auto_time: bool,
}

impl RangeController {
    pub fn new(limits: RangeLimits, auto_gain: bool, auto_time: bool) -> Self {
        Self {
            limits,
            auto_gain,
            auto_time,
        }
    }

    /// Whether the controller can ever change anything.
    pub fn is_active(&self) -> bool {
        self.auto_gain || self.auto_time
    }

    pub fn limits(&self) -> RangeLimits {
        self.limits
    }

    /// Returns the setting to switch to, or `None` if the sample is inside the
    /// window or the parameter to move is already at its limit.
    pub fn step(&self, current: Setting, raw: &RawSample) -> Option<Setting> {
        let peak = raw.peak();

        if peak >= self.limits.high {
            if let Some(time) = current.time.shorter().filter(|_| self.auto_time) {
                return Some(Setting { time, ..current });
            }
            if let Some(gain) = current.gain.less_sensitive().filter(|_| self.auto_gain) {
                return Some(Setting { gain, ..current });
            }
        } else if peak <= self.limits.low {
            if let Some(gain) = current.gain.more_sensitive().filter(|_| self.auto_gain) {
                return Some(Setting { gain, ..current });
            }
            if let Some(time) = current.time.longer().filter(|_| self.auto_time) {
                return Some(Setting { time, ..current });
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Gain, IntegrationTime};

    fn controller() -> RangeController {
        RangeController::new(RangeLimits::default(), true, true)
    }

    fn sample(peak: u16) -> RawSample {
        RawSample {
            a: peak / 2,
            b: peak,
            c: 10,
        }
    }

    #[test]
    fn test_saturation_at_fastest_time_reduces_gain() {
        let current = Setting::new(Gain::X128, IntegrationTime::Ms1);
        let next = controller().step(current, &sample(61_000)).unwrap();

        assert_eq!(next.gain.code(), 5);
        assert_eq!(next.time.code(), 0);
    }

    #[test]
    fn test_saturation_shortens_time_first() {
        let current = Setting::new(Gain::X128, IntegrationTime::Ms16);
        let next = controller().step(current, &sample(60_000)).unwrap();

        assert_eq!(next, Setting::new(Gain::X128, IntegrationTime::Ms8));
    }

    #[test]
    fn test_starving_at_max_gain_lengthens_time() {
        let current = Setting::new(Gain::X2048, IntegrationTime::Ms32);
        let next = controller().step(current, &sample(150)).unwrap();

        assert_eq!(next.time.code(), 6);
        assert_eq!(next.gain.code(), 0);
    }

    #[test]
    fn test_starving_raises_gain_first() {
        let current = Setting::new(Gain::X64, IntegrationTime::Ms32);
        let next = controller().step(current, &sample(800)).unwrap();

        assert_eq!(next, Setting::new(Gain::X128, IntegrationTime::Ms32));
    }

    #[test]
    fn test_inside_window_keeps_setting() {
        let current = Setting::new(Gain::X64, IntegrationTime::Ms16);
        assert_eq!(controller().step(current, &sample(801)), None);
        assert_eq!(controller().step(current, &sample(59_999)), None);
    }

    #[test]
    fn test_extremes_do_not_wrap() {
        let least = Setting::new(Gain::X1, IntegrationTime::Ms1);
        assert_eq!(controller().step(least, &sample(u16::MAX)), None);

        let most = Setting::new(Gain::X2048, IntegrationTime::Ms128);
        assert_eq!(controller().step(most, &sample(0)), None);
    }

    #[test]
    fn test_saturation_changes_exactly_one_parameter() {
        for g in 0..=Gain::MAX_CODE {
            for t in 0..=IntegrationTime::MAX_CODE {
                let current = Setting::new(
                    Gain::from_code(g).unwrap(),
                    IntegrationTime::from_code(t).unwrap(),
                );

                match controller().step(current, &sample(65_000)) {
                    Some(next) if next.time != current.time => {
                        assert_eq!(next.time.code() + 1, t);
                        assert_eq!(next.gain, current.gain);
                    }
                    Some(next) => {
                        assert_eq!(t, 0);
                        assert_eq!(next.gain.code(), g + 1);
                    }
                    None => {
                        assert_eq!(t, 0);
                        assert_eq!(g, Gain::MAX_CODE);
                    }
                }
            }
        }
    }

    #[test]
    fn test_disabled_parameters_are_left_alone() {
        let time_only = RangeController::new(RangeLimits::default(), false, true);
        let current = Setting::new(Gain::X64, IntegrationTime::Ms1);
        assert_eq!(time_only.step(current, &sample(62_000)), None);

        // with auto time off a saturating sample goes straight to the gain
        let gain_only = RangeController::new(RangeLimits::default(), true, false);
        let current = Setting::new(Gain::X64, IntegrationTime::Ms16);
        assert_eq!(
            gain_only.step(current, &sample(62_000)),
            Some(Setting::new(Gain::X32, IntegrationTime::Ms16))
        );

        let off = RangeController::new(RangeLimits::default(), false, false);
        assert!(!off.is_active());
        assert_eq!(off.step(current, &sample(0)), None);
    }

    #[test]
    fn test_limits_validation() {
        assert_eq!(RangeLimits::default().validate(), Ok(()));
        assert_eq!(
            RangeLimits { high: 10, low: 10 }.validate(),
            Err(AS7331Error::InvalidRange)
        );
    }
}
