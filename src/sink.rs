//! Telemetry outputs.
//!
//! Which outputs are bound is fixed in [`Config::outputs`](crate::Config) when
//! the driver is built; values for unbound outputs are dropped.

/// A value the driver publishes once per successful cycle.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Output {
    /// Dark corrected counts of channel A
    CountsA = 0,
    /// Dark corrected counts of channel B
    CountsB = 1,
    /// Dark corrected counts of channel C
    CountsC = 2,
    /// Channel A irradiance in W/m²
    IrradianceA = 3,
    /// Channel B irradiance in W/m²
    IrradianceB = 4,
    /// Channel C irradiance in W/m²
    IrradianceC = 5,
    /// UV index
    UvIndex = 6,
}

impl Output {
    pub const COUNTS: [Output; 3] = [Output::CountsA, Output::CountsB, Output::CountsC];
    pub const IRRADIANCE: [Output; 3] = [
        Output::IrradianceA,
        Output::IrradianceB,
        Output::IrradianceC,
    ];

    fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

/// Set of bound outputs.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct OutputSet(u8);

impl OutputSet {
    pub const NONE: Self = Self(0);
    pub const ALL: Self = Self(0x7F);

    pub fn with(self, output: Output) -> Self {
        Self(self.0 | output.bit())
    }

    pub fn without(self, output: Output) -> Self {
        Self(self.0 & !output.bit())
    }

    pub fn contains(self, output: Output) -> bool {
        self.0 & output.bit() != 0
    }
}

impl Default for OutputSet {
    fn default() -> Self {
        Self::ALL
    }
}

/// Receiver of published values. Publishing cannot fail and gives no
/// feedback to the driver.
pub trait TelemetrySink {
    fn publish(&mut self, output: Output, value: f32);
}

impl<F> TelemetrySink for F
where
    F: FnMut(Output, f32),
{
    fn publish(&mut self, output: Output, value: f32) {
        self(output, value)
    }
}

/// Discards everything.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoSink;

impl TelemetrySink for NoSink {
    fn publish(&mut self, _output: Output, _value: f32) {}
}

/// Forwards only bound outputs to the sink.
pub(crate) struct BoundSink<'a, S> {
    pub(crate) outputs: OutputSet,
    pub(crate) sink: &'a mut S,
}

impl<S: TelemetrySink> BoundSink<'_, S> {
    pub(crate) fn publish(&mut self, output: Output, value: f32) {
        if self.outputs.contains(output) {
            self.sink.publish(output, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_set() {
        let set = OutputSet::NONE.with(Output::UvIndex).with(Output::CountsB);
        assert!(set.contains(Output::UvIndex));
        assert!(set.contains(Output::CountsB));
        assert!(!set.contains(Output::CountsA));

        let set = OutputSet::ALL.without(Output::IrradianceC);
        assert!(!set.contains(Output::IrradianceC));
        assert!(set.contains(Output::IrradianceB));
    }

    #[test]
    fn test_bound_sink_drops_unbound_outputs() {
        let mut published = Vec::new();
        let mut sink = |output: Output, value: f32| published.push((output, value));

        let mut bound = BoundSink {
            outputs: OutputSet::NONE.with(Output::UvIndex),
            sink: &mut sink,
        };
        bound.publish(Output::CountsA, 1.0);
        bound.publish(Output::UvIndex, 2.0);

        assert_eq!(published, vec![(Output::UvIndex, 2.0)]);
    }
}
