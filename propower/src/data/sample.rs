use std::fmt;

/// Number of measurement channels on the instrument.
pub const CHANNEL_COUNT: usize = 6;

/// A validated instrument channel, numbered `1..=CHANNEL_COUNT` as on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Channel(u8);

impl Channel {
    pub const FIRST: Channel = Channel(1);

    /// Returns `None` when `number` is outside `1..=CHANNEL_COUNT`.
    pub fn new(number: u8) -> Option<Channel> {
        if number >= 1 && (number as usize) <= CHANNEL_COUNT {
            Some(Channel(number))
        } else {
            None
        }
    }

    /// Channel number as printed by the instrument.
    pub fn number(&self) -> u8 {
        self.0
    }

    /// Zero based slot, suitable for indexing per-channel arrays.
    pub fn index(&self) -> usize {
        (self.0 - 1) as usize
    }

    pub fn all() -> impl Iterator<Item = Channel> {
        (1..=CHANNEL_COUNT as u8).map(Channel)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CH{}", self.0)
    }
}

/// One decoded measurement. Current and power are stored in milli-units
/// regardless of the unit the instrument transmitted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub channel: Channel,
    /// Volts.
    pub voltage: f64,
    /// Milliamperes.
    pub current: f64,
    /// Milliwatts.
    pub power: f64,
    /// Milliseconds since the engine was created.
    pub timestamp: u64,
}

/// The three quantities carried by every sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trace {
    Voltage,
    Current,
    Power,
}

impl Trace {
    pub const ALL: [Trace; 3] = [Trace::Voltage, Trace::Current, Trace::Power];

    pub fn value(&self, sample: &Sample) -> f64 {
        match self {
            Trace::Voltage => sample.voltage,
            Trace::Current => sample.current,
            Trace::Power => sample.power,
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            Trace::Voltage => "V",
            Trace::Current => "mA",
            Trace::Power => "mW",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Trace::Voltage => "voltage",
            Trace::Current => "current",
            Trace::Power => "power",
        }
    }
}

impl fmt::Display for Trace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
