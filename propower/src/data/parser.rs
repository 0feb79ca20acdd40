//! Line decoder
//!
//! Converts one line of instrument output into a `Sample`. Measurement lines
//! look like
//!
//! ```text
//! CH:1 V=3.305 V | I=0.1052 A | P=0.347 W
//! ```
//!
//! Fields are separated by whitespace and/or `|`, unit suffixes are optional
//! and may be glued to the number. Without a suffix the instrument's SI units
//! (V, A, W) are assumed. Current and power are converted to mA and mW.
//!
//! Anything else is classified as a `Rejected` value, never an error that
//! would need to be propagated: status banners are surfaced to the user,
//! everything else is simply dropped.

use super::sample::{Channel, Sample};
use std::iter::Peekable;
use thiserror::Error;

/// Prefixes of the informational lines printed by the instrument firmware.
pub const DEFAULT_STATUS_PREFIXES: [&str; 5] = ["OK:", "ERR:", "ERROR:", "SUCCESS:", "System"];

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Rejected {
    #[error("status: {0}")]
    Status(String),
    #[error("channel {0} out of range")]
    ChannelOutOfRange(u32),
    #[error("malformed measurement line")]
    Malformed,
}

/// Accepted suffixes for a field and the factor converting to stored units.
/// The empty suffix is the protocol default.
struct FieldSpec {
    key: &'static str,
    units: &'static [(&'static str, f64)],
}

const VOLTAGE: FieldSpec = FieldSpec {
    key: "V=",
    units: &[("", 1.0), ("V", 1.0), ("mV", 1e-3)],
};

const CURRENT: FieldSpec = FieldSpec {
    key: "I=",
    units: &[("", 1e3), ("A", 1e3), ("mA", 1.0)],
};

const POWER: FieldSpec = FieldSpec {
    key: "P=",
    units: &[("", 1e3), ("W", 1e3), ("mW", 1.0)],
};

/// Decoder with a configurable set of status prefixes.
#[derive(Debug, Clone)]
pub struct LineDecoder {
    status_prefixes: Vec<String>,
}

impl Default for LineDecoder {
    fn default() -> LineDecoder {
        LineDecoder::new(DEFAULT_STATUS_PREFIXES.iter().map(|s| s.to_string()))
    }
}

impl LineDecoder {
    pub fn new<I: IntoIterator<Item = String>>(status_prefixes: I) -> LineDecoder {
        LineDecoder {
            status_prefixes: status_prefixes.into_iter().collect(),
        }
    }

    pub fn status_prefixes(&self) -> &[String] {
        &self.status_prefixes
    }

    pub fn decode(&self, line: &str, timestamp: u64) -> Result<Sample, Rejected> {
        decode_with(line, timestamp, &self.status_prefixes)
    }
}

/// Decodes `line` using the default status prefixes.
pub fn decode(line: &str, timestamp: u64) -> Result<Sample, Rejected> {
    decode_with(line, timestamp, &DEFAULT_STATUS_PREFIXES)
}

pub fn decode_with<S: AsRef<str>>(
    line: &str,
    timestamp: u64,
    status_prefixes: &[S],
) -> Result<Sample, Rejected> {
    let line = line.trim();
    if status_prefixes
        .iter()
        .any(|p| !p.as_ref().is_empty() && line.starts_with(p.as_ref()))
    {
        return Err(Rejected::Status(line.to_string()));
    }

    // The marker may be preceded by garbage from a partially received line.
    let start = line.find("CH:").ok_or(Rejected::Malformed)?;
    let mut tokens = line[start + 3..]
        .split(|c: char| c.is_whitespace() || c == '|')
        .filter(|t| !t.is_empty())
        .peekable();

    let number: u32 = tokens
        .next()
        .and_then(|t| t.parse().ok())
        .ok_or(Rejected::Malformed)?;
    let channel = u8::try_from(number)
        .ok()
        .and_then(Channel::new)
        .ok_or(Rejected::ChannelOutOfRange(number))?;

    let voltage = parse_field(&mut tokens, &VOLTAGE)?;
    let current = parse_field(&mut tokens, &CURRENT)?;
    let power = parse_field(&mut tokens, &POWER)?;

    Ok(Sample {
        channel,
        voltage,
        current,
        power,
        timestamp,
    })
}

fn parse_field<'a, I: Iterator<Item = &'a str>>(
    tokens: &mut Peekable<I>,
    field: &FieldSpec,
) -> Result<f64, Rejected> {
    let token = tokens.next().ok_or(Rejected::Malformed)?;
    let rest = token.strip_prefix(field.key).ok_or(Rejected::Malformed)?;
    // "V= 3.3" puts the number in its own token
    let rest = if rest.is_empty() {
        tokens.next().ok_or(Rejected::Malformed)?
    } else {
        rest
    };

    let split = rest
        .find(|c: char| !(c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E')))
        .unwrap_or(rest.len());
    let (number, glued_unit) = rest.split_at(split);
    let value: f64 = number.parse().map_err(|_| Rejected::Malformed)?;
    if !value.is_finite() {
        return Err(Rejected::Malformed);
    }

    let unit = if !glued_unit.is_empty() {
        glued_unit
    } else if tokens.peek().map_or(false, |next| {
        field
            .units
            .iter()
            .any(|(name, _)| !name.is_empty() && name == next)
    }) {
        tokens.next().unwrap_or("")
    } else {
        ""
    };

    field
        .units
        .iter()
        .find(|(name, _)| *name == unit)
        .map(|(_, factor)| value * factor)
        .ok_or(Rejected::Malformed)
}
