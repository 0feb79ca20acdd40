//! Windowed statistics and energy integration over a channel buffer.

use super::buffer::ChannelBuffer;
use super::sample::{Sample, Trace};
use std::time::Duration;

const MS_PER_HOUR: f64 = 3_600_000.0;

/// Summary of one trace over a window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Summary {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub rms: f64,
}

/// Statistics for one channel over the most recent `window`.
///
/// Summaries are `None` when the window holds no samples.
#[derive(Debug, Clone, PartialEq)]
pub struct StatsResult {
    pub window: Duration,
    pub count: usize,
    pub voltage: Option<Summary>,
    pub current: Option<Summary>,
    pub power: Option<Summary>,
    /// Milliwatt-hours integrated over the window.
    pub energy_mwh: f64,
}

impl StatsResult {
    pub fn summary(&self, trace: Trace) -> Option<&Summary> {
        match trace {
            Trace::Voltage => self.voltage.as_ref(),
            Trace::Current => self.current.as_ref(),
            Trace::Power => self.power.as_ref(),
        }
    }

    pub fn is_undefined(&self) -> bool {
        self.count == 0
    }
}

#[derive(Default)]
struct Accumulator {
    count: usize,
    sum: f64,
    sum_sq: f64,
    min: f64,
    max: f64,
}

impl Accumulator {
    fn push(&mut self, v: f64) {
        if self.count == 0 {
            self.min = v;
            self.max = v;
        } else {
            self.min = self.min.min(v);
            self.max = self.max.max(v);
        }
        self.count += 1;
        self.sum += v;
        self.sum_sq += v * v;
    }

    fn finish(&self) -> Option<Summary> {
        if self.count == 0 {
            return None;
        }
        let n = self.count as f64;
        Some(Summary {
            min: self.min,
            max: self.max,
            avg: self.sum / n,
            rms: (self.sum_sq / n).sqrt(),
        })
    }
}

/// Start of the window ending at the newest sample.
fn window_start(buffer: &ChannelBuffer, window: Duration) -> Option<u64> {
    let t_end = buffer.latest()?.timestamp;
    let window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);
    Some(t_end.saturating_sub(window_ms))
}

pub fn compute_stats(buffer: &ChannelBuffer, window: Duration) -> StatsResult {
    let mut acc: [Accumulator; 3] = Default::default();
    let mut count = 0;

    let t_start = window_start(buffer, window);
    if let Some(t_start) = t_start {
        for sample in buffer.iter().rev().take_while(|s| s.timestamp >= t_start) {
            for (a, trace) in acc.iter_mut().zip(Trace::ALL) {
                a.push(trace.value(sample));
            }
            count += 1;
        }
    }

    let energy_mwh = t_start.map_or(0.0, |t| integrate_energy(buffer, t));
    let [voltage, current, power] = acc;

    StatsResult {
        window,
        count,
        voltage: voltage.finish(),
        current: current.finish(),
        power: power.finish(),
        energy_mwh,
    }
}

/// Trapezoidal integral of power from `t_start` to the newest sample, in mWh.
///
/// The pair straddling `t_start` is included in full, so a buffer sampled at
/// constant power over exactly the window yields `P * T`.
pub fn integrate_energy(buffer: &ChannelBuffer, t_start: u64) -> f64 {
    // Index of the newest sample older than the window, if any.
    let newer = buffer
        .iter()
        .rev()
        .take_while(|s| s.timestamp >= t_start)
        .count();
    let first = buffer.len().saturating_sub(newer + 1);

    let mut energy = 0.0;
    let mut prev: Option<&Sample> = None;
    for b in buffer.iter().skip(first) {
        if let Some(a) = prev {
            if b.timestamp >= t_start {
                let dt = (b.timestamp - a.timestamp) as f64;
                energy += (a.power + b.power) / 2.0 * dt / MS_PER_HOUR;
            }
        }
        prev = Some(b);
    }
    energy
}

/// Renders a possibly undefined reading for display, `--` when undefined.
pub fn format_reading(value: Option<f64>, precision: usize) -> String {
    match value {
        Some(v) if v.is_finite() => format!("{:.*}", precision, v),
        _ => "--".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::sample::Channel;

    fn buffer_from(points: &[(u64, f64)]) -> ChannelBuffer {
        let mut buf = ChannelBuffer::new(10_000, 2_000);
        for &(t, p) in points {
            buf.push(Sample {
                channel: Channel::new(1).unwrap(),
                voltage: 5.0,
                current: p / 5.0,
                power: p,
                timestamp: t,
            });
        }
        buf
    }

    fn close(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() <= tol
    }

    #[test]
    fn empty_buffer_is_undefined() {
        let buf = ChannelBuffer::new(10, 2);
        let stats = compute_stats(&buf, Duration::from_secs(10));
        assert!(stats.is_undefined());
        assert!(stats.voltage.is_none());
        assert!(stats.current.is_none());
        assert!(stats.power.is_none());
        assert_eq!(stats.energy_mwh, 0.0);
        assert_eq!(format_reading(stats.power.map(|s| s.avg), 3), "--");
    }

    #[test]
    fn single_sample() {
        let buf = buffer_from(&[(500, 12.0)]);
        let stats = compute_stats(&buf, Duration::from_secs(1));
        assert_eq!(stats.count, 1);
        let p = stats.power.unwrap();
        assert_eq!((p.min, p.max, p.avg, p.rms), (12.0, 12.0, 12.0, 12.0));
        assert_eq!(stats.energy_mwh, 0.0);
    }

    #[test]
    fn summary_values() {
        let buf = buffer_from(&[(0, 1.0), (10, -1.0), (20, 3.0), (30, 5.0)]);
        let stats = compute_stats(&buf, Duration::from_secs(60));
        let p = stats.power.unwrap();
        assert_eq!(stats.count, 4);
        assert_eq!(p.min, -1.0);
        assert_eq!(p.max, 5.0);
        assert!(close(p.avg, 2.0, 1e-12));
        assert!(close(p.rms, (36.0f64 / 4.0).sqrt(), 1e-12));
        assert_eq!(stats.voltage.unwrap().avg, 5.0);
    }

    #[test]
    fn window_excludes_old_samples() {
        let buf = buffer_from(&[(0, 100.0), (5_000, 1.0), (9_000, 1.0), (10_000, 1.0)]);
        let stats = compute_stats(&buf, Duration::from_secs(5));
        assert_eq!(stats.count, 3);
        assert_eq!(stats.power.unwrap().max, 1.0);
    }

    #[test]
    fn constant_power_energy() {
        // 250 mW sampled every 50 ms for exactly one minute
        let points: Vec<(u64, f64)> = (0..=1_200).map(|i| (i * 50, 250.0)).collect();
        let buf = buffer_from(&points);
        let stats = compute_stats(&buf, Duration::from_secs(60));
        let expected = 250.0 * 60_000.0 / MS_PER_HOUR;
        assert!(close(stats.energy_mwh, expected, 1e-9));
    }

    #[test]
    fn energy_includes_boundary_pair() {
        // window [1000, 2000]: the pair (500, 1500) straddles the start
        let buf = buffer_from(&[(0, 10.0), (500, 10.0), (1_500, 10.0), (2_000, 10.0)]);
        let e = integrate_energy(&buf, 1_000);
        let expected = 10.0 * 1_500.0 / MS_PER_HOUR;
        assert!(close(e, expected, 1e-12));
    }

    #[test]
    fn energy_trapezoid_on_ramp() {
        let buf = buffer_from(&[(0, 0.0), (1_000, 100.0)]);
        let e = integrate_energy(&buf, 0);
        assert!(close(e, 50.0 * 1_000.0 / MS_PER_HOUR, 1e-12));
    }

    #[test]
    fn huge_window_covers_everything() {
        let buf = buffer_from(&[(10, 1.0), (20, 2.0)]);
        let stats = compute_stats(&buf, Duration::from_secs(u64::MAX));
        assert_eq!(stats.count, 2);
    }
}
