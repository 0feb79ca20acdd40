//! Viewport projection
//!
//! Maps a scroll offset and zoom factor onto a channel buffer and produces
//! what a renderer needs to draw: screen positioned points per trace and an
//! autoranged scale. Screen position `width - 1` is the right edge, which
//! shows the newest visible sample.

use super::buffer::ChannelBuffer;
use super::sample::Trace;

pub const ZOOM_MIN: f64 = 0.1;
pub const ZOOM_MAX: f64 = 50.0;
pub const ZOOM_STEP: f64 = 1.2;

/// Below this magnitude the autorange falls back to `AUTORANGE_FLOOR`.
pub const AUTORANGE_MIN_PEAK: f64 = 0.1;
pub const AUTORANGE_FLOOR: f64 = 1.0;
pub const AUTORANGE_HEADROOM: f64 = 1.2;

/// Screen units per sample, always within `[ZOOM_MIN, ZOOM_MAX]`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Zoom(f64);

impl Default for Zoom {
    fn default() -> Zoom {
        Zoom(1.0)
    }
}

impl Zoom {
    /// Clamps into range; non-finite input gives the default zoom.
    pub fn new(value: f64) -> Zoom {
        if value.is_finite() {
            Zoom(value.clamp(ZOOM_MIN, ZOOM_MAX))
        } else {
            Zoom::default()
        }
    }

    pub fn value(&self) -> f64 {
        self.0
    }

    pub fn zoomed_in(&self) -> Zoom {
        Zoom::new(self.0 * ZOOM_STEP)
    }

    pub fn zoomed_out(&self) -> Zoom {
        Zoom::new(self.0 / ZOOM_STEP)
    }
}

/// Which traces a projection covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceSelection {
    pub voltage: bool,
    pub current: bool,
    pub power: bool,
}

impl Default for TraceSelection {
    fn default() -> TraceSelection {
        TraceSelection {
            voltage: true,
            current: true,
            power: true,
        }
    }
}

impl TraceSelection {
    pub fn only(trace: Trace) -> TraceSelection {
        let mut sel = TraceSelection {
            voltage: false,
            current: false,
            power: false,
        };
        sel.set(trace, true);
        sel
    }

    pub fn contains(&self, trace: Trace) -> bool {
        match trace {
            Trace::Voltage => self.voltage,
            Trace::Current => self.current,
            Trace::Power => self.power,
        }
    }

    pub fn set(&mut self, trace: Trace, on: bool) {
        match trace {
            Trace::Voltage => self.voltage = on,
            Trace::Current => self.current = on,
            Trace::Power => self.power = on,
        }
    }

    pub fn toggle(&mut self, trace: Trace) {
        self.set(trace, !self.contains(trace));
    }

    pub fn iter(&self) -> impl Iterator<Item = Trace> + '_ {
        Trace::ALL.into_iter().filter(|t| self.contains(*t))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportRequest {
    /// Samples back from the newest one.
    pub offset: usize,
    pub zoom: Zoom,
    /// Screen units available horizontally.
    pub width: usize,
    pub traces: TraceSelection,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenPoint {
    pub x: f64,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TraceProjection {
    pub trace: Trace,
    /// Ordered from the right edge leftwards.
    pub points: Vec<ScreenPoint>,
    /// Autoranged full scale for this trace.
    pub scale: f64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ViewportResult {
    pub traces: Vec<TraceProjection>,
}

impl ViewportResult {
    pub fn trace(&self, trace: Trace) -> Option<&TraceProjection> {
        self.traces.iter().find(|p| p.trace == trace)
    }
}

/// Scale with headroom for a peak absolute value.
pub fn autorange(peak: f64) -> f64 {
    let peak = if peak < AUTORANGE_MIN_PEAK {
        AUTORANGE_FLOOR
    } else {
        peak
    };
    peak * AUTORANGE_HEADROOM
}

pub fn project_trace(
    buffer: &ChannelBuffer,
    offset: usize,
    zoom: Zoom,
    width: usize,
    trace: Trace,
) -> TraceProjection {
    let mut points = Vec::with_capacity(width);
    let mut peak: f64 = 0.0;

    if let Some(newest) = buffer.len().checked_sub(1) {
        for p in 0..width {
            let back = offset as f64 + (p as f64 / zoom.value()).floor();
            if back > newest as f64 {
                break;
            }
            let Some(sample) = buffer.get(newest - back as usize) else {
                break;
            };
            let value = trace.value(sample);
            peak = peak.max(value.abs());
            points.push(ScreenPoint {
                x: (width - 1 - p) as f64,
                value,
            });
        }
    }

    TraceProjection {
        trace,
        points,
        scale: autorange(peak),
    }
}

pub fn project(buffer: &ChannelBuffer, request: &ViewportRequest) -> ViewportResult {
    ViewportResult {
        traces: request
            .traces
            .iter()
            .map(|trace| project_trace(buffer, request.offset, request.zoom, request.width, trace))
            .collect(),
    }
}

/// Interactive pan and zoom state for one view.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Viewport {
    pub offset: usize,
    pub zoom: Zoom,
}

impl Viewport {
    pub fn zoom_in(&mut self) {
        self.zoom = self.zoom.zoomed_in();
    }

    pub fn zoom_out(&mut self) {
        self.zoom = self.zoom.zoomed_out();
    }

    /// Moves towards older samples, never past the oldest retained one.
    pub fn scroll_back(&mut self, samples: usize, history: usize) {
        self.offset = self
            .offset
            .saturating_add(samples)
            .min(history.saturating_sub(1));
    }

    pub fn scroll_forward(&mut self, samples: usize) {
        self.offset = self.offset.saturating_sub(samples);
    }

    pub fn reset(&mut self) {
        *self = Viewport::default();
    }

    pub fn request(&self, width: usize, traces: TraceSelection) -> ViewportRequest {
        ViewportRequest {
            offset: self.offset,
            zoom: self.zoom,
            width,
            traces,
        }
    }
}
