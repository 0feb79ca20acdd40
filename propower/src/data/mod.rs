mod buffer;
mod parser;
mod sample;
mod stats;
mod view;

pub use buffer::{
    ChannelBuffer, ChannelSnapshot, ChannelStore, ClearTarget, StoreHandle, DEFAULT_CAPACITY,
    DEFAULT_MARGIN,
};
pub use parser::{decode, decode_with, LineDecoder, Rejected, DEFAULT_STATUS_PREFIXES};
pub use sample::{Channel, Sample, Trace, CHANNEL_COUNT};
pub use stats::{compute_stats, format_reading, integrate_energy, StatsResult, Summary};
pub use view::{
    autorange, project, project_trace, ScreenPoint, TraceProjection, TraceSelection, Viewport,
    ViewportRequest, ViewportResult, Zoom, ZOOM_MAX, ZOOM_MIN, ZOOM_STEP,
};
