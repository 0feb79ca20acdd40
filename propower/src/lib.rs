//! Ingestion and analytics for line-oriented multi-channel power monitors.
//!
//! Lines such as `CH:1 V=3.305 V | I=0.1052 A | P=0.347 W` are decoded into
//! samples on a link thread, handed over to the thread owning the `Engine`,
//! and kept in bounded per-channel histories from which windowed statistics,
//! energy and zoomable views are computed.

pub mod config;
pub mod data;
pub mod engine;
pub mod link;

pub use config::Config;
pub use engine::{Engine, Event};
pub use link::bridge::Feeder;
pub use link::ConnectionParams;
