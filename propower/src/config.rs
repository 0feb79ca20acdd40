//! Engine configuration.
//!
//! Defaults suit the six channel instrument at its usual 20 Hz line rate.
//! Buffer sizes and the bridge cap can be overridden from the environment
//! with `PROPOWER_BUFFER_CAPACITY`, `PROPOWER_BUFFER_MARGIN` and
//! `PROPOWER_QUEUE_LIMIT`.

use crate::data::{DEFAULT_CAPACITY, DEFAULT_MARGIN, DEFAULT_STATUS_PREFIXES};
use crate::link::bridge::DEFAULT_QUEUE_LIMIT;
use std::env;

pub const DEFAULT_VIEW_WIDTH: usize = 800;

const MIN_CAPACITY: usize = 16;
const MIN_QUEUE_LIMIT: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Samples retained per channel after a trim.
    pub buffer_capacity: usize,
    /// Extra samples allowed to accumulate before trimming.
    pub buffer_margin: usize,
    /// Messages pending in the ingestion bridge before the oldest data is dropped.
    pub queue_limit: usize,
    /// Screen width used by `Engine::project`.
    pub view_width: usize,
    pub status_prefixes: Vec<String>,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            buffer_capacity: DEFAULT_CAPACITY,
            buffer_margin: DEFAULT_MARGIN,
            queue_limit: DEFAULT_QUEUE_LIMIT,
            view_width: DEFAULT_VIEW_WIDTH,
            status_prefixes: DEFAULT_STATUS_PREFIXES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

fn env_size(name: &str, default: usize, min_size: usize) -> usize {
    if let Ok(req) = env::var(name) {
        std::cmp::max(req.trim().parse().unwrap_or(default), min_size)
    } else {
        default
    }
}

impl Config {
    /// Defaults, with environment overrides applied.
    pub fn from_env() -> Config {
        Config::default().with_env()
    }

    pub fn with_env(self) -> Config {
        Config {
            buffer_capacity: env_size("PROPOWER_BUFFER_CAPACITY", self.buffer_capacity, MIN_CAPACITY),
            buffer_margin: env_size("PROPOWER_BUFFER_MARGIN", self.buffer_margin, 0),
            queue_limit: env_size("PROPOWER_QUEUE_LIMIT", self.queue_limit, MIN_QUEUE_LIMIT),
            ..self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_overrides_respect_minimums() {
        env::set_var("PROPOWER_BUFFER_CAPACITY", "4");
        env::set_var("PROPOWER_BUFFER_MARGIN", "250");
        env::set_var("PROPOWER_QUEUE_LIMIT", "not a number");
        let cfg = Config::from_env();
        env::remove_var("PROPOWER_BUFFER_CAPACITY");
        env::remove_var("PROPOWER_BUFFER_MARGIN");
        env::remove_var("PROPOWER_QUEUE_LIMIT");

        assert_eq!(cfg.buffer_capacity, MIN_CAPACITY);
        assert_eq!(cfg.buffer_margin, 250);
        assert_eq!(cfg.queue_limit, DEFAULT_QUEUE_LIMIT);
        assert_eq!(cfg.status_prefixes.len(), DEFAULT_STATUS_PREFIXES.len());
    }
}
