//! Per-channel bounded sample history.
//!
//! Each channel keeps its samples in a `VecDeque` ordered by timestamp.
//! Appends are O(1); once a buffer grows past `capacity + margin` the oldest
//! samples are removed in a single batch so that exactly `capacity` remain.
//! The margin amortises trimming over many appends.

use super::sample::{Channel, Sample, CHANNEL_COUNT};
use std::collections::{vec_deque, VecDeque};
use std::ops::Deref;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};

pub const DEFAULT_CAPACITY: usize = 10_000;
pub const DEFAULT_MARGIN: usize = 2_000;

#[derive(Debug, Clone)]
pub struct ChannelBuffer {
    samples: VecDeque<Sample>,
    capacity: usize,
    margin: usize,
}

impl ChannelBuffer {
    pub fn new(capacity: usize, margin: usize) -> ChannelBuffer {
        let capacity = capacity.max(1);
        ChannelBuffer {
            samples: VecDeque::with_capacity((capacity + margin + 1).min(65_536)),
            capacity,
            margin,
        }
    }

    /// Appends a sample, returning how many old samples were trimmed.
    ///
    /// Timestamps are kept non-decreasing: a sample older than the current
    /// newest one is stored with the newest timestamp.
    pub fn push(&mut self, sample: Sample) -> usize {
        let timestamp = match self.samples.back() {
            Some(last) => sample.timestamp.max(last.timestamp),
            None => sample.timestamp,
        };
        self.samples.push_back(Sample {
            timestamp,
            ..sample
        });

        let len = self.samples.len();
        if len > self.capacity + self.margin {
            let excess = len - self.capacity;
            self.samples.drain(..excess);
            excess
        } else {
            0
        }
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn margin(&self) -> usize {
        self.margin
    }

    /// Sample at `index`, where 0 is the oldest retained sample.
    pub fn get(&self, index: usize) -> Option<&Sample> {
        self.samples.get(index)
    }

    pub fn latest(&self) -> Option<&Sample> {
        self.samples.back()
    }

    pub fn oldest(&self) -> Option<&Sample> {
        self.samples.front()
    }

    /// Oldest to newest.
    pub fn iter(&self) -> vec_deque::Iter<'_, Sample> {
        self.samples.iter()
    }
}

impl<'a> IntoIterator for &'a ChannelBuffer {
    type Item = &'a Sample;
    type IntoIter = vec_deque::Iter<'a, Sample>;

    fn into_iter(self) -> Self::IntoIter {
        self.samples.iter()
    }
}

/// Which buffers a clear applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearTarget {
    Channel(Channel),
    All,
}

/// The full set of channel buffers.
#[derive(Debug, Clone)]
pub struct ChannelStore {
    buffers: [ChannelBuffer; CHANNEL_COUNT],
}

impl Default for ChannelStore {
    fn default() -> ChannelStore {
        ChannelStore::new(DEFAULT_CAPACITY, DEFAULT_MARGIN)
    }
}

impl ChannelStore {
    pub fn new(capacity: usize, margin: usize) -> ChannelStore {
        ChannelStore {
            buffers: std::array::from_fn(|_| ChannelBuffer::new(capacity, margin)),
        }
    }

    /// Routes the sample to its channel buffer. Returns the number of
    /// samples trimmed from that buffer.
    pub fn append(&mut self, sample: Sample) -> usize {
        self.buffers[sample.channel.index()].push(sample)
    }

    pub fn clear(&mut self, target: ClearTarget) {
        match target {
            ClearTarget::Channel(channel) => self.buffers[channel.index()].clear(),
            ClearTarget::All => self.buffers.iter_mut().for_each(ChannelBuffer::clear),
        }
    }

    pub fn buffer(&self, channel: Channel) -> &ChannelBuffer {
        &self.buffers[channel.index()]
    }

    pub fn total_len(&self) -> usize {
        self.buffers.iter().map(ChannelBuffer::len).sum()
    }
}

/// Cloneable, thread safe handle to a `ChannelStore`.
///
/// Only the engine writes through it; any thread may take snapshots.
#[derive(Debug, Clone, Default)]
pub struct StoreHandle {
    inner: Arc<RwLock<ChannelStore>>,
}

impl StoreHandle {
    pub fn new(store: ChannelStore) -> StoreHandle {
        StoreHandle {
            inner: Arc::new(RwLock::new(store)),
        }
    }

    /// Read-only view of one channel. Holds the read lock until dropped, and
    /// every store write (the engine's `process()` and `clear()`) blocks
    /// meanwhile. Taking a second lock on the same thread while holding one
    /// may deadlock, so keep snapshots short lived.
    pub fn snapshot(&self, channel: Channel) -> ChannelSnapshot<'_> {
        ChannelSnapshot {
            guard: self.inner.read().unwrap_or_else(PoisonError::into_inner),
            channel,
        }
    }

    pub(crate) fn write<R>(&self, f: impl FnOnce(&mut ChannelStore) -> R) -> R {
        let mut store = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut store)
    }
}

/// Read-locked view of a single channel buffer.
pub struct ChannelSnapshot<'a> {
    guard: RwLockReadGuard<'a, ChannelStore>,
    channel: Channel,
}

impl ChannelSnapshot<'_> {
    pub fn channel(&self) -> Channel {
        self.channel
    }
}

impl Deref for ChannelSnapshot<'_> {
    type Target = ChannelBuffer;

    fn deref(&self) -> &ChannelBuffer {
        self.guard.buffer(self.channel)
    }
}
