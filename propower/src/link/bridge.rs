//! Ingestion bridge
//!
//! A single FIFO carries decoded samples, status lines and link control
//! messages from any number of producer threads to the one consumer that
//! owns the channel store. Producers never wait on the consumer: the lock is
//! held only to push one message or to swap the whole queue out.
//!
//! The queue is capped. Once full, the oldest pending data message is
//! evicted to make room; control messages are never evicted so that open and
//! close requests keep their order relative to each other.

use super::ConnectionParams;
use crate::data::{LineDecoder, Rejected, Sample};
use std::collections::VecDeque;
use std::mem;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

pub const DEFAULT_QUEUE_LIMIT: usize = 50_000;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Message {
    Sample(Sample),
    Status(String),
    Open(ConnectionParams),
    Close,
    TransportFailed { link: u64, reason: String },
}

impl Message {
    fn is_data(&self) -> bool {
        matches!(self, Message::Sample(_) | Message::Status(_))
    }
}

#[derive(Debug)]
struct Queue {
    pending: VecDeque<Message>,
    dropped: u64,
    limit: usize,
}

/// Consumer end of the bridge.
#[derive(Debug)]
pub(crate) struct Bridge {
    queue: Arc<Mutex<Queue>>,
}

/// Producer end of the bridge, cheap to clone.
#[derive(Debug, Clone)]
pub(crate) struct BridgeSender {
    queue: Arc<Mutex<Queue>>,
}

/// Everything pending at the time of a drain.
#[derive(Debug, Default)]
pub(crate) struct Drained {
    pub messages: VecDeque<Message>,
    /// Data messages evicted since the previous drain.
    pub dropped: u64,
}

impl Bridge {
    pub fn new(limit: usize) -> Bridge {
        Bridge {
            queue: Arc::new(Mutex::new(Queue {
                pending: VecDeque::new(),
                dropped: 0,
                limit: limit.max(1),
            })),
        }
    }

    pub fn sender(&self) -> BridgeSender {
        BridgeSender {
            queue: self.queue.clone(),
        }
    }

    pub fn drain(&self) -> Drained {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        Drained {
            messages: mem::take(&mut queue.pending),
            dropped: mem::take(&mut queue.dropped),
        }
    }
}

impl BridgeSender {
    pub fn push(&self, msg: Message) {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        if queue.pending.len() >= queue.limit {
            if let Some(i) = queue.pending.iter().position(Message::is_data) {
                queue.pending.remove(i);
                queue.dropped += 1;
            }
        }
        queue.pending.push_back(msg);
    }
}

/// Monotonic millisecond clock shared by the engine and its feeders.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    epoch: Instant,
}

impl Clock {
    pub fn new() -> Clock {
        Clock {
            epoch: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.epoch.elapsed()
    }

    pub fn now_ms(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

impl Default for Clock {
    fn default() -> Clock {
        Clock::new()
    }
}

/// Producer handle: decodes lines and hands the results to the engine.
///
/// It is `Send` and `Clone`; a transport thread owns one per connection.
#[derive(Debug, Clone)]
pub struct Feeder {
    sender: BridgeSender,
    decoder: Arc<LineDecoder>,
    clock: Clock,
    link: u64,
}

impl Feeder {
    pub(crate) fn new(sender: BridgeSender, decoder: Arc<LineDecoder>, clock: Clock) -> Feeder {
        Feeder {
            sender,
            decoder,
            clock,
            link: 0,
        }
    }

    /// Same bridge, with failures attributed to link `link`.
    pub(crate) fn for_link(&self, link: u64) -> Feeder {
        Feeder {
            link,
            ..self.clone()
        }
    }

    /// Decodes `line` stamped with the current time. See `feed_line_at`.
    pub fn feed_line(&self, line: &str) -> Result<(), Rejected> {
        self.feed_line_at(line, self.clock.now_ms())
    }

    /// Decodes `line` with an explicit timestamp, e.g. when replaying a
    /// capture. Samples and status lines are queued; the returned error is
    /// the classification of a line that did not yield a sample.
    pub fn feed_line_at(&self, line: &str, timestamp: u64) -> Result<(), Rejected> {
        match self.decoder.decode(line, timestamp) {
            Ok(sample) => {
                self.sender.push(Message::Sample(sample));
                Ok(())
            }
            Err(Rejected::Status(text)) => {
                self.sender.push(Message::Status(text.clone()));
                Err(Rejected::Status(text))
            }
            Err(rejected) => {
                log::trace!("dropped line {:?}: {}", line, rejected);
                Err(rejected)
            }
        }
    }

    /// Queues an already decoded sample.
    pub fn push_sample(&self, sample: Sample) {
        self.sender.push(Message::Sample(sample));
    }

    /// Reports that the link this feeder belongs to has failed for good.
    pub fn report_failure(&self, reason: impl Into<String>) {
        self.sender.push(Message::TransportFailed {
            link: self.link,
            reason: reason.into(),
        });
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Channel;

    fn sample(ts: u64) -> Message {
        Message::Sample(Sample {
            channel: Channel::new(1).unwrap(),
            voltage: 1.0,
            current: 1.0,
            power: 1.0,
            timestamp: ts,
        })
    }

    fn timestamps(drained: &Drained) -> Vec<u64> {
        drained
            .messages
            .iter()
            .filter_map(|m| match m {
                Message::Sample(s) => Some(s.timestamp),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn preserves_emission_order() {
        let bridge = Bridge::new(100);
        let tx = bridge.sender();
        tx.push(sample(1));
        tx.push(Message::Close);
        tx.push(sample(2));
        tx.push(Message::Open(ConnectionParams::new("tcp://x:1")));
        let drained = bridge.drain();
        assert_eq!(drained.dropped, 0);
        assert_eq!(
            drained.messages,
            vec![
                sample(1),
                Message::Close,
                sample(2),
                Message::Open(ConnectionParams::new("tcp://x:1")),
            ]
        );
        assert!(bridge.drain().messages.is_empty());
    }

    #[test]
    fn overflow_evicts_oldest_data_only() {
        let bridge = Bridge::new(4);
        let tx = bridge.sender();
        tx.push(Message::Close);
        for ts in 0..10 {
            tx.push(sample(ts));
        }
        let drained = bridge.drain();
        assert_eq!(drained.dropped, 7);
        assert_eq!(drained.messages.front(), Some(&Message::Close));
        assert_eq!(timestamps(&drained), vec![7, 8, 9]);

        // the counter resets after each drain
        tx.push(sample(10));
        assert_eq!(bridge.drain().dropped, 0);
    }

    #[test]
    fn concurrent_producers_keep_per_thread_order() {
        let bridge = Bridge::new(100_000);
        let handles: Vec<_> = (0..4u64)
            .map(|t| {
                let tx = bridge.sender();
                std::thread::spawn(move || {
                    for i in 0..1_000 {
                        tx.push(sample(t * 10_000 + i));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let stamps = timestamps(&bridge.drain());
        assert_eq!(stamps.len(), 4_000);
        for t in 0..4u64 {
            let own: Vec<u64> = stamps
                .iter()
                .copied()
                .filter(|s| s / 10_000 == t)
                .collect();
            assert!(own.windows(2).all(|w| w[0] < w[1]));
        }
    }

    #[test]
    fn decoded_samples_bypass_the_decoder() {
        let bridge = Bridge::new(16);
        let feeder = Feeder::new(bridge.sender(), Arc::new(LineDecoder::default()), Clock::new());
        feeder.feed_line_at("CH:1 V=1 V | I=1 A | P=1 W", 1).unwrap();
        if let Message::Sample(s) = sample(2) {
            feeder.push_sample(s);
        }
        feeder.feed_line_at("CH:1 V=1 V | I=1 A | P=1 W", 3).unwrap();

        let drained = bridge.drain();
        assert_eq!(timestamps(&drained), vec![1, 2, 3]);
        assert_eq!(drained.messages[1], sample(2));
    }

    #[test]
    fn feeder_classifies_lines() {
        let bridge = Bridge::new(16);
        let feeder = Feeder::new(bridge.sender(), Arc::new(LineDecoder::default()), Clock::new());
        assert!(feeder.feed_line_at("CH:2 V=1 V | I=1 A | P=1 W", 5).is_ok());
        assert!(matches!(
            feeder.feed_line_at("OK: INA226 #2 found", 6),
            Err(Rejected::Status(_))
        ));
        assert_eq!(feeder.feed_line_at("garbage", 7), Err(Rejected::Malformed));
        feeder.for_link(3).report_failure("gone");

        let drained = bridge.drain();
        assert_eq!(drained.messages.len(), 3);
        assert!(matches!(drained.messages[0], Message::Sample(s) if s.timestamp == 5));
        assert_eq!(
            drained.messages[1],
            Message::Status("OK: INA226 #2 found".to_string())
        );
        assert_eq!(
            drained.messages[2],
            Message::TransportFailed {
                link: 3,
                reason: "gone".to_string()
            }
        );
    }
}
