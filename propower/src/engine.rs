//! The ingestion and analytics engine.
//!
//! An `Engine` owns the channel store and the consumer end of the ingestion
//! bridge. Producers (the link thread, or any code holding a `Feeder`) only
//! ever enqueue; the thread that owns the engine calls `process()` at its
//! refresh rate, which applies everything queued in order and reports what
//! happened as `Event`s. Queries (`stats`, `project`, snapshots) read the
//! store directly.

use crate::config::Config;
use crate::data::{
    self, Channel, ChannelSnapshot, ChannelStore, ClearTarget, LineDecoder, Rejected, StatsResult,
    StoreHandle, TraceSelection, ViewportRequest, ViewportResult, Zoom,
};
use crate::link::bridge::{Bridge, BridgeSender, Clock, Feeder, Message};
use crate::link::{Connection, ConnectionParams, Connector, PortConnector};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Things the owner of the engine should know about, in order of occurrence.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Informational line printed by the instrument.
    Status(String),
    Connected(String),
    ConnectFailed { url: String, reason: String },
    /// The link was closed on request.
    Disconnected,
    /// The link failed; it has been closed and the history kept.
    TransportError(String),
    /// Pending data was discarded because the bridge was full.
    SamplesDropped(u64),
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Status(text) => write!(f, "{}", text),
            Event::Connected(url) => write!(f, "connected to {}", url),
            Event::ConnectFailed { url, reason } => {
                write!(f, "failed to connect to {}: {}", url, reason)
            }
            Event::Disconnected => write!(f, "disconnected"),
            Event::TransportError(reason) => write!(f, "link error: {}", reason),
            Event::SamplesDropped(n) => write!(f, "{} pending samples dropped", n),
        }
    }
}

struct Link {
    id: u64,
    url: String,
    connection: Box<dyn Connection>,
}

pub struct Engine {
    config: Config,
    clock: Clock,
    bridge: Bridge,
    control: BridgeSender,
    feeder: Feeder,
    store: StoreHandle,
    connector: Box<dyn Connector>,
    link: Option<Link>,
    last_link_id: u64,
}

impl Engine {
    /// Engine opening serial and TCP links.
    pub fn new(config: Config) -> Engine {
        Engine::with_connector(config, Box::new(PortConnector))
    }

    pub fn with_connector(config: Config, connector: Box<dyn Connector>) -> Engine {
        let clock = Clock::new();
        let bridge = Bridge::new(config.queue_limit);
        let decoder = Arc::new(LineDecoder::new(config.status_prefixes.iter().cloned()));
        let feeder = Feeder::new(bridge.sender(), decoder, clock);
        let store = StoreHandle::new(ChannelStore::new(
            config.buffer_capacity,
            config.buffer_margin,
        ));
        Engine {
            control: bridge.sender(),
            config,
            clock,
            bridge,
            feeder,
            store,
            connector,
            link: None,
            last_link_id: 0,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Time since the engine was created; sample timestamps count from here.
    pub fn uptime(&self) -> Duration {
        self.clock.elapsed()
    }

    /// A producer handle for feeding lines from another thread.
    pub fn feeder(&self) -> Feeder {
        self.feeder.clone()
    }

    pub fn feed_line(&self, line: &str) -> Result<(), Rejected> {
        self.feeder.feed_line(line)
    }

    /// Requests a new link. Applied by the next `process()`, after anything
    /// queued before it; a link still open at that point is closed first.
    pub fn open_connection(&self, params: ConnectionParams) {
        self.control.push(Message::Open(params));
    }

    /// Requests the current link be closed, after data queued before it.
    pub fn close_connection(&self) {
        self.control.push(Message::Close);
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    pub fn connection_url(&self) -> Option<&str> {
        self.link.as_ref().map(|l| l.url.as_str())
    }

    /// Applies everything queued since the last call.
    pub fn process(&mut self) -> Vec<Event> {
        let drained = self.bridge.drain();
        let mut events = Vec::new();
        if drained.dropped > 0 {
            log::warn!("ingestion queue full, dropped {} messages", drained.dropped);
            events.push(Event::SamplesDropped(drained.dropped));
        }

        let mut messages = drained.messages.into_iter().peekable();
        while let Some(msg) = messages.next() {
            match msg {
                Message::Sample(first) => {
                    // Apply a run of samples under a single write lock.
                    self.store.write(|store| {
                        store.append(first);
                        while let Some(Message::Sample(_)) = messages.peek() {
                            if let Some(Message::Sample(s)) = messages.next() {
                                store.append(s);
                            }
                        }
                    });
                }
                Message::Status(text) => {
                    log::info!("instrument: {}", text);
                    events.push(Event::Status(text));
                }
                Message::Open(params) => self.apply_open(params, &mut events),
                Message::Close => self.apply_close(&mut events),
                Message::TransportFailed { link, reason } => {
                    self.apply_failure(link, reason, &mut events)
                }
            }
        }
        events
    }

    fn apply_open(&mut self, params: ConnectionParams, events: &mut Vec<Event>) {
        if self.link.is_some() {
            self.apply_close(events);
        }
        self.last_link_id += 1;
        let id = self.last_link_id;
        match self.connector.connect(&params, self.feeder.for_link(id)) {
            Ok(connection) => {
                log::info!("connected to {}", params.url);
                events.push(Event::Connected(params.url.clone()));
                self.link = Some(Link {
                    id,
                    url: params.url,
                    connection,
                });
            }
            Err(e) => {
                log::warn!("failed to connect to {}: {}", params.url, e);
                events.push(Event::ConnectFailed {
                    url: params.url,
                    reason: e.to_string(),
                });
            }
        }
    }

    fn apply_close(&mut self, events: &mut Vec<Event>) {
        if let Some(link) = self.link.take() {
            link.connection.close();
            log::info!("disconnected from {}", link.url);
            events.push(Event::Disconnected);
        }
    }

    fn apply_failure(&mut self, id: u64, reason: String, events: &mut Vec<Event>) {
        if self.link.as_ref().map_or(true, |link| link.id != id) {
            // The link it came from was already closed.
            log::debug!("ignoring failure of closed link {}: {}", id, reason);
            return;
        }
        if let Some(link) = self.link.take() {
            link.connection.close();
        }
        log::warn!("link error: {}", reason);
        events.push(Event::TransportError(reason));
    }

    /// Cloneable handle for reading the store from other threads.
    pub fn store(&self) -> StoreHandle {
        self.store.clone()
    }

    /// Read-only view of one channel; holds a read lock while alive, so
    /// `process()` and `clear()` wait until it is dropped.
    pub fn channel_snapshot(&self, channel: Channel) -> ChannelSnapshot<'_> {
        self.store.snapshot(channel)
    }

    pub fn stats(&self, channel: Channel, window: Duration) -> StatsResult {
        data::compute_stats(&self.channel_snapshot(channel), window)
    }

    /// Projects all traces of `channel` at the configured view width.
    pub fn project(&self, channel: Channel, offset: usize, zoom: Zoom) -> ViewportResult {
        self.project_with(
            channel,
            &ViewportRequest {
                offset,
                zoom,
                width: self.config.view_width,
                traces: TraceSelection::default(),
            },
        )
    }

    pub fn project_with(&self, channel: Channel, request: &ViewportRequest) -> ViewportResult {
        data::project(&self.channel_snapshot(channel), request)
    }

    /// Empties buffers immediately. Samples still queued are applied by the
    /// next `process()`. Waits for outstanding snapshots to be dropped.
    pub fn clear(&mut self, target: ClearTarget) {
        self.store.write(|store| store.clear(target));
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Some(link) = self.link.take() {
            link.connection.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ch(n: u8) -> Channel {
        Channel::new(n).unwrap()
    }

    #[test]
    fn lines_become_visible_after_process() {
        let mut engine = Engine::new(Config::default());
        engine
            .feed_line("CH:3 V=5.0 V | I=0.2 A | P=1.0 W")
            .unwrap();
        assert!(engine.channel_snapshot(ch(3)).is_empty());

        let events = engine.process();
        assert!(events.is_empty());
        let snap = engine.channel_snapshot(ch(3));
        assert_eq!(snap.len(), 1);
        assert_eq!(snap.latest().unwrap().power, 1000.0);
    }

    #[test]
    fn status_lines_become_events() {
        let mut engine = Engine::new(Config::default());
        let _ = engine.feed_line("System ready, 2 monitors");
        let _ = engine.feed_line("not a measurement");
        assert_eq!(
            engine.process(),
            vec![Event::Status("System ready, 2 monitors".to_string())]
        );
    }

    #[test]
    fn queue_overflow_reports_once() {
        let mut engine = Engine::new(Config {
            queue_limit: 10,
            ..Config::default()
        });
        let feeder = engine.feeder();
        for i in 0..25u64 {
            feeder
                .feed_line_at("CH:1 V=1 V | I=1 A | P=1 W", i)
                .unwrap();
        }
        let events = engine.process();
        assert_eq!(events, vec![Event::SamplesDropped(15)]);
        let snap = engine.channel_snapshot(ch(1));
        assert_eq!(snap.len(), 10);
        assert_eq!(snap.oldest().unwrap().timestamp, 15);
    }

    #[test]
    fn invalid_url_fails_to_connect() {
        let mut engine = Engine::new(Config::default());
        engine.open_connection(ConnectionParams::new("carrier-pigeon://coop"));
        let events = engine.process();
        assert!(matches!(&events[..], [Event::ConnectFailed { .. }]));
        assert!(!engine.is_connected());
    }

    #[test]
    fn clear_and_queries() {
        let mut engine = Engine::new(Config {
            view_width: 4,
            ..Config::default()
        });
        let feeder = engine.feeder();
        for i in 0..10u64 {
            let line = format!("CH:2 V={} V | I=0.1 A | P=0.5 W", i);
            feeder.feed_line_at(&line, i * 100).unwrap();
        }
        engine.process();

        let stats = engine.stats(ch(2), Duration::from_millis(450));
        assert_eq!(stats.count, 5);
        assert!((stats.power.unwrap().avg - 500.0).abs() < 1e-9);

        let view = engine.project(ch(2), 1, Zoom::default());
        let volts = view.trace(data::Trace::Voltage).unwrap();
        assert_eq!(volts.points.len(), 4);
        assert_eq!(volts.points[0].value, 8.0);

        engine.clear(ClearTarget::Channel(ch(2)));
        assert!(engine.stats(ch(2), Duration::from_secs(10)).is_undefined());
    }
}
