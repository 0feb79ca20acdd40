use propower::data::{
    Channel, ClearTarget, Sample, Trace, TraceSelection, ViewportRequest, Zoom,
};
use propower::link::{Connection, ConnectionParams, Connector, LinkError};
use propower::{Config, Engine, Event, Feeder};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Records what happens to the links it creates and exposes their feeders,
/// so tests can play the instrument.
#[derive(Default, Clone)]
struct MockConnector {
    log: Arc<Mutex<Vec<String>>>,
    feeders: Arc<Mutex<Vec<Feeder>>>,
}

struct MockConnection {
    url: String,
    log: Arc<Mutex<Vec<String>>>,
}

impl Connection for MockConnection {
    fn close(self: Box<Self>) {
        self.log.lock().unwrap().push(format!("close {}", self.url));
    }
}

impl Connector for MockConnector {
    fn connect(
        &mut self,
        params: &ConnectionParams,
        feeder: Feeder,
    ) -> Result<Box<dyn Connection>, LinkError> {
        if params.url.starts_with("bad") {
            return Err(LinkError::InvalidUrl(params.url.clone()));
        }
        self.log.lock().unwrap().push(format!("open {}", params.url));
        self.feeders.lock().unwrap().push(feeder);
        Ok(Box::new(MockConnection {
            url: params.url.clone(),
            log: self.log.clone(),
        }))
    }
}

impl MockConnector {
    fn feeder(&self, i: usize) -> Feeder {
        self.feeders.lock().unwrap()[i].clone()
    }

    fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

fn engine() -> (Engine, MockConnector) {
    let mock = MockConnector::default();
    let engine = Engine::with_connector(Config::default(), Box::new(mock.clone()));
    (engine, mock)
}

fn ch(n: u8) -> Channel {
    Channel::new(n).unwrap()
}

#[test]
fn close_then_open_applies_in_order() {
    let (mut engine, mock) = engine();
    engine.open_connection(ConnectionParams::new("mock://a"));
    engine.close_connection();
    engine.open_connection(ConnectionParams::new("mock://b"));

    let events = engine.process();
    assert_eq!(
        events,
        vec![
            Event::Connected("mock://a".to_string()),
            Event::Disconnected,
            Event::Connected("mock://b".to_string()),
        ]
    );
    assert_eq!(mock.log(), vec!["open mock://a", "close mock://a", "open mock://b"]);
    assert_eq!(engine.connection_url(), Some("mock://b"));
}

#[test]
fn reopening_closes_the_previous_link() {
    let (mut engine, mock) = engine();
    engine.open_connection(ConnectionParams::new("mock://a"));
    engine.open_connection(ConnectionParams::new("mock://b"));
    engine.process();
    assert_eq!(mock.log(), vec!["open mock://a", "close mock://a", "open mock://b"]);
}

#[test]
fn data_before_close_is_applied() {
    let (mut engine, mock) = engine();
    engine.open_connection(ConnectionParams::new("mock://a"));
    engine.process();

    let link = mock.feeder(0);
    for i in 0..5u64 {
        link.feed_line_at("CH:4 V=3.3 V | I=0.01 A | P=0.033 W", i * 50)
            .unwrap();
    }
    engine.close_connection();
    let events = engine.process();
    assert_eq!(events, vec![Event::Disconnected]);
    assert_eq!(engine.channel_snapshot(ch(4)).len(), 5);
    assert!(!engine.is_connected());
}

#[test]
fn connect_failure_reported_once() {
    let (mut engine, mock) = engine();
    engine.open_connection(ConnectionParams::new("bad://port"));
    let events = engine.process();
    assert_eq!(events.len(), 1);
    assert!(matches!(&events[0], Event::ConnectFailed { url, .. } if url == "bad://port"));
    assert!(engine.process().is_empty());
    assert!(mock.log().is_empty());
}

#[test]
fn transport_failure_keeps_history() {
    let (mut engine, mock) = engine();
    engine.open_connection(ConnectionParams::new("mock://a"));
    engine.process();

    let link = mock.feeder(0);
    link.feed_line_at("CH:1 V=5 V | I=0.1 A | P=0.5 W", 0).unwrap();
    link.feed_line_at("CH:1 V=5 V | I=0.1 A | P=0.5 W", 1_000).unwrap();
    link.report_failure("device unplugged");

    let events = engine.process();
    assert_eq!(
        events,
        vec![Event::TransportError("device unplugged".to_string())]
    );
    assert!(!engine.is_connected());
    assert_eq!(mock.log(), vec!["open mock://a", "close mock://a"]);

    let stats = engine.stats(ch(1), Duration::from_secs(10));
    assert_eq!(stats.count, 2);
    assert!((stats.energy_mwh - 500.0 / 3_600.0).abs() < 1e-9);
}

#[test]
fn failure_of_replaced_link_is_ignored() {
    let (mut engine, mock) = engine();
    engine.open_connection(ConnectionParams::new("mock://a"));
    engine.process();
    let old = mock.feeder(0);

    engine.open_connection(ConnectionParams::new("mock://b"));
    old.report_failure("late error from a");
    let events = engine.process();
    assert_eq!(
        events,
        vec![
            Event::Disconnected,
            Event::Connected("mock://b".to_string())
        ]
    );
    assert_eq!(engine.connection_url(), Some("mock://b"));
}

#[test]
fn producer_thread_feeds_consumer() {
    let (mut engine, _mock) = engine();
    let feeder = engine.feeder();
    let producer = std::thread::spawn(move || {
        for i in 0..2_000u64 {
            let line = format!("CH:{} V=1.0 V | I=0.5 A | P=0.5 W", i % 6 + 1);
            feeder.feed_line_at(&line, i).unwrap();
        }
    });

    let mut total = 0;
    while total < 2_000 {
        engine.process();
        total = Channel::all().map(|c| engine.channel_snapshot(c).len()).sum();
        if producer.is_finished() {
            engine.process();
            total = Channel::all().map(|c| engine.channel_snapshot(c).len()).sum();
            break;
        }
    }
    producer.join().unwrap();
    assert_eq!(total, 2_000);

    for c in Channel::all() {
        let snap = engine.channel_snapshot(c);
        assert!(snap.iter().zip(snap.iter().skip(1)).all(|(a, b)| a.timestamp <= b.timestamp));
    }
}

#[test]
fn buffer_bound_holds_through_engine() {
    let config = Config {
        buffer_capacity: 100,
        buffer_margin: 10,
        ..Config::default()
    };
    let mut engine = Engine::with_connector(config, Box::new(MockConnector::default()));
    let feeder = engine.feeder();
    for i in 0..1_000u64 {
        feeder
            .feed_line_at("CH:6 V=12 V | I=1 A | P=12 W", i)
            .unwrap();
        if i % 7 == 0 {
            engine.process();
            assert!(engine.channel_snapshot(ch(6)).len() <= 110);
        }
    }
    engine.process();
    let snap = engine.channel_snapshot(ch(6));
    assert!(snap.len() <= 110);
    assert_eq!(snap.latest().unwrap().timestamp, 999);
}

#[test]
fn clear_all_and_project() {
    let (mut engine, _mock) = engine();
    let feeder = engine.feeder();
    for i in 0..50u64 {
        feeder
            .feed_line_at(&format!("CH:2 V={} V | I=0 A | P=0 W", i), i * 10)
            .unwrap();
    }
    engine.process();

    let request = ViewportRequest {
        offset: 0,
        zoom: Zoom::new(0.5),
        width: 10,
        traces: TraceSelection::only(Trace::Voltage),
    };
    let view = engine.project_with(ch(2), &request);
    assert_eq!(view.traces.len(), 1);
    let volts = &view.traces[0];
    assert_eq!(volts.points.len(), 10);
    assert_eq!(volts.points[0].value, 49.0);
    assert_eq!(volts.points[9].value, 31.0);
    assert!((volts.scale - 49.0 * 1.2).abs() < 1e-9);

    engine.clear(ClearTarget::All);
    assert!(engine.project_with(ch(2), &request).traces[0].points.is_empty());
}

#[test]
fn snapshot_from_another_thread_then_clear() {
    let (mut engine, _) = engine();
    let store = engine.store();
    engine
        .feeder()
        .feed_line_at("CH:4 V=1 V | I=1 A | P=1 W", 10)
        .unwrap();
    engine.process();

    let reader = std::thread::spawn(move || store.snapshot(ch(4)).len());
    assert_eq!(reader.join().unwrap(), 1);

    // a snapshot must be dropped before the engine may clear
    let before = engine.channel_snapshot(ch(4)).len();
    engine.clear(ClearTarget::Channel(ch(4)));
    assert_eq!(before, 1);
    assert!(engine.channel_snapshot(ch(4)).is_empty());
    assert_eq!(engine.store().snapshot(ch(4)).len(), 0);
}

#[test]
fn pushed_samples_are_applied_like_lines() {
    let (mut engine, _) = engine();
    let feeder = engine.feeder();
    for i in 0..4u64 {
        feeder.push_sample(Sample {
            channel: ch(6),
            voltage: 5.0,
            current: 100.0,
            power: 500.0,
            timestamp: i * 1_000,
        });
    }
    assert!(engine.process().is_empty());

    let stats = engine.stats(ch(6), Duration::from_secs(60));
    assert_eq!(stats.count, 4);
    assert!((stats.power.unwrap().avg - 500.0).abs() < 1e-9);
    assert!((stats.energy_mwh - 500.0 * 3_000.0 / 3_600_000.0).abs() < 1e-9);
}
