//! Instrument link
//!
//! The `Port` object owns a dedicated thread that reads text lines from an
//! underlying `RawPort` (serial or TCP) and hands each one to an owned
//! callback. This bridges the `mio` world of the raw ports with whatever the
//! caller uses: the engine's ingestion bridge, or a crossbeam channel via
//! `Port::rx_to_channel`.
//!
//! The `Connector` and `Connection` traits are the seam through which the
//! engine opens and closes links, so that transports can be substituted.

pub mod bridge;
mod iobuf;
mod serial;
mod tcp;

use bridge::Feeder;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::thread;
use thiserror::Error;

pub use serial::DEFAULT_RATE;

/// Errors opening a link.
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("invalid url '{0}'")]
    InvalidUrl(String),
    #[error("invalid baud rate '{0}'")]
    InvalidBaud(String),
    #[error("address resolution failed for '{0}'")]
    AddressResolution(String),
    #[error("serial port: {0}")]
    Serial(#[from] mio_serial::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Possible errors when receiving from a port.
#[derive(Error, Debug)]
pub enum RecvError {
    /// No complete line available at this time.
    #[error("no data available")]
    NotReady,
    /// The port got disconnected.
    #[error("port disconnected")]
    Disconnected,
    /// A line did not fit the receive buffer and was discarded.
    #[error("line too long")]
    LineTooLong,
    #[error("I/O error: {0}")]
    IO(#[from] io::Error),
}

/// Generic interface for the low level part of a port.
trait RawPort {
    /// Returns a line without blocking, or RecvError::NotReady if one is not available.
    /// `LineTooLong` is recoverable; for all the other error values the port
    /// should be torn down.
    fn recv(&mut self) -> Result<String, RecvError>;
}

/// In special cases where the default that gets picked when resolving an IP address
/// does not work, this allows to force using either IPv4 or IPv6.
enum AddrFamilyRestrict {
    V4,
    V6,
    Either,
}

fn find_addr(addr: &str, family: AddrFamilyRestrict) -> Result<SocketAddr, LinkError> {
    let iter = addr
        .to_socket_addrs()
        .map_err(|_| LinkError::AddressResolution(addr.to_string()))?;
    for sa in iter {
        match (&sa, &family) {
            (SocketAddr::V4(_), AddrFamilyRestrict::V6) => continue,
            (SocketAddr::V6(_), AddrFamilyRestrict::V4) => continue,
            _ => return Ok(sa),
        }
    }
    Err(LinkError::AddressResolution(addr.to_string()))
}

enum Control {
    Stop,
}

const WAKER: mio::Token = mio::Token(0);
const PORT: mio::Token = mio::Token(1);

/// Default size of the rx channel when receiving to a crossbeam channel.
static DEFAULT_RX_CHANNEL_SIZE: usize = 256;

/// Opaque port object, reading lines from a `RawPort` on its own thread.
/// Dropping it stops the thread.
pub struct Port {
    ctl: crossbeam::channel::Sender<Control>,
    waker: mio::Waker,
    thread: Option<thread::JoinHandle<()>>,
}

impl Port {
    fn poller_thread<
        RawPortT: RawPort + mio::event::Source,
        RxCallbackT: Fn(Result<String, RecvError>) -> io::Result<()>,
    >(
        mut raw_port: RawPortT,
        mut poll: mio::Poll,
        rx: RxCallbackT,
        ctl: crossbeam::channel::Receiver<Control>,
    ) {
        use crossbeam::channel::TryRecvError;

        let mut events = mio::Events::with_capacity(4);

        'ioloop: loop {
            if let Err(e) = poll.poll(&mut events, None) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                let _ = rx(Err(RecvError::IO(e)));
                break;
            }

            for event in events.iter() {
                match event.token() {
                    WAKER => match ctl.try_recv() {
                        Ok(Control::Stop) | Err(TryRecvError::Disconnected) => break 'ioloop,
                        Err(TryRecvError::Empty) => {}
                    },
                    PORT => loop {
                        match raw_port.recv() {
                            Ok(line) => {
                                if rx(Ok(line)).is_err() {
                                    break 'ioloop;
                                }
                            }
                            Err(RecvError::NotReady) => break,
                            Err(RecvError::LineTooLong) => {
                                log::debug!("discarded over-long line");
                            }
                            Err(e) => {
                                // Fatal for this port, whatever the callback says.
                                let _ = rx(Err(e));
                                break 'ioloop;
                            }
                        }
                    },
                    mio::Token(x) => {
                        log::warn!("unexpected poll token {}", x);
                    }
                }
            }
        }

        if let Err(e) = poll.registry().deregister(&mut raw_port) {
            log::debug!("port deregistration failed: {}", e);
        }
    }

    fn from_raw<
        RawPortT: RawPort + mio::event::Source + Send + 'static,
        RxCallbackT: Fn(Result<String, RecvError>) -> io::Result<()> + Send + 'static,
    >(
        mut raw_port: RawPortT,
        rx: RxCallbackT,
    ) -> io::Result<Port> {
        let (ctl, ctl_rx) = crossbeam::channel::bounded::<Control>(1);
        let poll = mio::Poll::new()?;
        let waker = mio::Waker::new(poll.registry(), WAKER)?;
        poll.registry()
            .register(&mut raw_port, PORT, mio::Interest::READABLE)?;
        let thread = thread::Builder::new()
            .name("propower-link".to_string())
            .spawn(move || Port::poller_thread(raw_port, poll, rx, ctl_rx))?;
        Ok(Port {
            ctl,
            waker,
            thread: Some(thread),
        })
    }

    /// Opens the instrument at `url`, sending each received line or the
    /// terminating error to `rx`.
    ///
    /// A valid `url` has one of the following formats:
    /// - `serial://port[:rate]`, the rate defaults to 115200. It's possible to
    ///   omit `serial://` if the port starts with `COM` on windows or `/dev/` on unix.
    /// - `tcp://address:port`. `tcp4` and `tcp6` force a specific version of
    ///   the IP protocol should the default resolution fail.
    ///
    /// The callback runs on the port thread. If it returns an `Err()`, the port
    /// is closed. After an error other than `NotReady`/`LineTooLong` has been
    /// delivered, the thread exits.
    pub fn new<RXT: Fn(Result<String, RecvError>) -> io::Result<()> + Send + 'static>(
        url: &str,
        rx: RXT,
    ) -> Result<Port, LinkError> {
        #[cfg(unix)]
        if url.starts_with("/dev/") {
            return Ok(Port::from_raw(serial::Port::new(url)?, rx)?);
        }
        #[cfg(windows)]
        if url.starts_with("COM") {
            return Ok(Port::from_raw(serial::Port::new(url)?, rx)?);
        }

        let port = match url.split_once("://") {
            Some(("serial", port)) => Port::from_raw(serial::Port::new(port)?, rx)?,
            Some(("tcp", addr)) => Port::from_raw(
                tcp::Port::new(&find_addr(addr, AddrFamilyRestrict::Either)?)?,
                rx,
            )?,
            Some(("tcp4", addr)) => {
                Port::from_raw(tcp::Port::new(&find_addr(addr, AddrFamilyRestrict::V4)?)?, rx)?
            }
            Some(("tcp6", addr)) => {
                Port::from_raw(tcp::Port::new(&find_addr(addr, AddrFamilyRestrict::V6)?)?, rx)?
            }
            _ => return Err(LinkError::InvalidUrl(url.to_string())),
        };
        Ok(port)
    }

    /// Creates a sender/receiver pair to be used with `rx_to_channel`:
    /// ```no_run
    /// use propower::link::Port;
    /// let (tx, rx) = Port::rx_channel();
    /// let port = Port::new("/dev/ttyACM0", Port::rx_to_channel(tx)).unwrap();
    /// let line = rx.recv();
    /// ```
    pub fn rx_channel() -> (
        crossbeam::channel::Sender<Result<String, RecvError>>,
        crossbeam::channel::Receiver<Result<String, RecvError>>,
    ) {
        crossbeam::channel::bounded(DEFAULT_RX_CHANNEL_SIZE)
    }

    /// Returns a RX callback which sends the received results to a channel
    /// (see `rx_channel`) and silently drops lines when the channel is full.
    pub fn rx_to_channel(
        rx_send: crossbeam::channel::Sender<Result<String, RecvError>>,
    ) -> impl Fn(Result<String, RecvError>) -> io::Result<()> {
        move |rxdata| -> io::Result<()> {
            use crossbeam::channel::TrySendError;
            match rx_send.try_send(rxdata) {
                Ok(()) | Err(TrySendError::Full(_)) => Ok(()),
                Err(TrySendError::Disconnected(_)) => {
                    Err(io::Error::from(io::ErrorKind::BrokenPipe))
                }
            }
        }
    }

    /// True once the port thread has exited, e.g. after a transport error.
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Stops the port thread and waits for it to exit.
    pub fn close(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(thread) = self.thread.take() {
            // Both fail harmlessly if the thread already exited.
            let _ = self.ctl.try_send(Control::Stop);
            let _ = self.waker.wake();
            if thread.join().is_err() {
                log::warn!("link thread panicked");
            }
        }
    }
}

impl Drop for Port {
    fn drop(&mut self) {
        self.stop();
    }
}

/// What to connect to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    pub url: String,
}

impl ConnectionParams {
    pub fn new(url: impl Into<String>) -> ConnectionParams {
        ConnectionParams { url: url.into() }
    }
}

/// A live link feeding the engine.
pub trait Connection: Send {
    /// Stops the link. Returns once nothing more will be fed from it.
    fn close(self: Box<Self>);
}

/// Opens links on behalf of the engine.
pub trait Connector: Send {
    /// Opens a link described by `params`. Every line received must be handed
    /// to `feeder`, and a terminal transport failure reported through
    /// `Feeder::report_failure` exactly once.
    fn connect(
        &mut self,
        params: &ConnectionParams,
        feeder: Feeder,
    ) -> Result<Box<dyn Connection>, LinkError>;
}

impl Connection for Port {
    fn close(self: Box<Self>) {
        Port::close(*self)
    }
}

/// Default connector, opening serial or TCP `Port`s.
#[derive(Debug, Default, Clone, Copy)]
pub struct PortConnector;

impl Connector for PortConnector {
    fn connect(
        &mut self,
        params: &ConnectionParams,
        feeder: Feeder,
    ) -> Result<Box<dyn Connection>, LinkError> {
        let port = Port::new(&params.url, move |res| match res {
            Ok(line) => {
                let _ = feeder.feed_line(&line);
                Ok(())
            }
            Err(RecvError::NotReady) => Ok(()),
            Err(e) => {
                feeder.report_failure(e.to_string());
                Err(io::Error::from(io::ErrorKind::BrokenPipe))
            }
        })?;
        Ok(Box::new(port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unknown_schemes() {
        let res = Port::new("udp://localhost:7855", |_| Ok(()));
        assert!(matches!(res, Err(LinkError::InvalidUrl(_))));
        let res = Port::new("nonsense", |_| Ok(()));
        assert!(matches!(res, Err(LinkError::InvalidUrl(_))));
    }

    #[test]
    fn rejects_bad_baud() {
        let res = Port::new("serial://ttyFAKE:fast", |_| Ok(()));
        assert!(matches!(res, Err(LinkError::InvalidBaud(_))));
    }

    #[test]
    fn tcp_lines_reach_callback() {
        use std::io::Write;
        use std::net::TcpListener;
        use std::time::Duration;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("tcp://{}", listener.local_addr().unwrap());
        let (tx, rx) = Port::rx_channel();
        let port = Port::new(&url, Port::rx_to_channel(tx)).unwrap();

        let (mut peer, _) = listener.accept().unwrap();
        peer.write_all(b"CH:1 V=1 V | I=0.1 A | P=0.1 W\r\nOK: ready\r\n")
            .unwrap();
        let first = rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();
        assert_eq!(first, "CH:1 V=1 V | I=0.1 A | P=0.1 W");
        let second = rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();
        assert_eq!(second, "OK: ready");

        drop(peer);
        let end = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(end, Err(RecvError::Disconnected)));
        port.close();
    }
}
