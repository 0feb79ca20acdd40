//! Serial Port
//!
//! Implements a `RawPort` for a serial port, and an MIO event source.
//! The instrument prints one newline terminated text line per measurement.

use super::{iobuf::LineBuf, LinkError, RawPort, RecvError};
use mio_serial::SerialPortBuilderExt;
use std::io;
use std::time::{Duration, Instant};

/// RawPort to read lines from a serial port
pub struct Port {
    port: mio_serial::SerialStream,
    /// Partial lines are buffered here until their terminator arrives.
    rxbuf: LineBuf,
    /// Instant when we received data most recently. This is used
    /// to clear out stale partial lines from `rxbuf`.
    last_rx: Instant,
    /// If true, the next data received will be the first data and
    /// should be discarded since it's usually stale driver buffer content.
    first_rx: bool,
}

/// Default data rate of the instrument's USB serial bridge.
pub static DEFAULT_RATE: u32 = 115200;

/// A partial line older than this is considered stale.
static STALE_TIMEOUT: Duration = Duration::from_millis(200);

impl Port {
    /// Opens `path`, which looks like `serial_port[:rate]`, for example
    /// `/dev/ttyACM0` or `COM3:230400`. The rate defaults to 115200.
    pub fn new(path: &str) -> Result<Port, LinkError> {
        let mut tokens = path.split(':');
        let port_name = match tokens.next() {
            Some(name) if !name.is_empty() => name,
            _ => return Err(LinkError::InvalidUrl(path.to_string())),
        };
        let rate = match tokens.next() {
            Some(rate) => rate
                .parse::<u32>()
                .map_err(|_| LinkError::InvalidBaud(rate.to_string()))?,
            None => DEFAULT_RATE,
        };
        if tokens.next().is_some() {
            return Err(LinkError::InvalidUrl(path.to_string()));
        }

        let mio_port = mio_serial::new(port_name, rate).open_native_async()?;
        #[cfg(windows)]
        {
            // Windows requires some custom settings to replicate the unix behavior.
            use std::os::windows::io::AsRawHandle;
            use winapi::um::commapi::SetCommTimeouts;
            use winapi::um::winbase::COMMTIMEOUTS;
            let handle = mio_port.as_raw_handle();
            let mut timeouts = COMMTIMEOUTS {
                ReadIntervalTimeout: 0xFFFFFFFF,
                ReadTotalTimeoutMultiplier: 0xFFFFFFFF,
                ReadTotalTimeoutConstant: 0xFFFFFFFE,
                WriteTotalTimeoutMultiplier: 0,
                WriteTotalTimeoutConstant: 0,
            };
            if unsafe { SetCommTimeouts(handle, &mut timeouts) } == 0 {
                return Err(io::Error::last_os_error().into());
            }
        }
        log::debug!("opened serial port {} at {} bps", port_name, rate);
        Ok(Port {
            port: mio_port,
            rxbuf: LineBuf::new(),
            last_rx: Instant::now(),
            first_rx: true,
        })
    }

    fn recv_buffered(&mut self) -> Result<String, RecvError> {
        if let Some(line) = self.rxbuf.take_line() {
            Ok(line)
        } else if self.rxbuf.full() {
            self.rxbuf.flush();
            Err(RecvError::LineTooLong)
        } else {
            Err(RecvError::NotReady)
        }
    }
}

impl RawPort for Port {
    fn recv(&mut self) -> Result<String, RecvError> {
        let mut res = self.recv_buffered();
        if let Err(RecvError::NotReady) = res {
            // A partial line that has been sitting for a while will never be
            // completed correctly, e.g. after the instrument was reset.
            let now = Instant::now();
            if now.duration_since(self.last_rx) > STALE_TIMEOUT {
                self.rxbuf.flush();
            }
            if let Err(e) = self.rxbuf.refill(&mut self.port) {
                #[cfg(target_os = "macos")]
                // On macos, disconnecting a serial port while connected will
                // generate this error, so translate it.
                if let RecvError::IO(ioerr) = &e {
                    if Some(6) == ioerr.raw_os_error() {
                        return Err(RecvError::Disconnected);
                    }
                }
                return Err(e);
            }
            if self.first_rx {
                self.rxbuf.flush();
                self.first_rx = false;
                return Err(RecvError::NotReady);
            }
            self.last_rx = now;
            res = self.recv_buffered();
        }
        res
    }
}

impl mio::event::Source for Port {
    fn register(
        &mut self,
        registry: &mio::Registry,
        token: mio::Token,
        interests: mio::Interest,
    ) -> io::Result<()> {
        self.port.register(registry, token, interests)
    }

    fn reregister(
        &mut self,
        registry: &mio::Registry,
        token: mio::Token,
        interests: mio::Interest,
    ) -> io::Result<()> {
        self.port.reregister(registry, token, interests)
    }

    fn deregister(&mut self, registry: &mio::Registry) -> io::Result<()> {
        self.port.deregister(registry)
    }
}
