//! TCP Port
//!
//! Implements a `RawPort` for a TCP stream, for instruments exposed through
//! a serial-to-network bridge. The byte stream carries the same text lines
//! as the serial port.

use super::{iobuf::LineBuf, RawPort, RecvError};
use mio::net::TcpStream;
use std::io;
use std::net::SocketAddr;

pub struct Port {
    stream: TcpStream,
    rxbuf: LineBuf,
}

impl Port {
    pub fn new(address: &SocketAddr) -> Result<Port, io::Error> {
        let stream = TcpStream::connect(*address)?;
        Ok(Port {
            stream,
            rxbuf: LineBuf::new(),
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
            match self.rxbuf.refill(&mut self.stream) {
                // The connection is still being established.
                Err(RecvError::IO(e)) if e.kind() == io::ErrorKind::NotConnected => {
                    return Err(RecvError::NotReady)
                }
                Err(e) => return Err(e),
                Ok(()) => {}
            }
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
        self.stream.register(registry, token, interests)
    }

    fn reregister(
        &mut self,
        registry: &mio::Registry,
        token: mio::Token,
        interests: mio::Interest,
    ) -> io::Result<()> {
        self.stream.reregister(registry, token, interests)
    }

    fn deregister(&mut self, registry: &mio::Registry) -> io::Result<()> {
        self.stream.deregister(registry)
    }
}
