//! Receive buffer splitting a byte stream into text lines.

use super::RecvError;
use std::io;

/// Size of the internal buffer, and thus the longest line accepted.
const LINEBUF_SIZE: usize = 4096;

pub struct LineBuf {
    /// Valid data (possibly none) is in `buf[start..end]`.
    buf: [u8; LINEBUF_SIZE],
    start: usize,
    end: usize,
}

impl LineBuf {
    pub fn new() -> LineBuf {
        LineBuf {
            buf: [0; LINEBUF_SIZE],
            start: 0,
            end: 0,
        }
    }

    pub fn empty(&self) -> bool {
        self.start == self.end
    }

    pub fn size(&self) -> usize {
        self.end - self.start
    }

    /// True when no terminator fits anymore and the content must be discarded.
    pub fn full(&self) -> bool {
        self.size() == LINEBUF_SIZE
    }

    pub fn flush(&mut self) {
        self.start = 0;
        self.end = 0;
    }

    fn compact(&mut self) {
        if self.start != 0 {
            let len = self.size();
            self.buf.copy_within(self.start..self.end, 0);
            self.start = 0;
            self.end = len;
        }
    }

    /// Reads as much as fits from `reader`. Must not be called when `full()`.
    pub fn refill<T: io::Read>(&mut self, reader: &mut T) -> Result<(), RecvError> {
        self.compact();
        match reader.read(&mut self.buf[self.end..]) {
            Ok(0) => Err(RecvError::Disconnected),
            Ok(size) => {
                self.end += size;
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Err(RecvError::NotReady),
            Err(e) => Err(RecvError::IO(e)),
        }
    }

    /// Returns the next complete, non-empty line with surrounding whitespace
    /// removed. Both `\n` and `\r` terminate a line.
    pub fn take_line(&mut self) -> Option<String> {
        loop {
            let data = &self.buf[self.start..self.end];
            let pos = data.iter().position(|&b| b == b'\n' || b == b'\r')?;
            let line = String::from_utf8_lossy(&data[..pos]).trim().to_string();
            self.start += pos + 1;
            if !line.is_empty() {
                return Some(line);
            }
        }
    }
}
