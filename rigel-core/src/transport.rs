//! Component A: the byte-synchronous duplex stream underneath the AN851
//! protocol. No framing or escaping happens here (spec §4.A) — just open,
//! timed read, blocking write, and a microsecond sleep.

use std::io::{Read, Write};
use std::time::Duration;

use crate::error::{Result, RigelError};

const BAUD_RATE: u32 = 115_200;

/// What the protocol engine needs from the wire. A trait so tests can swap
/// in an in-memory duplex queue instead of a real character device — the
/// same shape the teacher's `test_harness` crate uses to stand in for real
/// hardware under `#[cfg(test)]`.
pub trait Transport {
    /// Writes the entire buffer, retrying on interruption. Returns the
    /// number of bytes written (always `buf.len()` on success).
    fn write_all(&mut self, buf: &[u8]) -> Result<usize>;

    /// Reads up to `buf.len()` bytes, blocking for at most the configured
    /// timeout. Returns `Ok(0)` on timeout rather than an error.
    fn read_some(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Sets the total timeout subsequent `read_some` calls should honor.
    fn set_timeout(&mut self, timeout: Duration);

    /// Blocks the calling thread for `us` microseconds.
    fn sleep_us(&self, us: u64) {
        std::thread::sleep(Duration::from_micros(us));
    }
}

/// A serial character device opened at the line configuration AN851
/// requires: 115200 8N1, no flow control, raw mode, no controlling
/// terminal.
pub struct SerialTransport {
    port: Box<dyn serialport::SerialPort>,
}

impl SerialTransport {
    pub fn open(path: &str) -> Result<Self> {
        let port = serialport::new(path, BAUD_RATE)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(Duration::from_millis(0))
            .open()
            .map_err(|e| RigelError::Transport(std::io::Error::new(std::io::ErrorKind::Other, e)))?;

        Ok(SerialTransport { port })
    }
}

impl Transport for SerialTransport {
    fn write_all(&mut self, buf: &[u8]) -> Result<usize> {
        let mut written = 0;
        while written < buf.len() {
            match self.port.write(&buf[written..]) {
                Ok(n) => written += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(RigelError::Transport(e)),
            }
        }
        Ok(written)
    }

    fn read_some(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(RigelError::Transport(e)),
        }
    }

    fn set_timeout(&mut self, timeout: Duration) {
        // A backend that can't honor a dynamic timeout change is not worth
        // supporting; this mirrors sio_settimeout's role as the sole knob
        // the protocol engine turns between requests.
        let _ = self.port.set_timeout(timeout);
    }
}

/// An in-memory duplex byte queue implementing [`Transport`], for protocol-
/// engine and device-driver tests that simulate a device without a real
/// tty.
#[cfg(any(test, feature = "test-util"))]
pub mod mock {
    use super::*;
    use std::collections::VecDeque;

    /// A scripted device: bytes written by the engine are handed to
    /// `respond`, whose return value becomes the next `read_some` payload.
    pub struct MockTransport {
        pub sent: Vec<Vec<u8>>,
        pending_reads: VecDeque<Vec<u8>>,
        timeout: Duration,
    }

    impl MockTransport {
        pub fn new() -> Self {
            MockTransport {
                sent: Vec::new(),
                pending_reads: VecDeque::new(),
                timeout: Duration::from_millis(0),
            }
        }

        /// Queues a chunk of bytes to be doled out (in order, possibly
        /// split across several `read_some` calls) on subsequent reads.
        pub fn queue_read(&mut self, bytes: Vec<u8>) {
            self.pending_reads.push_back(bytes);
        }

        pub fn timeout(&self) -> Duration {
            self.timeout
        }
    }

    impl Default for MockTransport {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Transport for MockTransport {
        fn write_all(&mut self, buf: &[u8]) -> Result<usize> {
            self.sent.push(buf.to_vec());
            Ok(buf.len())
        }

        fn read_some(&mut self, buf: &mut [u8]) -> Result<usize> {
            match self.pending_reads.pop_front() {
                Some(chunk) => {
                    let n = chunk.len().min(buf.len());
                    buf[..n].copy_from_slice(&chunk[..n]);
                    if n < chunk.len() {
                        // Put the remainder back for the next read.
                        self.pending_reads.push_front(chunk[n..].to_vec());
                    }
                    Ok(n)
                }
                None => Ok(0),
            }
        }

        fn set_timeout(&mut self, timeout: Duration) {
            self.timeout = timeout;
        }

        fn sleep_us(&self, _us: u64) {
            // Tests should not actually block.
        }
    }
}
