//! Component B: AN851 frame encoding and decoding.
//!
//! Wire format: `STX STX [DLE] command data... [DLE] checksum ETX`, where
//! any control byte appearing where data is expected (command, a payload
//! byte, or the checksum) is preceded by a `DLE` escape. The checksum is
//! the two's-complement negation of `command + sum(payload)`, taken mod
//! 256, so that command + payload + checksum sums to zero mod 256.
//!
//! Grounded on `an851_tx`/`an851_checksum`/`an851_wait_response` in
//! `an851.c`.

use arrayvec::ArrayVec;

use crate::error::{Result, RigelError};

/// Data Link Escape.
pub const DLE: u8 = 0x05;
/// End of TeXt.
pub const ETX: u8 = 0x04;
/// Start of TeXt.
pub const STX: u8 = 0x0F;

/// Largest data payload a single AN851 packet can carry.
pub const MAX_DATA_LENGTH: usize = 250;
/// Largest raw (stuffed, framed) packet the bootloader's receive buffer
/// can hold.
pub const MAX_PACKET_SIZE: usize = 255;

/// True if `b` must be escaped with a preceding [`DLE`] wherever it
/// appears as a meaningful (non-framing) byte.
pub fn is_control(b: u8) -> bool {
    b == DLE || b == ETX || b == STX
}

fn checksum(command: u8, payload: &[u8]) -> u8 {
    let sum = payload.iter().fold(command, |acc, &b| acc.wrapping_add(b));
    sum.wrapping_neg()
}

/// A single AN851 packet: a command byte and its associated data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: u8,
    pub payload: ArrayVec<u8, MAX_DATA_LENGTH>,
}

impl Frame {
    pub fn new(command: u8, payload: &[u8]) -> Result<Self> {
        let mut p = ArrayVec::new();
        p.try_extend_from_slice(payload)
            .map_err(|_| RigelError::Framing("payload exceeds MAX_DATA_LENGTH"))?;
        Ok(Frame { command, payload: p })
    }

    /// The checksum that makes `command + payload + checksum == 0 (mod 256)`.
    pub fn checksum(&self) -> u8 {
        checksum(self.command, &self.payload)
    }

    /// Frames and byte-stuffs this packet for transmission.
    pub fn encode(&self) -> Result<ArrayVec<u8, { MAX_PACKET_SIZE * 2 }>> {
        let mut buf: ArrayVec<u8, { MAX_PACKET_SIZE * 2 }> = ArrayVec::new();
        let push = |buf: &mut ArrayVec<u8, { MAX_PACKET_SIZE * 2 }>, b: u8| -> Result<()> {
            buf.try_push(b)
                .map_err(|_| RigelError::Framing("encoded frame exceeds transmit buffer"))
        };

        push(&mut buf, STX)?;
        push(&mut buf, STX)?;

        if is_control(self.command) {
            push(&mut buf, DLE)?;
        }
        push(&mut buf, self.command)?;

        for &b in &self.payload {
            if is_control(b) {
                push(&mut buf, DLE)?;
            }
            push(&mut buf, b)?;
        }

        let chk = self.checksum();
        if is_control(chk) {
            push(&mut buf, DLE)?;
        }
        push(&mut buf, chk)?;

        push(&mut buf, ETX)?;

        Ok(buf)
    }

    /// De-stuffs and validates a raw byte sequence exactly as read off the
    /// wire (leading `STX STX` and trailing `ETX` included). Returns the
    /// recovered command and payload, with the checksum already
    /// validated.
    pub fn decode(raw: &[u8]) -> Result<Frame> {
        // Strip framing/escaping in one pass: an unescaped control byte is
        // dropped, a DLE is dropped and the following byte is taken
        // literally.
        let mut stripped: ArrayVec<u8, MAX_PACKET_SIZE> = ArrayVec::new();
        let mut i = 0;
        while i < raw.len() {
            let b = raw[i];
            if is_control(b) {
                if b == DLE {
                    i += 1;
                    if i >= raw.len() {
                        return Err(RigelError::Framing("truncated escape sequence"));
                    }
                    stripped
                        .try_push(raw[i])
                        .map_err(|_| RigelError::Framing("decoded frame exceeds buffer"))?;
                }
                // else: unescaped STX/ETX framing byte, drop it.
            } else {
                stripped
                    .try_push(b)
                    .map_err(|_| RigelError::Framing("decoded frame exceeds buffer"))?;
            }
            i += 1;
        }

        if stripped.len() < 2 {
            return Err(RigelError::Framing("frame too short to contain a checksum"));
        }

        let command = stripped[0];
        let checksum_byte = *stripped.last().unwrap();
        let payload_bytes = &stripped[1..stripped.len() - 1];

        let expected = checksum(command, payload_bytes);
        if expected != checksum_byte {
            return Err(RigelError::ChecksumMismatch {
                expected,
                got: checksum_byte,
            });
        }

        let mut payload = ArrayVec::new();
        payload
            .try_extend_from_slice(payload_bytes)
            .map_err(|_| RigelError::Framing("payload exceeds MAX_DATA_LENGTH"))?;

        Ok(Frame { command, payload })
    }
}

/// True once `buf` ends in an unescaped [`ETX`] — the signal that a full
/// reply has been accumulated (mirrors `an851_wait_response`'s stop
/// condition).
pub fn is_complete(buf: &[u8]) -> bool {
    let n = buf.len();
    n >= 2 && buf[n - 1] == ETX && buf[n - 2] != DLE
}
