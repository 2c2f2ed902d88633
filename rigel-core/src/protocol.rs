//! Component C: the AN851 command set and its retry/timeout policy on top
//! of [`Frame`] framing. Grounded on `an851_tx`, `an851_wait_response` and
//! the per-command `sio_settimeout` calls in `an851.c`.

use std::time::Duration;

use crate::error::{Result, RigelError};
use crate::frame::{self, Frame};
use crate::transport::Transport;

/// AN851 command bytes (`an851.h`).
pub mod command {
    pub const RD_VERSION: u8 = 0x00;
    pub const RD_FLASH: u8 = 0x01;
    pub const WR_FLASH: u8 = 0x02;
    pub const ER_FLASH: u8 = 0x03;
    pub const RD_EEDATA: u8 = 0x04;
    pub const WR_EEDATA: u8 = 0x05;
    pub const RD_CONFIG: u8 = 0x06;
    pub const WR_CONFIG: u8 = 0x07;
    pub const IFI_RUN_CODE: u8 = 0x08;
    pub const IFI_WR_ROW: u8 = 0x09;
    /// Not a real on-wire opcode constraint, just a value that will never
    /// collide with an actual command; PIC_RESET can be anything per AN851.
    pub const PIC_RESET: u8 = 0xFF;
}

/// A command is sent but the bootloader never replies to it.
fn expects_no_reply(cmd: u8) -> bool {
    matches!(cmd, command::PIC_RESET | command::IFI_RUN_CODE)
}

const MAX_RETRIES: u32 = 3;

/// Drives the AN851 request/reply exchange over a [`Transport`]: framing,
/// byte-stuffing, checksum validation, echo validation, and the retry
/// policy of spec.md §4.C step 6 — a lost reply (silence) or a decode
/// failure (malformed stuffing or a bad checksum) re-sends the original
/// encoded bytes, up to three retries (four total attempts); an echo
/// mismatch is never retried and is reported immediately.
pub struct ProtocolEngine<T: Transport> {
    transport: T,
    /// Milliseconds of read timeout per unit of `request_length`.
    rlag_ms: u32,
    /// Milliseconds of write timeout per unit of `request_length`.
    wlag_ms: u32,
    reset_lag_us: u64,
    last_command: u8,
}

impl<T: Transport> ProtocolEngine<T> {
    pub fn new(transport: T, rlag_ms: u32, wlag_ms: u32, reset_lag_us: u64) -> Self {
        ProtocolEngine {
            transport,
            rlag_ms,
            wlag_ms,
            reset_lag_us,
            last_command: command::RD_VERSION,
        }
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Unwraps the engine, recovering the transport it was built on. Used
    /// when re-initializing with a newly identified device's timing
    /// (`an851_init` replacing an `an851_safe_init` session).
    pub fn into_transport(self) -> T {
        self.transport
    }

    fn read_timeout(&self, request_length: u32) -> Duration {
        Duration::from_millis(self.rlag_ms as u64 * request_length as u64)
    }

    fn write_timeout(&self, request_length: u32) -> Duration {
        Duration::from_millis(self.wlag_ms as u64 * request_length as u64)
    }

    fn erase_timeout(&self) -> Duration {
        Duration::from_millis(self.wlag_ms as u64 * 0xFF)
    }

    /// Sends `command`/`payload` and returns the decoded reply, applying
    /// the command-appropriate timeout. `request_length` is the unit AN851
    /// scales the timeout by (the byte count the bootloader is expected to
    /// move, not necessarily `payload.len()`).
    pub fn request(&mut self, cmd: u8, payload: &[u8], timeout: Duration) -> Result<Frame> {
        let frame = Frame::new(cmd, payload)?;
        let encoded = frame.encode()?;

        if expects_no_reply(cmd) {
            self.transport.write_all(&encoded)?;
            self.last_command = cmd;
            return Ok(Frame::new(cmd, &[])?);
        }

        let mut attempt = 0;
        loop {
            self.transport.write_all(&encoded)?;
            self.last_command = cmd;
            self.transport.set_timeout(timeout);

            match self.read_reply(timeout)? {
                Some(raw) => match Frame::decode(&raw) {
                    Ok(reply) => {
                        if reply.command != cmd {
                            return Err(RigelError::EchoMismatch {
                                sent: cmd,
                                echoed: reply.command,
                            });
                        }
                        return Ok(reply);
                    }
                    // A malformed stuffing sequence or a bad checksum is
                    // retried exactly like silence (spec.md §4.C step 6);
                    // only an echo mismatch (checked above, after a
                    // successful decode) is reported immediately.
                    Err(_) if attempt < MAX_RETRIES => {
                        attempt += 1;
                        continue;
                    }
                    Err(e) => return Err(e),
                },
                None if attempt < MAX_RETRIES => {
                    attempt += 1;
                    continue;
                }
                None => return Err(RigelError::Timeout { command: cmd }),
            }
        }
    }

    /// Reads bytes until an unescaped `ETX` terminates the reply, or gives
    /// up (returning `None`) after two consecutive empty reads — the same
    /// "stalled twice in a row" rule `an851_wait_response` uses to detect
    /// a non-responding device without a hard wall-clock deadline.
    fn read_reply(&mut self, _timeout: Duration) -> Result<Option<Vec<u8>>> {
        let mut buf = Vec::with_capacity(frame::MAX_PACKET_SIZE);
        let mut consecutive_empty = 0;
        let mut chunk = [0u8; 256];

        loop {
            let n = self.transport.read_some(&mut chunk)?;
            if n == 0 {
                consecutive_empty += 1;
                if consecutive_empty >= 2 {
                    return Ok(None);
                }
                continue;
            }
            consecutive_empty = 0;
            buf.extend_from_slice(&chunk[..n]);

            if frame::is_complete(&buf) {
                return Ok(Some(buf));
            }
            if buf.len() > frame::MAX_PACKET_SIZE * 2 {
                return Err(RigelError::Framing("reply exceeded maximum packet size"));
            }
        }
    }

    /// Resets the attached device. Fire-and-forget: AN851 defines no reply
    /// for `PIC_RESET`. Blocks for `reset_lag_us` afterward to give the
    /// bootloader time to reinitialize before the next request.
    pub fn reset(&mut self) -> Result<()> {
        self.request(command::PIC_RESET, &[0x00], Duration::from_millis(0))?;
        self.transport.sleep_us(self.reset_lag_us);
        Ok(())
    }

    /// Queries the bootloader version (`major << 8 | minor`).
    pub fn version(&mut self) -> Result<u16> {
        let reply = self.request(command::RD_VERSION, &[0x02], self.read_timeout(2))?;
        if reply.payload.len() < 2 {
            return Err(RigelError::ResponseShape("version reply too short"));
        }
        Ok(u16::from_be_bytes([reply.payload[0], reply.payload[1]]))
    }

    /// Tells the bootloader to jump into user code (standard exit, AN851
    /// `IFI_RUN_CODE` convention: `data[0] = 0x40`).
    pub fn run_user_code(&mut self) -> Result<()> {
        self.request(command::IFI_RUN_CODE, &[0x40], Duration::from_millis(0))?;
        Ok(())
    }

    /// Re-sends the last command with zero new data, asking the device to
    /// repeat its previous action (used by IFI targets that want a second
    /// acknowledgement without resending the payload).
    pub fn repeat(&mut self) -> Result<Frame> {
        let cmd = self.last_command;
        self.request(cmd, &[], self.read_timeout(1))
    }

    /// Sends a bare `length + address` header on an arbitrary write
    /// command, for devices that support replaying the previous payload
    /// at a new address (`an851_replicate_write`).
    pub fn replicate_write(&mut self, write_command: u8, length: u8, address: u32) -> Result<Frame> {
        let payload = [
            length,
            (address & 0xFF) as u8,
            ((address >> 8) & 0xFF) as u8,
            ((address >> 16) & 0xFF) as u8,
        ];
        self.request(write_command, &payload, self.write_timeout(length as u32))
    }

    pub fn read_timeout_for(&self, request_length: u32) -> Duration {
        self.read_timeout(request_length)
    }

    pub fn write_timeout_for(&self, request_length: u32) -> Duration {
        self.write_timeout(request_length)
    }

    pub fn erase_timeout_for(&self) -> Duration {
        self.erase_timeout()
    }

    /// Byte-granular read of flash, EEPROM, or configuration space
    /// (`an851_rd`). Validates that the device echoes back the same
    /// length and address it was asked for.
    fn rd(&mut self, cmd: u8, address: u32, length: u8) -> Result<Vec<u8>> {
        let payload = [
            length,
            (address & 0xFF) as u8,
            ((address >> 8) & 0xFF) as u8,
            ((address >> 16) & 0xFF) as u8,
        ];
        let reply = self.request(cmd, &payload, self.read_timeout(length as u32))?;

        if reply.payload.len() < 4 {
            return Err(RigelError::ResponseShape("read reply missing length/address header"));
        }
        let rxlen = reply.payload[0];
        let rxaddr = reply.payload[1] as u32
            | (reply.payload[2] as u32) << 8
            | (reply.payload[3] as u32) << 16;

        if rxlen != length || rxaddr != address {
            return Err(RigelError::ResponseShape("read reply length/address does not match request"));
        }
        if reply.payload.len() < 4 + length as usize {
            return Err(RigelError::ResponseShape("read reply shorter than its own length field"));
        }

        Ok(reply.payload[4..4 + length as usize].to_vec())
    }

    pub fn rd_flash(&mut self, address: u32, length: u8) -> Result<Vec<u8>> {
        self.rd(command::RD_FLASH, address, length)
    }

    pub fn rd_eeprom(&mut self, address: u16, length: u8) -> Result<Vec<u8>> {
        self.rd(command::RD_EEDATA, address as u32, length)
    }

    pub fn rd_config(&mut self, address: u32, length: u8) -> Result<Vec<u8>> {
        self.rd(command::RD_CONFIG, address, length)
    }

    /// Writes whole blocks (8 bytes each) of flash. `data.len()` must be
    /// exactly `blocks as usize * 8`.
    pub fn wr_flash(&mut self, address: u32, blocks: u8, data: &[u8]) -> Result<()> {
        let bytelen = blocks as usize * 8;
        if data.len() != bytelen {
            return Err(RigelError::Alignment("wr_flash data length must equal blocks * 8"));
        }
        let mut payload = Vec::with_capacity(4 + bytelen);
        payload.push(blocks);
        payload.push((address & 0xFF) as u8);
        payload.push(((address >> 8) & 0xFF) as u8);
        payload.push(((address >> 16) & 0xFF) as u8);
        payload.extend_from_slice(data);

        self.request(command::WR_FLASH, &payload, self.write_timeout(bytelen as u32))?;
        Ok(())
    }

    /// Erases `rows` rows (64 bytes each) of flash starting at `address`.
    pub fn er_flash(&mut self, address: u32, rows: u8) -> Result<()> {
        let payload = [
            rows,
            (address & 0xFF) as u8,
            ((address >> 8) & 0xFF) as u8,
            ((address >> 16) & 0xFF) as u8,
        ];
        self.request(command::ER_FLASH, &payload, self.erase_timeout())?;
        Ok(())
    }

    pub fn wr_eeprom(&mut self, address: u16, data: &[u8]) -> Result<()> {
        let mut payload = Vec::with_capacity(4 + data.len());
        payload.push(data.len() as u8);
        payload.push((address & 0xFF) as u8);
        payload.push(((address >> 8) & 0xFF) as u8);
        payload.push(0x00);
        payload.extend_from_slice(data);

        self.request(command::WR_EEDATA, &payload, self.write_timeout(data.len() as u32))?;
        Ok(())
    }

    pub fn wr_config(&mut self, confaddr: u8, data: &[u8]) -> Result<()> {
        let mut payload = Vec::with_capacity(4 + data.len());
        payload.push(data.len() as u8);
        payload.push(confaddr);
        payload.push(0x00);
        payload.push(0x30);
        payload.extend_from_slice(data);

        self.request(command::WR_CONFIG, &payload, self.write_timeout(data.len() as u32))?;
        Ok(())
    }

    /// The IFI Robotics bootloader extension: erase-as-write, `rows` rows
    /// at `address` each filled with `val`.
    pub fn ifi_wr_row(&mut self, address: u32, rows: u8, val: u8) -> Result<()> {
        let payload = [
            rows,
            (address & 0xFF) as u8,
            ((address >> 8) & 0xFF) as u8,
            ((address >> 16) & 0xFF) as u8,
            val,
        ];
        self.request(command::IFI_WR_ROW, &payload, self.write_timeout(rows as u32))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;

    fn queue_reply(t: &mut MockTransport, frame: &Frame) {
        t.queue_read(frame.encode().unwrap().to_vec());
    }

    #[test]
    fn version_round_trips_through_mock_transport() {
        let mut t = MockTransport::new();
        let reply = Frame::new(command::RD_VERSION, &[0x01, 0x01]).unwrap();
        queue_reply(&mut t, &reply);

        let mut engine = ProtocolEngine::new(t, 2, 5, 1_000_000);
        let version = engine.version().unwrap();
        assert_eq!(version, 0x0101);
    }

    #[test]
    fn retries_on_silence_then_succeeds() {
        let mut t = MockTransport::new();
        // First attempt sees two empty reads (silence) and gives up;
        // the retry's read then finds the queued reply.
        t.queue_read(vec![]);
        t.queue_read(vec![]);
        let reply = Frame::new(command::RD_VERSION, &[0x01, 0x02]).unwrap();
        queue_reply(&mut t, &reply);

        let mut engine = ProtocolEngine::new(t, 2, 5, 0);
        let version = engine.version().unwrap();
        assert_eq!(version, 0x0102);
        assert_eq!(engine.transport_mut().sent.len(), 2);
    }

    #[test]
    fn retries_on_a_decode_failure_then_succeeds() {
        let mut t = MockTransport::new();
        // The first reply is a frame whose checksum byte has been
        // tampered with; the engine must retry (re-send) rather than fail
        // outright, and the retry's reply decodes cleanly.
        let mut bad = Frame::new(command::RD_VERSION, &[0x01, 0x02]).unwrap().encode().unwrap();
        let len = bad.len();
        bad[len - 2] ^= 0xFF;
        t.queue_read(bad.to_vec());
        let reply = Frame::new(command::RD_VERSION, &[0x01, 0x02]).unwrap();
        queue_reply(&mut t, &reply);

        let mut engine = ProtocolEngine::new(t, 2, 5, 0);
        let version = engine.version().unwrap();
        assert_eq!(version, 0x0102);
        assert_eq!(engine.transport_mut().sent.len(), 2);
    }

    #[test]
    fn gives_up_after_max_retries_of_decode_failures() {
        let mut t = MockTransport::new();
        for _ in 0..4 {
            let mut bad = Frame::new(command::RD_VERSION, &[0x01, 0x02]).unwrap().encode().unwrap();
            let len = bad.len();
            bad[len - 2] ^= 0xFF;
            t.queue_read(bad.to_vec());
        }

        let mut engine = ProtocolEngine::new(t, 1, 1, 0);
        let result = engine.version();
        assert!(matches!(result, Err(RigelError::ChecksumMismatch { .. })));
        assert_eq!(engine.transport_mut().sent.len(), 4);
    }

    #[test]
    fn gives_up_after_max_retries_with_no_reply() {
        let t = MockTransport::new();
        let mut engine = ProtocolEngine::new(t, 1, 1, 0);
        let result = engine.version();
        assert!(matches!(result, Err(RigelError::Timeout { .. })));
    }

    #[test]
    fn echo_mismatch_is_not_retried() {
        let mut t = MockTransport::new();
        // Device replies to a different command than was sent.
        let wrong_reply = Frame::new(command::RD_FLASH, &[]).unwrap();
        queue_reply(&mut t, &wrong_reply);

        let mut engine = ProtocolEngine::new(t, 1, 1, 0);
        let result = engine.version();
        assert!(matches!(result, Err(RigelError::EchoMismatch { .. })));
    }

    #[test]
    fn reset_sends_pic_reset_and_does_not_wait_for_a_reply() {
        let t = MockTransport::new();
        let mut engine = ProtocolEngine::new(t, 1, 1, 0);
        engine.reset().unwrap();
        assert_eq!(engine.transport_mut().sent.len(), 1);
    }

    #[test]
    fn rd_flash_returns_just_the_data_bytes() {
        let mut t = MockTransport::new();
        let address = 0x3FFFFEu32;
        let reply_payload = [2u8, 0xFE, 0xFF, 0x3F, 0xAB, 0xCD];
        let reply = Frame::new(command::RD_FLASH, &reply_payload).unwrap();
        queue_reply(&mut t, &reply);

        let mut engine = ProtocolEngine::new(t, 1, 1, 0);
        let data = engine.rd_flash(address, 2).unwrap();
        assert_eq!(data, vec![0xAB, 0xCD]);
    }

    #[test]
    fn rd_flash_rejects_an_address_mismatch() {
        let mut t = MockTransport::new();
        let reply_payload = [2u8, 0x00, 0x00, 0x00, 0xAB, 0xCD];
        let reply = Frame::new(command::RD_FLASH, &reply_payload).unwrap();
        queue_reply(&mut t, &reply);

        let mut engine = ProtocolEngine::new(t, 1, 1, 0);
        let result = engine.rd_flash(0x3FFFFE, 2);
        assert!(matches!(result, Err(RigelError::ResponseShape(_))));
    }

    #[test]
    fn wr_flash_sends_blocks_and_address() {
        let mut t = MockTransport::new();
        let ack = Frame::new(command::WR_FLASH, &[]).unwrap();
        queue_reply(&mut t, &ack);

        let mut engine = ProtocolEngine::new(t, 1, 1, 0);
        let data = [0u8; 16];
        engine.wr_flash(0x002000, 2, &data).unwrap();

        let sent = &engine.transport_mut().sent[0];
        let decoded = Frame::decode(sent).unwrap();
        assert_eq!(decoded.command, command::WR_FLASH);
        assert_eq!(decoded.payload[0], 2);
    }

    #[test]
    fn wr_flash_rejects_misaligned_data() {
        let t = MockTransport::new();
        let mut engine = ProtocolEngine::new(t, 1, 1, 0);
        let result = engine.wr_flash(0, 2, &[0u8; 15]);
        assert!(matches!(result, Err(RigelError::Alignment(_))));
    }

    #[test]
    fn repeat_resends_the_last_issued_command() {
        let mut t = MockTransport::new();
        let ack = Frame::new(command::WR_FLASH, &[]).unwrap();
        queue_reply(&mut t, &ack);
        queue_reply(&mut t, &ack);

        let mut engine = ProtocolEngine::new(t, 1, 1, 0);
        engine.wr_flash(0x0800, 1, &[0u8; 8]).unwrap();
        let reply = engine.repeat().unwrap();

        assert_eq!(reply.command, command::WR_FLASH);
        let sent = &engine.transport_mut().sent;
        assert_eq!(sent.len(), 2);
        let second = Frame::decode(&sent[1]).unwrap();
        assert_eq!(second.command, command::WR_FLASH);
        assert!(second.payload.is_empty());
    }

    #[test]
    fn replicate_write_sends_a_bare_length_and_address_header() {
        let mut t = MockTransport::new();
        let ack = Frame::new(command::WR_FLASH, &[]).unwrap();
        queue_reply(&mut t, &ack);

        let mut engine = ProtocolEngine::new(t, 1, 1, 0);
        engine.replicate_write(command::WR_FLASH, 2, 0x002000).unwrap();

        let sent = &engine.transport_mut().sent[0];
        let decoded = Frame::decode(sent).unwrap();
        assert_eq!(decoded.command, command::WR_FLASH);
        assert_eq!(
            decoded.payload.as_slice(),
            &[2, 0x00, 0x20, 0x00]
        );
    }
}
