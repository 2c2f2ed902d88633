//! Component D: device identification, memory geometry, and the
//! chunked/bounds-checked operations built on top of the protocol engine's
//! byte-granular primitives. Grounded on `device.c`/`device.h` and the
//! PIC18F constants in `pic18.h`.

use crate::error::{Result, RigelError};
use crate::protocol::ProtocolEngine;
use crate::transport::Transport;

/// Flash write granularity.
pub const BYTES_PER_BLOCK: u32 = 8;
/// Flash erase granularity.
pub const BYTES_PER_ROW: u32 = 64;

/// Fixed flash address of the two device-identification bytes.
pub const DEVICE_ID_ADDRESS: u32 = 0x3F_FFFE;

/// Address bounds for flash, EEPROM, and configuration space on one
/// device family member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryLayout {
    pub flash_low: u32,
    pub flash_high: u32,
    pub eeprom_low: u32,
    pub eeprom_high: u32,
    pub config_low: u32,
    pub config_high: u32,
}

impl MemoryLayout {
    fn flash_in_bounds(&self, address: u32, length: u32) -> bool {
        length > 0 && address >= self.flash_low && address.saturating_add(length - 1) <= self.flash_high
    }

    fn eeprom_in_bounds(&self, address: u32, length: u32) -> bool {
        length > 0
            && address >= self.eeprom_low
            && address.saturating_add(length - 1) <= self.eeprom_high
    }
}

/// A candidate entry in the device-geometry table consulted at connect
/// time. `dev_id_mask` is matched against the 16-bit ID register reading
/// with `id & dev_id_mask != 0`, exactly as `device_connect`'s linear scan
/// does.
#[derive(Debug, Clone)]
pub struct DeviceGeometry {
    pub dev_id_mask: u16,
    pub dev_name: String,
    pub mem: MemoryLayout,
    pub rlag_ms: u32,
    pub wlag_ms: u32,
    pub reset_lag_us: u64,
    pub max_packet_size: u8,
    pub verify_on_write: bool,
}

/// The fourteen PIC18F configuration register bytes (CONFIG1L through
/// CONFIG7H), in the order `an851_rd_config` reads them starting at
/// `config_low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigRegisters(pub [u8; 14]);

impl ConfigRegisters {
    pub fn c1l(&self) -> u8 { self.0[0] }
    pub fn c1h(&self) -> u8 { self.0[1] }
    pub fn c2l(&self) -> u8 { self.0[2] }
    pub fn c2h(&self) -> u8 { self.0[3] }
    pub fn c3l(&self) -> u8 { self.0[4] }
    pub fn c3h(&self) -> u8 { self.0[5] }
    pub fn c4l(&self) -> u8 { self.0[6] }
    pub fn c4h(&self) -> u8 { self.0[7] }
    pub fn c5l(&self) -> u8 { self.0[8] }
    pub fn c5h(&self) -> u8 { self.0[9] }
    pub fn c6l(&self) -> u8 { self.0[10] }
    pub fn c6h(&self) -> u8 { self.0[11] }
    pub fn c7l(&self) -> u8 { self.0[12] }
    pub fn c7h(&self) -> u8 { self.0[13] }

    pub fn watchdog_enabled(&self) -> bool {
        self.c2h() & 0x01 != 0
    }

    pub fn watchdog_postscaler(&self) -> u8 {
        (self.c2h() & 0x1E) >> 1
    }

    pub fn power_monitor(&self) -> u8 {
        self.c3l() & 0x03
    }

    /// Raw BBSIZ bits from CONFIG4L: `0x00`, `0x10`, `0x20`, or `0x30`.
    pub fn boot_block_size_bits(&self) -> u8 {
        self.c4l() & 0x30
    }

    pub fn extended_instruction_set(&self) -> bool {
        self.c4l() & 0x40 != 0
    }

    pub fn debug_enabled(&self) -> bool {
        self.c4l() & 0x80 != 0
    }

    pub fn stack_overflow_reset_enabled(&self) -> bool {
        self.c4l() & 0x01 != 0
    }

    /// CONFIG5L code-protect bit for `bank` (0-7).
    pub fn code_protected(&self, bank: u8) -> bool {
        self.c5l() & (0x01 << bank) != 0
    }

    pub fn data_eeprom_code_protected(&self) -> bool {
        self.c5h() & 0x80 != 0
    }

    pub fn boot_block_code_protected(&self) -> bool {
        self.c5h() & 0x40 != 0
    }

    /// CONFIG6L write-protect bit for `bank` (0-7).
    pub fn write_protected(&self, bank: u8) -> bool {
        self.c6l() & (0x01 << bank) != 0
    }

    pub fn data_eeprom_write_protected(&self) -> bool {
        self.c6h() & 0x80 != 0
    }

    pub fn boot_block_write_protected(&self) -> bool {
        self.c6h() & 0x40 != 0
    }

    pub fn config_write_protected(&self) -> bool {
        self.c6h() & 0x20 != 0
    }

    /// CONFIG7L table read protect bit for `bank` (0-7).
    pub fn table_read_protected(&self, bank: u8) -> bool {
        self.c7l() & (0x01 << bank) != 0
    }
}

/// Per-family defaults used for the safe, generous identification pass
/// before a device's real geometry (and its rlag/wlag) is known
/// (`an851_safe_init`).
const IDENTIFY_RLAG_MS: u32 = 2;
const IDENTIFY_WLAG_MS: u32 = 5;
const IDENTIFY_RESET_LAG_US: u64 = 1_000_000;

/// A connected PIC18F bootloader session: protocol engine plus the
/// identified device's geometry, configuration, and IFI-extension status.
pub struct Device<T: Transport> {
    protocol: ProtocolEngine<T>,
    pub dev_id: u16,
    pub bootver: u16,
    pub dev_name: String,
    pub mem: MemoryLayout,
    pub config: ConfigRegisters,
    pub is_ifi: bool,
    pub max_packet_size: u8,
    pub verify_on_write: bool,
    connected: bool,
    /// `--no-ifi`: forces erase/write to behave as though the device were
    /// a standard AN851 target even when the IFI probe detected the
    /// extension. `run_user_code` still uses the IFI run command when
    /// `is_ifi` is true regardless of this override — the original's
    /// `rigel.c` `was_ifi` dance exits the same way it connected.
    ifi_override: Option<bool>,
}

/// Reports progress of a long-running operation as `(done, total)`.
pub type Progress<'a> = &'a mut dyn FnMut(u64, u64);

/// A progress callback that does nothing, for callers that don't want a
/// progress bar.
pub fn null_progress(_done: u64, _total: u64) {}

impl<T: Transport> Device<T> {
    /// Identifies the attached device against `table` and connects to it.
    /// Mirrors `device_connect`: a generous identify-phase read of the
    /// version and ID registers, a table lookup, re-initialization with
    /// the matched device's timing, an IFI-extension probe, a
    /// configuration-register read, and a BBSIZ-driven `flash_low`
    /// adjustment.
    pub fn connect(transport: T, table: &[DeviceGeometry]) -> Result<Self> {
        let mut protocol = ProtocolEngine::new(
            transport,
            IDENTIFY_RLAG_MS,
            IDENTIFY_WLAG_MS,
            IDENTIFY_RESET_LAG_US,
        );

        let bootver = protocol.version()?;

        let id_bytes = protocol.rd_flash(DEVICE_ID_ADDRESS, 2)?;
        let dev_id = u16::from_be_bytes([id_bytes[0], id_bytes[1]]);

        let geometry = table
            .iter()
            .find(|candidate| dev_id & candidate.dev_id_mask != 0)
            .ok_or(RigelError::UnknownDevice { device_id: dev_id })?;

        let mut protocol = ProtocolEngine::new(
            protocol.into_transport(),
            geometry.rlag_ms,
            geometry.wlag_ms,
            geometry.reset_lag_us,
        );

        let is_ifi = Self::probe_ifi(&mut protocol, &geometry.mem)?;

        let config_bytes = protocol.rd_config(geometry.mem.config_low, 14)?;
        let mut config_array = [0u8; 14];
        config_array.copy_from_slice(&config_bytes[..14]);
        let config = ConfigRegisters(config_array);

        let mut mem = geometry.mem;
        mem.flash_low = match config.boot_block_size_bits() {
            0x00 => 0x0800,
            0x10 => 0x1000,
            _ => 0x2000,
        };

        Ok(Device {
            protocol,
            dev_id,
            bootver,
            dev_name: geometry.dev_name.clone(),
            mem,
            config,
            is_ifi,
            max_packet_size: geometry.max_packet_size,
            verify_on_write: geometry.verify_on_write,
            connected: true,
            ifi_override: None,
        })
    }

    /// Overrides whether erase/write operations treat this device as IFI-
    /// extended, independent of what the connect-time probe detected
    /// (`rigel.c`'s `-i`/`--no-ifi` flag). Pass `None` to go back to the
    /// probed value.
    pub fn set_ifi_override(&mut self, override_: Option<bool>) {
        self.ifi_override = override_;
    }

    /// The IFI-ness erase/write chunking should behave as, honoring
    /// [`Device::set_ifi_override`]. `run_user_code` does not consult
    /// this — it always uses the probed `is_ifi`.
    fn effective_ifi(&self) -> bool {
        self.ifi_override.unwrap_or(self.is_ifi)
    }

    /// Saves the first row of flash, attempts an `IFI_WR_ROW`, and
    /// restores the row if the write succeeded — a non-destructive probe
    /// for the IFI Robotics bootloader extension (`device_is_ifi`).
    fn probe_ifi(protocol: &mut ProtocolEngine<T>, mem: &MemoryLayout) -> Result<bool> {
        let saved = protocol.rd_flash(mem.flash_low, BYTES_PER_ROW as u8)?;

        match protocol.ifi_wr_row(mem.flash_low, 1, 0x00) {
            Ok(()) => {
                protocol.wr_flash(mem.flash_low, (BYTES_PER_ROW / BYTES_PER_BLOCK) as u8, &saved)?;
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }

    /// The value a freshly erased flash cell on this device reads back
    /// as: `0x00` on devices implementing the IFI write-row-to-erase
    /// extension, `0xFF` on standard AN851 targets. Reflects the probed
    /// hardware behavior, not [`Device::set_ifi_override`] — overriding
    /// which erase command gets sent doesn't change what the silicon
    /// reads back as.
    pub fn erase_byte(&self) -> u8 {
        if self.is_ifi {
            0x00
        } else {
            0xFF
        }
    }

    fn require_connected(&self) -> Result<()> {
        if self.connected {
            Ok(())
        } else {
            Err(RigelError::SessionClosed("device is disconnected"))
        }
    }

    /// Resets the device back into bootloader mode.
    pub fn reset(&mut self) -> Result<()> {
        self.require_connected()?;
        self.protocol.reset()
    }

    /// Releases the connection. Idempotent: calling this more than once is
    /// a no-op after the first call.
    pub fn disconnect(&mut self) {
        self.connected = false;
    }

    /// Leaves bootloader mode and starts the user program. IFI devices
    /// jump directly (`IFI_RUN_CODE`); standard AN851 devices must instead
    /// write a non-`0xFF` byte to the last byte of data EEPROM and reset
    /// (`device_run_program`).
    pub fn run_user_code(&mut self) -> Result<()> {
        self.require_connected()?;
        if self.is_ifi {
            self.protocol.run_user_code()
        } else {
            self.protocol.wr_eeprom(self.mem.eeprom_high as u16, &[0x57])?;
            self.protocol.reset()
        }
    }

    /// Erases `rows` rows of flash starting at `address`, in chunks of at
    /// most 255 rows (the largest count `ER_FLASH`/`IFI_WR_ROW` can carry
    /// in one packet). Uses `IFI_WR_ROW` with a fill value of zero on IFI
    /// devices, `ER_FLASH` otherwise (`device_erase_flash`).
    pub fn erase_flash(&mut self, address: u32, rows: u32, progress: Progress) -> Result<()> {
        self.require_connected()?;
        let length = rows * BYTES_PER_ROW;
        if !self.mem.flash_in_bounds(address, length) {
            return Err(RigelError::RegionViolation {
                address,
                length,
                low: self.mem.flash_low,
                high: self.mem.flash_high,
            });
        }

        let mut erased = 0u32;
        while erased < rows {
            let chunk = (rows - erased).min(0xFF);
            let chunk_addr = address + erased * BYTES_PER_ROW;
            if self.effective_ifi() {
                self.protocol.ifi_wr_row(chunk_addr, chunk as u8, 0x00)?;
            } else {
                self.protocol.er_flash(chunk_addr, chunk as u8)?;
            }
            erased += chunk;
            progress(erased as u64, rows as u64);
        }
        Ok(())
    }

    /// Erases the entire user-writable flash region (`rigel_erase_device`).
    pub fn erase_device(&mut self, progress: Progress) -> Result<()> {
        let rows = (self.mem.flash_high - self.mem.flash_low + 1) / BYTES_PER_ROW;
        self.erase_flash(self.mem.flash_low, rows, progress)
    }

    /// Writes `data` to flash at `address`, in chunks of
    /// `max_packet_size / 8` blocks, zero-padding the scratch buffer for
    /// the final partial chunk so every write lands 8-byte aligned
    /// (`device_write_flash`). Verifies each chunk by reading it back if
    /// `verify_on_write` is set.
    pub fn write_flash(&mut self, address: u32, data: &[u8], progress: Progress) -> Result<()> {
        self.require_connected()?;
        if !self.mem.flash_in_bounds(address, data.len() as u32) {
            return Err(RigelError::RegionViolation {
                address,
                length: data.len() as u32,
                low: self.mem.flash_low,
                high: self.mem.flash_high,
            });
        }

        let max_blocks = (self.max_packet_size as u32 / BYTES_PER_BLOCK).max(1);
        let total_blocks = (data.len() as u32 + BYTES_PER_BLOCK - 1) / BYTES_PER_BLOCK;

        let mut block_i = 0u32;
        let mut addr = address;
        while block_i < total_blocks {
            let blocks = (total_blocks - block_i).min(max_blocks);
            let nbytes = (blocks * BYTES_PER_BLOCK) as usize;
            let start = (block_i * BYTES_PER_BLOCK) as usize;

            let mut scratch = vec![0xFFu8; nbytes];
            let available = (data.len() - start).min(nbytes);
            scratch[..available].copy_from_slice(&data[start..start + available]);

            self.protocol.wr_flash(addr, blocks as u8, &scratch)?;

            if self.verify_on_write {
                let readback = self.protocol.rd_flash(addr, nbytes.min(250) as u8)?;
                if readback != scratch[..nbytes.min(250)] {
                    return Err(RigelError::VerifyMismatch { address: addr });
                }
            }

            block_i += blocks;
            addr += blocks * BYTES_PER_BLOCK;
            progress(block_i as u64, total_blocks as u64);
        }
        Ok(())
    }

    /// Reads `length` bytes of flash starting at `address`, in chunks of
    /// `max_packet_size` bytes (`device_read_flash`).
    pub fn read_flash(&mut self, address: u32, length: u32, progress: Progress) -> Result<Vec<u8>> {
        self.require_connected()?;
        if !self.mem.flash_in_bounds(address, length) {
            return Err(RigelError::RegionViolation {
                address,
                length,
                low: self.mem.flash_low,
                high: self.mem.flash_high,
            });
        }

        let mut out = Vec::with_capacity(length as usize);
        let mut cur = 0u32;
        let max = self.max_packet_size as u32;
        while cur < length {
            let chunk = (length - cur).min(max);
            let data = self.protocol.rd_flash(address + cur, chunk as u8)?;
            out.extend_from_slice(&data);
            cur += chunk;
            progress(cur as u64, length as u64);
        }
        Ok(out)
    }

    /// Writes `data` to EEPROM at `address`, chunked by `max_packet_size`
    /// (`device_write_eeprom`).
    pub fn write_eeprom(&mut self, address: u16, data: &[u8], progress: Progress) -> Result<()> {
        self.require_connected()?;
        if !self.mem.eeprom_in_bounds(address as u32, data.len() as u32) {
            return Err(RigelError::RegionViolation {
                address: address as u32,
                length: data.len() as u32,
                low: self.mem.eeprom_low,
                high: self.mem.eeprom_high,
            });
        }

        let max = self.max_packet_size as usize;
        let mut c = 0usize;
        while c < data.len() {
            let chunk = (data.len() - c).min(max);
            self.protocol.wr_eeprom(address + c as u16, &data[c..c + chunk])?;

            if self.verify_on_write {
                let readback = self.protocol.rd_eeprom(address + c as u16, chunk as u8)?;
                if readback != data[c..c + chunk] {
                    return Err(RigelError::VerifyMismatch {
                        address: (address as usize + c) as u32,
                    });
                }
            }

            c += chunk;
            progress(c as u64, data.len() as u64);
        }
        Ok(())
    }

    /// Reads `length` bytes of EEPROM starting at `address`, chunked by
    /// `max_packet_size` (`device_read_eeprom`).
    pub fn read_eeprom(&mut self, address: u16, length: u16, progress: Progress) -> Result<Vec<u8>> {
        self.require_connected()?;
        if !self.mem.eeprom_in_bounds(address as u32, length as u32) {
            return Err(RigelError::RegionViolation {
                address: address as u32,
                length: length as u32,
                low: self.mem.eeprom_low,
                high: self.mem.eeprom_high,
            });
        }

        let max = self.max_packet_size as u16;
        let mut out = Vec::with_capacity(length as usize);
        let mut c = 0u16;
        while c < length {
            let chunk = (length - c).min(max);
            let data = self.protocol.rd_eeprom(address + c, chunk as u8)?;
            out.extend_from_slice(&data);
            c += chunk;
            progress(c as u64, length as u64);
        }
        Ok(out)
    }

    /// Reads the boot sector (addresses `0..flash_low`), the bootloader's
    /// own code, into `bufsiz` bytes (`rigel_read_loader`).
    pub fn read_boot_sector(&mut self, progress: Progress) -> Result<Vec<u8>> {
        self.read_flash(0, self.mem.flash_low, progress)
    }

    /// Reads user program flash until four consecutive
    /// `max_packet_size`-byte chunks come back entirely erase-valued,
    /// which is taken as the program's end (`rigel_read_user`). IFI
    /// bootloaders clear bits on erase instead of setting them, so the
    /// erase value checked is `0x00` on IFI devices and `0xFF` otherwise.
    /// Returns the bytes from `flash_low` up to (but not including) the
    /// detected run of erased chunks.
    pub fn read_user_program(&mut self, progress: Progress) -> Result<Vec<u8>> {
        self.require_connected()?;
        let erase_byte = self.erase_byte();
        let max = self.max_packet_size as u32;
        let low = self.mem.flash_low;
        let high = self.mem.flash_high;

        let mut out = Vec::new();
        let mut addr = low;
        let mut consecutive_erased_chunks = 0u32;

        while addr < high {
            let chunk = (high - addr).min(max);
            let data = self.protocol.rd_flash(addr, chunk as u8)?;
            let all_erased = data.iter().all(|&b| b == erase_byte);

            out.extend_from_slice(&data);
            addr += chunk;

            if all_erased {
                consecutive_erased_chunks += 1;
            } else {
                consecutive_erased_chunks = 0;
            }

            if consecutive_erased_chunks == 4 {
                let trim = (consecutive_erased_chunks * max).min(out.len() as u32);
                out.truncate(out.len() - trim as usize);
                progress(addr as u64, addr as u64);
                break;
            }
            progress(addr as u64, high as u64);
        }

        Ok(out)
    }
}

#[cfg(test)]
impl<T: Transport> Device<T> {
    /// Builds a `Device` directly from known fields, skipping the
    /// connect-time identification handshake, for tests that only exercise
    /// the chunking/bounds logic of a single operation.
    fn for_test(transport: T, mem: MemoryLayout, max_packet_size: u8, is_ifi: bool, verify_on_write: bool) -> Self {
        Device {
            protocol: ProtocolEngine::new(transport, 2, 5, 0),
            dev_id: 0,
            bootver: 0,
            dev_name: "TEST".into(),
            mem,
            config: ConfigRegisters([0; 14]),
            is_ifi,
            max_packet_size,
            verify_on_write,
            connected: true,
            ifi_override: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::command;
    use crate::transport::mock::MockTransport;

    fn layout() -> MemoryLayout {
        MemoryLayout {
            flash_low: 0x0800,
            flash_high: 0x3FFF,
            eeprom_low: 0x00,
            eeprom_high: 0xFF,
            config_low: 0x30_0000,
            config_high: 0x30_000D,
        }
    }

    fn ack(cmd: u8, t: &mut MockTransport) {
        let frame = crate::frame::Frame::new(cmd, &[]).unwrap();
        t.queue_read(frame.encode().unwrap().to_vec());
    }

    #[test]
    fn erase_flash_splits_into_at_most_255_row_chunks() {
        let mut t = MockTransport::new();
        // 300 rows should split into a 255-row chunk and a 45-row chunk.
        ack(command::ER_FLASH, &mut t);
        ack(command::ER_FLASH, &mut t);

        let mem = MemoryLayout { flash_high: 0x6000, ..layout() };
        let mut dev = Device::for_test(t, mem, 250, false, false);
        let mut calls = Vec::new();
        dev.erase_flash(0x0800, 300, &mut |done, total| calls.push((done, total)))
            .unwrap();

        assert_eq!(calls, vec![(255, 300), (300, 300)]);
    }

    #[test]
    fn ifi_override_forces_standard_erase_command_on_an_ifi_device() {
        let mut t = MockTransport::new();
        ack(command::ER_FLASH, &mut t);

        let mut dev = Device::for_test(t, layout(), 250, true, false);
        dev.set_ifi_override(Some(false));
        dev.erase_flash(0x0800, 1, &mut |_, _| {}).unwrap();

        let sent = &dev.protocol.transport_mut().sent[0];
        let decoded = crate::frame::Frame::decode(sent).unwrap();
        assert_eq!(decoded.command, command::ER_FLASH);
    }

    #[test]
    fn erase_flash_rejects_out_of_bounds_region() {
        let t = MockTransport::new();
        let mut dev = Device::for_test(t, layout(), 250, false, false);
        let result = dev.erase_flash(0x0000, 1, &mut |_, _| {});
        assert!(matches!(result, Err(RigelError::RegionViolation { .. })));
    }

    #[test]
    fn write_flash_pads_the_final_partial_chunk_with_erase_value() {
        let mut t = MockTransport::new();
        ack(command::WR_FLASH, &mut t);

        let mut dev = Device::for_test(t, layout(), 32, false, false);
        // 12 bytes, not a multiple of 8: one chunk of 2 blocks (16 bytes),
        // padded with 0xFF.
        dev.write_flash(0x0800, &[1; 12], &mut |_, _| {}).unwrap();

        let sent = &dev.protocol.transport_mut().sent[0];
        let decoded = crate::frame::Frame::decode(sent).unwrap();
        assert_eq!(decoded.payload[0], 2); // blocks
        let written_data = &decoded.payload[4..20];
        assert_eq!(&written_data[..12], &[1u8; 12][..]);
        assert_eq!(&written_data[12..], &[0xFFu8; 4][..]);
    }

    #[test]
    fn read_user_program_stops_after_four_erased_chunks() {
        let mut t = MockTransport::new();
        let low = 0x0800u32;
        let high = 0x3FFFu32;
        let max = 64u8;

        // Two chunks of real data, then four erased (0xFF) chunks.
        for chunk in 0..2 {
            let addr = low + chunk as u32 * max as u32;
            let mut payload = vec![chunk as u8; max as usize + 4];
            payload[0] = max;
            payload[1] = (addr & 0xFF) as u8;
            payload[2] = ((addr >> 8) & 0xFF) as u8;
            payload[3] = ((addr >> 16) & 0xFF) as u8;
            for b in payload[4..].iter_mut() {
                *b = 0xAB;
            }
            let frame = crate::frame::Frame::new(command::RD_FLASH, &payload).unwrap();
            t.queue_read(frame.encode().unwrap().to_vec());
        }
        for chunk in 2..6 {
            let addr = low + chunk as u32 * max as u32;
            let mut payload = vec![0xFFu8; max as usize + 4];
            payload[0] = max;
            payload[1] = (addr & 0xFF) as u8;
            payload[2] = ((addr >> 8) & 0xFF) as u8;
            payload[3] = ((addr >> 16) & 0xFF) as u8;
            let frame = crate::frame::Frame::new(command::RD_FLASH, &payload).unwrap();
            t.queue_read(frame.encode().unwrap().to_vec());
        }

        let mem = MemoryLayout { flash_low: low, flash_high: high, ..layout() };
        let mut dev = Device::for_test(t, mem, max, false, false);
        let data = dev.read_user_program(&mut |_, _| {}).unwrap();

        assert_eq!(data.len(), 2 * max as usize);
        assert!(data.iter().all(|&b| b == 0xAB));
    }
}
