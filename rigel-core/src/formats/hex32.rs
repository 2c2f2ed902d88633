//! Component E: the Intel HEX32 firmware file format, with extended linear
//! and segment addressing. Grounded on `inhex32_parse_line`/`inhex32_read`/
//! `inhex32_write` in `inhex32.c`.

use std::fs::File;
use std::io::{BufRead, BufReader, Write};

use crate::error::{Result, RigelError};

const MAX_RECORD_DATA: usize = 16;

const RECORD_DATA: u8 = 0x00;
const RECORD_EOF: u8 = 0x01;
const RECORD_EXT_SEGMENT: u8 = 0x02;
const RECORD_EXT_LINEAR: u8 = 0x04;

/// Flash addresses with this bit set come from MCC18/MPLINK emitting
/// configuration-register data into the same HEX32 file as the program;
/// the FRC bootloader can't write that region, so it's silently skipped.
const CONFIG_REGISTER_MASK: u32 = 0x300000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AddressMode {
    Literal,
    Segment,
    Linear,
}

struct Record {
    length: u8,
    address: u32,
    record_type: u8,
    data: [u8; MAX_RECORD_DATA],
}

fn hex_checksum(sum: u32) -> u8 {
    (!(sum as u8)).wrapping_add(1)
}

/// Per-file parser state: the extended-address mode and upper bits carried
/// across records, exactly as `inhex32_parse_line`'s static locals do.
struct Hex32Parser {
    address_mode: AddressMode,
    address_ext: u16,
}

impl Hex32Parser {
    fn new() -> Self {
        Hex32Parser {
            address_mode: AddressMode::Literal,
            address_ext: 0,
        }
    }

    fn parse_line(&mut self, line_no: usize, line: &str) -> Result<Option<Record>> {
        let line = line.trim_end_matches(['\r', '\n']);
        let line = line
            .strip_prefix(':')
            .ok_or_else(|| RigelError::Parse { line: line_no, message: "record does not start with ':'".into() })?;

        if line.len() < 8 {
            return Err(RigelError::Parse { line: line_no, message: "record too short".into() });
        }

        let length = u8::from_str_radix(&line[0..2], 16)
            .map_err(|_| RigelError::Parse { line: line_no, message: "bad length field".into() })?;
        let raw_address = u32::from_str_radix(&line[2..6], 16)
            .map_err(|_| RigelError::Parse { line: line_no, message: "bad address field".into() })?;
        let record_type = u8::from_str_radix(&line[6..8], 16)
            .map_err(|_| RigelError::Parse { line: line_no, message: "bad record type field".into() })?;

        if record_type == RECORD_EOF {
            return Ok(None);
        }

        if length as usize > MAX_RECORD_DATA {
            return Err(RigelError::Parse { line: line_no, message: "record data exceeds 16 bytes".into() });
        }

        let data_start = 8;
        let data_end = data_start + length as usize * 2;
        let checksum_end = data_end + 2;
        if line.len() < checksum_end {
            return Err(RigelError::Parse { line: line_no, message: "record truncated before checksum".into() });
        }

        let mut data = [0u8; MAX_RECORD_DATA];
        for i in 0..length as usize {
            let byte_str = &line[data_start + i * 2..data_start + i * 2 + 2];
            data[i] = u8::from_str_radix(byte_str, 16)
                .map_err(|_| RigelError::Parse { line: line_no, message: "bad data byte".into() })?;
        }

        let checksum = u8::from_str_radix(&line[data_end..checksum_end], 16)
            .map_err(|_| RigelError::Parse { line: line_no, message: "bad checksum field".into() })?;

        let mut sum = length as u32 + record_type as u32;
        sum += (raw_address >> 8) & 0xFF;
        sum += raw_address & 0xFF;
        for &b in &data[..length as usize] {
            sum += b as u32;
        }
        let computed = hex_checksum(sum);
        if computed != checksum {
            return Err(RigelError::Parse {
                line: line_no,
                message: format!("checksum mismatch: calculated {computed:#04x}, record has {checksum:#04x}"),
            });
        }

        let mut address = raw_address;
        match record_type {
            RECORD_DATA => match self.address_mode {
                AddressMode::Segment => {
                    address = raw_address.wrapping_add((self.address_ext as u32) << 4);
                }
                AddressMode::Linear => {
                    address = (raw_address & 0xFFFF) | ((self.address_ext as u32) << 16);
                }
                AddressMode::Literal => {}
            },
            RECORD_EXT_SEGMENT => {
                self.address_mode = AddressMode::Segment;
                self.address_ext = u16::from_be_bytes([data[0], data[1]]);
            }
            RECORD_EXT_LINEAR => {
                self.address_mode = AddressMode::Linear;
                self.address_ext = u16::from_be_bytes([data[0], data[1]]);
            }
            other => {
                return Err(RigelError::Parse {
                    line: line_no,
                    message: format!("unsupported record type {other:#04x}"),
                });
            }
        }

        Ok(Some(Record { length, address, record_type, data }))
    }
}

/// Scans a HEX32 file without materializing a buffer, returning the
/// `(start, end)` address range its data records cover — the first pass
/// `rigel_program_alloc` makes (with a `NULL` buffer) to size its
/// allocation. Configuration-register data records (address & 0x300000
/// != 0) are ignored here exactly as `load` ignores them on the second
/// pass, so a file that carries both program and config data doesn't
/// inflate `end` past the device's actual capacity.
pub fn sniff_bounds(path: &str) -> Result<(u32, u32)> {
    let file = File::open(path).map_err(RigelError::Transport)?;
    let mut parser = Hex32Parser::new();
    let mut start = 0u32;
    let mut end = 0u32;
    let mut first = true;
    let mut warned_config_data = false;

    for (i, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(RigelError::Transport)?;
        let line_no = i + 1;
        match parser.parse_line(line_no, &line)? {
            None => break,
            Some(rec) if rec.record_type == RECORD_DATA => {
                if rec.address & CONFIG_REGISTER_MASK != 0 {
                    if !warned_config_data {
                        log::warn!("ignoring configuration register data present in {path}");
                        warned_config_data = true;
                    }
                    continue;
                }
                if first {
                    start = rec.address;
                    first = false;
                }
                start = start.min(rec.address);
                end = end.max(rec.address + rec.length as u32);
            }
            Some(_) => {}
        }
    }

    Ok((start, end))
}

/// Parses a HEX32 file's data records into `buffer`, which is addressed
/// starting at absolute address 0 (matching `inhex32_read`'s `picmem[rec
/// .address]` indexing). Bytes `buffer` doesn't cover are left untouched by
/// the caller's own fill (`rigel_program_alloc` pre-fills with `0xFF`).
/// Data records whose address falls in the configuration-register region
/// are skipped with a one-time warning rather than treated as an error or
/// written into `buffer`, matching `sniff_bounds`.
pub fn load(path: &str, buffer: &mut [u8]) -> Result<(u32, u32)> {
    let file = File::open(path).map_err(RigelError::Transport)?;
    let mut parser = Hex32Parser::new();
    let mut start = 0u32;
    let mut end = 0u32;
    let mut first = true;
    let mut warned_config_data = false;

    for (i, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(RigelError::Transport)?;
        let line_no = i + 1;
        let rec = match parser.parse_line(line_no, &line)? {
            None => break,
            Some(rec) => rec,
        };
        if rec.record_type != RECORD_DATA {
            continue;
        }

        if rec.address & CONFIG_REGISTER_MASK != 0 {
            if !warned_config_data {
                log::warn!("ignoring configuration register data present in {path}");
                warned_config_data = true;
            }
            continue;
        }

        let record_end = rec.address as usize + rec.length as usize;
        if record_end > buffer.len() {
            return Err(RigelError::Capacity {
                needed: record_end as u32,
                capacity: buffer.len() as u32,
            });
        }

        buffer[rec.address as usize..record_end].copy_from_slice(&rec.data[..rec.length as usize]);

        if first && rec.address != 0 {
            start = rec.address;
        }
        first = false;
        start = start.min(rec.address);
        end = end.max(rec.address + rec.length as u32);
    }

    Ok((start, end))
}

/// Writes `data[start..end]` as a HEX32 file, inserting an extended linear
/// address record whenever the high word of the address changes
/// (`inhex32_write`).
pub fn write(path: &str, data: &[u8], start: u32, end: u32) -> Result<()> {
    let mut out = File::create(path).map_err(RigelError::Transport)?;

    write!(out, ":020000040000FA\r\n").map_err(RigelError::Transport)?;

    let mut ext: u32 = 0;
    let mut addr = start;
    let max_len = MAX_RECORD_DATA as u32;

    while addr < end {
        let len = max_len.min(end - addr);

        let hiword = addr >> 16;
        if ext != hiword {
            ext = hiword;
            let mut chk = 0x06u32 + ((ext >> 8) & 0xFF) + (ext & 0xFF);
            chk = hex_checksum(chk) as u32;
            write!(out, ":02000004{:04X}{:02X}\r\n", ext, chk as u8).map_err(RigelError::Transport)?;
        }

        write!(out, ":{:02X}{:04X}{:02X}", len, addr & 0xFFFF, RECORD_DATA).map_err(RigelError::Transport)?;

        let mut chk = len + ((addr >> 8) & 0xFF) + (addr & 0xFF) + RECORD_DATA as u32;
        for i in 0..len {
            let byte = data[(addr + i) as usize];
            write!(out, "{:02X}", byte).map_err(RigelError::Transport)?;
            chk += byte as u32;
        }
        write!(out, "{:02X}\r\n", hex_checksum(chk)).map_err(RigelError::Transport)?;

        addr += len;
    }

    write!(out, ":00000001FF\r\n").map_err(RigelError::Transport)?;
    Ok(())
}
