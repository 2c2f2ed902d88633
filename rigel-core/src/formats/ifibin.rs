//! Component F: the IFI Robotics fixed-width text dump format — one line
//! per 16-byte chunk, `AAAAAA XX XX ... XX\r\n`. Grounded on `ifi_bin_read`/
//! `ifi_bin_write` in `inhex32.c`.

use std::fs::File;
use std::io::{BufRead, BufReader, Write};

use crate::error::{Result, RigelError};

const DATA_LEN: usize = 16;

struct Line {
    address: u32,
    data: Vec<u8>,
}

fn parse_line(line_no: usize, line: &str) -> Result<Line> {
    let mut fields = line.split_whitespace();
    let address_str = fields
        .next()
        .ok_or_else(|| RigelError::Parse { line: line_no, message: "missing address field".into() })?;
    let address = u32::from_str_radix(address_str, 16)
        .map_err(|_| RigelError::Parse { line: line_no, message: "bad address field".into() })?;

    let mut data = Vec::with_capacity(DATA_LEN);
    for field in fields {
        let byte = u8::from_str_radix(field, 16)
            .map_err(|_| RigelError::Parse { line: line_no, message: "bad data byte".into() })?;
        data.push(byte);
    }

    Ok(Line { address, data })
}

/// Reads every non-blank line and returns the `(start, end)` address range
/// covered, taken from the first and last line's address plus their data
/// length — `ifi_bin_read`'s start/end sniff, done by scanning the whole
/// file rather than seeking to a fixed-width offset from the end (the
/// original assumes every line but the last is exactly 16 bytes wide).
pub fn sniff_bounds(path: &str) -> Result<(u32, u32)> {
    let file = File::open(path).map_err(RigelError::Transport)?;
    let mut start = None;
    let mut end = 0u32;

    for (i, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(RigelError::Transport)?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let rec = parse_line(i + 1, line)?;
        if start.is_none() {
            start = Some(rec.address);
        }
        end = end.max(rec.address + rec.data.len() as u32);
    }

    Ok((start.unwrap_or(0), end))
}

/// Parses an IFI-BIN file into `buffer`, addressed starting at absolute
/// address 0.
pub fn load(path: &str, buffer: &mut [u8]) -> Result<(u32, u32)> {
    let file = File::open(path).map_err(RigelError::Transport)?;
    let mut start = None;
    let mut end = 0u32;

    for (i, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(RigelError::Transport)?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let rec = parse_line(i + 1, line)?;

        let record_end = rec.address as usize + rec.data.len();
        if record_end > buffer.len() {
            return Err(RigelError::Capacity {
                needed: record_end as u32,
                capacity: buffer.len() as u32,
            });
        }
        buffer[rec.address as usize..record_end].copy_from_slice(&rec.data);

        if start.is_none() {
            start = Some(rec.address);
        }
        end = end.max(rec.address + rec.data.len() as u32);
    }

    Ok((start.unwrap_or(0), end))
}

/// Writes `data[start..end]` as an IFI-BIN file, 16 bytes per line,
/// padding a short final line with `0xFF` (`ifi_bin_write`).
pub fn write(path: &str, data: &[u8], start: u32, end: u32) -> Result<()> {
    let mut out = File::create(path).map_err(RigelError::Transport)?;

    let mut addr = start;
    while addr < end {
        let len = (DATA_LEN as u32).min(end - addr);

        write!(out, "{:06X}", addr).map_err(RigelError::Transport)?;
        for i in 0..len {
            write!(out, " {:02X}", data[(addr + i) as usize]).map_err(RigelError::Transport)?;
        }
        for _ in len..DATA_LEN as u32 {
            write!(out, " {:02X}", 0xFFu8).map_err(RigelError::Transport)?;
        }
        write!(out, "\r\n").map_err(RigelError::Transport)?;

        addr += len;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path_for(name: &str) -> String {
        format!("{}/rigel_ifibin_test_{name}.bin", std::env::temp_dir().display())
    }

    #[test]
    fn write_then_load_round_trips() {
        let data: Vec<u8> = (0..32u32).map(|i| i as u8).collect();
        let path = path_for("roundtrip");
        write(&path, &data, 0, 32).unwrap();

        let mut buf = vec![0xFFu8; 32];
        let (start, end) = load(&path, &mut buf).unwrap();
        assert_eq!(start, 0);
        assert_eq!(end, 32);
        assert_eq!(buf, data);
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn pads_a_short_final_line_with_0xff() {
        let data: Vec<u8> = vec![0xAA; 20];
        let path = path_for("short_final");
        write(&path, &data, 0, 20).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let second_line = contents.lines().nth(1).unwrap();
        // Second line covers bytes 16..20 (4 real bytes) then 12 bytes of
        // 0xFF padding.
        let fields: Vec<&str> = second_line.split_whitespace().collect();
        assert_eq!(fields.len(), 17); // address + 16 data fields
        assert_eq!(&fields[1..5], &["AA", "AA", "AA", "AA"]);
        assert_eq!(&fields[5..], &["FF"; 12]);
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn sniff_bounds_reads_first_and_last_line_addresses() {
        let data: Vec<u8> = (0..48u32).map(|i| i as u8).collect();
        let path = path_for("sniff");
        write(&path, &data, 0, 48).unwrap();

        let (start, end) = sniff_bounds(&path).unwrap();
        assert_eq!(start, 0);
        assert_eq!(end, 48);
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn rejects_data_that_does_not_fit_the_buffer() {
        let path = path_for("overflow");
        write(&path, &[0xAAu8; 16], 0, 16).unwrap();

        let mut buf = vec![0u8; 8];
        let result = load(&path, &mut buf);
        assert!(matches!(result, Err(RigelError::Capacity { .. })));
        std::fs::remove_file(path).ok();
    }
}
