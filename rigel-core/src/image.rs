//! Component H: firmware-region I/O — loading a program image from a file
//! into a device-sized buffer, and dumping a device region back out through
//! the same codecs. Grounded on `rigel_program_alloc`/`rigel_memdump` in
//! `loader.c`.

use crate::device::BYTES_PER_ROW;
use crate::error::{Result, RigelError};
use crate::formats::{hex32, ifibin};

/// Which on-disk representation a firmware file uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    IntelHex32,
    IfiBin,
    Raw,
}

/// A program image loaded into memory, covering `[0, end)` with everything
/// outside `[start, end)` filled with the family's erase byte.
#[derive(Debug, Clone)]
pub struct FirmwareImage {
    pub start: u32,
    pub end: u32,
    data: Vec<u8>,
}

impl FirmwareImage {
    /// `ceil` to the next row boundary; a no-op if `end` already sits on
    /// one (the original's `PIC18_ALIGN_TO_ROW` macro adds a full row even
    /// when already aligned — not replicated here, since doing so would
    /// silently grow an already row-aligned image by one row on every
    /// load).
    fn align_up_to_row(end: u32) -> u32 {
        let rem = end % BYTES_PER_ROW;
        if rem == 0 {
            end
        } else {
            end + (BYTES_PER_ROW - rem)
        }
    }

    /// Loads `path` in `format`, sized against `capacity` (typically
    /// `flash_high + 1`). Returns an image covering `[0, end)` where `end`
    /// is the file's highest address rounded up to a row boundary, with
    /// bytes outside the file's own `[start, end)` left at `erase_byte`.
    pub fn load(path: &str, format: FileFormat, capacity: u32, erase_byte: u8) -> Result<Self> {
        let (start, raw_end) = match format {
            FileFormat::IntelHex32 => hex32::sniff_bounds(path)?,
            FileFormat::IfiBin => ifibin::sniff_bounds(path)?,
            FileFormat::Raw => {
                let len = std::fs::metadata(path).map_err(RigelError::Transport)?.len();
                (0, len as u32)
            }
        };

        if raw_end > capacity {
            return Err(RigelError::Capacity {
                needed: raw_end,
                capacity,
            });
        }

        let end = Self::align_up_to_row(raw_end);
        let mut data = vec![erase_byte; end as usize];

        match format {
            FileFormat::IntelHex32 => {
                hex32::load(path, &mut data)?;
            }
            FileFormat::IfiBin => {
                ifibin::load(path, &mut data)?;
            }
            FileFormat::Raw => {
                let bytes = std::fs::read(path).map_err(RigelError::Transport)?;
                data[..bytes.len()].copy_from_slice(&bytes);
            }
        }

        Ok(FirmwareImage { start, end, data })
    }

    /// Writes `data[start..end]` out through `format`'s codec.
    pub fn dump(path: &str, format: FileFormat, data: &[u8], start: u32, end: u32) -> Result<()> {
        match format {
            FileFormat::IntelHex32 => hex32::write(path, data, start, end),
            FileFormat::IfiBin => ifibin::write(path, data, start, end),
            FileFormat::Raw => {
                std::fs::write(path, &data[start as usize..end as usize]).map_err(RigelError::Transport)
            }
        }
    }

    /// The full `[0, end)` buffer, including the erase-byte padding outside
    /// `[start, end)`.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}
