//! Loads the JSON device-geometry table `rigel-core` needs at connect
//! time. This is the spiritual replacement for the original's
//! colon-delimited `rigelrc` (`loader.c`'s `rigel_rc_load`): same fields
//! (`dev_id`, `dev_name`, memory windows, lags, packet size), new
//! on-disk shape. Loading a user config file is explicitly out of scope
//! for `rigel-core` (spec.md §1); this lives entirely in the CLI.

use anyhow::{Context, Result};
use rigel_core::{DeviceGeometry, MemoryLayout};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct MemoryLayoutJson {
    flash_low: u32,
    flash_high: u32,
    eeprom_low: u32,
    eeprom_high: u32,
    config_low: u32,
    config_high: u32,
}

impl From<MemoryLayoutJson> for MemoryLayout {
    fn from(m: MemoryLayoutJson) -> Self {
        MemoryLayout {
            flash_low: m.flash_low,
            flash_high: m.flash_high,
            eeprom_low: m.eeprom_low,
            eeprom_high: m.eeprom_high,
            config_low: m.config_low,
            config_high: m.config_high,
        }
    }
}

#[derive(Debug, Deserialize)]
struct DeviceGeometryJson {
    dev_id_mask: u16,
    dev_name: String,
    mem: MemoryLayoutJson,
    rlag_ms: u32,
    wlag_ms: u32,
    #[serde(default = "default_reset_lag_us")]
    reset_lag_us: u64,
    max_packet_size: u8,
    #[serde(default)]
    verify_on_write: bool,
}

fn default_reset_lag_us() -> u64 {
    1_000_000
}

impl From<DeviceGeometryJson> for DeviceGeometry {
    fn from(g: DeviceGeometryJson) -> Self {
        DeviceGeometry {
            dev_id_mask: g.dev_id_mask,
            dev_name: g.dev_name,
            mem: g.mem.into(),
            rlag_ms: g.rlag_ms,
            wlag_ms: g.wlag_ms,
            reset_lag_us: g.reset_lag_us,
            max_packet_size: g.max_packet_size,
            verify_on_write: g.verify_on_write,
        }
    }
}

/// Reads a device-geometry table from a JSON file: a top-level array of
/// objects, each matching spec.md §6's "Device geometry table" fields.
pub fn load(path: &str) -> Result<Vec<DeviceGeometry>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading device table {path}"))?;
    let entries: Vec<DeviceGeometryJson> = serde_json::from_str(&contents)
        .with_context(|| format!("parsing device table {path}"))?;
    Ok(entries.into_iter().map(DeviceGeometry::from).collect())
}
