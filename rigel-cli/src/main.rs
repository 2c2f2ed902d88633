//! `rigel`: a thin command-line front end for `rigel-core`. This binary
//! is glue (spec.md §1 explicitly keeps CLI parsing out of the core's
//! scope) — it exists to prove the library's public interface is
//! drivable end to end, not to be an exhaustive programmer UI.

mod device_table;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use rigel_core::session::{LoadOptions, ProgramTarget};
use rigel_core::{FileFormat, FirmwareImage, SerialTransport, Session};

/// AN851 in-circuit programmer for PIC18F bootloaders.
#[derive(Parser)]
#[command(name = "rigel", version, about)]
struct Cli {
    /// Serial character device the bootloader is attached to, e.g.
    /// /dev/ttyUSB0.
    #[arg(long)]
    port: String,

    /// JSON device-geometry table to identify the attached part against.
    #[arg(long = "device-table")]
    device_table: String,

    /// On-disk firmware file format.
    #[arg(long, value_enum, default_value_t = FormatArg::Hex)]
    format: FormatArg,

    /// Firmware file to load, or to write a dump to with --dump.
    #[arg(long)]
    file: Option<String>,

    /// Dump a memory region to --file instead of loading firmware.
    #[arg(long, value_enum)]
    dump: Option<DumpArg>,

    /// Erase the entire user-writable flash region before loading.
    #[arg(long)]
    erase: bool,

    /// Verify every write by reading it back. Overrides the device
    /// table's default; a --master load is always verified regardless.
    #[arg(long)]
    verify: bool,

    /// Hand control back to the user program once the operation
    /// completes.
    #[arg(long)]
    run: bool,

    /// Target an IFI Robotics "master" processor: forces IFI-BIN format
    /// and verify-on-write.
    #[arg(long)]
    master: bool,

    /// Treat the device as standard AN851 even if the connect-time probe
    /// detected the IFI write-row-to-erase extension.
    #[arg(long = "no-ifi")]
    no_ifi: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum FormatArg {
    Hex,
    Bin,
    Raw,
}

impl From<FormatArg> for FileFormat {
    fn from(f: FormatArg) -> Self {
        match f {
            FormatArg::Hex => FileFormat::IntelHex32,
            FormatArg::Bin => FileFormat::IfiBin,
            FormatArg::Raw => FileFormat::Raw,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum DumpArg {
    Program,
    Boot,
    Eeprom,
}

fn progress_bar(label: &str) -> ProgressBar {
    let bar = ProgressBar::new(1);
    bar.set_style(
        ProgressStyle::with_template("{msg} [{bar:40}] {pos}/{len} bytes")
            .unwrap()
            .progress_chars("=> "),
    );
    bar.set_message(label.to_string());
    bar
}

fn report(bar: &ProgressBar, done: u64, total: u64) {
    bar.set_length(total.max(1));
    bar.set_position(done);
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let table = device_table::load(&cli.device_table)?;
    let transport = SerialTransport::open(&cli.port)
        .with_context(|| format!("opening serial port {}", cli.port))?;
    let mut session = Session::connect(transport, &table).context("identifying device")?;

    {
        let device = session.device()?;
        info!(
            "connected to {} (id {:#06x}, bootloader v{:#06x}{})",
            device.dev_name,
            device.dev_id,
            device.bootver,
            if device.is_ifi { ", IFI extension" } else { "" },
        );
    }

    let opts = LoadOptions {
        target: if cli.master { ProgramTarget::Master } else { ProgramTarget::User },
        verify_on_write: if cli.verify { Some(true) } else { None },
        ifi_override: if cli.no_ifi { Some(false) } else { None },
    };
    session.apply_load_options(&opts)?;
    let format: FileFormat = opts.forced_format().unwrap_or_else(|| cli.format.into());

    if cli.erase {
        let bar = progress_bar("erasing flash");
        session.erase_device(&mut |done, total| report(&bar, done as u64, total as u64))?;
        bar.finish_with_message("erase complete");
    }

    if let Some(dump) = cli.dump {
        run_dump(&mut session, dump, &cli, format)?;
    } else if let Some(file) = cli.file.as_deref() {
        run_load(&mut session, file, format)?;
    }

    if cli.run {
        session.run_user_code().context("handing off to user program")?;
        info!("handed off to user program");
    }

    Ok(())
}

fn run_load(session: &mut Session<SerialTransport>, file: &str, format: FileFormat) -> Result<()> {
    let (capacity, erase_byte) = {
        let device = session.device()?;
        (device.mem.flash_high + 1, device.erase_byte())
    };
    let image = FirmwareImage::load(file, format, capacity, erase_byte)
        .with_context(|| format!("loading firmware file {file}"))?;

    let bar = progress_bar("writing flash");
    let region = &image.as_slice()[image.start as usize..image.end as usize];
    session.write_flash(image.start, region, &mut |done, total| {
        report(&bar, done as u64, total as u64)
    })?;
    bar.finish_with_message("write complete");
    Ok(())
}

fn run_dump(
    session: &mut Session<SerialTransport>,
    dump: DumpArg,
    cli: &Cli,
    format: FileFormat,
) -> Result<()> {
    let file = cli.file.as_deref().context("--dump requires --file")?;
    let bar = progress_bar("reading");

    let (erase_byte, flash_low, eeprom_low, eeprom_high) = {
        let device = session.device()?;
        (
            device.erase_byte(),
            device.mem.flash_low,
            device.mem.eeprom_low,
            device.mem.eeprom_high,
        )
    };

    let (data, start, end): (Vec<u8>, u32, u32) = match dump {
        DumpArg::Program => {
            let data = session.read_user_program(&mut |done, total| {
                report(&bar, done as u64, total as u64)
            })?;
            let end = flash_low + data.len() as u32;
            (data, flash_low, end)
        }
        DumpArg::Boot => {
            let data = session.read_boot_sector(&mut |done, total| {
                report(&bar, done as u64, total as u64)
            })?;
            let end = data.len() as u32;
            (data, 0, end)
        }
        DumpArg::Eeprom => {
            let length = (eeprom_high - eeprom_low + 1) as u16;
            let data = session.read_eeprom(eeprom_low as u16, length, &mut |done, total| {
                report(&bar, done as u64, total as u64)
            })?;
            (data, eeprom_low, eeprom_high + 1)
        }
    };
    bar.finish_with_message("read complete");

    let mut buf = vec![erase_byte; end as usize];
    buf[start as usize..end as usize].copy_from_slice(&data);
    FirmwareImage::dump(file, format, &buf, start, end)
        .with_context(|| format!("writing dump file {file}"))?;
    Ok(())
}
