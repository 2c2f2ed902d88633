//! The six end-to-end scenarios from spec §8, driven against
//! `MockTransport` rather than a real PIC18F bootloader.

use rigel_core::device::MemoryLayout;
use rigel_core::frame::Frame;
use rigel_core::protocol::command;
use rigel_core::session::{LoadOptions, ProgramTarget, Session};
use rigel_core::transport::mock::MockTransport;
use rigel_core::{DeviceGeometry, FileFormat, FirmwareImage, RigelError};

fn geometry() -> DeviceGeometry {
    DeviceGeometry {
        dev_id_mask: 0xFFFF,
        dev_name: "TEST18F".into(),
        mem: MemoryLayout {
            flash_low: 0x0800,
            flash_high: 0x1FFFF,
            eeprom_low: 0x00,
            eeprom_high: 0xFF,
            config_low: 0x30_0000,
            config_high: 0x30_000D,
        },
        rlag_ms: 1,
        wlag_ms: 1,
        reset_lag_us: 0,
        max_packet_size: 64,
        verify_on_write: false,
    }
}

fn queue_ack(t: &mut MockTransport, cmd: u8) {
    let frame = Frame::new(cmd, &[]).unwrap();
    t.queue_read(frame.encode().unwrap().to_vec());
}

fn queue_read_reply(t: &mut MockTransport, cmd: u8, address: u32, data: &[u8]) {
    let mut payload = vec![data.len() as u8, (address & 0xFF) as u8, ((address >> 8) & 0xFF) as u8, ((address >> 16) & 0xFF) as u8];
    payload.extend_from_slice(data);
    let frame = Frame::new(cmd, &payload).unwrap();
    t.queue_read(frame.encode().unwrap().to_vec());
}

/// Connects against a non-IFI device: version, device ID, a failed IFI
/// probe (echo mismatch stands in for "command not understood"), and an
/// all-zero config register read.
fn queue_standard_connect(t: &mut MockTransport) {
    let version = Frame::new(command::RD_VERSION, &[0x01, 0x01]).unwrap();
    t.queue_read(version.encode().unwrap().to_vec());

    queue_read_reply(t, command::RD_FLASH, 0x3FFFFE, &[0xAB, 0xCD]);

    let saved = vec![0xFFu8; 64];
    queue_read_reply(t, command::RD_FLASH, 0x0800, &saved);
    let bad_echo = Frame::new(command::RD_VERSION, &[0x00, 0x00]).unwrap();
    t.queue_read(bad_echo.encode().unwrap().to_vec());

    queue_read_reply(t, command::RD_CONFIG, 0x30_0000, &[0u8; 14]);
}

fn connect_standard(t: MockTransport) -> Session<MockTransport> {
    Session::connect(t, &[geometry()]).unwrap()
}

#[test]
fn scenario_1_version_query_reads_exactly_the_reported_value() {
    let mut t = MockTransport::new();
    let version = Frame::new(command::RD_VERSION, &[0x01, 0x01]).unwrap();
    t.queue_read(version.encode().unwrap().to_vec());

    let mut engine = rigel_core::ProtocolEngine::new(t, 1, 1, 0);
    let v = engine.version().unwrap();
    assert_eq!(v, 0x0101);
    assert_eq!(engine.transport_mut().sent.len(), 1);
}

#[test]
fn scenario_2_round_trips_one_flash_block() {
    let mut t = MockTransport::new();
    queue_standard_connect(&mut t);
    queue_ack(&mut t, command::ER_FLASH);
    queue_ack(&mut t, command::WR_FLASH);
    let written = [0xA0, 0xA1, 0xA2, 0xA3, 0xA4, 0xA5, 0xA6, 0xA7];
    queue_read_reply(&mut t, command::RD_FLASH, 0x0800, &written);

    let mut session = connect_standard(t);
    session.erase_flash(0x0800, 1, &mut |_, _| {}).unwrap();
    session.write_flash(0x0800, &written, &mut |_, _| {}).unwrap();
    let readback = session.read_flash(0x0800, 8, &mut |_, _| {}).unwrap();
    assert_eq!(readback, written);
}

#[test]
fn scenario_3_hex32_program_load_covers_the_records_addresses() {
    let path = format!("{}/rigel_e2e_hex32.hex", std::env::temp_dir().display());
    // One 16-byte record at 0x0800 through 0x080F, plus a second at
    // 0x0830 so the covered range is [0x0800, 0x0F40) once padded up to
    // a row boundary by a higher record further out.
    std::fs::write(
        &path,
        ":10080000000102030405060708090A0B0C0D0E0F70\r\n\
         :10083000101112131415161718191A1B1C1D1E1F40\r\n\
         :00000001FF\r\n",
    )
    .unwrap();

    let image = FirmwareImage::load(&path, FileFormat::IntelHex32, 0x20000, 0xFF).unwrap();
    assert_eq!(image.start, 0x0800);
    // Highest record ends at 0x0840; row-aligned that's already 0x0840.
    assert_eq!(image.end, 0x0840);
    assert_eq!(&image.as_slice()[0x0800..0x0810], &[
        0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C, 0x0D, 0x0E,
        0x0F,
    ]);
    assert_eq!(&image.as_slice()[0x0830..0x0840], &[
        0x10, 0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17, 0x18, 0x19, 0x1A, 0x1B, 0x1C, 0x1D, 0x1E,
        0x1F,
    ]);
    std::fs::remove_file(path).ok();
}

#[test]
fn scenario_4_heuristic_eof_stops_exactly_at_the_end_of_user_code() {
    let mut t = MockTransport::new();
    queue_standard_connect(&mut t);

    let low = 0x0800u32;
    let max = 64u8;
    let user_code_len = 0x0800u32; // 0x0800..0x1000
    let mut addr = low;
    while addr < low + user_code_len {
        queue_read_reply(&mut t, command::RD_FLASH, addr, &vec![0x42u8; max as usize]);
        addr += max as u32;
    }
    // Four consecutive all-erased chunks signal end of program.
    for _ in 0..4 {
        queue_read_reply(&mut t, command::RD_FLASH, addr, &vec![0xFFu8; max as usize]);
        addr += max as u32;
    }

    let mut session = connect_standard(t);
    let dump = session.read_user_program(&mut |_, _| {}).unwrap();
    assert_eq!(dump.len(), user_code_len as usize);
    assert!(dump.iter().all(|&b| b == 0x42));
}

#[test]
fn scenario_5_verify_on_write_catches_a_device_that_always_reads_back_erased() {
    let mut t = MockTransport::new();
    queue_standard_connect(&mut t);
    queue_ack(&mut t, command::WR_FLASH);
    // Readback comes back all-0xFF no matter what was written.
    queue_read_reply(&mut t, command::RD_FLASH, 0x0800, &[0xFFu8; 8]);

    let mut session = connect_standard(t);
    let opts = LoadOptions {
        target: ProgramTarget::User,
        verify_on_write: Some(true),
        ifi_override: None,
    };
    session.apply_load_options(&opts).unwrap();

    let result = session.write_flash(0x0800, &[0xAA; 8], &mut |_, _| {});
    assert!(matches!(result, Err(RigelError::VerifyMismatch { .. })));
}

#[test]
fn scenario_5_without_verify_the_same_device_succeeds() {
    let mut t = MockTransport::new();
    queue_standard_connect(&mut t);
    queue_ack(&mut t, command::WR_FLASH);

    let mut session = connect_standard(t);
    session.write_flash(0x0800, &[0xAA; 8], &mut |_, _| {}).unwrap();
}

#[test]
fn scenario_6_standard_exit_writes_eeprom_then_resets() {
    let mut t = MockTransport::new();
    queue_standard_connect(&mut t);
    queue_ack(&mut t, command::WR_EEDATA);
    // PIC_RESET expects no reply.

    let mut session = connect_standard(t);
    session.run_user_code().unwrap();
    assert!(!session.is_usable());
}
