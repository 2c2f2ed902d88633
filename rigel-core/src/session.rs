//! Component G: session orchestration on top of [`Device`]. Ties the
//! transport lifetime to a single state machine and guarantees the
//! transport is released on every exit path, mirroring the librigel
//! loader's connect/disconnect discipline without relying on process-wide
//! globals (`device_connect`/`device_disconnect` in `device.c`).

use crate::device::{Device, DeviceGeometry, Progress};
use crate::error::{Result, RigelError};
use crate::image::FileFormat;
use crate::transport::Transport;

/// Which processor a firmware load targets (`rigel.c`'s `options.master`).
/// A "master" IFI Robotics processor takes its firmware as IFI-BIN rather
/// than Intel HEX and is always verified on write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramTarget {
    User,
    Master,
}

/// Overrides a caller may apply before running a load, on top of the
/// table-supplied defaults picked up at connect (`rigel.c`'s `-m`/`-v`/
/// `-i` flags).
#[derive(Debug, Clone, Copy)]
pub struct LoadOptions {
    pub target: ProgramTarget,
    /// `None` leaves the connected device's table-supplied default alone.
    pub verify_on_write: Option<bool>,
    /// `None` leaves the connect-time IFI probe result alone.
    pub ifi_override: Option<bool>,
}

impl Default for LoadOptions {
    fn default() -> Self {
        LoadOptions {
            target: ProgramTarget::User,
            verify_on_write: None,
            ifi_override: None,
        }
    }
}

impl LoadOptions {
    /// The file format a `Master` target forces; `None` for `User` leaves
    /// the format a caller-supplied flag or file extension picked.
    pub fn forced_format(&self) -> Option<FileFormat> {
        match self.target {
            ProgramTarget::Master => Some(FileFormat::IfiBin),
            ProgramTarget::User => None,
        }
    }

    /// The verify-on-write setting these options imply: always `true` for
    /// a `Master` target, otherwise whatever override was supplied.
    fn effective_verify(&self) -> Option<bool> {
        match self.target {
            ProgramTarget::Master => Some(true),
            ProgramTarget::User => self.verify_on_write,
        }
    }
}

/// `Closed -> Opening -> Identifying -> Connected -> {Operating <-> Connected}
/// -> Terminating -> Closed`. `Opening`/`Identifying` are collapsed into the
/// synchronous [`Session::connect`] call (this engine has no asynchronous
/// connect phase to observe mid-flight), and `Operating` exists only for the
/// duration of a single operation's call stack, not as a field here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Closed,
    Connected,
    Terminating,
}

/// A device connection, owning its [`Device`] for as long as the session is
/// open. Once terminated — by a fatal protocol error or by handing off to
/// the user program — the session cannot be reused; open a new one instead.
pub struct Session<T: Transport> {
    device: Option<Device<T>>,
    state: SessionState,
}

impl<T: Transport> Session<T> {
    /// Opens a transport and runs the identify handshake (`Opening` then
    /// `Identifying`), landing in `Connected` on success.
    pub fn connect(transport: T, table: &[DeviceGeometry]) -> Result<Self> {
        let device = Device::connect(transport, table)?;
        Ok(Session {
            device: Some(device),
            state: SessionState::Connected,
        })
    }

    /// True while the session holds a usable device connection.
    pub fn is_usable(&self) -> bool {
        self.state == SessionState::Connected
    }

    fn device_mut(&mut self) -> Result<&mut Device<T>> {
        if self.state != SessionState::Connected {
            return Err(RigelError::SessionClosed("session is not connected"));
        }
        self.device
            .as_mut()
            .ok_or(RigelError::SessionClosed("session has no device"))
    }

    /// Runs `op` against the connected device; a transport-layer failure
    /// (kinds 1-4: transport, timeout, framing, checksum — the only kinds
    /// the protocol engine itself retries before giving up) marks the
    /// session `Terminating` so it is not reused in a broken state.
    fn run<R>(&mut self, op: impl FnOnce(&mut Device<T>) -> Result<R>) -> Result<R> {
        let device = self.device_mut()?;
        let result = op(device);
        if let Err(ref e) = result {
            if matches!(
                e,
                RigelError::Transport(_)
                    | RigelError::Timeout { .. }
                    | RigelError::Framing(_)
                    | RigelError::ChecksumMismatch { .. }
            ) {
                self.terminate();
            }
        }
        result
    }

    fn terminate(&mut self) {
        if let Some(mut device) = self.device.take() {
            device.disconnect();
        }
        self.state = SessionState::Terminating;
        self.close();
    }

    /// The `Terminating -> Closed` edge. Idempotent: closing an
    /// already-closed session is a no-op.
    fn close(&mut self) {
        self.device = None;
        self.state = SessionState::Closed;
    }

    /// Applies a caller's [`LoadOptions`] to the connected device ahead of
    /// a write: a `Master` target forces verify-on-write, and an explicit
    /// `ifi_override` supersedes the connect-time IFI probe result for
    /// subsequent erase/write calls.
    pub fn apply_load_options(&mut self, opts: &LoadOptions) -> Result<()> {
        let device = self.device_mut()?;
        if let Some(verify) = opts.effective_verify() {
            device.verify_on_write = verify;
        }
        if opts.ifi_override.is_some() {
            device.set_ifi_override(opts.ifi_override);
        }
        Ok(())
    }

    /// Erases `rows` rows of flash starting at `address`.
    pub fn erase_flash(&mut self, address: u32, rows: u32, progress: Progress) -> Result<()> {
        self.run(|d| d.erase_flash(address, rows, progress))
    }

    /// Erases the entire user-writable flash region.
    pub fn erase_device(&mut self, progress: Progress) -> Result<()> {
        self.run(|d| d.erase_device(progress))
    }

    pub fn write_flash(&mut self, address: u32, data: &[u8], progress: Progress) -> Result<()> {
        self.run(|d| d.write_flash(address, data, progress))
    }

    pub fn read_flash(&mut self, address: u32, length: u32, progress: Progress) -> Result<Vec<u8>> {
        self.run(|d| d.read_flash(address, length, progress))
    }

    pub fn write_eeprom(&mut self, address: u16, data: &[u8], progress: Progress) -> Result<()> {
        self.run(|d| d.write_eeprom(address, data, progress))
    }

    pub fn read_eeprom(&mut self, address: u16, length: u16, progress: Progress) -> Result<Vec<u8>> {
        self.run(|d| d.read_eeprom(address, length, progress))
    }

    pub fn read_boot_sector(&mut self, progress: Progress) -> Result<Vec<u8>> {
        self.run(|d| d.read_boot_sector(progress))
    }

    pub fn read_user_program(&mut self, progress: Progress) -> Result<Vec<u8>> {
        self.run(|d| d.read_user_program(progress))
    }

    /// Hands off to the user program. This is the one operation after which
    /// the session may not be reused regardless of outcome, since the
    /// bootloader has relinquished control of the device (`Terminating` via
    /// hand-off rather than via a transport error).
    pub fn run_user_code(&mut self) -> Result<()> {
        let result = self.run(|d| d.run_user_code());
        self.terminate();
        result
    }

    /// Resets the device back into bootloader mode without leaving the
    /// session, for callers that want to recover a device stuck mid-program
    /// rather than hand off to it.
    pub fn reset(&mut self) -> Result<()> {
        self.run(|d| d.reset())
    }

    /// Read-only access to the identified device's geometry and state,
    /// for callers (e.g. the CLI) that want to report it without mutating
    /// the session.
    pub fn device(&self) -> Result<&Device<T>> {
        if self.state != SessionState::Connected {
            return Err(RigelError::SessionClosed("session is not connected"));
        }
        self.device
            .as_ref()
            .ok_or(RigelError::SessionClosed("session has no device"))
    }
}

impl<T: Transport> Drop for Session<T> {
    /// Guarantees the transport handle is released on every exit path, even
    /// an early return or panic unwind through a caller that forgot to
    /// disconnect explicitly.
    fn drop(&mut self) {
        self.close();
    }
}
