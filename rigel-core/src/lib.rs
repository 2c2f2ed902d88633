//! `rigel-core`: the AN851 in-circuit programming engine for PIC18F
//! bootloaders — framed protocol, device driver, and firmware file
//! codecs. See `SPEC_FULL.md` at the workspace root for the full module
//! breakdown; each submodule here corresponds to one lettered component.

pub mod device;
pub mod error;
pub mod formats;
pub mod frame;
pub mod image;
pub mod protocol;
pub mod session;
pub mod transport;

pub use device::{ConfigRegisters, Device, DeviceGeometry, MemoryLayout, Progress};
pub use error::{Result, RigelError};
pub use frame::Frame;
pub use image::{FileFormat, FirmwareImage};
pub use protocol::ProtocolEngine;
pub use session::{LoadOptions, ProgramTarget, Session};
pub use transport::{SerialTransport, Transport};
