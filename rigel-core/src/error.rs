//! The twelve error kinds the engine distinguishes (spec §7).

use thiserror::Error;

/// Every way an operation against the device or a firmware file can fail.
#[derive(Debug, Error)]
pub enum RigelError {
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("timeout waiting for reply to command {command:#04x}")]
    Timeout { command: u8 },

    #[error("framing error: {0}")]
    Framing(&'static str),

    #[error("checksum mismatch: expected {expected:#04x}, got {got:#04x}")]
    ChecksumMismatch { expected: u8, got: u8 },

    #[error("echo mismatch: sent command {sent:#04x}, device echoed {echoed:#04x}")]
    EchoMismatch { sent: u8, echoed: u8 },

    #[error("response shape mismatch: {0}")]
    ResponseShape(&'static str),

    #[error("region violation: address {address:#08x} (len {length}) is outside the declared region {low:#08x}..={high:#08x}")]
    RegionViolation {
        address: u32,
        length: u32,
        low: u32,
        high: u32,
    },

    #[error("alignment violation: {0}")]
    Alignment(&'static str),

    #[error("verify mismatch at address {address:#08x}")]
    VerifyMismatch { address: u32 },

    #[error("parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("capacity error: image of {needed} bytes exceeds device capacity of {capacity} bytes")]
    Capacity { needed: u32, capacity: u32 },

    #[error("unknown device: ID registers read {device_id:#06x}, no geometry table entry matched")]
    UnknownDevice { device_id: u16 },

    #[error("session is not usable: {0}")]
    SessionClosed(&'static str),
}

pub type Result<T> = std::result::Result<T, RigelError>;
