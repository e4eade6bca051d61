//! ESC/FS wire protocol: command codec, info blocks, capability negotiation
//!
//! Command frames are `[ESC|FS] [opcode] [params...]` with multi-byte
//! parameters little-endian. Non-trivial responses are preceded by an info
//! block: a short status+length header starting with a reserved marker byte.

pub mod capability;
pub mod codec;
pub mod info;
pub mod quirks;

/// Escape byte opening the simple opcode namespace
pub const ESC: u8 = 0x1B;
/// Escape byte opening the extended opcode namespace
pub const FS: u8 = 0x1C;

/// Start-of-response marker opening every info block
pub const STX: u8 = 0x02;
/// Block acknowledgment control byte
pub const ACK: u8 = 0x06;
/// Negative acknowledgment: command not supported
pub const NAK: u8 = 0x15;
/// Cancel control byte
pub const CAN: u8 = 0x18;

/// Info-block status bit: fatal device error
pub const STATUS_FATAL_ERROR: u8 = 0x80;
/// Info-block status bit: device not ready
pub const STATUS_NOT_READY: u8 = 0x40;
/// Info-block status bit: end of scan area reached
pub const STATUS_AREA_END: u8 = 0x20;
/// Info-block status bit: option unit (feeder) asserted
pub const STATUS_OPTION: u8 = 0x10;
