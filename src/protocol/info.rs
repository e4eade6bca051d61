//! Info-block parser
//!
//! Most command responses open with a short header:
//!
//! ```text
//! 4-byte form: [STX] [status] [len_lo] [len_hi]
//! 6-byte form: [STX] [status] [len_lo] [len_hi] [cnt_lo] [cnt_hi]
//! ```
//!
//! In the 6-byte form the payload length is `len * cnt` (bytes per line
//! times line count for block-data responses). A NAK in place of the STX
//! marker means the device rejected the command; any other first byte is a
//! protocol violation.

use super::{NAK, STATUS_AREA_END, STATUS_FATAL_ERROR, STATUS_NOT_READY, STATUS_OPTION, STX};
use crate::error::{Error, Result};
use crate::transport::Transport;

/// Which header form the command's response uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderKind {
    /// 4-byte header, plain payload length
    Basic,
    /// 6-byte header, payload length = count x multiplier
    Counted,
}

/// Parsed info-block header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InfoBlock {
    /// Status byte (fatal / not-ready / area-end / option bits)
    pub status: u8,
    /// Total payload length following the header
    pub payload_len: usize,
}

impl InfoBlock {
    pub fn fatal_error(&self) -> bool {
        self.status & STATUS_FATAL_ERROR != 0
    }

    pub fn not_ready(&self) -> bool {
        self.status & STATUS_NOT_READY != 0
    }

    pub fn area_end(&self) -> bool {
        self.status & STATUS_AREA_END != 0
    }

    /// Payload came from the option unit (feeder or transparency unit)
    pub fn from_option_unit(&self) -> bool {
        self.status & STATUS_OPTION != 0
    }
}

/// Read and parse one info-block header from the transport
pub fn read_info_block(transport: &mut dyn Transport, kind: HeaderKind) -> Result<InfoBlock> {
    let mut header = [0u8; 6];
    let size = match kind {
        HeaderKind::Basic => 4,
        HeaderKind::Counted => 6,
    };
    transport.recv_exact(&mut header[..size])?;

    match header[0] {
        STX => {}
        NAK => return Err(Error::CommandRejected),
        other => return Err(Error::UnexpectedMarker(other)),
    }

    let len = u16::from_le_bytes([header[2], header[3]]) as usize;
    let payload_len = match kind {
        HeaderKind::Basic => len,
        HeaderKind::Counted => {
            let count = u16::from_le_bytes([header[4], header[5]]) as usize;
            len * count
        }
    };

    Ok(InfoBlock {
        status: header[1],
        payload_len,
    })
}

/// Read an info block and its entire payload in one step
pub fn read_response(transport: &mut dyn Transport, kind: HeaderKind) -> Result<(InfoBlock, Vec<u8>)> {
    let block = read_info_block(transport, kind)?;
    let mut payload = vec![0u8; block.payload_len];
    transport.recv_exact(&mut payload)?;
    Ok((block, payload))
}
