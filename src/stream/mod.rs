//! Block streaming engine
//!
//! Two mutually exclusive wire protocols pull the scanned payload in
//! bounded chunks. The command level fixes the choice once per session:
//! `B`-class devices handshake every block, `D`-class devices announce all
//! block sizes up front and stream length-prefixed bulk data.
//!
//! Both variants guarantee the caller never sees a short read except for
//! the final block, and both honor cancellation at block boundaries only.

mod extended;
mod standard;

pub use extended::ExtendedStream;
pub use standard::StandardStream;

use crate::error::Result;
use crate::protocol::capability::{DeviceCapabilities, RetryPolicy};
use crate::protocol::CAN;
use crate::scan::ScanParameters;
use crate::transport::Transport;

/// What a successful block read means for the stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOutcome {
    /// More blocks follow
    More,
    /// That was the final block
    Final,
}

/// One block-transfer protocol pulling payload bytes off the transport
pub trait BlockSource {
    /// Send the start-scan handshake
    fn start(&mut self, transport: &mut dyn Transport) -> Result<()>;

    /// Pull the next block, appending its payload to `out`
    fn read_block(&mut self, transport: &mut dyn Transport, out: &mut Vec<u8>)
        -> Result<BlockOutcome>;

    /// Abort the transfer at a block boundary
    fn cancel(&mut self, transport: &mut dyn Transport) -> Result<()> {
        transport.send(&[CAN])?;
        Ok(())
    }
}

/// Tagged protocol variant, selected once by capability level
pub enum StreamingProtocol {
    Standard(StandardStream),
    Extended(ExtendedStream),
}

impl StreamingProtocol {
    /// Pick the protocol the negotiated command level makes legal
    pub fn select(
        caps: &DeviceCapabilities,
        params: &ScanParameters,
        retry: RetryPolicy,
    ) -> StreamingProtocol {
        if caps.level.is_extended() {
            StreamingProtocol::Extended(ExtendedStream::new(retry))
        } else {
            StreamingProtocol::Standard(StandardStream::new(params.total_bytes(), retry))
        }
    }
}

impl BlockSource for StreamingProtocol {
    fn start(&mut self, transport: &mut dyn Transport) -> Result<()> {
        match self {
            StreamingProtocol::Standard(s) => s.start(transport),
            StreamingProtocol::Extended(s) => s.start(transport),
        }
    }

    fn read_block(
        &mut self,
        transport: &mut dyn Transport,
        out: &mut Vec<u8>,
    ) -> Result<BlockOutcome> {
        match self {
            StreamingProtocol::Standard(s) => s.read_block(transport, out),
            StreamingProtocol::Extended(s) => s.read_block(transport, out),
        }
    }

    fn cancel(&mut self, transport: &mut dyn Transport) -> Result<()> {
        match self {
            StreamingProtocol::Standard(s) => s.cancel(transport),
            StreamingProtocol::Extended(s) => s.cancel(transport),
        }
    }
}
