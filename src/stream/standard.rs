//! Standard block protocol: handshake per block
//!
//! After the start command, every block is announced by a counted info
//! block (bytes-per-line x line-count), read in full, then acknowledged
//! with a single ACK byte — except the block whose header carries the
//! area-end bit, which terminates the transfer unacknowledged.
//!
//! A fatal-error bit in a block header is not necessarily fatal: the lamp
//! may still be warming up. The engine queries extended status to tell the
//! two apart and re-issues the start command within the retry bounds.

use super::{BlockOutcome, BlockSource};
use crate::error::{Error, FaultKind, Result};
use crate::protocol::capability::{query_extended_status, RetryPolicy};
use crate::protocol::codec::Command;
use crate::protocol::info::{read_info_block, HeaderKind};
use crate::protocol::ACK;
use crate::transport::Transport;

/// Per-block handshake stream reader
pub struct StandardStream {
    retry: RetryPolicy,
    /// Payload length the planner asked the device for
    expected_total: usize,
    received: usize,
    retries_used: u32,
    finished: bool,
}

impl StandardStream {
    pub fn new(expected_total: usize, retry: RetryPolicy) -> Self {
        StandardStream {
            retry,
            expected_total,
            received: 0,
            retries_used: 0,
            finished: false,
        }
    }

    pub fn bytes_received(&self) -> usize {
        self.received
    }
}

impl BlockSource for StandardStream {
    fn start(&mut self, transport: &mut dyn Transport) -> Result<()> {
        transport.send(&Command::StartScan.encode())?;
        log::debug!(
            "Standard stream started, expecting {} bytes",
            self.expected_total
        );
        Ok(())
    }

    fn read_block(
        &mut self,
        transport: &mut dyn Transport,
        out: &mut Vec<u8>,
    ) -> Result<BlockOutcome> {
        if self.finished {
            return Err(Error::InvalidState("stream already finished"));
        }

        loop {
            let header = read_info_block(transport, HeaderKind::Counted)?;

            if header.fatal_error() {
                let status = query_extended_status(transport)?;
                if status.warming_up() {
                    if self.retries_used >= self.retry.max_attempts {
                        log::error!(
                            "Device still warming up after {} retries",
                            self.retries_used
                        );
                        return Err(Error::Busy);
                    }
                    self.retries_used += 1;
                    log::info!(
                        "Lamp warming up, retrying start {}/{}",
                        self.retries_used,
                        self.retry.max_attempts
                    );
                    std::thread::sleep(self.retry.wait);
                    transport.send(&Command::StartScan.encode())?;
                    continue;
                }
                status.check_faults()?;
                return Err(Error::Fault(FaultKind::Hardware));
            }

            if header.from_option_unit() {
                log::trace!("Block sourced from the option unit");
            }

            let offset = out.len();
            out.resize(offset + header.payload_len, 0);
            transport.recv_exact(&mut out[offset..])?;
            self.received += header.payload_len;

            if header.area_end() {
                self.finished = true;
                log::debug!(
                    "Area end after {} bytes (expected {})",
                    self.received,
                    self.expected_total
                );
                return Ok(BlockOutcome::Final);
            }

            transport.send(&[ACK])?;
            return Ok(BlockOutcome::More);
        }
    }
}
