//! Extended block protocol: length-prefixed bulk transfer
//!
//! A single handshake after the start command announces the block size,
//! block count and last-block size. Every block then arrives as exactly
//! that many payload bytes plus one trailing status byte. After each
//! non-final block the engine immediately acknowledges the next expected
//! block length, so the device starts filling its buffer while the host
//! is still consuming the previous block.

use super::{BlockOutcome, BlockSource};
use crate::error::{Error, FaultKind, Result};
use crate::protocol::capability::{query_extended_status, RetryPolicy};
use crate::protocol::codec::Command;
use crate::protocol::{ACK, STATUS_FATAL_ERROR, STATUS_NOT_READY};
use crate::transport::Transport;

/// Trailing-status bit: device or host requested cancellation
const TRAILER_CANCEL: u8 = 0x20;

/// Handshake reply size: status, reserved, three u32 LE size fields
const HANDSHAKE_LEN: usize = 14;

/// Length-prefixed bulk stream reader
pub struct ExtendedStream {
    retry: RetryPolicy,
    block_size: usize,
    block_count: usize,
    last_block_size: usize,
    blocks_read: usize,
}

impl ExtendedStream {
    pub fn new(retry: RetryPolicy) -> Self {
        ExtendedStream {
            retry,
            block_size: 0,
            block_count: 0,
            last_block_size: 0,
            blocks_read: 0,
        }
    }

    fn size_of_block(&self, index: usize) -> usize {
        if index + 1 == self.block_count {
            self.last_block_size
        } else {
            self.block_size
        }
    }
}

impl BlockSource for ExtendedStream {
    fn start(&mut self, transport: &mut dyn Transport) -> Result<()> {
        let mut attempts = 0;
        loop {
            transport.send(&Command::StartScanExt.encode())?;
            let mut reply = [0u8; HANDSHAKE_LEN];
            transport.recv_exact(&mut reply)?;

            let status = reply[0];
            if status & STATUS_NOT_READY != 0 {
                if attempts >= self.retry.max_attempts {
                    return Err(Error::Busy);
                }
                attempts += 1;
                log::info!(
                    "Device not ready for bulk transfer, retry {}/{}",
                    attempts,
                    self.retry.max_attempts
                );
                std::thread::sleep(self.retry.wait);
                continue;
            }
            if status & STATUS_FATAL_ERROR != 0 {
                let ext = query_extended_status(transport)?;
                ext.check_faults()?;
                return Err(Error::Fault(FaultKind::Hardware));
            }

            self.block_size = u32::from_le_bytes([reply[2], reply[3], reply[4], reply[5]]) as usize;
            self.block_count =
                u32::from_le_bytes([reply[6], reply[7], reply[8], reply[9]]) as usize;
            self.last_block_size =
                u32::from_le_bytes([reply[10], reply[11], reply[12], reply[13]]) as usize;
            self.blocks_read = 0;

            if self.block_count == 0 || (self.block_size == 0 && self.last_block_size == 0) {
                return Err(Error::LengthMismatch {
                    declared: self.block_count,
                    actual: 0,
                });
            }

            log::debug!(
                "Bulk handshake: {} blocks of {} bytes, last {}",
                self.block_count,
                self.block_size,
                self.last_block_size
            );
            return Ok(());
        }
    }

    fn read_block(
        &mut self,
        transport: &mut dyn Transport,
        out: &mut Vec<u8>,
    ) -> Result<BlockOutcome> {
        if self.blocks_read >= self.block_count {
            return Err(Error::InvalidState("stream already finished"));
        }

        let want = self.size_of_block(self.blocks_read);
        let offset = out.len();
        // Trailing status byte rides at the end of the payload, not in a
        // separate response
        out.resize(offset + want + 1, 0);
        transport.recv_exact(&mut out[offset..])?;
        let trailer = out[offset + want];
        out.truncate(offset + want);

        if trailer & TRAILER_CANCEL != 0 {
            return Err(Error::Cancelled);
        }
        if trailer & STATUS_FATAL_ERROR != 0 {
            return Err(Error::Fault(FaultKind::Hardware));
        }
        if trailer & STATUS_NOT_READY != 0 {
            return Err(Error::Busy);
        }

        self.blocks_read += 1;
        if self.blocks_read == self.block_count {
            return Ok(BlockOutcome::Final);
        }

        // Request the next block before handing this one back, letting the
        // device fill its buffer while the host processes
        let next_len = self.size_of_block(self.blocks_read) as u32;
        let mut ack = Vec::with_capacity(5);
        ack.push(ACK);
        ack.extend_from_slice(&next_len.to_le_bytes());
        transport.send(&ack)?;

        Ok(BlockOutcome::More)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{CAN, FS};
    use crate::transport::MockTransport;

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            wait: std::time::Duration::from_millis(0),
        }
    }

    fn inject_handshake(mock: &MockTransport, status: u8, size: u32, count: u32, last: u32) {
        let mut reply = vec![status, 0];
        reply.extend_from_slice(&size.to_le_bytes());
        reply.extend_from_slice(&count.to_le_bytes());
        reply.extend_from_slice(&last.to_le_bytes());
        mock.inject_read(&reply);
    }

    fn inject_block(mock: &MockTransport, len: usize, trailer: u8, fill: u8) {
        mock.inject_read(&vec![fill; len]);
        mock.inject_read(&[trailer]);
    }

    #[test]
    fn test_handshake_parses_sizes() {
        let mock = MockTransport::new();
        inject_handshake(&mock, 0, 4096, 10, 512);
        let mut t = mock.clone();
        let mut stream = ExtendedStream::new(fast_retry(3));
        stream.start(&mut t).unwrap();
        assert_eq!(mock.take_written(), vec![FS, b'G']);
        assert_eq!(stream.block_size, 4096);
        assert_eq!(stream.block_count, 10);
        assert_eq!(stream.last_block_size, 512);
    }

    #[test]
    fn test_full_transfer_ack_discipline() {
        let mock = MockTransport::new();
        inject_handshake(&mock, 0, 4096, 10, 512);
        for _ in 0..9 {
            inject_block(&mock, 4096, 0, 0xAA);
        }
        inject_block(&mock, 512, 0, 0xBB);

        let mut t = mock.clone();
        let mut stream = ExtendedStream::new(fast_retry(3));
        stream.start(&mut t).unwrap();
        mock.take_written();

        let mut out = Vec::new();
        for i in 0..9 {
            assert_eq!(
                stream.read_block(&mut t, &mut out).unwrap(),
                BlockOutcome::More,
                "block {}",
                i
            );
        }
        assert_eq!(
            stream.read_block(&mut t, &mut out).unwrap(),
            BlockOutcome::Final
        );

        // 9 full blocks + 1 short, trailing bytes stripped
        assert_eq!(out.len(), 9 * 4096 + 512);
        assert!(out[..9 * 4096].iter().all(|&b| b == 0xAA));
        assert!(out[9 * 4096..].iter().all(|&b| b == 0xBB));

        // 9 next-length acks, none after the last block; acks 1..8 announce
        // 4096, the 9th announces the 512-byte last block
        let written = mock.written();
        assert_eq!(written.len(), 9 * 5);
        for (i, ack) in written.chunks(5).enumerate() {
            assert_eq!(ack[0], ACK);
            let announced = u32::from_le_bytes([ack[1], ack[2], ack[3], ack[4]]);
            if i == 8 {
                assert_eq!(announced, 512);
            } else {
                assert_eq!(announced, 4096);
            }
        }
    }

    #[test]
    fn test_not_ready_handshake_retries_then_busy() {
        let mock = MockTransport::new();
        for _ in 0..3 {
            inject_handshake(&mock, STATUS_NOT_READY, 0, 0, 0);
        }
        let mut t = mock.clone();
        let mut stream = ExtendedStream::new(fast_retry(2));
        assert!(matches!(stream.start(&mut t), Err(Error::Busy)));
        // Initial attempt + 2 retries
        let starts = mock
            .written()
            .windows(2)
            .filter(|w| *w == [FS, b'G'])
            .count();
        assert_eq!(starts, 3);
    }

    #[test]
    fn test_trailer_cancel_aborts() {
        let mock = MockTransport::new();
        inject_handshake(&mock, 0, 100, 4, 20);
        inject_block(&mock, 100, TRAILER_CANCEL, 0);
        let mut t = mock.clone();
        let mut stream = ExtendedStream::new(fast_retry(3));
        stream.start(&mut t).unwrap();
        let mut out = Vec::new();
        assert!(matches!(
            stream.read_block(&mut t, &mut out),
            Err(Error::Cancelled)
        ));
    }

    #[test]
    fn test_trailer_fatal_aborts() {
        let mock = MockTransport::new();
        inject_handshake(&mock, 0, 100, 4, 20);
        inject_block(&mock, 100, STATUS_FATAL_ERROR, 0);
        let mut t = mock.clone();
        let mut stream = ExtendedStream::new(fast_retry(3));
        stream.start(&mut t).unwrap();
        let mut out = Vec::new();
        assert!(matches!(
            stream.read_block(&mut t, &mut out),
            Err(Error::Fault(FaultKind::Hardware))
        ));
    }

    #[test]
    fn test_single_block_transfer() {
        let mock = MockTransport::new();
        inject_handshake(&mock, 0, 256, 1, 256);
        inject_block(&mock, 256, 0, 0x11);
        let mut t = mock.clone();
        let mut stream = ExtendedStream::new(fast_retry(3));
        stream.start(&mut t).unwrap();
        mock.take_written();

        let mut out = Vec::new();
        assert_eq!(
            stream.read_block(&mut t, &mut out).unwrap(),
            BlockOutcome::Final
        );
        assert_eq!(out.len(), 256);
        // No ack after the only (final) block
        assert!(mock.written().is_empty());
    }

    #[test]
    fn test_cancel_sends_can() {
        let mock = MockTransport::new();
        let mut t = mock.clone();
        let mut stream = ExtendedStream::new(fast_retry(3));
        stream.cancel(&mut t).unwrap();
        assert_eq!(mock.written(), vec![CAN]);
    }
}
