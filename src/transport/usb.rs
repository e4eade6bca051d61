//! USB bulk transport: raw pass-through, no framing
//!
//! Bulk endpoints deliver the command and payload bytes as-is; the only
//! transport concern is mapping timeout conditions into the crate taxonomy.

use super::Transport;
use crate::error::{Error, Result};
use std::io::{Read, Write};

/// USB bulk transport over a device-node channel
pub struct UsbTransport<C> {
    channel: C,
}

impl<C: Read + Write + Send> UsbTransport<C> {
    pub fn new(channel: C) -> Self {
        UsbTransport { channel }
    }
}

impl<C: Read + Write + Send> Transport for UsbTransport<C> {
    fn send(&mut self, data: &[u8]) -> Result<()> {
        self.channel.write_all(data)?;
        Ok(())
    }

    fn recv_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        match self.channel.read_exact(buf) {
            Ok(()) => Ok(()),
            Err(e)
                if e.kind() == std::io::ErrorKind::TimedOut
                    || e.kind() == std::io::ErrorKind::WouldBlock =>
            {
                Err(Error::Timeout)
            }
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(Error::ShortTransfer {
                wanted: buf.len(),
                got: 0,
            }),
            Err(e) => Err(Error::Io(e)),
        }
    }
}
