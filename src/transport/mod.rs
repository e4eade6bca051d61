//! Transport layer for scanner I/O abstraction
//!
//! Every transport is a blocking byte channel with a transport-specific
//! framing rule. The protocol engine only ever asks for "send these bytes"
//! and "receive exactly N bytes before the timeout"; how a transport wraps
//! that on the wire (SCSI CDBs, TCP headers, raw bulk) is its own business.

use crate::error::Result;

mod mock;
mod scsi;
mod tcp;
mod usb;

pub use mock::MockTransport;
pub use scsi::ScsiTransport;
pub use tcp::TcpTransport;
pub use usb::UsbTransport;

/// Blocking byte channel to a scanner
pub trait Transport: Send {
    /// Send all bytes, applying the transport's framing rule.
    ///
    /// A short write is an error; partial commands are never left on the
    /// wire.
    fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Receive exactly `buf.len()` bytes before the timeout.
    ///
    /// A short read is an error except where the protocol layer explicitly
    /// sizes the buffer for a final short block.
    fn recv_exact(&mut self, buf: &mut [u8]) -> Result<()>;

    /// Receive a single byte
    fn recv_byte(&mut self) -> Result<u8> {
        let mut b = [0u8; 1];
        self.recv_exact(&mut b)?;
        Ok(b[0])
    }

    /// Acquire the device for exclusive use.
    ///
    /// Network devices run an explicit lock handshake; SCSI devices issue a
    /// reserve command. Transports without a locking concept accept silently.
    fn lock_device(&mut self) -> Result<()> {
        Ok(())
    }

    /// Release the device. Must be safe to call on every exit path.
    fn unlock_device(&mut self) -> Result<()> {
        Ok(())
    }
}

impl Transport for Box<dyn Transport> {
    fn send(&mut self, data: &[u8]) -> Result<()> {
        (**self).send(data)
    }

    fn recv_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        (**self).recv_exact(buf)
    }

    fn lock_device(&mut self) -> Result<()> {
        (**self).lock_device()
    }

    fn unlock_device(&mut self) -> Result<()> {
        (**self).unlock_device()
    }
}
