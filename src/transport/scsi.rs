//! SCSI transport: commands wrapped in 6-byte read/write CDBs
//!
//! Each engine-level send becomes a WRITE CDB followed by the command bytes;
//! each receive becomes a READ CDB followed by the payload. The transfer
//! length lives in bytes 2..5 of the CDB, big-endian.

use super::Transport;
use crate::error::{Error, Result};
use std::io::{Read, Write};

const CDB_READ: u8 = 0x08;
const CDB_WRITE: u8 = 0x0A;
const CDB_RESERVE: u8 = 0x16;
const CDB_RELEASE: u8 = 0x17;

/// SCSI transport over a generic-SCSI device channel
pub struct ScsiTransport<C> {
    channel: C,
}

impl<C: Read + Write + Send> ScsiTransport<C> {
    pub fn new(channel: C) -> Self {
        ScsiTransport { channel }
    }

    fn write_cdb(&mut self, opcode: u8, transfer_len: usize) -> Result<()> {
        if transfer_len > 0xFF_FFFF {
            return Err(Error::InvalidParameter(format!(
                "SCSI transfer length {} exceeds 24-bit field",
                transfer_len
            )));
        }
        let len = transfer_len as u32;
        let cdb = [
            opcode,
            0,
            (len >> 16) as u8,
            (len >> 8) as u8,
            len as u8,
            0,
        ];
        self.channel.write_all(&cdb)?;
        Ok(())
    }
}

impl<C: Read + Write + Send> Transport for ScsiTransport<C> {
    fn send(&mut self, data: &[u8]) -> Result<()> {
        self.write_cdb(CDB_WRITE, data.len())?;
        self.channel.write_all(data)?;
        Ok(())
    }

    fn recv_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        self.write_cdb(CDB_READ, buf.len())?;
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

    fn lock_device(&mut self) -> Result<()> {
        self.write_cdb(CDB_RESERVE, 0)?;
        log::debug!("SCSI reserve issued");
        Ok(())
    }

    fn unlock_device(&mut self) -> Result<()> {
        self.write_cdb(CDB_RELEASE, 0)?;
        log::debug!("SCSI release issued");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct PairChannel {
        written: Vec<u8>,
        readable: std::io::Cursor<Vec<u8>>,
    }

    impl Read for PairChannel {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.readable.read(buf)
        }
    }

    impl Write for PairChannel {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_write_cdb_wraps_command() {
        let channel = PairChannel {
            written: Vec::new(),
            readable: std::io::Cursor::new(Vec::new()),
        };
        let mut t = ScsiTransport::new(channel);
        t.send(&[0x1B, b'I']).unwrap();

        // WRITE CDB with 24-bit BE length 2, then the command bytes
        assert_eq!(
            t.channel.written,
            vec![0x0A, 0, 0, 0, 2, 0, 0x1B, b'I']
        );
    }

    #[test]
    fn test_read_cdb_big_endian_length() {
        let channel = PairChannel {
            written: Vec::new(),
            readable: std::io::Cursor::new(vec![0u8; 0x012345]),
        };
        let mut t = ScsiTransport::new(channel);
        let mut buf = vec![0u8; 0x012345];
        t.recv_exact(&mut buf).unwrap();
        assert_eq!(&t.channel.written, &[0x08, 0, 0x01, 0x23, 0x45, 0]);
    }

    #[test]
    fn test_reserve_release() {
        let channel = PairChannel {
            written: Vec::new(),
            readable: std::io::Cursor::new(Vec::new()),
        };
        let mut t = ScsiTransport::new(channel);
        t.lock_device().unwrap();
        t.unlock_device().unwrap();
        assert_eq!(
            t.channel.written,
            vec![0x16, 0, 0, 0, 0, 0, 0x17, 0, 0, 0, 0, 0]
        );
    }
}
