//! Framed TCP transport for network scanners
//!
//! Every request carries a 12-byte wrapper header:
//!
//! ```text
//! [b'I'] [b'S'] [code_hi] [code_lo] [reserved x8]
//! ```
//!
//! The data command (code 0x2000) is followed by an 8-byte sub-header with
//! explicit big-endian request and reply payload lengths. Replies start with
//! the same 12-byte wrapper, with the payload length announced in bytes
//! 8..12.

use super::Transport;
use crate::error::{Error, Result};
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

const NET_MAGIC: [u8; 2] = [b'I', b'S'];

/// Data transfer (request and/or reply payload follows)
const CODE_DATA: u16 = 0x2000;
/// Exclusive-use lock handshake
const CODE_LOCK: u16 = 0x2100;
/// Release of the exclusive-use lock
const CODE_UNLOCK: u16 = 0x2101;

/// Wrapper header size on both directions
const HEADER_SIZE: usize = 12;
/// Sub-header size for the data command
const SUB_HEADER_SIZE: usize = 8;

/// TCP transport with the network wrapper framing
pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    /// Connect to a network scanner at `host:port`
    pub fn connect<A: ToSocketAddrs + std::fmt::Debug>(addr: A, timeout: Duration) -> Result<Self> {
        let stream = TcpStream::connect(&addr)?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;
        stream.set_nodelay(true)?;
        log::info!("Connected to network scanner at {:?}", addr);
        Ok(TcpTransport { stream })
    }

    fn write_header(&mut self, code: u16) -> Result<()> {
        let mut header = [0u8; HEADER_SIZE];
        header[0..2].copy_from_slice(&NET_MAGIC);
        header[2..4].copy_from_slice(&code.to_be_bytes());
        self.stream.write_all(&header)?;
        Ok(())
    }

    fn write_data_request(&mut self, request_len: u32, reply_len: u32) -> Result<()> {
        self.write_header(CODE_DATA)?;
        let mut sub = [0u8; SUB_HEADER_SIZE];
        sub[0..4].copy_from_slice(&request_len.to_be_bytes());
        sub[4..8].copy_from_slice(&reply_len.to_be_bytes());
        self.stream.write_all(&sub)?;
        Ok(())
    }

    /// Read a reply wrapper header; returns the announced payload length
    fn read_reply_header(&mut self) -> Result<usize> {
        let mut header = [0u8; HEADER_SIZE];
        read_exact_mapped(&mut self.stream, &mut header)?;
        if header[0..2] != NET_MAGIC {
            return Err(Error::UnexpectedMarker(header[0]));
        }
        let len = u32::from_be_bytes([header[8], header[9], header[10], header[11]]);
        Ok(len as usize)
    }
}

impl Transport for TcpTransport {
    fn send(&mut self, data: &[u8]) -> Result<()> {
        self.write_data_request(data.len() as u32, 0)?;
        self.stream.write_all(data)?;
        Ok(())
    }

    fn recv_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        self.write_data_request(0, buf.len() as u32)?;
        let announced = self.read_reply_header()?;
        if announced != buf.len() {
            return Err(Error::LengthMismatch {
                declared: announced,
                actual: buf.len(),
            });
        }
        read_exact_mapped(&mut self.stream, buf)
    }

    fn lock_device(&mut self) -> Result<()> {
        self.write_header(CODE_LOCK)?;
        let announced = self.read_reply_header()?;
        if announced != 1 {
            return Err(Error::LengthMismatch {
                declared: announced,
                actual: 1,
            });
        }
        let mut status = [0u8; 1];
        read_exact_mapped(&mut self.stream, &mut status)?;
        if status[0] != 0 {
            log::warn!("Network lock refused, status {:#04x}", status[0]);
            return Err(Error::Busy);
        }
        log::debug!("Network lock acquired");
        Ok(())
    }

    fn unlock_device(&mut self) -> Result<()> {
        self.write_header(CODE_UNLOCK)?;
        // Reply carries no payload; only the wrapper comes back.
        self.read_reply_header()?;
        log::debug!("Network lock released");
        Ok(())
    }
}

/// `read_exact` with timeout errors mapped into the crate taxonomy
fn read_exact_mapped<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<()> {
    match reader.read_exact(buf) {
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    fn reply_wrapper(payload_len: u32) -> [u8; HEADER_SIZE] {
        let mut header = [0u8; HEADER_SIZE];
        header[0..2].copy_from_slice(&NET_MAGIC);
        header[8..12].copy_from_slice(&payload_len.to_be_bytes());
        header
    }

    fn capture(conn: &mut TcpStream, n: usize, captured: &mut Vec<u8>) {
        let mut buf = vec![0u8; n];
        conn.read_exact(&mut buf).unwrap();
        captured.extend_from_slice(&buf);
    }

    /// Scripted device on a loopback listener; hands everything it read
    /// back to the test through the join handle
    fn scripted_device<F>(script: F) -> (TcpTransport, thread::JoinHandle<Vec<u8>>)
    where
        F: FnOnce(&mut TcpStream, &mut Vec<u8>) + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            let mut captured = Vec::new();
            script(&mut conn, &mut captured);
            captured
        });
        let transport = TcpTransport::connect(addr, Duration::from_secs(5)).unwrap();
        (transport, handle)
    }

    #[test]
    fn test_send_wraps_data_request() {
        let (mut t, device) = scripted_device(|conn, captured| {
            capture(conn, HEADER_SIZE + SUB_HEADER_SIZE + 3, captured);
        });
        t.send(&[0x1B, b'R', 7]).unwrap();

        let wire = device.join().unwrap();
        assert_eq!(wire[0..2], NET_MAGIC);
        assert_eq!(u16::from_be_bytes([wire[2], wire[3]]), CODE_DATA);
        assert_eq!(wire[4..12], [0u8; 8]);
        // Sub-header: request length 3, no reply expected
        assert_eq!(wire[12..16], 3u32.to_be_bytes());
        assert_eq!(wire[16..20], 0u32.to_be_bytes());
        assert_eq!(wire[20..], [0x1B, b'R', 7]);
    }

    #[test]
    fn test_recv_announces_reply_length() {
        let (mut t, device) = scripted_device(|conn, captured| {
            capture(conn, HEADER_SIZE + SUB_HEADER_SIZE, captured);
            conn.write_all(&reply_wrapper(4)).unwrap();
            conn.write_all(&[9, 8, 7, 6]).unwrap();
        });
        let mut buf = [0u8; 4];
        t.recv_exact(&mut buf).unwrap();
        assert_eq!(buf, [9, 8, 7, 6]);

        let wire = device.join().unwrap();
        assert_eq!(u16::from_be_bytes([wire[2], wire[3]]), CODE_DATA);
        // No request payload, 4 reply bytes requested
        assert_eq!(wire[12..16], 0u32.to_be_bytes());
        assert_eq!(wire[16..20], 4u32.to_be_bytes());
    }

    #[test]
    fn test_recv_rejects_wrong_announced_length() {
        let (mut t, device) = scripted_device(|conn, captured| {
            capture(conn, HEADER_SIZE + SUB_HEADER_SIZE, captured);
            conn.write_all(&reply_wrapper(2)).unwrap();
            conn.write_all(&[9, 8]).unwrap();
        });
        let mut buf = [0u8; 4];
        assert!(matches!(
            t.recv_exact(&mut buf),
            Err(Error::LengthMismatch {
                declared: 2,
                actual: 4
            })
        ));
        device.join().unwrap();
    }

    #[test]
    fn test_reply_with_bad_magic_rejected() {
        let (mut t, device) = scripted_device(|conn, captured| {
            capture(conn, HEADER_SIZE + SUB_HEADER_SIZE, captured);
            let mut header = reply_wrapper(1);
            header[0] = b'X';
            conn.write_all(&header).unwrap();
        });
        let mut buf = [0u8; 1];
        assert!(matches!(
            t.recv_exact(&mut buf),
            Err(Error::UnexpectedMarker(b'X'))
        ));
        device.join().unwrap();
    }

    #[test]
    fn test_lock_unlock_handshake() {
        let (mut t, device) = scripted_device(|conn, captured| {
            capture(conn, HEADER_SIZE, captured);
            conn.write_all(&reply_wrapper(1)).unwrap();
            conn.write_all(&[0]).unwrap();
            capture(conn, HEADER_SIZE, captured);
            conn.write_all(&reply_wrapper(0)).unwrap();
        });
        t.lock_device().unwrap();
        t.unlock_device().unwrap();

        let wire = device.join().unwrap();
        assert_eq!(wire[0..2], NET_MAGIC);
        assert_eq!(u16::from_be_bytes([wire[2], wire[3]]), CODE_LOCK);
        assert_eq!(wire[4..12], [0u8; 8]);
        assert_eq!(wire[12..14], NET_MAGIC);
        assert_eq!(u16::from_be_bytes([wire[14], wire[15]]), CODE_UNLOCK);
    }

    #[test]
    fn test_lock_refused_is_busy() {
        let (mut t, device) = scripted_device(|conn, captured| {
            capture(conn, HEADER_SIZE, captured);
            conn.write_all(&reply_wrapper(1)).unwrap();
            conn.write_all(&[0x80]).unwrap();
        });
        assert!(matches!(t.lock_device(), Err(Error::Busy)));
        device.join().unwrap();
    }
}
