//! Mock transport for unit testing
//!
//! Scripted byte channel: tests inject the bytes the device would answer
//! with and inspect everything the engine wrote. An exhausted read buffer
//! behaves like a device that stopped answering (timeout).

use super::Transport;
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Mock transport for unit testing
#[derive(Clone, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockInner>>,
}

#[derive(Default)]
struct MockInner {
    read_buffer: VecDeque<u8>,
    write_buffer: Vec<u8>,
    lock_count: u32,
    unlock_count: u32,
    refuse_lock: bool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue bytes the device will answer with
    pub fn inject_read(&self, data: &[u8]) {
        self.inner.lock().read_buffer.extend(data);
    }

    /// All bytes the engine has written so far
    pub fn written(&self) -> Vec<u8> {
        self.inner.lock().write_buffer.clone()
    }

    /// Drain and return written bytes
    pub fn take_written(&self) -> Vec<u8> {
        std::mem::take(&mut self.inner.lock().write_buffer)
    }

    /// Unconsumed injected bytes
    pub fn unread(&self) -> usize {
        self.inner.lock().read_buffer.len()
    }

    pub fn lock_count(&self) -> u32 {
        self.inner.lock().lock_count
    }

    pub fn unlock_count(&self) -> u32 {
        self.inner.lock().unlock_count
    }

    /// Make the next lock attempts fail with a busy error
    pub fn refuse_lock(&self, refuse: bool) {
        self.inner.lock().refuse_lock = refuse;
    }
}

impl Transport for MockTransport {
    fn send(&mut self, data: &[u8]) -> Result<()> {
        self.inner.lock().write_buffer.extend_from_slice(data);
        Ok(())
    }

    fn recv_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.read_buffer.len() < buf.len() {
            return Err(Error::Timeout);
        }
        for slot in buf.iter_mut() {
            *slot = inner.read_buffer.pop_front().unwrap();
        }
        Ok(())
    }

    fn lock_device(&mut self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.refuse_lock {
            return Err(Error::Busy);
        }
        inner.lock_count += 1;
        Ok(())
    }

    fn unlock_device(&mut self) -> Result<()> {
        self.inner.lock().unlock_count += 1;
        Ok(())
    }
}
