use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::{Buf, BytesMut};

use super::BioOps;
use crate::error::{Error, Result};

#[derive(Default)]
struct Pipe {
    buffer: Mutex<BytesMut>,
    eof: AtomicBool,
}

impl Pipe {
    fn lock(&self) -> MutexGuard<'_, BytesMut> {
        match self.buffer.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Growable in-memory transport.
///
/// Clones share the same buffers, so a caller can keep one clone to inspect
/// or feed data while the engine owns another.
#[derive(Clone)]
pub struct MemoryBio {
    inbound: Arc<Pipe>,
    outbound: Arc<Pipe>,
}

impl MemoryBio {
    /// Loopback buffer: bytes written are read back in order.
    pub fn new() -> Self {
        let pipe = Arc::new(Pipe::default());
        Self {
            inbound: Arc::clone(&pipe),
            outbound: pipe,
        }
    }

    /// Two endpoints connected back to back.
    pub fn pair() -> (Self, Self) {
        let a_to_b = Arc::new(Pipe::default());
        let b_to_a = Arc::new(Pipe::default());
        (
            Self {
                inbound: Arc::clone(&b_to_a),
                outbound: Arc::clone(&a_to_b),
            },
            Self {
                inbound: a_to_b,
                outbound: b_to_a,
            },
        )
    }

    /// Copy of everything written and not yet consumed.
    pub fn get_data(&self) -> Vec<u8> {
        self.outbound.lock().to_vec()
    }

    /// Remove and return everything written and not yet consumed.
    pub fn take_data(&self) -> Vec<u8> {
        self.outbound.lock().split().to_vec()
    }

    /// Append bytes for the next `read`.
    pub fn feed(&self, data: &[u8]) {
        self.inbound.lock().extend_from_slice(data);
    }

    /// Bytes waiting to be read.
    pub fn pending(&self) -> usize {
        self.inbound.lock().len()
    }

    /// Once drained, reads report end of stream instead of `WouldBlock`.
    pub fn set_eof(&self) {
        self.inbound.eof.store(true, Ordering::Release);
    }
}

impl Default for MemoryBio {
    fn default() -> Self {
        Self::new()
    }
}

impl BioOps for MemoryBio {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut inbound = self.inbound.lock();
        if inbound.is_empty() {
            return if self.inbound.eof.load(Ordering::Acquire) {
                Ok(0)
            } else {
                Err(Error::WouldBlock)
            };
        }
        let n = buf.len().min(inbound.len());
        buf[..n].copy_from_slice(&inbound[..n]);
        inbound.advance(n);
        tracing::trace!("memory bio read {} bytes", n);
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if self.outbound.eof.load(Ordering::Acquire) {
            return Err(Error::state("write to a closed memory bio"));
        }
        self.outbound.lock().extend_from_slice(buf);
        tracing::trace!("memory bio wrote {} bytes", buf.len());
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    /// The peer endpoint sees end of stream once it drains what was written.
    fn close(&mut self) -> Result<()> {
        self.outbound.eof.store(true, Ordering::Release);
        Ok(())
    }
}
