//! Byte transports the TLS engine reads from and writes to
//!
//! A [`Bio`] is one of a closed set of variants sharing the [`BioOps`]
//! contract:
//!
//! * `read` returns `Ok(0)` at end of stream and [`Error::WouldBlock`] when no
//!   data is available yet; the caller retries once the transport progresses.
//! * `write` returns the number of bytes accepted or [`Error::WouldBlock`].
//!
//! [`Error::WouldBlock`]: crate::error::Error::WouldBlock

mod callback;
mod memory;
mod stream;

pub use callback::{BioCallbacks, CallbackBio, CallbackIo};
pub use memory::MemoryBio;
pub use stream::StreamBio;

use crate::error::Result;

/// Operations every transport variant implements.
pub trait BioOps: Send {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;
    fn write(&mut self, buf: &[u8]) -> Result<usize>;
    fn flush(&mut self) -> Result<()>;
    fn close(&mut self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BioKind {
    Memory,
    Stream,
    Callback,
}

pub enum Bio {
    Memory(MemoryBio),
    Stream(StreamBio),
    Callback(CallbackBio),
}

impl Bio {
    pub fn kind(&self) -> BioKind {
        match self {
            Self::Memory(_) => BioKind::Memory,
            Self::Stream(_) => BioKind::Stream,
            Self::Callback(_) => BioKind::Callback,
        }
    }

    fn ops(&mut self) -> &mut dyn BioOps {
        match self {
            Self::Memory(bio) => bio,
            Self::Stream(bio) => bio,
            Self::Callback(bio) => bio,
        }
    }

    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.ops().read(buf)
    }

    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.ops().write(buf)
    }

    /// Write the whole buffer, failing with `WouldBlock` only if nothing was accepted.
    pub fn write_all(&mut self, mut buf: &[u8]) -> Result<usize> {
        let total = buf.len();
        while !buf.is_empty() {
            match self.write(buf) {
                Ok(0) => break,
                Ok(n) => buf = &buf[n..],
                Err(e) if e.is_retryable() && buf.len() < total => break,
                Err(e) => return Err(e),
            }
        }
        Ok(total - buf.len())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.ops().flush()
    }

    pub fn close(&mut self) -> Result<()> {
        self.ops().close()
    }

    pub fn as_memory(&self) -> Option<&MemoryBio> {
        match self {
            Self::Memory(bio) => Some(bio),
            _ => None,
        }
    }
}

impl From<MemoryBio> for Bio {
    fn from(bio: MemoryBio) -> Self {
        Self::Memory(bio)
    }
}

impl From<StreamBio> for Bio {
    fn from(bio: StreamBio) -> Self {
        Self::Stream(bio)
    }
}

impl From<CallbackBio> for Bio {
    fn from(bio: CallbackBio) -> Self {
        Self::Callback(bio)
    }
}

impl std::fmt::Debug for Bio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Bio").field(&self.kind()).finish()
    }
}

/// `std::io` view of a [`Bio`], used to hand it to the TLS record layer.
pub(crate) struct IoAdapter<'a>(pub &'a mut Bio);

impl std::io::Read for IoAdapter<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        Ok(self.0.read(buf)?)
    }
}

impl std::io::Write for IoAdapter<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        Ok(self.0.write(buf)?)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(self.0.flush()?)
    }
}
