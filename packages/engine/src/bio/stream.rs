use std::io::{Read, Write};
use std::sync::{Arc, Mutex};

use super::BioOps;
use crate::error::{Error, Result};

trait Duplex: Read + Write + Send {}

impl<S: Read + Write + Send> Duplex for S {}

enum Transport {
    Owned(Box<dyn Duplex>),
    Shared(Arc<Mutex<dyn Duplex>>),
    Detached,
}

/// Adapter over an external byte stream.
///
/// An owned stream is flushed and dropped by [`BioOps::close`]; a shared
/// stream stays open and usable by its other owners.
pub struct StreamBio {
    transport: Transport,
}

impl StreamBio {
    pub fn owned<S: Read + Write + Send + 'static>(stream: S) -> Self {
        Self {
            transport: Transport::Owned(Box::new(stream)),
        }
    }

    pub fn shared<S: Read + Write + Send + 'static>(stream: Arc<Mutex<S>>) -> Self {
        Self {
            transport: Transport::Shared(stream),
        }
    }

    pub fn owns_stream(&self) -> bool {
        matches!(self.transport, Transport::Owned(_))
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.transport, Transport::Detached)
    }

    fn with_stream<R>(&mut self, op: impl FnOnce(&mut dyn Duplex) -> std::io::Result<R>) -> Result<R> {
        match &mut self.transport {
            Transport::Owned(stream) => Ok(op(stream.as_mut())?),
            Transport::Shared(stream) => {
                let mut guard = stream
                    .lock()
                    .map_err(|_| Error::state("shared stream lock poisoned"))?;
                Ok(op(&mut *guard)?)
            }
            Transport::Detached => Err(Error::state("stream bio is closed")),
        }
    }
}

impl BioOps for StreamBio {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        loop {
            match self.with_stream(|stream| stream.read(buf)) {
                Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                other => return other,
            }
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        loop {
            match self.with_stream(|stream| stream.write(buf)) {
                Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                other => return other,
            }
        }
    }

    fn flush(&mut self) -> Result<()> {
        self.with_stream(|stream| stream.flush())
    }

    fn close(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.transport, Transport::Detached) {
            Transport::Owned(mut stream) => {
                stream.flush()?;
                tracing::debug!("closed owned stream transport");
            }
            Transport::Shared(_) => tracing::debug!("detached from shared stream transport"),
            Transport::Detached => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn shared_stream_survives_close() {
        let shared = Arc::new(Mutex::new(Cursor::new(Vec::new())));
        let mut bio = StreamBio::shared(Arc::clone(&shared));
        assert!(!bio.owns_stream());
        assert_eq!(bio.write(b"data").unwrap(), 4);
        bio.close().unwrap();
        bio.close().unwrap();
        assert!(bio.is_closed());
        assert!(bio.write(b"more").is_err());
        assert_eq!(shared.lock().unwrap().get_ref().as_slice(), b"data");
    }

    #[test]
    fn owned_stream_reads_to_end() {
        let mut bio = StreamBio::owned(Cursor::new(b"abc".to_vec()));
        let mut buf = [0u8; 8];
        assert_eq!(bio.read(&mut buf).unwrap(), 3);
        assert_eq!(bio.read(&mut buf).unwrap(), 0);
    }
}
