use std::sync::{Arc, Mutex};

use super::BioOps;
use crate::error::{Error, Result};
use crate::registry::{self, guarded, Token};

/// Outcome reported by an application transport callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackIo {
    Ready(usize),
    WouldBlock,
    Eof,
}

/// Application-provided transport.
pub trait BioCallbacks: Send {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<CallbackIo>;
    fn write(&mut self, buf: &[u8]) -> std::io::Result<CallbackIo>;
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
    fn close(&mut self) {}
}

type ReadFn = Box<dyn FnMut(&mut [u8]) -> std::io::Result<CallbackIo> + Send>;
type WriteFn = Box<dyn FnMut(&[u8]) -> std::io::Result<CallbackIo> + Send>;
type FlushFn = Box<dyn FnMut() -> std::io::Result<()> + Send>;

struct FnCallbacks {
    read: ReadFn,
    write: WriteFn,
    flush: FlushFn,
}

impl BioCallbacks for FnCallbacks {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<CallbackIo> {
        (self.read)(buf)
    }

    fn write(&mut self, buf: &[u8]) -> std::io::Result<CallbackIo> {
        (self.write)(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        (self.flush)()
    }
}

struct TextSink {
    text: Arc<Mutex<String>>,
}

impl BioCallbacks for TextSink {
    fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<CallbackIo> {
        Ok(CallbackIo::Eof)
    }

    fn write(&mut self, buf: &[u8]) -> std::io::Result<CallbackIo> {
        let mut text = self
            .text
            .lock()
            .map_err(|_| std::io::Error::other("text sink lock poisoned"))?;
        text.push_str(&String::from_utf8_lossy(buf));
        Ok(CallbackIo::Ready(buf.len()))
    }
}

/// Transport whose read, write and flush are application callbacks.
///
/// The callbacks live in the process-wide registry under this bio's token and
/// are unregistered when the bio is closed or dropped. A panic inside a
/// callback faults the bio: the panic is reported once as
/// [`Error::CallbackPanic`] and every later call repeats it.
pub struct CallbackBio {
    token: Option<Token>,
    fault: Option<Error>,
}

impl CallbackBio {
    pub fn new(callbacks: impl BioCallbacks + 'static) -> Self {
        let boxed: Box<dyn BioCallbacks> = Box::new(callbacks);
        let token = registry::bio_callbacks().register(Arc::new(Mutex::new(boxed)));
        tracing::trace!("registered bio callbacks {}", token);
        Self {
            token: Some(token),
            fault: None,
        }
    }

    pub fn from_fns(
        read: impl FnMut(&mut [u8]) -> std::io::Result<CallbackIo> + Send + 'static,
        write: impl FnMut(&[u8]) -> std::io::Result<CallbackIo> + Send + 'static,
        flush: impl FnMut() -> std::io::Result<()> + Send + 'static,
    ) -> Self {
        Self::new(FnCallbacks {
            read: Box::new(read),
            write: Box::new(write),
            flush: Box::new(flush),
        })
    }

    /// Write-only sink that appends everything written to `text`.
    pub fn text_sink(text: Arc<Mutex<String>>) -> Self {
        Self::new(TextSink { text })
    }

    pub fn token(&self) -> Option<Token> {
        self.token
    }

    fn invoke<R>(
        &mut self,
        what: &str,
        op: impl FnOnce(&mut dyn BioCallbacks) -> std::io::Result<R>,
    ) -> Result<R> {
        if let Some(fault) = &self.fault {
            return Err(fault.clone());
        }
        let token = self.token.ok_or_else(|| Error::state("callback bio is closed"))?;
        let slot = registry::bio_callbacks()
            .resolve(token)
            .ok_or(Error::InvalidHandle("bio callback"))?;
        let outcome = guarded(what, || {
            let mut callbacks = match slot.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            op(&mut **callbacks)
        });
        match outcome {
            Ok(result) => Ok(result?),
            Err(panic) => {
                self.fault = Some(panic.clone());
                Err(panic)
            }
        }
    }
}

fn into_count(io: CallbackIo) -> Result<usize> {
    match io {
        CallbackIo::Ready(n) => Ok(n),
        CallbackIo::WouldBlock => Err(Error::WouldBlock),
        CallbackIo::Eof => Ok(0),
    }
}

impl BioOps for CallbackBio {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let len = buf.len();
        let n = into_count(self.invoke("bio read", |callbacks| callbacks.read(buf))?)?;
        if n > len {
            return Err(Error::InvalidArgument(format!(
                "read callback reported {n} bytes for a {len} byte buffer"
            )));
        }
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        into_count(self.invoke("bio write", |callbacks| callbacks.write(buf))?)
    }

    fn flush(&mut self) -> Result<()> {
        self.invoke("bio flush", |callbacks| callbacks.flush())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(token) = self.token.take() {
            if let Some(slot) = registry::bio_callbacks().resolve(token) {
                let _ = guarded("bio close", || {
                    if let Ok(mut callbacks) = slot.lock() {
                        callbacks.close();
                    }
                });
            }
            registry::bio_callbacks().unregister(token);
        }
        Ok(())
    }
}

impl Drop for CallbackBio {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            registry::bio_callbacks().unregister(token);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;

    #[test]
    fn closures_drive_reads_and_writes() {
        let written = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&written);
        let mut source: VecDeque<u8> = b"xy".iter().copied().collect();
        let mut bio = CallbackBio::from_fns(
            move |buf| match source.pop_front() {
                Some(byte) => {
                    buf[0] = byte;
                    Ok(CallbackIo::Ready(1))
                }
                None => Ok(CallbackIo::WouldBlock),
            },
            move |buf| {
                sink.lock().unwrap().extend_from_slice(buf);
                Ok(CallbackIo::Ready(buf.len()))
            },
            || Ok(()),
        );

        let mut buf = [0u8; 4];
        assert_eq!(bio.read(&mut buf).unwrap(), 1);
        assert_eq!(bio.read(&mut buf).unwrap(), 1);
        assert!(matches!(bio.read(&mut buf), Err(Error::WouldBlock)));
        assert_eq!(bio.write(b"out").unwrap(), 3);
        assert_eq!(written.lock().unwrap().as_slice(), b"out");
    }

    #[test]
    fn panicking_callback_faults_the_bio() {
        let mut bio = CallbackBio::from_fns(
            |_| panic!("transport exploded"),
            |buf| Ok(CallbackIo::Ready(buf.len())),
            || Ok(()),
        );
        let mut buf = [0u8; 1];
        assert!(matches!(bio.read(&mut buf), Err(Error::CallbackPanic(_))));
        assert!(matches!(bio.write(b"x"), Err(Error::CallbackPanic(_))));
    }

    #[test]
    fn close_unregisters_callbacks() {
        let mut bio = CallbackBio::text_sink(Arc::new(Mutex::new(String::new())));
        let token = bio.token().unwrap();
        assert!(registry::bio_callbacks().resolve(token).is_some());
        bio.close().unwrap();
        bio.close().unwrap();
        assert!(registry::bio_callbacks().resolve(token).is_none());
        assert!(bio.write(b"late").is_err());
    }

    #[test]
    fn text_sink_collects_output() {
        let text = Arc::new(Mutex::new(String::new()));
        let mut bio = CallbackBio::text_sink(Arc::clone(&text));
        bio.write(b"state: ").unwrap();
        bio.write(b"connected\n").unwrap();
        assert_eq!(text.lock().unwrap().as_str(), "state: connected\n");
        let mut buf = [0u8; 4];
        assert_eq!(bio.read(&mut buf).unwrap(), 0);
    }
}
