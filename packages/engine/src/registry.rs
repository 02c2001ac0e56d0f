//! Process-wide registry of application callbacks
//!
//! Engine objects never hold application callbacks directly. They keep an
//! opaque [`Token`] and resolve it on every invocation, so an unregistered
//! callback simply stops being reachable.

use std::fmt;
use std::num::NonZeroU64;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use dashmap::DashMap;

use crate::bio::BioCallbacks;
use crate::error::{panic_message, Error, Result};
use crate::store::LookupCallback;

/// Opaque identifier of a registered callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token(NonZeroU64);

impl Token {
    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

pub struct CallbackRegistry<T: ?Sized> {
    next: AtomicU64,
    entries: DashMap<Token, Arc<T>>,
}

impl<T: ?Sized> CallbackRegistry<T> {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
            entries: DashMap::new(),
        }
    }

    pub fn register(&self, callback: Arc<T>) -> Token {
        let raw = self.next.fetch_add(1, Ordering::Relaxed);
        // Counter starts at 1 and would need 2^64 registrations to wrap.
        let token = Token(NonZeroU64::new(raw).unwrap_or(NonZeroU64::MIN));
        self.entries.insert(token, callback);
        token
    }

    pub fn resolve(&self, token: Token) -> Option<Arc<T>> {
        self.entries.get(&token).map(|entry| Arc::clone(entry.value()))
    }

    pub fn unregister(&self, token: Token) -> bool {
        self.entries.remove(&token).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T: ?Sized> Default for CallbackRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) type BioCallbackSlot = Mutex<Box<dyn BioCallbacks>>;

pub(crate) fn bio_callbacks() -> &'static CallbackRegistry<BioCallbackSlot> {
    static REGISTRY: OnceLock<CallbackRegistry<BioCallbackSlot>> = OnceLock::new();
    REGISTRY.get_or_init(CallbackRegistry::new)
}

pub(crate) fn lookup_callbacks() -> &'static CallbackRegistry<dyn LookupCallback> {
    static REGISTRY: OnceLock<CallbackRegistry<dyn LookupCallback>> = OnceLock::new();
    REGISTRY.get_or_init(CallbackRegistry::new)
}

/// Invoke application code, converting a panic into [`Error::CallbackPanic`].
pub(crate) fn guarded<R>(what: &str, callback: impl FnOnce() -> R) -> Result<R> {
    catch_unwind(AssertUnwindSafe(callback)).map_err(|payload| {
        let message = panic_message(payload);
        tracing::warn!("{} callback panicked: {}", what, message);
        Error::CallbackPanic(message)
    })
}
