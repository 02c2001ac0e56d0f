//! Owning wrapper around engine objects
//!
//! Every public resource type is a thin newtype over [`Handle`]. The handle owns
//! one reference to the underlying object; operations take an additional
//! reference for their duration so a concurrent [`Handle::release`] never frees
//! an object that is still in use. Releasing is idempotent and a released
//! handle reports [`Error::InvalidHandle`] from every operation.
//!
//! A handle can also be *faulted*: once an unrecoverable failure is recorded,
//! the object is dropped and every later call returns a clone of that failure.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{Error, Result};

enum Slot<T: ?Sized> {
    Live(Arc<T>),
    Faulted(Box<Error>),
    Released,
}

impl<T: ?Sized> Clone for Slot<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Live(object) => Self::Live(Arc::clone(object)),
            Self::Faulted(error) => Self::Faulted(error.clone()),
            Self::Released => Self::Released,
        }
    }
}

pub struct Handle<T: ?Sized> {
    kind: &'static str,
    slot: RwLock<Slot<T>>,
}

impl<T> Handle<T> {
    /// Take ownership of `object`.
    pub fn new(kind: &'static str, object: T) -> Self {
        Self::from_arc(kind, Arc::new(object))
    }
}

impl<T: ?Sized> Handle<T> {
    /// Wrap an object that is already shared with other owners.
    pub fn from_arc(kind: &'static str, object: Arc<T>) -> Self {
        Self {
            kind,
            slot: RwLock::new(Slot::Live(object)),
        }
    }

    fn read_slot(&self) -> RwLockReadGuard<'_, Slot<T>> {
        match self.slot.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("{} handle lock poisoned, recovering", self.kind);
                poisoned.into_inner()
            }
        }
    }

    fn write_slot(&self) -> RwLockWriteGuard<'_, Slot<T>> {
        match self.slot.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("{} handle lock poisoned, recovering", self.kind);
                poisoned.into_inner()
            }
        }
    }

    /// Name of the wrapped object type, used in error messages.
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Add a reference to the object for the duration of one operation.
    pub fn get(&self) -> Result<Arc<T>> {
        match &*self.read_slot() {
            Slot::Live(object) => Ok(Arc::clone(object)),
            Slot::Faulted(error) => Err(Error::clone(error)),
            Slot::Released => Err(Error::InvalidHandle(self.kind)),
        }
    }

    /// Run `op` against the object, holding a reference until it returns.
    pub fn with<R>(&self, op: impl FnOnce(&T) -> Result<R>) -> Result<R> {
        let object = self.get()?;
        op(&object)
    }

    pub fn is_valid(&self) -> bool {
        matches!(&*self.read_slot(), Slot::Live(_))
    }

    /// The recorded fault, if any.
    pub fn fault_state(&self) -> Option<Error> {
        match &*self.read_slot() {
            Slot::Faulted(error) => Some(Error::clone(error)),
            _ => None,
        }
    }

    /// Record a sticky fault. A released handle stays released.
    pub fn fault(&self, error: Error) {
        let mut slot = self.write_slot();
        if matches!(*slot, Slot::Live(_)) {
            tracing::debug!("{} handle faulted: {}", self.kind, error);
            *slot = Slot::Faulted(Box::new(error));
        }
    }

    /// Give up this handle's reference. Returns `true` only for the call that
    /// actually released it.
    pub fn release(&self) -> bool {
        let mut slot = self.write_slot();
        match std::mem::replace(&mut *slot, Slot::Released) {
            Slot::Released => false,
            Slot::Live(_) | Slot::Faulted(_) => {
                tracing::trace!("{} handle released", self.kind);
                true
            }
        }
    }

    /// Independent owning handle on the same object.
    pub fn duplicate(&self) -> Self {
        Self {
            kind: self.kind,
            slot: RwLock::new(self.read_slot().clone()),
        }
    }

    /// Whether two handles refer to the same live object.
    pub fn same_object(&self, other: &Self) -> bool {
        match (&*self.read_slot(), &*other.read_slot()) {
            (Slot::Live(a), Slot::Live(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl<T: ?Sized> Clone for Handle<T> {
    fn clone(&self) -> Self {
        self.duplicate()
    }
}
