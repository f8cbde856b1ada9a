//! Shared handles to function approximators
//!
//! Updaters, derived policies and target networks all refer to the same
//! models. A [`Shared`] handle is cheap to clone and every clone sees the
//! same parameters.

use std::fmt;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Reference-counted, lock-protected model
pub struct Shared<T>(Arc<RwLock<T>>);

impl<T> Shared<T> {
    /// Wrap a model
    pub fn new(inner: T) -> Self {
        Self(Arc::new(RwLock::new(inner)))
    }

    /// Shared read access
    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.0.read()
    }

    /// Exclusive write access
    ///
    /// Never hold this guard while reading through another clone of the same
    /// handle; the lock is not reentrant.
    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.0.write()
    }

    /// Whether both handles point at the same model
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl<T: Clone> Shared<T> {
    /// Independent copy of the current model, e.g. to seed a target network
    #[must_use]
    pub fn deep_copy(&self) -> Self {
        Self::new(self.read().clone())
    }
}

impl<T> Clone for Shared<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T: fmt::Debug> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Shared").field(&*self.read()).finish()
    }
}

impl<T> From<T> for Shared<T> {
    fn from(inner: T) -> Self {
        Self::new(inner)
    }
}
