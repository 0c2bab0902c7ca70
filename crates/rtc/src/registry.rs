//! Handle registry mapping engine handles to their owning objects.
//!
//! Engine callbacks only carry a handle. The registry is the one place where a
//! handle is turned back into an owner, and it does so through a `Weak`
//! reference: an owner that is being destroyed, or has been unbound, never
//! resolves.

use std::sync::{Arc, Weak};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rtc_abi::{Handle, Result, RtcError};

/// Thread-safe handle → owner map.
///
/// `resolve` may run concurrently with `bind` and `unbind`.
pub struct HandleRegistry<T: ?Sized> {
    /// What kind of object this registry tracks, for logs and errors.
    kind: &'static str,
    bindings: DashMap<Handle, Weak<T>>,
}

impl<T: ?Sized> HandleRegistry<T> {
    /// Creates an empty registry.
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            bindings: DashMap::new(),
        }
    }

    /// Binds `handle` to `owner`.
    ///
    /// Rebinding the same owner is a no-op. A binding whose owner is already
    /// gone is replaced. Fails with [`RtcError::AlreadyBound`] if the handle
    /// maps to a different live owner.
    pub fn bind(&self, handle: Handle, owner: Weak<T>) -> Result<()> {
        match self.bindings.entry(handle) {
            Entry::Occupied(mut entry) => {
                let current = entry.get();
                if current.ptr_eq(&owner) {
                    return Ok(());
                }
                if current.strong_count() > 0 {
                    return Err(RtcError::AlreadyBound {
                        handle: handle.as_raw(),
                        kind: self.kind,
                    });
                }
                tracing::trace!(kind = self.kind, %handle, "Replacing stale binding");
                entry.insert(owner);
            }
            Entry::Vacant(entry) => {
                entry.insert(owner);
            }
        }

        tracing::debug!(kind = self.kind, %handle, "Bound handle");
        Ok(())
    }

    /// Removes the binding for `handle`, if any.
    pub fn unbind(&self, handle: Handle) {
        if self.bindings.remove(&handle).is_some() {
            tracing::debug!(kind = self.kind, %handle, "Unbound handle");
        }
    }

    /// Returns the live owner of `handle`.
    pub fn resolve(&self, handle: Handle) -> Option<Arc<T>> {
        let owner = self.bindings.get(&handle)?.upgrade();
        if owner.is_none() {
            tracing::trace!(kind = self.kind, %handle, "Handle owner is gone");
        }
        owner
    }

    /// Returns true if `handle` currently has a live owner.
    pub fn is_bound(&self, handle: Handle) -> bool {
        self.resolve(handle).is_some()
    }

    /// Number of bindings, including ones whose owner is already gone.
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Returns true if there are no bindings.
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}
