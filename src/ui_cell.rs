//! Owned handle for values that may only be touched on one OS thread.
//!
//! Native window, controller and tray objects are only valid on the thread
//! that created them. A `UiCell` can be moved freely between threads (so it
//! can ride inside `Send` closures posted to the dispatcher), but the inner
//! value can only be reached from its owning thread.

use std::mem::ManuallyDrop;
use std::thread::{self, ThreadId};

use crate::error::DispatchError;

pub struct UiCell<T> {
    owner: ThreadId,
    value: ManuallyDrop<T>,
}

// SAFETY: the inner value is only dereferenced on `owner` (checked in every
// accessor) and is only dropped there; a drop elsewhere leaks it instead.
unsafe impl<T> Send for UiCell<T> {}
unsafe impl<T> Sync for UiCell<T> {}

impl<T> UiCell<T> {
    /// Wrap `value`, binding it to the current thread.
    pub fn new(value: T) -> Self {
        Self {
            owner: thread::current().id(),
            value: ManuallyDrop::new(value),
        }
    }

    pub fn owner(&self) -> ThreadId {
        self.owner
    }

    pub fn is_owner_thread(&self) -> bool {
        thread::current().id() == self.owner
    }

    pub fn get(&self) -> Result<&T, DispatchError> {
        if self.is_owner_thread() {
            Ok(&self.value)
        } else {
            Err(DispatchError::WrongThread("UiCell::get"))
        }
    }

    pub fn get_mut(&mut self) -> Result<&mut T, DispatchError> {
        if self.is_owner_thread() {
            Ok(&mut self.value)
        } else {
            Err(DispatchError::WrongThread("UiCell::get_mut"))
        }
    }

    pub fn into_inner(mut self) -> Result<T, Self> {
        if !self.is_owner_thread() {
            return Err(self);
        }
        // SAFETY: `self` is forgotten right after, so the value is taken once.
        let value = unsafe { ManuallyDrop::take(&mut self.value) };
        std::mem::forget(self);
        Ok(value)
    }
}

impl<T> Drop for UiCell<T> {
    fn drop(&mut self) {
        if self.is_owner_thread() {
            // SAFETY: drop runs once and the value is never touched again.
            unsafe { ManuallyDrop::drop(&mut self.value) };
        } else {
            tracing::warn!("thread-affine value dropped off its owning thread; leaking it");
        }
    }
}
