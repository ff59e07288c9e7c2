//! Host runtime interface.
//!
//! The bridge never owns host objects. It holds *strong references* handed
//! out by the host runtime and gives each one back exactly once. A
//! [`HostRef`] is the only way the rest of the workspace touches a host
//! object: acquiring one bumps the host's reference count, dropping (or
//! explicitly releasing) it decrements the count again.
//!
//! The host runtime may run code on other threads, so [`HostRuntime`] is
//! `Send + Sync`. The released marker on a [`HostRef`] sits behind a lock
//! that also covers acquiring a duplicate, so a clone racing a release
//! never resurrects an object whose last reference is gone.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use strum::Display;
use thiserror::Error;

use crate::values::{float_to_i64, TaggedValue};

/// Opaque identity of a host object, assigned by the host runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub u64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obj#{}", self.0)
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum HostError {
    #[error("no such host object: {0}")]
    NoSuchObject(ObjectId),
    #[error("host object is not callable: {0}")]
    NotCallable(ObjectId),
    #[error("host call failed: {0}")]
    Failed(String),
}

/// Services the bridge consumes from the managed host runtime.
pub trait HostRuntime: Send + Sync {
    /// Acquire a new strong reference to `object`.
    ///
    /// Returns the identity the new reference is known by (runtimes that
    /// hand out distinct handles per reference may return a new id).
    fn acquire(&self, object: ObjectId) -> ObjectId;

    /// Give back one strong reference previously returned by `acquire`.
    fn release(&self, object: ObjectId);

    /// Invoke a host closure with already-marshalled arguments.
    fn invoke_closure(
        &self,
        closure: ObjectId,
        args: Vec<TaggedValue>,
    ) -> Result<TaggedValue, HostError>;

    /// Invoke a reflective method handle, bound to `receiver` when the
    /// method is not static.
    fn invoke_method(
        &self,
        method: ObjectId,
        receiver: Option<ObjectId>,
        args: Vec<TaggedValue>,
    ) -> Result<TaggedValue, HostError>;
}

/// A strong, bridge-visible reference to a host object.
///
/// Releases its reference exactly once: either through [`HostRef::release`]
/// or when dropped, whichever happens first.
pub struct HostRef {
    runtime: Arc<dyn HostRuntime>,
    id: ObjectId,
    released: Mutex<bool>,
}

impl HostRef {
    /// Take ownership of a strong reference the caller already holds.
    pub fn adopt(runtime: Arc<dyn HostRuntime>, id: ObjectId) -> Self {
        Self {
            runtime,
            id,
            released: Mutex::new(false),
        }
    }

    /// Acquire a fresh strong reference to `id`.
    pub fn acquire(runtime: &Arc<dyn HostRuntime>, id: ObjectId) -> Self {
        let id = runtime.acquire(id);
        Self::adopt(Arc::clone(runtime), id)
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn runtime(&self) -> &Arc<dyn HostRuntime> {
        &self.runtime
    }

    pub fn is_released(&self) -> bool {
        *self.released.lock()
    }

    /// Release the strong reference now.
    ///
    /// Returns `true` if this call performed the release, `false` if the
    /// reference had already been given back.
    pub fn release(&self) -> bool {
        let mut released = self.released.lock();
        if *released {
            return false;
        }
        *released = true;
        self.runtime.release(self.id);
        true
    }

    /// Whether both references point at the same host object.
    pub fn same_object(&self, other: &HostRef) -> bool {
        self.id == other.id
    }
}

impl Clone for HostRef {
    /// Duplicating a live reference acquires a new strong reference; a
    /// released reference duplicates into another released one.
    fn clone(&self) -> Self {
        let released = self.released.lock();
        if *released {
            return Self {
                runtime: Arc::clone(&self.runtime),
                id: self.id,
                released: Mutex::new(true),
            };
        }
        Self::acquire(&self.runtime, self.id)
    }
}

impl Drop for HostRef {
    fn drop(&mut self) {
        self.release();
    }
}

impl PartialEq for HostRef {
    fn eq(&self, other: &Self) -> bool {
        self.same_object(other)
    }
}

impl fmt::Debug for HostRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostRef")
            .field("id", &self.id)
            .field("released", &self.is_released())
            .finish()
    }
}

/// Declared parameter type of a host closure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum ParamType {
    Any,
    Boolean,
    Integer,
    Float,
    String,
    Array,
    Object,
    Function,
}

impl ParamType {
    /// Adjust a decoded script value to what a host parameter of this type
    /// expects. Only lossless-in-intent numeric conversions are applied;
    /// anything else is passed through for the host to reject.
    pub fn coerce(self, value: TaggedValue) -> TaggedValue {
        match (self, value) {
            (ParamType::Integer, TaggedValue::Floating(f)) => match float_to_i64(f) {
                Some(i) => TaggedValue::Integral(i),
                None => TaggedValue::Floating(f),
            },
            (ParamType::Float, TaggedValue::Integral(i)) => TaggedValue::Floating(i as f64),
            (ParamType::Boolean, TaggedValue::Null) => TaggedValue::Boolean(false),
            (_, value) => value,
        }
    }
}
