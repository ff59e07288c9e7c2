//! In-process host runtime.
//!
//! [`HostHeap`] is a small reference-counted object table that implements
//! [`HostRuntime`]. It stands in for a managed runtime in tests, benches, and
//! embedders whose "host" is plain Rust: objects are `Arc<dyn Any>` payloads,
//! closures and reflective methods are Rust functions.
//!
//! Counts are kept per object so custody can be audited: how many strong
//! references are outstanding and how many releases an object has seen.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::error;

use crate::host::{HostError, HostRef, HostRuntime, ObjectId};
use crate::values::TaggedValue;

pub type HostClosureFn =
    Arc<dyn Fn(Vec<TaggedValue>) -> Result<TaggedValue, HostError> + Send + Sync>;

/// Reflective method body: receives the bound receiver's payload (if any)
/// and the call arguments.
pub type HostMethodFn = Arc<
    dyn Fn(Option<&(dyn Any + Send + Sync)>, Vec<TaggedValue>) -> Result<TaggedValue, HostError>
        + Send
        + Sync,
>;

#[derive(Clone)]
enum Payload {
    Data(Arc<dyn Any + Send + Sync>),
    Closure(HostClosureFn),
    Method(HostMethodFn),
}

struct Entry {
    strong: usize,
    releases: usize,
    /// Dropped once `strong` reaches zero.
    payload: Option<Payload>,
}

#[derive(Default)]
struct Table {
    next_id: u64,
    entries: HashMap<ObjectId, Entry>,
}

/// Reference-counted host object table.
#[derive(Default)]
pub struct HostHeap {
    table: Mutex<Table>,
}

impl HostHeap {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Store plain data and return the first strong reference to it.
    pub fn insert<T: Any + Send + Sync>(self: &Arc<Self>, value: T) -> HostRef {
        self.insert_payload(Payload::Data(Arc::new(value)))
    }

    pub fn insert_closure<F>(self: &Arc<Self>, f: F) -> HostRef
    where
        F: Fn(Vec<TaggedValue>) -> Result<TaggedValue, HostError> + Send + Sync + 'static,
    {
        self.insert_payload(Payload::Closure(Arc::new(f)))
    }

    pub fn insert_method<F>(self: &Arc<Self>, f: F) -> HostRef
    where
        F: Fn(Option<&(dyn Any + Send + Sync)>, Vec<TaggedValue>) -> Result<TaggedValue, HostError>
            + Send
            + Sync
            + 'static,
    {
        self.insert_payload(Payload::Method(Arc::new(f)))
    }

    fn insert_payload(self: &Arc<Self>, payload: Payload) -> HostRef {
        let id = {
            let mut table = self.table.lock();
            table.next_id += 1;
            let id = ObjectId(table.next_id);
            table.entries.insert(
                id,
                Entry {
                    strong: 1,
                    releases: 0,
                    payload: Some(payload),
                },
            );
            id
        };
        let runtime: Arc<dyn HostRuntime> = self.clone();
        HostRef::adopt(runtime, id)
    }

    /// Outstanding strong references to `id`.
    pub fn strong_count(&self, id: ObjectId) -> usize {
        self.table.lock().entries.get(&id).map_or(0, |e| e.strong)
    }

    /// Releases `id` has received over its lifetime.
    pub fn release_count(&self, id: ObjectId) -> usize {
        self.table.lock().entries.get(&id).map_or(0, |e| e.releases)
    }

    pub fn is_live(&self, id: ObjectId) -> bool {
        self.strong_count(id) > 0
    }

    /// Borrow the data payload of `id` as `T`.
    pub fn with_data<T: Any, R>(&self, id: ObjectId, f: impl FnOnce(&T) -> R) -> Option<R> {
        let data = match self.payload(id)? {
            Payload::Data(d) => d,
            _ => return None,
        };
        data.downcast_ref::<T>().map(f)
    }

    fn payload(&self, id: ObjectId) -> Option<Payload> {
        self.table
            .lock()
            .entries
            .get(&id)
            .and_then(|e| e.payload.clone())
    }
}

impl HostRuntime for HostHeap {
    fn acquire(&self, object: ObjectId) -> ObjectId {
        let mut table = self.table.lock();
        match table.entries.get_mut(&object) {
            Some(entry) if entry.strong > 0 => entry.strong += 1,
            _ => error!(%object, "acquire on a host object that is no longer live"),
        }
        object
    }

    fn release(&self, object: ObjectId) {
        // Payload is dropped outside the lock; it may own further HostRefs.
        let freed = {
            let mut table = self.table.lock();
            match table.entries.get_mut(&object) {
                Some(entry) if entry.strong > 0 => {
                    entry.strong -= 1;
                    entry.releases += 1;
                    if entry.strong == 0 {
                        entry.payload.take()
                    } else {
                        None
                    }
                }
                _ => {
                    error!(%object, "release on a host object with no outstanding references");
                    None
                }
            }
        };
        drop(freed);
    }

    fn invoke_closure(
        &self,
        closure: ObjectId,
        args: Vec<TaggedValue>,
    ) -> Result<TaggedValue, HostError> {
        match self.payload(closure) {
            Some(Payload::Closure(f)) => f(args),
            Some(_) => Err(HostError::NotCallable(closure)),
            None => Err(HostError::NoSuchObject(closure)),
        }
    }

    fn invoke_method(
        &self,
        method: ObjectId,
        receiver: Option<ObjectId>,
        args: Vec<TaggedValue>,
    ) -> Result<TaggedValue, HostError> {
        let body = match self.payload(method) {
            Some(Payload::Method(f)) => f,
            Some(_) => return Err(HostError::NotCallable(method)),
            None => return Err(HostError::NoSuchObject(method)),
        };
        let receiver = match receiver {
            Some(id) => match self.payload(id) {
                Some(Payload::Data(d)) => Some(d),
                Some(_) => None,
                None => return Err(HostError::NoSuchObject(id)),
            },
            None => None,
        };
        body(receiver.as_deref(), args)
    }
}
