//! Host object binder.
//!
//! Wraps a host object reference in a VM-managed opaque block so the VM can
//! keep the object alive for as long as scripts hold the handle. Custody is
//! shared: the VM's collector decides when the block dies, the host's
//! reference count decides when the object dies. The block owns one strong
//! reference and gives it back exactly once, on the first reclamation.

use std::any::Any;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use luan_core::HostRef;
use tracing::{debug, warn};

use crate::vm::{OpaquePayload, ScriptVm};

/// Type tag of opaque blocks created by the binder.
pub const HOST_OBJECT_TYPE: &str = "luan.host_object";

static NEXT_BRIDGE_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one bridge instance; recorded in every handle it binds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BridgeId(u64);

impl BridgeId {
    pub fn next() -> Self {
        BridgeId(NEXT_BRIDGE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for BridgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bridge#{}", self.0)
    }
}

/// Contents of an opaque block wrapping a host object.
#[derive(Debug)]
pub struct HostObjectHandle {
    object: HostRef,
    owner: BridgeId,
}

impl HostObjectHandle {
    pub fn object(&self) -> &HostRef {
        &self.object
    }

    pub fn owner(&self) -> BridgeId {
        self.owner
    }

    pub fn is_released(&self) -> bool {
        self.object.is_released()
    }
}

impl OpaquePayload for HostObjectHandle {
    fn type_name(&self) -> &'static str {
        HOST_OBJECT_TYPE
    }

    fn on_reclaim(&self) {
        if self.object.release() {
            debug!(
                object = %self.object.id(),
                owner = %self.owner,
                "released reclaimed host object"
            );
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug)]
pub struct HostObjectBinder {
    owner: BridgeId,
}

impl HostObjectBinder {
    pub fn new(owner: BridgeId) -> Self {
        Self { owner }
    }

    pub fn owner(&self) -> BridgeId {
        self.owner
    }

    /// Push an opaque handle for `object`, holding a new strong reference.
    pub fn bind<V: ScriptVm>(&self, vm: &mut V, object: &HostRef) {
        let handle = HostObjectHandle {
            object: object.clone(),
            owner: self.owner,
        };
        vm.push_opaque(Rc::new(handle));
    }

    /// Recognise a handle created by this binder and return a new strong
    /// reference to its object.
    pub fn unwrap(&self, payload: &dyn OpaquePayload) -> Option<HostRef> {
        if payload.type_name() != HOST_OBJECT_TYPE {
            warn!(
                type_name = payload.type_name(),
                "foreign opaque value cannot cross into the host"
            );
            return None;
        }
        let handle = payload.as_any().downcast_ref::<HostObjectHandle>()?;
        if handle.owner != self.owner {
            warn!(
                owner = %handle.owner,
                bridge = %self.owner,
                "host object handle belongs to another bridge"
            );
            return None;
        }
        if handle.is_released() {
            return None;
        }
        Some(handle.object.clone())
    }
}
