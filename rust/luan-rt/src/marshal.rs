//! Shared marshalling context.
//!
//! A [`Marshal`] bundles what the decoder and encoder need: the limits, the
//! function registry, and the host object binder. It is cheap to clone;
//! native stubs pushed into the VM keep a clone so they can marshal their
//! arguments after the bridge call that created them has returned.

use std::rc::Rc;

use crate::binder::{BridgeId, HostObjectBinder};
use crate::config::BridgeConfig;
use crate::registry::FunctionRegistry;
use crate::vm::ScriptVm;

#[derive(Debug)]
struct MarshalInner {
    config: BridgeConfig,
    registry: FunctionRegistry,
    binder: HostObjectBinder,
}

#[derive(Debug, Clone)]
pub struct Marshal {
    inner: Rc<MarshalInner>,
}

impl Marshal {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            inner: Rc::new(MarshalInner {
                config,
                registry: FunctionRegistry::new(),
                binder: HostObjectBinder::new(BridgeId::next()),
            }),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &FunctionRegistry {
        &self.inner.registry
    }

    pub fn binder(&self) -> &HostObjectBinder {
        &self.inner.binder
    }

    pub fn bridge_id(&self) -> BridgeId {
        self.inner.binder.owner()
    }

    /// Whether an array at nesting `level` must be cut off. The outermost
    /// array is level 1.
    pub(crate) fn depth_exceeded<V: ScriptVm>(&self, vm: &mut V, level: usize) -> bool {
        level >= self.inner.config.max_depth || !vm.check_stack(self.inner.config.stack_reserve)
    }
}

impl Default for Marshal {
    fn default() -> Self {
        Self::new(BridgeConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::StackVm;

    #[test]
    fn clones_share_one_registry() {
        let marshal = Marshal::default();
        let other = marshal.clone();
        let mut vm = StackVm::new();
        vm.push_script_function(|_| Ok(0));
        marshal.registry().intern(&mut vm);
        assert_eq!(other.registry().issued(), 1);
        assert_eq!(marshal.bridge_id(), other.bridge_id());
    }

    #[test]
    fn depth_limit_applies_at_max_depth() {
        let marshal = Marshal::new(BridgeConfig {
            max_depth: 3,
            ..BridgeConfig::default()
        });
        let mut vm = StackVm::new();
        assert!(!marshal.depth_exceeded(&mut vm, 2));
        assert!(marshal.depth_exceeded(&mut vm, 3));
    }

    #[test]
    fn depth_limit_applies_when_stack_is_full() {
        let marshal = Marshal::default();
        let mut vm = StackVm::with_capacity(4);
        assert!(!marshal.depth_exceeded(&mut vm, 1));
        vm.push_nil();
        assert!(marshal.depth_exceeded(&mut vm, 1));
    }
}
