//! The bridge facade.
//!
//! A [`Bridge`] owns one VM instance together with the marshalling context
//! for it (limits, function registry, host object binder) and a handle to
//! the host runtime. It is the entry point embedders use: move values in and
//! out of the VM, reach globals, and call functions across the boundary.
//!
//! Every operation leaves the VM stack as it found it unless it is
//! documented to push or pop.

use std::sync::Arc;

use luan_core::{FunctionId, HostRef, HostRuntime, TaggedValue};
use tracing::debug;

use crate::binder::BridgeId;
use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::factory::ValueFactory;
use crate::functions::Callable;
use crate::marshal::Marshal;
use crate::vm::ScriptVm;

pub struct Bridge<V: ScriptVm> {
    vm: V,
    marshal: Marshal,
    host: Arc<dyn HostRuntime>,
    closed: bool,
}

impl<V: ScriptVm> Bridge<V> {
    pub fn new(vm: V, host: Arc<dyn HostRuntime>) -> Self {
        Self::with_config(vm, host, BridgeConfig::default())
    }

    pub fn with_config(vm: V, host: Arc<dyn HostRuntime>, config: BridgeConfig) -> Self {
        let marshal = Marshal::new(config);
        debug!(bridge = %marshal.bridge_id(), "bridge opened");
        Self {
            vm,
            marshal,
            host,
            closed: false,
        }
    }

    pub fn id(&self) -> BridgeId {
        self.marshal.bridge_id()
    }

    pub fn config(&self) -> &BridgeConfig {
        self.marshal.config()
    }

    pub fn vm(&self) -> &V {
        &self.vm
    }

    pub fn vm_mut(&mut self) -> &mut V {
        &mut self.vm
    }

    pub fn host(&self) -> &Arc<dyn HostRuntime> {
        &self.host
    }

    pub fn factory(&self) -> ValueFactory {
        ValueFactory::new(Arc::clone(&self.host))
    }

    /// Identities handed out for script functions so far.
    pub fn interned_count(&self) -> u32 {
        self.marshal.registry().issued()
    }

    /// Pop the top of the VM stack and convert it.
    pub fn decode(&mut self) -> TaggedValue {
        self.marshal.decode(&mut self.vm)
    }

    /// Push `value` onto the VM stack.
    pub fn encode(&mut self, value: &TaggedValue) {
        self.marshal.encode(&mut self.vm, value);
    }

    /// Intern the function on top of the stack, leaving it in place.
    ///
    /// # Panics
    /// Panics if the top of the stack is not a function.
    pub fn intern(&mut self) -> TaggedValue {
        self.marshal
            .registry()
            .intern(&mut self.vm)
            .map_or(TaggedValue::Null, TaggedValue::InternedFunction)
    }

    /// Push a VM handle for `object`.
    pub fn bind(&mut self, object: &HostRef) {
        self.marshal.binder().bind(&mut self.vm, object);
    }

    pub fn globals(&self) -> TaggedValue {
        TaggedValue::Globals
    }

    pub fn set_global(&mut self, name: &str, value: &TaggedValue) {
        self.marshal.encode(&mut self.vm, value);
        self.vm.set_global(name);
    }

    pub fn get_global(&mut self, name: &str) -> TaggedValue {
        self.vm.get_global(name);
        self.marshal.decode(&mut self.vm)
    }

    /// Call any function value with host-side arguments.
    pub fn call(
        &mut self,
        function: &TaggedValue,
        args: Vec<TaggedValue>,
    ) -> Result<TaggedValue, BridgeError> {
        let callable = Callable::from_value(function)?;
        callable.invoke(&self.marshal, &mut self.vm, args)
    }

    pub fn call_function(
        &mut self,
        id: FunctionId,
        args: Vec<TaggedValue>,
    ) -> Result<TaggedValue, BridgeError> {
        Callable::InterpreterNative(id).invoke(&self.marshal, &mut self.vm, args)
    }

    /// Call the global function `name` without interning it.
    pub fn call_global(
        &mut self,
        name: &str,
        args: Vec<TaggedValue>,
    ) -> Result<TaggedValue, BridgeError> {
        let top = self.vm.top();
        self.vm.get_global(name);
        if !self.vm.kind(-1).is_function() {
            self.vm.set_top(top);
            return Err(BridgeError::NotAFunction(name.to_string()));
        }
        for arg in &args {
            self.marshal.encode(&mut self.vm, arg);
        }
        if let Err(e) = self.vm.call(args.len(), 1) {
            self.vm.set_top(top);
            return Err(e.into());
        }
        Ok(self.marshal.decode(&mut self.vm))
    }

    /// Tear the bridge down: the function registry is dropped from the
    /// VM. Also done on drop.
    pub fn close(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.marshal.registry().teardown(&mut self.vm);
        debug!(bridge = %self.marshal.bridge_id(), "bridge closed");
    }
}

impl<V: ScriptVm> Drop for Bridge<V> {
    fn drop(&mut self) {
        self.teardown();
    }
}
