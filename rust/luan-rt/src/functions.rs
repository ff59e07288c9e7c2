//! Callables crossing the boundary.
//!
//! Three kinds of function can be called from either side: script functions
//! the host holds by interned identity, host closures, and reflective host
//! methods. [`Callable`] puts them behind one `invoke` contract. Host
//! callables reach the VM through [`push_stub`], which wraps them in a
//! native function that marshals its arguments and result.

use std::rc::Rc;

use luan_core::{
    FunctionId, HostError, HostLambda, HostRef, HostReflect, ParamType, TaggedValue,
};
use tracing::debug;

use crate::error::{BridgeError, VmError};
use crate::marshal::Marshal;
use crate::vm::{NativeFn, ScriptVm};

#[derive(Debug, Clone, PartialEq)]
pub enum Callable {
    InterpreterNative(FunctionId),
    HostClosure(HostLambda),
    HostReflective(HostReflect),
}

impl Callable {
    pub fn from_value(value: &TaggedValue) -> Result<Self, BridgeError> {
        match value {
            TaggedValue::InternedFunction(id) => Ok(Callable::InterpreterNative(*id)),
            TaggedValue::HostLambdaFunction(lambda) => Ok(Callable::HostClosure(lambda.clone())),
            TaggedValue::HostReflectFunction(reflect) => {
                Ok(Callable::HostReflective(reflect.clone()))
            }
            other => Err(BridgeError::NotCallable(other.kind())),
        }
    }

    pub fn invoke<V: ScriptVm>(
        &self,
        marshal: &Marshal,
        vm: &mut V,
        args: Vec<TaggedValue>,
    ) -> Result<TaggedValue, BridgeError> {
        match self {
            Callable::InterpreterNative(id) => {
                let top = vm.top();
                if !marshal.registry().push_function(vm, *id) {
                    return Err(BridgeError::UnknownFunction(*id));
                }
                for arg in &args {
                    marshal.encode(vm, arg);
                }
                if let Err(e) = vm.call(args.len(), 1) {
                    vm.set_top(top);
                    return Err(e.into());
                }
                Ok(marshal.decode(vm))
            }
            Callable::HostClosure(lambda) => {
                let closure = live(&lambda.closure)?;
                let args = coerce_args(&lambda.signature, args);
                Ok(closure.runtime().invoke_closure(closure.id(), args)?)
            }
            Callable::HostReflective(reflect) => {
                let method = live(&reflect.method)?;
                let receiver = match &reflect.receiver {
                    Some(r) => Some(live(r)?.id()),
                    None => None,
                };
                Ok(method.runtime().invoke_method(method.id(), receiver, args)?)
            }
        }
    }
}

fn live(object: &HostRef) -> Result<&HostRef, HostError> {
    if object.is_released() {
        return Err(HostError::NoSuchObject(object.id()));
    }
    Ok(object)
}

/// Fit `args` to a declared host signature: pad with nulls or truncate to
/// its length, then coerce each argument. An empty signature accepts
/// anything unchanged.
pub fn coerce_args(signature: &[ParamType], mut args: Vec<TaggedValue>) -> Vec<TaggedValue> {
    if signature.is_empty() {
        return args;
    }
    args.resize(signature.len(), TaggedValue::Null);
    args.into_iter()
        .zip(signature)
        .map(|(arg, ty)| ty.coerce(arg))
        .collect()
}

/// Push a native VM function that invokes `callable`.
///
/// When called, the stub decodes its arguments in order, invokes the
/// callable and leaves the encoded result as its single return value.
/// Failures are raised as VM runtime errors.
pub fn push_stub<V: ScriptVm>(marshal: &Marshal, vm: &mut V, callable: Callable) {
    let marshal = marshal.clone();
    let stub: NativeFn<V> = Rc::new(move |vm: &mut V| -> Result<usize, VmError> {
        let nargs = vm.top();
        let mut args: Vec<TaggedValue> = (0..nargs).map(|_| marshal.decode(vm)).collect();
        args.reverse();
        let result = callable.invoke(&marshal, vm, args).map_err(|e| {
            debug!(error = %e, "host call from script failed");
            VmError::Runtime(e.to_string())
        })?;
        marshal.encode(vm, &result);
        Ok(1)
    });
    vm.push_native(stub);
}
