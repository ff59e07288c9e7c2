//! Host-facing value constructors.
//!
//! One constructor per value shape the host can hand to scripts. Every
//! constructor returns an owned [`TaggedValue`]; the ones that take host
//! objects acquire their own strong references.

use std::sync::Arc;

use luan_core::{
    HostLambda, HostRef, HostReflect, HostRuntime, ObjectId, ParamType, ScriptArray, TaggedValue,
};

use crate::error::BridgeError;

#[derive(Clone)]
pub struct ValueFactory {
    host: Arc<dyn HostRuntime>,
}

impl ValueFactory {
    pub fn new(host: Arc<dyn HostRuntime>) -> Self {
        Self { host }
    }

    pub fn null(&self) -> TaggedValue {
        TaggedValue::Null
    }

    pub fn boolean(&self, b: bool) -> TaggedValue {
        TaggedValue::Boolean(b)
    }

    /// Any host integer up to 64 bits.
    pub fn integral(&self, n: impl Into<i64>) -> TaggedValue {
        TaggedValue::Integral(n.into())
    }

    pub fn floating(&self, x: impl Into<f64>) -> TaggedValue {
        TaggedValue::Floating(x.into())
    }

    pub fn string(&self, s: &str) -> TaggedValue {
        TaggedValue::string(s)
    }

    pub fn bytes(&self, bytes: &[u8]) -> TaggedValue {
        TaggedValue::string(bytes)
    }

    /// Copy `elements` into a new array. `None` leaves the slot absent.
    pub fn list(&self, elements: &[Option<&TaggedValue>]) -> Result<TaggedValue, BridgeError> {
        let slots = elements.iter().map(|e| e.cloned()).collect();
        Ok(TaggedValue::Array(ScriptArray::new(slots)?))
    }

    pub fn object(&self, object: &HostRef) -> TaggedValue {
        TaggedValue::HostObject(object.clone())
    }

    /// Wrap a raw host object identity, acquiring a strong reference.
    pub fn object_id(&self, id: ObjectId) -> TaggedValue {
        TaggedValue::HostObject(HostRef::acquire(&self.host, id))
    }

    pub fn closure_function(&self, closure: &HostRef, signature: &[ParamType]) -> TaggedValue {
        TaggedValue::HostLambdaFunction(HostLambda {
            closure: closure.clone(),
            signature: signature.to_vec(),
        })
    }

    /// A reflective method; `receiver` is `None` for static methods.
    pub fn reflect_function(&self, method: &HostRef, receiver: Option<&HostRef>) -> TaggedValue {
        TaggedValue::HostReflectFunction(HostReflect {
            method: method.clone(),
            receiver: receiver.cloned(),
        })
    }

    pub fn globals(&self) -> TaggedValue {
        TaggedValue::Globals
    }
}
