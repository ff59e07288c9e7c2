//! Luan Core
//!
//! Shared types for the script/host value bridge: the tagged value that
//! crosses the boundary, the host-runtime interface, and an in-process host
//! runtime used by tests and embedders without a managed runtime.

pub mod heap;
pub mod host;
pub mod values;

pub use host::{HostError, HostRef, HostRuntime, ObjectId, ParamType};
pub use values::{
    FunctionId, HostLambda, HostReflect, ScriptArray, ScriptString, TaggedValue, ValueError,
    ValueKind,
};
