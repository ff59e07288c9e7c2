//! Error types for the bridge runtime.
//!
//! Only expected operational failures are errors here: a script raising an
//! error, a host call failing, a value that cannot be built. Broken bridge
//! invariants panic instead.

use luan_core::{FunctionId, HostError, ValueError, ValueKind};
use thiserror::Error;

/// Failure raised inside the script VM.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum VmError {
    #[error("runtime error: {0}")]
    Runtime(String),
    #[error("attempt to call a {0} value")]
    NotCallable(String),
    #[error("stack overflow: call depth exceeded {0}")]
    StackOverflow(usize),
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Vm(#[from] VmError),
    #[error(transparent)]
    Host(#[from] HostError),
    #[error(transparent)]
    Value(#[from] ValueError),
    #[error("unknown interned function: {0}")]
    UnknownFunction(FunctionId),
    #[error("value of kind {0} is not callable")]
    NotCallable(ValueKind),
    #[error("global '{0}' is not a function")]
    NotAFunction(String),
}
