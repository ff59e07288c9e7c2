//! Luan RT: the script/host value bridge.
//!
//! Converts values between an embedded stack-based script VM and a managed
//! host runtime: a recursive decoder and encoder with bounded depth, an
//! interning registry for script functions, opaque VM handles for host
//! objects, and callable stubs in both directions.
#![warn(clippy::all)]

pub mod binder;
pub mod bridge;
pub mod config;
mod decode;
mod encode;
pub mod error;
pub mod factory;
pub mod functions;
pub mod marshal;
pub mod registry;
pub mod vm;

pub use luan_core::{heap, host, values};

pub use bridge::Bridge;
pub use config::{BridgeConfig, ConfigError};
pub use error::{BridgeError, VmError};
pub use factory::ValueFactory;
pub use functions::Callable;
pub use marshal::Marshal;
pub use vm::{ScriptVm, StackVm};
