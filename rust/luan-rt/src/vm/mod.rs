//! Script VM interface.
//!
//! The bridge talks to the embedded interpreter only through [`ScriptVm`], a
//! stack-based value-passing API in the style of classic embeddable
//! interpreters: values are pushed and popped on an evaluation stack,
//! positive indices count from the bottom of the current frame (1-based),
//! negative indices count back from the top.
//!
//! [`StackVm`] is an in-process implementation used by the tests and the
//! benches.

mod stack_vm;

pub use stack_vm::StackVm;

use std::any::Any;
use std::rc::Rc;

use strum::Display;

use crate::error::VmError;

/// Position on the VM evaluation stack.
pub type StackIndex = i32;

/// Native function installed into the VM. Receives the VM with its
/// arguments occupying the current frame and returns how many results it
/// left on top of the stack.
pub type NativeFn<V> = Rc<dyn Fn(&mut V) -> Result<usize, VmError>>;

/// Slot in the VM's reference table, keeping a value alive without a global
/// name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AnchorId(pub u32);

/// Kind of a value on the VM stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum NativeKind {
    /// Index does not refer to a stack slot.
    None,
    Nil,
    Boolean,
    Number,
    String,
    Table,
    ScriptFunction,
    BuiltinFunction,
    LightHandle,
    Opaque,
    Thread,
}

impl NativeKind {
    pub fn is_function(self) -> bool {
        matches!(self, NativeKind::ScriptFunction | NativeKind::BuiltinFunction)
    }
}

/// Payload of a VM-managed opaque block.
///
/// `on_reclaim` is called by whichever collector owns the block once it is
/// reclaimed. Collectors may call it more than once; implementations must
/// tolerate that.
pub trait OpaquePayload: Any {
    /// Type tag used to recognise blocks, like a metatable name.
    fn type_name(&self) -> &'static str;

    fn on_reclaim(&self);

    fn as_any(&self) -> &dyn Any;
}

/// Stack-based value-passing API of the embedded interpreter.
pub trait ScriptVm: Sized + 'static {
    /// Number of values in the current frame.
    fn top(&self) -> usize;

    /// Truncate (or nil-extend) the current frame to `top` values.
    fn set_top(&mut self, top: usize);

    /// Whether `extra` more values can be pushed without exceeding the
    /// stack's capacity.
    fn check_stack(&mut self, extra: usize) -> bool;

    fn kind(&self, idx: StackIndex) -> NativeKind;

    fn push_nil(&mut self);
    fn push_boolean(&mut self, b: bool);
    fn push_number(&mut self, n: f64);
    fn push_bytes(&mut self, bytes: &[u8]);

    /// Push a copy of the value at `idx` (nil if `idx` is not valid).
    fn push_copy(&mut self, idx: StackIndex);

    fn pop(&mut self, n: usize);

    /// Remove the value at `idx`, shifting the values above it down.
    fn remove(&mut self, idx: StackIndex);

    /// Truthiness: false for nil, none and `false`, true otherwise.
    fn to_boolean(&self, idx: StackIndex) -> bool;
    fn to_number(&self, idx: StackIndex) -> Option<f64>;
    fn to_bytes(&self, idx: StackIndex) -> Option<Vec<u8>>;

    fn new_table(&mut self);

    /// Pop a key and push `table[key]` without metamethods.
    fn raw_get(&mut self, table: StackIndex);

    /// Pop a value and a key (value on top) and store `table[key] = value`.
    fn raw_set(&mut self, table: StackIndex);

    /// Push `table[n]`.
    fn raw_get_index(&mut self, table: StackIndex, n: i64);

    /// Pop a value and store it at `table[n]`.
    fn raw_set_index(&mut self, table: StackIndex, n: i64);

    fn get_global(&mut self, name: &str);

    /// Pop a value into the global `name`.
    fn set_global(&mut self, name: &str);

    /// Pop a value into the reference table.
    fn anchor(&mut self) -> AnchorId;
    fn push_anchored(&mut self, anchor: AnchorId);
    fn release_anchor(&mut self, anchor: AnchorId);

    fn push_opaque(&mut self, payload: Rc<dyn OpaquePayload>);
    fn to_opaque(&self, idx: StackIndex) -> Option<Rc<dyn OpaquePayload>>;

    /// Push a native (builtin) function.
    fn push_native(&mut self, f: NativeFn<Self>);

    /// Call the function below `nargs` arguments, replacing function and
    /// arguments with exactly `nresults` results.
    fn call(&mut self, nargs: usize, nresults: usize) -> Result<(), VmError>;
}
