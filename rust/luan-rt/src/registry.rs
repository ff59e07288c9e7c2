//! Function identity registry.
//!
//! Script functions handed to the host are interned to small integer
//! identities so that repeatedly passing the same function costs a table
//! lookup instead of a fresh handle. The identity map itself lives inside
//! the VM (only the VM can hash its own function values) in a table that
//! the registry creates on first use and keeps anchored. Each entry is
//! stored both ways, `function -> id` and `id -> function`, so the host can
//! call an interned function back.
//!
//! Identities start at 1, only ever grow, and are never reused.

use std::cell::Cell;

use luan_core::FunctionId;
use tracing::{error, warn};

use crate::vm::{AnchorId, NativeKind, ScriptVm, StackIndex};

#[derive(Debug, Default)]
pub struct FunctionRegistry {
    /// Last identity handed out; 0 until the first intern.
    counter: Cell<u32>,
    table: Cell<Option<AnchorId>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of identities issued so far.
    pub fn issued(&self) -> u32 {
        self.counter.get()
    }

    /// Intern the function on top of the stack.
    ///
    /// The stack is left exactly as found. Returns `None` when the stored
    /// mapping is corrupt or identities are exhausted.
    ///
    /// # Panics
    /// Panics if the top of the stack is not a function.
    pub fn intern<V: ScriptVm>(&self, vm: &mut V) -> Option<FunctionId> {
        let kind = vm.kind(-1);
        if !kind.is_function() {
            error!(%kind, "intern called without a function on top of the stack");
            panic!("intern called without a function on top of the stack (found {kind})");
        }

        let top = vm.top();
        let table = self.push_table(vm);
        vm.push_copy(-2);
        vm.raw_get(table);
        let id = if vm.kind(-1) == NativeKind::Nil {
            self.insert(vm, table, top as StackIndex)
        } else {
            let stored = vm.to_number(-1).map_or(0, |n| n as u32);
            let id = FunctionId::new(stored);
            if id.is_none() {
                warn!(stored, "corrupt function registry entry, degrading to null");
            }
            id
        };
        vm.set_top(top);
        id
    }

    /// Push the function interned as `id`. Pushes nothing and returns
    /// `false` when `id` is unknown.
    pub fn push_function<V: ScriptVm>(&self, vm: &mut V, id: FunctionId) -> bool {
        if self.table.get().is_none() {
            return false;
        }
        let table = self.push_table(vm);
        vm.raw_get_index(table, i64::from(id.get()));
        if vm.kind(-1).is_function() {
            vm.remove(table);
            true
        } else {
            vm.pop(2);
            false
        }
    }

    /// Drop the identity map. Identities already issued are not reused by
    /// this registry afterwards.
    pub fn teardown<V: ScriptVm>(&self, vm: &mut V) {
        if let Some(anchor) = self.table.take() {
            vm.release_anchor(anchor);
        }
    }

    fn insert<V: ScriptVm>(
        &self,
        vm: &mut V,
        table: StackIndex,
        function: StackIndex,
    ) -> Option<FunctionId> {
        let Some(next) = self.counter.get().checked_add(1) else {
            error!("function identities exhausted");
            return None;
        };
        self.counter.set(next);
        let id = FunctionId::new(next)?;

        vm.pop(1);
        vm.push_copy(function);
        vm.push_number(f64::from(next));
        vm.raw_set(table);
        vm.push_copy(function);
        vm.raw_set_index(table, i64::from(next));
        Some(id)
    }

    /// Push the identity map, creating and anchoring it on first use.
    /// Returns its absolute stack index.
    fn push_table<V: ScriptVm>(&self, vm: &mut V) -> StackIndex {
        if let Some(anchor) = self.table.get() {
            vm.push_anchored(anchor);
            if vm.kind(-1) == NativeKind::Table {
                return vm.top() as StackIndex;
            }
            vm.pop(1);
        }
        vm.new_table();
        vm.push_copy(-1);
        self.table.set(Some(vm.anchor()));
        vm.top() as StackIndex
    }

    #[cfg(test)]
    fn anchor(&self) -> Option<AnchorId> {
        self.table.get()
    }
}
