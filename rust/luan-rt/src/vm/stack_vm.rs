//! Reference implementation of [`ScriptVm`].
//!
//! Values are `Rc`-backed, so a table, function, or opaque block is
//! reclaimed as soon as the last stack slot, table entry, global, or anchor
//! holding it goes away. Opaque blocks run [`OpaquePayload::on_reclaim`] at
//! that point, which is how the VM's collector is modelled. Reference cycles
//! between tables are not collected.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use super::{AnchorId, NativeFn, NativeKind, OpaquePayload, ScriptVm, StackIndex};
use crate::error::VmError;

/// Default evaluation stack capacity, in slots.
pub const DEFAULT_STACK_CAPACITY: usize = 8000;

/// Default limit on nested native calls.
pub const DEFAULT_MAX_CALL_DEPTH: usize = 200;

#[derive(Clone, Copy, PartialEq, Eq)]
enum FunctionKind {
    Script,
    Builtin,
}

struct Function {
    kind: FunctionKind,
    body: NativeFn<StackVm>,
}

struct OpaqueBlock {
    payload: Rc<dyn OpaquePayload>,
}

impl Drop for OpaqueBlock {
    fn drop(&mut self) {
        self.payload.on_reclaim();
    }
}

#[derive(Default)]
struct Table {
    /// Key slot kept next to the value so reference keys stay alive.
    entries: HashMap<Key, (Slot, Slot)>,
}

#[derive(Clone)]
enum Slot {
    Nil,
    Boolean(bool),
    Number(f64),
    Str(Rc<[u8]>),
    Table(Rc<RefCell<Table>>),
    Function(Rc<Function>),
    LightHandle(usize),
    Opaque(Rc<OpaqueBlock>),
    Thread(u32),
}

impl Slot {
    fn kind(&self) -> NativeKind {
        match self {
            Slot::Nil => NativeKind::Nil,
            Slot::Boolean(_) => NativeKind::Boolean,
            Slot::Number(_) => NativeKind::Number,
            Slot::Str(_) => NativeKind::String,
            Slot::Table(_) => NativeKind::Table,
            Slot::Function(f) if f.kind == FunctionKind::Script => NativeKind::ScriptFunction,
            Slot::Function(_) => NativeKind::BuiltinFunction,
            Slot::LightHandle(_) => NativeKind::LightHandle,
            Slot::Opaque(_) => NativeKind::Opaque,
            Slot::Thread(_) => NativeKind::Thread,
        }
    }

    /// Table key for this value; `None` for nil and NaN, which cannot be
    /// keys.
    fn key(&self) -> Option<Key> {
        let key = match self {
            Slot::Nil => return None,
            Slot::Number(n) if n.is_nan() => return None,
            Slot::Boolean(b) => Key::Boolean(*b),
            Slot::Number(n) => Key::number(*n),
            Slot::Str(s) => Key::Str(Rc::clone(s)),
            Slot::Table(t) => Key::Ref(Rc::as_ptr(t) as *const () as usize),
            Slot::Function(f) => Key::Ref(Rc::as_ptr(f) as *const () as usize),
            Slot::Opaque(o) => Key::Ref(Rc::as_ptr(o) as *const () as usize),
            Slot::LightHandle(p) => Key::Light(*p),
            Slot::Thread(t) => Key::Thread(*t),
        };
        Some(key)
    }
}

#[derive(Clone, PartialEq, Eq, Hash)]
enum Key {
    Boolean(bool),
    Number(u64),
    Str(Rc<[u8]>),
    Ref(usize),
    Light(usize),
    Thread(u32),
}

impl Key {
    fn number(n: f64) -> Self {
        // -0.0 and 0.0 are the same key.
        let n = if n == 0.0 { 0.0 } else { n };
        Key::Number(n.to_bits())
    }
}

/// In-process stack VM.
pub struct StackVm {
    stack: Vec<Slot>,
    /// Base offset of each active native call frame.
    frames: Vec<usize>,
    capacity: usize,
    max_call_depth: usize,
    globals: HashMap<String, Slot>,
    anchors: HashMap<u32, Slot>,
    next_anchor: u32,
    next_thread: u32,
}

impl Default for StackVm {
    fn default() -> Self {
        Self::new()
    }
}

impl StackVm {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_STACK_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            stack: Vec::new(),
            frames: Vec::new(),
            capacity,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            globals: HashMap::new(),
            anchors: HashMap::new(),
            next_anchor: 0,
            next_thread: 0,
        }
    }

    /// Push a script-defined function.
    pub fn push_script_function<F>(&mut self, f: F)
    where
        F: Fn(&mut StackVm) -> Result<usize, VmError> + 'static,
    {
        self.push(Slot::Function(Rc::new(Function {
            kind: FunctionKind::Script,
            body: Rc::new(f),
        })));
    }

    /// Define a script function as the global `name`.
    pub fn define_script_function<F>(&mut self, name: &str, f: F)
    where
        F: Fn(&mut StackVm) -> Result<usize, VmError> + 'static,
    {
        self.push_script_function(f);
        self.set_global(name);
    }

    pub fn push_light_handle(&mut self, addr: usize) {
        self.push(Slot::LightHandle(addr));
    }

    pub fn push_thread(&mut self) {
        self.next_thread += 1;
        self.push(Slot::Thread(self.next_thread));
    }

    /// Length by the interpreter's own rule: count integer keys from 1 up to
    /// the first missing one.
    pub fn raw_len(&self, idx: StackIndex) -> usize {
        let Some(Slot::Table(t)) = self.get(idx) else {
            return 0;
        };
        let t = t.borrow();
        let mut n = 0;
        while t.entries.contains_key(&Key::number((n + 1) as f64)) {
            n += 1;
        }
        n
    }

    /// Number of entries (of any key type) in the table at `idx`.
    pub fn entry_count(&self, idx: StackIndex) -> usize {
        match self.get(idx) {
            Some(Slot::Table(t)) => t.borrow().entries.len(),
            _ => 0,
        }
    }

    pub fn call_depth(&self) -> usize {
        self.frames.len()
    }

    fn base(&self) -> usize {
        self.frames.last().copied().unwrap_or(0)
    }

    fn position(&self, idx: StackIndex) -> Option<usize> {
        let base = self.base();
        let len = self.stack.len();
        if idx > 0 {
            let pos = base + idx as usize - 1;
            (pos < len).then_some(pos)
        } else if idx < 0 {
            let back = idx.unsigned_abs() as usize;
            (back <= len - base).then(|| len - back)
        } else {
            None
        }
    }

    fn get(&self, idx: StackIndex) -> Option<&Slot> {
        self.position(idx).map(|pos| &self.stack[pos])
    }

    fn push(&mut self, slot: Slot) {
        self.stack.push(slot);
    }

    fn pop_slot(&mut self) -> Slot {
        if self.stack.len() > self.base() {
            self.stack.pop().unwrap_or(Slot::Nil)
        } else {
            Slot::Nil
        }
    }

    fn table_at(&self, idx: StackIndex) -> Option<Rc<RefCell<Table>>> {
        match self.get(idx) {
            Some(Slot::Table(t)) => Some(Rc::clone(t)),
            _ => None,
        }
    }

    fn lookup(table: &Option<Rc<RefCell<Table>>>, key: Option<Key>) -> Slot {
        match (table, key) {
            (Some(t), Some(k)) => t
                .borrow()
                .entries
                .get(&k)
                .map(|(_, v)| v.clone())
                .unwrap_or(Slot::Nil),
            _ => Slot::Nil,
        }
    }

    fn store(table: Option<Rc<RefCell<Table>>>, key: Slot, value: Slot) {
        let (Some(t), Some(k)) = (table, key.key()) else {
            return;
        };
        // The displaced entry may own an opaque block whose finalizer runs
        // on drop; release the borrow first.
        let displaced = {
            let mut t = t.borrow_mut();
            if matches!(value, Slot::Nil) {
                t.entries.remove(&k)
            } else {
                t.entries.insert(k, (key, value))
            }
        };
        drop(displaced);
    }
}

impl ScriptVm for StackVm {
    fn top(&self) -> usize {
        self.stack.len() - self.base()
    }

    fn set_top(&mut self, top: usize) {
        let target = self.base() + top;
        if target <= self.stack.len() {
            let removed = self.stack.split_off(target);
            drop(removed);
        } else {
            self.stack.resize(target, Slot::Nil);
        }
    }

    fn check_stack(&mut self, extra: usize) -> bool {
        self.stack.len() + extra <= self.capacity
    }

    fn kind(&self, idx: StackIndex) -> NativeKind {
        self.get(idx).map_or(NativeKind::None, Slot::kind)
    }

    fn push_nil(&mut self) {
        self.push(Slot::Nil);
    }

    fn push_boolean(&mut self, b: bool) {
        self.push(Slot::Boolean(b));
    }

    fn push_number(&mut self, n: f64) {
        self.push(Slot::Number(n));
    }

    fn push_bytes(&mut self, bytes: &[u8]) {
        self.push(Slot::Str(Rc::from(bytes)));
    }

    fn push_copy(&mut self, idx: StackIndex) {
        let slot = self.get(idx).cloned().unwrap_or(Slot::Nil);
        self.push(slot);
    }

    fn pop(&mut self, n: usize) {
        let top = self.top();
        self.set_top(top.saturating_sub(n));
    }

    fn remove(&mut self, idx: StackIndex) {
        if let Some(pos) = self.position(idx) {
            self.stack.remove(pos);
        }
    }

    fn to_boolean(&self, idx: StackIndex) -> bool {
        !matches!(self.get(idx), None | Some(Slot::Nil) | Some(Slot::Boolean(false)))
    }

    fn to_number(&self, idx: StackIndex) -> Option<f64> {
        match self.get(idx) {
            Some(Slot::Number(n)) => Some(*n),
            _ => None,
        }
    }

    fn to_bytes(&self, idx: StackIndex) -> Option<Vec<u8>> {
        match self.get(idx) {
            Some(Slot::Str(s)) => Some(s.to_vec()),
            _ => None,
        }
    }

    fn new_table(&mut self) {
        self.push(Slot::Table(Rc::new(RefCell::new(Table::default()))));
    }

    fn raw_get(&mut self, table: StackIndex) {
        let t = self.table_at(table);
        let key = self.pop_slot();
        let value = Self::lookup(&t, key.key());
        self.push(value);
    }

    fn raw_set(&mut self, table: StackIndex) {
        let t = self.table_at(table);
        let value = self.pop_slot();
        let key = self.pop_slot();
        Self::store(t, key, value);
    }

    fn raw_get_index(&mut self, table: StackIndex, n: i64) {
        let t = self.table_at(table);
        let value = Self::lookup(&t, Some(Key::number(n as f64)));
        self.push(value);
    }

    fn raw_set_index(&mut self, table: StackIndex, n: i64) {
        let t = self.table_at(table);
        let value = self.pop_slot();
        Self::store(t, Slot::Number(n as f64), value);
    }

    fn get_global(&mut self, name: &str) {
        let value = self.globals.get(name).cloned().unwrap_or(Slot::Nil);
        self.push(value);
    }

    fn set_global(&mut self, name: &str) {
        let value = self.pop_slot();
        let displaced = if matches!(value, Slot::Nil) {
            self.globals.remove(name)
        } else {
            self.globals.insert(name.to_string(), value)
        };
        drop(displaced);
    }

    fn anchor(&mut self) -> AnchorId {
        let value = self.pop_slot();
        self.next_anchor += 1;
        self.anchors.insert(self.next_anchor, value);
        AnchorId(self.next_anchor)
    }

    fn push_anchored(&mut self, anchor: AnchorId) {
        let value = self.anchors.get(&anchor.0).cloned().unwrap_or(Slot::Nil);
        self.push(value);
    }

    fn release_anchor(&mut self, anchor: AnchorId) {
        let released = self.anchors.remove(&anchor.0);
        drop(released);
    }

    fn push_opaque(&mut self, payload: Rc<dyn OpaquePayload>) {
        self.push(Slot::Opaque(Rc::new(OpaqueBlock { payload })));
    }

    fn to_opaque(&self, idx: StackIndex) -> Option<Rc<dyn OpaquePayload>> {
        match self.get(idx) {
            Some(Slot::Opaque(block)) => Some(Rc::clone(&block.payload)),
            _ => None,
        }
    }

    fn push_native(&mut self, f: NativeFn<Self>) {
        self.push(Slot::Function(Rc::new(Function {
            kind: FunctionKind::Builtin,
            body: f,
        })));
    }

    fn call(&mut self, nargs: usize, nresults: usize) -> Result<(), VmError> {
        if self.top() < nargs + 1 {
            return Err(VmError::Runtime(format!(
                "call expects a function and {nargs} arguments, frame holds {}",
                self.top()
            )));
        }
        let func_pos = self.stack.len() - nargs - 1;
        let func = match &self.stack[func_pos] {
            Slot::Function(f) => Rc::clone(f),
            other => return Err(VmError::NotCallable(other.kind().to_string())),
        };
        if self.frames.len() >= self.max_call_depth {
            return Err(VmError::StackOverflow(self.max_call_depth));
        }

        self.frames.push(func_pos + 1);
        let outcome = (func.body)(self);
        let base = self.frames.pop().unwrap_or(0);

        let results = match outcome {
            Ok(nret) => {
                let nret = nret.min(self.stack.len() - base);
                let from = self.stack.len() - nret;
                self.stack.split_off(from)
            }
            Err(e) => {
                self.stack.truncate(func_pos);
                return Err(e);
            }
        };
        self.stack.truncate(func_pos);
        let mut results = results.into_iter();
        for _ in 0..nresults {
            let slot = results.next().unwrap_or(Slot::Nil);
            self.push(slot);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::any::Any;
    use std::cell::Cell;

    struct Probe {
        reclaimed: Rc<Cell<usize>>,
    }

    impl OpaquePayload for Probe {
        fn type_name(&self) -> &'static str {
            "probe"
        }

        fn on_reclaim(&self) {
            self.reclaimed.set(self.reclaimed.get() + 1);
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn indices_are_frame_relative() {
        let mut vm = StackVm::new();
        vm.push_number(1.0);
        vm.push_number(2.0);
        assert_eq!(vm.top(), 2);
        assert_eq!(vm.to_number(1), Some(1.0));
        assert_eq!(vm.to_number(-1), Some(2.0));
        assert_eq!(vm.kind(3), NativeKind::None);
        assert_eq!(vm.kind(-3), NativeKind::None);
        assert_eq!(vm.kind(0), NativeKind::None);
    }

    #[test]
    fn tables_store_by_value_and_identity() {
        let mut vm = StackVm::new();
        vm.new_table();
        vm.push_bytes(b"k");
        vm.push_number(4.0);
        vm.raw_set(1);
        vm.push_number(9.0);
        vm.raw_set_index(1, 1);
        vm.push_bytes(b"k");
        vm.raw_get(1);
        assert_eq!(vm.to_number(-1), Some(4.0));
        vm.pop(1);
        vm.raw_get_index(1, 1);
        assert_eq!(vm.to_number(-1), Some(9.0));
        vm.pop(1);
        assert_eq!(vm.top(), 1);
        assert_eq!(vm.entry_count(1), 2);
    }

    #[test]
    fn nil_assignment_removes_entry() {
        let mut vm = StackVm::new();
        vm.new_table();
        vm.push_boolean(true);
        vm.raw_set_index(1, 1);
        vm.push_nil();
        vm.raw_set_index(1, 1);
        assert_eq!(vm.entry_count(1), 0);
    }

    #[test]
    fn raw_len_stops_at_first_gap() {
        let mut vm = StackVm::new();
        vm.new_table();
        for i in [1, 2, 3, 5] {
            vm.push_number(i as f64);
            vm.raw_set_index(1, i);
        }
        assert_eq!(vm.raw_len(1), 3);
    }

    #[test]
    fn call_passes_args_and_adjusts_results() {
        let mut vm = StackVm::new();
        vm.push_script_function(|vm| {
            let a = vm.to_number(1).unwrap_or(0.0);
            let b = vm.to_number(2).unwrap_or(0.0);
            vm.push_number(a + b);
            vm.push_number(a * b);
            Ok(2)
        });
        vm.push_number(3.0);
        vm.push_number(4.0);
        vm.call(2, 1).unwrap();
        assert_eq!(vm.top(), 1);
        assert_eq!(vm.to_number(-1), Some(7.0));
    }

    #[test]
    fn call_pads_missing_results_with_nil() {
        let mut vm = StackVm::new();
        vm.push_script_function(|_| Ok(0));
        vm.call(0, 2).unwrap();
        assert_eq!(vm.top(), 2);
        assert_eq!(vm.kind(-1), NativeKind::Nil);
    }

    #[test]
    fn calling_a_non_function_fails() {
        let mut vm = StackVm::new();
        vm.push_number(1.0);
        let err = vm.call(0, 1).unwrap_err();
        assert!(matches!(err, VmError::NotCallable(ref k) if k == "number"));
    }

    #[test]
    fn failed_call_unwinds_its_frame() {
        let mut vm = StackVm::new();
        vm.push_bytes(b"below");
        vm.push_script_function(|vm| {
            vm.push_number(1.0);
            Err(VmError::Runtime("boom".into()))
        });
        vm.push_number(2.0);
        assert!(vm.call(1, 1).is_err());
        assert_eq!(vm.top(), 1);
        assert_eq!(vm.call_depth(), 0);
    }

    #[test]
    fn recursion_is_bounded() {
        let mut vm = StackVm::new();
        vm.define_script_function("loop", |vm| {
            vm.get_global("loop");
            vm.call(0, 1)?;
            Ok(1)
        });
        vm.get_global("loop");
        let err = vm.call(0, 1).unwrap_err();
        assert!(matches!(err, VmError::StackOverflow(DEFAULT_MAX_CALL_DEPTH)));
        assert_eq!(vm.top(), 0);
    }

    #[test]
    fn anchors_keep_values_alive() {
        let reclaimed = Rc::new(Cell::new(0));
        let mut vm = StackVm::new();
        vm.push_opaque(Rc::new(Probe {
            reclaimed: Rc::clone(&reclaimed),
        }));
        let anchor = vm.anchor();
        assert_eq!(vm.top(), 0);
        assert_eq!(reclaimed.get(), 0);
        vm.push_anchored(anchor);
        assert_eq!(vm.kind(-1), NativeKind::Opaque);
        vm.pop(1);
        vm.release_anchor(anchor);
        assert_eq!(reclaimed.get(), 1);
    }

    #[test]
    fn opaque_blocks_are_reclaimed_when_unreachable() {
        let reclaimed = Rc::new(Cell::new(0));
        let mut vm = StackVm::new();
        vm.new_table();
        vm.push_opaque(Rc::new(Probe {
            reclaimed: Rc::clone(&reclaimed),
        }));
        vm.push_copy(-1);
        vm.raw_set_index(1, 1);
        vm.pop(1);
        assert_eq!(reclaimed.get(), 0, "still referenced by the table");
        vm.pop(1);
        assert_eq!(reclaimed.get(), 1);
    }

    #[test]
    fn check_stack_respects_capacity() {
        let mut vm = StackVm::with_capacity(2);
        assert!(vm.check_stack(2));
        vm.push_nil();
        assert!(!vm.check_stack(2));
    }

    #[test]
    fn truthiness() {
        let mut vm = StackVm::new();
        vm.push_nil();
        vm.push_boolean(false);
        vm.push_number(0.0);
        assert!(!vm.to_boolean(1));
        assert!(!vm.to_boolean(2));
        assert!(vm.to_boolean(3));
        assert!(!vm.to_boolean(4));
    }

    #[test]
    fn remove_shifts_values_down() {
        let mut vm = StackVm::new();
        vm.push_number(1.0);
        vm.push_number(2.0);
        vm.push_number(3.0);
        vm.remove(-2);
        assert_eq!(vm.top(), 2);
        assert_eq!(vm.to_number(-1), Some(3.0));
        assert_eq!(vm.to_number(1), Some(1.0));
    }
}
