//! Tagged value -> VM value.

use luan_core::{ScriptArray, TaggedValue};
use tracing::debug;

use crate::functions::{push_stub, Callable};
use crate::marshal::Marshal;
use crate::vm::{ScriptVm, StackIndex};

impl Marshal {
    /// Push exactly one VM value for `value`.
    pub fn encode<V: ScriptVm>(&self, vm: &mut V, value: &TaggedValue) {
        self.encode_at(vm, value, 0);
    }

    fn encode_at<V: ScriptVm>(&self, vm: &mut V, value: &TaggedValue, level: usize) {
        match value {
            TaggedValue::Null | TaggedValue::Globals | TaggedValue::InternedFunction(_) => {
                vm.push_nil()
            }
            TaggedValue::Boolean(b) => vm.push_boolean(*b),
            TaggedValue::Integral(i) => vm.push_number(*i as f64),
            TaggedValue::Floating(f) => vm.push_number(*f),
            TaggedValue::String(s) => vm.push_bytes(s.as_bytes()),
            TaggedValue::Array(array) => self.encode_array(vm, array, level + 1),
            TaggedValue::HostObject(object) if object.is_released() => {
                debug!(object = %object.id(), "released host object encodes as nil");
                vm.push_nil()
            }
            TaggedValue::HostObject(object) => self.binder().bind(vm, object),
            TaggedValue::HostLambdaFunction(lambda) => {
                push_stub(self, vm, Callable::HostClosure(lambda.clone()))
            }
            TaggedValue::HostReflectFunction(reflect) => {
                push_stub(self, vm, Callable::HostReflective(reflect.clone()))
            }
        }
    }

    fn encode_array<V: ScriptVm>(&self, vm: &mut V, array: &ScriptArray, level: usize) {
        if self.depth_exceeded(vm, level) {
            debug!(level, "array nesting limit reached, encoding as nil");
            vm.push_nil();
            return;
        }

        vm.new_table();
        let table = vm.top() as StackIndex;
        for (i, slot) in array.slots().iter().enumerate() {
            match slot {
                Some(value) => self.encode_at(vm, value, level),
                None => vm.push_nil(),
            }
            vm.raw_set_index(table, i as i64 + 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::{NativeKind, StackVm};
    use luan_core::heap::HostHeap;
    use luan_core::HostLambda;

    #[test]
    fn scalars() {
        let marshal = Marshal::default();
        let mut vm = StackVm::new();
        marshal.encode(&mut vm, &TaggedValue::Boolean(false));
        marshal.encode(&mut vm, &TaggedValue::Integral(-3));
        marshal.encode(&mut vm, &TaggedValue::Floating(0.25));
        marshal.encode(&mut vm, &TaggedValue::from("abc"));
        marshal.encode(&mut vm, &TaggedValue::Null);

        assert_eq!(vm.top(), 5);
        assert_eq!(vm.kind(1), NativeKind::Boolean);
        assert_eq!(vm.to_number(2), Some(-3.0));
        assert_eq!(vm.to_number(3), Some(0.25));
        assert_eq!(vm.to_bytes(4).as_deref(), Some(&b"abc"[..]));
        assert_eq!(vm.kind(5), NativeKind::Nil);
    }

    #[test]
    fn strings_keep_their_length() {
        let marshal = Marshal::default();
        let mut vm = StackVm::new();
        marshal.encode(&mut vm, &TaggedValue::from(&b"ab\0"[..]));
        assert_eq!(vm.to_bytes(-1).map(|b| b.len()), Some(3));
    }

    #[test]
    fn markers_encode_as_nil() {
        let marshal = Marshal::default();
        let mut vm = StackVm::new();
        marshal.encode(&mut vm, &TaggedValue::Globals);
        let id = luan_core::FunctionId::new(4).unwrap();
        marshal.encode(&mut vm, &TaggedValue::InternedFunction(id));
        assert_eq!(vm.kind(1), NativeKind::Nil);
        assert_eq!(vm.kind(2), NativeKind::Nil);
    }

    #[test]
    fn absent_slots_leave_a_gap() {
        let marshal = Marshal::default();
        let mut vm = StackVm::new();
        let array = ScriptArray::new(vec![
            Some(TaggedValue::Floating(1.5)),
            Some(TaggedValue::from("hi")),
            None,
        ])
        .unwrap();
        marshal.encode(&mut vm, &TaggedValue::Array(array));

        assert_eq!(vm.top(), 1);
        assert_eq!(vm.raw_len(-1), 2);
        assert_eq!(vm.entry_count(-1), 2);
    }

    #[test]
    fn nesting_is_cut_off_at_max_depth() {
        let marshal = Marshal::default();
        let mut vm = StackVm::new();
        let mut value = TaggedValue::Floating(1.0);
        for _ in 0..40 {
            value = TaggedValue::array([value]).unwrap();
        }
        marshal.encode(&mut vm, &value);
        assert_eq!(vm.top(), 1);

        let mut levels = 0;
        while vm.kind(-1) == NativeKind::Table {
            levels += 1;
            vm.raw_get_index(-1, 1);
        }
        assert_eq!(levels, 31);
        assert_eq!(vm.kind(-1), NativeKind::Nil);
    }

    #[test]
    fn host_objects_are_bound() {
        let heap = HostHeap::new();
        let object = heap.insert(1i32);
        let marshal = Marshal::default();
        let mut vm = StackVm::new();

        marshal.encode(&mut vm, &TaggedValue::HostObject(object.clone()));
        assert_eq!(vm.kind(-1), NativeKind::Opaque);
        assert_eq!(heap.strong_count(object.id()), 2);
        vm.pop(1);
        assert_eq!(heap.strong_count(object.id()), 1);
    }

    #[test]
    fn released_host_objects_encode_as_nil() {
        let heap = HostHeap::new();
        let object = heap.insert(1i32);
        let value = TaggedValue::HostObject(object.clone());
        value.release();
        let marshal = Marshal::default();
        let mut vm = StackVm::new();

        marshal.encode(&mut vm, &value);
        assert_eq!(vm.kind(-1), NativeKind::Nil);
        assert_eq!(heap.strong_count(object.id()), 1);
    }

    #[test]
    fn host_closures_become_builtins() {
        let heap = HostHeap::new();
        let closure = heap.insert_closure(|_| Ok(TaggedValue::Null));
        let marshal = Marshal::default();
        let mut vm = StackVm::new();

        let value = TaggedValue::HostLambdaFunction(HostLambda {
            closure,
            signature: Vec::new(),
        });
        marshal.encode(&mut vm, &value);
        assert_eq!(vm.kind(-1), NativeKind::BuiltinFunction);
    }
}
