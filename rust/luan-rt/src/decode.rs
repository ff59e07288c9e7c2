//! VM value -> tagged value.

use luan_core::{ScriptArray, ScriptString, TaggedValue};
use tracing::{debug, warn};

use crate::marshal::Marshal;
use crate::vm::{NativeKind, ScriptVm, StackIndex};

impl Marshal {
    /// Pop the value on top of the VM stack and convert it.
    ///
    /// Exactly one value is consumed. An empty frame decodes to `Null` and
    /// consumes nothing.
    pub fn decode<V: ScriptVm>(&self, vm: &mut V) -> TaggedValue {
        self.decode_at(vm, 0)
    }

    /// `level` is the nesting of the array holding the value, 0 at the root.
    fn decode_at<V: ScriptVm>(&self, vm: &mut V, level: usize) -> TaggedValue {
        let kind = vm.kind(-1);
        let value = match kind {
            NativeKind::None => return TaggedValue::Null,
            NativeKind::Table => return self.decode_table(vm, level + 1),
            NativeKind::Nil | NativeKind::LightHandle => TaggedValue::Null,
            NativeKind::Boolean => TaggedValue::Boolean(vm.to_boolean(-1)),
            NativeKind::Number => TaggedValue::Floating(vm.to_number(-1).unwrap_or_default()),
            NativeKind::String => {
                TaggedValue::String(ScriptString::new(vm.to_bytes(-1).unwrap_or_default()))
            }
            NativeKind::ScriptFunction => self
                .registry()
                .intern(vm)
                .map_or(TaggedValue::Null, TaggedValue::InternedFunction),
            NativeKind::BuiltinFunction => {
                debug!("builtin function does not cross into the host, decoding as null");
                TaggedValue::Null
            }
            NativeKind::Opaque => vm
                .to_opaque(-1)
                .and_then(|payload| self.binder().unwrap(payload.as_ref()))
                .map_or(TaggedValue::Null, TaggedValue::HostObject),
            NativeKind::Thread => {
                warn!("thread values cannot cross into the host, decoding as null");
                TaggedValue::Null
            }
        };
        vm.pop(1);
        value
    }

    /// Decode the table on top of the stack as an array at nesting `level`.
    fn decode_table<V: ScriptVm>(&self, vm: &mut V, level: usize) -> TaggedValue {
        if self.depth_exceeded(vm, level) {
            debug!(level, "array nesting limit reached, decoding table as null");
            vm.pop(1);
            return TaggedValue::Null;
        }

        let table = vm.top() as StackIndex;
        let limit = self.config().array_limit();
        let mut slots = Vec::new();
        while slots.len() < limit {
            vm.raw_get_index(table, slots.len() as i64 + 1);
            if vm.kind(-1) == NativeKind::Nil {
                vm.pop(1);
                break;
            }
            slots.push(Some(self.decode_at(vm, level)));
        }
        debug!(len = slots.len(), level, "decoded table");
        vm.pop(1);
        TaggedValue::Array(ScriptArray::truncating(slots))
    }
}
