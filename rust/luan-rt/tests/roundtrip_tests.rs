//! Values pushed into the VM and read back out.

use std::sync::Arc;

use luan_rt::heap::HostHeap;
use luan_rt::host::HostRuntime;
use luan_rt::values::{ScriptArray, TaggedValue};
use luan_rt::vm::NativeKind;
use luan_rt::{Bridge, BridgeConfig, ScriptVm, StackVm};

/// Helper: a bridge over a fresh VM and host heap.
fn bridge() -> (Bridge<StackVm>, Arc<HostHeap>) {
    let heap = HostHeap::new();
    let host: Arc<dyn HostRuntime> = heap.clone();
    (Bridge::new(StackVm::new(), host), heap)
}

fn roundtrip(bridge: &mut Bridge<StackVm>, value: &TaggedValue) -> TaggedValue {
    bridge.encode(value);
    assert_eq!(bridge.vm().top(), 1);
    let back = bridge.decode();
    assert_eq!(bridge.vm().top(), 0);
    back
}

// ─── scalars ───

#[test]
fn scalars_survive_a_round_trip() {
    let (mut bridge, _heap) = bridge();
    for value in [
        TaggedValue::Null,
        TaggedValue::Boolean(true),
        TaggedValue::Boolean(false),
        TaggedValue::Floating(-0.5),
        TaggedValue::Floating(1e300),
        TaggedValue::from("plain text"),
        TaggedValue::from(""),
    ] {
        assert_eq!(roundtrip(&mut bridge, &value), value);
    }
}

#[test]
fn integers_come_back_as_floats() {
    let (mut bridge, _heap) = bridge();
    let back = roundtrip(&mut bridge, &TaggedValue::Integral(12));
    assert_eq!(back, TaggedValue::Floating(12.0));
    assert_eq!(back.as_i64(), Some(12));
}

#[test]
fn non_utf8_bytes_are_carried() {
    let (mut bridge, _heap) = bridge();
    let value = TaggedValue::from(vec![0xff, 0xfe, b'x']);
    assert_eq!(roundtrip(&mut bridge, &value), value);
}

// ─── arrays ───

#[test]
fn array_with_trailing_gap_loses_the_gap() {
    let (mut bridge, _heap) = bridge();
    let factory = bridge.factory();
    let a = factory.floating(1.5);
    let b = factory.string("hi");
    let list = factory.list(&[Some(&a), Some(&b), None]).unwrap();

    bridge.encode(&list);
    assert_eq!(bridge.vm().raw_len(-1), 2);
    let back = bridge.decode();
    assert_eq!(back, TaggedValue::array([a, b]).unwrap());
}

#[test]
fn array_with_interior_gap_is_cut_at_the_gap() {
    let (mut bridge, _heap) = bridge();
    let array = ScriptArray::new(vec![
        Some(TaggedValue::Floating(1.0)),
        None,
        Some(TaggedValue::Floating(3.0)),
    ])
    .unwrap();
    let back = roundtrip(&mut bridge, &TaggedValue::Array(array));
    assert_eq!(back, TaggedValue::array([TaggedValue::Floating(1.0)]).unwrap());
}

#[test]
fn nested_arrays_round_trip() {
    let (mut bridge, _heap) = bridge();
    let inner = TaggedValue::array([TaggedValue::from("x"), TaggedValue::Boolean(true)]).unwrap();
    let value = TaggedValue::array([
        TaggedValue::Floating(1.0),
        inner.clone(),
        TaggedValue::array([inner]).unwrap(),
    ])
    .unwrap();
    assert_eq!(roundtrip(&mut bridge, &value), value);
}

#[test]
fn deep_nesting_is_truncated_not_overflowed() {
    let (mut bridge, _heap) = bridge();
    let mut value = TaggedValue::Boolean(true);
    for _ in 0..200 {
        value = TaggedValue::array([value]).unwrap();
    }
    let back = roundtrip(&mut bridge, &value);
    assert_eq!(back.as_array().unwrap().depth(), 31);
}

#[test]
fn cyclic_tables_decode_to_a_bounded_array() {
    let (mut bridge, _heap) = bridge();
    let vm = bridge.vm_mut();
    vm.new_table();
    vm.push_bytes(b"tail");
    vm.raw_set_index(-2, 2);
    vm.push_copy(-1);
    vm.raw_set_index(-2, 1);

    let value = bridge.decode();
    assert_eq!(bridge.vm().top(), 0);
    let array = value.as_array().unwrap();
    assert_eq!(array.depth(), 31);
    assert_eq!(array.get(1).and_then(TaggedValue::as_str), Some("tail"));
}

#[test]
fn configured_depth_applies_both_ways() {
    let heap = HostHeap::new();
    let host: Arc<dyn HostRuntime> = heap.clone();
    let config = BridgeConfig::from_toml_str("max_depth = 3").unwrap();
    let mut bridge = Bridge::with_config(StackVm::new(), host, config);

    let value = TaggedValue::array([TaggedValue::array([
        TaggedValue::Floating(1.0),
        TaggedValue::array([TaggedValue::from("cut")]).unwrap(),
    ])
    .unwrap()])
    .unwrap();
    let back = roundtrip(&mut bridge, &value);
    assert_eq!(
        back,
        TaggedValue::array([TaggedValue::array([TaggedValue::Floating(1.0)]).unwrap()]).unwrap()
    );
}

// ─── host objects ───

#[test]
fn host_objects_round_trip_to_the_same_object() {
    let (mut bridge, heap) = bridge();
    let object = heap.insert(String::from("state"));
    let value = bridge.factory().object(&object);

    let back = roundtrip(&mut bridge, &value);
    assert!(back.as_object().unwrap().same_object(&object));
    assert_eq!(
        heap.with_data(object.id(), |s: &String| s.clone()),
        Some("state".to_string())
    );
}

#[test]
fn host_objects_inside_arrays_are_released_with_the_table() {
    let (mut bridge, heap) = bridge();
    let object = heap.insert(0u8);
    let id = object.id();
    let list = TaggedValue::array([TaggedValue::HostObject(object.clone())]).unwrap();

    bridge.encode(&list);
    assert_eq!(bridge.vm().kind(-1), NativeKind::Table);
    assert_eq!(heap.strong_count(id), 3);

    drop(list);
    bridge.vm_mut().pop(1);
    assert_eq!(heap.strong_count(id), 1);
    assert_eq!(heap.release_count(id), 2);
}
