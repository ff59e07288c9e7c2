use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use luan_rt::heap::HostHeap;
use luan_rt::host::HostRuntime;
use luan_rt::values::TaggedValue;
use luan_rt::{Bridge, ScriptVm, StackVm};

fn flat_list(len: usize) -> TaggedValue {
    TaggedValue::array((0..len).map(|i| TaggedValue::Floating(i as f64))).unwrap()
}

fn mixed_records(len: usize) -> TaggedValue {
    TaggedValue::array((0..len).map(|i| {
        TaggedValue::array([
            TaggedValue::Integral(i as i64),
            TaggedValue::from(format!("record-{i}")),
            TaggedValue::Boolean(i % 2 == 0),
        ])
        .unwrap()
    }))
    .unwrap()
}

fn nested(depth: usize) -> TaggedValue {
    let mut value = TaggedValue::from("leaf");
    for _ in 0..depth {
        value = TaggedValue::array([value, TaggedValue::Floating(1.0)]).unwrap();
    }
    value
}

fn bridge() -> Bridge<StackVm> {
    let host: Arc<dyn HostRuntime> = HostHeap::new();
    Bridge::new(StackVm::new(), host)
}

fn marshal_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("marshal");

    for (name, value) in [
        ("flat_1k", flat_list(1_000)),
        ("records_256", mixed_records(256)),
        ("nested_30", nested(30)),
    ] {
        let mut b_encode = bridge();
        group.bench_with_input(BenchmarkId::new("encode", name), &value, |b, value| {
            b.iter(|| {
                b_encode.encode(black_box(value));
                b_encode.vm_mut().set_top(0);
            });
        });

        let mut b_round = bridge();
        group.bench_with_input(BenchmarkId::new("roundtrip", name), &value, |b, value| {
            b.iter(|| {
                b_round.encode(black_box(value));
                black_box(b_round.decode())
            });
        });
    }

    group.finish();
}

fn intern_benchmark(c: &mut Criterion) {
    let mut bridge = bridge();
    bridge.vm_mut().push_script_function(|_| Ok(0));
    bridge.intern();

    c.bench_function("intern_known_function", |b| {
        b.iter(|| black_box(bridge.intern()));
    });
}

criterion_group!(benches, marshal_benchmark, intern_benchmark);
criterion_main!(benches);
