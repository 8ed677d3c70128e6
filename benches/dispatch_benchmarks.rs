//! Call overhead benchmarks for the binding layer.
//!
//! - Free functions: typed forwarding of 0 to 4 arguments
//! - Overloads: arity dispatch through the mangled targets
//! - Classes: construction, method calls and member access
//! - Marshalling: by-value copies and formatted tail arguments
//!
//! ## Profiling with Puffin
//!
//! Run with the `profile-with-puffin` feature to collect per-scope timings:
//!
//! ```bash
//! cargo bench --features profile-with-puffin -- --profile-time 5
//! ```

use criterion::{Criterion, criterion_group, criterion_main};
use sqbridge::{Bindable, Class, FormatStr, Function, Table, Value, Vm};
use std::hint::black_box;

#[cfg(feature = "profile-with-puffin")]
use std::collections::HashMap;

#[cfg(feature = "profile-with-puffin")]
static FRAME_VIEW: std::sync::OnceLock<puffin::GlobalFrameView> = std::sync::OnceLock::new();

#[cfg(feature = "profile-with-puffin")]
fn setup_profiler() {
    puffin::set_scopes_on(true);
    FRAME_VIEW.get_or_init(puffin::GlobalFrameView::default);
}

#[cfg(not(feature = "profile-with-puffin"))]
fn setup_profiler() {}

#[cfg(feature = "profile-with-puffin")]
fn end_profiling_frame() {
    puffin::GlobalProfiler::lock().new_frame();
}

#[cfg(not(feature = "profile-with-puffin"))]
fn end_profiling_frame() {}

/// Print total time per top-level scope across the recorded frames.
#[cfg(feature = "profile-with-puffin")]
fn print_profiling_stats() {
    use puffin::Reader;

    let Some(frame_view) = FRAME_VIEW.get() else {
        println!("Profiler not initialized");
        return;
    };
    let view = frame_view.lock();
    let scope_collection = view.scope_collection();

    let mut scope_timings: HashMap<String, i64> = HashMap::new();
    let mut frame_count = 0i64;
    for frame in view.recent_frames() {
        frame_count += 1;
        let Ok(unpacked) = frame.unpacked() else {
            continue;
        };
        for (_thread_info, stream_info) in unpacked.thread_streams.iter() {
            let Ok(scopes) = Reader::from_start(&stream_info.stream).read_top_scopes() else {
                continue;
            };
            for scope in scopes {
                if let Some(details) = scope_collection.fetch_by_id(&scope.id) {
                    *scope_timings.entry(details.name().to_string()).or_insert(0) += scope.record.duration_ns;
                }
            }
        }
    }

    println!("\n=== Profiling Summary ({frame_count} frames) ===");
    let mut entries: Vec<_> = scope_timings.into_iter().collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1));
    for (name, ns) in entries {
        let avg = if frame_count > 0 { ns / frame_count } else { ns };
        println!("  {:40} {:>10.2?} avg", name, std::time::Duration::from_nanos(avg as u64));
    }
    println!("=====================================\n");
}

#[cfg(not(feature = "profile-with-puffin"))]
fn print_profiling_stats() {}

#[derive(Debug, Default, Clone)]
struct Vec2 {
    x: f64,
    y: f64,
}

impl Bindable for Vec2 {}

fn setup() -> Vm {
    let mut vm = Vm::new();
    Table::root(&mut vm)
        .func("zero", || 0i64)
        .unwrap()
        .func("add", |a: i64, b: i64| a + b)
        .unwrap()
        .func("sum4", |a: i64, b: i64, c: i64, d: i64| a + b + c + d)
        .unwrap()
        .overload("pick", |a: i64| a)
        .unwrap()
        .overload("pick", |a: i64, b: i64| a.max(b))
        .unwrap()
        .func("format", |s: FormatStr| s.len() as i64)
        .unwrap();
    Class::<Vec2>::new(&mut vm, "Vec2")
        .unwrap()
        .ctor(|x: f64, y: f64| Vec2 { x, y })
        .unwrap()
        .var("x", |v: &Vec2| v.x, |v: &mut Vec2, x: f64| v.x = x)
        .unwrap()
        .func("dot", |v: &Vec2, other: Vec2| v.x * other.x + v.y * other.y)
        .unwrap()
        .build()
        .unwrap();
    vm
}

fn function_benchmarks(c: &mut Criterion) {
    setup_profiler();
    let mut vm = setup();
    let mut group = c.benchmark_group("call/functions");

    group.bench_function("zero_args", |b| {
        b.iter(|| {
            let result = vm.call_global("zero", &[]).unwrap();
            end_profiling_frame();
            black_box(result)
        });
    });

    let two = [Value::Integer(2), Value::Integer(3)];
    group.bench_function("two_args", |b| {
        b.iter(|| black_box(vm.call_global("add", black_box(&two)).unwrap()));
    });

    let four = [Value::Integer(1), Value::Integer(2), Value::Integer(3), Value::Integer(4)];
    group.bench_function("four_args", |b| {
        b.iter(|| black_box(vm.call_global("sum4", black_box(&four)).unwrap()));
    });

    let add = Function::global(&mut vm, "add").unwrap();
    group.bench_function("typed_handle_call", |b| {
        b.iter(|| black_box(add.call::<i64, _>(&mut vm, (black_box(2i64), 3i64)).unwrap()));
    });

    group.finish();
    print_profiling_stats();
}

fn dispatch_benchmarks(c: &mut Criterion) {
    let mut vm = setup();
    let mut group = c.benchmark_group("call/overloads");

    let one = [Value::Integer(7)];
    group.bench_function("one_arg", |b| {
        b.iter(|| black_box(vm.call_global("pick", black_box(&one)).unwrap()));
    });

    let two = [Value::Integer(7), Value::Integer(9)];
    group.bench_function("two_args", |b| {
        b.iter(|| black_box(vm.call_global("pick", black_box(&two)).unwrap()));
    });

    group.finish();
}

fn class_benchmarks(c: &mut Criterion) {
    let mut vm = setup();
    let mut group = c.benchmark_group("call/classes");

    let coords = [Value::Float(1.0), Value::Float(2.0)];
    group.bench_function("construct", |b| {
        b.iter(|| black_box(vm.call_global("Vec2", black_box(&coords)).unwrap()));
    });

    let v = vm.call_global("Vec2", &coords).unwrap();
    let w = vm.call_global("Vec2", &coords).unwrap();
    group.bench_function("method_by_value_arg", |b| {
        b.iter(|| black_box(vm.call_method(&v, "dot", std::slice::from_ref(&w)).unwrap()));
    });

    let key = Value::from("x");
    group.bench_function("member_get", |b| {
        b.iter(|| black_box(vm.get_slot(&v, &key).unwrap()));
    });
    group.bench_function("member_set", |b| {
        b.iter(|| vm.set_slot(&v, key.clone(), Value::Float(black_box(3.0))).unwrap());
    });

    group.finish();
}

fn marshal_benchmarks(c: &mut Criterion) {
    let mut vm = setup();
    let mut group = c.benchmark_group("marshal/format");

    let args = [
        Value::from("%s=%d (%.2f)"),
        Value::from("key"),
        Value::Integer(42),
        Value::Float(1.5),
    ];
    group.bench_function("format_tail", |b| {
        b.iter(|| black_box(vm.call_global("format", black_box(&args)).unwrap()));
    });

    group.finish();
}

criterion_group!(
    benches,
    function_benchmarks,
    dispatch_benchmarks,
    class_benchmarks,
    marshal_benchmarks
);

criterion_main!(benches);
