//! Benchmarks for the service container

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use service_container::{
    Abstract, Arguments, Concrete, Container, Parameters, TypeDescriptor,
};
use std::hint::black_box;
use std::sync::Arc;

#[allow(dead_code)]
struct SmallService {
    value: i32,
}

#[allow(dead_code)]
struct MediumService {
    name: String,
    values: Vec<i32>,
}

#[allow(dead_code)]
struct Node {
    child: Option<Arc<Node>>,
}

/// `depth` transient bindings, each depending on the next.
fn chain(container: &Container, depth: usize) {
    for level in 0..depth {
        let descriptor = if level + 1 == depth {
            TypeDescriptor::new(|_: &Arguments| Ok(Node { child: None }))
        } else {
            TypeDescriptor::new(|args: &Arguments| {
                Ok(Node {
                    child: Some(args.get("child")?),
                })
            })
            .depends_on("child", format!("node.{}", level + 1))
        };
        container
            .bind(format!("node.{level}"), descriptor, false)
            .unwrap();
    }
}

fn bench_registration(c: &mut Criterion) {
    let mut group = c.benchmark_group("registration");

    group.bench_function("instance", |b| {
        b.iter(|| {
            let container = Container::new();
            container.instance("small", SmallService { value: 42 });
            black_box(container)
        })
    });

    group.bench_function("singleton_factory", |b| {
        b.iter(|| {
            let container = Container::new();
            container
                .singleton("small", Concrete::factory(|_| Ok(SmallService { value: 42 })))
                .unwrap();
            black_box(container)
        })
    });

    group.bench_function("bind_100", |b| {
        let names: Vec<String> = (0..100).map(|i| format!("service.{i}")).collect();
        b.iter(|| {
            let container = Container::with_capacity(100);
            for name in &names {
                container
                    .bind(name.as_str(), Concrete::factory(|_| Ok(SmallService { value: 1 })), false)
                    .unwrap();
            }
            black_box(container)
        })
    });

    group.finish();
}

fn bench_resolution(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolution");
    group.throughput(Throughput::Elements(1));

    let container = Container::new();
    container.instance("small", SmallService { value: 42 });
    container
        .singleton(
            "medium",
            Concrete::factory(|_| {
                Ok(MediumService {
                    name: "test".to_string(),
                    values: vec![1, 2, 3, 4, 5],
                })
            }),
        )
        .unwrap();
    container.alias("medium", "m").unwrap();
    container
        .bind("transient", Concrete::factory(|_| Ok(SmallService { value: 7 })), false)
        .unwrap();

    // Prebuilt keys so the loop measures lookup, not Arc<str> allocation.
    let small = Abstract::from("small");
    let medium = Abstract::from("medium");
    let alias = Abstract::from("m");
    let transient = Abstract::from("transient");
    let missing = Abstract::from("missing");

    group.bench_function("make_instance", |b| {
        b.iter(|| black_box(container.make_as::<SmallService>(&small).unwrap()))
    });

    group.bench_function("make_cached_singleton", |b| {
        b.iter(|| black_box(container.make_as::<MediumService>(&medium).unwrap()))
    });

    group.bench_function("make_via_alias", |b| {
        b.iter(|| black_box(container.make_as::<MediumService>(&alias).unwrap()))
    });

    group.bench_function("make_transient", |b| {
        b.iter(|| black_box(container.make_as::<SmallService>(&transient).unwrap()))
    });

    group.bench_function("make_with_parameters", |b| {
        b.iter(|| {
            black_box(
                container
                    .make_with(&transient, Parameters::new().with("value", 1i32))
                    .unwrap(),
            )
        })
    });

    group.bench_function("bound_check", |b| {
        b.iter(|| black_box(container.bound(&small)))
    });

    group.bench_function("make_unbound", |b| {
        b.iter(|| black_box(container.make(&missing).is_err()))
    });

    group.finish();
}

fn bench_dependency_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("dependency_chain");

    for depth in [1usize, 4, 16] {
        let container = Container::new();
        chain(&container, depth);
        let root = Abstract::from("node.0");

        group.throughput(Throughput::Elements(depth as u64));
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, _| {
            b.iter(|| black_box(container.make_as::<Node>(&root).unwrap()))
        });
    }

    group.finish();
}

fn bench_contextual(c: &mut Criterion) {
    let mut group = c.benchmark_group("contextual");

    let container = Container::new();
    container.instance("logger", SmallService { value: 0 });
    container.instance("debug_logger", SmallService { value: 1 });
    container
        .bind(
            "consumer",
            TypeDescriptor::new(|args: &Arguments| {
                args.get::<SmallService>("logger")
                    .map(|logger| SmallService { value: logger.value })
            })
            .depends_on("logger", "logger"),
            false,
        )
        .unwrap();
    container
        .when("consumer")
        .needs("logger")
        .give("debug_logger")
        .unwrap();

    let consumer = Abstract::from("consumer");
    group.bench_function("make_with_override", |b| {
        b.iter(|| black_box(container.make_as::<SmallService>(&consumer).unwrap()))
    });

    group.finish();
}

fn bench_concurrent(c: &mut Criterion) {
    use std::thread;

    let mut group = c.benchmark_group("concurrent");

    group.bench_function("concurrent_reads_4", |b| {
        let container = Container::new();
        container.instance("small", SmallService { value: 42 });

        b.iter(|| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let c = container.clone();
                    thread::spawn(move || {
                        for _ in 0..100 {
                            let _ = c.make("small").unwrap();
                        }
                    })
                })
                .collect();

            for h in handles {
                h.join().unwrap();
            }
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_registration,
    bench_resolution,
    bench_dependency_chain,
    bench_contextual,
    bench_concurrent,
);

criterion_main!(benches);
