#![no_main]

//! Fuzz target for concurrent container operations
//!
//! Threads resolve, rebind and forget the same keys at once. Every thread
//! must finish and shared bindings must keep handing out one instance while
//! nobody rebinds them.

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use service_container::{Concrete, Container, Parameters};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

const KEYS: [&str; 3] = ["config", "cache", "queue"];

fn key(index: u8) -> &'static str {
    KEYS[index as usize % KEYS.len()]
}

/// Thread operation
#[derive(Debug, Clone, Arbitrary)]
enum ThreadOp {
    Make(u8),
    MakeWith(u8, u32),
    Bound(u8),
    Rebind(u8, bool),
    Extend(u8),
    Forget(u8),
    Tagged,
}

/// Concurrent test scenario
#[derive(Debug, Arbitrary)]
struct ConcurrentScenario {
    // Number of threads (clamped to 2-8)
    thread_count: u8,
    ops_per_thread: Vec<ThreadOp>,
}

fuzz_target!(|scenario: ConcurrentScenario| {
    let container = Container::new();
    let builds = Arc::new(AtomicU32::new(0));

    let counter = Arc::clone(&builds);
    container
        .singleton(
            "stable",
            Concrete::factory(move |_| Ok(counter.fetch_add(1, Ordering::SeqCst))),
        )
        .unwrap();
    for k in KEYS {
        container
            .singleton(k, Concrete::factory(|_| Ok(0u32)))
            .unwrap();
    }
    container.tag(KEYS, "all").unwrap();

    let thread_count = (scenario.thread_count % 7 + 2) as usize;
    let ops = Arc::new(scenario.ops_per_thread);
    let barrier = Arc::new(Barrier::new(thread_count));

    let handles: Vec<_> = (0..thread_count)
        .map(|_| {
            let container = container.clone();
            let ops = Arc::clone(&ops);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let stable = container.make("stable").unwrap();
                for op in ops.iter().take(50) {
                    match *op {
                        ThreadOp::Make(k) => {
                            let _ = container.make(key(k));
                        }
                        ThreadOp::MakeWith(k, v) => {
                            let _ = container.make_with(key(k), Parameters::new().with("v", v));
                        }
                        ThreadOp::Bound(k) => {
                            assert!(container.bound(key(k)));
                        }
                        ThreadOp::Rebind(k, shared) => {
                            container
                                .bind(key(k), Concrete::factory(|_| Ok(1u32)), shared)
                                .unwrap();
                        }
                        ThreadOp::Extend(k) => {
                            let _ = container.extend_as::<u32, u32, _>(key(k), |v, _| Ok(*v + 1));
                        }
                        ThreadOp::Forget(k) => {
                            container.forget_instance(key(k));
                        }
                        ThreadOp::Tagged => {
                            let _ = container.tagged("all");
                        }
                    }
                }
                stable
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(builds.load(Ordering::SeqCst), 1);
    assert!(results.iter().all(|r| Arc::ptr_eq(r, &results[0])));
    assert!(Arc::ptr_eq(&container.make("stable").unwrap(), &results[0]));
});
