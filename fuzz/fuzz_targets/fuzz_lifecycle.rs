#![no_main]

//! Fuzz target for service lifecycle operations
//!
//! Tests shared caching, transient creation, forgetting and flushing, and
//! deferred provider loading.

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use service_container::{Abstract, Concrete, Container, Result, ServiceProvider};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

static SHARED_COUNTER: AtomicU64 = AtomicU64::new(0);
static TRANSIENT_COUNTER: AtomicU64 = AtomicU64::new(0);
static PROVIDER_REGISTRATIONS: AtomicU64 = AtomicU64::new(0);

#[derive(Debug)]
struct SharedService {
    id: u64,
}

#[derive(Debug)]
struct TransientService {
    instance_id: u64,
}

#[derive(Debug, Arbitrary)]
struct SimpleService {
    value: u32,
}

struct QueueProvider;

impl ServiceProvider for QueueProvider {
    fn register(&self, container: &Container) -> Result<()> {
        PROVIDER_REGISTRATIONS.fetch_add(1, Ordering::SeqCst);
        container.singleton("queue", Concrete::factory(|_| Ok(String::from("sync"))))
    }

    fn provides(&self) -> Vec<Abstract> {
        vec!["queue".into()]
    }

    fn is_deferred(&self) -> bool {
        true
    }
}

/// Lifecycle operations
#[derive(Debug, Arbitrary)]
enum LifecycleOp {
    // Registration
    RegisterInstance(SimpleService),
    RegisterShared,
    RegisterTransient,
    Defer,

    // Resolution
    GetInstance,
    GetShared,
    GetTransient,
    GetTransientMultiple(u8),
    GetDeferred,

    // Queries
    Len,
    IsEmpty,

    // Lifecycle
    ForgetShared,
    ForgetInstances,
    Flush,
}

fuzz_target!(|ops: Vec<LifecycleOp>| {
    SHARED_COUNTER.store(0, Ordering::SeqCst);
    TRANSIENT_COUNTER.store(0, Ordering::SeqCst);
    PROVIDER_REGISTRATIONS.store(0, Ordering::SeqCst);

    let container = Container::new();
    let mut deferred_pending = false;
    let mut registrations_expected = 0;

    for op in ops.into_iter().take(100) {
        match op {
            LifecycleOp::RegisterInstance(svc) => {
                container.instance("simple", svc);
                assert!(container.resolved("simple"));
            }
            LifecycleOp::RegisterShared => {
                container
                    .singleton(
                        "shared",
                        Concrete::factory(|_| {
                            Ok(SharedService {
                                id: SHARED_COUNTER.fetch_add(1, Ordering::SeqCst),
                            })
                        }),
                    )
                    .unwrap();
                assert!(!container.resolved("shared"));
            }
            LifecycleOp::RegisterTransient => {
                container
                    .bind(
                        "transient",
                        Concrete::factory(|_| {
                            Ok(TransientService {
                                instance_id: TRANSIENT_COUNTER.fetch_add(1, Ordering::SeqCst),
                            })
                        }),
                        false,
                    )
                    .unwrap();
            }
            LifecycleOp::Defer => {
                if !container.bound("queue") && !deferred_pending {
                    container.defer(Arc::new(QueueProvider));
                    deferred_pending = true;
                }
            }
            LifecycleOp::GetInstance => {
                if container.bound("simple") {
                    let s1 = container.make_as::<SimpleService>("simple").unwrap();
                    let s2 = container.make_as::<SimpleService>("simple").unwrap();
                    assert!(Arc::ptr_eq(&s1, &s2));
                }
            }
            LifecycleOp::GetShared => {
                if container.bound("shared") {
                    let s1 = container.make_as::<SharedService>("shared").unwrap();
                    let s2 = container.make_as::<SharedService>("shared").unwrap();
                    assert!(Arc::ptr_eq(&s1, &s2), "Shared binding should be same instance");
                    assert_eq!(s1.id, s2.id);
                    assert!(container.resolved("shared"));
                }
            }
            LifecycleOp::GetTransient => {
                if container.bound("transient") {
                    let s1 = container.make_as::<TransientService>("transient").unwrap();
                    let s2 = container.make_as::<TransientService>("transient").unwrap();
                    assert!(!Arc::ptr_eq(&s1, &s2), "Transient should be different instances");
                    assert_ne!(s1.instance_id, s2.instance_id);
                }
            }
            LifecycleOp::GetTransientMultiple(count) => {
                if container.bound("transient") {
                    let count = (count % 10).max(1);
                    let instances: Vec<_> = (0..count)
                        .map(|_| container.make_as::<TransientService>("transient").unwrap())
                        .collect();

                    for i in 0..instances.len() {
                        for j in (i + 1)..instances.len() {
                            assert!(!Arc::ptr_eq(&instances[i], &instances[j]));
                        }
                    }
                }
            }
            LifecycleOp::GetDeferred => {
                let result = container.make_as::<String>("queue");
                if deferred_pending {
                    assert!(result.is_ok());
                    deferred_pending = false;
                    registrations_expected += 1;
                } else if !container.bound("queue") {
                    assert!(result.is_err());
                }
                assert!(!container.is_deferred("queue"));
            }
            LifecycleOp::Len => {
                let _ = container.len();
            }
            LifecycleOp::IsEmpty => {
                assert_eq!(container.is_empty(), container.len() == 0);
            }
            LifecycleOp::ForgetShared => {
                container.forget_instance("shared");
                assert!(!container.resolved("shared"));
            }
            LifecycleOp::ForgetInstances => {
                container.forget_instances();
                assert!(!container.bound("simple"));
                assert!(!container.resolved("shared"));
            }
            LifecycleOp::Flush => {
                container.flush();
                deferred_pending = false;
                assert!(container.is_empty());
                assert!(!container.is_deferred("queue"));
            }
        }
    }

    assert_eq!(PROVIDER_REGISTRATIONS.load(Ordering::SeqCst), registrations_expected);
});
