//! # service-container - IoC container with contextual binding
//!
//! A thread-safe service container keyed by string or type identifiers.
//!
//! ## Features
//!
//! - **Shared and transient bindings** - build once and cache, or build on every resolve
//! - **Single-flight singletons** - concurrent first resolutions run the factory once
//! - **Contextual binding** - override a dependency for one consumer only
//! - **Cycle detection** - circular graphs fail with the full path instead of overflowing
//! - **Aliases and tags** - alternate names and named groups of services
//! - **Deferred providers** - register a provider's services on first use
//! - **Observable** - optional tracing integration with JSON or pretty output
//!
//! ## Quick Start
//!
//! ```rust
//! use service_container::{Arguments, Concrete, Container, TypeDescriptor};
//! use std::sync::Arc;
//!
//! struct Database { url: String }
//!
//! struct UserService { db: Arc<Database> }
//!
//! let container = Container::new();
//!
//! container
//!     .singleton("db", Concrete::factory(|_| Ok(Database { url: "postgres://localhost".into() })))
//!     .unwrap();
//! container
//!     .bind(
//!         "users",
//!         TypeDescriptor::new(|args: &Arguments| Ok(UserService { db: args.get("db")? }))
//!             .depends_on("db", "db"),
//!         false,
//!     )
//!     .unwrap();
//!
//! let users = container.make_as::<UserService>("users").unwrap();
//! assert_eq!(users.db.url, "postgres://localhost");
//! ```
//!
//! ## Type keys
//!
//! [`Abstract::of`] turns a type into a key, so services can be registered
//! under the type they implement:
//!
//! ```rust
//! use service_container::{Abstract, Concrete, Container};
//!
//! trait Clock: Send + Sync { fn now(&self) -> u64; }
//! struct Fixed;
//! impl Clock for Fixed { fn now(&self) -> u64 { 42 } }
//!
//! let container = Container::new();
//! container
//!     .singleton(Abstract::of::<dyn Clock>(), Concrete::factory(|_| Ok(Box::new(Fixed) as Box<dyn Clock>)))
//!     .unwrap();
//!
//! let clock = container.make_as::<Box<dyn Clock>>(Abstract::of::<dyn Clock>()).unwrap();
//! assert_eq!(clock.now(), 42);
//! ```
//!
//! ## Resolution
//!
//! `make` follows aliases, applies contextual overrides for the consumer being
//! built, loads a deferred provider if nothing is bound, serves the shared
//! cache, and otherwise runs the producer under a per-call build stack. See
//! [`Resolver`] for what factories can do with it.

mod concrete;
mod config;
mod container;
pub mod contextual;
mod error;
mod key;
#[cfg(feature = "logging")]
pub mod logging;
mod provider;
mod registry;
mod resolver;

pub use concrete::{
    Arguments, Concrete, ConcreteKind, Constructible, Dependency, Injectable, Instance,
    TypeDescriptor, downcast, instance,
};
pub use config::{ConfigSource, EnvConfig, FromFn, MapConfig};
pub use container::Container;
pub use contextual::{ContextualBindingBuilder, ContextualNeeds, Implementation, TaggedServices};
pub use error::{ContainerError, Result};
pub use key::Abstract;
pub use provider::{ProviderRepository, ServiceProvider};
pub use registry::BindingInfo;
pub use resolver::{Parameters, Resolver};

// Re-export for convenience
pub use std::sync::Arc;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        Abstract, Arguments, Concrete, Constructible, Container, ContainerError, Dependency,
        Injectable, Instance, Parameters, Resolver, Result, ServiceProvider, TypeDescriptor,
    };
    pub use std::sync::Arc;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::thread;
    use std::time::Duration;

    struct Logger {
        channel: &'static str,
    }

    struct Consumer {
        logger: Arc<Logger>,
    }

    impl Constructible for Consumer {
        fn dependencies() -> Vec<Dependency> {
            vec![Dependency::new("logger", "Logger")]
        }

        fn construct(args: &Arguments) -> Result<Self> {
            Ok(Consumer {
                logger: args.get("logger")?,
            })
        }
    }

    fn counting(calls: &Arc<AtomicU32>) -> Concrete {
        let calls = Arc::clone(calls);
        Concrete::factory(move |_| Ok(calls.fetch_add(1, Ordering::SeqCst)))
    }

    #[test]
    fn test_shared_binding_returns_identical_instance() {
        let calls = Arc::new(AtomicU32::new(0));
        let container = Container::new();
        container.bind("A", counting(&calls), true).unwrap();

        let first = container.make("A").unwrap();
        let second = container.make("A").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_transient_binding_returns_distinct_instances() {
        let calls = Arc::new(AtomicU32::new(0));
        let container = Container::new();
        container.bind("A", counting(&calls), false).unwrap();

        let first = container.make_as::<u32>("A").unwrap();
        let second = container.make_as::<u32>("A").unwrap();
        assert_ne!(*first, *second);
    }

    #[test]
    fn test_bind_flush_make_is_unbound() {
        let calls = Arc::new(AtomicU32::new(0));
        let container = Container::new();
        container.bind("A", counting(&calls), true).unwrap();
        container.flush();

        assert!(matches!(
            container.make("A").unwrap_err(),
            ContainerError::UnboundAbstract { .. }
        ));
    }

    #[test]
    fn test_self_referential_binding_is_circular() {
        let container = Container::new();
        container
            .bind("A", Concrete::erased(|resolver| resolver.make("A")), false)
            .unwrap();

        let err = container.make("A").unwrap_err();
        assert!(err.is_circular());
        assert_eq!(err.to_string(), "Circular dependency detected: A -> A");
    }

    #[test]
    fn test_alias_follows_binding() {
        let container = Container::new();
        container.instance("db", "sqlite");
        container.alias("db", "database").unwrap();
        container
            .bind("db", Concrete::factory(|_| Ok("postgres")), true)
            .unwrap();

        let via_alias = container.make_as::<&'static str>("database").unwrap();
        let direct = container.make_as::<&'static str>("db").unwrap();
        assert_eq!(*via_alias, "postgres");
        assert!(Arc::ptr_eq(&via_alias, &direct));
    }

    #[test]
    fn test_contextual_binding_scoped_to_consumer() {
        let container = Container::new();
        container
            .singleton("Logger", Concrete::factory(|_| Ok(Logger { channel: "file" })))
            .unwrap();
        container
            .singleton("DebugLogger", Concrete::factory(|_| Ok(Logger { channel: "debug" })))
            .unwrap();
        container
            .bind("Consumer", Concrete::constructible::<Consumer>(), false)
            .unwrap();
        container
            .when("Consumer")
            .needs("Logger")
            .give("DebugLogger")
            .unwrap();

        let consumer = container.make_as::<Consumer>("Consumer").unwrap();
        let debug = container.make_as::<Logger>("DebugLogger").unwrap();
        assert!(Arc::ptr_eq(&consumer.logger, &debug));
        assert_eq!(container.make_as::<Logger>("Logger").unwrap().channel, "file");
    }

    #[test]
    fn test_contextual_binding_applies_to_built_types() {
        let container = Container::new();
        container.instance("Logger", Logger { channel: "file" });
        container
            .when(Abstract::of::<Consumer>())
            .needs("Logger")
            .give(Concrete::instance(Logger { channel: "built" }))
            .unwrap();

        let consumer = container.build::<Consumer>().unwrap();
        assert_eq!(consumer.logger.channel, "built");
    }

    #[test]
    fn test_concurrent_first_make_constructs_once() {
        const THREADS: usize = 32;

        let calls = Arc::new(AtomicU32::new(0));
        let container = Container::new();
        let counter = Arc::clone(&calls);
        container
            .singleton(
                "slow",
                Concrete::factory(move |_| {
                    thread::sleep(Duration::from_millis(10));
                    Ok(counter.fetch_add(1, Ordering::SeqCst))
                }),
            )
            .unwrap();

        let barrier = Arc::new(Barrier::new(THREADS));
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let container = container.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    container.make("slow").unwrap()
                })
            })
            .collect();

        let instances: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(instances.iter().all(|i| Arc::ptr_eq(i, &instances[0])));
    }

    #[test]
    fn test_build_stacks_are_per_call() {
        const ROUNDS: usize = 50;

        let container = Container::new();
        container
            .bind(
                "Formatter",
                Concrete::factory(|_| {
                    thread::sleep(Duration::from_millis(1));
                    Ok("formatter")
                }),
                false,
            )
            .unwrap();
        for report in ["DailyReport", "WeeklyReport"] {
            container
                .bind(
                    report,
                    TypeDescriptor::new(|args: &Arguments| args.get::<&'static str>("formatter").map(|_| ()))
                        .depends_on("formatter", "Formatter"),
                    false,
                )
                .unwrap();
        }

        let barrier = Arc::new(Barrier::new(2));
        let handles: Vec<_> = ["DailyReport", "WeeklyReport"]
            .into_iter()
            .map(|report| {
                let container = container.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    (0..ROUNDS)
                        .map(|_| container.make(report).map(|_| ()))
                        .collect::<Result<Vec<_>>>()
                })
            })
            .collect();

        for handle in handles {
            let outcome = handle.join().unwrap();
            assert!(outcome.is_ok(), "unexpected failure: {:?}", outcome.err());
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_make_from_blocking_tasks() {
        let calls = Arc::new(AtomicU32::new(0));
        let container = Container::new();
        container.singleton("slow", counting(&calls)).unwrap();

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let container = container.clone();
                tokio::task::spawn_blocking(move || container.make_as::<u32>("slow"))
            })
            .collect();

        let mut instances = Vec::new();
        for task in tasks {
            instances.push(task.await.unwrap().unwrap());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(instances.iter().all(|i| Arc::ptr_eq(i, &instances[0])));
    }

    #[test]
    fn test_tagged_returns_members_in_order() {
        let container = Container::new();
        container.instance("A", 'a');
        container.instance("B", 'b');
        container.instance("C", 'c');
        container.tag(["A", "B"], "group").unwrap();

        let members: Vec<char> = container
            .tagged_as::<char>("group")
            .unwrap()
            .into_iter()
            .map(|c| *c)
            .collect();
        assert_eq!(members, ['a', 'b']);
    }

    #[test]
    fn test_nested_failure_surfaces_chain() {
        let container = Container::new();
        container
            .bind("Consumer", Concrete::constructible::<Consumer>(), false)
            .unwrap();
        container
            .bind("App", TypeDescriptor::new(|args: &Arguments| {
                args.get::<Consumer>("consumer").map(|_| ())
            })
            .depends_on("consumer", "Consumer"), false)
            .unwrap();

        let err = container.make("App").unwrap_err();
        let trace: Vec<&str> = err.trace().into_iter().map(Abstract::as_str).collect();
        assert_eq!(trace, ["App", "Consumer"]);
        assert!(err.is_unbound());
    }
}
