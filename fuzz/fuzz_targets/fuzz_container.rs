#![no_main]

//! Fuzz target for registry operations
//!
//! Builds random binding graphs (including cycles) over a small key space and
//! checks that resolution always terminates with a consistent answer.

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use service_container::{Arguments, Container, ContainerError, Dependency, TypeDescriptor};
use std::sync::Arc;

const NAMES: [&str; 6] = ["a", "b", "c", "d", "e", "f"];
const TAGS: [&str; 2] = ["group", "other"];

fn name(index: u8) -> &'static str {
    NAMES[index as usize % NAMES.len()]
}

fn tag(index: u8) -> &'static str {
    TAGS[index as usize % TAGS.len()]
}

#[derive(Debug)]
struct Node {
    _children: usize,
}

/// Operations to perform on the container
#[derive(Debug, Arbitrary)]
enum ContainerOp {
    Bind { name: u8, deps: Vec<u8>, shared: bool },
    Instance { name: u8, value: u32 },
    Alias { target: u8, alias: u8 },
    Tag { names: Vec<u8>, tag: u8 },
    Give { consumer: u8, needs: u8, target: u8 },
    GiveTagged { consumer: u8, needs: u8, tag: u8 },
    Make { name: u8 },
    Tagged { tag: u8 },
    ForgetInstance { name: u8 },
    ForgetInstances,
    Flush,
    Snapshot,
}

fn descriptor(deps: &[u8]) -> TypeDescriptor {
    let mut seen = Vec::new();
    for &dep in deps.iter().take(3) {
        if !seen.contains(&name(dep)) {
            seen.push(name(dep));
        }
    }
    let count = seen.len();
    TypeDescriptor::new(move |args: &Arguments| {
        assert_eq!(args.len(), count);
        Ok(Node { _children: count })
    })
    .with_dependencies(seen.into_iter().map(Dependency::on))
}

fn check_make(container: &Container, target: &'static str) {
    let bound = container.bound(target);
    match container.make(target) {
        Ok(first) => {
            assert!(bound);
            if container.is_shared(target) {
                let second = container.make(target).expect("shared binding resolved once");
                assert!(Arc::ptr_eq(&first, &second));
            }
        }
        Err(ContainerError::UnboundAbstract { .. }) => assert!(!bound),
        Err(ContainerError::CircularDependency { path }) => {
            let (last, rest) = path.split_last().expect("cycle path is never empty");
            assert!(rest.contains(last), "cycle path must repeat an abstract: {path:?}");
        }
        Err(_) => assert!(bound),
    }
}

fuzz_target!(|ops: Vec<ContainerOp>| {
    let container = Container::new();

    for op in ops.into_iter().take(200) {
        match op {
            ContainerOp::Bind { name: n, deps, shared } => {
                // Self-dependencies are rejected at bind time.
                let _ = container.bind(name(n), descriptor(&deps), shared);
            }
            ContainerOp::Instance { name: n, value } => {
                container.instance(name(n), value);
                assert!(container.resolved(name(n)));
            }
            ContainerOp::Alias { target, alias } => {
                let _ = container.alias(name(target), name(alias));
            }
            ContainerOp::Tag { names, tag: t } => {
                let names: Vec<&str> = names.into_iter().take(4).map(name).collect();
                let all_bound = names.iter().all(|n| container.bound(*n));
                assert_eq!(container.tag(names, tag(t)).is_ok(), all_bound);
            }
            ContainerOp::Give { consumer, needs, target } => {
                let _ = container
                    .when(name(consumer))
                    .needs(name(needs))
                    .give(name(target));
            }
            ContainerOp::GiveTagged { consumer, needs, tag: t } => {
                let _ = container
                    .when(name(consumer))
                    .needs(name(needs))
                    .give_tagged(tag(t));
            }
            ContainerOp::Make { name: n } => check_make(&container, name(n)),
            ContainerOp::Tagged { tag: t } => {
                let _ = container.tagged(tag(t));
            }
            ContainerOp::ForgetInstance { name: n } => {
                container.forget_instance(name(n));
                if container.bound(name(n)) && container.is_shared(name(n)) {
                    assert!(!container.resolved(name(n)));
                }
            }
            ContainerOp::ForgetInstances => {
                container.forget_instances();
                assert!(container.bindings().iter().all(|info| !info.resolved));
            }
            ContainerOp::Flush => {
                container.flush();
                assert!(container.is_empty());
                assert!(NAMES.iter().all(|n| !container.bound(*n)));
            }
            ContainerOp::Snapshot => {
                assert_eq!(container.bindings().len(), container.len());
            }
        }
    }
});
