//! Resolution engine
//!
//! A [`Resolver`] carries the state of one resolution call tree: the build
//! stack used for cycle detection and contextual lookups, and the caller
//! parameters of each frame. It lives on the caller's stack, never on the
//! container, so concurrent `make` calls cannot see each other's frames.
//!
//! Factories receive `&mut Resolver` and must resolve nested services through
//! it rather than through the container, otherwise the nested call starts a
//! fresh stack and cycles go undetected.

use crate::concrete::Arguments;
use crate::contextual::{Implementation, TaggedServices};
use crate::registry::Binding;
use crate::{
    Abstract, Concrete, Container, ContainerError, Dependency, Injectable, Instance, Result,
    TypeDescriptor, downcast,
};
use ahash::RandomState;
use std::collections::HashMap;
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::{debug, trace};

// =============================================================================
// Parameters
// =============================================================================

/// Caller-supplied named values for `make_with`.
///
/// They are visible to the frame being built only: factories read them with
/// [`Resolver::parameter`], and type descriptors use them in place of
/// container resolution for dependencies with a matching name.
///
/// # Examples
///
/// ```rust
/// use service_container::{Concrete, Container, Parameters};
///
/// struct Repository { table: String }
///
/// let container = Container::new();
/// container
///     .bind(
///         "repository",
///         Concrete::factory(|resolver| {
///             let table = resolver.parameter::<String>("table");
///             Ok(Repository { table: table.map(|t| (*t).clone()).unwrap_or_default() })
///         }),
///         false,
///     )
///     .unwrap();
///
/// let repo = container
///     .make_with_as::<Repository>("repository", Parameters::new().with("table", String::from("users")))
///     .unwrap();
/// assert_eq!(repo.table, "users");
/// ```
#[derive(Clone, Default)]
pub struct Parameters {
    values: HashMap<String, Instance, RandomState>,
}

impl Parameters {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a named value.
    pub fn with<T: Injectable>(mut self, name: impl Into<String>, value: T) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert<T: Injectable>(&mut self, name: impl Into<String>, value: T) {
        self.values.insert(name.into(), Arc::new(value));
    }

    /// Add an already-erased value.
    pub fn insert_instance(&mut self, name: impl Into<String>, value: Instance) {
        self.values.insert(name.into(), value);
    }

    #[inline]
    pub fn raw(&self, name: &str) -> Option<&Instance> {
        self.values.get(name)
    }

    /// Typed value; `None` if absent or of another type.
    pub fn get<T: Injectable>(&self, name: &str) -> Option<Arc<T>> {
        self.raw(name)
            .and_then(|value| Arc::clone(value).downcast::<T>().ok())
    }

    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl std::fmt::Debug for Parameters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.values.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("Parameters").field("names", &names).finish()
    }
}

// =============================================================================
// Resolver
// =============================================================================

/// One entry of the build stack.
struct Frame {
    abstract_: Abstract,
    parameters: Parameters,
}

/// Per-call resolution state handed to factories and extenders.
pub struct Resolver<'c> {
    container: &'c Container,
    frames: Vec<Frame>,
}

impl<'c> Resolver<'c> {
    pub(crate) fn new(container: &'c Container) -> Self {
        Self {
            container,
            frames: Vec::new(),
        }
    }

    /// The container this call resolves against.
    #[inline]
    pub fn container(&self) -> &'c Container {
        self.container
    }

    /// Resolve a nested service as part of the current construction.
    #[inline]
    pub fn make(&mut self, abstract_: impl Into<Abstract>) -> Result<Instance> {
        self.resolve(abstract_.into(), Parameters::default())
    }

    /// Resolve a nested service with its own parameters.
    #[inline]
    pub fn make_with(
        &mut self,
        abstract_: impl Into<Abstract>,
        parameters: Parameters,
    ) -> Result<Instance> {
        self.resolve(abstract_.into(), parameters)
    }

    /// Typed [`make`](Self::make).
    pub fn make_as<T: Injectable>(&mut self, abstract_: impl Into<Abstract>) -> Result<Arc<T>> {
        let abstract_ = abstract_.into();
        let instance = self.resolve(abstract_.clone(), Parameters::default())?;
        downcast(instance, &abstract_)
    }

    /// Every service tagged `tag`, in tagging order. The first failure aborts.
    pub fn tagged(&mut self, tag: &str) -> Result<Vec<Instance>> {
        let members = self.container.registry().tagged(tag);
        members
            .into_iter()
            .map(|member| self.resolve_inner(member, Parameters::default(), false))
            .collect()
    }

    /// Typed parameter of the frame being built.
    pub fn parameter<T: Injectable>(&self, name: &str) -> Option<Arc<T>> {
        self.parameters().and_then(|parameters| parameters.get(name))
    }

    /// Parameters of the frame being built.
    #[inline]
    pub fn parameters(&self) -> Option<&Parameters> {
        self.frames.last().map(|frame| &frame.parameters)
    }

    /// The abstract currently under construction.
    #[inline]
    pub fn consumer(&self) -> Option<&Abstract> {
        self.frames.last().map(|frame| &frame.abstract_)
    }

    /// Abstracts under construction, outermost first.
    pub fn build_stack(&self) -> Vec<Abstract> {
        self.frames.iter().map(|frame| frame.abstract_.clone()).collect()
    }

    #[inline]
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    // =========================================================================
    // Resolution algorithm
    // =========================================================================

    #[inline]
    pub(crate) fn resolve(&mut self, requested: Abstract, parameters: Parameters) -> Result<Instance> {
        self.resolve_inner(requested, parameters, true)
    }

    fn resolve_inner(
        &mut self,
        requested: Abstract,
        parameters: Parameters,
        contextual: bool,
    ) -> Result<Instance> {
        let (canonical, implementation, binding) = {
            let registry = self.container.registry();
            let canonical = registry.canonical(&requested);
            let implementation = match self.consumer() {
                Some(consumer) if contextual => registry.contextual(consumer, &requested, &canonical),
                _ => None,
            };
            let binding = registry.binding(&canonical);
            (canonical, implementation, binding)
        };

        if let Some(implementation) = implementation {
            return self.resolve_contextual(canonical, implementation, parameters);
        }

        // A provider still indexed may have registered without booting; the
        // load finishes it, or waits for the thread that is.
        let binding = match binding {
            Some(binding) if !self.container.deferred().contains(&canonical) => binding,
            _ => self
                .container
                .load_deferred(&canonical)?
                .ok_or_else(|| ContainerError::unbound(&requested))?,
        };

        // Parameterised builds are call-specific: never served from or
        // written to the shared cache.
        let cacheable = binding.is_shared() && parameters.is_empty();

        if cacheable {
            if let Some(instance) = binding.cached() {
                #[cfg(feature = "logging")]
                trace!(
                    target: "service_container",
                    service = canonical.as_str(),
                    "Resolved shared instance from cache"
                );
                return Ok(instance);
            }
        }

        self.enter(canonical.clone(), parameters)?;
        let result = if cacheable {
            self.produce_shared(&canonical, &binding)
        } else {
            self.produce(&canonical, binding.concrete())
        };
        self.exit();
        result
    }

    fn produce_shared(&mut self, canonical: &Abstract, binding: &Arc<Binding>) -> Result<Instance> {
        binding.get_or_try_init(|| {
            #[cfg(feature = "logging")]
            trace!(
                target: "service_container",
                service = canonical.as_str(),
                "Constructing shared instance"
            );

            self.produce(canonical, binding.concrete())
        })
    }

    fn resolve_contextual(
        &mut self,
        needed: Abstract,
        implementation: Implementation,
        parameters: Parameters,
    ) -> Result<Instance> {
        #[cfg(feature = "logging")]
        trace!(
            target: "service_container",
            consumer = self.consumer().map(Abstract::as_str),
            needs = needed.as_str(),
            "Applying contextual binding"
        );

        match implementation {
            Implementation::Abstract(target) => self.resolve_inner(target, parameters, false),
            Implementation::Concrete(concrete) => {
                self.enter(needed.clone(), parameters)?;
                let result = self.produce(&needed, &concrete);
                self.exit();
                result
            }
            Implementation::Tagged(tag) => {
                let services = self.tagged(&tag)?;
                Ok(Arc::new(TaggedServices::new(tag, services)))
            }
            Implementation::Config(key) => {
                let config = self.container.registry().config();
                let Some(target) = config.and_then(|config| config.get(&key)) else {
                    return Err(ContainerError::MissingConfig { key });
                };
                self.resolve_inner(Abstract::from(target), parameters, false)
            }
        }
    }

    /// Push a frame, failing if the abstract is already being built.
    fn enter(&mut self, abstract_: Abstract, parameters: Parameters) -> Result<()> {
        if self.frames.iter().any(|frame| frame.abstract_ == abstract_) {
            let mut path = self.build_stack();
            path.push(abstract_);

            #[cfg(feature = "logging")]
            debug!(
                target: "service_container",
                path = ?path,
                "Circular dependency detected"
            );

            return Err(ContainerError::CircularDependency { path });
        }
        self.frames.push(Frame {
            abstract_,
            parameters,
        });
        Ok(())
    }

    #[inline]
    fn exit(&mut self) {
        self.frames.pop();
    }

    /// Run the producer, then the extenders.
    fn produce(&mut self, canonical: &Abstract, concrete: &Concrete) -> Result<Instance> {
        let instance = match concrete {
            Concrete::Factory(factory) => (factory)(self)
                .map_err(|err| ContainerError::construction(canonical, None, err))?,
            Concrete::Type(descriptor) => self.construct(canonical, descriptor)?,
            Concrete::Instance(instance) => Arc::clone(instance),
        };
        self.apply_extenders(canonical, instance)
    }

    fn apply_extenders(&mut self, canonical: &Abstract, instance: Instance) -> Result<Instance> {
        let extenders = self.container.registry().extenders(canonical);
        extenders.into_iter().try_fold(instance, |instance, extender| {
            (extender)(instance, self)
                .map_err(|err| ContainerError::construction(canonical, None, err))
        })
    }

    fn construct(&mut self, canonical: &Abstract, descriptor: &TypeDescriptor) -> Result<Instance> {
        let args = self.resolve_arguments(canonical, descriptor.dependencies())?;
        descriptor
            .construct(&args)
            .map_err(|err| ContainerError::construction(canonical, None, err))
    }

    /// Resolve `dependencies` in declaration order for the frame `owner`.
    /// Frame parameters win over container resolution by name.
    fn resolve_arguments(
        &mut self,
        owner: &Abstract,
        dependencies: &[Dependency],
    ) -> Result<Arguments> {
        let mut args = Arguments::with_capacity(dependencies.len());
        for dependency in dependencies {
            let supplied = self
                .parameters()
                .and_then(|parameters| parameters.raw(dependency.name()))
                .cloned();
            let value = match supplied {
                Some(value) => value,
                None => self
                    .resolve(dependency.abstract_().clone(), Parameters::default())
                    .map_err(|err| {
                        ContainerError::construction(owner, Some(dependency.name()), err)
                    })?,
            };
            args.push(dependency, value);
        }
        Ok(args)
    }

    /// Construct an unbound descriptor under the frame `abstract_`.
    pub(crate) fn build(
        &mut self,
        abstract_: Abstract,
        descriptor: &TypeDescriptor,
        parameters: Parameters,
    ) -> Result<Instance> {
        self.enter(abstract_.clone(), parameters)?;
        let result = self.construct(&abstract_, descriptor);
        self.exit();
        result
    }

    /// Resolve an ad-hoc dependency list under the frame `abstract_` and hand
    /// the arguments to `f`.
    pub(crate) fn call<R, F>(
        &mut self,
        abstract_: Abstract,
        dependencies: &[Dependency],
        parameters: Parameters,
        f: F,
    ) -> Result<R>
    where
        F: FnOnce(&Arguments) -> Result<R>,
    {
        self.enter(abstract_.clone(), parameters)?;
        let result = self
            .resolve_arguments(&abstract_, dependencies)
            .and_then(|args| f(&args));
        self.exit();
        result
    }
}

impl std::fmt::Debug for Resolver<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("build_stack", &self.build_stack())
            .finish()
    }
}
