//! Service container
//!
//! The `Container` owns every binding table and exposes registration,
//! resolution and lifecycle operations. Resolution itself is delegated to a
//! per-call [`Resolver`].

use crate::concrete::ExtenderFn;
use crate::contextual::ContextualBindingBuilder;
use crate::provider::{DeferredProviders, ServiceProvider};
use crate::registry::{Binding, BindingInfo, Registry};
use crate::{
    Abstract, Arguments, Concrete, ConfigSource, Constructible, ContainerError, Dependency,
    Injectable, Instance, Parameters, Resolver, Result, TypeDescriptor, downcast,
};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::debug;

/// Dependency injection container.
///
/// Cloning is cheap and every clone shares the same bindings, so the
/// container is passed around explicitly rather than kept in a global.
///
/// # Concurrency
///
/// One reader/writer lock guards the binding, alias, contextual, tag and
/// extender tables. It is released before any factory, constructor, extender
/// or provider runs, so those may freely register or resolve.
///
/// The first resolution of a shared binding is single-flight: concurrent
/// callers wait for the one running factory and all receive the same
/// instance. A slow factory therefore blocks every other first caller of
/// that binding. A dependency cycle split across two threads, each holding
/// one half of it, blocks instead of reporting `CircularDependency`; cycles
/// within one call tree are always reported.
///
/// # Examples
///
/// ```rust
/// use service_container::{Concrete, Container};
///
/// struct Database { url: String }
///
/// let container = Container::new();
/// container
///     .singleton("db", Concrete::factory(|_| Ok(Database { url: "postgres://localhost".into() })))
///     .unwrap();
///
/// let db = container.make_as::<Database>("db").unwrap();
/// assert_eq!(db.url, "postgres://localhost");
/// assert!(container.resolved("db"));
/// ```
#[derive(Clone)]
pub struct Container {
    registry: Arc<RwLock<Registry>>,
    deferred: Arc<DeferredProviders>,
}

impl Container {
    /// Create an empty container.
    #[inline]
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Create a container with room for `capacity` bindings.
    pub fn with_capacity(capacity: usize) -> Self {
        #[cfg(feature = "logging")]
        debug!(target: "service_container", capacity, "Creating service container");

        Self {
            registry: Arc::new(RwLock::new(Registry::with_capacity(capacity))),
            deferred: Arc::new(DeferredProviders::new()),
        }
    }

    #[inline]
    pub(crate) fn registry(&self) -> RwLockReadGuard<'_, Registry> {
        self.registry.read()
    }

    #[inline]
    pub(crate) fn registry_mut(&self) -> RwLockWriteGuard<'_, Registry> {
        self.registry.write()
    }

    #[inline]
    pub(crate) fn deferred(&self) -> &DeferredProviders {
        &self.deferred
    }

    #[inline]
    pub(crate) fn resolver(&self) -> Resolver<'_> {
        Resolver::new(self)
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Register `concrete` under `abstract_`, replacing any previous binding
    /// and its cached instance.
    ///
    /// `shared` bindings build once and hand out the same instance; others
    /// build on every resolution.
    pub fn bind(
        &self,
        abstract_: impl Into<Abstract>,
        concrete: impl Into<Concrete>,
        shared: bool,
    ) -> Result<()> {
        let (abstract_, binding) = Self::validated(abstract_.into(), concrete.into(), shared)?;

        #[cfg(feature = "logging")]
        Self::log_binding(&abstract_, &binding);

        self.registry_mut().insert(abstract_, binding);
        Ok(())
    }

    /// [`bind`](Self::bind) unless `abstract_` is already bound.
    ///
    /// The check and the insert happen under one lock, so of several
    /// concurrent calls exactly one registers.
    pub fn bind_if(
        &self,
        abstract_: impl Into<Abstract>,
        concrete: impl Into<Concrete>,
        shared: bool,
    ) -> Result<()> {
        let (abstract_, binding) = Self::validated(abstract_.into(), concrete.into(), shared)?;

        let mut registry = self.registry_mut();
        let canonical = registry.canonical(&abstract_);
        if !registry.contains(&canonical) {
            #[cfg(feature = "logging")]
            Self::log_binding(&abstract_, &binding);

            registry.insert(abstract_, binding);
        }
        Ok(())
    }

    fn validated(abstract_: Abstract, concrete: Concrete, shared: bool) -> Result<(Abstract, Binding)> {
        if abstract_.is_empty() {
            return Err(ContainerError::invalid_concrete(&abstract_, "abstract is empty"));
        }
        concrete.validate(&abstract_)?;
        Ok((abstract_, Binding::new(concrete, shared)))
    }

    #[cfg(feature = "logging")]
    fn log_binding(abstract_: &Abstract, binding: &Binding) {
        debug!(
            target: "service_container",
            service = abstract_.as_str(),
            kind = %binding.concrete().kind(),
            shared = binding.is_shared(),
            "Registering binding"
        );
    }

    /// Register a shared binding.
    #[inline]
    pub fn singleton(
        &self,
        abstract_: impl Into<Abstract>,
        concrete: impl Into<Concrete>,
    ) -> Result<()> {
        self.bind(abstract_, concrete, true)
    }

    /// Register an already-built value as a resolved shared binding.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use service_container::Container;
    ///
    /// let container = Container::new();
    /// container.instance("app.name", String::from("demo"));
    /// assert_eq!(*container.make_as::<String>("app.name").unwrap(), "demo");
    /// ```
    #[inline]
    pub fn instance<T: Injectable>(&self, abstract_: impl Into<Abstract>, value: T) {
        self.instance_arc(abstract_, Arc::new(value));
    }

    /// [`instance`](Self::instance) for a value that is already shared.
    pub fn instance_arc<T: Injectable>(&self, abstract_: impl Into<Abstract>, value: Arc<T>) {
        let abstract_ = abstract_.into();
        let value: Instance = value;

        #[cfg(feature = "logging")]
        debug!(
            target: "service_container",
            service = abstract_.as_str(),
            "Registering instance"
        );

        self.registry_mut().insert(
            abstract_,
            Binding::resolved(Concrete::Instance(Arc::clone(&value)), value),
        );
    }

    /// Make `alias` another name for `abstract_`.
    ///
    /// Aliases point at the canonical abstract, so an alias of an alias
    /// shares the same binding and shared instance.
    pub fn alias(&self, abstract_: impl Into<Abstract>, alias: impl Into<Abstract>) -> Result<()> {
        let abstract_ = abstract_.into();
        let alias = alias.into();

        let mut registry = self.registry_mut();
        let canonical = registry.canonical(&abstract_);

        if alias == canonical || alias == abstract_ {
            return Err(ContainerError::SelfAlias { abstract_: alias });
        }
        if !registry.contains(&canonical) && !self.deferred.contains(&canonical) {
            return Err(ContainerError::unknown(&abstract_));
        }

        #[cfg(feature = "logging")]
        debug!(
            target: "service_container",
            service = canonical.as_str(),
            alias = alias.as_str(),
            "Registering alias"
        );

        registry.insert_alias(alias, canonical);
        Ok(())
    }

    /// Add every abstract to `tag`. Nothing is tagged unless all are bound.
    pub fn tag<I, A>(&self, abstracts: I, tag: &str) -> Result<()>
    where
        I: IntoIterator<Item = A>,
        A: Into<Abstract>,
    {
        let abstracts: Vec<Abstract> = abstracts.into_iter().map(Into::into).collect();

        let mut registry = self.registry_mut();
        if let Some(unknown) = abstracts.iter().find(|abstract_| {
            let canonical = registry.canonical(abstract_);
            !registry.contains(&canonical) && !self.deferred.contains(&canonical)
        }) {
            return Err(ContainerError::unknown(unknown));
        }

        #[cfg(feature = "logging")]
        debug!(
            target: "service_container",
            tag,
            services = abstracts.len(),
            "Tagging services"
        );

        registry.insert_tag(tag, abstracts);
        Ok(())
    }

    /// Resolve every service tagged `tag`, in tagging order.
    ///
    /// The first failure aborts the call. An unknown tag yields an empty list.
    #[inline]
    pub fn tagged(&self, tag: &str) -> Result<Vec<Instance>> {
        self.resolver().tagged(tag)
    }

    /// Typed [`tagged`](Self::tagged); every member must be a `T`.
    pub fn tagged_as<T: Injectable>(&self, tag: &str) -> Result<Vec<Arc<T>>> {
        let tag_key = Abstract::from(tag);
        self.tagged(tag)?
            .into_iter()
            .map(|instance| downcast(instance, &tag_key))
            .collect()
    }

    /// Start a contextual binding for `consumer`.
    ///
    /// See the [`contextual`](crate::contextual) module.
    #[inline]
    pub fn when(&self, consumer: impl Into<Abstract>) -> ContextualBindingBuilder<'_> {
        ContextualBindingBuilder::new(self, consumer.into())
    }

    // =========================================================================
    // Resolution
    // =========================================================================

    /// Resolve `abstract_`.
    #[inline]
    pub fn make(&self, abstract_: impl Into<Abstract>) -> Result<Instance> {
        self.resolver().resolve(abstract_.into(), Parameters::default())
    }

    /// Resolve `abstract_` and downcast to `T`.
    pub fn make_as<T: Injectable>(&self, abstract_: impl Into<Abstract>) -> Result<Arc<T>> {
        let abstract_ = abstract_.into();
        let instance = self.make(abstract_.clone())?;
        downcast(instance, &abstract_)
    }

    /// Resolve with caller parameters for the outermost frame.
    ///
    /// A non-empty parameter set always builds a fresh instance, even for
    /// shared bindings, and never writes the shared cache.
    #[inline]
    pub fn make_with(
        &self,
        abstract_: impl Into<Abstract>,
        parameters: Parameters,
    ) -> Result<Instance> {
        self.resolver().resolve(abstract_.into(), parameters)
    }

    /// Typed [`make_with`](Self::make_with).
    pub fn make_with_as<T: Injectable>(
        &self,
        abstract_: impl Into<Abstract>,
        parameters: Parameters,
    ) -> Result<Arc<T>> {
        let abstract_ = abstract_.into();
        let instance = self.make_with(abstract_.clone(), parameters)?;
        downcast(instance, &abstract_)
    }

    /// [`make`](Self::make), panicking on failure.
    ///
    /// # Panics
    ///
    /// If resolution fails.
    pub fn must_make(&self, abstract_: impl Into<Abstract>) -> Instance {
        let abstract_ = abstract_.into();
        match self.make(abstract_.clone()) {
            Ok(instance) => instance,
            Err(err) => panic!("Failed to resolve [{abstract_}]: {err}"),
        }
    }

    /// [`make_as`](Self::make_as), panicking on failure.
    ///
    /// # Panics
    ///
    /// If resolution fails or the instance is not a `T`.
    pub fn must_make_as<T: Injectable>(&self, abstract_: impl Into<Abstract>) -> Arc<T> {
        let abstract_ = abstract_.into();
        match self.make_as(abstract_.clone()) {
            Ok(instance) => instance,
            Err(err) => panic!("Failed to resolve [{abstract_}]: {err}"),
        }
    }

    /// Construct an unbound `T` from its declared dependencies.
    ///
    /// The frame is `Abstract::of::<T>()`, so contextual bindings registered
    /// for that key apply.
    pub fn build<T: Constructible>(&self) -> Result<Arc<T>> {
        let abstract_ = Abstract::of::<T>();
        let instance = self.resolver().build(
            abstract_.clone(),
            &TypeDescriptor::of::<T>(),
            Parameters::default(),
        )?;
        downcast(instance, &abstract_)
    }

    /// Construct from a runtime descriptor without binding it.
    pub fn build_descriptor(
        &self,
        descriptor: &TypeDescriptor,
        parameters: Parameters,
    ) -> Result<Instance> {
        let abstract_ = Abstract::new(descriptor.type_name());
        self.resolver().build(abstract_, descriptor, parameters)
    }

    /// Resolve `dependencies` and pass them to `f`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use service_container::{Arguments, Container, Dependency, Parameters};
    ///
    /// let container = Container::new();
    /// container.instance("greeting", String::from("hello"));
    ///
    /// let shout = container
    ///     .call(&[Dependency::on("greeting")], Parameters::new(), |args: &Arguments| {
    ///         Ok(args.get::<String>("greeting")?.to_uppercase())
    ///     })
    ///     .unwrap();
    /// assert_eq!(shout, "HELLO");
    /// ```
    pub fn call<R, F>(&self, dependencies: &[Dependency], parameters: Parameters, f: F) -> Result<R>
    where
        F: FnOnce(&Arguments) -> Result<R>,
    {
        let frame = Abstract::new(std::any::type_name::<F>());
        self.resolver().call(frame, dependencies, parameters, f)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// True if `abstract_` (or the binding it aliases) is registered.
    pub fn bound(&self, abstract_: impl Into<Abstract>) -> bool {
        let registry = self.registry();
        let canonical = registry.canonical(&abstract_.into());
        registry.contains(&canonical)
    }

    /// True if `abstract_` is shared and its instance has been built.
    pub fn resolved(&self, abstract_: impl Into<Abstract>) -> bool {
        let registry = self.registry();
        let canonical = registry.canonical(&abstract_.into());
        registry
            .binding(&canonical)
            .is_some_and(|binding| binding.is_resolved())
    }

    /// True if `abstract_` is bound as shared.
    pub fn is_shared(&self, abstract_: impl Into<Abstract>) -> bool {
        let registry = self.registry();
        let canonical = registry.canonical(&abstract_.into());
        registry
            .binding(&canonical)
            .is_some_and(|binding| binding.is_shared())
    }

    /// True if a deferred provider that has not loaded yet provides
    /// `abstract_`.
    pub fn is_deferred(&self, abstract_: impl Into<Abstract>) -> bool {
        let canonical = self.registry().canonical(&abstract_.into());
        self.deferred.contains(&canonical)
    }

    /// Snapshot of every binding, sorted by abstract.
    #[inline]
    pub fn bindings(&self) -> Vec<BindingInfo> {
        self.registry().snapshot()
    }

    /// Number of bindings.
    #[inline]
    pub fn len(&self) -> usize {
        self.registry().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // =========================================================================
    // Extenders
    // =========================================================================

    /// Decorate every instance produced for `abstract_`.
    ///
    /// Extenders run in registration order after the producer and before the
    /// shared cache is written. If the binding is shared and already resolved,
    /// `extender` runs once on the cached instance and replaces it instead of
    /// being stored.
    ///
    /// An extender registered while the first shared construction is already
    /// running its extenders is stored but misses that instance. It applies
    /// from the next build, e.g. after [`forget_instance`](Self::forget_instance).
    ///
    /// # Examples
    ///
    /// ```rust
    /// use service_container::{Concrete, Container, instance};
    ///
    /// let container = Container::new();
    /// container.bind("greeting", Concrete::factory(|_| Ok(String::from("hello"))), false).unwrap();
    /// container
    ///     .extend("greeting", |greeting, _| {
    ///         let greeting = greeting.downcast::<String>().unwrap();
    ///         Ok(instance(format!("{greeting}, world")))
    ///     })
    ///     .unwrap();
    ///
    /// assert_eq!(*container.make_as::<String>("greeting").unwrap(), "hello, world");
    /// ```
    pub fn extend<F>(&self, abstract_: impl Into<Abstract>, extender: F) -> Result<()>
    where
        F: Fn(Instance, &mut Resolver<'_>) -> Result<Instance> + Send + Sync + 'static,
    {
        let abstract_ = abstract_.into();
        let extender: ExtenderFn = Arc::new(extender);

        loop {
            let (canonical, binding) = {
                let registry = self.registry();
                let canonical = registry.canonical(&abstract_);
                let binding = registry.binding(&canonical);
                (canonical, binding)
            };
            let binding = binding.ok_or_else(|| ContainerError::unknown(&abstract_))?;

            if let Some(cached) = binding.cached() {
                let extended = (extender)(cached, &mut self.resolver())
                    .map_err(|err| ContainerError::construction(&canonical, None, err))?;
                let replacement = Binding::resolved(binding.concrete().clone(), extended);
                if self
                    .registry_mut()
                    .replace_if_current(&canonical, &binding, replacement)
                {
                    #[cfg(feature = "logging")]
                    debug!(
                        target: "service_container",
                        service = canonical.as_str(),
                        "Extended resolved instance"
                    );
                    return Ok(());
                }
                // Rebound concurrently: start over against the new binding.
                continue;
            }

            let mut registry = self.registry_mut();
            if registry
                .binding(&canonical)
                .is_some_and(|current| current.is_resolved())
            {
                continue;
            }

            #[cfg(feature = "logging")]
            debug!(
                target: "service_container",
                service = canonical.as_str(),
                "Registering extender"
            );

            registry.push_extender(canonical, Arc::clone(&extender));
            return Ok(());
        }
    }

    /// Typed [`extend`](Self::extend).
    pub fn extend_as<T, U, F>(&self, abstract_: impl Into<Abstract>, extender: F) -> Result<()>
    where
        T: Injectable,
        U: Injectable,
        F: Fn(Arc<T>, &mut Resolver<'_>) -> Result<U> + Send + Sync + 'static,
    {
        let abstract_ = abstract_.into();
        let key = abstract_.clone();
        self.extend(abstract_, move |instance, resolver| {
            let typed = downcast::<T>(instance, &key)?;
            extender(typed, resolver).map(|value| Arc::new(value) as Instance)
        })
    }

    /// Drop the stored extenders of `abstract_`.
    pub fn forget_extenders(&self, abstract_: impl Into<Abstract>) {
        let mut registry = self.registry_mut();
        let canonical = registry.canonical(&abstract_.into());
        registry.remove_extenders(&canonical);
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Drop the cached instance of `abstract_`, keeping its binding.
    ///
    /// Bindings registered with [`instance`](Self::instance) have nothing to
    /// rebuild from and are removed. Returns false if nothing was cached.
    pub fn forget_instance(&self, abstract_: impl Into<Abstract>) -> bool {
        let mut registry = self.registry_mut();
        let canonical = registry.canonical(&abstract_.into());

        let Some(binding) = registry.binding(&canonical) else {
            return false;
        };
        if !binding.is_resolved() {
            return false;
        }

        if matches!(binding.concrete(), Concrete::Instance(_)) {
            registry.remove(&canonical);
        } else {
            registry.replace_if_current(&canonical, &binding, binding.fresh());
        }

        #[cfg(feature = "logging")]
        debug!(
            target: "service_container",
            service = canonical.as_str(),
            "Forgot shared instance"
        );

        true
    }

    /// Drop every cached instance. Returns how many were dropped.
    pub fn forget_instances(&self) -> usize {
        let forgotten = self.registry_mut().forget_instances();

        #[cfg(feature = "logging")]
        debug!(
            target: "service_container",
            forgotten,
            "Forgot shared instances"
        );

        forgotten
    }

    /// Drop every binding, alias, contextual binding, tag, extender, cached
    /// instance and pending deferred provider. The config source is kept.
    pub fn flush(&self) {
        self.registry_mut().clear();
        self.deferred.clear();

        #[cfg(feature = "logging")]
        debug!(target: "service_container", "Flushed container");
    }

    // =========================================================================
    // Configuration & providers
    // =========================================================================

    /// Install the source `give_config` bindings read from.
    pub fn set_config(&self, config: impl ConfigSource + 'static) {
        self.registry_mut().set_config(Arc::new(config));
    }

    /// Register `provider` lazily: it loads on the first resolution of any
    /// abstract in its [`provides`](ServiceProvider::provides) list.
    pub fn defer(&self, provider: Arc<dyn ServiceProvider>) {
        #[cfg(feature = "logging")]
        debug!(
            target: "service_container",
            provider = provider.name(),
            provides = ?provider.provides(),
            "Deferring service provider"
        );

        self.deferred.insert(provider);
    }

    /// Load the deferred provider for `canonical`, if any, and return the
    /// binding now registered under it.
    ///
    /// The registry is consulted even when no provider was pending: another
    /// thread may have finished loading it since the caller's lookup.
    pub(crate) fn load_deferred(&self, canonical: &Abstract) -> Result<Option<Arc<Binding>>> {
        self.deferred.load(canonical, self)?;
        let registry = self.registry();
        Ok(registry.binding(&registry.canonical(canonical)))
    }
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("bindings", &self.len())
            .field("deferred", &self.deferred.len())
            .finish()
    }
}
