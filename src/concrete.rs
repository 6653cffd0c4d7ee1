//! Concrete producers for bindings
//!
//! A binding maps an [`Abstract`] to a [`Concrete`]: a factory closure, a
//! constructible type with a declared dependency list, or a pre-built
//! instance. The set is closed, so resolution matches exhaustively instead of
//! probing values at runtime.
//!
//! Dependencies are declared at registration time through a
//! [`TypeDescriptor`] (or the [`Constructible`] trait), never discovered by
//! introspection.

use crate::{Abstract, ContainerError, Resolver, Result};
use std::any::Any;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Marker trait for types that can be stored in the container.
///
/// This is automatically implemented for all types that are
/// `Send + Sync + 'static`. You never need to implement this manually.
pub trait Injectable: Send + Sync + 'static {}

impl<T: Send + Sync + 'static> Injectable for T {}

/// A type-erased, shared service instance.
pub type Instance = Arc<dyn Any + Send + Sync>;

/// Wrap a value as an [`Instance`].
#[inline]
pub fn instance<T: Injectable>(value: T) -> Instance {
    Arc::new(value)
}

/// Downcast an instance resolved under `abstract_` to `Arc<T>`.
#[inline]
pub fn downcast<T: Injectable>(instance: Instance, abstract_: &Abstract) -> Result<Arc<T>> {
    instance
        .downcast::<T>()
        .map_err(|_| ContainerError::type_mismatch::<T>(abstract_))
}

/// Type-erased factory function
pub(crate) type FactoryFn =
    Arc<dyn Fn(&mut Resolver<'_>) -> Result<Instance> + Send + Sync + 'static>;

/// Type-erased constructor for a [`TypeDescriptor`]
type ConstructorFn = Arc<dyn Fn(&Arguments) -> Result<Instance> + Send + Sync + 'static>;

/// Post-construction decorator registered with `Container::extend`
pub(crate) type ExtenderFn =
    Arc<dyn Fn(Instance, &mut Resolver<'_>) -> Result<Instance> + Send + Sync + 'static>;

// =============================================================================
// Concrete
// =============================================================================

/// What a binding produces when resolved.
#[derive(Clone)]
pub enum Concrete {
    /// Closure invoked with the resolver of the current call
    Factory(FactoryFn),
    /// Type built from its declared dependencies
    Type(TypeDescriptor),
    /// Pre-built value, handed out as-is
    Instance(Instance),
}

/// Discriminant of a [`Concrete`], for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConcreteKind {
    Factory,
    Type,
    Instance,
}

impl fmt::Display for ConcreteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConcreteKind::Factory => "factory",
            ConcreteKind::Type => "type",
            ConcreteKind::Instance => "instance",
        })
    }
}

impl Concrete {
    /// Factory returning a plain value.
    ///
    /// The factory receives the [`Resolver`] of the ongoing call. Nested
    /// services must be resolved through it so cycle detection and
    /// contextual bindings see the full build stack.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use service_container::{Concrete, Container};
    ///
    /// struct Mailer { host: String }
    ///
    /// let container = Container::new();
    /// container
    ///     .bind("mailer", Concrete::factory(|_| Ok(Mailer { host: "smtp".into() })), false)
    ///     .unwrap();
    ///
    /// let mailer = container.make_as::<Mailer>("mailer").unwrap();
    /// assert_eq!(mailer.host, "smtp");
    /// ```
    pub fn factory<T: Injectable, F>(factory: F) -> Self
    where
        F: Fn(&mut Resolver<'_>) -> Result<T> + Send + Sync + 'static,
    {
        Concrete::Factory(Arc::new(move |resolver: &mut Resolver<'_>| {
            factory(resolver).map(|value| Arc::new(value) as Instance)
        }))
    }

    /// Factory that already returns an erased [`Instance`].
    pub fn erased<F>(factory: F) -> Self
    where
        F: Fn(&mut Resolver<'_>) -> Result<Instance> + Send + Sync + 'static,
    {
        Concrete::Factory(Arc::new(factory))
    }

    /// Pre-built value.
    #[inline]
    pub fn instance<T: Injectable>(value: T) -> Self {
        Concrete::Instance(Arc::new(value))
    }

    /// Pre-built value that is already shared.
    #[inline]
    pub fn from_arc<T: Injectable>(value: Arc<T>) -> Self {
        Concrete::Instance(value)
    }

    /// Type that describes itself through [`Constructible`].
    #[inline]
    pub fn constructible<T: Constructible>() -> Self {
        Concrete::Type(TypeDescriptor::of::<T>())
    }

    /// Which kind of producer this is.
    #[inline]
    pub fn kind(&self) -> ConcreteKind {
        match self {
            Concrete::Factory(_) => ConcreteKind::Factory,
            Concrete::Type(_) => ConcreteKind::Type,
            Concrete::Instance(_) => ConcreteKind::Instance,
        }
    }

    /// Declared dependencies (empty unless this is a type descriptor).
    pub fn dependencies(&self) -> &[Dependency] {
        match self {
            Concrete::Type(descriptor) => descriptor.dependencies(),
            Concrete::Factory(_) | Concrete::Instance(_) => &[],
        }
    }

    /// Bind-time validation.
    pub(crate) fn validate(&self, abstract_: &Abstract) -> Result<()> {
        match self {
            Concrete::Type(descriptor) => descriptor.validate(abstract_),
            Concrete::Factory(_) | Concrete::Instance(_) => Ok(()),
        }
    }
}

impl From<TypeDescriptor> for Concrete {
    fn from(descriptor: TypeDescriptor) -> Self {
        Concrete::Type(descriptor)
    }
}

impl fmt::Debug for Concrete {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Concrete::Factory(_) => f.write_str("Concrete::Factory"),
            Concrete::Type(descriptor) => f.debug_tuple("Concrete::Type").field(descriptor).finish(),
            Concrete::Instance(_) => f.write_str("Concrete::Instance"),
        }
    }
}

// =============================================================================
// Dependencies
// =============================================================================

/// One declared constructor dependency: a parameter name and the abstract
/// that satisfies it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    name: String,
    abstract_: Abstract,
}

impl Dependency {
    /// Parameter `name` satisfied by `abstract_`.
    #[inline]
    pub fn new(name: impl Into<String>, abstract_: impl Into<Abstract>) -> Self {
        Self {
            name: name.into(),
            abstract_: abstract_.into(),
        }
    }

    /// Dependency whose parameter name is the abstract itself.
    #[inline]
    pub fn on(abstract_: impl Into<Abstract>) -> Self {
        let abstract_ = abstract_.into();
        Self {
            name: abstract_.as_str().to_owned(),
            abstract_,
        }
    }

    /// Parameter `name` satisfied by the type token of `T`.
    #[inline]
    pub fn of<T: ?Sized + 'static>(name: impl Into<String>) -> Self {
        Self::new(name, Abstract::of::<T>())
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn abstract_(&self) -> &Abstract {
        &self.abstract_
    }
}

/// Resolved constructor arguments, in declaration order.
#[derive(Default)]
pub struct Arguments {
    entries: Vec<(String, Abstract, Instance)>,
}

impl Arguments {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    pub(crate) fn push(&mut self, dependency: &Dependency, value: Instance) {
        self.entries
            .push((dependency.name.clone(), dependency.abstract_.clone(), value));
    }

    /// Typed argument by parameter name.
    pub fn get<T: Injectable>(&self, name: &str) -> Result<Arc<T>> {
        let (_, abstract_, value) = self
            .entries
            .iter()
            .find(|(candidate, _, _)| candidate == name)
            .ok_or_else(|| ContainerError::MissingArgument {
                name: name.to_owned(),
            })?;
        downcast(Arc::clone(value), abstract_)
    }

    /// Typed argument by position.
    pub fn at<T: Injectable>(&self, index: usize) -> Result<Arc<T>> {
        let (_, abstract_, value) =
            self.entries
                .get(index)
                .ok_or_else(|| ContainerError::MissingArgument {
                    name: format!("#{index}"),
                })?;
        downcast(Arc::clone(value), abstract_)
    }

    /// Erased argument by parameter name.
    pub fn raw(&self, name: &str) -> Option<&Instance> {
        self.entries
            .iter()
            .find(|(candidate, _, _)| candidate == name)
            .map(|(_, _, value)| value)
    }

    /// Parameter names in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _, _)| name.as_str())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for Arguments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

// =============================================================================
// Type descriptors
// =============================================================================

/// A type that declares how to build itself from container services.
///
/// # Examples
///
/// ```rust
/// use service_container::{Arguments, Constructible, Container, Dependency, Result};
/// use std::sync::Arc;
///
/// struct Database { url: String }
///
/// struct UserRepository { db: Arc<Database> }
///
/// impl Constructible for UserRepository {
///     fn dependencies() -> Vec<Dependency> {
///         vec![Dependency::new("db", "database")]
///     }
///
///     fn construct(args: &Arguments) -> Result<Self> {
///         Ok(UserRepository { db: args.get("db")? })
///     }
/// }
///
/// let container = Container::new();
/// container.instance("database", Database { url: "postgres://localhost".into() });
///
/// let repo = container.build::<UserRepository>().unwrap();
/// assert_eq!(repo.db.url, "postgres://localhost");
/// ```
pub trait Constructible: Injectable + Sized {
    /// Dependencies in the order they are resolved.
    fn dependencies() -> Vec<Dependency>;

    /// Build the value from its resolved arguments.
    fn construct(args: &Arguments) -> Result<Self>;
}

/// Runtime description of a constructible type: its ordered dependency list
/// and a constructor taking the resolved [`Arguments`].
#[derive(Clone)]
pub struct TypeDescriptor {
    type_name: &'static str,
    dependencies: Vec<Dependency>,
    constructor: ConstructorFn,
}

impl TypeDescriptor {
    /// Descriptor for `T` with no dependencies yet.
    pub fn new<T: Injectable, F>(constructor: F) -> Self
    where
        F: Fn(&Arguments) -> Result<T> + Send + Sync + 'static,
    {
        Self {
            type_name: std::any::type_name::<T>(),
            dependencies: Vec::new(),
            constructor: Arc::new(move |args: &Arguments| {
                constructor(args).map(|value| Arc::new(value) as Instance)
            }),
        }
    }

    /// Descriptor from a [`Constructible`] implementation.
    pub fn of<T: Constructible>() -> Self {
        Self::new::<T, _>(T::construct).with_dependencies(T::dependencies())
    }

    /// Append a dependency.
    pub fn depends_on(mut self, name: impl Into<String>, abstract_: impl Into<Abstract>) -> Self {
        self.dependencies.push(Dependency::new(name, abstract_));
        self
    }

    /// Append several dependencies.
    pub fn with_dependencies(mut self, dependencies: impl IntoIterator<Item = Dependency>) -> Self {
        self.dependencies.extend(dependencies);
        self
    }

    #[inline]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// The dependency list, in resolution order.
    #[inline]
    pub fn dependencies(&self) -> &[Dependency] {
        &self.dependencies
    }

    #[inline]
    pub(crate) fn construct(&self, args: &Arguments) -> Result<Instance> {
        (self.constructor)(args)
    }

    fn validate(&self, abstract_: &Abstract) -> Result<()> {
        let mut seen = HashSet::with_capacity(self.dependencies.len());
        for dependency in &self.dependencies {
            if dependency.name.is_empty() || dependency.abstract_.is_empty() {
                return Err(ContainerError::invalid_concrete(
                    abstract_,
                    format!("{} declares an unnamed dependency", self.type_name),
                ));
            }
            if !seen.insert(dependency.name.as_str()) {
                return Err(ContainerError::invalid_concrete(
                    abstract_,
                    format!(
                        "{} declares parameter [{}] twice",
                        self.type_name, dependency.name
                    ),
                ));
            }
            if &dependency.abstract_ == abstract_ {
                return Err(ContainerError::invalid_concrete(
                    abstract_,
                    format!("{} depends on the abstract it is bound to", self.type_name),
                ));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("type_name", &self.type_name)
            .field("dependencies", &self.dependencies)
            .finish()
    }
}
