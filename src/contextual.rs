//! Contextual binding
//!
//! `when(consumer).needs(abstract).give(implementation)` overrides what
//! `abstract` resolves to, but only while `consumer` is being constructed.
//! The global binding table is never touched.
//!
//! ```rust
//! use service_container::{Arguments, Concrete, Container, TypeDescriptor};
//! use std::sync::Arc;
//!
//! struct Logger(&'static str);
//! struct Consumer { logger: Arc<Logger> }
//!
//! let container = Container::new();
//! container.singleton("Logger", Concrete::factory(|_| Ok(Logger("file")))).unwrap();
//! container.singleton("DebugLogger", Concrete::factory(|_| Ok(Logger("debug")))).unwrap();
//! container
//!     .bind(
//!         "Consumer",
//!         TypeDescriptor::new(|args: &Arguments| Ok(Consumer { logger: args.get("logger")? }))
//!             .depends_on("logger", "Logger"),
//!         false,
//!     )
//!     .unwrap();
//!
//! container.when("Consumer").needs("Logger").give("DebugLogger").unwrap();
//!
//! let consumer = container.make_as::<Consumer>("Consumer").unwrap();
//! assert_eq!(consumer.logger.0, "debug");
//! assert_eq!(container.make_as::<Logger>("Logger").unwrap().0, "file");
//! ```

use crate::{
    Abstract, Concrete, Container, ContainerError, Injectable, Instance, Result, TypeDescriptor,
    downcast,
};
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::debug;

/// What a contextual binding resolves to.
#[derive(Clone, Debug)]
pub enum Implementation {
    /// Resolve another abstract through the normal path
    Abstract(Abstract),
    /// Run this producer in place of the global binding
    Concrete(Concrete),
    /// Every service carrying the tag, as one [`TaggedServices`] value
    Tagged(String),
    /// Read the abstract to resolve from configuration at resolution time
    Config(String),
}

impl From<&str> for Implementation {
    fn from(abstract_: &str) -> Self {
        Implementation::Abstract(abstract_.into())
    }
}

impl From<String> for Implementation {
    fn from(abstract_: String) -> Self {
        Implementation::Abstract(abstract_.into())
    }
}

impl From<Abstract> for Implementation {
    fn from(abstract_: Abstract) -> Self {
        Implementation::Abstract(abstract_)
    }
}

impl From<Concrete> for Implementation {
    fn from(concrete: Concrete) -> Self {
        Implementation::Concrete(concrete)
    }
}

impl From<TypeDescriptor> for Implementation {
    fn from(descriptor: TypeDescriptor) -> Self {
        Implementation::Concrete(Concrete::Type(descriptor))
    }
}

/// The services behind a tag, in tagging order.
///
/// This is the value handed to a consumer whose dependency was bound with
/// `give_tagged`.
#[derive(Clone, Debug)]
pub struct TaggedServices {
    tag: String,
    services: Vec<Instance>,
}

impl TaggedServices {
    pub(crate) fn new(tag: String, services: Vec<Instance>) -> Self {
        Self { tag, services }
    }

    #[inline]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.services.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Instance> {
        self.services.iter()
    }

    /// Downcast every service to `T`, failing on the first mismatch.
    pub fn downcast_all<T: Injectable>(&self) -> Result<Vec<Arc<T>>> {
        let tag = Abstract::from(self.tag.as_str());
        self.services
            .iter()
            .map(|service| downcast(Arc::clone(service), &tag))
            .collect()
    }
}

/// First step of `container.when(consumer)`.
#[must_use = "call .needs(..) and then .give(..) to register the binding"]
pub struct ContextualBindingBuilder<'a> {
    container: &'a Container,
    consumer: Abstract,
}

impl<'a> ContextualBindingBuilder<'a> {
    pub(crate) fn new(container: &'a Container, consumer: Abstract) -> Self {
        Self {
            container,
            consumer,
        }
    }

    /// The dependency to override for this consumer.
    pub fn needs(self, abstract_: impl Into<Abstract>) -> ContextualNeeds<'a> {
        ContextualNeeds {
            container: self.container,
            consumer: self.consumer,
            needed: abstract_.into(),
        }
    }
}

/// Second step of `container.when(consumer).needs(abstract)`.
#[must_use = "call .give(..) to register the binding"]
pub struct ContextualNeeds<'a> {
    container: &'a Container,
    consumer: Abstract,
    needed: Abstract,
}

impl ContextualNeeds<'_> {
    /// Use `implementation` for the needed abstract. A later registration for
    /// the same consumer and abstract replaces this one.
    pub fn give(self, implementation: impl Into<Implementation>) -> Result<()> {
        let implementation = implementation.into();
        if let Implementation::Concrete(concrete) = &implementation {
            concrete.validate(&self.needed)?;
        }
        self.register(implementation);
        Ok(())
    }

    /// Hand the consumer every service tagged `tag`.
    pub fn give_tagged(self, tag: impl Into<String>) -> Result<()> {
        self.register(Implementation::Tagged(tag.into()));
        Ok(())
    }

    /// Resolve whichever abstract the config key names at resolution time.
    pub fn give_config(self, key: impl Into<String>) -> Result<()> {
        let key = key.into();
        if key.is_empty() {
            return Err(ContainerError::MissingConfig { key });
        }
        self.register(Implementation::Config(key));
        Ok(())
    }

    fn register(self, implementation: Implementation) {
        let mut registry = self.container.registry_mut();
        let consumer = registry.canonical(&self.consumer);

        #[cfg(feature = "logging")]
        debug!(
            target: "service_container",
            consumer = consumer.as_str(),
            needs = self.needed.as_str(),
            implementation = ?implementation,
            "Registering contextual binding"
        );

        registry.insert_contextual(consumer, self.needed, implementation);
    }
}
