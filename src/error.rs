//! Error types for the service container

use crate::Abstract;
use thiserror::Error;

/// Errors that can occur while registering or resolving services
#[derive(Error, Debug, Clone)]
pub enum ContainerError {
    /// An alias, tag or extend call referenced an abstract with no binding
    #[error("Unknown abstract: [{abstract_}] has no binding")]
    UnknownAbstract { abstract_: Abstract },

    /// A concrete failed bind-time validation
    #[error("Invalid concrete for [{abstract_}]: {reason}")]
    InvalidConcreteKind { abstract_: Abstract, reason: String },

    /// Nothing is bound (or deferred) under the requested abstract
    #[error("Target [{abstract_}] is not bound")]
    UnboundAbstract { abstract_: Abstract },

    /// Resolution re-entered an abstract already under construction
    #[error("Circular dependency detected: {}", format_path(.path))]
    CircularDependency { path: Vec<Abstract> },

    /// A factory, constructor or nested dependency failed
    #[error("{}", format_construction(.abstract_, .dependency))]
    Construction {
        abstract_: Abstract,
        dependency: Option<String>,
        #[source]
        source: Box<ContainerError>,
    },

    /// An abstract was aliased to itself
    #[error("[{abstract_}] is aliased to itself")]
    SelfAlias { abstract_: Abstract },

    /// A resolved instance was not of the requested type
    #[error("Resolved [{abstract_}] is not a {expected}")]
    TypeMismatch {
        abstract_: Abstract,
        expected: &'static str,
    },

    /// A contextual `give_config` key had no value
    #[error("Configuration key [{key}] is not set")]
    MissingConfig { key: String },

    /// A constructor asked for an argument that was never declared
    #[error("No argument named [{name}] was resolved")]
    MissingArgument { name: String },

    /// A service provider failed to register or boot
    #[error("Service provider {provider} failed")]
    Provider {
        provider: &'static str,
        #[source]
        source: Box<ContainerError>,
    },

    /// A factory reported its own failure
    #[error("Factory failed: {reason}")]
    Failed { reason: String },
}

fn format_path(path: &[Abstract]) -> String {
    path.iter()
        .map(Abstract::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

fn format_construction(abstract_: &Abstract, dependency: &Option<String>) -> String {
    match dependency {
        Some(dependency) => {
            format!("Failed to build [{abstract_}] while resolving dependency [{dependency}]")
        }
        None => format!("Failed to build [{abstract_}]"),
    }
}

impl ContainerError {
    /// Create an UnknownAbstract error
    #[inline]
    pub fn unknown(abstract_: &Abstract) -> Self {
        Self::UnknownAbstract {
            abstract_: abstract_.clone(),
        }
    }

    /// Create an UnboundAbstract error
    #[inline]
    pub fn unbound(abstract_: &Abstract) -> Self {
        Self::UnboundAbstract {
            abstract_: abstract_.clone(),
        }
    }

    /// Create an InvalidConcreteKind error
    #[inline]
    pub fn invalid_concrete(abstract_: &Abstract, reason: impl Into<String>) -> Self {
        Self::InvalidConcreteKind {
            abstract_: abstract_.clone(),
            reason: reason.into(),
        }
    }

    /// Create a TypeMismatch error for type T
    #[inline]
    pub fn type_mismatch<T: ?Sized + 'static>(abstract_: &Abstract) -> Self {
        Self::TypeMismatch {
            abstract_: abstract_.clone(),
            expected: std::any::type_name::<T>(),
        }
    }

    /// Create a Failed error, for use inside factories
    #[inline]
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }

    /// Wrap `source` with the provider that failed.
    ///
    /// Errors already attributed to a provider are returned as they are.
    pub fn provider(provider: &'static str, source: ContainerError) -> Self {
        match source {
            wrapped @ Self::Provider { .. } => wrapped,
            source => Self::Provider {
                provider,
                source: Box::new(source),
            },
        }
    }

    /// Wrap `source` with the abstract being built.
    ///
    /// Cycle errors pass through untouched; their path already names every
    /// frame.
    pub fn construction(
        abstract_: &Abstract,
        dependency: Option<&str>,
        source: ContainerError,
    ) -> Self {
        match source {
            circular @ Self::CircularDependency { .. } => circular,
            source => Self::Construction {
                abstract_: abstract_.clone(),
                dependency: dependency.map(str::to_owned),
                source: Box::new(source),
            },
        }
    }

    /// The wrapped error of a `Construction` or `Provider` error.
    #[inline]
    fn wrapped(&self) -> Option<&ContainerError> {
        match self {
            Self::Construction { source, .. } | Self::Provider { source, .. } => Some(&**source),
            _ => None,
        }
    }

    /// Innermost error of a `Construction` or `Provider` chain.
    pub fn root_cause(&self) -> &ContainerError {
        let mut current = self;
        while let Some(source) = current.wrapped() {
            current = source;
        }
        current
    }

    /// The chain of abstracts that were being built when this error surfaced,
    /// outermost first.
    pub fn trace(&self) -> Vec<&Abstract> {
        let mut trace = Vec::new();
        let mut current = self;
        while let Some(source) = current.wrapped() {
            if let Self::Construction { abstract_, .. } = current {
                trace.push(abstract_);
            }
            current = source;
        }
        trace
    }

    /// True if the root cause is a circular dependency
    #[inline]
    pub fn is_circular(&self) -> bool {
        matches!(self.root_cause(), Self::CircularDependency { .. })
    }

    /// True if the root cause is an unbound abstract
    #[inline]
    pub fn is_unbound(&self) -> bool {
        matches!(self.root_cause(), Self::UnboundAbstract { .. })
    }
}

/// Result type alias for container operations
pub type Result<T> = std::result::Result<T, ContainerError>;
