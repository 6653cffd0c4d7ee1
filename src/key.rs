//! Service identifiers
//!
//! An [`Abstract`] is the name a service is bound and resolved under. It is
//! either a free-form string key (`"cache.redis"`) or a type token built from
//! a Rust type name.

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

/// Identifier under which a service is registered and resolved.
///
/// Cloning is a reference-count bump, so identifiers can be passed around
/// freely on the resolution path.
///
/// # Examples
///
/// ```rust
/// use service_container::Abstract;
///
/// struct Mailer;
///
/// let by_name = Abstract::from("mailer");
/// let by_type = Abstract::of::<Mailer>();
///
/// assert_eq!(by_name.as_str(), "mailer");
/// assert!(by_type.as_str().ends_with("Mailer"));
/// ```
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Abstract(Arc<str>);

impl Abstract {
    /// Create an identifier from a string key.
    #[inline]
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self(name.into())
    }

    /// Type token for `T`, keyed by its fully qualified type name.
    #[inline]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self(Arc::from(std::any::type_name::<T>()))
    }

    /// The identifier as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for Abstract {
    #[inline]
    fn from(name: &str) -> Self {
        Self(Arc::from(name))
    }
}

impl From<String> for Abstract {
    #[inline]
    fn from(name: String) -> Self {
        Self(Arc::from(name))
    }
}

impl From<&String> for Abstract {
    #[inline]
    fn from(name: &String) -> Self {
        Self(Arc::from(name.as_str()))
    }
}

impl From<&Abstract> for Abstract {
    #[inline]
    fn from(name: &Abstract) -> Self {
        name.clone()
    }
}

impl Borrow<str> for Abstract {
    #[inline]
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Abstract {
    #[inline]
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for Abstract {
    fn eq(&self, other: &str) -> bool {
        &*self.0 == other
    }
}

impl PartialEq<&str> for Abstract {
    fn eq(&self, other: &&str) -> bool {
        &*self.0 == *other
    }
}

impl fmt::Display for Abstract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Abstract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Abstract({:?})", &*self.0)
    }
}
