//! Configuration lookup for contextual bindings
//!
//! `give_config(key)` defers the choice of implementation to whatever
//! configuration is installed on the container with
//! [`Container::set_config`](crate::Container::set_config). The container
//! only needs string lookups, so plain maps, [`MapConfig`], [`EnvConfig`]
//! or a closure wrapped in [`FromFn`] all work.

use std::collections::{BTreeMap, HashMap};

/// Source of configuration values, keyed by dotted path (`"database.default"`).
pub trait ConfigSource: Send + Sync {
    /// Value for `key`, if set.
    fn get(&self, key: &str) -> Option<String>;
}

impl<S: std::hash::BuildHasher + Send + Sync> ConfigSource for HashMap<String, String, S> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).cloned()
    }
}

impl ConfigSource for BTreeMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        BTreeMap::get(self, key).cloned()
    }
}

/// Configuration backed by a lookup closure.
pub struct FromFn<F>(pub F);

impl<F> ConfigSource for FromFn<F>
where
    F: Fn(&str) -> Option<String> + Send + Sync,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }
}

/// In-memory configuration built fluently.
///
/// # Examples
///
/// ```rust
/// use service_container::{ConfigSource, MapConfig};
///
/// let config = MapConfig::new().with("database.default", "postgres");
/// assert_eq!(config.get("database.default").as_deref(), Some("postgres"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct MapConfig {
    values: BTreeMap<String, String>,
}

impl MapConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key` to `value`.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }
}

impl ConfigSource for MapConfig {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

/// Configuration read from environment variables.
///
/// `database.default` with prefix `APP` reads `APP_DATABASE_DEFAULT`.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    prefix: String,
}

impl EnvConfig {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Environment variable name for a dotted key.
    pub fn var_name(&self, key: &str) -> String {
        let key = key.replace(['.', '-'], "_").to_ascii_uppercase();
        if self.prefix.is_empty() {
            key
        } else {
            format!("{}_{}", self.prefix.to_ascii_uppercase(), key)
        }
    }
}

impl ConfigSource for EnvConfig {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(self.var_name(key)).ok()
    }
}
