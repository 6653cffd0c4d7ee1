//! Binding registry
//!
//! Every table the container mutates (bindings, aliases, contextual
//! overrides, tags, extenders) lives in one [`Registry`] guarded by a single
//! reader/writer lock in the container. Singleton caches live on the
//! individual [`Binding`]s so a construction never needs the registry lock.

use crate::concrete::ExtenderFn;
use crate::contextual::Implementation;
use crate::{Abstract, Concrete, ConcreteKind, ConfigSource, Dependency, Instance, Result};
use ahash::RandomState;
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::sync::Arc;

// =============================================================================
// Binding
// =============================================================================

/// One registered abstract: its producer, sharing policy and, for shared
/// bindings, the cached instance.
pub(crate) struct Binding {
    concrete: Concrete,
    shared: bool,
    /// Single-flight cell; only ever filled for shared bindings
    instance: OnceCell<Instance>,
}

impl Binding {
    #[inline]
    pub fn new(concrete: Concrete, shared: bool) -> Self {
        Self {
            concrete,
            shared,
            instance: OnceCell::new(),
        }
    }

    /// Shared binding whose instance is already known.
    #[inline]
    pub fn resolved(concrete: Concrete, instance: Instance) -> Self {
        Self {
            concrete,
            shared: true,
            instance: OnceCell::with_value(instance),
        }
    }

    /// Same producer, empty cache.
    #[inline]
    pub fn fresh(&self) -> Self {
        Self::new(self.concrete.clone(), self.shared)
    }

    #[inline]
    pub fn concrete(&self) -> &Concrete {
        &self.concrete
    }

    #[inline]
    pub fn is_shared(&self) -> bool {
        self.shared
    }

    #[inline]
    pub fn cached(&self) -> Option<Instance> {
        self.instance.get().cloned()
    }

    #[inline]
    pub fn is_resolved(&self) -> bool {
        self.instance.get().is_some()
    }

    /// Return the cached instance or run `init` exactly once across threads.
    ///
    /// Concurrent callers block until the running `init` finishes. A failed
    /// `init` leaves the cell empty so the next caller retries.
    #[inline]
    pub fn get_or_try_init<F>(&self, init: F) -> Result<Instance>
    where
        F: FnOnce() -> Result<Instance>,
    {
        self.instance.get_or_try_init(init).cloned()
    }
}

// =============================================================================
// Binding snapshot
// =============================================================================

/// Point-in-time description of a binding, as returned by
/// `Container::bindings`.
#[derive(Debug, Clone)]
pub struct BindingInfo {
    pub abstract_: Abstract,
    pub kind: ConcreteKind,
    pub shared: bool,
    pub resolved: bool,
    pub tags: Vec<String>,
    pub aliases: Vec<Abstract>,
    pub dependencies: Vec<Dependency>,
}

// =============================================================================
// Registry
// =============================================================================

/// All mutable container tables. Never held across user code.
pub(crate) struct Registry {
    bindings: HashMap<Abstract, Arc<Binding>, RandomState>,
    /// alias -> canonical abstract
    aliases: HashMap<Abstract, Abstract, RandomState>,
    /// (consumer, needed) -> implementation
    contextual: HashMap<(Abstract, Abstract), Implementation, RandomState>,
    /// tag -> abstracts in insertion order
    tags: HashMap<String, Vec<Abstract>, RandomState>,
    extenders: HashMap<Abstract, Vec<ExtenderFn>, RandomState>,
    config: Option<Arc<dyn ConfigSource>>,
}

impl Registry {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bindings: HashMap::with_capacity_and_hasher(capacity, RandomState::new()),
            aliases: HashMap::default(),
            contextual: HashMap::default(),
            tags: HashMap::default(),
            extenders: HashMap::default(),
            config: None,
        }
    }

    /// Follow the alias table to the canonical abstract.
    pub fn canonical(&self, abstract_: &Abstract) -> Abstract {
        let mut current = abstract_;
        while let Some(target) = self.aliases.get(current) {
            current = target;
        }
        current.clone()
    }

    // ----- bindings -------------------------------------------------------

    #[inline]
    pub fn binding(&self, canonical: &Abstract) -> Option<Arc<Binding>> {
        self.bindings.get(canonical).cloned()
    }

    #[inline]
    pub fn contains(&self, canonical: &Abstract) -> bool {
        self.bindings.contains_key(canonical)
    }

    /// Register or replace. Replacing drops the old cache with the old
    /// binding, and a name that was an alias stops being one.
    pub fn insert(&mut self, abstract_: Abstract, binding: Binding) -> Option<Arc<Binding>> {
        self.aliases.remove(&abstract_);
        self.bindings.insert(abstract_, Arc::new(binding))
    }

    pub fn remove(&mut self, canonical: &Abstract) -> Option<Arc<Binding>> {
        self.bindings.remove(canonical)
    }

    /// Swap in `replacement` only if `current` is still the registered
    /// binding. Returns false if a concurrent rebind won.
    pub fn replace_if_current(
        &mut self,
        canonical: &Abstract,
        current: &Arc<Binding>,
        replacement: Binding,
    ) -> bool {
        match self.bindings.get_mut(canonical) {
            Some(slot) if Arc::ptr_eq(slot, current) => {
                *slot = Arc::new(replacement);
                true
            }
            _ => false,
        }
    }

    /// Reset every shared cache; `instance()` bindings have nothing to rebuild
    /// from and are dropped.
    pub fn forget_instances(&mut self) -> usize {
        let mut forgotten = 0;
        self.bindings.retain(|_, binding| {
            if !binding.is_resolved() {
                return true;
            }
            forgotten += 1;
            !matches!(binding.concrete(), Concrete::Instance(_))
        });
        for binding in self.bindings.values_mut() {
            if binding.is_resolved() {
                *binding = Arc::new(binding.fresh());
            }
        }
        forgotten
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    // ----- aliases --------------------------------------------------------

    #[inline]
    /// An alias replaces any binding registered under the same name.
    pub fn insert_alias(&mut self, alias: Abstract, canonical: Abstract) {
        self.bindings.remove(&alias);
        self.aliases.insert(alias, canonical);
    }

    fn aliases_of(&self, canonical: &Abstract) -> Vec<Abstract> {
        let mut aliases: Vec<Abstract> = self
            .aliases
            .keys()
            .filter(|alias| &self.canonical(alias) == canonical)
            .cloned()
            .collect();
        aliases.sort();
        aliases
    }

    // ----- contextual -----------------------------------------------------

    #[inline]
    pub fn insert_contextual(
        &mut self,
        consumer: Abstract,
        needed: Abstract,
        implementation: Implementation,
    ) {
        self.contextual.insert((consumer, needed), implementation);
    }

    /// Override for `consumer` needing `requested`, trying the identifier as
    /// written before its canonical form.
    pub fn contextual(
        &self,
        consumer: &Abstract,
        requested: &Abstract,
        canonical: &Abstract,
    ) -> Option<Implementation> {
        if self.contextual.is_empty() {
            return None;
        }
        self.contextual
            .get(&(consumer.clone(), requested.clone()))
            .or_else(|| {
                self.contextual
                    .get(&(consumer.clone(), canonical.clone()))
            })
            .cloned()
    }

    // ----- tags -----------------------------------------------------------

    pub fn insert_tag(&mut self, tag: &str, abstracts: Vec<Abstract>) {
        let entry = self.tags.entry(tag.to_owned()).or_default();
        for abstract_ in abstracts {
            if !entry.contains(&abstract_) {
                entry.push(abstract_);
            }
        }
    }

    pub fn tagged(&self, tag: &str) -> Vec<Abstract> {
        self.tags.get(tag).cloned().unwrap_or_default()
    }

    fn tags_of(&self, canonical: &Abstract) -> Vec<String> {
        let mut tags: Vec<String> = self
            .tags
            .iter()
            .filter(|(_, members)| members.iter().any(|member| &self.canonical(member) == canonical))
            .map(|(tag, _)| tag.clone())
            .collect();
        tags.sort();
        tags
    }

    // ----- extenders ------------------------------------------------------

    #[inline]
    pub fn push_extender(&mut self, canonical: Abstract, extender: ExtenderFn) {
        self.extenders.entry(canonical).or_default().push(extender);
    }

    #[inline]
    pub fn extenders(&self, canonical: &Abstract) -> Vec<ExtenderFn> {
        self.extenders.get(canonical).cloned().unwrap_or_default()
    }

    #[inline]
    pub fn remove_extenders(&mut self, canonical: &Abstract) {
        self.extenders.remove(canonical);
    }

    // ----- config ---------------------------------------------------------

    #[inline]
    pub fn set_config(&mut self, config: Arc<dyn ConfigSource>) {
        self.config = Some(config);
    }

    #[inline]
    pub fn config(&self) -> Option<Arc<dyn ConfigSource>> {
        self.config.clone()
    }

    // ----- whole-registry -------------------------------------------------

    pub fn snapshot(&self) -> Vec<BindingInfo> {
        let mut infos: Vec<BindingInfo> = self
            .bindings
            .iter()
            .map(|(abstract_, binding)| BindingInfo {
                abstract_: abstract_.clone(),
                kind: binding.concrete().kind(),
                shared: binding.is_shared(),
                resolved: binding.is_resolved(),
                tags: self.tags_of(abstract_),
                aliases: self.aliases_of(abstract_),
                dependencies: binding.concrete().dependencies().to_vec(),
            })
            .collect();
        infos.sort_by(|a, b| a.abstract_.cmp(&b.abstract_));
        infos
    }

    /// Drop everything except the config source.
    pub fn clear(&mut self) {
        self.bindings.clear();
        self.aliases.clear();
        self.contextual.clear();
        self.tags.clear();
        self.extenders.clear();
    }
}
