//! Service providers
//!
//! A [`ServiceProvider`] groups the bindings of one feature. Bootstrapping
//! runs in two phases: every provider registers its bindings, then every
//! provider boots. Boot can safely resolve anything another provider
//! registered.
//!
//! Deferred providers are not registered up front. The container indexes them
//! by the abstracts they declare in [`ServiceProvider::provides`] and
//! registers them the first time one of those abstracts is resolved.

use crate::{Abstract, Container, ContainerError, Result};
use ahash::RandomState;
use dashmap::DashMap;
use parking_lot::ReentrantMutex;
use std::any::TypeId;
use std::cell::Cell;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[cfg(feature = "logging")]
use tracing::debug;

/// Registers bindings into a container and boots them afterwards.
///
/// # Examples
///
/// ```rust
/// use service_container::{Abstract, Concrete, Container, ProviderRepository, Result, ServiceProvider};
///
/// struct Mailer { host: String }
///
/// struct MailServiceProvider;
///
/// impl ServiceProvider for MailServiceProvider {
///     fn register(&self, container: &Container) -> Result<()> {
///         container.singleton("mailer", Concrete::factory(|_| Ok(Mailer { host: "smtp".into() })))
///     }
///
///     fn provides(&self) -> Vec<Abstract> {
///         vec!["mailer".into()]
///     }
///
///     fn is_deferred(&self) -> bool {
///         true
///     }
/// }
///
/// let container = Container::new();
/// let mut providers = ProviderRepository::new(container.clone());
/// providers.register(MailServiceProvider).unwrap();
/// providers.boot().unwrap();
///
/// // Registered on first use.
/// assert!(!container.bound("mailer"));
/// assert_eq!(container.make_as::<Mailer>("mailer").unwrap().host, "smtp");
/// assert!(container.bound("mailer"));
/// ```
pub trait ServiceProvider: Send + Sync + 'static {
    /// Bind services. Do not resolve other services here; they may not be
    /// registered yet.
    fn register(&self, container: &Container) -> Result<()>;

    /// Runs after every eager provider has registered.
    fn boot(&self, _container: &Container) -> Result<()> {
        Ok(())
    }

    /// Abstracts this provider binds. Required for deferred providers.
    fn provides(&self) -> Vec<Abstract> {
        Vec::new()
    }

    /// Register lazily, on first resolution of a provided abstract.
    fn is_deferred(&self) -> bool {
        false
    }

    /// Name for diagnostics.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

// =============================================================================
// Deferred providers
// =============================================================================

/// How far a deferred provider got.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Pending,
    Registered,
    Loaded,
}

/// Load state, only touched while holding the provider's lock.
struct LoadState {
    stage: Cell<Stage>,
    // Set while register or boot runs on the thread holding the lock.
    active: Cell<bool>,
}

/// A deferred provider plus its load lock.
///
/// The lock is reentrant: the loading thread may resolve the provider's own
/// abstracts from `register` or `boot`, while other threads wait.
struct DeferredProvider {
    provider: Arc<dyn ServiceProvider>,
    state: ReentrantMutex<LoadState>,
}

/// Index of deferred providers by provided abstract.
///
/// Concurrent first resolutions of any abstract of the same provider all
/// wait on one load. A provider stays indexed until both `register` and, once
/// providers have booted, `boot` succeed; a failed step is retried by the
/// next resolution.
pub(crate) struct DeferredProviders {
    index: DashMap<Abstract, Arc<DeferredProvider>, RandomState>,
    booted: AtomicBool,
}

impl DeferredProviders {
    pub fn new() -> Self {
        Self {
            index: DashMap::with_hasher(RandomState::new()),
            booted: AtomicBool::new(false),
        }
    }

    pub fn insert(&self, provider: Arc<dyn ServiceProvider>) {
        let entry = Arc::new(DeferredProvider {
            provider,
            state: ReentrantMutex::new(LoadState {
                stage: Cell::new(Stage::Pending),
                active: Cell::new(false),
            }),
        });
        for abstract_ in entry.provider.provides() {
            self.index.insert(abstract_, Arc::clone(&entry));
        }
    }

    #[inline]
    pub fn contains(&self, abstract_: &Abstract) -> bool {
        self.index.contains_key(abstract_)
    }

    /// Register (and boot, if providers already booted) the provider that
    /// declared `abstract_`.
    ///
    /// Returns false if no provider is pending for `abstract_`, or if the
    /// call came from that provider's own `register` or `boot`.
    pub fn load(&self, abstract_: &Abstract, container: &Container) -> Result<bool> {
        // Clone out of the map so no shard lock is held while the provider runs.
        let Some(entry) = self.index.get(abstract_).map(|entry| Arc::clone(entry.value())) else {
            return Ok(false);
        };

        let state = entry.state.lock();
        if state.active.get() {
            return Ok(false);
        }
        if state.stage.get() == Stage::Loaded {
            return Ok(true);
        }

        #[cfg(feature = "logging")]
        debug!(
            target: "service_container",
            provider = entry.provider.name(),
            trigger = abstract_.as_str(),
            stage = ?state.stage.get(),
            "Loading deferred service provider"
        );

        state.active.set(true);
        let result = self.run(entry.provider.as_ref(), &state.stage, container);
        state.active.set(false);
        result?;

        self.index
            .retain(|_, candidate| !Arc::ptr_eq(candidate, &entry));
        Ok(true)
    }

    /// Run whichever of `register` and `boot` has not succeeded yet.
    fn run(
        &self,
        provider: &dyn ServiceProvider,
        stage: &Cell<Stage>,
        container: &Container,
    ) -> Result<()> {
        if stage.get() == Stage::Pending {
            provider
                .register(container)
                .map_err(|err| ContainerError::provider(provider.name(), err))?;
            stage.set(Stage::Registered);
        }

        if self.booted.load(Ordering::Acquire) {
            provider
                .boot(container)
                .map_err(|err| ContainerError::provider(provider.name(), err))?;
        }

        stage.set(Stage::Loaded);
        Ok(())
    }

    #[inline]
    pub fn mark_booted(&self) {
        self.booted.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_booted(&self) -> bool {
        self.booted.load(Ordering::Acquire)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[inline]
    pub fn clear(&self) {
        self.index.clear();
    }
}

// =============================================================================
// Provider repository
// =============================================================================

/// Runs the register-then-boot sequence over a set of providers.
pub struct ProviderRepository {
    container: Container,
    providers: Vec<(TypeId, Arc<dyn ServiceProvider>)>,
    booted: bool,
}

impl ProviderRepository {
    pub fn new(container: Container) -> Self {
        Self {
            container,
            providers: Vec::new(),
            booted: false,
        }
    }

    /// The container providers register into.
    #[inline]
    pub fn container(&self) -> &Container {
        &self.container
    }

    /// Register a provider.
    ///
    /// Deferred providers are handed to the container's deferred index.
    /// Eager providers register now, and boot now too if the repository has
    /// already booted. Registering the same provider type twice returns the
    /// first instance without registering again.
    pub fn register<P: ServiceProvider>(&mut self, provider: P) -> Result<Arc<dyn ServiceProvider>> {
        let type_id = TypeId::of::<P>();
        if let Some((_, existing)) = self.providers.iter().find(|(id, _)| *id == type_id) {
            return Ok(Arc::clone(existing));
        }

        let provider: Arc<dyn ServiceProvider> = Arc::new(provider);

        if provider.is_deferred() && !provider.provides().is_empty() {
            self.container.defer(Arc::clone(&provider));
        } else {
            provider
                .register(&self.container)
                .map_err(|err| ContainerError::provider(provider.name(), err))?;
            if self.booted {
                provider
                    .boot(&self.container)
                    .map_err(|err| ContainerError::provider(provider.name(), err))?;
            }

            #[cfg(feature = "logging")]
            debug!(
                target: "service_container",
                provider = provider.name(),
                "Registered service provider"
            );
        }

        self.providers.push((type_id, Arc::clone(&provider)));
        Ok(provider)
    }

    /// Boot every eager provider in registration order. Runs once.
    pub fn boot(&mut self) -> Result<()> {
        if self.booted {
            return Ok(());
        }

        for (_, provider) in &self.providers {
            if provider.is_deferred() && !provider.provides().is_empty() {
                continue;
            }
            provider
                .boot(&self.container)
                .map_err(|err| ContainerError::provider(provider.name(), err))?;
        }

        self.booted = true;
        self.container.deferred().mark_booted();

        #[cfg(feature = "logging")]
        debug!(
            target: "service_container",
            providers = self.providers.len(),
            "Service providers booted"
        );

        Ok(())
    }

    /// Every registered provider, deferred ones included.
    pub fn providers(&self) -> impl Iterator<Item = &Arc<dyn ServiceProvider>> {
        self.providers.iter().map(|(_, provider)| provider)
    }

    #[inline]
    pub fn is_booted(&self) -> bool {
        self.booted
    }
}

impl std::fmt::Debug for ProviderRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRepository")
            .field(
                "providers",
                &self.providers().map(|p| p.name()).collect::<Vec<_>>(),
            )
            .field("booted", &self.booted)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Concrete;
    use parking_lot::Mutex;
    use std::sync::Barrier;
    use std::sync::atomic::AtomicU32;
    use std::thread;
    use std::time::Duration;

    type Log = Arc<Mutex<Vec<String>>>;

    struct Recording {
        name: &'static str,
        log: Log,
    }

    impl ServiceProvider for Recording {
        fn register(&self, container: &Container) -> Result<()> {
            self.log.lock().push(format!("register:{}", self.name));
            container.instance(self.name, self.name);
            Ok(())
        }

        fn boot(&self, container: &Container) -> Result<()> {
            // Boot may resolve what other providers registered.
            container.make("first")?;
            self.log.lock().push(format!("boot:{}", self.name));
            Ok(())
        }
    }

    struct Second(Recording);

    impl ServiceProvider for Second {
        fn register(&self, container: &Container) -> Result<()> {
            self.0.register(container)
        }

        fn boot(&self, container: &Container) -> Result<()> {
            self.0.boot(container)
        }
    }

    #[test]
    fn test_register_then_boot_in_order() {
        let log: Log = Arc::default();
        let mut providers = ProviderRepository::new(Container::new());

        providers
            .register(Recording {
                name: "first",
                log: Arc::clone(&log),
            })
            .unwrap();
        providers
            .register(Second(Recording {
                name: "second",
                log: Arc::clone(&log),
            }))
            .unwrap();
        providers.boot().unwrap();
        providers.boot().unwrap();

        assert_eq!(
            *log.lock(),
            ["register:first", "register:second", "boot:first", "boot:second"]
        );
        assert!(providers.is_booted());
    }

    #[test]
    fn test_duplicate_provider_type_is_ignored() {
        let log: Log = Arc::default();
        let mut providers = ProviderRepository::new(Container::new());

        for _ in 0..2 {
            providers
                .register(Recording {
                    name: "first",
                    log: Arc::clone(&log),
                })
                .unwrap();
        }

        assert_eq!(providers.providers().count(), 1);
        assert_eq!(*log.lock(), ["register:first"]);
    }

    #[test]
    fn test_late_registration_boots_immediately() {
        let log: Log = Arc::default();
        let mut providers = ProviderRepository::new(Container::new());
        providers
            .register(Recording {
                name: "first",
                log: Arc::clone(&log),
            })
            .unwrap();
        providers.boot().unwrap();
        providers
            .register(Second(Recording {
                name: "second",
                log: Arc::clone(&log),
            }))
            .unwrap();

        assert_eq!(log.lock().last().map(String::as_str), Some("boot:second"));
    }

    struct Deferred {
        registrations: Arc<AtomicU32>,
        boots: Arc<AtomicU32>,
    }

    impl ServiceProvider for Deferred {
        fn register(&self, container: &Container) -> Result<()> {
            self.registrations.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(20));
            container.singleton("queue", Concrete::factory(|_| Ok(String::from("redis"))))?;
            container.singleton("queue.failer", Concrete::factory(|_| Ok(String::from("db"))))
        }

        fn boot(&self, _container: &Container) -> Result<()> {
            self.boots.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn provides(&self) -> Vec<Abstract> {
            vec!["queue".into(), "queue.failer".into()]
        }

        fn is_deferred(&self) -> bool {
            true
        }
    }

    #[test]
    fn test_deferred_provider_loads_on_first_make() {
        let registrations = Arc::new(AtomicU32::new(0));
        let boots = Arc::new(AtomicU32::new(0));
        let container = Container::new();
        let mut providers = ProviderRepository::new(container.clone());
        providers
            .register(Deferred {
                registrations: Arc::clone(&registrations),
                boots: Arc::clone(&boots),
            })
            .unwrap();
        providers.boot().unwrap();

        assert_eq!(registrations.load(Ordering::SeqCst), 0);
        assert!(container.is_deferred("queue"));
        assert!(!container.bound("queue"));

        assert_eq!(*container.make_as::<String>("queue.failer").unwrap(), "db");
        assert_eq!(*container.make_as::<String>("queue").unwrap(), "redis");

        assert_eq!(registrations.load(Ordering::SeqCst), 1);
        assert_eq!(boots.load(Ordering::SeqCst), 1);
        assert!(!container.is_deferred("queue"));
    }

    #[test]
    fn test_deferred_provider_loads_once_under_contention() {
        const THREADS: usize = 8;

        let registrations = Arc::new(AtomicU32::new(0));
        let container = Container::new();
        container.defer(Arc::new(Deferred {
            registrations: Arc::clone(&registrations),
            boots: Arc::new(AtomicU32::new(0)),
        }));

        let barrier = Arc::new(Barrier::new(THREADS));
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let container = container.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    container.make_as::<String>("queue").unwrap()
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(registrations.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| Arc::ptr_eq(r, &results[0])));
    }

    struct Failing;

    impl ServiceProvider for Failing {
        fn register(&self, _container: &Container) -> Result<()> {
            Err(ContainerError::failed("no credentials"))
        }
    }

    #[test]
    fn test_register_failure_names_provider() {
        let mut providers = ProviderRepository::new(Container::new());
        match providers.register(Failing) {
            Err(ContainerError::Provider { provider, source }) => {
                assert!(provider.ends_with("Failing"));
                assert!(matches!(*source, ContainerError::Failed { ref reason } if reason == "no credentials"));
            }
            Err(other) => panic!("unexpected error: {other:?}"),
            Ok(_) => panic!("registration should fail"),
        }
        assert_eq!(providers.providers().count(), 0);
    }

    #[test]
    fn test_deferred_provider_not_booted_before_boot() {
        let boots = Arc::new(AtomicU32::new(0));
        let container = Container::new();
        container.defer(Arc::new(Deferred {
            registrations: Arc::new(AtomicU32::new(0)),
            boots: Arc::clone(&boots),
        }));

        container.make("queue").unwrap();
        assert_eq!(boots.load(Ordering::SeqCst), 0);
    }

    struct NeedsTransport;

    impl ServiceProvider for NeedsTransport {
        fn register(&self, container: &Container) -> Result<()> {
            container.make("transport")?;
            container.instance("mailer", "smtp");
            Ok(())
        }
    }

    #[test]
    fn test_register_failure_keeps_cause() {
        let mut providers = ProviderRepository::new(Container::new());
        let err = providers.register(NeedsTransport).err().unwrap();

        assert!(matches!(err, ContainerError::Provider { .. }));
        assert!(err.is_unbound());
        assert!(matches!(
            err.root_cause(),
            ContainerError::UnboundAbstract { abstract_ } if abstract_ == "transport"
        ));
    }

    struct FlakyBoot {
        registrations: Arc<AtomicU32>,
        boots: Arc<AtomicU32>,
    }

    impl ServiceProvider for FlakyBoot {
        fn register(&self, container: &Container) -> Result<()> {
            self.registrations.fetch_add(1, Ordering::SeqCst);
            container.singleton("cache", Concrete::factory(|_| Ok(String::from("redis"))))
        }

        fn boot(&self, _container: &Container) -> Result<()> {
            if self.boots.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(ContainerError::failed("boot down"));
            }
            Ok(())
        }

        fn provides(&self) -> Vec<Abstract> {
            vec!["cache".into()]
        }

        fn is_deferred(&self) -> bool {
            true
        }
    }

    #[test]
    fn test_failed_deferred_boot_is_retried() {
        let registrations = Arc::new(AtomicU32::new(0));
        let boots = Arc::new(AtomicU32::new(0));
        let container = Container::new();
        let mut providers = ProviderRepository::new(container.clone());
        providers
            .register(FlakyBoot {
                registrations: Arc::clone(&registrations),
                boots: Arc::clone(&boots),
            })
            .unwrap();
        providers.boot().unwrap();

        let err = container.make("cache").unwrap_err();
        assert!(matches!(err.root_cause(), ContainerError::Failed { .. }));
        assert!(container.is_deferred("cache"));

        assert_eq!(*container.make_as::<String>("cache").unwrap(), "redis");
        assert_eq!(registrations.load(Ordering::SeqCst), 1);
        assert_eq!(boots.load(Ordering::SeqCst), 2);
        assert!(!container.is_deferred("cache"));

        container.make("cache").unwrap();
        assert_eq!(boots.load(Ordering::SeqCst), 2);
    }

    struct SelfResolving;

    impl ServiceProvider for SelfResolving {
        fn register(&self, container: &Container) -> Result<()> {
            let early = container.make("late");
            container.instance("late.was_unbound", early.is_err_and(|err| err.is_unbound()));
            container.instance("late", 42u32);
            // Bound now, so resolving it again sees the fresh binding.
            container.make_as::<u32>("late").map(|_| ())
        }

        fn provides(&self) -> Vec<Abstract> {
            vec!["late".into()]
        }

        fn is_deferred(&self) -> bool {
            true
        }
    }

    #[test]
    fn test_provider_resolving_own_abstract_does_not_reenter_load() {
        let container = Container::new();
        container.defer(Arc::new(SelfResolving));

        assert_eq!(*container.make_as::<u32>("late").unwrap(), 42);
        assert!(*container.make_as::<bool>("late.was_unbound").unwrap());
        assert!(!container.is_deferred("late"));
    }
}
