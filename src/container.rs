//! The dependency injection container
//!
//! [`Container`] composes the registry, the root scope and the resolution
//! engine. [`ServiceProvider`] is the resolving view of one scope; the
//! container itself resolves against its root scope.

use crate::engine;
use crate::scope::Scope;
use crate::storage::ServiceRegistry;
use crate::verified::Service;
use crate::{
    Activator, AnyArc, ContainerOptions, DiError, Generic, Lifetime, Result, ScopeFactory, ScopeId,
    ServiceActivator, ServiceDescriptor, ServiceIdentity, ServiceKey, ServiceScope, ServiceType,
    downcast,
};
use ahash::RandomState;
use dashmap::DashSet;
use parking_lot::ReentrantMutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[cfg(feature = "logging")]
use tracing::{debug, warn};

// =============================================================================
// Container internals
// =============================================================================

pub(crate) struct ContainerInner {
    pub(crate) registry: ServiceRegistry,
    pub(crate) root: Arc<Scope>,
    activator: Arc<ServiceActivator>,
    /// Container-wide construction lock. Reentrant so factories can resolve
    /// their own dependencies on the same thread.
    pub(crate) lock: ReentrantMutex<()>,
    disposed: AtomicBool,
    live_scopes: DashSet<ScopeId, RandomState>,
}

impl ContainerInner {
    fn new(options: ContainerOptions) -> Self {
        let activator = Arc::new(ServiceActivator::new());
        let root = Scope::root();
        // A fresh root scope has no activator yet.
        let _ = root.bind(Arc::clone(&activator) as Arc<dyn Activator>);

        #[cfg(feature = "logging")]
        debug!(
            target: "scoped_di",
            scope_id = %root.id(),
            capacity = options.capacity,
            duplicate_policy = ?options.duplicate_policy,
            "Creating DI container"
        );

        Self {
            registry: ServiceRegistry::with_capacity(options.capacity, options.duplicate_policy),
            root: Arc::new(root),
            activator,
            lock: ReentrantMutex::new(()),
            disposed: AtomicBool::new(false),
            live_scopes: DashSet::with_hasher(RandomState::new()),
        }
    }

    #[inline]
    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn ensure_live(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(DiError::Disposed {
                object: "Container",
            });
        }
        Ok(())
    }

    pub(crate) fn default_activator(&self) -> Arc<dyn Activator> {
        Arc::clone(&self.activator) as Arc<dyn Activator>
    }

    /// The activator bound to `scope`, falling back to the container's.
    pub(crate) fn activator_for(&self, scope: &Scope) -> Arc<dyn Activator> {
        scope.activator().unwrap_or_else(|| self.default_activator())
    }

    pub(crate) fn create_scope(self: &Arc<Self>, activator: Arc<dyn Activator>) -> Result<ServiceScope> {
        self.ensure_live()?;

        let owner = Arc::downgrade(self);
        let scope = Arc::new(Scope::child(Box::new(move |id| {
            if let Some(inner) = owner.upgrade() {
                inner.live_scopes.remove(&id);
            }
        })));
        scope.bind(activator)?;
        self.live_scopes.insert(scope.id());

        #[cfg(feature = "logging")]
        debug!(
            target: "scoped_di",
            scope_id = %scope.id(),
            live_scopes = self.live_scopes.len(),
            "Created scope"
        );

        Ok(ServiceScope::new(ServiceProvider::new(Arc::clone(self), scope)))
    }

    /// Set the disposed flag under the construction lock and the registry
    /// gate, so no construction or registration is half-way through when the
    /// root scope starts releasing.
    fn begin_dispose(&self) -> bool {
        let _guard = self.lock.lock();
        let _sealed = self.registry.seal();
        !self.disposed.swap(true, Ordering::AcqRel)
    }

    fn finish_dispose(&self, result: Result<()>) -> Result<()> {
        self.activator_for(&self.root).scopes_released();
        // Descriptors own the published singletons, and those may own
        // built-in handles back to this container.
        self.registry.clear();

        #[cfg(feature = "logging")]
        debug!(
            target: "scoped_di",
            live_scopes = self.live_scopes.len(),
            ok = result.is_ok(),
            "Container disposed"
        );

        result
    }

    /// Dispose the root scope. Idempotent.
    pub(crate) fn dispose(&self) -> Result<()> {
        if !self.begin_dispose() {
            return Ok(());
        }
        let result = self.root.dispose();
        self.finish_dispose(result)
    }

    pub(crate) async fn dispose_async(&self) -> Result<()> {
        if !self.begin_dispose() {
            return Ok(());
        }
        let result = self.root.dispose_async().await;
        self.finish_dispose(result)
    }
}

/// Shared by the `Container` handles the caller created. Dropping the last
/// one disposes the container; built-in handles resolved from the container
/// do not hold it.
struct OwnerGuard(Arc<ContainerInner>);

impl Drop for OwnerGuard {
    fn drop(&mut self) {
        if self.0.is_disposed() {
            return;
        }
        if let Err(_err) = self.0.dispose() {
            #[cfg(feature = "logging")]
            warn!(
                target: "scoped_di",
                error = %_err,
                "Disposing dropped container failed"
            );
        }
    }
}

// =============================================================================
// Service Provider
// =============================================================================

/// Resolves services against one scope.
///
/// Factories receive the provider of the scope they build for; singletons
/// are always built against the root scope's provider.
#[derive(Clone)]
pub struct ServiceProvider {
    inner: Arc<ContainerInner>,
    scope: Arc<Scope>,
}

impl ServiceProvider {
    pub(crate) fn new(inner: Arc<ContainerInner>, scope: Arc<Scope>) -> Self {
        Self { inner, scope }
    }

    #[inline]
    pub(crate) fn scope(&self) -> &Arc<Scope> {
        &self.scope
    }

    #[inline]
    pub(crate) fn inner(&self) -> &Arc<ContainerInner> {
        &self.inner
    }

    /// Id of the scope this provider resolves against.
    #[inline]
    pub fn scope_id(&self) -> ScopeId {
        self.scope.id()
    }

    /// Resolve `identity`, or `None` when nothing is registered for it.
    ///
    /// Construction failures are returned as errors, never as `None`.
    pub fn get_service(&self, identity: &ServiceIdentity) -> Result<Option<AnyArc>> {
        engine::resolve(&self.inner, identity, &self.scope)
    }

    /// Resolve `identity`, failing with [`DiError::NotRegistered`] on a miss.
    pub fn get_required_service(&self, identity: &ServiceIdentity) -> Result<AnyArc> {
        self.get_service(identity)?
            .ok_or_else(|| DiError::not_registered(identity))
    }

    /// The descriptor `identity` resolves through, materializing closed
    /// generics on demand.
    pub fn get_service_descriptor(&self, identity: &ServiceIdentity) -> Result<Arc<ServiceDescriptor>> {
        self.inner.ensure_live()?;
        self.inner
            .registry
            .lookup(identity)
            .ok_or_else(|| DiError::not_registered(identity))
    }

    /// Whether `identity` has an exact registration.
    pub fn contains(&self, identity: &ServiceIdentity) -> bool {
        self.inner.registry.contains(identity)
    }

    // =========================================================================
    // Typed resolution
    // =========================================================================

    /// Resolve a service by type.
    #[inline]
    pub fn get<T: ?Sized + Send + Sync + 'static>(&self) -> Result<Arc<T>> {
        self.get_typed(&ServiceIdentity::of::<T>())
    }

    /// Resolve a service by type, `None` when it is not registered.
    #[inline]
    pub fn try_get<T: ?Sized + Send + Sync + 'static>(&self) -> Result<Option<Arc<T>>> {
        self.try_get_typed(&ServiceIdentity::of::<T>())
    }

    /// Resolve a keyed service.
    #[inline]
    pub fn get_keyed<T: ?Sized + Send + Sync + 'static>(
        &self,
        key: impl Into<ServiceKey>,
    ) -> Result<Arc<T>> {
        self.get_typed(&ServiceIdentity::keyed::<T>(key))
    }

    #[inline]
    pub fn try_get_keyed<T: ?Sized + Send + Sync + 'static>(
        &self,
        key: impl Into<ServiceKey>,
    ) -> Result<Option<Arc<T>>> {
        self.try_get_typed(&ServiceIdentity::keyed::<T>(key))
    }

    /// Resolve a closed generic, materializing it from its open registration.
    #[inline]
    pub fn get_generic<T: Generic + Send + Sync>(&self) -> Result<Arc<T>> {
        self.get_typed(&ServiceIdentity::new(ServiceType::generic::<T>(), None))
    }

    #[inline]
    pub fn try_get_generic<T: Generic + Send + Sync>(&self) -> Result<Option<Arc<T>>> {
        self.try_get_typed(&ServiceIdentity::new(ServiceType::generic::<T>(), None))
    }

    fn get_typed<T: ?Sized + Send + Sync + 'static>(&self, identity: &ServiceIdentity) -> Result<Arc<T>> {
        let instance = self.get_required_service(identity)?;
        cast::<T>(identity, &instance)
    }

    fn try_get_typed<T: ?Sized + Send + Sync + 'static>(
        &self,
        identity: &ServiceIdentity,
    ) -> Result<Option<Arc<T>>> {
        self.get_service(identity)?
            .map(|instance| cast::<T>(identity, &instance))
            .transpose()
    }
}

#[inline]
fn cast<T: ?Sized + Send + Sync + 'static>(identity: &ServiceIdentity, instance: &AnyArc) -> Result<Arc<T>> {
    downcast::<T>(instance).ok_or_else(|| DiError::invalid_cast::<T>(identity))
}

impl std::fmt::Debug for ServiceProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceProvider")
            .field("scope", &self.scope.id())
            .field("root", &self.scope.is_root())
            .finish()
    }
}

// =============================================================================
// Container
// =============================================================================

/// The dependency injection container.
///
/// Cloning is cheap and every clone shares the same registry, root scope and
/// disposal state. Dropping the last clone disposes the container, unless it
/// was already disposed explicitly. A `Container` resolved as a built-in
/// service is a borrowed view and never disposes on drop.
///
/// # Examples
///
/// ```rust
/// use scoped_di::{Container, ServiceDescriptor};
/// use std::sync::Arc;
///
/// trait Logger: Send + Sync {
///     fn log(&self, msg: &str) -> String;
/// }
///
/// struct ConsoleLogger;
///
/// impl Logger for ConsoleLogger {
///     fn log(&self, msg: &str) -> String {
///         format!("[console] {msg}")
///     }
/// }
///
/// let container = Container::new();
/// container
///     .register(ServiceDescriptor::singleton(|_| {
///         Ok(Arc::new(ConsoleLogger) as Arc<dyn Logger>)
///     }))
///     .unwrap();
///
/// let logger = container.get::<dyn Logger>().unwrap();
/// assert_eq!(logger.log("hi"), "[console] hi");
/// ```
#[derive(Clone)]
pub struct Container {
    inner: Arc<ContainerInner>,
    owner: Option<Arc<OwnerGuard>>,
}

impl Container {
    /// Create a container with default options.
    #[inline]
    pub fn new() -> Self {
        Self::with_options(ContainerOptions::default())
    }

    pub fn with_options(options: ContainerOptions) -> Self {
        let inner = Arc::new(ContainerInner::new(options));
        Self {
            owner: Some(Arc::new(OwnerGuard(Arc::clone(&inner)))),
            inner,
        }
    }

    pub(crate) fn from_inner(inner: Arc<ContainerInner>) -> Self {
        Self { inner, owner: None }
    }

    /// Provider resolving against the root scope.
    #[inline]
    pub fn provider(&self) -> ServiceProvider {
        ServiceProvider::new(Arc::clone(&self.inner), Arc::clone(&self.inner.root))
    }

    /// The built-in activator used by [`provide`](Self::provide) and by
    /// scopes created without a custom activator.
    #[inline]
    pub fn activator(&self) -> &ServiceActivator {
        &self.inner.activator
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Register an unkeyed descriptor under its service type.
    pub fn register(&self, descriptor: impl Into<ServiceDescriptor>) -> Result<()> {
        let descriptor = descriptor.into();
        let identity = ServiceIdentity::new(descriptor.service_type().clone(), None);
        self.register_identity(identity, descriptor)
    }

    /// Register a descriptor under its service type and `key`.
    pub fn register_keyed(
        &self,
        key: impl Into<ServiceKey>,
        descriptor: impl Into<ServiceDescriptor>,
    ) -> Result<()> {
        let descriptor = descriptor.into();
        let identity = ServiceIdentity::new(descriptor.service_type().clone(), Some(key.into()));
        self.register_identity(identity, descriptor)
    }

    /// Register unless the identity is taken. Returns whether it was added.
    pub fn try_register(&self, descriptor: impl Into<ServiceDescriptor>) -> Result<bool> {
        let descriptor = descriptor.into();
        let identity = ServiceIdentity::new(descriptor.service_type().clone(), None);
        self.try_register_identity(identity, descriptor)
    }

    pub fn try_register_keyed(
        &self,
        key: impl Into<ServiceKey>,
        descriptor: impl Into<ServiceDescriptor>,
    ) -> Result<bool> {
        let descriptor = descriptor.into();
        let identity = ServiceIdentity::new(descriptor.service_type().clone(), Some(key.into()));
        self.try_register_identity(identity, descriptor)
    }

    fn register_identity(&self, identity: ServiceIdentity, descriptor: ServiceDescriptor) -> Result<()> {
        self.inner.ensure_live()?;

        #[cfg(feature = "logging")]
        debug!(
            target: "scoped_di",
            service = %identity,
            implementation = descriptor.implementation_type().name(),
            lifetime = %descriptor.lifetime(),
            open_generic = descriptor.is_generic_definition(),
            "Registering service"
        );

        self.inner
            .registry
            .register(identity, descriptor, || self.inner.ensure_live())
    }

    fn try_register_identity(&self, identity: ServiceIdentity, descriptor: ServiceDescriptor) -> Result<bool> {
        self.inner.ensure_live()?;
        let added = self
            .inner
            .registry
            .try_register(identity, descriptor, || self.inner.ensure_live())?;

        #[cfg(feature = "logging")]
        debug!(
            target: "scoped_di",
            added,
            "Try-registering service"
        );

        Ok(added)
    }

    /// Register a singleton built by `factory` on first resolution.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use scoped_di::Container;
    ///
    /// struct Database { url: String }
    ///
    /// let container = Container::new();
    /// container
    ///     .add_singleton(|_| Ok(Database { url: "postgres://localhost".into() }))
    ///     .unwrap();
    /// assert_eq!(container.get::<Database>().unwrap().url, "postgres://localhost");
    /// ```
    pub fn add_singleton<T, F>(&self, factory: F) -> Result<()>
    where
        T: Send + Sync + 'static,
        F: Fn(&ServiceProvider) -> Result<T> + Send + Sync + 'static,
    {
        self.register(ServiceDescriptor::singleton(move |p| factory(p).map(Arc::new)))
    }

    /// Register a service built once per scope.
    pub fn add_scoped<T, F>(&self, factory: F) -> Result<()>
    where
        T: Send + Sync + 'static,
        F: Fn(&ServiceProvider) -> Result<T> + Send + Sync + 'static,
    {
        self.register(ServiceDescriptor::scoped(move |p| factory(p).map(Arc::new)))
    }

    /// Register a service built on every resolution.
    ///
    /// ```rust
    /// use scoped_di::Container;
    /// use std::sync::atomic::{AtomicU64, Ordering};
    ///
    /// static COUNTER: AtomicU64 = AtomicU64::new(0);
    ///
    /// struct RequestId(u64);
    ///
    /// let container = Container::new();
    /// container
    ///     .add_transient(|_| Ok(RequestId(COUNTER.fetch_add(1, Ordering::SeqCst))))
    ///     .unwrap();
    ///
    /// let id1 = container.get::<RequestId>().unwrap();
    /// let id2 = container.get::<RequestId>().unwrap();
    /// assert_ne!(id1.0, id2.0);
    /// ```
    pub fn add_transient<T, F>(&self, factory: F) -> Result<()>
    where
        T: Send + Sync + 'static,
        F: Fn(&ServiceProvider) -> Result<T> + Send + Sync + 'static,
    {
        self.register(ServiceDescriptor::transient(move |p| factory(p).map(Arc::new)))
    }

    /// Register a pre-built singleton.
    pub fn add_instance<T: Send + Sync + 'static>(&self, instance: T) -> Result<()> {
        self.register(ServiceDescriptor::instance(Arc::new(instance)))
    }

    /// Register `S` with the built-in activator.
    pub fn provide<S: Service>(&self, lifetime: Lifetime) -> Result<()> {
        self.inner.ensure_live()?;
        self.inner.activator.register::<S>();
        self.register(ServiceDescriptor::activated::<S>(lifetime))
    }

    /// Register an open generic definition built by the activator.
    pub fn provide_generic<F>(&self, definition: ServiceType, lifetime: Lifetime, constructor: F) -> Result<()>
    where
        F: Fn(&ServiceProvider, &[ServiceType]) -> Result<AnyArc> + Send + Sync + 'static,
    {
        self.inner.ensure_live()?;
        self.inner
            .activator
            .register_generic(definition.clone(), constructor);
        self.register(ServiceDescriptor::open_generic_activated(
            definition.clone(),
            definition,
            lifetime,
        ))
    }

    // =========================================================================
    // Resolution
    // =========================================================================

    /// Resolve `identity` against `provider`'s scope.
    ///
    /// A provider of another container's scope resolves nothing here.
    pub fn resolve(&self, identity: &ServiceIdentity, provider: &ServiceProvider) -> Result<AnyArc> {
        if !Arc::ptr_eq(&self.inner, provider.inner()) {
            return Err(DiError::not_registered(format_args!(
                "{identity} in foreign {}",
                provider.scope_id()
            )));
        }
        engine::resolve(&self.inner, identity, provider.scope())?
            .ok_or_else(|| DiError::not_registered(identity))
    }

    #[inline]
    pub fn get_service(&self, identity: &ServiceIdentity) -> Result<Option<AnyArc>> {
        engine::resolve(&self.inner, identity, &self.inner.root)
    }

    #[inline]
    pub fn get_required_service(&self, identity: &ServiceIdentity) -> Result<AnyArc> {
        self.get_service(identity)?
            .ok_or_else(|| DiError::not_registered(identity))
    }

    #[inline]
    pub fn get_service_descriptor(&self, identity: &ServiceIdentity) -> Result<Arc<ServiceDescriptor>> {
        self.provider().get_service_descriptor(identity)
    }

    #[inline]
    pub fn get<T: ?Sized + Send + Sync + 'static>(&self) -> Result<Arc<T>> {
        self.provider().get::<T>()
    }

    #[inline]
    pub fn try_get<T: ?Sized + Send + Sync + 'static>(&self) -> Result<Option<Arc<T>>> {
        self.provider().try_get::<T>()
    }

    #[inline]
    pub fn get_keyed<T: ?Sized + Send + Sync + 'static>(&self, key: impl Into<ServiceKey>) -> Result<Arc<T>> {
        self.provider().get_keyed::<T>(key)
    }

    #[inline]
    pub fn try_get_keyed<T: ?Sized + Send + Sync + 'static>(
        &self,
        key: impl Into<ServiceKey>,
    ) -> Result<Option<Arc<T>>> {
        self.provider().try_get_keyed::<T>(key)
    }

    #[inline]
    pub fn get_generic<T: Generic + Send + Sync>(&self) -> Result<Arc<T>> {
        self.provider().get_generic::<T>()
    }

    #[inline]
    pub fn try_get_generic<T: Generic + Send + Sync>(&self) -> Result<Option<Arc<T>>> {
        self.provider().try_get_generic::<T>()
    }

    /// Whether `identity` has an exact registration.
    #[inline]
    pub fn contains(&self, identity: &ServiceIdentity) -> bool {
        self.inner.registry.contains(identity)
    }

    /// Number of descriptors, materialized generics included.
    #[inline]
    pub fn len(&self) -> usize {
        self.inner.registry.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every registered identity.
    pub fn registered(&self) -> Vec<ServiceIdentity> {
        self.inner.registry.identities()
    }

    // =========================================================================
    // Scopes
    // =========================================================================

    pub fn scope_factory(&self) -> ScopeFactory {
        ScopeFactory::new(Arc::clone(&self.inner))
    }

    /// Create a scope bound to the built-in activator.
    #[inline]
    pub fn create_scope(&self) -> Result<ServiceScope> {
        self.inner.create_scope(self.inner.default_activator())
    }

    /// Create a scope bound to a custom activator.
    #[inline]
    pub fn create_scope_with(&self, activator: Arc<dyn Activator>) -> Result<ServiceScope> {
        self.inner.create_scope(activator)
    }

    /// Number of created scopes not yet disposed.
    #[inline]
    pub fn live_scopes(&self) -> usize {
        self.inner.live_scopes.len()
    }

    // =========================================================================
    // Disposal
    // =========================================================================

    #[inline]
    pub fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }

    /// Dispose the root scope, releasing every singleton and root-owned
    /// disposable, newest first. Idempotent.
    pub fn dispose(&self) -> Result<()> {
        self.inner.dispose()
    }

    /// Like [`dispose`](Self::dispose), awaiting async disposables in turn.
    pub async fn dispose_async(&self) -> Result<()> {
        self.inner.dispose_async().await
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
            .field("service_count", &self.len())
            .field("root_scope", &self.inner.root.id())
            .field("live_scopes", &self.live_scopes())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
