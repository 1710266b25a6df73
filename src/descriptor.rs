//! Service descriptors
//!
//! A [`ServiceDescriptor`] is the recipe for a service: which type it
//! answers for, how to build it, and how long the result lives. Apart from
//! the lazily published singleton instance it never changes after
//! registration.

use crate::dispose::{AsyncRelease, SyncRelease, async_release, sync_release};
use crate::{
    AnyArc, AsyncDispose, Dispose, DisposeHandle, Lifetime, Result, ServiceKey, ServiceProvider,
    ServiceType, downcast, erase,
};
use once_cell::sync::OnceCell;
use std::marker::PhantomData;
use std::sync::Arc;

/// What a factory is being asked to build.
///
/// For descriptors materialized from an open generic registration the
/// service type is the closed instantiation, so the factory can inspect
/// [`ServiceRequest::type_arguments`].
#[derive(Debug, Clone, Copy)]
pub struct ServiceRequest<'a> {
    service_type: &'a ServiceType,
    key: Option<&'a ServiceKey>,
}

impl<'a> ServiceRequest<'a> {
    #[inline]
    pub(crate) fn new(service_type: &'a ServiceType, key: Option<&'a ServiceKey>) -> Self {
        Self { service_type, key }
    }

    #[inline]
    pub fn service_type(&self) -> &'a ServiceType {
        self.service_type
    }

    #[inline]
    pub fn key(&self) -> Option<&'a ServiceKey> {
        self.key
    }

    #[inline]
    pub fn type_arguments(&self) -> &'a [ServiceType] {
        self.service_type.type_arguments()
    }
}

/// Type-erased construction factory
pub type FactoryFn =
    Arc<dyn Fn(&ServiceProvider, &ServiceRequest<'_>) -> Result<AnyArc> + Send + Sync>;

/// Capability check turning a produced instance into a disposal handle
type DisposalProbe = Arc<dyn Fn(&AnyArc) -> Option<DisposeHandle> + Send + Sync>;

/// Recipe for constructing a service.
pub struct ServiceDescriptor {
    service_type: ServiceType,
    implementation_type: ServiceType,
    lifetime: Lifetime,
    factory: Option<FactoryFn>,
    singleton: OnceCell<AnyArc>,
    disposal: Option<DisposalProbe>,
}

impl ServiceDescriptor {
    fn base(service_type: ServiceType, lifetime: Lifetime) -> Self {
        Self {
            implementation_type: service_type.clone(),
            service_type,
            lifetime,
            factory: None,
            singleton: OnceCell::new(),
            disposal: None,
        }
    }

    // =========================================================================
    // Typed constructors
    // =========================================================================

    /// Singleton built by `factory` on first resolution.
    pub fn singleton<T, F>(factory: F) -> DescriptorBuilder<T>
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn(&ServiceProvider) -> Result<Arc<T>> + Send + Sync + 'static,
    {
        Self::with_factory(Lifetime::Singleton, move |provider, _| factory(provider))
    }

    /// One instance per scope, built by `factory`.
    pub fn scoped<T, F>(factory: F) -> DescriptorBuilder<T>
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn(&ServiceProvider) -> Result<Arc<T>> + Send + Sync + 'static,
    {
        Self::with_factory(Lifetime::Scoped, move |provider, _| factory(provider))
    }

    /// Fresh instance from `factory` on every resolution.
    pub fn transient<T, F>(factory: F) -> DescriptorBuilder<T>
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn(&ServiceProvider) -> Result<Arc<T>> + Send + Sync + 'static,
    {
        Self::with_factory(Lifetime::Transient, move |provider, _| factory(provider))
    }

    /// Factory registration that also sees the request (closed type, key).
    pub fn with_factory<T, F>(lifetime: Lifetime, factory: F) -> DescriptorBuilder<T>
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn(&ServiceProvider, &ServiceRequest<'_>) -> Result<Arc<T>> + Send + Sync + 'static,
    {
        let mut descriptor = Self::base(ServiceType::of::<T>(), lifetime);
        descriptor.factory = Some(Arc::new(
            move |provider: &ServiceProvider, request: &ServiceRequest<'_>| {
                factory(provider, request).map(erase)
            },
        ));
        DescriptorBuilder::new(descriptor)
    }

    /// Pre-built singleton instance.
    pub fn instance<T>(instance: Arc<T>) -> DescriptorBuilder<T>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let descriptor = Self::base(ServiceType::of::<T>(), Lifetime::Singleton);
        // A fresh cell cannot already be populated.
        let _ = descriptor.singleton.set(erase(instance));
        DescriptorBuilder::new(descriptor)
    }

    /// No factory: the scope's activator builds the implementation type.
    pub fn activated<T>(lifetime: Lifetime) -> DescriptorBuilder<T>
    where
        T: Send + Sync + 'static,
    {
        DescriptorBuilder::new(Self::base(ServiceType::of::<T>(), lifetime))
    }

    // =========================================================================
    // Open generic constructors
    // =========================================================================

    /// Open generic registration built by an erased factory.
    ///
    /// The factory is invoked with the closed service type and must return
    /// an instance produced by [`erase`] for that closed type.
    pub fn open_generic<F>(definition: ServiceType, lifetime: Lifetime, factory: F) -> Self
    where
        F: Fn(&ServiceProvider, &ServiceRequest<'_>) -> Result<AnyArc> + Send + Sync + 'static,
    {
        let mut descriptor = Self::base(definition, lifetime);
        descriptor.factory = Some(Arc::new(factory));
        descriptor
    }

    /// Open generic registration built by the activator from the
    /// `implementation` definition and the closed type arguments.
    pub fn open_generic_activated(
        definition: ServiceType,
        implementation: ServiceType,
        lifetime: Lifetime,
    ) -> Self {
        let mut descriptor = Self::base(definition, lifetime);
        descriptor.implementation_type = implementation;
        descriptor
    }

    /// Attach a disposal probe to an erased descriptor.
    pub fn with_disposal<F>(mut self, probe: F) -> Self
    where
        F: Fn(&AnyArc) -> Option<DisposeHandle> + Send + Sync + 'static,
    {
        self.disposal = Some(Arc::new(probe));
        self
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    #[inline]
    pub fn service_type(&self) -> &ServiceType {
        &self.service_type
    }

    #[inline]
    pub fn implementation_type(&self) -> &ServiceType {
        &self.implementation_type
    }

    #[inline]
    pub fn lifetime(&self) -> Lifetime {
        self.lifetime
    }

    #[inline]
    pub fn has_factory(&self) -> bool {
        self.factory.is_some()
    }

    /// Whether this is an open generic registration awaiting materialization.
    #[inline]
    pub fn is_generic_definition(&self) -> bool {
        self.service_type.is_generic_definition()
    }

    /// The singleton instance, once built.
    #[inline]
    pub fn singleton_instance(&self) -> Option<AnyArc> {
        self.singleton.get().cloned()
    }

    #[inline]
    pub(crate) fn factory(&self) -> Option<&FactoryFn> {
        self.factory.as_ref()
    }

    /// Publish the singleton instance. Callers hold the container lock.
    #[inline]
    pub(crate) fn set_singleton_instance(&self, instance: AnyArc) {
        let _ = self.singleton.set(instance);
    }

    /// Run the disposability check against a freshly built instance.
    #[inline]
    pub(crate) fn disposal_handle(&self, instance: &AnyArc) -> Option<DisposeHandle> {
        self.disposal.as_ref().and_then(|probe| probe(instance))
    }

    /// Copy of an open generic descriptor answering for `closed`.
    ///
    /// Implementation, lifetime, factory and disposal probe are shared; the
    /// singleton slot starts empty.
    pub(crate) fn clone_for(&self, closed: ServiceType) -> Self {
        Self {
            service_type: closed,
            implementation_type: self.implementation_type.clone(),
            lifetime: self.lifetime,
            factory: self.factory.clone(),
            singleton: OnceCell::new(),
            disposal: self.disposal.clone(),
        }
    }
}

impl std::fmt::Debug for ServiceDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceDescriptor")
            .field("service_type", &self.service_type)
            .field("implementation_type", &self.implementation_type)
            .field("lifetime", &self.lifetime)
            .field("has_factory", &self.factory.is_some())
            .field("has_instance", &self.singleton.get().is_some())
            .field("disposable", &self.disposal.is_some())
            .finish()
    }
}

// =============================================================================
// Typed builder
// =============================================================================

type SyncHook<T> = fn(Arc<T>) -> SyncRelease;
type AsyncHook<T> = fn(Arc<T>) -> AsyncRelease;

/// Typed view over a descriptor under construction.
///
/// Exists so disposal capabilities can be declared against the service type
/// before it is erased.
///
/// ```rust
/// use scoped_di::{Container, Dispose, DisposeResult, ServiceDescriptor};
/// use std::sync::Arc;
///
/// struct Pool;
///
/// impl Dispose for Pool {
///     fn dispose(&self) -> DisposeResult {
///         Ok(())
///     }
/// }
///
/// let container = Container::new();
/// container
///     .register(ServiceDescriptor::singleton(|_| Ok(Arc::new(Pool))).disposable())
///     .unwrap();
/// ```
pub struct DescriptorBuilder<T: ?Sized> {
    descriptor: ServiceDescriptor,
    sync: Option<SyncHook<T>>,
    asynchronous: Option<AsyncHook<T>>,
    _marker: PhantomData<fn() -> Arc<T>>,
}

impl<T> DescriptorBuilder<T>
where
    T: ?Sized + Send + Sync + 'static,
{
    fn new(descriptor: ServiceDescriptor) -> Self {
        Self {
            descriptor,
            sync: None,
            asynchronous: None,
            _marker: PhantomData,
        }
    }

    /// Release instances through [`Dispose`] when their owner is disposed.
    pub fn disposable(mut self) -> Self
    where
        T: Dispose,
    {
        self.sync = Some(sync_release::<T>);
        self
    }

    /// Release instances through [`AsyncDispose`] when their owner is
    /// disposed asynchronously.
    pub fn async_disposable(mut self) -> Self
    where
        T: AsyncDispose,
    {
        self.asynchronous = Some(async_release::<T>);
        self
    }

    /// Record the concrete implementation type for diagnostics.
    pub fn implemented_by<I: ?Sized + 'static>(mut self) -> Self {
        self.descriptor.implementation_type = ServiceType::of::<I>();
        self
    }

    /// Finish the descriptor.
    pub fn build(self) -> ServiceDescriptor {
        let Self {
            mut descriptor,
            sync,
            asynchronous,
            ..
        } = self;

        if sync.is_some() || asynchronous.is_some() {
            let type_name = std::any::type_name::<T>();
            descriptor.disposal = Some(Arc::new(move |instance: &AnyArc| {
                let typed = downcast::<T>(instance)?;
                DisposeHandle::from_parts(
                    type_name,
                    sync.map(|hook| hook(Arc::clone(&typed))),
                    asynchronous.map(|hook| hook(Arc::clone(&typed))),
                )
            }));
        }
        descriptor
    }
}

impl<T> From<DescriptorBuilder<T>> for ServiceDescriptor
where
    T: ?Sized + Send + Sync + 'static,
{
    fn from(builder: DescriptorBuilder<T>) -> Self {
        builder.build()
    }
}
