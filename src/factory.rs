//! Activation of services registered without a factory
//!
//! Descriptors built through [`ServiceDescriptor::activated`] or
//! [`ServiceDescriptor::open_generic_activated`] carry no factory. The
//! resolving scope's [`Activator`] builds them instead, from the
//! implementation type and, for materialized generics, the closed type
//! arguments.
//!
//! [`ServiceDescriptor::activated`]: crate::ServiceDescriptor::activated
//! [`ServiceDescriptor::open_generic_activated`]: crate::ServiceDescriptor::open_generic_activated

use crate::verified::{Resolvable, Service};
use crate::{AnyArc, DiError, Result, ServiceProvider, ServiceType, downcast, erase};
use ahash::RandomState;
use dashmap::DashMap;
use std::any::TypeId;
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::{debug, trace};

/// Builds instances of implementation types.
pub trait Activator: Send + Sync {
    /// Build an instance of `implementation`.
    ///
    /// The returned value must be produced by [`erase`] for the service type
    /// being resolved. `generic_arguments` is empty for non-generic services.
    fn create_instance(
        &self,
        implementation: &ServiceType,
        provider: &ServiceProvider,
        generic_arguments: &[ServiceType],
    ) -> Result<AnyArc>;

    /// Called once the owning container has released its root scope.
    fn scopes_released(&self) {}
}

impl dyn Activator {
    /// Typed shorthand for [`Activator::create_instance`].
    pub fn create<T: Send + Sync + 'static>(&self, provider: &ServiceProvider) -> Result<Arc<T>> {
        let implementation = ServiceType::of::<T>();
        let instance = self.create_instance(&implementation, provider, &[])?;
        downcast::<T>(&instance).ok_or_else(|| DiError::invalid_cast::<T>(implementation))
    }
}

type Constructor = Arc<dyn Fn(&ServiceProvider, &[ServiceType]) -> Result<AnyArc> + Send + Sync>;

/// Activator backed by explicitly registered constructors.
///
/// ```rust
/// use scoped_di::{Container, Lifetime, Service};
/// use std::sync::Arc;
///
/// struct Config;
///
/// impl Service for Config {
///     type Dependencies = ();
///     fn create(_: ()) -> Self {
///         Config
///     }
/// }
///
/// let container = Container::new();
/// container.provide::<Config>(Lifetime::Singleton).unwrap();
/// let a = container.get::<Config>().unwrap();
/// let b = container.get::<Config>().unwrap();
/// assert!(Arc::ptr_eq(&a, &b));
/// ```
#[derive(Default)]
pub struct ServiceActivator {
    constructors: DashMap<TypeId, Constructor, RandomState>,
}

impl ServiceActivator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Construct `S` from its declared dependencies.
    pub fn register<S: Service>(&self) {
        self.insert(
            ServiceType::of::<S>(),
            Arc::new(|provider: &ServiceProvider, _: &[ServiceType]| {
                let deps = S::Dependencies::resolve(provider)?;
                Ok(erase(Arc::new(S::create(deps))))
            }),
        );
    }

    /// Construct `T` with a closure.
    pub fn register_with<T, F>(&self, constructor: F)
    where
        T: Send + Sync + 'static,
        F: Fn(&ServiceProvider) -> Result<T> + Send + Sync + 'static,
    {
        self.insert(
            ServiceType::of::<T>(),
            Arc::new(move |provider: &ServiceProvider, _: &[ServiceType]| {
                constructor(provider).map(|value| erase(Arc::new(value)))
            }),
        );
    }

    /// Construct closed instantiations of an open generic definition.
    ///
    /// The constructor receives the closed type arguments and must return an
    /// instance erased as the matching closed type.
    pub fn register_generic<F>(&self, definition: ServiceType, constructor: F)
    where
        F: Fn(&ServiceProvider, &[ServiceType]) -> Result<AnyArc> + Send + Sync + 'static,
    {
        self.insert(definition, Arc::new(constructor));
    }

    /// Whether a constructor exists for `implementation`.
    pub fn contains(&self, implementation: &ServiceType) -> bool {
        self.constructors.contains_key(&implementation.type_id())
    }

    fn insert(&self, implementation: ServiceType, constructor: Constructor) {
        #[cfg(feature = "logging")]
        debug!(
            target: "scoped_di",
            implementation = implementation.name(),
            "Registering activation constructor"
        );

        self.constructors.insert(implementation.type_id(), constructor);
    }
}

impl Activator for ServiceActivator {
    fn create_instance(
        &self,
        implementation: &ServiceType,
        provider: &ServiceProvider,
        generic_arguments: &[ServiceType],
    ) -> Result<AnyArc> {
        // Clone out so the shard lock is not held while user code runs.
        let constructor = self
            .constructors
            .get(&implementation.type_id())
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| DiError::CreationFailed {
                type_name: implementation.name().to_string(),
                reason: "no constructor registered with the activator".into(),
            })?;

        #[cfg(feature = "logging")]
        trace!(
            target: "scoped_di",
            implementation = implementation.name(),
            generic_arguments = generic_arguments.len(),
            "Activating instance"
        );

        constructor(provider, generic_arguments)
    }

    fn scopes_released(&self) {
        #[cfg(feature = "logging")]
        debug!(
            target: "scoped_di",
            constructors = self.constructors.len(),
            "All scopes released"
        );
    }
}

impl std::fmt::Debug for ServiceActivator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceActivator")
            .field("constructors", &self.constructors.len())
            .finish()
    }
}
