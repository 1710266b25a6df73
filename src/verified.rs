//! Services that declare their dependencies
//!
//! A [`Service`] names the dependencies it needs as a [`Resolvable`] type and
//! builds itself from them. [`Container::provide`] registers such a service
//! with the container's [`ServiceActivator`], so no factory closure is needed.
//!
//! ```rust
//! use scoped_di::{Container, Lifetime, Service};
//! use std::sync::Arc;
//!
//! struct Database {
//!     url: String,
//! }
//!
//! impl Service for Database {
//!     type Dependencies = ();
//!
//!     fn create(_deps: ()) -> Self {
//!         Database { url: "postgres://localhost".into() }
//!     }
//! }
//!
//! struct UserRepository {
//!     db: Arc<Database>,
//! }
//!
//! impl Service for UserRepository {
//!     type Dependencies = Arc<Database>;
//!
//!     fn create(db: Self::Dependencies) -> Self {
//!         UserRepository { db }
//!     }
//! }
//!
//! let container = Container::new();
//! container.provide::<Database>(Lifetime::Singleton).unwrap();
//! container.provide::<UserRepository>(Lifetime::Scoped).unwrap();
//!
//! let scope = container.create_scope().unwrap();
//! let repo = scope.get::<UserRepository>().unwrap();
//! assert_eq!(repo.db.url, "postgres://localhost");
//! ```
//!
//! [`Container::provide`]: crate::Container::provide
//! [`ServiceActivator`]: crate::ServiceActivator

use crate::{Generic, Injectable, Result, ServiceProvider};
use std::ops::Deref;
use std::sync::Arc;

// =============================================================================
// Service Trait
// =============================================================================

/// A service that declares its dependencies at compile time.
///
/// # Supported Dependency Types
///
/// - `()` - No dependencies
/// - `Arc<T>` - Single required dependency
/// - `Closed<T>` - A closed generic materialized from its open registration
/// - `Option<Arc<T>>` - Optional dependency
/// - `(A, B, ...)` - Any of the above combined (tuples up to 12)
pub trait Service: Injectable + Sized {
    /// The dependencies required to create this service.
    type Dependencies: Resolvable;

    /// Create a new instance given the resolved dependencies.
    fn create(deps: Self::Dependencies) -> Self;
}

// =============================================================================
// Resolvable Trait
// =============================================================================

/// Dependencies that can be resolved from a provider.
///
/// A missing required dependency fails with
/// [`DiError::NotRegistered`](crate::DiError::NotRegistered); construction
/// errors of the dependency itself propagate unchanged.
pub trait Resolvable: Sized {
    fn resolve(provider: &ServiceProvider) -> Result<Self>;
}

impl Resolvable for () {
    #[inline]
    fn resolve(_provider: &ServiceProvider) -> Result<Self> {
        Ok(())
    }
}

impl<T: ?Sized + Send + Sync + 'static> Resolvable for Arc<T> {
    #[inline]
    fn resolve(provider: &ServiceProvider) -> Result<Self> {
        provider.get::<T>()
    }
}

impl<T: ?Sized + Send + Sync + 'static> Resolvable for Option<Arc<T>> {
    #[inline]
    fn resolve(provider: &ServiceProvider) -> Result<Self> {
        provider.try_get::<T>()
    }
}

/// A closed generic dependency, resolved through
/// [`ServiceProvider::get_generic`].
///
/// A plain `Arc<Repository<u32>>` only finds an explicit registration of that
/// exact type; `Closed<Repository<u32>>` also materializes it from the open
/// `Repository` definition.
pub struct Closed<T: Generic + Send + Sync>(pub Arc<T>);

impl<T: Generic + Send + Sync> Deref for Closed<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T: Generic + Send + Sync> Resolvable for Closed<T> {
    #[inline]
    fn resolve(provider: &ServiceProvider) -> Result<Self> {
        provider.get_generic::<T>().map(Closed)
    }
}

macro_rules! impl_resolvable_tuple {
    ($($T:ident),+) => {
        impl<$($T: Resolvable),+> Resolvable for ($($T,)+) {
            #[inline]
            fn resolve(provider: &ServiceProvider) -> Result<Self> {
                Ok(($($T::resolve(provider)?,)+))
            }
        }
    };
}

impl_resolvable_tuple!(A, B);
impl_resolvable_tuple!(A, B, C);
impl_resolvable_tuple!(A, B, C, D);
impl_resolvable_tuple!(A, B, C, D, E);
impl_resolvable_tuple!(A, B, C, D, E, F);
impl_resolvable_tuple!(A, B, C, D, E, F, G);
impl_resolvable_tuple!(A, B, C, D, E, F, G, H);
impl_resolvable_tuple!(A, B, C, D, E, F, G, H, I);
impl_resolvable_tuple!(A, B, C, D, E, F, G, H, I, J);
impl_resolvable_tuple!(A, B, C, D, E, F, G, H, I, J, K);
impl_resolvable_tuple!(A, B, C, D, E, F, G, H, I, J, K, L);
